//! Stitching accumulator.
//! Keeps accepted frames as tiles with their vertical placement and only
//! paints them onto one canvas when the composite is requested.

use crate::frame::{CHANNELS, Frame, PixelFormat};

/// An accepted frame and the composite row its top lands on.
#[derive(Clone, Debug)]
pub struct Tile {
    pub frame: Frame,
    pub offset: u32,
}

#[derive(Debug)]
pub struct Stitcher {
    width: u32,
    background: [u8; 4],
    tiles: Vec<Tile>,
    total_height: u32,
}

impl Stitcher {
    /// `background` is RGBA.
    pub fn new(width: u32, background: [u8; 4]) -> Self {
        Self { width, background, tiles: Vec::new(), total_height: 0 }
    }

    /// Places `frame` so that its top `overlap` rows cover the bottom of the
    /// composite. Returns the placement offset.
    ///
    /// Overlap is clamped to the previous tile's height (and the frame's own),
    /// which keeps offsets non-decreasing.
    pub fn append(&mut self, frame: Frame, overlap: u32) -> u32 {
        let offset = match self.tiles.last() {
            None => 0,
            Some(last) => {
                let overlap = overlap.min(last.frame.height()).min(frame.height());
                self.total_height.saturating_sub(overlap)
            }
        };
        self.total_height = offset + frame.height();
        self.tiles.push(Tile { frame, offset });
        offset
    }

    /// Bottom `height` rows of the most recent tile.
    pub fn tail_slice(&self, height: u32) -> Option<Frame> {
        self.tiles.last().map(|tile| tile.frame.bottom_rows(height))
    }

    /// The most recent tile in full, for overlaps longer than the tail slice.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.tiles.last().map(|tile| &tile.frame)
    }

    pub fn total_height(&self) -> u32 {
        self.total_height
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn into_tiles(self) -> Vec<Tile> {
        self.tiles
    }

    /// Paints every tile in capture order; later tiles win in overlaps.
    pub fn render(&self) -> Frame {
        let format = self.tiles.first().map(|t| t.frame.format()).unwrap_or_default();
        let [r, g, b, a] = self.background;
        let fill = match format {
            PixelFormat::Rgba8 => [r, g, b, a],
            PixelFormat::Bgra8 => [b, g, r, a],
        };
        let mut canvas = Frame::filled(self.width, self.total_height, fill, format, 0);

        for tile in &self.tiles {
            let columns = tile.frame.width().min(self.width) as usize;
            for y in 0..tile.frame.height() {
                let dest_y = tile.offset + y;
                if dest_y >= self.total_height {
                    break;
                }
                let src = &tile.frame.row(y)[..columns * CHANNELS];
                let dest = &mut canvas.row_mut(dest_y)[..columns * CHANNELS];
                if tile.frame.format() == format {
                    dest.copy_from_slice(src);
                } else {
                    // RGBA <-> BGRA is the same swap both ways
                    for (d, s) in dest.chunks_exact_mut(CHANNELS).zip(src.chunks_exact(CHANNELS)) {
                        d.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
                    }
                }
            }
        }
        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, v: u8) -> Frame {
        Frame::filled(width, height, [v, v, v, 255], PixelFormat::Rgba8, 0)
    }

    #[test]
    fn test_first_tile_at_origin() {
        let mut stitcher = Stitcher::new(100, [0, 0, 0, 255]);
        assert_eq!(stitcher.append(solid(100, 80, 1), 50), 0);
        assert_eq!(stitcher.total_height(), 80);
    }

    #[test]
    fn test_offsets_follow_overlap() {
        let mut stitcher = Stitcher::new(100, [0, 0, 0, 255]);
        stitcher.append(solid(100, 80, 1), 0);
        assert_eq!(stitcher.append(solid(100, 80, 2), 30), 50);
        assert_eq!(stitcher.append(solid(100, 80, 3), 0), 130);
        assert_eq!(stitcher.total_height(), 210);
        assert_eq!(stitcher.len(), 3);
        let offsets: Vec<u32> = stitcher.into_tiles().iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![0, 50, 130]);
    }

    #[test]
    fn test_excess_overlap_is_clamped() {
        let mut stitcher = Stitcher::new(100, [0, 0, 0, 255]);
        stitcher.append(solid(100, 80, 1), 0);
        stitcher.append(solid(100, 40, 2), 0);
        // cannot reach above the previous tile
        assert_eq!(stitcher.append(solid(100, 60, 3), 500), 80);
        assert_eq!(stitcher.total_height(), 140);
    }

    #[test]
    fn test_tail_slice_is_bottom_of_last_tile() {
        let mut stitcher = Stitcher::new(10, [0, 0, 0, 255]);
        assert!(stitcher.tail_slice(5).is_none());
        assert!(stitcher.last_frame().is_none());
        let mut frame = solid(10, 20, 0);
        for y in 0..20 {
            frame.row_mut(y).fill(y as u8);
        }
        stitcher.append(frame, 0);
        let tail = stitcher.tail_slice(5).unwrap();
        assert_eq!(tail.height(), 5);
        assert_eq!(tail.row(0)[0], 15);
        assert_eq!(stitcher.tail_slice(100).unwrap().height(), 20);
        assert_eq!(stitcher.last_frame().map(Frame::height), Some(20));
    }

    #[test]
    fn test_render_later_tiles_win() {
        let mut stitcher = Stitcher::new(4, [9, 9, 9, 255]);
        stitcher.append(solid(4, 10, 1), 0);
        stitcher.append(solid(4, 10, 2), 4);
        let canvas = stitcher.render();
        assert_eq!((canvas.width(), canvas.height()), (4, 16));
        assert_eq!(canvas.row(5)[0], 1);
        assert_eq!(canvas.row(6)[0], 2);
        assert_eq!(canvas.row(15)[0], 2);
    }

    #[test]
    fn test_render_background_shows_beside_narrow_tiles() {
        let mut stitcher = Stitcher::new(6, [10, 20, 30, 255]);
        stitcher.append(solid(4, 3, 200), 0);
        let image = stitcher.render().to_rgba_image();
        assert_eq!(image.get_pixel(3, 0).0, [200, 200, 200, 255]);
        assert_eq!(image.get_pixel(5, 2).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_render_is_idempotent() {
        let mut stitcher = Stitcher::new(4, [0, 0, 0, 255]);
        stitcher.append(solid(4, 10, 1), 0);
        stitcher.append(solid(4, 10, 2), 3);
        assert_eq!(stitcher.render(), stitcher.render());
    }
}
