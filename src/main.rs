mod capture;
mod config;
mod error;
mod fingerprint;
mod frame;
mod input;
mod overlap;
mod phase;
mod scroll;
mod session;
mod sticky;
mod stitch;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::{DesktopSource, DesktopTarget, TargetHandle};
use crate::config::{InputStyle, ModePreference, ScrollConfig};
use crate::frame::Viewport;
use crate::input::RdevInput;
use crate::scroll::NoStructuredScroll;
use crate::session::{CancelToken, Collaborators};

fn cli() -> Command {
    Command::new("scrollshot")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scrolls a window and stitches the frames into one tall screenshot")
        .arg(
            Arg::new("window")
                .long("window")
                .short('w')
                .value_name("ID|TITLE")
                .help("Window id, or a case-insensitive title/app substring")
                .required_unless_present("list-windows"),
        )
        .arg(
            Arg::new("region")
                .long("region")
                .value_name("X,Y,W,H")
                .help("Screen rectangle to capture (default: the window bounds)")
                .value_parser(|s: &str| s.parse::<Viewport>()),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("PATH")
                .default_value("screenshots/scroll_capture.png")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("JSON file with capture settings")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("steps")
                .long("steps")
                .value_name("N")
                .help("Maximum scroll steps after the first frame")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_name("MODE")
                .value_parser(["structured-first", "simulated-only"]),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .value_name("INPUT")
                .help("Synthetic input used when scrolling is simulated")
                .value_parser(["page-down", "wheel"]),
        )
        .arg(
            Arg::new("tail-rows")
                .long("tail-rows")
                .value_name("ROWS")
                .help("Rows of the last tile compared against each new frame")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("no-sticky")
                .long("no-sticky")
                .help("Do not detect and crop stationary headers")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-enhanced")
                .long("no-enhanced")
                .help("Only use the exhaustive overlap search")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-windows")
                .long("list-windows")
                .help("Print capturable windows and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue),
        )
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "scrollshot=debug" } else { "scrollshot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Config file first, then individual flags on top.
fn build_config(matches: &ArgMatches) -> Result<ScrollConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ScrollConfig::load(path)?,
        None => ScrollConfig::default(),
    };
    if let Some(&steps) = matches.get_one::<u32>("steps") {
        config.max_steps = steps;
    }
    if let Some(mode) = matches.get_one::<String>("mode") {
        config.mode = match mode.as_str() {
            "simulated-only" => ModePreference::SimulatedOnly,
            _ => ModePreference::StructuredFirst,
        };
    }
    if let Some(input) = matches.get_one::<String>("input") {
        config.input = match input.as_str() {
            "wheel" => InputStyle::Wheel,
            _ => InputStyle::PageDown,
        };
    }
    if let Some(&rows) = matches.get_one::<u32>("tail-rows") {
        config.tail_rows = rows;
    }
    if matches.get_flag("no-sticky") {
        config.detect_sticky = false;
    }
    if matches.get_flag("no-enhanced") {
        config.enhanced_overlap = false;
    }
    config.validate()?;
    Ok(config)
}

fn save_debug_tiles(tiles: &[stitch::Tile]) -> Result<()> {
    fs::create_dir_all("screenshots").context("Failed to create screenshots/ debug directory")?;
    for tile in tiles {
        // named by capture index, so skipped stagnant frames leave gaps
        let path = format!("screenshots/debug_tile_{:03}.png", tile.frame.index());
        tile.frame
            .to_rgba_image()
            .save(&path)
            .with_context(|| format!("Failed to save debug tile {}", path))?;
    }
    Ok(())
}

fn save_png(frame: &frame::Frame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }
    frame
        .to_rgba_image()
        .save(path)
        .with_context(|| format!("Failed to save composite to {}", path.display()))
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    if matches.get_flag("list-windows") {
        for window in capture::list_windows()? {
            println!(
                "{:>10}  {:<24} {:<20} {}{}",
                window.id,
                window.bounds.to_string(),
                window.app_name,
                window.title,
                if window.minimized { " (minimized)" } else { "" }
            );
        }
        return Ok(());
    }

    let config = build_config(&matches)?;
    let spec = matches
        .get_one::<String>("window")
        .context("--window is required")?;
    let window = capture::resolve_window(spec)?;
    let viewport = matches.get_one::<Viewport>("region").copied().unwrap_or(window.bounds);
    let target = TargetHandle(window.id);
    info!(%target, title = %window.title, %viewport, "target resolved");

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel()).context("Failed to install Ctrl+C handler")?;

    let parts = Collaborators {
        source: DesktopSource::new(target),
        activation: DesktopTarget::new(config.click_to_focus),
        query: NoStructuredScroll,
        input: RdevInput,
    };
    let outcome = session::capture_scrolling(target, viewport, &config, parts, &cancel)
        .context("Scrolling capture failed")?;

    if let Some(warning) = &outcome.warning {
        warn!(%warning, "capture ended early; saving partial result");
    }
    if env::var_os("DEBUG_CAPTURE").is_some() {
        save_debug_tiles(&outcome.tiles)?;
    }

    let output = matches
        .get_one::<PathBuf>("output")
        .context("--output has a default")?;
    save_png(&outcome.composite, output)?;
    println!(
        "Saved {}x{} capture ({} tiles, {}) to {}",
        outcome.composite.width(),
        outcome.composite.height(),
        outcome.tiles.len(),
        outcome.stop,
        output.display()
    );
    Ok(())
}
