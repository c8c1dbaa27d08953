//! Desktop video downloader: fetches the formats of a video url, lets the
//! user pick one and a folder, then downloads it with yt-dlp and ffmpeg.

// egui screens
mod app;
// Format picker labels
mod catalog;
// User settings
mod config;
// Download state machine driven by the UI
mod controller;
// yt-dlp backend and the discover/fetch workers
mod downloader;
mod error;
// Safe output file names
mod filename;
// Data models for formats, requests and worker events
mod model;
// Progress line parsing
mod progress;
// Thumbnail fetching
mod thumbnail;
// yt-dlp / ffmpeg lookup
mod tools;

use anyhow::{anyhow, Context};
use eframe::egui;
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;
use tracing::{info, Level};

use app::DownloaderApp;
use config::AppConfig;

// Global Tokio runtime, created once before the window opens
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Program entry point: loads settings, starts logging and the runtime, then launches the GUI
fn main() -> anyhow::Result<()> {
    // Settings decide the log level, so load them under a temporary subscriber
    let config = tracing::subscriber::with_default(tracing_subscriber::fmt().finish(), AppConfig::load);

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let runtime = RUNTIME
        .get_or_try_init(Runtime::new)
        .context("Failed to start the async runtime")?;
    let handle = runtime.handle().clone();

    info!("Starting video downloader");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Video Downloader")
            .with_inner_size([600.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Video Downloader",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
            Box::new(DownloaderApp::new(cc, config, handle))
        }),
    )
    .map_err(|e| anyhow!("Window closed with an error: {}", e))
}
