//! Check system capabilities.

use simcast_common::config::AppConfig;
use simcast_export_engine::{FfmpegMuxer, Muxer};

pub fn run() -> anyhow::Result<()> {
    println!("Simcast System Check");
    println!("{}", "=".repeat(50));

    let muxer = FfmpegMuxer::new();
    let muxer_ok = muxer.is_available();
    if muxer_ok {
        println!("[OK] External encoder: {} found in PATH", muxer.name());
    } else {
        println!("[FAIL] External encoder: {} not found in PATH", muxer.name());
    }

    let config = AppConfig::load();
    println!("[OK] Exports directory: {}", config.exports_dir.display());
    println!(
        "[OK] Export defaults: {}x{} @ {}fps ({} / {})",
        config.export.width,
        config.export.height,
        config.export.fps,
        config.export.video_codec,
        config.export.audio_codec
    );

    println!();
    if muxer_ok {
        println!("All required capabilities are available. Simcast is ready.");
    } else {
        println!("Install ffmpeg to enable export. See above for details.");
    }

    Ok(())
}
