//! Export the built-in demo scene to video.

use std::path::PathBuf;

use simcast_common::config::AppConfig;
use simcast_export_engine::audio::SymphoniaDecoder;
use simcast_export_engine::{
    ExportJob, ExportSession, FfmpegMuxer, HostTicker, IntervalTicker, Muxer, TurboTicker,
};
use simcast_scene::synthetic::{SyntheticPcm, SyntheticScene};
use simcast_scene::PcmDecoder;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    output: Option<PathBuf>,
    audio: Option<PathBuf>,
    duration: f64,
    width: u32,
    height: u32,
    fps: u32,
    speed: f64,
    video_codec: String,
    audio_codec: String,
    realtime: bool,
) -> anyhow::Result<()> {
    let config = AppConfig::load();
    let output_path = output.unwrap_or_else(|| config.exports_dir.join("demo.mp4"));

    let muxer = FfmpegMuxer::new();
    if !muxer.is_available() {
        return Err(anyhow::anyhow!(
            "No supported muxer found (expected ffmpeg in PATH)"
        ));
    }

    println!("Exporting demo scene");
    println!("  Output: {}", output_path.display());
    println!("  Resolution: {width}x{height} @ {fps}fps, speed {speed}");
    match &audio {
        Some(path) => println!("  Audio: {}", path.display()),
        None => println!("  Audio: synthetic 440Hz tone"),
    }

    let job = ExportJob {
        output_path,
        audio_path: audio.clone().unwrap_or_default(),
        width,
        height,
        framerate: fps,
        speed,
        video_codec,
        audio_codec,
    };

    let mut session =
        ExportSession::begin(job).map_err(|e| anyhow::anyhow!("Failed to begin export: {e}"))?;

    let scene = SyntheticScene::with_duration(duration);
    let mut decoder: Box<dyn PcmDecoder> = match &audio {
        Some(path) => Box::new(SymphoniaDecoder::open(path)?),
        None => Box::new(SyntheticPcm::tone(44_100, 2, duration, 440.0)),
    };
    let mut ticker: Box<dyn HostTicker> = if realtime {
        Box::new(IntervalTicker::from_fps(fps))
    } else {
        Box::new(TurboTicker)
    };

    match session
        .run(
            Box::new(scene),
            decoder.as_mut(),
            Box::new(muxer),
            ticker.as_mut(),
        )
        .await
    {
        Ok(report) => {
            println!("Export complete: {}", report.output_path.display());
            println!(
                "  Frames: {} encoded, {} dropped",
                report.frames_encoded, report.frames_dropped
            );
            println!("  Audio blocks: {}", report.audio_blocks);
            println!("  Elapsed: {:.2}s", report.elapsed_secs);
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("Export failed: {e}")),
    }
}
