//! Deterministic scene and audio fixtures.
//!
//! Stand-ins for a real host simulation: a procedural gradient camera, a
//! UI overlay bar, polled readbacks with configurable latency and failure
//! injection, and a sine-tone PCM decoder. Used by the CLI demo and the
//! export pipeline tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use simcast_common::error::SimcastResult;

use crate::{CameraLayer, LayerKind, PcmDecoder, Readback, ReadbackPoll, RenderTarget, Scene};

/// Knobs for the synthetic scene.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Source duration in seconds.
    pub duration_secs: f64,

    /// Host ticks a readback stays pending before it resolves.
    pub readback_latency_ticks: u32,

    /// Fail every Nth readback (0 = never fail).
    pub fail_every: u64,

    /// Yield a truncated pixel buffer for this zero-based frame index.
    pub truncate_frame: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration_secs: 2.0,
            readback_latency_ticks: 1,
            fail_every: 0,
            truncate_frame: None,
        }
    }
}

/// Shared playback position the layers render from.
#[derive(Debug, Default)]
struct Transport {
    time_bits: AtomicU64,
}

impl Transport {
    fn set_secs(&self, secs: f64) {
        self.time_bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    fn secs(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::Relaxed))
    }
}

/// Order in which layers rendered, for compositing assertions.
pub type RenderLog = Arc<Mutex<Vec<LayerKind>>>;

/// Scene camera painting a time-dependent gradient.
struct GradientCamera {
    transport: Arc<Transport>,
    log: RenderLog,
    enabled: bool,
}

impl CameraLayer for GradientCamera {
    fn kind(&self) -> LayerKind {
        LayerKind::Scene
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn render(&mut self, target: &mut RenderTarget) {
        if let Ok(mut log) = self.log.lock() {
            log.push(LayerKind::Scene);
        }
        let (w, h) = (target.width() as usize, target.height() as usize);
        let phase = (self.transport.secs().fract() * 255.0) as u8;
        let pixels = target.pixels_mut();
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 4;
                pixels[i] = (x * 255 / w.max(1)) as u8;
                pixels[i + 1] = (y * 255 / h.max(1)) as u8;
                pixels[i + 2] = phase;
                pixels[i + 3] = 255;
            }
        }
    }
}

/// UI overlay painting a playback progress bar along the top rows.
struct OverlayBar {
    transport: Arc<Transport>,
    duration_secs: f64,
    log: RenderLog,
    enabled: bool,
}

impl CameraLayer for OverlayBar {
    fn kind(&self) -> LayerKind {
        LayerKind::UiOverlay
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn render(&mut self, target: &mut RenderTarget) {
        if let Ok(mut log) = self.log.lock() {
            log.push(LayerKind::UiOverlay);
        }
        let (w, h) = (target.width() as usize, target.height() as usize);
        let fraction = if self.duration_secs > 0.0 {
            (self.transport.secs() / self.duration_secs).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let filled = (fraction * w as f64) as usize;
        let pixels = target.pixels_mut();
        for y in 0..h.min(4) {
            for x in 0..filled {
                let i = (y * w + x) * 4;
                pixels[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
    }
}

/// A deterministic, framework-free [`Scene`] implementation.
pub struct SyntheticScene {
    config: SyntheticConfig,
    transport: Arc<Transport>,
    layers: Vec<Box<dyn CameraLayer>>,
    log: RenderLog,
    ticks: u64,
    readbacks_started: u64,
}

impl SyntheticScene {
    pub fn new(config: SyntheticConfig) -> Self {
        let transport = Arc::new(Transport::default());
        let log: RenderLog = Arc::new(Mutex::new(Vec::new()));
        let layers: Vec<Box<dyn CameraLayer>> = vec![
            Box::new(GradientCamera {
                transport: transport.clone(),
                log: log.clone(),
                enabled: true,
            }),
            Box::new(OverlayBar {
                transport: transport.clone(),
                duration_secs: config.duration_secs,
                log: log.clone(),
                enabled: true,
            }),
        ];
        Self {
            config,
            transport,
            layers,
            log,
            ticks: 0,
            readbacks_started: 0,
        }
    }

    pub fn with_duration(duration_secs: f64) -> Self {
        Self::new(SyntheticConfig {
            duration_secs,
            ..SyntheticConfig::default()
        })
    }

    /// Ticks the host scheduler has granted so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Shared handle to the layer render order.
    pub fn render_log(&self) -> RenderLog {
        self.log.clone()
    }
}

impl Scene for SyntheticScene {
    fn tick(&mut self) {
        self.ticks += 1;
    }

    fn seek(&mut self, virtual_secs: f64) {
        self.transport.set_secs(virtual_secs);
    }

    fn duration_secs(&self) -> f64 {
        self.config.duration_secs
    }

    fn layers(&mut self) -> &mut [Box<dyn CameraLayer>] {
        &mut self.layers
    }

    fn begin_readback(&mut self, target: RenderTarget) -> Box<dyn Readback> {
        let index = self.readbacks_started;
        self.readbacks_started += 1;

        let fail = self.config.fail_every != 0 && (index + 1) % self.config.fail_every == 0;
        let outcome = if fail {
            Err(format!("synthetic readback {index} failed"))
        } else {
            let mut pixels = target.into_pixels();
            if self.config.truncate_frame == Some(index) {
                let half = pixels.len() / 2;
                pixels.truncate(half);
            }
            Ok(pixels)
        };

        Box::new(SyntheticReadback {
            remaining_polls: self.config.readback_latency_ticks,
            outcome: Some(outcome),
        })
    }
}

/// Readback that resolves after a fixed number of polls.
pub struct SyntheticReadback {
    remaining_polls: u32,
    outcome: Option<Result<Vec<u8>, String>>,
}

impl Readback for SyntheticReadback {
    fn poll(&mut self) -> ReadbackPoll {
        if self.remaining_polls > 0 {
            self.remaining_polls -= 1;
            return ReadbackPoll::Pending;
        }
        match self.outcome.take() {
            Some(Ok(pixels)) => ReadbackPoll::Ready(pixels),
            Some(Err(msg)) => ReadbackPoll::Failed(msg),
            None => ReadbackPoll::Failed("readback already consumed".to_string()),
        }
    }
}

/// Pull-based tone decoder: one fixed-size block per pull.
pub struct SyntheticPcm {
    channels: u16,
    sample_rate: u32,
    blocks: Vec<Vec<i16>>,
    next: usize,
}

impl SyntheticPcm {
    /// An interleaved sine tone of the given pitch and length, split into
    /// 1024-frame blocks the way a real decoder yields them.
    pub fn tone(sample_rate: u32, channels: u16, duration_secs: f64, freq_hz: f64) -> Self {
        let total_frames = (duration_secs * sample_rate as f64) as usize;
        let block_frames = 1024usize;
        let mut blocks = Vec::new();
        let mut frame = 0usize;
        while frame < total_frames {
            let frames = block_frames.min(total_frames - frame);
            let mut block = Vec::with_capacity(frames * channels as usize);
            for i in 0..frames {
                let t = (frame + i) as f64 / sample_rate as f64;
                let sample =
                    ((t * freq_hz * std::f64::consts::TAU).sin() * i16::MAX as f64 * 0.4) as i16;
                for _ in 0..channels {
                    block.push(sample);
                }
            }
            blocks.push(block);
            frame += frames;
        }
        Self {
            channels,
            sample_rate,
            blocks,
            next: 0,
        }
    }

    /// Exact preset blocks, for tests that care about block boundaries.
    pub fn from_blocks(sample_rate: u32, channels: u16, blocks: Vec<Vec<i16>>) -> Self {
        Self {
            channels,
            sample_rate,
            blocks,
            next: 0,
        }
    }
}

impl PcmDecoder for SyntheticPcm {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn decode_next(&mut self) -> SimcastResult<&[i16]> {
        if self.next >= self.blocks.len() {
            return Ok(&[]);
        }
        let block = &self.blocks[self.next];
        self.next += 1;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readback_resolves_after_configured_latency() {
        let mut scene = SyntheticScene::new(SyntheticConfig {
            readback_latency_ticks: 2,
            ..SyntheticConfig::default()
        });
        let target = RenderTarget::new(4, 4);
        let mut readback = scene.begin_readback(target);

        assert!(matches!(readback.poll(), ReadbackPoll::Pending));
        assert!(matches!(readback.poll(), ReadbackPoll::Pending));
        match readback.poll() {
            ReadbackPoll::Ready(pixels) => assert_eq!(pixels.len(), 4 * 4 * 4),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn fail_every_injects_readback_failures() {
        let mut scene = SyntheticScene::new(SyntheticConfig {
            readback_latency_ticks: 0,
            fail_every: 2,
            ..SyntheticConfig::default()
        });
        let mut outcomes = Vec::new();
        for _ in 0..4 {
            let mut readback = scene.begin_readback(RenderTarget::new(2, 2));
            outcomes.push(matches!(readback.poll(), ReadbackPoll::Ready(_)));
        }
        assert_eq!(outcomes, vec![true, false, true, false]);
    }

    #[test]
    fn tone_blocks_cover_the_requested_length() {
        let mut pcm = SyntheticPcm::tone(8000, 2, 0.5, 440.0);
        let mut total = 0usize;
        loop {
            let block = pcm.decode_next().unwrap();
            if block.is_empty() {
                break;
            }
            assert_eq!(block.len() % 2, 0);
            total += block.len();
        }
        assert_eq!(total, 4000 * 2);
    }
}
