//! Frame production: virtual-time stepping, compositing, readback polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use simcast_common::clock::VirtualClock;
use simcast_common::error::{SimcastError, SimcastResult};
use simcast_scene::{LayerKind, ReadbackPoll, RenderTarget, Scene};

use crate::fault::FaultLatch;
use crate::queue::{EncodeJob, FrameQueue};

/// Virtual seconds of playback between progress log lines.
const PROGRESS_LOG_STEP_SECS: f64 = 2.0;

/// "Yield one unit of host time."
///
/// The producer suspends only here — never inside a tight loop — so a
/// running export preserves the host's frame pacing regardless of how the
/// host schedules its ticks.
#[async_trait::async_trait]
pub trait HostTicker: Send {
    async fn tick(&mut self);
}

/// Wall-clock ticker pacing one tick per output frame interval.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn from_fps(fps: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait::async_trait]
impl HostTicker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Headless ticker that yields to the runtime without sleeping; exports
/// run as fast as the pipeline allows.
pub struct TurboTicker;

#[async_trait::async_trait]
impl HostTicker for TurboTicker {
    async fn tick(&mut self) {
        tokio::task::yield_now().await;
    }
}

/// One captured RGBA8 frame. Produced once, consumed once, then released.
#[derive(Debug)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl VideoFrame {
    /// Take ownership of a readback buffer, validating its size. The
    /// buffer must be a full `width × height × 4` RGBA8 image.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> SimcastResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(SimcastError::render(format!(
                "frame buffer is {} bytes, expected {expected}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Release the pixel buffer to the consumer.
    pub fn take_pixels(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pixels)
    }
}

/// Ordered frame accumulation shared between the worker (sole writer
/// during Rendering) and the orchestrator (reader after Rendering ends).
pub type FrameList = Arc<Mutex<Vec<VideoFrame>>>;

/// What production accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProducerReport {
    /// Encode jobs handed to the queue.
    pub frames_enqueued: u64,

    /// Frames lost to readback failures.
    pub frames_dropped: u64,

    /// False when a stop request or a latched fault ended the loop early.
    pub completed: bool,
}

/// Drives the scene one virtual frame per host tick and feeds the queue.
pub struct FrameProducer {
    scene: Box<dyn Scene>,
    clock: VirtualClock,
    width: u32,
    height: u32,
    queue: FrameQueue,
    fault: Arc<FaultLatch>,
    frames: FrameList,
    running: Arc<AtomicBool>,
}

impl FrameProducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scene: Box<dyn Scene>,
        clock: VirtualClock,
        width: u32,
        height: u32,
        queue: FrameQueue,
        fault: Arc<FaultLatch>,
        frames: FrameList,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            scene,
            clock,
            width,
            height,
            queue,
            fault,
            frames,
            running,
        }
    }

    /// Run production to completion: render every frame of the virtual
    /// timeline, then keep yielding until the worker has drained the
    /// queue — the Rendering→Compiling handoff condition.
    pub async fn run(mut self, ticker: &mut dyn HostTicker) -> ProducerReport {
        let started = Instant::now();
        let mut report = ProducerReport::default();
        let mut next_log_at = PROGRESS_LOG_STEP_SECS;

        while let Some(t) = self.clock.next_frame() {
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!("stop requested; ending production");
                return report;
            }
            if self.fault.is_latched() {
                return report;
            }

            self.scene.tick();
            // The audio transport follows virtual time; playback itself
            // stays paused.
            self.scene.seek(t);

            let mut target = RenderTarget::new(self.width, self.height);
            self.composite(&mut target);

            match self.await_readback(ticker, target).await {
                Some(pixels) => {
                    if !self.enqueue_frame(pixels, &mut report) {
                        return report;
                    }
                }
                None => {
                    // A stop mid-readback is not a dropped frame.
                    if self.running.load(Ordering::SeqCst) {
                        report.frames_dropped += 1;
                    }
                }
            }

            if t >= next_log_at {
                next_log_at = t + PROGRESS_LOG_STEP_SECS;
                tracing::info!(
                    percent = (self.clock.progress() * 100.0).round(),
                    virtual_secs = t,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "export rendering"
                );
            }

            ticker.tick().await;
        }

        // Drain-wait: production is only complete once the queue is empty
        // and no fault is latched.
        while !self.queue.is_empty()
            && !self.fault.is_latched()
            && self.running.load(Ordering::SeqCst)
        {
            ticker.tick().await;
        }

        report.completed = self.queue.is_empty()
            && !self.fault.is_latched()
            && self.running.load(Ordering::SeqCst);

        tracing::info!(
            frames = report.frames_enqueued,
            dropped = report.frames_dropped,
            completed = report.completed,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "production finished"
        );
        report
    }

    /// Copy the readback buffer into an owned frame and enqueue its
    /// encode job. Returns false on a fatal fault.
    fn enqueue_frame(&mut self, pixels: Vec<u8>, report: &mut ProducerReport) -> bool {
        // The readback buffer dies with the transient target; the frame
        // owns its own copy from here on.
        let frame = match VideoFrame::from_rgba(self.width, self.height, pixels) {
            Ok(frame) => frame,
            Err(err) => {
                // A malformed copy would corrupt the byte stream for every
                // later frame, so it is fatal rather than skippable.
                tracing::error!(error = %err, "frame copy failed");
                self.fault.latch(err);
                return false;
            }
        };

        let dest = self.frames.clone();
        let job: EncodeJob = Box::new(move || {
            dest.lock()
                .map_err(|_| SimcastError::pipeline("frame list poisoned"))?
                .push(frame);
            Ok(())
        });

        if let Err(err) = self.queue.push(job) {
            tracing::error!(error = %err, "enqueue failed");
            self.fault.latch(err);
            return false;
        }
        report.frames_enqueued += 1;
        true
    }

    /// Render all enabled layers: scene cameras first, then post and
    /// overlay passes. Post/overlay layers are bounced (disabled and
    /// immediately re-enabled) every frame so hosts that cache a render
    /// order re-sort them behind every scene camera — a compositing
    /// correctness requirement, not an optimization.
    fn composite(&mut self, target: &mut RenderTarget) {
        for layer in self.scene.layers().iter_mut() {
            if layer.kind() != LayerKind::Scene && layer.enabled() {
                layer.set_enabled(false);
                layer.set_enabled(true);
            }
        }
        for pass in [LayerKind::Scene, LayerKind::PostProcess, LayerKind::UiOverlay] {
            for layer in self.scene.layers().iter_mut() {
                if layer.kind() == pass && layer.enabled() {
                    layer.render(target);
                }
            }
        }
    }

    /// Poll the readback once per host tick until it resolves. A failed
    /// readback costs one frame, never the export.
    async fn await_readback(
        &mut self,
        ticker: &mut dyn HostTicker,
        target: RenderTarget,
    ) -> Option<Vec<u8>> {
        let mut readback = self.scene.begin_readback(target);
        loop {
            match readback.poll() {
                ReadbackPoll::Ready(pixels) => return Some(pixels),
                ReadbackPoll::Failed(reason) => {
                    tracing::warn!(reason = %reason, "pixel readback failed; dropping frame");
                    return None;
                }
                ReadbackPoll::Pending => {
                    if !self.running.load(Ordering::SeqCst) {
                        return None;
                    }
                    ticker.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::EncoderWorker;
    use simcast_scene::synthetic::{SyntheticConfig, SyntheticScene};

    fn run_producer(config: SyntheticConfig, fps: u32, speed: f64) -> (ProducerReport, FrameList) {
        let scene = SyntheticScene::new(config.clone());
        let clock = VirtualClock::new(fps, speed, config.duration_secs);
        let queue = FrameQueue::new();
        let fault = Arc::new(FaultLatch::new());
        let frames: FrameList = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let mut worker = EncoderWorker::spawn(queue.clone(), fault.clone());
        let producer = FrameProducer::new(
            Box::new(scene),
            clock,
            8,
            8,
            queue,
            fault,
            frames.clone(),
            running,
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let report = runtime.block_on(async {
            let mut ticker = TurboTicker;
            producer.run(&mut ticker).await
        });
        worker.join();
        (report, frames)
    }

    #[test]
    fn produces_one_job_per_virtual_frame() {
        let config = SyntheticConfig {
            duration_secs: 0.5,
            ..SyntheticConfig::default()
        };
        let (report, frames) = run_producer(config, 60, 1.0);
        assert_eq!(report.frames_enqueued, 30);
        assert_eq!(report.frames_dropped, 0);
        assert!(report.completed);
        assert_eq!(frames.lock().unwrap().len(), 30);
    }

    #[test]
    fn readback_failures_drop_frames_without_aborting() {
        let config = SyntheticConfig {
            duration_secs: 0.5,
            fail_every: 5,
            ..SyntheticConfig::default()
        };
        let (report, frames) = run_producer(config, 60, 1.0);
        assert_eq!(report.frames_dropped, 6);
        assert_eq!(report.frames_enqueued, 24);
        assert!(report.completed);
        assert_eq!(frames.lock().unwrap().len(), 24);
    }

    #[test]
    fn truncated_readback_is_fatal() {
        let config = SyntheticConfig {
            duration_secs: 0.5,
            truncate_frame: Some(3),
            ..SyntheticConfig::default()
        };
        let (report, frames) = run_producer(config, 60, 1.0);
        assert!(!report.completed);
        assert_eq!(report.frames_enqueued, 3);
        assert!(frames.lock().unwrap().len() <= 3);
    }

    #[test]
    fn overlay_renders_after_every_scene_camera() {
        let scene = SyntheticScene::with_duration(0.1);
        let log = scene.render_log();
        let (report, _) = {
            let clock = VirtualClock::new(30, 1.0, 0.1);
            let queue = FrameQueue::new();
            let fault = Arc::new(FaultLatch::new());
            let frames: FrameList = Arc::new(Mutex::new(Vec::new()));
            let running = Arc::new(AtomicBool::new(true));
            let mut worker = EncoderWorker::spawn(queue.clone(), fault.clone());
            let producer = FrameProducer::new(
                Box::new(scene),
                clock,
                4,
                4,
                queue,
                fault,
                frames.clone(),
                running,
            );
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let report = runtime.block_on(async {
                let mut ticker = TurboTicker;
                producer.run(&mut ticker).await
            });
            worker.join();
            (report, frames)
        };

        assert_eq!(report.frames_enqueued, 3);
        let log = log.lock().unwrap();
        // Each frame composites the scene camera strictly before the UI
        // overlay.
        assert_eq!(log.len(), 6);
        for pair in log.chunks(2) {
            assert_eq!(pair, [LayerKind::Scene, LayerKind::UiOverlay]);
        }
    }
}
