//! Export orchestration: the state machine spanning render and encode.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use simcast_common::clock::VirtualClock;
use simcast_common::error::{SimcastError, SimcastResult};
use simcast_scene::{PcmDecoder, Scene};

use crate::audio::decode_all;
use crate::encoder::Muxer;
use crate::fault::FaultLatch;
use crate::pipes::{AudioPipeSource, VideoPipeSource};
use crate::producer::{FrameList, FrameProducer, HostTicker};
use crate::queue::FrameQueue;
use crate::worker::EncoderWorker;

/// Everything an export needs, fixed once the export starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    /// Output file path; the container is implied by its extension.
    pub output_path: PathBuf,

    /// Compressed audio asset to decode and mux.
    pub audio_path: PathBuf,

    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Fixed output frame rate.
    pub framerate: u32,

    /// Playback speed multiplier. Scales the virtual-time step and the
    /// declared audio rate; no samples are resampled.
    pub speed: f64,

    /// Video codec identifier handed to the muxer.
    pub video_codec: String,

    /// Audio codec identifier handed to the muxer.
    pub audio_codec: String,
}

impl ExportJob {
    pub fn validate(&self) -> SimcastResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SimcastError::config(format!(
                "invalid output size {}x{}",
                self.width, self.height
            )));
        }
        if self.framerate == 0 {
            return Err(SimcastError::config("framerate must be non-zero"));
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(SimcastError::config("speed must be positive"));
        }
        Ok(())
    }
}

/// Phase of the export state machine.
///
/// Idle is both initial and terminal. Rendering covers production and the
/// drain-wait; Compiling covers the external encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExportState {
    Idle = 0,
    Rendering = 1,
    Compiling = 2,
}

/// Lock-free state cell shared with [`ExportHandle`].
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ExportState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn store(&self, state: ExportState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn load(&self) -> ExportState {
        match self.0.load(Ordering::SeqCst) {
            1 => ExportState::Rendering,
            2 => ExportState::Compiling,
            _ => ExportState::Idle,
        }
    }
}

/// Process-wide guard: at most one export runs at a time.
static EXPORT_SLOT: AtomicBool = AtomicBool::new(false);

/// Exclusive claim on the export slot, released on drop.
#[derive(Debug)]
struct SlotClaim;

impl SlotClaim {
    fn acquire() -> SimcastResult<Self> {
        if EXPORT_SLOT
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SimcastError::Busy);
        }
        Ok(Self)
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        EXPORT_SLOT.store(false, Ordering::SeqCst);
    }
}

/// Summary of a finished export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub output_path: PathBuf,
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub audio_blocks: usize,
    pub elapsed_secs: f64,
}

/// Cloneable control handle for an in-flight export.
#[derive(Clone)]
pub struct ExportHandle {
    running: Arc<AtomicBool>,
    state: Arc<StateCell>,
    worker: Arc<Mutex<Option<EncoderWorker>>>,
}

impl ExportHandle {
    pub fn state(&self) -> ExportState {
        self.state.load()
    }

    /// Cooperative stop: flips the running flag, forces the state back to
    /// Idle, and joins the worker thread. Idempotent, callable from any
    /// thread at any time.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.state.store(ExportState::Idle);
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(mut worker) = slot.take() {
                worker.join();
            }
        }
    }
}

/// One export from begin to finish.
///
/// [`ExportSession::begin`] claims the process-wide slot; a concurrent
/// second call gets a typed [`SimcastError::Busy`]. [`ExportSession::run`]
/// sequences decode → render-loop → drain-wait → pipe construction →
/// external encode → cleanup.
#[derive(Debug)]
pub struct ExportSession {
    job: ExportJob,
    running: Arc<AtomicBool>,
    state: Arc<StateCell>,
    fault: Arc<FaultLatch>,
    queue: FrameQueue,
    frames: FrameList,
    worker: Arc<Mutex<Option<EncoderWorker>>>,
    slot: Option<SlotClaim>,
}

impl ExportSession {
    /// Validate the job and claim the export slot.
    pub fn begin(job: ExportJob) -> SimcastResult<Self> {
        job.validate()?;
        let slot = SlotClaim::acquire()?;

        tracing::info!(
            output = %job.output_path.display(),
            width = job.width,
            height = job.height,
            framerate = job.framerate,
            speed = job.speed,
            "export session claimed"
        );

        Ok(Self {
            job,
            running: Arc::new(AtomicBool::new(true)),
            state: Arc::new(StateCell::new(ExportState::Idle)),
            fault: Arc::new(FaultLatch::new()),
            queue: FrameQueue::new(),
            frames: Arc::new(Mutex::new(Vec::new())),
            worker: Arc::new(Mutex::new(None)),
            slot: Some(slot),
        })
    }

    pub fn job(&self) -> &ExportJob {
        &self.job
    }

    pub fn state(&self) -> ExportState {
        self.state.load()
    }

    /// Control handle usable from other threads while `run` is in flight.
    pub fn handle(&self) -> ExportHandle {
        ExportHandle {
            running: self.running.clone(),
            state: self.state.clone(),
            worker: self.worker.clone(),
        }
    }

    /// Drive the export to completion.
    pub async fn run(
        &mut self,
        scene: Box<dyn Scene>,
        decoder: &mut dyn PcmDecoder,
        muxer: Box<dyn Muxer>,
        ticker: &mut dyn HostTicker,
    ) -> SimcastResult<ExportReport> {
        let started = Instant::now();
        tracing::info!(
            started_wall = %chrono::Utc::now().to_rfc3339(),
            "export starting"
        );

        let worker = EncoderWorker::spawn(self.queue.clone(), self.fault.clone());
        if let Ok(mut slot) = self.worker.lock() {
            *slot = Some(worker);
        }

        self.state.store(ExportState::Rendering);
        tracing::info!("export state: rendering");

        // Decode the whole track ahead of encoding.
        let duration_secs = scene.duration_secs();
        let audio = match decode_all(decoder) {
            Ok(audio) => audio,
            Err(err) => {
                tracing::error!(error = %err, "audio decode failed");
                self.slot.take();
                return Err(err);
            }
        };

        let clock = VirtualClock::new(self.job.framerate, self.job.speed, duration_secs);
        tracing::info!(
            total_frames = clock.total_frames(),
            duration_secs,
            "production starting"
        );

        let producer = FrameProducer::new(
            scene,
            clock,
            self.job.width,
            self.job.height,
            self.queue.clone(),
            self.fault.clone(),
            self.frames.clone(),
            self.running.clone(),
        );
        let production = producer.run(ticker).await;

        if let Some(err) = self.fault.to_error() {
            // The state cell is deliberately left where the fault found
            // it; only stop() forces Idle.
            tracing::error!(error = %err, "export aborted by pipeline fault");
            self.slot.take();
            return Err(err);
        }
        if !self.running.load(Ordering::SeqCst) {
            tracing::info!("export stopped before completion");
            self.slot.take();
            return Err(SimcastError::pipeline("export stopped before completion"));
        }

        // Rendering has ended and the queue is drained: the frame list is
        // complete and safe to read from this side now.
        let frames = match self.frames.lock() {
            Ok(mut list) => std::mem::take(&mut *list),
            Err(_) => {
                self.slot.take();
                return Err(SimcastError::pipeline("frame list poisoned"));
            }
        };
        let video = VideoPipeSource::new(frames, self.job.width, self.job.height, self.job.framerate);
        let audio_blocks = audio.blocks.len();
        let stream_rate = audio.stream_rate(self.job.speed);
        let audio_pipe = AudioPipeSource::new(audio.blocks, audio.channels, stream_rate);

        self.state.store(ExportState::Compiling);
        tracing::info!(
            frames = production.frames_enqueued,
            dropped = production.frames_dropped,
            audio_blocks,
            "export state: compiling"
        );

        let job = self.job.clone();
        let mut muxer = muxer;
        let mux_result = tokio::task::spawn_blocking(move || muxer.mux(video, audio_pipe, &job))
            .await
            .map_err(|e| SimcastError::encode(format!("muxer task failed: {e}")))?;

        // Encode finished (either way): back to Idle, worker joined, slot
        // released.
        self.state.store(ExportState::Idle);
        self.stop_worker();
        self.slot.take();

        mux_result?;

        let elapsed_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            elapsed_secs,
            output = %self.job.output_path.display(),
            "export finished"
        );

        Ok(ExportReport {
            output_path: self.job.output_path.clone(),
            frames_encoded: production.frames_enqueued,
            frames_dropped: production.frames_dropped,
            audio_blocks,
            elapsed_secs,
        })
    }

    /// Cooperative stop; see [`ExportHandle::stop`].
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.state.store(ExportState::Idle);
        self.stop_worker();
    }

    fn stop_worker(&self) {
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(mut worker) = slot.take() {
                worker.join();
            }
        }
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        // The worker must not outlive the session even when run() bailed
        // out on a fault; dropping the session is an explicit stop.
        self.stop();
    }
}
