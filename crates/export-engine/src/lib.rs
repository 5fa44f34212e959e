//! Simcast Export Engine
//!
//! Turns a running simulation into a finished video file:
//!
//! ```text
//! scene ──tick/seek──▶ Frame Producer ──encode jobs──▶ Frame Queue
//!                                                          │
//! audio asset ──▶ PCM decode                 (worker thread drains)
//!        │                                                 ▼
//!        │                                            frame list
//!        ▼                                                 ▼
//!  AudioPipeSource                                 VideoPipeSource
//!        └──────────────────────┬──────────────────────────┘
//!                               ▼
//!                external ffmpeg muxer ──▶ output file
//! ```
//!
//! Production is paced by virtual time (fixed `speed / framerate` steps)
//! and yields to the host scheduler at every readback poll, so a running
//! export never stalls host frame pacing. The encoder worker drains the
//! queue on its own thread. The orchestrator sequences decode →
//! render-loop → drain-wait → pipe construction → external encode →
//! cleanup, with a first-error-wins fault latch containing any bad frame.

pub mod audio;
pub mod encoder;
pub mod fault;
pub mod pipes;
pub mod producer;
pub mod queue;
pub mod session;
pub mod worker;

pub use encoder::{FfmpegMuxer, Muxer};
pub use producer::{HostTicker, IntervalTicker, TurboTicker, VideoFrame};
pub use session::{ExportHandle, ExportJob, ExportReport, ExportSession, ExportState};
