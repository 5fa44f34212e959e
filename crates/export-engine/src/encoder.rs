//! External encoder invocation.
//!
//! The muxer is an external `ffmpeg` process consuming two raw streams —
//! RGBA8 video and big-endian 16-bit PCM audio — over named pipes, and
//! writing one output file whose container is implied by its extension.
//! The process's `-progress` stream is treated as narration only:
//! completion and failure are decided by the exit status and the captured
//! stderr. No timeout is enforced on the process; a hung encoder hangs
//! the export's Compiling phase.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use simcast_common::error::{SimcastError, SimcastResult};

use crate::pipes::{AudioPipeSource, VideoPipeSource};
use crate::session::ExportJob;

/// Seam for the external muxing/encoding step.
pub trait Muxer: Send {
    /// Whether the backing binary is present on this system.
    fn is_available(&self) -> bool;

    /// Consume both streams and write the output file.
    fn mux(
        &mut self,
        video: VideoPipeSource,
        audio: AudioPipeSource,
        job: &ExportJob,
    ) -> SimcastResult<()>;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Production muxer: pipes both streams into `ffmpeg`.
pub struct FfmpegMuxer;

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Muxer for FfmpegMuxer {
    fn is_available(&self) -> bool {
        command_exists("ffmpeg")
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn mux(
        &mut self,
        video: VideoPipeSource,
        audio: AudioPipeSource,
        job: &ExportJob,
    ) -> SimcastResult<()> {
        if let Some(parent) = job.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let scratch = ScratchPipes::create()?;
        let args = build_ffmpeg_args(
            &video,
            &audio,
            job,
            &scratch.video_path,
            &scratch.audio_path,
        );
        tracing::debug!(args = ?args, "running ffmpeg");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SimcastError::encode(format!("failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            output = %job.output_path.display(),
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SimcastError::encode("failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SimcastError::encode("failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        // Opening a FIFO's write end blocks until the reader side opens
        // it, and ffmpeg opens its inputs one after another — each stream
        // gets its own writer thread.
        let video_path = scratch.video_path.clone();
        let video_task = std::thread::spawn(move || stream_into_fifo(video, &video_path));
        let audio_path = scratch.audio_path.clone();
        let audio_task = std::thread::spawn(move || stream_into_fifo(audio, &audio_path));

        // The progress callback channel is narration, not a completion
        // signal; log it and move on.
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line).map_err(|e| {
                SimcastError::encode(format!("failed reading ffmpeg progress: {e}"))
            })?;
            if bytes == 0 {
                break;
            }
            if let Some((key, value)) = line.trim().split_once('=') {
                tracing::debug!(key, value, "ffmpeg progress");
            }
        }

        let status = child
            .wait()
            .map_err(|e| SimcastError::encode(format!("failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            // ffmpeg may have died without ever opening an input, leaving
            // a writer blocked in its FIFO open() — joining it would hang
            // forever, so the writer threads are abandoned on failure.
            drop(video_task);
            drop(audio_task);
            return Err(SimcastError::encode(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr_output.trim()
            )));
        }

        for (stream, task) in [("video", video_task), ("audio", audio_task)] {
            match task.join() {
                Ok(Ok(bytes)) => tracing::debug!(stream, bytes, "pipe writer finished"),
                Ok(Err(err)) => tracing::warn!(stream, error = %err, "pipe writer failed"),
                Err(_) => tracing::warn!(stream, "pipe writer panicked"),
            }
        }

        tracing::info!(output = %job.output_path.display(), "ffmpeg finished");
        Ok(())
    }
}

fn build_ffmpeg_args(
    video: &VideoPipeSource,
    audio: &AudioPipeSource,
    job: &ExportJob,
    video_fifo: &Path,
    audio_fifo: &Path,
) -> Vec<String> {
    let args: Vec<String> = vec![
        // Overwriting an existing output is permitted.
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostats".into(),
        "-progress".into(),
        "pipe:1".into(),
        // Video: raw RGBA8 at a declared constant frame rate.
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-video_size".into(),
        format!("{}x{}", video.width(), video.height()),
        "-framerate".into(),
        video.frame_rate().to_string(),
        "-i".into(),
        video_fifo.display().to_string(),
        // Audio: big-endian 16-bit PCM at the declared (speed-scaled) rate.
        "-f".into(),
        "s16be".into(),
        "-ar".into(),
        audio.sample_rate().to_string(),
        "-ac".into(),
        audio.channels().to_string(),
        "-i".into(),
        audio_fifo.display().to_string(),
        "-c:v".into(),
        job.video_codec.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        job.audio_codec.clone(),
        job.output_path.display().to_string(),
    ];
    args
}

/// Scratch directory holding the two named pipes for one invocation.
struct ScratchPipes {
    dir: PathBuf,
    video_path: PathBuf,
    audio_path: PathBuf,
}

impl ScratchPipes {
    fn create() -> SimcastResult<Self> {
        let dir = std::env::temp_dir().join(format!("simcast-mux-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let video_path = dir.join("video.rgba");
        let audio_path = dir.join("audio.pcm");
        make_fifo(&video_path)?;
        make_fifo(&audio_path)?;
        Ok(Self {
            dir,
            video_path,
            audio_path,
        })
    }
}

impl Drop for ScratchPipes {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.dir) {
            tracing::debug!(error = %err, "failed to remove mux scratch dir");
        }
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> SimcastResult<()> {
    use std::os::unix::ffi::OsStrExt;

    // A stale pipe from an aborted run would make mkfifo fail with EEXIST.
    let _ = std::fs::remove_file(path);

    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SimcastError::encode("pipe path contains a NUL byte"))?;
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(SimcastError::encode(format!(
            "mkfifo {} failed: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_fifo(_path: &Path) -> SimcastResult<()> {
    Err(SimcastError::unsupported(
        "named-pipe muxing requires a unix platform",
    ))
}

fn stream_into_fifo(mut source: impl Read, path: &Path) -> SimcastResult<u64> {
    let mut fifo = std::fs::OpenOptions::new().write(true).open(path)?;
    let bytes = std::io::copy(&mut source, &mut fifo)?;
    fifo.flush()?;
    Ok(bytes)
}

fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSampleBlock;
    use crate::producer::VideoFrame;

    fn sample_job() -> ExportJob {
        ExportJob {
            output_path: PathBuf::from("/tmp/out.mp4"),
            audio_path: PathBuf::from("/tmp/in.ogg"),
            width: 320,
            height: 240,
            framerate: 60,
            speed: 1.0,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
        }
    }

    #[test]
    fn ffmpeg_args_declare_both_streams() {
        let frames = vec![VideoFrame::from_rgba(320, 240, vec![0; 320 * 240 * 4]).unwrap()];
        let video = VideoPipeSource::new(frames, 320, 240, 60);
        let audio = AudioPipeSource::new(
            vec![AudioSampleBlock::from_samples(&[0, 1])],
            2,
            88_200,
        );
        let args = build_ffmpeg_args(
            &video,
            &audio,
            &sample_job(),
            Path::new("/tmp/v.rgba"),
            Path::new("/tmp/a.pcm"),
        );

        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo"));
        assert!(joined.contains("-video_size 320x240"));
        assert!(joined.contains("-framerate 60"));
        assert!(joined.contains("-f s16be"));
        assert!(joined.contains("-ar 88200"));
        assert!(joined.contains("-ac 2"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.starts_with("-y "));
        assert!(joined.ends_with("/tmp/out.mp4"));

        // The video input must precede the audio input.
        let v = joined.find("/tmp/v.rgba").unwrap();
        let a = joined.find("/tmp/a.pcm").unwrap();
        assert!(v < a);
    }

    #[cfg(unix)]
    #[test]
    fn make_fifo_creates_a_named_pipe() {
        use std::os::unix::fs::FileTypeExt;

        let path = std::env::temp_dir().join(format!("simcast-fifo-test-{}", std::process::id()));
        make_fifo(&path).unwrap();
        let file_type = std::fs::metadata(&path).unwrap().file_type();
        assert!(file_type.is_fifo());
        std::fs::remove_file(&path).unwrap();
    }
}
