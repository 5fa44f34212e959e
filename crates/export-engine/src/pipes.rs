//! Lazy byte-stream adapters feeding the external encoder.
//!
//! Both sources are constructed only after Rendering has ended, so the
//! accumulated lists are complete and immutable before any byte is
//! served. Buffers are released as soon as they are fully consumed.

use std::collections::VecDeque;
use std::io::Read;

use crate::audio::AudioSampleBlock;
use crate::producer::VideoFrame;

/// Streams the accumulated frame list as raw RGBA8 bytes.
pub struct VideoPipeSource {
    frames: VecDeque<VideoFrame>,
    current: Vec<u8>,
    offset: usize,
    width: u32,
    height: u32,
    frame_rate: u32,
    frame_count: usize,
}

impl VideoPipeSource {
    pub fn new(frames: Vec<VideoFrame>, width: u32, height: u32, frame_rate: u32) -> Self {
        let frame_count = frames.len();
        Self {
            frames: frames.into(),
            current: Vec::new(),
            offset: 0,
            width,
            height,
            frame_rate,
            frame_count,
        }
    }

    /// Declared stream width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Declared stream height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Declared constant frame rate.
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Frames this source was constructed over.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }
}

impl Read for VideoPipeSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.offset >= self.current.len() {
                match self.frames.pop_front() {
                    Some(mut frame) => {
                        // Consume-once: the frame releases its buffer here
                        // and is dropped.
                        self.current = frame.take_pixels();
                        self.offset = 0;
                    }
                    None => break,
                }
            }
            let n = (buf.len() - written).min(self.current.len() - self.offset);
            buf[written..written + n].copy_from_slice(&self.current[self.offset..self.offset + n]);
            self.offset += n;
            written += n;
        }
        Ok(written)
    }
}

/// Streams the decoded audio blocks as raw big-endian 16-bit PCM.
pub struct AudioPipeSource {
    blocks: VecDeque<AudioSampleBlock>,
    current: Vec<u8>,
    offset: usize,
    channels: u16,
    sample_rate: u32,
}

impl AudioPipeSource {
    /// `sample_rate` is the declared stream rate, already scaled by the
    /// export speed.
    pub fn new(blocks: Vec<AudioSampleBlock>, channels: u16, sample_rate: u32) -> Self {
        Self {
            blocks: blocks.into(),
            current: Vec::new(),
            offset: 0,
            channels,
            sample_rate,
        }
    }

    /// Declared channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Declared sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Read for AudioPipeSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.offset >= self.current.len() {
                match self.blocks.pop_front() {
                    Some(mut block) => {
                        self.current = block.take_bytes();
                        self.offset = 0;
                    }
                    None => break,
                }
            }
            let n = (buf.len() - written).min(self.current.len() - self.offset);
            buf[written..written + n].copy_from_slice(&self.current[self.offset..self.offset + n]);
            self.offset += n;
            written += n;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn frame(width: u32, height: u32, fill: u8) -> VideoFrame {
        let pixels = vec![fill; width as usize * height as usize * 4];
        VideoFrame::from_rgba(width, height, pixels).unwrap()
    }

    #[test]
    fn video_source_streams_frames_in_order() {
        let frames = vec![frame(2, 2, 1), frame(2, 2, 2), frame(2, 2, 3)];
        let mut source = VideoPipeSource::new(frames, 2, 2, 60);
        assert_eq!(source.frame_rate(), 60);
        assert_eq!(source.frame_count(), 3);

        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 3 * 2 * 2 * 4);
        assert!(out[..16].iter().all(|&b| b == 1));
        assert!(out[16..32].iter().all(|&b| b == 2));
        assert!(out[32..].iter().all(|&b| b == 3));
    }

    #[test]
    fn video_source_survives_tiny_reads() {
        let frames = vec![frame(2, 1, 7), frame(2, 1, 8)];
        let mut source = VideoPipeSource::new(frames, 2, 1, 30);

        let mut out = Vec::new();
        let mut chunk = [0u8; 3];
        loop {
            let n = source.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out.len(), 16);
        assert!(out[..8].iter().all(|&b| b == 7));
        assert!(out[8..].iter().all(|&b| b == 8));
    }

    #[test]
    fn exhausted_video_source_keeps_returning_zero() {
        let mut source = VideoPipeSource::new(vec![frame(1, 1, 9)], 1, 1, 24);
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn audio_source_concatenates_blocks_in_order() {
        let blocks = vec![
            AudioSampleBlock::from_samples(&[1, 2]),
            AudioSampleBlock::from_samples(&[3]),
        ];
        let mut source = AudioPipeSource::new(blocks, 2, 88_200);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 88_200);

        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![0, 1, 0, 2, 0, 3]);
    }
}
