//! Audio decode: the track is pulled to PCM ahead of encoding.

use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use simcast_common::error::{SimcastError, SimcastResult};
use simcast_scene::PcmDecoder;

/// One decoded block of interleaved 16-bit PCM, serialized high byte then
/// low byte per sample. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSampleBlock {
    bytes: Vec<u8>,
}

impl AudioSampleBlock {
    /// Serialize interleaved samples, high byte first.
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.push((sample >> 8) as u8);
            bytes.push(*sample as u8);
        }
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Release the byte buffer to the consumer.
    pub(crate) fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

/// The fully decoded audio track, ready for the audio pipe.
#[derive(Debug)]
pub struct DecodedAudio {
    /// Blocks in decode order, one per decoder pull.
    pub blocks: Vec<AudioSampleBlock>,

    /// Channel count of the interleaved stream.
    pub channels: u16,

    /// Sample rate of the source asset.
    pub source_sample_rate: u32,
}

impl DecodedAudio {
    /// Rate declared to the muxer: source rate scaled by the export
    /// speed. Speed affects pitch and duration through this declaration
    /// alone — the samples themselves are never resampled.
    pub fn stream_rate(&self, speed: f64) -> u32 {
        (self.source_sample_rate as f64 * speed).round() as u32
    }

    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }
}

/// Pull the decoder dry: one `AudioSampleBlock` per pull, order
/// preserved, stopping at the first empty block.
pub fn decode_all(decoder: &mut dyn PcmDecoder) -> SimcastResult<DecodedAudio> {
    let channels = decoder.channels();
    let source_sample_rate = decoder.sample_rate();
    let mut blocks = Vec::new();

    loop {
        let samples = decoder.decode_next()?;
        if samples.is_empty() {
            break;
        }
        blocks.push(AudioSampleBlock::from_samples(samples));
    }

    tracing::info!(
        blocks = blocks.len(),
        channels,
        sample_rate = source_sample_rate,
        "audio track decoded"
    );

    Ok(DecodedAudio {
        blocks,
        channels,
        source_sample_rate,
    })
}

/// [`PcmDecoder`] over any compressed asset symphonia can probe (ogg,
/// mp3, flac, wav, ...). Yields one block per decoded packet, in stream
/// order.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    scratch: Vec<i16>,
}

impl SymphoniaDecoder {
    pub fn open(path: &Path) -> SimcastResult<Self> {
        let file = std::fs::File::open(path).map_err(|_| SimcastError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                SimcastError::decode(format!("failed to probe {}: {e}", path.display()))
            })?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SimcastError::decode("no audio track found"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| SimcastError::decode("sample rate unknown"))?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| SimcastError::decode("channel layout unknown"))?
            .count() as u16;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| SimcastError::decode(format!("failed to create decoder: {e}")))?;

        tracing::debug!(
            path = %path.display(),
            sample_rate,
            channels,
            "audio asset opened"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            scratch: Vec::new(),
        })
    }
}

impl PcmDecoder for SymphoniaDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn decode_next(&mut self) -> SimcastResult<&[i16]> {
        let samples: Vec<i16> = loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break Vec::new();
                }
                Err(e) => {
                    return Err(SimcastError::decode(format!("error reading packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    if buf.samples().is_empty() {
                        continue;
                    }
                    break buf.samples().to_vec();
                }
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    // Corrupt packet; skip it and keep the stream going.
                    tracing::warn!(error = %e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => {
                    return Err(SimcastError::decode(format!("decode failed: {e}")));
                }
            }
        };

        self.scratch = samples;
        Ok(&self.scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcast_scene::synthetic::SyntheticPcm;

    #[test]
    fn samples_serialize_high_byte_then_low_byte() {
        let block = AudioSampleBlock::from_samples(&[0x1234, -2, 0]);
        // -2 is 0xFFFE in two's complement.
        assert_eq!(block.bytes(), &[0x12, 0x34, 0xFF, 0xFE, 0x00, 0x00]);
    }

    #[test]
    fn decode_all_preserves_block_boundaries_and_order() {
        let blocks = vec![vec![1i16; 100], vec![2i16; 37], vec![3i16; 256]];
        let mut decoder = SyntheticPcm::from_blocks(48_000, 2, blocks);
        let audio = decode_all(&mut decoder).unwrap();

        assert_eq!(audio.blocks.len(), 3);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.source_sample_rate, 48_000);
        // Σ(Lk) × 2 bytes total.
        assert_eq!(audio.total_bytes(), (100 + 37 + 256) * 2);
        assert_eq!(audio.blocks[0].len(), 200);
        assert_eq!(audio.blocks[0].bytes()[0..2], [0x00, 0x01]);
        assert_eq!(audio.blocks[1].bytes()[0..2], [0x00, 0x02]);
        assert_eq!(audio.blocks[2].bytes()[0..2], [0x00, 0x03]);
    }

    #[test]
    fn stream_rate_scales_with_speed() {
        let audio = DecodedAudio {
            blocks: Vec::new(),
            channels: 2,
            source_sample_rate: 44_100,
        };
        assert_eq!(audio.stream_rate(1.0), 44_100);
        assert_eq!(audio.stream_rate(2.0), 88_200);
        assert_eq!(audio.stream_rate(0.5), 22_050);
    }

    #[test]
    fn empty_decoder_yields_no_blocks() {
        let mut decoder = SyntheticPcm::from_blocks(44_100, 1, Vec::new());
        let audio = decode_all(&mut decoder).unwrap();
        assert!(audio.blocks.is_empty());
        assert_eq!(audio.total_bytes(), 0);
    }
}
