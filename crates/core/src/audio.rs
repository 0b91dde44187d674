//! Audio frame types and utilities
//!
//! Frames carry PCM16 samples end to end: the provider link is G.711 at
//! 8 kHz, the recognizer consumes 16 kHz, and synthesis produces 24 kHz.
//! RMS is computed over the raw i16 amplitudes, so thresholds elsewhere in
//! the system (VAD clamps, STT silence gate) are in PCM16 units.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleRate {
    /// 8kHz - telephony (G.711)
    Hz8000,
    /// 16kHz - speech recognition
    #[default]
    Hz16000,
    /// 24kHz - synthesis output
    Hz24000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
        }
    }

    /// Samples in a 20ms frame at this rate
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }

    /// Samples per millisecond
    pub fn samples_per_ms(&self) -> usize {
        self.as_u32() as usize / 1000
    }
}

/// A chunk of mono PCM16 audio with metadata
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw PCM16 samples
    pub samples: Arc<[i16]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Timestamp when the frame was captured
    pub timestamp: Instant,
    /// Duration of this frame
    pub duration: Duration,
    /// Root-mean-square amplitude (PCM16 units)
    pub rms: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("rms", &self.rms)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new audio frame from PCM16 samples
    pub fn new(samples: Vec<i16>, sample_rate: SampleRate, sequence: u64) -> Self {
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / sample_rate.as_u32() as f64);
        let rms = calculate_rms(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            timestamp: Instant::now(),
            duration,
            rms,
        }
    }

    /// Decode from little-endian PCM16 bytes
    pub fn from_pcm16_bytes(bytes: &[u8], sample_rate: SampleRate, sequence: u64) -> Self {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        Self::new(samples, sample_rate, sequence)
    }

    /// Encode to little-endian PCM16 bytes
    pub fn to_pcm16_bytes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Split into chunks of at most `chunk_samples` samples
    pub fn split(&self, chunk_samples: usize) -> Vec<AudioFrame> {
        let mut seq = self.sequence;
        self.samples
            .chunks(chunk_samples)
            .map(|chunk| {
                let frame = AudioFrame::new(chunk.to_vec(), self.sample_rate, seq);
                seq += 1;
                frame
            })
            .collect()
    }
}

/// Root-mean-square amplitude of PCM16 samples
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::Hz8000.as_u32(), 8000);
        assert_eq!(SampleRate::Hz8000.frame_size_20ms(), 160);
        assert_eq!(SampleRate::Hz16000.frame_size_20ms(), 320);
        assert_eq!(SampleRate::Hz24000.samples_per_ms(), 24);
    }

    #[test]
    fn test_pcm16_byte_roundtrip() {
        let bytes: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0, 0xFF, 0x7F];
        let frame = AudioFrame::from_pcm16_bytes(&bytes, SampleRate::Hz16000, 0);
        assert_eq!(frame.samples.len(), 3);
        assert_eq!(frame.samples[0], 0x4000);
        assert_eq!(frame.samples[1], -16384);
        assert_eq!(frame.to_pcm16_bytes(), bytes);
    }

    #[test]
    fn test_rms() {
        assert_eq!(calculate_rms(&[]), 0.0);
        assert_eq!(calculate_rms(&[0; 160]), 0.0);
        let rms = calculate_rms(&[1000; 160]);
        assert!((rms - 1000.0).abs() < 0.01);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; 320], SampleRate::Hz16000, 0);
        assert_eq!(frame.duration_ms(), 20);
    }

    #[test]
    fn test_split() {
        let frame = AudioFrame::new(vec![0; 500], SampleRate::Hz16000, 7);
        let chunks = frame.split(160);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].samples.len(), 160);
        assert_eq!(chunks[3].samples.len(), 20);
        assert_eq!(chunks[0].sequence, 7);
        assert_eq!(chunks[3].sequence, 10);
    }
}
