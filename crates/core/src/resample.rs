//! Stateful sample-rate conversion
//!
//! Two conversions exist in a call: the inbound 8 kHz provider audio is
//! doubled to 16 kHz for recognition, and the 24 kHz synthesis output is
//! reduced to 8 kHz for the provider. Both keep interpolation state across
//! chunks so frame boundaries do not produce discontinuities.

use rubato::{FftFixedIn, Resampler};

/// Linear x2 upsampler (8 kHz -> 16 kHz)
///
/// Each input sample produces two output samples: the midpoint between the
/// previous and current sample, then the current sample. The last sample of
/// a chunk is carried into the next call.
#[derive(Debug)]
pub struct Upsampler2x {
    last: i16,
}

impl Upsampler2x {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Upsample one chunk; `n` input samples yield exactly `2n` output samples.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(input.len() * 2);
        let mut prev = self.last as i32;
        for &s in input {
            out.push(((prev + s as i32) / 2) as i16);
            out.push(s);
            prev = s as i32;
        }
        if let Some(&tail) = input.last() {
            self.last = tail;
        }
        out
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}

impl Default for Upsampler2x {
    fn default() -> Self {
        Self::new()
    }
}

/// Downsampler for synthesis output (24 kHz -> 8 kHz)
///
/// Full-size chunks (the synthesizer emits fixed-duration chunks) run
/// through an FFT resampler; odd-sized tail chunks fall back to stateful
/// linear interpolation.
pub struct Downsampler {
    from_rate: usize,
    to_rate: usize,
    fft: Option<FftFixedIn<f64>>,
    fft_chunk: usize,
    /// Linear-path interpolation carry-over
    last: i16,
    position: f64,
}

impl Downsampler {
    /// Create a downsampler expecting `chunk_samples`-sized input chunks.
    pub fn new(from_rate: u32, to_rate: u32, chunk_samples: usize) -> Self {
        let fft = if chunk_samples >= 64 {
            FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_samples, 2, 1).ok()
        } else {
            None
        };

        Self {
            from_rate: from_rate as usize,
            to_rate: to_rate as usize,
            fft,
            fft_chunk: chunk_samples,
            last: 0,
            position: 0.0,
        }
    }

    /// Downsample one chunk of PCM16 audio.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        if input.len() == self.fft_chunk {
            if let Some(fft) = self.fft.as_mut() {
                let frames = vec![input.iter().map(|&s| s as f64 / 32768.0).collect::<Vec<_>>()];
                match fft.process(&frames, None) {
                    Ok(output) => {
                        return output[0]
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                            .collect();
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "FFT resampling failed, using linear fallback");
                    },
                }
            }
        }

        self.process_linear(input)
    }

    /// Stateful linear interpolation fallback
    fn process_linear(&mut self, input: &[i16]) -> Vec<i16> {
        let step = self.from_rate as f64 / self.to_rate as f64;
        let mut out = Vec::with_capacity(input.len() * self.to_rate / self.from_rate + 1);
        let mut pos = self.position;

        // Position is measured in input samples, with index -1 holding the
        // carry-over sample from the previous chunk.
        while pos < input.len() as f64 {
            let idx = pos.floor();
            let frac = pos - idx;
            let idx = idx as isize;

            let s0 = if idx < 0 {
                self.last as f64
            } else {
                input[idx as usize] as f64
            };
            let s1 = if idx + 1 < input.len() as isize {
                input[(idx + 1) as usize] as f64
            } else {
                input[input.len() - 1] as f64
            };

            out.push((s0 * (1.0 - frac) + s1 * frac) as i16);
            pos += step;
        }

        self.position = pos - input.len() as f64;
        self.last = input[input.len() - 1];
        out
    }

    pub fn reset(&mut self) {
        self.last = 0;
        self.position = 0.0;
        if self.fft.is_some() && self.fft_chunk >= 64 {
            self.fft = FftFixedIn::<f64>::new(self.from_rate, self.to_rate, self.fft_chunk, 2, 1)
                .ok();
        }
    }
}
