//! G.711 mu-law codec
//!
//! The provider link carries 8-bit mu-law at 8 kHz. Encode/decode use the
//! standard bias-0x84 companding; decode followed by encode is bit-exact for
//! every byte except 0x7F (negative zero), which re-encodes as 0xFF.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Decoded magnitudes per exponent segment: (0x84 << e) - 0x84
const EXP_LUT: [i32; 8] = [0, 132, 396, 924, 1980, 4092, 8316, 16764];

/// Decode a single mu-law byte to a PCM16 sample
pub fn decode_sample(byte: u8) -> i16 {
    let b = !byte;
    let sign = b & 0x80;
    let exponent = ((b >> 4) & 0x07) as usize;
    let mantissa = (b & 0x0F) as i32;

    let magnitude = EXP_LUT[exponent] + (mantissa << (exponent + 3));
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode a single PCM16 sample to a mu-law byte
pub fn encode_sample(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode a mu-law buffer to PCM16 samples
pub fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode_sample(b)).collect()
}

/// Encode PCM16 samples to a mu-law buffer
pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence() {
        assert_eq!(encode_sample(0), 0xFF);
        assert_eq!(decode_sample(0xFF), 0);
        assert_eq!(decode_sample(0x7F), 0);
    }

    #[test]
    fn test_decode_encode_bit_exact() {
        for b in 0u8..=255 {
            let reencoded = encode_sample(decode_sample(b));
            if b == 0x7F {
                // Negative zero aliases to positive zero.
                assert_eq!(reencoded, 0xFF);
            } else {
                assert_eq!(reencoded, b, "byte {:#04x} did not round-trip", b);
            }
        }
    }

    #[test]
    fn test_sign_symmetry() {
        for s in [100i16, 1000, 8000, 20000, 32000] {
            let pos = decode_sample(encode_sample(s));
            let neg = decode_sample(encode_sample(-s));
            assert_eq!(pos, -neg);
        }
    }

    #[test]
    fn test_encode_monotonic_on_magnitude() {
        let mut prev = decode_sample(encode_sample(0));
        for s in (0..32000i16).step_by(97) {
            let q = decode_sample(encode_sample(s));
            assert!(q >= prev, "quantized magnitude decreased at {}", s);
            prev = q;
        }
    }

    #[test]
    fn test_buffer_roundtrip() {
        let frame: Vec<u8> = (0..160).map(|i| (i % 251) as u8).collect();
        let pcm = decode(&frame);
        assert_eq!(pcm.len(), 160);
        let back = encode(&pcm);
        for (i, (&a, &b)) in frame.iter().zip(back.iter()).enumerate() {
            if a == 0x7F {
                assert_eq!(b, 0xFF);
            } else {
                assert_eq!(a, b, "mismatch at index {}", i);
            }
        }
    }
}
