//! Conversion between the wire sample formats carried in `AudioShm`/device
//! buffers and the `f32` working format the mixer operates in.

use snd_core::format::SampleFormat;

pub fn bytes_to_f32(bytes: &[u8], format: SampleFormat, out: &mut Vec<f32>) {
    out.clear();
    match format {
        SampleFormat::U8 => {
            out.extend(bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0));
        }
        SampleFormat::S16Le => {
            out.extend(bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32));
        }
        SampleFormat::S24Le => {
            out.extend(bytes.chunks_exact(3).map(|c| {
                let v = i32::from_le_bytes([c[0], c[1], c[2], 0]) << 8 >> 8;
                v as f32 / 8_388_608.0
            }));
        }
        SampleFormat::S32Le => {
            out.extend(
                bytes.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / i32::MAX as f32),
            );
        }
    }
}

pub fn f32_to_bytes(samples: &[f32], format: SampleFormat, out: &mut Vec<u8>) {
    out.clear();
    match format {
        SampleFormat::U8 => {
            out.extend(samples.iter().map(|&s| ((s.clamp(-1.0, 1.0) * 128.0) + 128.0) as u8));
        }
        SampleFormat::S16Le => {
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        SampleFormat::S24Le => {
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                let b = v.to_le_bytes();
                out.extend_from_slice(&b[..3]);
            }
        }
        SampleFormat::S32Le => {
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) * i32::MAX as f32) as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s16_round_trip_preserves_sign_and_rough_magnitude() {
        let samples = [0.5f32, -0.5, 0.0, 1.0, -1.0];
        let mut bytes = Vec::new();
        f32_to_bytes(&samples, SampleFormat::S16Le, &mut bytes);
        let mut back = Vec::new();
        bytes_to_f32(&bytes, SampleFormat::S16Le, &mut back);
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 0.01, "{a} vs {b}");
        }
    }

    #[test]
    fn silence_round_trips_to_zero() {
        let bytes = vec![0u8; 8];
        let mut out = Vec::new();
        bytes_to_f32(&bytes, SampleFormat::S16Le, &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
