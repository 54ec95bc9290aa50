//! Host-side histogram accumulation kernels.
//!
//! The consumer folds each sample into a node accumulator through the narrow
//! [`RecordAccumulator`] interface. A portable scalar version always exists;
//! on x86_64 the vector version uses SSE2 (baseline) and AVX when the CPU
//! reports it. Vector width is an optimisation only: every implementation
//! produces identical sums.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Adds one sample's contribution to a histogram accumulator.
pub trait RecordAccumulator: Send + Sync {
    /// `dst[i] += src[i]` for every `i`.
    fn add_record(&self, dst: &mut [f64], src: &[f64]);

    /// `dst[i] += bit i of bits` for every `i < dst.len()`, bits packed
    /// little-endian within each byte.
    fn add_bits(&self, dst: &mut [u32], bits: &[u8]);

    /// Implementation name for logging.
    fn name(&self) -> &'static str;
}

/// Portable scalar accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarAccumulator;

impl RecordAccumulator for ScalarAccumulator {
    fn add_record(&self, dst: &mut [f64], src: &[f64]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d += *s;
        }
    }

    fn add_bits(&self, dst: &mut [u32], bits: &[u8]) {
        for (i, d) in dst.iter_mut().enumerate() {
            *d += u32::from((bits[i >> 3] >> (i & 7)) & 1);
        }
    }

    fn name(&self) -> &'static str {
        "scalar"
    }
}

/// Vectorised accumulator with runtime feature detection.
#[derive(Debug, Clone, Copy)]
pub struct SimdAccumulator {
    use_avx: bool,
}

impl Default for SimdAccumulator {
    fn default() -> Self {
        SimdAccumulator {
            use_avx: is_avx_available(),
        }
    }
}

impl SimdAccumulator {
    /// Creates an accumulator using the best instructions available.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordAccumulator for SimdAccumulator {
    fn add_record(&self, dst: &mut [f64], src: &[f64]) {
        let len = dst.len().min(src.len());
        #[cfg(target_arch = "x86_64")]
        {
            if self.use_avx {
                // SAFETY: AVX support was detected at construction.
                unsafe { add_record_avx(&mut dst[..len], &src[..len]) };
            } else {
                // SAFETY: SSE2 is part of the x86_64 baseline.
                unsafe { add_record_sse2(&mut dst[..len], &src[..len]) };
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            ScalarAccumulator.add_record(&mut dst[..len], &src[..len]);
        }
    }

    fn add_bits(&self, dst: &mut [u32], bits: &[u8]) {
        #[cfg(target_arch = "x86_64")]
        {
            // SAFETY: SSE2 is part of the x86_64 baseline.
            unsafe { add_bits_sse2(dst, bits) };
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            ScalarAccumulator.add_bits(dst, bits);
        }
    }

    fn name(&self) -> &'static str {
        if self.use_avx {
            "avx"
        } else {
            "sse2"
        }
    }
}

/// Picks the accumulator for a device configuration.
pub fn select_accumulator(use_simd: bool) -> Box<dyn RecordAccumulator> {
    if use_simd {
        Box::new(SimdAccumulator::new())
    } else {
        Box::new(ScalarAccumulator)
    }
}

/// # Safety
/// The CPU must support AVX.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
unsafe fn add_record_avx(dst: &mut [f64], src: &[f64]) {
    debug_assert!(src.len() >= dst.len());
    let chunks = dst.len() / 4;
    for chunk in 0..chunks {
        let offset = chunk * 4;
        // SAFETY: offset + 4 <= dst.len() <= src.len(); the caller guarantees AVX.
        unsafe {
            let d = _mm256_loadu_pd(dst.as_ptr().add(offset));
            let s = _mm256_loadu_pd(src.as_ptr().add(offset));
            _mm256_storeu_pd(dst.as_mut_ptr().add(offset), _mm256_add_pd(d, s));
        }
    }
    for i in chunks * 4..dst.len() {
        dst[i] += src[i];
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn add_record_sse2(dst: &mut [f64], src: &[f64]) {
    debug_assert!(src.len() >= dst.len());
    let chunks = dst.len() / 2;
    for chunk in 0..chunks {
        let offset = chunk * 2;
        // SAFETY: offset + 2 <= dst.len() <= src.len(); SSE2 is baseline.
        unsafe {
            let d = _mm_loadu_pd(dst.as_ptr().add(offset));
            let s = _mm_loadu_pd(src.as_ptr().add(offset));
            _mm_storeu_pd(dst.as_mut_ptr().add(offset), _mm_add_pd(d, s));
        }
    }
    if dst.len() % 2 == 1 {
        let last = dst.len() - 1;
        dst[last] += src[last];
    }
}

/// Expands each byte into eight 32-bit lanes: a lane whose bit is set
/// compares equal to its mask, giving -1, and subtracting -1 adds one.
#[cfg(target_arch = "x86_64")]
unsafe fn add_bits_sse2(dst: &mut [u32], bits: &[u8]) {
    let full_bytes = dst.len() / 8;

    // SAFETY: SSE2 is baseline on x86_64. Each iteration touches the eight
    // lanes byte_idx*8..byte_idx*8+8, all below full_bytes*8 <= dst.len().
    unsafe {
        let low_mask = _mm_set_epi32(8, 4, 2, 1);
        let high_mask = _mm_set_epi32(128, 64, 32, 16);

        for (byte_idx, byte) in bits.iter().take(full_bytes).enumerate() {
            let splat = _mm_set1_epi32(i32::from(*byte));
            let low_hits = _mm_cmpeq_epi32(_mm_and_si128(splat, low_mask), low_mask);
            let high_hits = _mm_cmpeq_epi32(_mm_and_si128(splat, high_mask), high_mask);

            let ptr = dst.as_mut_ptr().add(byte_idx * 8) as *mut __m128i;
            let low = _mm_loadu_si128(ptr);
            _mm_storeu_si128(ptr, _mm_sub_epi32(low, low_hits));
            let high = _mm_loadu_si128(ptr.add(1));
            _mm_storeu_si128(ptr.add(1), _mm_sub_epi32(high, high_hits));
        }
    }

    for i in full_bytes * 8..dst.len() {
        dst[i] += u32::from((bits[i >> 3] >> (i & 7)) & 1);
    }
}

/// Checks if AVX is available on the current CPU.
#[cfg(target_arch = "x86_64")]
fn is_avx_available() -> bool {
    is_x86_feature_detected!("avx")
}

/// Fallback for non-x86_64 architectures.
#[cfg(not(target_arch = "x86_64"))]
fn is_avx_available() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulators() -> Vec<Box<dyn RecordAccumulator>> {
        vec![select_accumulator(false), select_accumulator(true)]
    }

    #[test]
    fn test_add_record_matches_scalar() {
        for acc in accumulators() {
            let mut dst: Vec<f64> = (0..12).map(|v| v as f64).collect();
            let src: Vec<f64> = (0..12).map(|v| 0.5 * v as f64).collect();
            acc.add_record(&mut dst, &src);
            let expected: Vec<f64> = (0..12).map(|v| 1.5 * v as f64).collect();
            assert_eq!(dst, expected, "{}", acc.name());
        }
    }

    #[test]
    fn test_add_bits_matches_scalar() {
        let bits = [0b1010_0101u8, 0xFF, 0b0000_0011];
        for acc in accumulators() {
            let mut dst = vec![1u32; 19];
            acc.add_bits(&mut dst, &bits);
            let expected: Vec<u32> = (0..19)
                .map(|i| 1 + u32::from((bits[i / 8] >> (i % 8)) & 1))
                .collect();
            assert_eq!(dst, expected, "{}", acc.name());
        }
    }

    #[test]
    fn test_vector_tails_match_scalar() {
        let simd = SimdAccumulator::new();
        for len in 0..=11 {
            let src: Vec<f64> = (0..len).map(|v| 0.25 + v as f64).collect();
            let mut expected = vec![2.0; len];
            ScalarAccumulator.add_record(&mut expected, &src);
            let mut dst = vec![2.0; len];
            simd.add_record(&mut dst, &src);
            assert_eq!(dst, expected, "{} records of length {}", simd.name(), len);
        }

        let bits = [0b1100_1010u8, 0b0101_0011, 0b1111_0000];
        for len in 0..=24 {
            let mut expected = vec![3u32; len];
            ScalarAccumulator.add_bits(&mut expected, &bits);
            let mut dst = vec![3u32; len];
            simd.add_bits(&mut dst, &bits);
            assert_eq!(dst, expected, "{} bits of length {}", simd.name(), len);
        }
    }

    #[test]
    fn test_add_bits_short_destination() {
        for acc in accumulators() {
            let mut dst = vec![0u32; 3];
            acc.add_bits(&mut dst, &[0b0000_0110]);
            assert_eq!(dst, vec![0, 1, 1]);
        }
    }
}
