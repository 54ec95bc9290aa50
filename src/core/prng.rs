//! Seeded hash generator for reproducible per-node resampling.
//!
//! The generator is the MD5 compression function applied to a single padded
//! block holding the four 32-bit seed words. Equivalently, `md5_rand(seed)` is
//! the MD5 digest of the 16 little-endian seed bytes read back as four
//! little-endian words. Host and device implementations must agree on it bit
//! for bit: the device resamples candidate features with it and the host
//! rebuilds the chosen ones after split selection.

use crate::core::constants::PRNG_WORD_MAX;

const INIT_STATE: [u32; 4] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476];

const SHIFTS: [u32; 16] = [7, 12, 17, 22, 5, 9, 14, 20, 4, 11, 16, 23, 6, 10, 15, 21];

const ROUND_CONSTANTS: [u32; 64] = [
    0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
    0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
    0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8,
    0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed, 0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a,
    0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70,
    0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665,
    0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
    0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb, 0xeb86d391,
];

/// Hashes a four-word seed into a four-word state.
pub fn md5_rand(seed: [u32; 4]) -> [u32; 4] {
    // 16 message bytes, 0x80 terminator, bit length 128.
    let message: [u32; 16] = [
        seed[0], seed[1], seed[2], seed[3], 128, 0, 0, 0, 0, 0, 0, 0, 0, 0, 128, 0,
    ];

    let [mut a, mut b, mut c, mut d] = INIT_STATE;
    for step in 0..64 {
        let round = step / 16;
        let (mix, word) = match round {
            0 => ((b & c) | (!b & d), step),
            1 => ((b & d) | (c & !d), (1 + 5 * step) % 16),
            2 => (b ^ c ^ d, (5 + 3 * step) % 16),
            _ => (c ^ (b | !d), (7 * step) % 16),
        };
        let rotated = a
            .wrapping_add(mix)
            .wrapping_add(message[word])
            .wrapping_add(ROUND_CONSTANTS[step])
            .rotate_left(SHIFTS[round * 4 + step % 4]);
        let next_b = b.wrapping_add(rotated);
        a = d;
        d = c;
        c = b;
        b = next_b;
    }

    [
        a.wrapping_add(INIT_STATE[0]),
        b.wrapping_add(INIT_STATE[1]),
        c.wrapping_add(INIT_STATE[2]),
        d.wrapping_add(INIT_STATE[3]),
    ]
}

/// Maps one output word to `[0, 1]`.
#[inline]
pub fn unit_interval(word: u32) -> f32 {
    word as f32 / PRNG_WORD_MAX
}

/// Chained generator: each block is the hash of the previous one.
#[derive(Debug, Clone)]
pub struct HashChain {
    seed: [u32; 4],
}

impl HashChain {
    /// Starts a chain at `seed`.
    pub fn new(seed: [u32; 4]) -> Self {
        HashChain { seed }
    }

    /// Produces the next four words and advances the seed to them.
    pub fn next_block(&mut self) -> [u32; 4] {
        let state = md5_rand(self.seed);
        self.seed = state;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_seed_matches_md5_of_sixteen_zero_bytes() {
        // md5(0x00 * 16) = 4ae71336e44bf9bf79d2752e234818a5
        assert_eq!(
            md5_rand([0, 0, 0, 0]),
            [0x3613e74a, 0xbff94be4, 0x2e75d279, 0xa5184823]
        );
    }

    #[test]
    fn test_chain_advances() {
        let mut chain = HashChain::new([1, 2, 3, 0]);
        let first = chain.next_block();
        let second = chain.next_block();
        assert_eq!(first, md5_rand([1, 2, 3, 0]));
        assert_eq!(second, md5_rand(first));
        assert_ne!(first, second);
    }

    #[test]
    fn test_unit_interval_bounds() {
        assert_eq!(unit_interval(0), 0.0);
        assert_eq!(unit_interval(u32::MAX), 1.0);
    }

    proptest! {
        #[test]
        fn prop_deterministic(a: u32, b: u32, c: u32, d: u32) {
            prop_assert_eq!(md5_rand([a, b, c, d]), md5_rand([a, b, c, d]));
        }

        #[test]
        fn prop_single_component_change_alters_output(a: u32, b: u32, c: u32, d: u32) {
            let base = md5_rand([a, b, c, d]);
            prop_assert_ne!(base, md5_rand([a.wrapping_add(1), b, c, d]));
            prop_assert_ne!(base, md5_rand([a, b.wrapping_add(1), c, d]));
            prop_assert_ne!(base, md5_rand([a, b, c.wrapping_add(1), d]));
            prop_assert_ne!(base, md5_rand([a, b, c, d ^ 1]));
        }
    }
}
