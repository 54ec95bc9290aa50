//! Core infrastructure shared by every other module.
//!
//! - [`types`]: node links, index aliases and task enumerations
//! - [`constants`]: pipeline and device defaults
//! - [`error`]: the crate error type
//! - [`memory`]: scoped device buffers and allocation accounting
//! - [`prng`]: the seeded hash generator used for feature resampling

pub mod constants;
pub mod error;
pub mod memory;
pub mod prng;
pub mod types;

pub use constants::*;
pub use error::{DeviceError, ForestError, Result};
pub use memory::{pad_to_tile, DeviceBuffer, MemoryTracker};
pub use prng::md5_rand;
pub use types::*;

/// Initialises `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
///
/// Calling it more than once is harmless.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).try_init();
}
