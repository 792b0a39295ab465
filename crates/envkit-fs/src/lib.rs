//! Filesystem primitives for the envkit extension engine
//!
//! Provides sandbox-aware path handling, atomic and append-only I/O, and
//! scoped exclusive locks with a bounded acquisition interval.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod lock;
pub mod path;

pub use config::ConfigStore;
pub use constants::StatePath;
pub use error::{Error, Result};
pub use lock::FileLock;
pub use path::{confine, reject_unsafe_relative};
