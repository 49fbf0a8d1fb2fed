//! Utility modules and helper functions

pub mod encoding;
pub mod file_utils;
pub mod logging;
pub mod process;
pub mod validation;

pub use encoding::decode_playlist_text;
pub use file_utils::*;
pub use logging::{init_tracing, init_tracing_with};
pub use validation::*;
