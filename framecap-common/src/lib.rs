pub mod aggregate;
pub mod bin_common;
pub mod sampling;

/// For stand-alone functionality that fit comfortably within one file.
pub mod utils;
