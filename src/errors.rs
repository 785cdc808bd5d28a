//! Errors
//!
//! Custom error types used throughout the `histsplit` crate.
use thiserror::Error;

/// Errors that can occur while constructing a splitting context.
#[derive(Debug, Error)]
pub enum SplitError {
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// An input array does not agree with the shape of the binned matrix.
    #[error("Dimension mismatch for {0}: expected length {1}, got {2}.")]
    DimensionMismatch(String, usize, usize),
}
