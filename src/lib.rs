mod partitioner;

// Modules
pub mod constants;
pub mod data;
pub mod errors;
pub mod histogram;
pub mod splitter;
pub mod utils;

// Individual classes, and functions
pub use data::Matrix;
pub use errors::SplitError;
pub use histogram::{HistogramCache, NodeHistogram, NodeHistogramOwned};
pub use splitter::{SplitInfo, SplitterParams, SplittingContext};
