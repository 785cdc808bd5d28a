pub const DEFAULT_L2_REGULARIZATION: f64 = 0.0;
pub const DEFAULT_MIN_HESSIAN_TO_SPLIT: f64 = 1e-3;
pub const DEFAULT_MIN_SAMPLES_LEAF: usize = 20;
pub const DEFAULT_MIN_GAIN_TO_SPLIT: f64 = 0.0;

/// Nodes smaller than this are scanned sequentially, the per-scope
/// overhead of the thread pool exceeds the parallelism benefit.
pub const PARALLEL_SAMPLE_THRESHOLD: usize = 512;
