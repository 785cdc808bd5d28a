//! Splitter
//!
//! Per-node split finding: refresh the node-local gradient copies, populate
//! per-feature histograms (from data or by subtraction), sweep every
//! feature's histogram for the best boundary, and reduce to the single best
//! split for the node.
use crate::constants::{
    DEFAULT_L2_REGULARIZATION, DEFAULT_MIN_GAIN_TO_SPLIT, DEFAULT_MIN_HESSIAN_TO_SPLIT, DEFAULT_MIN_SAMPLES_LEAF,
    PARALLEL_SAMPLE_THRESHOLD,
};
use crate::data::Matrix;
use crate::errors::SplitError;
use crate::histogram::{subtract_histograms, update_histograms, FeatureHistogram, NodeHistogram};
use crate::utils::{fast_f64_sum, split_gain, validate_positive_float_parameter};
use log::debug;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;

/// Regularization and stopping parameters consumed at context construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterParams {
    /// L2 regularization added to the hessian sum of each side.
    pub l2_regularization: f64,
    /// Minimum hessian sum required in each child.
    pub min_hessian_to_split: f64,
    /// Minimum number of samples required in each child.
    pub min_samples_leaf: usize,
    /// Minimum gain required to accept a split.
    pub min_gain_to_split: f64,
}

impl Default for SplitterParams {
    fn default() -> Self {
        SplitterParams {
            l2_regularization: DEFAULT_L2_REGULARIZATION,
            min_hessian_to_split: DEFAULT_MIN_HESSIAN_TO_SPLIT,
            min_samples_leaf: DEFAULT_MIN_SAMPLES_LEAF,
            min_gain_to_split: DEFAULT_MIN_GAIN_TO_SPLIT,
        }
    }
}

impl SplitterParams {
    pub fn validate(&self) -> Result<(), SplitError> {
        validate_positive_float_parameter(self.l2_regularization, "l2_regularization")?;
        validate_positive_float_parameter(self.min_hessian_to_split, "min_hessian_to_split")?;
        validate_positive_float_parameter(self.min_gain_to_split, "min_gain_to_split")?;
        if self.min_samples_leaf == 0 {
            return Err(SplitError::InvalidParameter(
                "min_samples_leaf".to_string(),
                "integer of at least 1".to_string(),
                self.min_samples_leaf.to_string(),
            ));
        }
        Ok(())
    }
}

/// The best split found for a node, or the `gain == -1.0` sentinel when no
/// bin boundary satisfies the constraints. The growing loop must treat the
/// sentinel as "finalize this node as a leaf", not as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitInfo {
    pub gain: f64,
    pub feature_idx: usize,
    /// Samples with `bin_code <= bin_idx` go left, the rest go right.
    pub bin_idx: u16,
    pub gradient_left: f64,
    pub gradient_right: f64,
    pub hessian_left: f64,
    pub hessian_right: f64,
    pub n_samples_left: usize,
    pub n_samples_right: usize,
}

impl Default for SplitInfo {
    fn default() -> Self {
        SplitInfo {
            gain: -1.0,
            feature_idx: 0,
            bin_idx: 0,
            gradient_left: 0.0,
            gradient_right: 0.0,
            hessian_left: 0.0,
            hessian_right: 0.0,
            n_samples_left: 0,
            n_samples_right: 0,
        }
    }
}

impl SplitInfo {
    /// Whether a valid split was found for the node.
    pub fn is_valid(&self) -> bool {
        self.gain >= 0.0
    }
}

/// Per-feature split descriptor scratch using UnsafeCell for concurrent
/// mutation. Each feature's evaluator writes only to its own slot.
#[derive(Copy, Clone, Debug)]
pub struct SplitInfoSlice<'a> {
    pub data: &'a [UnsafeCell<SplitInfo>],
}

unsafe impl<'a> Send for SplitInfoSlice<'a> {}
unsafe impl<'a> Sync for SplitInfoSlice<'a> {}

impl<'a> SplitInfoSlice<'a> {
    pub fn new(data: &'a mut [SplitInfo]) -> Self {
        let ptr = data as *mut [SplitInfo] as *const [UnsafeCell<SplitInfo>];
        Self { data: unsafe { &*ptr } }
    }

    /// # Safety
    /// Only the worker assigned to slot `i` may hold this reference.
    pub unsafe fn get_mut(&self, i: usize) -> &mut SplitInfo {
        self.data[i].get().as_mut().unwrap()
    }

    /// Reduce the per-feature descriptors to the single best one. A linear
    /// scan with strict `>`, so the lowest feature index wins ties and an
    /// all-sentinel slice propagates the sentinel.
    ///
    /// # Safety
    /// No evaluator may still be writing to the slice.
    pub unsafe fn best_split_info(&self) -> SplitInfo {
        let mut best = self.data[0].get().as_ref().unwrap().clone();
        for s in self.data[1..].iter() {
            let split_info = s.get().as_ref().unwrap();
            if split_info.gain > best.gain {
                best = split_info.clone();
            }
        }
        best
    }
}

/// Per-tree-growth state threaded through histogram construction, split
/// evaluation and partitioning.
///
/// Hessians are assumed non-negative (convex loss). The split evaluator's
/// monotonic early-termination relies on this; it is a precondition, not a
/// checked invariant.
pub struct SplittingContext<'a> {
    /// Binned feature matrix, column major, codes in `[0, max_bins)`.
    pub binned: Matrix<'a, u16>,
    pub max_bins: u16,
    /// Number of meaningful bins per feature, each `<= max_bins`.
    pub n_bins_per_feature: Vec<u16>,
    pub gradients: &'a [f32],
    pub hessians: &'a [f32],
    /// True when the loss yields one hessian value shared by all samples.
    pub hessians_are_constant: bool,
    pub constant_hessian_value: f64,
    pub params: SplitterParams,
    /// Node-local copy of the gradients, in the node's sample order.
    /// Initialized to the full gradient array, which is the root's order.
    pub ordered_gradients: Vec<f32>,
    /// Node-local copy of the hessians; empty in constant-hessian mode.
    pub ordered_hessians: Vec<f32>,
    /// Gradient sum of the node currently being processed.
    pub sum_gradients: f64,
    /// Hessian sum of the node currently being processed.
    pub sum_hessians: f64,
    /// Sample partition array; one contiguous run per current leaf.
    pub partition: Vec<usize>,
    /// Partitioner scratch, sized like the partition array.
    pub(crate) left_buffer: Vec<usize>,
    pub(crate) right_buffer: Vec<usize>,
}

impl<'a> SplittingContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        binned: Matrix<'a, u16>,
        max_bins: u16,
        n_bins_per_feature: Vec<u16>,
        gradients: &'a [f32],
        hessians: &'a [f32],
        hessians_are_constant: bool,
        params: SplitterParams,
    ) -> Result<Self, SplitError> {
        params.validate()?;
        let n_samples = binned.rows;
        if gradients.len() != n_samples {
            return Err(SplitError::DimensionMismatch(
                "gradients".to_string(),
                n_samples,
                gradients.len(),
            ));
        }
        let expected_hessians = if hessians_are_constant { 1 } else { n_samples };
        if hessians.len() != expected_hessians {
            return Err(SplitError::DimensionMismatch(
                "hessians".to_string(),
                expected_hessians,
                hessians.len(),
            ));
        }
        if n_bins_per_feature.len() != binned.cols {
            return Err(SplitError::DimensionMismatch(
                "n_bins_per_feature".to_string(),
                binned.cols,
                n_bins_per_feature.len(),
            ));
        }
        if let Some(bad) = n_bins_per_feature.iter().find(|&&b| b > max_bins) {
            return Err(SplitError::InvalidParameter(
                "n_bins_per_feature".to_string(),
                format!("bin counts of at most max_bins ({})", max_bins),
                bad.to_string(),
            ));
        }

        let constant_hessian_value = if hessians_are_constant { f64::from(hessians[0]) } else { 0.0 };
        // The ordered copies start as full-array copies, which is exactly
        // the root node's sample order.
        let ordered_gradients = gradients.to_vec();
        let ordered_hessians = if hessians_are_constant { Vec::new() } else { hessians.to_vec() };

        Ok(SplittingContext {
            binned,
            max_bins,
            n_bins_per_feature,
            gradients,
            hessians,
            hessians_are_constant,
            constant_hessian_value,
            params,
            ordered_gradients,
            ordered_hessians,
            sum_gradients: 0.0,
            sum_hessians: 0.0,
            partition: (0..n_samples).collect(),
            left_buffer: vec![0; n_samples],
            right_buffer: vec![0; n_samples],
        })
    }

    pub fn n_samples(&self) -> usize {
        self.partition.len()
    }

    pub fn n_features(&self) -> usize {
        self.binned.cols
    }

    /// Gather the node's gradients/hessians into the ordered scratch so the
    /// histogram scans read them contiguously.
    fn update_ordered_gradients(&mut self, start: usize, stop: usize, pool: &ThreadPool) {
        use rayon::prelude::*;

        let indices = &self.partition[start..stop];
        let n = indices.len();
        let gradients = self.gradients;
        let hessians = self.hessians;
        let parallel = pool.current_num_threads() > 1 && n >= PARALLEL_SAMPLE_THRESHOLD;

        if parallel {
            let ordered_gradients = &mut self.ordered_gradients[..n];
            pool.install(|| {
                ordered_gradients
                    .par_chunks_mut(PARALLEL_SAMPLE_THRESHOLD)
                    .zip(indices.par_chunks(PARALLEL_SAMPLE_THRESHOLD))
                    .for_each(|(out, idx)| {
                        for (o, &i) in out.iter_mut().zip(idx.iter()) {
                            *o = gradients[i];
                        }
                    });
            });
        } else {
            for (k, &i) in indices.iter().enumerate() {
                self.ordered_gradients[k] = gradients[i];
            }
        }

        if self.hessians_are_constant {
            return;
        }
        if parallel {
            let ordered_hessians = &mut self.ordered_hessians[..n];
            pool.install(|| {
                ordered_hessians
                    .par_chunks_mut(PARALLEL_SAMPLE_THRESHOLD)
                    .zip(indices.par_chunks(PARALLEL_SAMPLE_THRESHOLD))
                    .for_each(|(out, idx)| {
                        for (o, &i) in out.iter_mut().zip(idx.iter()) {
                            *o = hessians[i];
                        }
                    });
            });
        } else {
            for (k, &i) in indices.iter().enumerate() {
                self.ordered_hessians[k] = hessians[i];
            }
        }
    }

    /// Find the best split for the node holding `partition[start..stop]`,
    /// building its histograms from the binned data.
    ///
    /// The caller provides the node's (zeroed or stale) histograms in
    /// `hist`; on return they are fully populated and can be handed to the
    /// node's children for the subtraction fast path.
    pub fn find_node_split(&mut self, start: usize, stop: usize, hist: &NodeHistogram, pool: &ThreadPool) -> SplitInfo {
        let n_samples = stop - start;
        let is_root = n_samples == self.n_samples();
        if !is_root {
            self.update_ordered_gradients(start, stop, pool);
        }

        self.sum_gradients = fast_f64_sum(&self.ordered_gradients[..n_samples]);
        self.sum_hessians = if self.hessians_are_constant {
            self.constant_hessian_value * n_samples as f64
        } else {
            fast_f64_sum(&self.ordered_hessians[..n_samples])
        };

        let ordered_hessians: &[f32] = if self.hessians_are_constant {
            &[]
        } else {
            &self.ordered_hessians[..n_samples]
        };
        update_histograms(
            hist,
            &self.binned,
            &self.ordered_gradients[..n_samples],
            ordered_hessians,
            &self.partition[start..stop],
            is_root,
            self.hessians_are_constant,
            pool,
        );

        self.evaluate_splits(n_samples, hist, pool, start, stop)
    }

    /// Find the best split for the node holding `partition[start..stop]`,
    /// deriving its histograms as `parent - sibling` instead of scanning
    /// the data. O(bins) per feature; the caller should reserve this for
    /// the larger sibling. The ordered scratch is untouched: nothing on
    /// this path reads it, and each child refreshes its own on entry.
    pub fn find_node_split_subtraction(
        &mut self,
        start: usize,
        stop: usize,
        parent_hist: &NodeHistogram,
        sibling_hist: &NodeHistogram,
        hist: &NodeHistogram,
        pool: &ThreadPool,
    ) -> SplitInfo {
        let n_samples = stop - start;

        // Any single feature's histogram aggregates all of the node's
        // samples, so feature 0 of parent - sibling yields the node sums.
        let mut sum_gradients = 0.0;
        let mut sum_hessians = 0.0;
        unsafe {
            for (p, s) in parent_hist.data[0].data.iter().zip(sibling_hist.data[0].data.iter()) {
                let pb = p.get().as_ref().unwrap();
                let sb = s.get().as_ref().unwrap();
                sum_gradients += pb.sum_gradients - sb.sum_gradients;
                sum_hessians += pb.sum_hessians - sb.sum_hessians;
            }
        }
        self.sum_gradients = sum_gradients;
        self.sum_hessians = if self.hessians_are_constant {
            self.constant_hessian_value * n_samples as f64
        } else {
            sum_hessians
        };

        subtract_histograms(hist, parent_hist, sibling_hist, pool);

        self.evaluate_splits(n_samples, hist, pool, start, stop)
    }

    /// Sweep every feature's histogram in parallel and reduce to the best
    /// split for the node.
    fn evaluate_splits(
        &self,
        n_samples: usize,
        hist: &NodeHistogram,
        pool: &ThreadPool,
        start: usize,
        stop: usize,
    ) -> SplitInfo {
        let mut split_infos: Vec<SplitInfo> = (0..self.n_features()).map(|_| SplitInfo::default()).collect();
        let split_info_slice = SplitInfoSlice::new(&mut split_infos);

        let find_feature_split = find_feature_split_callables(self.hessians_are_constant);

        if pool.current_num_threads() > 1 {
            let ctx = &*self;
            pool.scope(|s| {
                for (feature_idx, h) in hist.data.iter().enumerate() {
                    s.spawn(move |_| find_feature_split(ctx, feature_idx, h, n_samples, &split_info_slice));
                }
            });
        } else {
            for (feature_idx, h) in hist.data.iter().enumerate() {
                find_feature_split(self, feature_idx, h, n_samples, &split_info_slice);
            }
        }

        let best = unsafe { split_info_slice.best_split_info() };
        if best.is_valid() {
            debug!(
                "node {}..{}: split on feature {} at bin {} with gain {}",
                start, stop, best.feature_idx, best.bin_idx, best.gain
            );
        } else {
            debug!("node {}..{}: no valid split, finalize as leaf", start, stop);
        }
        best
    }
}

type FindFeatureSplitFn = fn(&SplittingContext, usize, &FeatureHistogram, usize, &SplitInfoSlice);

/// The constant-hessian decision is made once per node, not once per bin.
#[inline]
fn find_feature_split_callables(hessians_are_constant: bool) -> FindFeatureSplitFn {
    match hessians_are_constant {
        true => find_feature_split_const_hess,
        false => find_feature_split_var_hess,
    }
}

/// Sweep one feature's histogram left to right, accumulating left-side
/// sums; right-side values are `total - left`. Writes the feature's best
/// boundary (or the sentinel) into its slot of `split_info_slice`.
///
/// Right-side counts and hessian sums only shrink as the boundary moves
/// right, so once either drops below its minimum no later boundary can
/// recover: those checks `break` instead of `continue`. This is where the
/// non-negative-hessian precondition matters.
fn find_feature_split_var_hess(
    ctx: &SplittingContext,
    feature_idx: usize,
    hist_feat: &FeatureHistogram,
    n_samples: usize,
    split_info_slice: &SplitInfoSlice,
) {
    let split_info = unsafe { split_info_slice.get_mut(feature_idx) };
    *split_info = SplitInfo {
        feature_idx,
        ..SplitInfo::default()
    };

    let n_bins = ctx.n_bins_per_feature[feature_idx] as usize;
    let min_samples_leaf = ctx.params.min_samples_leaf;
    let min_hessian_to_split = ctx.params.min_hessian_to_split;

    let mut n_samples_left = 0usize;
    let mut gradient_left = 0.0f64;
    let mut hessian_left = 0.0f64;

    for bin_idx in 0..n_bins {
        let bin = unsafe { hist_feat.get(bin_idx) };
        n_samples_left += bin.count as usize;
        gradient_left += bin.sum_gradients;
        hessian_left += bin.sum_hessians;

        let n_samples_right = n_samples - n_samples_left;
        let gradient_right = ctx.sum_gradients - gradient_left;
        let hessian_right = ctx.sum_hessians - hessian_left;

        if n_samples_left < min_samples_leaf {
            continue;
        }
        if n_samples_right < min_samples_leaf {
            break;
        }
        if hessian_left < min_hessian_to_split {
            continue;
        }
        if hessian_right < min_hessian_to_split {
            break;
        }

        let gain = split_gain(
            gradient_left,
            hessian_left,
            gradient_right,
            hessian_right,
            ctx.sum_gradients,
            ctx.sum_hessians,
            ctx.params.l2_regularization,
        );
        if gain > split_info.gain && gain > ctx.params.min_gain_to_split {
            split_info.gain = gain;
            split_info.bin_idx = bin_idx as u16;
            split_info.gradient_left = gradient_left;
            split_info.gradient_right = gradient_right;
            split_info.hessian_left = hessian_left;
            split_info.hessian_right = hessian_right;
            split_info.n_samples_left = n_samples_left;
            split_info.n_samples_right = n_samples_right;
        }
    }
}

/// Constant-hessian sweep: per-bin hessian sums are `count * constant`, so
/// the left hessian follows the left count arithmetically instead of being
/// read from the histogram.
fn find_feature_split_const_hess(
    ctx: &SplittingContext,
    feature_idx: usize,
    hist_feat: &FeatureHistogram,
    n_samples: usize,
    split_info_slice: &SplitInfoSlice,
) {
    let split_info = unsafe { split_info_slice.get_mut(feature_idx) };
    *split_info = SplitInfo {
        feature_idx,
        ..SplitInfo::default()
    };

    let n_bins = ctx.n_bins_per_feature[feature_idx] as usize;
    let min_samples_leaf = ctx.params.min_samples_leaf;
    let min_hessian_to_split = ctx.params.min_hessian_to_split;

    let mut n_samples_left = 0usize;
    let mut gradient_left = 0.0f64;

    for bin_idx in 0..n_bins {
        let bin = unsafe { hist_feat.get(bin_idx) };
        n_samples_left += bin.count as usize;
        gradient_left += bin.sum_gradients;

        let hessian_left = ctx.constant_hessian_value * n_samples_left as f64;
        let n_samples_right = n_samples - n_samples_left;
        let gradient_right = ctx.sum_gradients - gradient_left;
        let hessian_right = ctx.sum_hessians - hessian_left;

        if n_samples_left < min_samples_leaf {
            continue;
        }
        if n_samples_right < min_samples_leaf {
            break;
        }
        if hessian_left < min_hessian_to_split {
            continue;
        }
        if hessian_right < min_hessian_to_split {
            break;
        }

        let gain = split_gain(
            gradient_left,
            hessian_left,
            gradient_right,
            hessian_right,
            ctx.sum_gradients,
            ctx.sum_hessians,
            ctx.params.l2_regularization,
        );
        if gain > split_info.gain && gain > ctx.params.min_gain_to_split {
            split_info.gain = gain;
            split_info.bin_idx = bin_idx as u16;
            split_info.gradient_left = gradient_left;
            split_info.gradient_right = gradient_right;
            split_info.hessian_left = hessian_left;
            split_info.hessian_right = hessian_right;
            split_info.n_samples_left = n_samples_left;
            split_info.n_samples_right = n_samples_right;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::{NodeHistogram, NodeHistogramOwned};
    use approx::assert_relative_eq;

    fn pool(n: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(n).build().unwrap()
    }

    fn loose_params() -> SplitterParams {
        SplitterParams {
            l2_regularization: 0.0,
            min_hessian_to_split: 0.0,
            min_samples_leaf: 1,
            min_gain_to_split: 0.0,
        }
    }

    #[test]
    fn test_evaluator_picks_larger_gain_boundary() {
        // 6 samples, 1 feature, bin codes [0,0,1,1,2,2],
        // gradients [-1,-1,1,1,2,2], all hessians 1.
        let binned: Vec<u16> = vec![0, 0, 1, 1, 2, 2];
        let gradients: Vec<f32> = vec![-1.0, -1.0, 1.0, 1.0, 2.0, 2.0];
        let hessians: Vec<f32> = vec![1.0; 6];
        let matrix = Matrix::new(&binned, 6, 1);
        let mut ctx = SplittingContext::new(matrix, 3, vec![3], &gradients, &hessians, false, loose_params()).unwrap();

        let pool = pool(1);
        let mut hist_owned = NodeHistogramOwned::empty(3, 1);
        let hist = NodeHistogram::from_owned(&mut hist_owned);
        let split = ctx.find_node_split(0, 6, &hist, &pool);

        // boundary after bin 0: left g=-2 h=2, right g=6 h=4
        let gain_bin0 = split_gain(-2.0, 2.0, 6.0, 4.0, 4.0, 6.0, 0.0);
        // boundary after bin 1: left g=0 h=4, right g=4 h=2
        let gain_bin1 = split_gain(0.0, 4.0, 4.0, 2.0, 4.0, 6.0, 0.0);
        assert!(gain_bin0 > gain_bin1);

        assert!(split.is_valid());
        assert_eq!(split.feature_idx, 0);
        assert_eq!(split.bin_idx, 0);
        assert_relative_eq!(split.gain, gain_bin0);
        assert_relative_eq!(split.gradient_left, -2.0);
        assert_relative_eq!(split.hessian_left, 2.0);
        assert_eq!(split.n_samples_left, 2);
        assert_eq!(split.n_samples_right, 4);
    }

    #[test]
    fn test_constant_hessian_matches_explicit_hessians() {
        let binned: Vec<u16> = vec![0, 1, 2, 3];
        let gradients: Vec<f32> = vec![-2.0, -1.0, 1.0, 2.5];
        let matrix = Matrix::new(&binned, 4, 1);
        let pool = pool(1);

        let constant = vec![0.5f32];
        let mut ctx_const =
            SplittingContext::new(matrix, 4, vec![4], &gradients, &constant, true, loose_params()).unwrap();
        let mut hist_owned = NodeHistogramOwned::empty(4, 1);
        let hist = NodeHistogram::from_owned(&mut hist_owned);
        let split_const = ctx_const.find_node_split(0, 4, &hist, &pool);

        let explicit = vec![0.5f32; 4];
        let matrix = Matrix::new(&binned, 4, 1);
        let mut ctx_var =
            SplittingContext::new(matrix, 4, vec![4], &gradients, &explicit, false, loose_params()).unwrap();
        let mut hist_owned = NodeHistogramOwned::empty(4, 1);
        let hist = NodeHistogram::from_owned(&mut hist_owned);
        let split_var = ctx_var.find_node_split(0, 4, &hist, &pool);

        assert_eq!(split_const.bin_idx, split_var.bin_idx);
        assert_relative_eq!(split_const.gain, split_var.gain, epsilon = 1e-12);
        // sum_hessian per side must equal count * 0.5 in both modes
        assert_relative_eq!(split_const.hessian_left, split_const.n_samples_left as f64 * 0.5);
        assert_relative_eq!(split_const.hessian_left, split_var.hessian_left, epsilon = 1e-12);
        assert_relative_eq!(split_const.hessian_right, split_var.hessian_right, epsilon = 1e-12);
    }

    #[test]
    fn test_min_samples_leaf_rejects_all_boundaries() {
        // One sample per bin; min_samples_leaf of 3 leaves no boundary with
        // both sides large enough.
        let binned: Vec<u16> = vec![0, 1, 2, 3];
        let gradients: Vec<f32> = vec![-5.0, -1.0, 1.0, 5.0];
        let hessians: Vec<f32> = vec![1.0; 4];
        let matrix = Matrix::new(&binned, 4, 1);
        let params = SplitterParams {
            min_samples_leaf: 3,
            min_hessian_to_split: 0.0,
            ..SplitterParams::default()
        };
        let mut ctx = SplittingContext::new(matrix, 4, vec![4], &gradients, &hessians, false, params).unwrap();

        let pool = pool(1);
        let mut hist_owned = NodeHistogramOwned::empty(4, 1);
        let hist = NodeHistogram::from_owned(&mut hist_owned);
        let split = ctx.find_node_split(0, 4, &hist, &pool);
        assert!(!split.is_valid());
        assert_relative_eq!(split.gain, -1.0);
    }

    #[test]
    fn test_min_hessian_break_on_right_side() {
        // Hessian mass concentrated in the low bins: once the right side
        // falls below the threshold the sweep stops, so only the sentinel
        // or an early boundary can be returned.
        let binned: Vec<u16> = vec![0, 0, 1, 2];
        let gradients: Vec<f32> = vec![-1.0, 1.0, 2.0, -2.0];
        let hessians: Vec<f32> = vec![4.0, 4.0, 0.05, 0.05];
        let matrix = Matrix::new(&binned, 4, 1);
        let params = SplitterParams {
            min_samples_leaf: 1,
            min_hessian_to_split: 1.0,
            ..SplitterParams::default()
        };
        let mut ctx = SplittingContext::new(matrix, 3, vec![3], &gradients, &hessians, false, params).unwrap();

        let pool = pool(1);
        let mut hist_owned = NodeHistogramOwned::empty(3, 1);
        let hist = NodeHistogram::from_owned(&mut hist_owned);
        let split = ctx.find_node_split(0, 4, &hist, &pool);
        // right hessian after bin 0 is 0.1 < 1.0, so no boundary qualifies
        assert!(!split.is_valid());
    }

    #[test]
    fn test_selector_prefers_first_feature_on_ties() {
        // Two identical features produce identical best gains; the linear
        // scan with strict `>` must keep the lower feature index.
        let binned: Vec<u16> = vec![0, 0, 1, 1, 0, 0, 1, 1];
        let gradients: Vec<f32> = vec![-3.0, -3.0, 3.0, 3.0];
        let hessians: Vec<f32> = vec![1.0; 4];
        let matrix = Matrix::new(&binned, 4, 2);
        let mut ctx = SplittingContext::new(matrix, 2, vec![2, 2], &gradients, &hessians, false, loose_params()).unwrap();

        let pool = pool(2);
        let mut hist_owned = NodeHistogramOwned::empty(2, 2);
        let hist = NodeHistogram::from_owned(&mut hist_owned);
        let split = ctx.find_node_split(0, 4, &hist, &pool);
        assert!(split.is_valid());
        assert_eq!(split.feature_idx, 0);
    }

    #[test]
    fn test_subtraction_split_matches_from_scratch() {
        // Split the root, then find the right child's split both ways.
        let binned: Vec<u16> = vec![0, 0, 1, 1, 2, 2, 3, 3, 0, 1, 2, 3, 1, 0, 3, 2];
        let gradients: Vec<f32> = vec![-2.0, -1.5, 1.0, 2.0, 0.5, -0.5, 3.0, 1.5];
        let hessians: Vec<f32> = vec![1.0, 0.5, 0.75, 1.25, 0.6, 0.9, 1.1, 0.4];
        let matrix = Matrix::new(&binned, 8, 2);
        let mut ctx = SplittingContext::new(matrix, 4, vec![4, 4], &gradients, &hessians, false, loose_params()).unwrap();
        let pool = pool(2);

        let mut parent_owned = NodeHistogramOwned::empty(4, 2);
        let parent = NodeHistogram::from_owned(&mut parent_owned);
        let root_split = ctx.find_node_split(0, 8, &parent, &pool);
        assert!(root_split.is_valid());

        let (_, _, right_start) = ctx.split_indices(&root_split, 0, 8, &pool);

        let mut left_owned = NodeHistogramOwned::empty(4, 2);
        let left_hist = NodeHistogram::from_owned(&mut left_owned);
        ctx.find_node_split(0, right_start, &left_hist, &pool);

        let mut sub_owned = NodeHistogramOwned::empty(4, 2);
        let sub_hist = NodeHistogram::from_owned(&mut sub_owned);
        let by_subtraction = ctx.find_node_split_subtraction(right_start, 8, &parent, &left_hist, &sub_hist, &pool);

        let mut scratch_owned = NodeHistogramOwned::empty(4, 2);
        let scratch_hist = NodeHistogram::from_owned(&mut scratch_owned);
        let from_scratch = ctx.find_node_split(right_start, 8, &scratch_hist, &pool);

        assert_eq!(by_subtraction.feature_idx, from_scratch.feature_idx);
        assert_eq!(by_subtraction.bin_idx, from_scratch.bin_idx);
        assert_relative_eq!(by_subtraction.gain, from_scratch.gain, epsilon = 1e-9);
        assert_eq!(by_subtraction.n_samples_left, from_scratch.n_samples_left);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let binned: Vec<u16> = vec![0, 1];
        let gradients: Vec<f32> = vec![0.0, 0.0];
        let hessians: Vec<f32> = vec![1.0, 1.0];

        let params = SplitterParams {
            min_samples_leaf: 0,
            ..SplitterParams::default()
        };
        let matrix = Matrix::new(&binned, 2, 1);
        assert!(SplittingContext::new(matrix, 2, vec![2], &gradients, &hessians, false, params).is_err());

        let params = SplitterParams {
            l2_regularization: -1.0,
            ..SplitterParams::default()
        };
        let matrix = Matrix::new(&binned, 2, 1);
        assert!(SplittingContext::new(matrix, 2, vec![2], &gradients, &hessians, false, params).is_err());

        // hessian slice must be length 1 in constant mode
        let matrix = Matrix::new(&binned, 2, 1);
        assert!(
            SplittingContext::new(matrix, 2, vec![2], &gradients, &hessians, true, SplitterParams::default()).is_err()
        );

        // per-feature bin count above max_bins
        let matrix = Matrix::new(&binned, 2, 1);
        assert!(
            SplittingContext::new(matrix, 2, vec![3], &gradients, &hessians, false, SplitterParams::default()).is_err()
        );
    }
}
