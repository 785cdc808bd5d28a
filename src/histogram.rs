//! Histogram
//!
//! Efficient histogram calculations for finding optimal splits.
//! Histograms store aggregated gradient and hessian statistics for each bin.
//!
//! A node's histograms can be populated two ways: scanned from the binned
//! data (four variants, selected by root/non-root and constant/variable
//! hessians), or derived in O(bins) as `parent - sibling` when both of those
//! are already available.
use crate::constants::PARALLEL_SAMPLE_THRESHOLD;
use crate::data::Matrix;
use hashbrown::HashMap;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;

/// Aggregated statistics of a single (feature, bin) cell.
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Bin {
    /// Number of samples whose code for this feature falls in this bin.
    pub count: u32,
    /// Sum of the gradients of those samples.
    pub sum_gradients: f64,
    /// Sum of the hessians of those samples. Left at zero by the
    /// constant-hessian scans; derived as `count * constant` downstream.
    pub sum_hessians: f64,
}

/// Owned Feature Histogram.
#[derive(Debug)]
pub struct FeatureHistogramOwned {
    /// The histogram data (bins).
    pub data: Vec<Bin>,
}

impl FeatureHistogramOwned {
    /// Create an empty histogram with `n_bins` zeroed bins.
    pub fn empty(n_bins: usize) -> Self {
        FeatureHistogramOwned {
            data: vec![Bin::default(); n_bins],
        }
    }
}

/// Feature Histogram using UnsafeCell for concurrent mutation.
///
/// Each feature's histogram is written by exactly one worker during the
/// parallel build, so the cells are never aliased mutably across threads.
#[derive(Copy, Clone, Debug)]
pub struct FeatureHistogram<'a> {
    /// Reference to the histogram data.
    pub data: &'a [UnsafeCell<Bin>],
}

unsafe impl<'a> Send for FeatureHistogram<'a> {}
unsafe impl<'a> Sync for FeatureHistogram<'a> {}

impl<'a> FeatureHistogram<'a> {
    /// Create a new FeatureHistogram from a mutable slice of bins.
    pub fn new(hist: &'a mut [Bin]) -> Self {
        let ptr = hist as *mut [Bin] as *const [UnsafeCell<Bin>];
        Self { data: unsafe { &*ptr } }
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.data.len()
    }

    /// Read a bin out of the histogram.
    ///
    /// # Safety
    /// No build may be running against this histogram on another thread.
    pub unsafe fn get(&self, bin: usize) -> Bin {
        *self.data[bin].get().as_ref().unwrap()
    }

    unsafe fn reset(&self) {
        self.data.iter().for_each(|b| {
            *b.get().as_mut().unwrap_unchecked() = Bin::default();
        });
    }

    /// Populate the histogram from a non-root node's samples, gathering
    /// each sample's bin code through the node's index slice.
    ///
    /// `ordered_gradients` and `ordered_hessians` are the node-local
    /// permutations of the gradient/hessian arrays: entry `k` belongs to
    /// sample `sample_indices[k]`.
    ///
    /// # Safety
    /// The caller must ensure the following:
    /// 1. Every element of `sample_indices` is within bounds of `binned_col`.
    /// 2. `ordered_gradients` and `ordered_hessians` are at least as long as
    ///    `sample_indices`.
    /// 3. Every bin code in `binned_col` is a valid index into the histogram.
    /// 4. No other thread reads or writes this histogram while the scan runs.
    pub unsafe fn build(
        &self,
        binned_col: &[u16],
        ordered_gradients: &[f32],
        ordered_hessians: &[f32],
        sample_indices: &[usize],
    ) {
        self.reset();
        let n = sample_indices.len();
        let unrolled = n - n % 4;

        let mut k = 0;
        while k < unrolled {
            let b0 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k)) as usize;
            let b1 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k + 1)) as usize;
            let b2 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k + 2)) as usize;
            let b3 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k + 3)) as usize;

            self.accumulate(b0, *ordered_gradients.get_unchecked(k), *ordered_hessians.get_unchecked(k));
            self.accumulate(
                b1,
                *ordered_gradients.get_unchecked(k + 1),
                *ordered_hessians.get_unchecked(k + 1),
            );
            self.accumulate(
                b2,
                *ordered_gradients.get_unchecked(k + 2),
                *ordered_hessians.get_unchecked(k + 2),
            );
            self.accumulate(
                b3,
                *ordered_gradients.get_unchecked(k + 3),
                *ordered_hessians.get_unchecked(k + 3),
            );
            k += 4;
        }
        while k < n {
            let b = *binned_col.get_unchecked(*sample_indices.get_unchecked(k)) as usize;
            self.accumulate(b, *ordered_gradients.get_unchecked(k), *ordered_hessians.get_unchecked(k));
            k += 1;
        }
    }

    /// Populate the histogram from a non-root node's samples when hessians
    /// are constant. `sum_hessians` is left at zero; per-bin hessian sums
    /// are `count * constant_hessian_value`, so accumulating them per sample
    /// would only double the memory traffic of the scan.
    ///
    /// # Safety
    /// Same requirements as [`FeatureHistogram::build`], minus the hessians.
    pub unsafe fn build_no_hessian(&self, binned_col: &[u16], ordered_gradients: &[f32], sample_indices: &[usize]) {
        self.reset();
        let n = sample_indices.len();
        let unrolled = n - n % 4;

        let mut k = 0;
        while k < unrolled {
            let b0 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k)) as usize;
            let b1 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k + 1)) as usize;
            let b2 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k + 2)) as usize;
            let b3 = *binned_col.get_unchecked(*sample_indices.get_unchecked(k + 3)) as usize;

            self.accumulate_no_hessian(b0, *ordered_gradients.get_unchecked(k));
            self.accumulate_no_hessian(b1, *ordered_gradients.get_unchecked(k + 1));
            self.accumulate_no_hessian(b2, *ordered_gradients.get_unchecked(k + 2));
            self.accumulate_no_hessian(b3, *ordered_gradients.get_unchecked(k + 3));
            k += 4;
        }
        while k < n {
            let b = *binned_col.get_unchecked(*sample_indices.get_unchecked(k)) as usize;
            self.accumulate_no_hessian(b, *ordered_gradients.get_unchecked(k));
            k += 1;
        }
    }

    /// Populate the histogram at the root, where the sample slice spans all
    /// samples in original order and the indirection through the index
    /// array can be skipped.
    ///
    /// # Safety
    /// 1. `gradients`, `hessians` and `binned_col` all have the same length.
    /// 2. Every bin code in `binned_col` is a valid index into the histogram.
    /// 3. No other thread reads or writes this histogram while the scan runs.
    pub unsafe fn build_root(&self, binned_col: &[u16], gradients: &[f32], hessians: &[f32]) {
        self.reset();
        let n = binned_col.len();
        let unrolled = n - n % 4;

        let mut i = 0;
        while i < unrolled {
            let b0 = *binned_col.get_unchecked(i) as usize;
            let b1 = *binned_col.get_unchecked(i + 1) as usize;
            let b2 = *binned_col.get_unchecked(i + 2) as usize;
            let b3 = *binned_col.get_unchecked(i + 3) as usize;

            self.accumulate(b0, *gradients.get_unchecked(i), *hessians.get_unchecked(i));
            self.accumulate(b1, *gradients.get_unchecked(i + 1), *hessians.get_unchecked(i + 1));
            self.accumulate(b2, *gradients.get_unchecked(i + 2), *hessians.get_unchecked(i + 2));
            self.accumulate(b3, *gradients.get_unchecked(i + 3), *hessians.get_unchecked(i + 3));
            i += 4;
        }
        while i < n {
            let b = *binned_col.get_unchecked(i) as usize;
            self.accumulate(b, *gradients.get_unchecked(i), *hessians.get_unchecked(i));
            i += 1;
        }
    }

    /// Root scan for constant hessians.
    ///
    /// # Safety
    /// Same requirements as [`FeatureHistogram::build_root`], minus the hessians.
    pub unsafe fn build_root_no_hessian(&self, binned_col: &[u16], gradients: &[f32]) {
        self.reset();
        let n = binned_col.len();
        let unrolled = n - n % 4;

        let mut i = 0;
        while i < unrolled {
            let b0 = *binned_col.get_unchecked(i) as usize;
            let b1 = *binned_col.get_unchecked(i + 1) as usize;
            let b2 = *binned_col.get_unchecked(i + 2) as usize;
            let b3 = *binned_col.get_unchecked(i + 3) as usize;

            self.accumulate_no_hessian(b0, *gradients.get_unchecked(i));
            self.accumulate_no_hessian(b1, *gradients.get_unchecked(i + 1));
            self.accumulate_no_hessian(b2, *gradients.get_unchecked(i + 2));
            self.accumulate_no_hessian(b3, *gradients.get_unchecked(i + 3));
            i += 4;
        }
        while i < n {
            let b = *binned_col.get_unchecked(i) as usize;
            self.accumulate_no_hessian(b, *gradients.get_unchecked(i));
            i += 1;
        }
    }

    /// Derive this histogram as `parent - sibling`, bin by bin. O(bins),
    /// replacing an O(samples) scan for the larger of two siblings.
    ///
    /// # Safety
    /// All three histograms must have the same number of bins, and no other
    /// thread may access any of them while the subtraction runs.
    pub unsafe fn subtract(&self, parent: &FeatureHistogram, sibling: &FeatureHistogram) {
        for ((out, p), s) in self.data.iter().zip(parent.data.iter()).zip(sibling.data.iter()) {
            let pb = p.get().as_ref().unwrap_unchecked();
            let sb = s.get().as_ref().unwrap_unchecked();
            let ob = out.get().as_mut().unwrap_unchecked();
            ob.count = pb.count - sb.count;
            ob.sum_gradients = pb.sum_gradients - sb.sum_gradients;
            ob.sum_hessians = pb.sum_hessians - sb.sum_hessians;
        }
    }

    #[inline(always)]
    unsafe fn accumulate(&self, bin: usize, gradient: f32, hessian: f32) {
        let b = self.data.get_unchecked(bin).get().as_mut().unwrap_unchecked();
        b.count += 1;
        b.sum_gradients += f64::from(gradient);
        b.sum_hessians += f64::from(hessian);
    }

    #[inline(always)]
    unsafe fn accumulate_no_hessian(&self, bin: usize, gradient: f32) {
        let b = self.data.get_unchecked(bin).get().as_mut().unwrap_unchecked();
        b.count += 1;
        b.sum_gradients += f64::from(gradient);
    }
}

/// Owned Node Histogram.
#[derive(Debug)]
pub struct NodeHistogramOwned {
    /// The histograms for each feature in the node.
    pub data: Vec<FeatureHistogramOwned>,
}

impl NodeHistogramOwned {
    /// Create an empty histogram matrix with `max_bins` bins per feature.
    /// Only the first `n_bins_per_feature[f]` bins of feature f are ever
    /// meaningful; the fixed shape keeps the per-node allocation a single
    /// predictable block.
    pub fn empty(max_bins: u16, n_features: usize) -> Self {
        let histograms: Vec<FeatureHistogramOwned> = (0..n_features)
            .map(|_| FeatureHistogramOwned::empty(max_bins as usize))
            .collect();
        NodeHistogramOwned { data: histograms }
    }
}

/// Node Histogram.
#[derive(Debug)]
pub struct NodeHistogram<'a> {
    /// The histograms for each feature in the node.
    pub data: Vec<FeatureHistogram<'a>>,
}

impl<'a> NodeHistogram<'a> {
    /// Create a NodeHistogram view from an owned one.
    pub fn from_owned(hist: &'a mut NodeHistogramOwned) -> NodeHistogram<'a> {
        let histograms = hist
            .data
            .iter_mut()
            .map(|f| FeatureHistogram::new(&mut f.data))
            .collect();
        NodeHistogram { data: histograms }
    }
}

/// Populate a node's histograms from the binned data, one feature per task.
///
/// `sample_indices` is the node's slice of the partition array, and
/// `ordered_gradients`/`ordered_hessians` are its node-local gradient and
/// hessian copies. At the root the index indirection is skipped entirely,
/// and with constant hessians the hessian accumulation is skipped.
#[allow(clippy::too_many_arguments)]
pub fn update_histograms(
    hist: &NodeHistogram,
    data: &Matrix<u16>,
    ordered_gradients: &[f32],
    ordered_hessians: &[f32],
    sample_indices: &[usize],
    is_root: bool,
    hessians_are_constant: bool,
    pool: &ThreadPool,
) {
    let n_samples = sample_indices.len();
    let build = |h: &FeatureHistogram, feature: &[u16]| unsafe {
        match (is_root, hessians_are_constant) {
            (true, true) => h.build_root_no_hessian(feature, ordered_gradients),
            (true, false) => h.build_root(feature, ordered_gradients, ordered_hessians),
            (false, true) => h.build_no_hessian(feature, ordered_gradients, sample_indices),
            (false, false) => h.build(feature, ordered_gradients, ordered_hessians, sample_indices),
        }
    };

    if pool.current_num_threads() > 1 && n_samples >= PARALLEL_SAMPLE_THRESHOLD {
        pool.scope(|s| {
            for (feature_idx, h) in hist.data.iter().enumerate() {
                let feature = data.get_col(feature_idx);
                s.spawn(move |_| build(h, feature));
            }
        });
    } else {
        for (feature_idx, h) in hist.data.iter().enumerate() {
            build(h, data.get_col(feature_idx));
        }
    }
}

/// Derive a node's histograms as `parent - sibling` for every feature.
pub fn subtract_histograms(hist: &NodeHistogram, parent: &NodeHistogram, sibling: &NodeHistogram, pool: &ThreadPool) {
    if pool.current_num_threads() > 1 {
        pool.scope(|s| {
            for ((h, p), sib) in hist.data.iter().zip(parent.data.iter()).zip(sibling.data.iter()) {
                s.spawn(move |_| unsafe { h.subtract(p, sib) });
            }
        });
    } else {
        for ((h, p), sib) in hist.data.iter().zip(parent.data.iter()).zip(sibling.data.iter()) {
            unsafe { h.subtract(p, sib) };
        }
    }
}

/// Cache of populated node histograms, keyed by node id.
///
/// The subtraction fast path needs a parent's histograms to stay alive until
/// both of its children have consumed them. The grower inserts a node's
/// histograms after splitting it and calls [`HistogramCache::mark_child_consumed`]
/// once per child; the entry is dropped on the second call.
#[derive(Default)]
pub struct HistogramCache {
    entries: HashMap<usize, CacheEntry>,
}

struct CacheEntry {
    histograms: NodeHistogramOwned,
    remaining_children: u8,
}

impl HistogramCache {
    pub fn new() -> Self {
        HistogramCache {
            entries: HashMap::new(),
        }
    }

    /// Store a split node's histograms for its two children to reuse.
    pub fn insert(&mut self, node_id: usize, histograms: NodeHistogramOwned) {
        self.entries.insert(
            node_id,
            CacheEntry {
                histograms,
                remaining_children: 2,
            },
        );
    }

    /// Borrow a cached node's histograms, if still alive.
    pub fn get_mut(&mut self, node_id: usize) -> Option<&mut NodeHistogramOwned> {
        self.entries.get_mut(&node_id).map(|e| &mut e.histograms)
    }

    /// Record that one child of `node_id` has consumed the parent's
    /// histograms. The entry is dropped once both children have.
    pub fn mark_child_consumed(&mut self, node_id: usize) {
        if let Some(entry) = self.entries.get_mut(&node_id) {
            entry.remaining_children -= 1;
            if entry.remaining_children == 0 {
                self.entries.remove(&node_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
