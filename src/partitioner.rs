//! Partitioner
//!
//! Reorders a node's slice of the sample partition array into contiguous
//! left/right runs after a split has been chosen. The reorder is stable in
//! the sense that every sample lands on exactly the correct side; order
//! within a side is unconstrained.
//!
//! The parallel strategy is scatter-then-compact: each worker scans one
//! contiguous chunk of the slice, writing matching samples into its own
//! regions of the context's left/right scratch buffers, then a sequential
//! prefix sum over the per-chunk counts assigns every worker a disjoint
//! destination range, and the workers copy their scratch back. No write is
//! ever shared between workers, and a one-thread pool runs the identical
//! code as the degenerate single-chunk case.
use crate::constants::PARALLEL_SAMPLE_THRESHOLD;
use crate::splitter::{SplitInfo, SplittingContext};
use rayon::ThreadPool;
use std::mem;

impl<'a> SplittingContext<'a> {
    /// Reorder `partition[start..stop]` so that samples with
    /// `bin_code <= split_info.bin_idx` on the split feature form the
    /// leading run. Returns the left and right views and the right child's
    /// start offset within the slice.
    pub fn split_indices(
        &mut self,
        split_info: &SplitInfo,
        start: usize,
        stop: usize,
        pool: &ThreadPool,
    ) -> (&[usize], &[usize], usize) {
        let binned_col = self.binned.get_col(split_info.feature_idx);
        let bin_idx = split_info.bin_idx;

        let n = stop - start;
        // Static chunking: equal sizes, remainder spread over the first chunks.
        let n_chunks = if n >= PARALLEL_SAMPLE_THRESHOLD {
            pool.current_num_threads().clamp(1, n)
        } else {
            1
        };
        let base = n / n_chunks;
        let rem = n % n_chunks;
        let sizes: Vec<usize> = (0..n_chunks).map(|i| base + usize::from(i < rem)).collect();

        let mut left_counts = vec![0usize; n_chunks];
        let mut right_counts = vec![0usize; n_chunks];

        // Pass 1: scatter each chunk into its own scratch regions.
        {
            let mut idx_rest: &[usize] = &self.partition[start..stop];
            let mut left_rest: &mut [usize] = &mut self.left_buffer[start..stop];
            let mut right_rest: &mut [usize] = &mut self.right_buffer[start..stop];
            let mut tasks = Vec::with_capacity(n_chunks);
            for &size in &sizes {
                let (idx_chunk, idx_tail) = idx_rest.split_at(size);
                let (left_chunk, left_tail) = mem::take(&mut left_rest).split_at_mut(size);
                let (right_chunk, right_tail) = mem::take(&mut right_rest).split_at_mut(size);
                idx_rest = idx_tail;
                left_rest = left_tail;
                right_rest = right_tail;
                tasks.push((idx_chunk, left_chunk, right_chunk));
            }

            pool.scope(|s| {
                for (((idx_chunk, left_chunk, right_chunk), left_count), right_count) in
                    tasks.into_iter().zip(left_counts.iter_mut()).zip(right_counts.iter_mut())
                {
                    s.spawn(move |_| {
                        let mut n_left = 0;
                        let mut n_right = 0;
                        for &sample in idx_chunk {
                            if binned_col[sample] <= bin_idx {
                                left_chunk[n_left] = sample;
                                n_left += 1;
                            } else {
                                right_chunk[n_right] = sample;
                                n_right += 1;
                            }
                        }
                        *left_count = n_left;
                        *right_count = n_right;
                    });
                }
            });
        }

        // Sequential prefix sum: summing the per-chunk counts in chunk order
        // fixes every chunk's disjoint destination range.
        let total_left: usize = left_counts.iter().sum();

        // Pass 2: compact the scratch regions back into the slice.
        {
            let (left_region, right_region) = self.partition[start..stop].split_at_mut(total_left);
            let mut left_dest_rest = left_region;
            let mut right_dest_rest = right_region;
            let mut left_src_rest: &[usize] = &self.left_buffer[start..stop];
            let mut right_src_rest: &[usize] = &self.right_buffer[start..stop];

            pool.scope(|s| {
                for chunk in 0..n_chunks {
                    let (left_dest, left_dest_tail) =
                        mem::take(&mut left_dest_rest).split_at_mut(left_counts[chunk]);
                    let (right_dest, right_dest_tail) =
                        mem::take(&mut right_dest_rest).split_at_mut(right_counts[chunk]);
                    left_dest_rest = left_dest_tail;
                    right_dest_rest = right_dest_tail;
                    let (left_src, left_src_tail) = left_src_rest.split_at(sizes[chunk]);
                    let (right_src, right_src_tail) = right_src_rest.split_at(sizes[chunk]);
                    left_src_rest = left_src_tail;
                    right_src_rest = right_src_tail;

                    s.spawn(move |_| {
                        left_dest.copy_from_slice(&left_src[..left_dest.len()]);
                        right_dest.copy_from_slice(&right_src[..right_dest.len()]);
                    });
                }
            });
        }

        let (left_view, right_view) = self.partition[start..stop].split_at(total_left);
        (left_view, right_view, total_left)
    }
}
