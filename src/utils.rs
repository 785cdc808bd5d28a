//! Utils
//!
//! Gain arithmetic and summation helpers shared by the split evaluator
//! and the node orchestration, plus parameter validation.
use crate::errors::SplitError;

// Validation
pub fn validate_positive_float_parameter(value: f64, parameter: &str) -> Result<(), SplitError> {
    validate_float_parameter(value, 0.0, f64::INFINITY, parameter)
}
pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), SplitError> {
    if value.is_nan() || value < min || max < value {
        let ex_msg = format!("real value within range {} and {}", min, max);
        Err(SplitError::InvalidParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Half of the negative loss of a node, given the sum of the gradients
/// and hessians of the samples it holds. Larger is better.
///
/// Precondition: `hessian_sum` is non-negative (convex loss).
#[inline]
pub fn negative_loss(gradient_sum: f64, hessian_sum: f64, l2_regularization: f64) -> f64 {
    (gradient_sum * gradient_sum) / (hessian_sum + l2_regularization)
}

/// Reduction in loss obtained by splitting a node into the given left and
/// right children, per the regularized gain formula.
#[allow(clippy::too_many_arguments)]
#[inline]
pub fn split_gain(
    gradient_left: f64,
    hessian_left: f64,
    gradient_right: f64,
    hessian_right: f64,
    sum_gradients: f64,
    sum_hessians: f64,
    l2_regularization: f64,
) -> f64 {
    negative_loss(gradient_left, hessian_left, l2_regularization)
        + negative_loss(gradient_right, hessian_right, l2_regularization)
        - negative_loss(sum_gradients, sum_hessians, l2_regularization)
}

const LANES: usize = 16;

/// Fast summation of an f32 slice, using f64 as the internal representation
/// so that node level sums do not drift from the f64 histogram accumulators.
/// Lane-folded, ends up being roughly 8 to 10 times faster than
/// values.iter().copied().sum().
#[inline]
pub fn fast_f64_sum(values: &[f32]) -> f64 {
    let chunks = values.chunks_exact(LANES);
    let remainder = chunks.remainder();

    let sum = chunks.fold([0.0_f64; LANES], |mut acc, chunk| {
        let chunk: [f32; LANES] = chunk.try_into().unwrap();
        for i in 0..LANES {
            acc[i] += f64::from(chunk[i]);
        }
        acc
    });

    let remainder: f64 = remainder.iter().fold(0.0_f64, |acc, b| acc + f64::from(*b));

    let mut reduced: f64 = 0.;
    for s in sum.iter().take(LANES) {
        reduced += *s;
    }
    reduced + remainder
}
