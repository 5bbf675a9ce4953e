//! Unbiased moment estimators over the draws of a chain.
//!
//! Every function takes draws as rows and dimensions as columns and divides by `n - 1`.
//! Callers are expected to pass at least two rows; `ChainStore` enforces this.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Column-wise mean of `values` [n, d].
pub fn column_means(values: ArrayView2<f64>) -> Array1<f64> {
    let n = values.nrows() as f64;
    values.sum_axis(Axis(0)) / n
}

/// Subtracts `means` from every row. The same means are used for every draw.
pub fn center(values: ArrayView2<f64>, means: ArrayView1<f64>) -> Array2<f64> {
    &values - &means.insert_axis(Axis(0))
}

/// Unbiased d×d covariance of already-centered draws: Xcᵀ Xc / (n - 1).
pub fn covariance_of_centered(centered: ArrayView2<f64>) -> Array2<f64> {
    let denom = (centered.nrows() - 1) as f64;
    centered.t().dot(&centered) / denom
}

/// Vector whose k-th entry is the unbiased covariance between `column` and the k-th column
/// of `centered_other`.
///
/// `column` is centered here with the supplied `column_mean`; `centered_other` must already
/// be centered with its own fixed means.
pub fn cross_covariance(
    column: ArrayView1<f64>,
    column_mean: f64,
    centered_other: ArrayView2<f64>,
) -> Array1<f64> {
    let denom = (centered_other.nrows() - 1) as f64;
    let centered_column = column.mapv(|v| v - column_mean);
    centered_other.t().dot(&centered_column) / denom
}

/// Unbiased variance of each column.
pub fn column_variances(values: ArrayView2<f64>) -> Array1<f64> {
    let means = column_means(values);
    let denom = (values.nrows() - 1) as f64;
    let mut variances = Array1::<f64>::zeros(values.ncols());
    for (j, column) in values.axis_iter(Axis(1)).enumerate() {
        let mean = means[j];
        variances[j] = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / denom;
    }
    variances
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample_covariance(values: ArrayView2<f64>) -> Array2<f64> {
        let means = column_means(values);
        let centered = center(values, means.view());
        covariance_of_centered(centered.view())
    }

    #[test]
    fn test_column_means() {
        let values = array![[1.0, 10.0], [3.0, 20.0], [5.0, 30.0]];
        let means = column_means(values.view());
        assert_abs_diff_eq!(means[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(means[1], 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_covariance_matches_hand_computation() {
        // x = [1, 2, 3, 4], y = [2, 4, 6, 9]
        let values = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 9.0]];
        let cov = sample_covariance(values.view());

        // var(x) = 5/3, cov(x, y) = 11/3, var(y) = 73/3 with divisor n - 1
        assert_abs_diff_eq!(cov[[0, 0]], 5.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 1]], 11.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 0]], 11.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 1]], 73.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cross_covariance_matches_joint_covariance() {
        let beta = array![[0.5, 1.0], [1.5, -2.0], [-0.5, 0.0], [2.5, 3.0]];
        let grad = array![[1.0, 0.0], [0.0, 2.0], [-1.0, 1.0], [3.0, -1.0]];

        let grad_means = column_means(grad.view());
        let grad_centered = center(grad.view(), grad_means.view());
        let beta_means = column_means(beta.view());

        let joint = ndarray::concatenate(Axis(1), &[beta.view(), grad.view()]).unwrap();
        let full = sample_covariance(joint.view());

        for j in 0..2 {
            let cross = cross_covariance(beta.column(j), beta_means[j], grad_centered.view());
            for k in 0..2 {
                assert_abs_diff_eq!(cross[k], full[[j, 2 + k]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_column_variances_match_covariance_diagonal() {
        let values = array![[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [3.0, 6.0, 0.0], [4.0, 9.0, 0.0]];
        let variances = column_variances(values.view());
        let cov = sample_covariance(values.view());
        for j in 0..3 {
            assert_abs_diff_eq!(variances[j], cov[[j, j]], epsilon = 1e-12);
        }
        assert_eq!(variances[2], 0.0);
    }
}
