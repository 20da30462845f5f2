//! Principal-component subspace over row-stacked samples.
//!
//! With far fewer samples than pixels (`N << D`) the `D×D` covariance is
//! never formed. The eigenproblem is solved on the `N×N` Gram matrix of the
//! centered rows and each eigenvector `v` is lifted back to pixel space as
//! `Aᵀv / |Aᵀv|`. Covariance is scaled by `1/N`, so eigenvalues are the
//! variance of the samples along each direction.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Eigenvalues at or below `largest * RANK_TOLERANCE` are numerical noise.
const RANK_TOLERANCE: f64 = 1e-9;

/// Mean, ordered basis and per-axis variance of a fitted subspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Subspace {
    /// Mean sample, length `D`.
    pub mean: Array1<f32>,
    /// `K × D`, one unit-length direction per row, by descending variance.
    pub basis: Array2<f32>,
    /// Length `K`, non-increasing. Zero for directions the data does not span.
    pub eigenvalues: Array1<f32>,
}

impl Subspace {
    /// Fit `components` principal directions to the rows of `data` (`N × D`).
    ///
    /// At most `N` components are returned. When the centered rows span fewer
    /// than `components` dimensions the trailing basis rows and eigenvalues are
    /// zero.
    pub fn fit(data: &Array2<f32>, components: usize) -> Self {
        let (n, d) = data.dim();
        let components = components.min(n);

        let data = data.mapv(f64::from);
        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let centered = &data - &mean;

        let gram = centered.dot(&centered.t()) / n.max(1) as f64;
        let eig = SymmetricEigen::new(DMatrix::from_fn(n, n, |i, j| gram[[i, j]]));

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

        let largest = order
            .first()
            .map(|&i| eig.eigenvalues[i])
            .unwrap_or(0.0)
            .max(0.0);
        let tolerance = largest * RANK_TOLERANCE;

        let mut basis = Array2::<f32>::zeros((components, d));
        let mut eigenvalues = Array1::<f32>::zeros(components);

        for (k, &idx) in order.iter().take(components).enumerate() {
            let lambda = eig.eigenvalues[idx];
            if lambda <= tolerance {
                continue;
            }

            let v = Array1::from_iter(eig.eigenvectors.column(idx).iter().copied());
            let lifted = centered.t().dot(&v);
            let norm = lifted.dot(&lifted).sqrt();
            if norm <= 0.0 {
                continue;
            }

            basis.row_mut(k).assign(&lifted.mapv(|x| (x / norm) as f32));
            eigenvalues[k] = lambda as f32;
        }

        let rank = eigenvalues.iter().filter(|&&l| l > 0.0).count();
        tracing::debug!(samples = n, dims = d, components, rank, "fitted subspace");

        Self {
            mean: mean.mapv(|x| x as f32),
            basis,
            eigenvalues,
        }
    }

    /// Number of basis vectors `K`.
    pub fn components(&self) -> usize {
        self.basis.nrows()
    }

    /// Sample dimensionality `D`.
    pub fn dims(&self) -> usize {
        self.mean.len()
    }

    /// Coordinates of `row` in the subspace: `basis · (row − mean)`.
    pub fn project(&self, row: ArrayView1<f32>) -> Array1<f32> {
        let centered = &row - &self.mean;
        self.basis.dot(&centered)
    }
}
