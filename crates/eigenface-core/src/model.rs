use crate::normalize;
use crate::subspace::Subspace;
use crate::trainer::MIN_TRAINING_FACES;
use crate::types::{FaceGeometry, IdentityId};
use chrono::{DateTime, Utc};
use image::GrayImage;
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

/// A model field whose size disagrees with the rest of the model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{field}` is {rows}x{cols}, expected {expected}")]
pub struct ShapeError {
    pub field: &'static str,
    pub rows: usize,
    pub cols: usize,
    pub expected: String,
}

impl ShapeError {
    fn new(field: &'static str, (rows, cols): (usize, usize), expected: impl Into<String>) -> Self {
        Self {
            field,
            rows,
            cols,
            expected: expected.into(),
        }
    }
}

/// A fitted Eigenfaces model.
///
/// Read-only once built: the trainer hands it to the store and the
/// recognizer, and a reload replaces it as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenModel {
    /// Raster size every face is normalized to before projection.
    pub geometry: FaceGeometry,
    pub subspace: Subspace,
    /// `nFaces × K` projections of the training faces, in catalog order.
    pub projections: Array2<f32>,
    /// Identity of each projection row.
    pub labels: Vec<IdentityId>,
    pub trained_at: Option<DateTime<Utc>>,
}

impl EigenModel {
    /// Number of training faces.
    pub fn n_faces(&self) -> usize {
        self.labels.len()
    }

    /// Number of eigenfaces `K`.
    pub fn n_eigens(&self) -> usize {
        self.subspace.components()
    }

    pub fn mean(&self) -> &Array1<f32> {
        &self.subspace.mean
    }

    pub fn basis(&self) -> &Array2<f32> {
        &self.subspace.basis
    }

    pub fn eigenvalues(&self) -> &Array1<f32> {
        &self.subspace.eigenvalues
    }

    /// Projection of training row `row`.
    pub fn training_projection(&self, row: usize) -> ArrayView1<'_, f32> {
        self.projections.row(row)
    }

    /// Project an already-normalized face of exactly `self.geometry`.
    pub fn project_normalized(&self, face: &GrayImage) -> Array1<f32> {
        let row = Array1::from_vec(normalize::flatten(face));
        self.subspace.project(row.view())
    }

    /// Normalize an arbitrary grayscale face to the model geometry and project it.
    pub fn project(&self, face: &GrayImage) -> Array1<f32> {
        self.project_normalized(&normalize::normalize(face, self.geometry))
    }

    /// Check the invariants of a trained model: non-empty geometry, at least
    /// two training faces, `K = nFaces - 1`, and every matrix sized to match.
    pub fn check_shapes(&self) -> Result<(), ShapeError> {
        let g = self.geometry;
        if g.is_degenerate() {
            return Err(ShapeError::new("faceSize", (g.height as usize, g.width as usize), "a non-empty face"));
        }
        let d = g.area();
        let k = self.n_eigens();
        let n = self.n_faces();

        if self.subspace.mean.len() != d {
            return Err(ShapeError::new("mean", (1, self.subspace.mean.len()), format!("1x{d}")));
        }
        if self.subspace.basis.ncols() != d {
            return Err(ShapeError::new("eigenvects", self.subspace.basis.dim(), format!("{k}x{d}")));
        }
        if self.subspace.eigenvalues.len() != k {
            return Err(ShapeError::new("eigenvals", (self.subspace.eigenvalues.len(), 1), format!("{k}x1")));
        }
        if self.projections.dim() != (n, k) {
            return Err(ShapeError::new("projectedTrainFaceMat", self.projections.dim(), format!("{n}x{k}")));
        }
        if n < MIN_TRAINING_FACES {
            return Err(ShapeError::new(
                "personNumTruthMat",
                (1, n),
                format!("at least {MIN_TRAINING_FACES} training faces"),
            ));
        }
        if k != n - 1 {
            return Err(ShapeError::new("eigenvects", self.subspace.basis.dim(), format!("{}x{d}", n - 1)));
        }
        Ok(())
    }
}
