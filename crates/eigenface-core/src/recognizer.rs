//! Nearest-neighbour recognition in the eigenface subspace.
//!
//! A probe is normalized to the model geometry, projected, and compared to
//! every training projection with an inverse-variance weighted distance:
//!
//! ```text
//! distSq(t) = Σ_i (probe[i] − train[t][i])² / eigenvalue[i]
//! ```
//!
//! Confidence is `1 − sqrt(leastDistSq) / sqrt(totDistSq / nFaces)`: close
//! to 1 when the best row is far nearer than the average row, below 0.5 for
//! probes unlike anything enrolled, and possibly negative.

use crate::model::EigenModel;
use crate::normalize;
use crate::store::{self, StoreError};
use crate::types::IdentityId;
use image::{DynamicImage, GrayImage};
use ndarray::{ArrayView1, Axis};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Below this confidence a match should be reported as an unknown person.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("no model loaded; train or load one first")]
    ModelNotLoaded,
    #[error("model has no training faces, or its labels and projections disagree")]
    EmptyGallery,
    #[error("can't load probe image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Outcome of scoring one probe against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Identity of the nearest training face.
    pub identity_id: IdentityId,
    /// Row of the nearest training face in the model.
    pub nearest_row: usize,
    pub confidence: f32,
    pub elapsed: Duration,
}

impl RecognitionResult {
    /// Whether the match clears `threshold` and can be trusted.
    pub fn is_known(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

/// Weighted squared distance between two projections.
///
/// Axes with a zero eigenvalue carry no variance and are skipped.
pub fn weighted_distance_sq(
    probe: ArrayView1<'_, f32>,
    train: ArrayView1<'_, f32>,
    eigenvalues: ArrayView1<'_, f32>,
) -> f64 {
    let mut dist_sq = 0.0f64;
    for ((p, t), &lambda) in probe.iter().zip(train.iter()).zip(eigenvalues.iter()) {
        if lambda <= 0.0 {
            continue;
        }
        let d = (p - t) as f64;
        dist_sq += d * d / lambda as f64;
    }
    dist_sq
}

/// Confidence from the nearest and summed squared distances over `n_faces` rows.
///
/// When every row is at distance zero (a gallery of identical faces) the
/// nearest row is an exact match and confidence is 1.
pub fn confidence(least_dist_sq: f64, total_dist_sq: f64, n_faces: usize) -> f32 {
    let avg_dist = (total_dist_sq / n_faces as f64).sqrt();
    if avg_dist == 0.0 {
        return 1.0;
    }
    (1.0 - least_dist_sq.sqrt() / avg_dist) as f32
}

/// Score a grayscale probe of any size against `model`.
pub fn recognize_gray(probe: &GrayImage, model: &EigenModel) -> Result<RecognitionResult, RecognitionError> {
    if model.n_faces() == 0 || model.projections.nrows() != model.n_faces() {
        return Err(RecognitionError::EmptyGallery);
    }

    let started = Instant::now();
    let projected = model.project(probe);

    let mut least_dist_sq = f64::MAX;
    let mut total_dist_sq = 0.0f64;
    let mut nearest_row = 0;

    for (row, train) in model.projections.axis_iter(Axis(0)).enumerate() {
        let dist_sq = weighted_distance_sq(projected.view(), train, model.eigenvalues().view());
        total_dist_sq += dist_sq;
        if dist_sq < least_dist_sq {
            least_dist_sq = dist_sq;
            nearest_row = row;
        }
    }

    Ok(RecognitionResult {
        identity_id: model.labels[nearest_row],
        nearest_row,
        confidence: confidence(least_dist_sq, total_dist_sq, model.n_faces()),
        elapsed: started.elapsed(),
    })
}

/// Score a decoded probe image (any color type) against `model`.
pub fn recognize(probe: &DynamicImage, model: &EigenModel) -> Result<RecognitionResult, RecognitionError> {
    recognize_gray(&normalize::to_gray(probe), model)
}

/// Holds the model used for recognition.
///
/// Recognition borrows the recognizer shared (`&self`); replacing the model
/// needs `&mut self`, so a swap can never overlap an in-flight recognition.
#[derive(Debug, Default)]
pub struct Recognizer {
    model: Option<EigenModel>,
}

impl Recognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: EigenModel) -> Self {
        Self { model: Some(model) }
    }

    /// Load a stored model, replacing the current one only on success.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let model = store::load(path)?;
        self.model = Some(model);
        Ok(())
    }

    /// Install `model`, returning the one it replaces.
    pub fn set_model(&mut self, model: EigenModel) -> Option<EigenModel> {
        self.model.replace(model)
    }

    pub fn model(&self) -> Option<&EigenModel> {
        self.model.as_ref()
    }

    pub fn recognize(&self, probe: &DynamicImage) -> Result<RecognitionResult, RecognitionError> {
        let model = self.model.as_ref().ok_or(RecognitionError::ModelNotLoaded)?;
        recognize(probe, model)
    }

    pub fn recognize_gray(&self, probe: &GrayImage) -> Result<RecognitionResult, RecognitionError> {
        let model = self.model.as_ref().ok_or(RecognitionError::ModelNotLoaded)?;
        recognize_gray(probe, model)
    }

    /// Decode an image file and recognize it.
    pub fn recognize_path(&self, path: impl AsRef<Path>) -> Result<RecognitionResult, RecognitionError> {
        let model = self.model.as_ref().ok_or(RecognitionError::ModelNotLoaded)?;
        let path = path.as_ref();
        let probe = normalize::load_gray(path).map_err(|source| RecognitionError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        recognize_gray(&probe, model)
    }
}
