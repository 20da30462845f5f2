//! Eigenfaces training.
//!
//! Builds a [`EigenModel`] from every sample in the catalog. The whole fit
//! aborts on the first unreadable sample: row order and geometry must line
//! up exactly with the catalog, so a partial gallery is never produced.

use crate::catalog::{Catalog, CatalogError};
use crate::model::EigenModel;
use crate::normalize;
use crate::subspace::Subspace;
use crate::types::{FaceGeometry, LabeledFace};
use ndarray::Array2;
use std::path::PathBuf;
use thiserror::Error;

/// A subspace needs at least two points to have any variance.
pub const MIN_TRAINING_FACES: usize = 2;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("need at least 2 training faces, catalog has {found}")]
    InsufficientData { found: usize },
    #[error("can't load training image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("training face {row} has zero area ({geometry})")]
    DegenerateGeometry { row: usize, geometry: FaceGeometry },
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
}

/// Load every catalog sample and fit a model to it.
pub fn fit(catalog: &Catalog) -> Result<EigenModel, TrainingError> {
    let samples = catalog.list_samples()?;
    if samples.len() < MIN_TRAINING_FACES {
        return Err(TrainingError::InsufficientData {
            found: samples.len(),
        });
    }

    let mut faces = Vec::with_capacity(samples.len());
    for sample in samples {
        let image = normalize::load_gray(&sample.path).map_err(|source| {
            tracing::error!(path = %sample.path.display(), error = %source, "can't load training image");
            TrainingError::ImageLoad {
                path: sample.path.clone(),
                source,
            }
        })?;
        faces.push(LabeledFace {
            identity_id: sample.identity_id,
            image,
        });
    }
    tracing::info!(faces = faces.len(), "loaded training images");

    fit_faces(faces)
}

/// Fit a model to decoded faces, in the given row order.
///
/// The first face fixes the model geometry; every face, including the
/// first, is normalized to it exactly as probes will be.
pub fn fit_faces(faces: Vec<LabeledFace>) -> Result<EigenModel, TrainingError> {
    let n_faces = faces.len();
    if n_faces < MIN_TRAINING_FACES {
        return Err(TrainingError::InsufficientData { found: n_faces });
    }

    if let Some((row, face)) = faces
        .iter()
        .enumerate()
        .find(|(_, f)| FaceGeometry::of(&f.image).is_degenerate())
    {
        return Err(TrainingError::DegenerateGeometry {
            row,
            geometry: FaceGeometry::of(&face.image),
        });
    }

    let geometry = FaceGeometry::of(&faces[0].image);
    let dims = geometry.area();

    let mut data = Array2::<f32>::zeros((n_faces, dims));
    let mut labels = Vec::with_capacity(n_faces);
    for (i, face) in faces.iter().enumerate() {
        if FaceGeometry::of(&face.image) != geometry {
            tracing::debug!(
                row = i,
                from = %FaceGeometry::of(&face.image),
                to = %geometry,
                "resizing training face"
            );
        }
        let normalized = normalize::normalize(&face.image, geometry);
        for (dst, src) in data.row_mut(i).iter_mut().zip(normalized.as_raw()) {
            *dst = *src as f32;
        }
        labels.push(face.identity_id);
    }

    let n_eigens = n_faces - 1;
    tracing::info!(faces = n_faces, eigens = n_eigens, %geometry, "calculating eigenfaces");
    let subspace = Subspace::fit(&data, n_eigens);

    let mut projections = Array2::<f32>::zeros((n_faces, n_eigens));
    for (i, row) in data.rows().into_iter().enumerate() {
        projections.row_mut(i).assign(&subspace.project(row));
    }
    tracing::info!(faces = n_faces, "projected training faces");

    Ok(EigenModel {
        geometry,
        subspace,
        projections,
        labels,
        trained_at: Some(chrono::Utc::now()),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::IdentityId;
    use image::{GrayImage, Luma};

    /// Deterministic synthetic face: a pattern distinct per `seed`.
    pub(crate) fn synthetic_face(seed: u32, width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let v = (x * (seed + 3) + y * (2 * seed + 1) + seed * 37) % 251;
            let blob = if (x / 4 + y / 4 + seed) % 3 == 0 { 60 } else { 0 };
            Luma([((v + blob) % 256) as u8])
        })
    }

    pub(crate) fn labeled(seed: u32, id: i64) -> LabeledFace {
        LabeledFace {
            identity_id: IdentityId(id),
            image: synthetic_face(seed, 24, 20),
        }
    }

    #[test]
    fn test_zero_faces_insufficient() {
        let err = fit_faces(Vec::new()).unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData { found: 0 }));
    }

    #[test]
    fn test_one_face_insufficient() {
        let err = fit_faces(vec![labeled(1, 1)]).unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData { found: 1 }));
    }

    #[test]
    fn test_fit_shapes() {
        let faces = vec![labeled(1, 1), labeled(2, 1), labeled(3, 2), labeled(4, 2), labeled(5, 3)];
        let model = fit_faces(faces).unwrap();

        assert_eq!(model.n_faces(), 5);
        assert_eq!(model.n_eigens(), 4);
        assert_eq!(model.geometry, FaceGeometry::new(24, 20));
        assert_eq!(model.basis().dim(), (4, 24 * 20));
        assert_eq!(model.projections.dim(), (5, 4));
        assert!(model.check_shapes().is_ok());
        for w in model.eigenvalues().windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn test_labels_follow_row_order() {
        let faces = vec![labeled(1, 7), labeled(2, 3), labeled(3, 7)];
        let model = fit_faces(faces).unwrap();
        assert_eq!(model.labels, vec![IdentityId(7), IdentityId(3), IdentityId(7)]);
    }

    #[test]
    fn test_first_face_fixes_geometry() {
        let faces = vec![
            LabeledFace { identity_id: IdentityId(1), image: synthetic_face(1, 16, 12) },
            LabeledFace { identity_id: IdentityId(2), image: synthetic_face(2, 40, 30) },
            LabeledFace { identity_id: IdentityId(2), image: synthetic_face(3, 8, 8) },
        ];
        let model = fit_faces(faces).unwrap();
        assert_eq!(model.geometry, FaceGeometry::new(16, 12));
        assert_eq!(model.mean().len(), 16 * 12);
    }

    #[test]
    fn test_degenerate_geometry() {
        let faces = vec![
            labeled(1, 1),
            LabeledFace { identity_id: IdentityId(2), image: GrayImage::new(0, 10) },
        ];
        let err = fit_faces(faces).unwrap_err();
        assert!(matches!(err, TrainingError::DegenerateGeometry { row: 1, .. }));
    }

    #[test]
    fn test_fit_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        for (seed, name) in [(1, "a"), (2, "a"), (3, "b"), (4, "b")] {
            let path = dir.path().join(format!("{name}{seed}.png"));
            synthetic_face(seed, 24, 20).save(&path).unwrap();
            catalog.add_sample(name, &path).unwrap();
        }

        let model = fit(&catalog).unwrap();
        assert_eq!(model.n_faces(), 4);
        assert_eq!(model.n_eigens(), 3);
    }

    #[test]
    fn test_fit_from_catalog_aborts_on_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let good = dir.path().join("good.png");
        synthetic_face(1, 24, 20).save(&good).unwrap();
        catalog.add_sample("a", &good).unwrap();
        catalog.add_sample("b", dir.path().join("missing.png")).unwrap();

        let err = fit(&catalog).unwrap_err();
        assert!(matches!(err, TrainingError::ImageLoad { ref path, .. } if path.ends_with("missing.png")));
    }

    #[test]
    fn test_fit_from_catalog_with_one_sample() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.add_sample("a", "never-loaded.png").unwrap();
        let err = fit(&catalog).unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData { found: 1 }));
    }
}
