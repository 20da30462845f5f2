//! Model persistence as a self-describing JSON document.
//!
//! Top-level keys follow the established training-file layout:
//! `eigenvals`, `eigenvects`, `mean`, `projectedTrainFaceMat`,
//! `personNumTruthMat`, `nEigens`, `nFaces`, `faceSizeW`, `faceSizeH`.
//! Matrices are `{ "rows", "cols", "data" }` objects in row-major order.
//! Unknown keys are ignored on load; every required key must be present
//! and agree with the declared counts and geometry.

use crate::model::{EigenModel, ShapeError};
use crate::subspace::Subspace;
use crate::types::{FaceGeometry, IdentityId};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Written into every document; not required on load.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model document: {0}")]
    Format(#[from] FormatError),
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is malformed: {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("field `{field}` is {rows}x{cols}, expected {expected}")]
    Shape {
        field: &'static str,
        rows: usize,
        cols: usize,
        expected: String,
    },
}

impl From<ShapeError> for FormatError {
    fn from(e: ShapeError) -> Self {
        FormatError::Shape {
            field: e.field,
            rows: e.rows,
            cols: e.cols,
            expected: e.expected,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Clone> Matrix<T> {
    fn from_array2(a: &Array2<T>) -> Self {
        let (rows, cols) = a.dim();
        Self {
            rows,
            cols,
            data: a.iter().cloned().collect(),
        }
    }

    fn row_vector(v: &[T]) -> Self {
        Self {
            rows: 1,
            cols: v.len(),
            data: v.to_vec(),
        }
    }

    fn column_vector(v: &[T]) -> Self {
        Self {
            rows: v.len(),
            cols: 1,
            data: v.to_vec(),
        }
    }

    /// Check the declared shape against the payload and the expected size.
    fn checked(self, field: &'static str, expect: Expect) -> Result<Self, FormatError> {
        let ok = self.rows.checked_mul(self.cols) == Some(self.data.len())
            && match expect {
                Expect::Dims(r, c) => self.rows == r && self.cols == c,
                Expect::Vector(len) => self.data.len() == len && (self.rows == 1 || self.cols == 1),
            };
        if ok {
            Ok(self)
        } else {
            Err(FormatError::Shape {
                field,
                rows: self.rows,
                cols: self.cols,
                expected: match expect {
                    Expect::Dims(r, c) => format!("{r}x{c}"),
                    Expect::Vector(len) => format!("a vector of {len}"),
                },
            })
        }
    }
}

#[derive(Clone, Copy)]
enum Expect {
    Dims(usize, usize),
    Vector(usize),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelDocument {
    format_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    trained_at: Option<DateTime<Utc>>,
    eigenvals: Matrix<f32>,
    eigenvects: Matrix<f32>,
    mean: Matrix<f32>,
    projected_train_face_mat: Matrix<f32>,
    person_num_truth_mat: Matrix<i64>,
    n_eigens: usize,
    n_faces: usize,
    face_size_w: u32,
    face_size_h: u32,
}

/// Serialize `model` to a pretty-printed JSON document.
pub fn to_json(model: &EigenModel) -> Result<String, FormatError> {
    let labels: Vec<i64> = model.labels.iter().map(|id| id.0).collect();
    let doc = ModelDocument {
        format_version: FORMAT_VERSION,
        trained_at: model.trained_at,
        eigenvals: Matrix::column_vector(&model.eigenvalues().to_vec()),
        eigenvects: Matrix::from_array2(model.basis()),
        mean: Matrix::row_vector(&model.mean().to_vec()),
        projected_train_face_mat: Matrix::from_array2(&model.projections),
        person_num_truth_mat: Matrix::row_vector(&labels),
        n_eigens: model.n_eigens(),
        n_faces: model.n_faces(),
        face_size_w: model.geometry.width,
        face_size_h: model.geometry.height,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Parse a model document, validating presence and shape of every field
/// and the invariants of a trained model.
pub fn from_json(text: &str) -> Result<EigenModel, FormatError> {
    let mut doc: Map<String, Value> = serde_json::from_str(text)?;

    let n_eigens: usize = required(&mut doc, "nEigens")?;
    let n_faces: usize = required(&mut doc, "nFaces")?;
    let width: u32 = required(&mut doc, "faceSizeW")?;
    let height: u32 = required(&mut doc, "faceSizeH")?;
    let geometry = FaceGeometry::new(width, height);
    let dims = geometry.area();

    let eigenvals = required::<Matrix<f32>>(&mut doc, "eigenvals")?
        .checked("eigenvals", Expect::Vector(n_eigens))?;
    let eigenvects = required::<Matrix<f32>>(&mut doc, "eigenvects")?
        .checked("eigenvects", Expect::Dims(n_eigens, dims))?;
    let mean = required::<Matrix<f32>>(&mut doc, "mean")?.checked("mean", Expect::Vector(dims))?;
    let projections = required::<Matrix<f32>>(&mut doc, "projectedTrainFaceMat")?
        .checked("projectedTrainFaceMat", Expect::Dims(n_faces, n_eigens))?;
    let labels = required::<Matrix<i64>>(&mut doc, "personNumTruthMat")?
        .checked("personNumTruthMat", Expect::Vector(n_faces))?;

    let trained_at = match doc.remove("trainedAt") {
        Some(v) => serde_json::from_value(v).map_err(|source| FormatError::InvalidField {
            field: "trainedAt",
            source,
        })?,
        None => None,
    };

    let model = EigenModel {
        geometry,
        subspace: Subspace {
            mean: Array1::from_vec(mean.data),
            basis: into_array2("eigenvects", eigenvects)?,
            eigenvalues: Array1::from_vec(eigenvals.data),
        },
        projections: into_array2("projectedTrainFaceMat", projections)?,
        labels: labels.data.into_iter().map(IdentityId).collect(),
        trained_at,
    };
    model.check_shapes()?;
    Ok(model)
}

/// Write `model` to `path`, replacing any existing file.
pub fn save(model: &EigenModel, path: impl AsRef<Path>) -> Result<(), StoreError> {
    let path = path.as_ref();
    let text = to_json(model)?;
    std::fs::write(path, text).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(
        path = %path.display(),
        faces = model.n_faces(),
        eigens = model.n_eigens(),
        "saved training data"
    );
    Ok(())
}

/// Read a model previously written by [`save`].
pub fn load(path: impl AsRef<Path>) -> Result<EigenModel, StoreError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let model = from_json(&text)?;
    tracing::info!(
        path = %path.display(),
        faces = model.n_faces(),
        eigens = model.n_eigens(),
        geometry = %model.geometry,
        "training data loaded"
    );
    Ok(model)
}

fn required<T: DeserializeOwned>(doc: &mut Map<String, Value>, field: &'static str) -> Result<T, FormatError> {
    let value = doc.remove(field).ok_or(FormatError::MissingField(field))?;
    serde_json::from_value(value).map_err(|source| FormatError::InvalidField { field, source })
}

fn into_array2(field: &'static str, m: Matrix<f32>) -> Result<Array2<f32>, FormatError> {
    let (rows, cols) = (m.rows, m.cols);
    Array2::from_shape_vec((rows, cols), m.data).map_err(|_| FormatError::Shape {
        field,
        rows,
        cols,
        expected: format!("{} values", rows * cols),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::fit_faces;
    use crate::trainer::tests::labeled;
    use ndarray::s;

    fn four_face_model() -> EigenModel {
        fit_faces(vec![labeled(1, 1), labeled(2, 1), labeled(3, 2), labeled(4, 2)]).unwrap()
    }

    #[test]
    fn test_round_trip_is_exact() {
        let model = four_face_model();
        let back = from_json(&to_json(&model).unwrap()).unwrap();

        assert_eq!(back.geometry, model.geometry);
        assert_eq!(back.labels, model.labels);
        assert_eq!(back.trained_at, model.trained_at);
        let bits = |a: &[f32]| a.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back.mean().to_vec()), bits(&model.mean().to_vec()));
        assert_eq!(bits(&back.eigenvalues().to_vec()), bits(&model.eigenvalues().to_vec()));
        assert_eq!(
            bits(&back.basis().iter().copied().collect::<Vec<_>>()),
            bits(&model.basis().iter().copied().collect::<Vec<_>>())
        );
        assert_eq!(
            bits(&back.projections.iter().copied().collect::<Vec<_>>()),
            bits(&model.projections.iter().copied().collect::<Vec<_>>())
        );
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facedata.json");
        let model = four_face_model();

        save(&model, &path).unwrap();
        let back = load(&path).unwrap();
        assert_eq!(back.n_faces(), 4);
        assert_eq!(back.n_eigens(), 3);
        assert_eq!(back.training_projection(0), model.training_projection(0));
        assert_eq!(back, model);
    }

    #[test]
    fn test_document_has_required_keys() {
        let doc: Value = serde_json::from_str(&to_json(&four_face_model()).unwrap()).unwrap();
        for key in [
            "eigenvals",
            "eigenvects",
            "mean",
            "projectedTrainFaceMat",
            "personNumTruthMat",
            "nEigens",
            "nFaces",
            "faceSizeW",
            "faceSizeH",
        ] {
            assert!(doc.get(key).is_some(), "missing {key}");
        }
        assert_eq!(doc["nEigens"], 3);
        assert_eq!(doc["faceSizeW"], 24);
    }

    #[test]
    fn test_missing_field_is_named() {
        let mut doc: Map<String, Value> =
            serde_json::from_str(&to_json(&four_face_model()).unwrap()).unwrap();
        doc.remove("projectedTrainFaceMat");
        let err = from_json(&Value::Object(doc).to_string()).unwrap_err();
        assert!(matches!(err, FormatError::MissingField("projectedTrainFaceMat")));
        assert!(err.to_string().contains("projectedTrainFaceMat"));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut doc: Map<String, Value> =
            serde_json::from_str(&to_json(&four_face_model()).unwrap()).unwrap();
        doc.insert("nFaces".into(), Value::from(5));
        let err = from_json(&Value::Object(doc).to_string()).unwrap_err();
        assert!(matches!(err, FormatError::Shape { field: "projectedTrainFaceMat", .. }));
    }

    fn document_with(edit: impl FnOnce(&mut Map<String, Value>)) -> String {
        let mut doc: Map<String, Value> =
            serde_json::from_str(&to_json(&four_face_model()).unwrap()).unwrap();
        edit(&mut doc);
        Value::Object(doc).to_string()
    }

    fn matrix(rows: usize, cols: usize, data: Vec<f32>) -> Value {
        serde_json::json!({ "rows": rows, "cols": cols, "data": data })
    }

    #[test]
    fn test_empty_gallery_rejected() {
        let text = document_with(|doc| {
            doc.insert("nFaces".into(), Value::from(0));
            doc.insert("nEigens".into(), Value::from(0));
            doc.insert("eigenvals".into(), matrix(0, 1, vec![]));
            doc.insert("eigenvects".into(), matrix(0, 24 * 20, vec![]));
            doc.insert("projectedTrainFaceMat".into(), matrix(0, 0, vec![]));
            doc.insert("personNumTruthMat".into(), serde_json::json!({ "rows": 1, "cols": 0, "data": [] }));
        });
        let err = from_json(&text).unwrap_err();
        assert!(matches!(err, FormatError::Shape { field: "personNumTruthMat", .. }), "{err}");
    }

    #[test]
    fn test_component_count_must_follow_face_count() {
        // 4 faces but only 2 eigenvectors
        let model = four_face_model();
        let text = document_with(|doc| {
            let d = 24 * 20;
            doc.insert("nEigens".into(), Value::from(2));
            doc.insert("eigenvals".into(), matrix(2, 1, model.eigenvalues().to_vec()[..2].to_vec()));
            doc.insert(
                "eigenvects".into(),
                matrix(2, d, model.basis().iter().copied().take(2 * d).collect()),
            );
            doc.insert(
                "projectedTrainFaceMat".into(),
                matrix(4, 2, model.projections.slice(s![.., ..2]).iter().copied().collect()),
            );
        });
        let err = from_json(&text).unwrap_err();
        assert!(matches!(err, FormatError::Shape { field: "eigenvects", .. }), "{err}");
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let huge = 1usize << 33;
        let text = document_with(|doc| {
            doc.insert("eigenvals".into(), matrix(huge, huge, vec![1.0]));
        });
        let err = from_json(&text).unwrap_err();
        assert!(matches!(err, FormatError::Shape { field: "eigenvals", .. }), "{err}");
    }

    #[test]
    fn test_extra_fields_tolerated() {
        let mut doc: Map<String, Value> =
            serde_json::from_str(&to_json(&four_face_model()).unwrap()).unwrap();
        doc.insert("comment".into(), Value::from("hand edited"));
        doc.remove("trainedAt");
        doc.remove("formatVersion");
        let model = from_json(&Value::Object(doc).to_string()).unwrap();
        assert_eq!(model.n_faces(), 4);
        assert_eq!(model.trained_at, None);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load("/nonexistent/facedata.json").unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_load_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facedata.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load(&path).unwrap_err(), StoreError::Format(FormatError::Json(_))));
    }
}
