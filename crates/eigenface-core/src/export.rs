//! Render the mean face and eigenfaces as images for inspection.

use crate::model::EigenModel;
use crate::types::FaceGeometry;
use image::{imageops, GrayImage, Luma};
use ndarray::ArrayView1;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Eigenfaces per row of the composite image.
pub const EIGENFACE_COLUMNS: usize = 8;

pub const MEAN_FACE_FILE: &str = "out_averageImage.bmp";
pub const EIGENFACES_FILE: &str = "out_eigenfaces.bmp";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Files written by [`write_diagnostics`].
#[derive(Debug, Clone)]
pub struct DiagnosticImages {
    pub mean_face: PathBuf,
    /// `None` when the model has no eigenfaces.
    pub eigenfaces: Option<PathBuf>,
}

/// The mean face at model geometry, clamped to 0..=255.
pub fn render_mean(model: &EigenModel) -> GrayImage {
    let g = model.geometry;
    let mean = model.mean();
    GrayImage::from_fn(g.width, g.height, |x, y| {
        let v = mean[(y * g.width + x) as usize];
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// One basis vector reshaped to `geometry` and min–max stretched to 0..=255.
fn render_vector(v: ArrayView1<'_, f32>, geometry: FaceGeometry) -> GrayImage {
    let (lo, hi) = v
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let range = hi - lo;
    GrayImage::from_fn(geometry.width, geometry.height, |x, y| {
        let value = v[(y * geometry.width + x) as usize];
        let scaled = if range > 0.0 { (value - lo) / range * 255.0 } else { 0.0 };
        Luma([scaled.round().clamp(0.0, 255.0) as u8])
    })
}

/// Tile every eigenface into one image, `columns` per row, on white.
///
/// Returns `None` for a model without eigenfaces.
pub fn render_eigenfaces(model: &EigenModel, columns: usize) -> Option<GrayImage> {
    let n = model.n_eigens();
    if n == 0 || columns == 0 {
        return None;
    }

    let g = model.geometry;
    let cols = n.min(columns);
    let rows = n.div_ceil(columns);
    let mut sheet = GrayImage::from_pixel(cols as u32 * g.width, rows as u32 * g.height, Luma([255]));

    for (i, vector) in model.basis().rows().into_iter().enumerate() {
        let tile = render_vector(vector, g);
        let x = (i % columns) as i64 * g.width as i64;
        let y = (i / columns) as i64 * g.height as i64;
        imageops::replace(&mut sheet, &tile, x, y);
    }
    Some(sheet)
}

/// Write the mean face and the eigenface sheet into `dir`.
pub fn write_diagnostics(model: &EigenModel, dir: impl AsRef<Path>) -> Result<DiagnosticImages, ExportError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mean_face = dir.join(MEAN_FACE_FILE);
    render_mean(model).save(&mean_face)?;
    tracing::info!(path = %mean_face.display(), "saved average face");

    let eigenfaces = match render_eigenfaces(model, EIGENFACE_COLUMNS) {
        Some(sheet) => {
            let path = dir.join(EIGENFACES_FILE);
            sheet.save(&path)?;
            tracing::info!(path = %path.display(), count = model.n_eigens(), "saved eigenface images");
            Some(path)
        }
        None => None,
    };

    Ok(DiagnosticImages { mean_face, eigenfaces })
}
