use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Opaque identifier of an enrolled person, allocated by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    /// RFC 3339 timestamp of first enrollment.
    pub created_at: String,
}

/// One catalog entry: a sample image path owned by an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub identity_id: IdentityId,
    pub path: PathBuf,
}

/// Who a new sample belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOwner {
    /// An identity that must already exist.
    Existing(IdentityId),
    /// Look the name up, enrolling a new identity if it is unknown.
    NameLookupOrCreate(String),
}

impl From<IdentityId> for SampleOwner {
    fn from(id: IdentityId) -> Self {
        SampleOwner::Existing(id)
    }
}

impl From<&str> for SampleOwner {
    fn from(name: &str) -> Self {
        SampleOwner::NameLookupOrCreate(name.to_string())
    }
}

/// Fixed face raster size shared by the model and every probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceGeometry {
    pub width: u32,
    pub height: u32,
}

impl FaceGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels, i.e. the length of a flattened face vector.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_degenerate(&self) -> bool {
        self.area() == 0
    }

    pub fn of(image: &GrayImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

impl fmt::Display for FaceGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded training face together with the identity it belongs to.
#[derive(Debug, Clone)]
pub struct LabeledFace {
    pub identity_id: IdentityId,
    pub image: GrayImage,
}
