//! eigenface-core: Eigenfaces training and recognition engine.
//!
//! Sample images are registered in a SQLite catalog, a PCA subspace is fit
//! over the normalized faces, and probes are matched to the nearest training
//! projection under an eigenvalue-weighted distance.

pub mod acquisition;
pub mod catalog;
pub mod export;
pub mod model;
pub mod normalize;
pub mod recognizer;
pub mod store;
pub mod subspace;
pub mod trainer;
pub mod types;
pub mod verify;

pub use catalog::{Catalog, CatalogError};
pub use model::{EigenModel, ShapeError};
pub use recognizer::{RecognitionError, RecognitionResult, Recognizer};
pub use store::{FormatError, StoreError};
pub use trainer::TrainingError;
pub use types::{FaceGeometry, Identity, IdentityId, SampleRecord};
