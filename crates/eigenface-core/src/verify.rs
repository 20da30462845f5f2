//! Re-score every enrolled sample against a model.
//!
//! Unlike training, an unreadable sample does not stop the scan: it is
//! reported as such and the next sample is checked.

use crate::catalog::{Catalog, CatalogError};
use crate::model::EigenModel;
use crate::normalize;
use crate::recognizer::{recognize_gray, RecognitionError, Recognizer};
use crate::types::IdentityId;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures that stop a verification scan. Per-sample problems do not.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("recognition: {0}")]
    Recognition(#[from] RecognitionError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleStatus {
    /// The nearest training face belongs to the sample's own identity.
    Success,
    /// The nearest training face belongs to someone else.
    Failure { got: IdentityId },
    /// The sample image could not be decoded.
    Unreadable(String),
}

impl fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleStatus::Success => write!(f, "Success"),
            SampleStatus::Failure { .. } => write!(f, "Failure"),
            SampleStatus::Unreadable(_) => write!(f, "Unreadable"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleOutcome {
    /// Identity the sample is enrolled under.
    pub identity_id: IdentityId,
    pub path: PathBuf,
    pub status: SampleStatus,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub unreadable: usize,
}

impl VerificationSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.unreadable
    }

    fn record(&mut self, status: &SampleStatus) {
        match status {
            SampleStatus::Success => self.succeeded += 1,
            SampleStatus::Failure { .. } => self.failed += 1,
            SampleStatus::Unreadable(_) => self.unreadable += 1,
        }
    }
}

/// Recognize one enrolled sample and compare the answer to its label.
///
/// An unreadable image is an outcome, not an error; only a model that
/// cannot be matched against fails.
pub fn verify_sample(
    model: &EigenModel,
    identity_id: IdentityId,
    path: &Path,
) -> Result<SampleOutcome, RecognitionError> {
    let (status, confidence) = match normalize::load_gray(path) {
        Ok(image) => {
            let result = recognize_gray(&image, model)?;
            let status = if result.identity_id == identity_id {
                SampleStatus::Success
            } else {
                SampleStatus::Failure {
                    got: result.identity_id,
                }
            };
            (status, Some(result.confidence))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unable to load sample");
            (SampleStatus::Unreadable(e.to_string()), None)
        }
    };

    Ok(SampleOutcome {
        identity_id,
        path: path.to_path_buf(),
        status,
        confidence,
    })
}

/// Verify every catalog sample in order with the recognizer's model,
/// handing each outcome to `on_outcome`.
pub fn verify_catalog<F>(
    catalog: &Catalog,
    recognizer: &Recognizer,
    mut on_outcome: F,
) -> Result<VerificationSummary, VerifyError>
where
    F: FnMut(&SampleOutcome),
{
    let model = recognizer.model().ok_or(RecognitionError::ModelNotLoaded)?;
    let mut summary = VerificationSummary::default();
    catalog.for_each_sample(|identity_id, path| {
        let outcome = verify_sample(model, identity_id, path)?;
        summary.record(&outcome.status);
        on_outcome(&outcome);
        Ok::<(), VerifyError>(())
    })?;

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        unreadable = summary.unreadable,
        "verification finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use crate::trainer::{self, tests::synthetic_face};

    fn enrolled(dir: &Path) -> Catalog {
        let catalog = Catalog::open(dir.join("faces.db")).unwrap();
        for (seed, name) in [(1, "A"), (2, "A"), (3, "B"), (4, "B")] {
            let path = dir.join(format!("{name}{seed}.png"));
            synthetic_face(seed, 24, 20).save(&path).unwrap();
            catalog.add_sample(name, &path).unwrap();
        }
        catalog
    }

    #[test]
    fn test_verify_reloaded_model_all_success() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = enrolled(dir.path());
        let model_path = dir.path().join("facedata.json");
        store::save(&trainer::fit(&catalog).unwrap(), &model_path).unwrap();

        let mut recognizer = Recognizer::new();
        recognizer.load_model(&model_path).unwrap();
        let mut lines = Vec::new();
        let summary = verify_catalog(&catalog, &recognizer, |o| lines.push(o.status.to_string())).unwrap();

        assert_eq!(summary, VerificationSummary { succeeded: 4, failed: 0, unreadable: 0 });
        assert_eq!(lines, vec!["Success"; 4]);
    }

    #[test]
    fn test_verify_continues_past_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = enrolled(dir.path());
        let recognizer = Recognizer::with_model(trainer::fit(&catalog).unwrap());
        catalog.add_sample("A", dir.path().join("gone.png")).unwrap();
        let late = dir.path().join("late.png");
        synthetic_face(3, 24, 20).save(&late).unwrap();
        catalog.add_sample("B", &late).unwrap();

        let mut outcomes = Vec::new();
        let summary = verify_catalog(&catalog, &recognizer, |o| outcomes.push(o.clone())).unwrap();

        assert_eq!(summary.total(), 6);
        assert_eq!(summary.unreadable, 1);
        assert!(matches!(outcomes[4].status, SampleStatus::Unreadable(_)));
        assert_eq!(outcomes[5].status, SampleStatus::Success);
    }

    #[test]
    fn test_verify_reports_mislabeled_sample() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = enrolled(dir.path());
        let model = trainer::fit(&catalog).unwrap();
        let b = catalog.identity_by_name("B").unwrap().unwrap();
        let a = catalog.identity_by_name("A").unwrap().unwrap();

        // B's face filed under A
        let outcome = verify_sample(&model, a, &dir.path().join("B3.png")).unwrap();
        assert_eq!(outcome.identity_id, a);
        assert_eq!(outcome.status, SampleStatus::Failure { got: b });
        assert_eq!(outcome.status.to_string(), "Failure");
    }

    #[test]
    fn test_verify_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = enrolled(dir.path());
        let err = verify_catalog(&catalog, &Recognizer::new(), |_| {}).unwrap_err();
        assert!(matches!(err, VerifyError::Recognition(RecognitionError::ModelNotLoaded)));
    }
}
