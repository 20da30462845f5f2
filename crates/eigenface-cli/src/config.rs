use eigenface_core::recognizer::DEFAULT_CONFIDENCE_THRESHOLD;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables. Flags override it.
pub struct Config {
    /// Path to the SQLite catalog.
    pub db_path: PathBuf,
    /// Path to the trained model document.
    pub model_path: PathBuf,
    /// Training list read by `train` (`[number,]name,path` per line).
    pub pics_file: PathBuf,
    /// Directory (or single image) of frames for `recognize`.
    pub video_src: PathBuf,
    /// Where `enroll` writes cropped faces.
    pub data_dir: PathBuf,
    /// Where `train` writes the mean face and eigenface images.
    pub export_dir: PathBuf,
    /// Minimum confidence for a named match.
    pub confidence_threshold: f32,
}

impl Config {
    /// Load configuration from `EIGENFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            db_path: env_path("EIGENFACE_DB_PATH", "faces.db"),
            model_path: env_path("EIGENFACE_MODEL_PATH", "facedata.json"),
            pics_file: env_path("EIGENFACE_PICS_FILE", "faces.txt"),
            video_src: env_path("EIGENFACE_VIDEO_SRC", "frames"),
            data_dir: env_path("EIGENFACE_DATA_DIR", "data"),
            export_dir: env_path("EIGENFACE_EXPORT_DIR", "."),
            confidence_threshold: env_f32(
                "EIGENFACE_CONFIDENCE_THRESHOLD",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ),
        }
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_fallbacks() {
        assert_eq!(env_path("EIGENFACE_TEST_UNSET_PATH", "faces.db"), PathBuf::from("faces.db"));
        assert_eq!(env_f32("EIGENFACE_TEST_UNSET_F32", 0.5), 0.5);
    }
}
