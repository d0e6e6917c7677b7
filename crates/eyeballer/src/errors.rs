//! # Errors
//!
//! Dataset- and weights-level failures are fatal and returned to the caller.
//! Per-image failures inside batch operations are reported as
//! [`SkippedImage`] values and logged at `WARN`; they never abort the batch.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Library error type.
#[derive(Error, Debug)]
pub enum EyeballError {
    /// The label table does not exist.
    #[error("label table not found at '{}'; run from the dataset root or set `labels_file`", path.display())]
    DataNotFound {
        /// Expected location of the table.
        path: PathBuf,
    },

    /// The label table exists but a row or column is malformed.
    #[error("label table '{}' is malformed: {message}", path.display())]
    LabelTable {
        /// Location of the table.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// The weights file is set but unreadable or corrupt.
    #[error("unable to load weights file '{}': {reason}", path.display())]
    WeightsFile {
        /// Location of the weights file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// A prediction target does not exist.
    #[error("no such file or directory: '{}'", path.display())]
    PathNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// A dataset partition has no usable members.
    #[error("{what} is empty; check the label table and image directory")]
    EmptyDataset {
        /// Which partition.
        what: String,
    },

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single image could not be read or decoded.
    #[error("unable to read image '{}': {source}", path.display())]
    Image {
        /// The image path.
        path: PathBuf,
        /// Decoder failure.
        #[source]
        source: image::ImageError,
    },

    /// Pretrained backbone weights could not be fetched or applied.
    #[error("pretrained backbone '{name}' unavailable: {reason}")]
    Pretrained {
        /// The pretrained weights name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Library result type.
pub type Result<T, E = EyeballError> = std::result::Result<T, E>;

impl EyeballError {
    /// Is this a recoverable per-image failure?
    pub fn is_image_warning(&self) -> bool {
        matches!(self, EyeballError::Image { .. })
    }
}

/// A per-image warning: an image skipped by a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImage {
    /// The skipped path.
    pub path: PathBuf,

    /// Human-readable reason.
    pub reason: String,
}

impl SkippedImage {
    /// Record and log a skipped image.
    pub fn warn<P: AsRef<Path>, R: ToString>(
        path: P,
        reason: R,
    ) -> Self {
        let skipped = Self {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        };
        tracing::warn!(
            path = %skipped.path.display(),
            "skipping image: {}",
            skipped.reason
        );
        skipped
    }
}
