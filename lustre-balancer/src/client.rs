//! Filesystem operations the balancer depends on
//!
//! The engine never talks to Lustre directly. It asks a [`FilesystemClient`]
//! for OST free space, for a stream of candidate files and for single-file
//! migrations, so tests can drive it with canned answers.

use futures::stream::BoxStream;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

use crate::size::SizeFilter;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("`{command}` failed: {message}")]
    Failed { command: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Lazily produced candidate paths; a failing lister ends with an `Err` item
pub type CandidateStream = BoxStream<'static, Result<PathBuf>>;

/// Ordered list of OST indices
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TargetSet(Vec<u32>);

impl TargetSet {
    pub fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-separated form expected by `lfs find --ost` and `lfs migrate -o`
    pub fn to_lfs_arg(&self) -> String {
        self.0
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<u32> for TargetSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{index}")?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// TRAITS FOR DEPENDENCY INJECTION
// =============================================================================

/// Operations against the mounted filesystem
#[async_trait::async_trait]
pub trait FilesystemClient: Send + Sync {
    /// Raw per-OST usage report (`lfs df -l` format)
    async fn query_utilization(&self) -> Result<String>;

    /// Start listing regular files matching `size` with objects on `sources`
    async fn enumerate_candidates(
        &self,
        sources: &TargetSet,
        size: &SizeFilter,
    ) -> Result<CandidateStream>;

    /// Restripe `path` across `destinations`
    async fn relocate(&self, path: &Path, destinations: &TargetSet) -> Result<()>;

    /// Current size of `path` in bytes
    async fn file_size(&self, path: &Path) -> std::io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }
}
