//! Access to netlist files.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;

/// Reads netlist files by path.
#[async_trait]
pub trait NetlistSource: Send + Sync {
    /// The modification stamp of the file at `path`.
    async fn stamp(&self, path: &Path) -> io::Result<SystemTime>;

    /// The contents of the file at `path`.
    async fn read(&self, path: &Path) -> io::Result<String>;

    /// Whether include directives may be followed on the local filesystem.
    fn follows_includes(&self) -> bool {
        false
    }
}

/// Reads netlists from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSource;

#[async_trait]
impl NetlistSource for FsSource {
    async fn stamp(&self, path: &Path) -> io::Result<SystemTime> {
        tokio::fs::metadata(path).await?.modified()
    }

    async fn read(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    fn follows_includes(&self) -> bool {
        true
    }
}
