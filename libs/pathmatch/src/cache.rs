//! A single-flight cache of parsed netlists.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use arcstr::ArcStr;
use hiergraph::{BuildOptions, HierarchyGraph};
use lru::LruCache;
use netlist::{Dialect, Parser};
use tokio::sync::OnceCell;

use crate::config::MatchOptions;
use crate::error::{ArcResult, Error};
use crate::source::{FsSource, NetlistSource};

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    path: PathBuf,
    stamp: SystemTime,
    dialect: Option<Dialect>,
    separator: char,
}

type Entry = Arc<OnceCell<ArcResult<Arc<HierarchyGraph>>>>;

/// Parsed hierarchy graphs keyed by file path and modification time.
///
/// Concurrent requests for the same key wait on a single build. Entries are replaced
/// when the file's modification time changes and evicted least recently used first.
/// Failed builds are cached like successes, except for read failures.
pub struct ParseCache {
    source: Arc<dyn NetlistSource>,
    entries: Mutex<LruCache<CacheKey, Entry>>,
    builds: AtomicUsize,
}

impl ParseCache {
    /// Creates a cache over the local filesystem.
    pub fn new(capacity: usize) -> Self {
        Self::with_source(Arc::new(FsSource), capacity)
    }

    /// Creates a cache reading netlists from `source`.
    pub fn with_source(source: Arc<dyn NetlistSource>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            entries: Mutex::new(LruCache::new(capacity)),
            builds: AtomicUsize::new(0),
        }
    }

    /// The number of times a netlist has been parsed.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// The number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that the file at `path` is readable, returning its modification time.
    pub async fn stamp(&self, path: &Path) -> Result<SystemTime, Error> {
        self.source.stamp(path).await.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Gets the hierarchy graph of the netlist at `path`, parsing it if needed.
    pub async fn get(&self, path: &Path, opts: &MatchOptions) -> ArcResult<Arc<HierarchyGraph>> {
        let stamp = self.stamp(path).await.map_err(Arc::new)?;
        let key = CacheKey {
            path: path.to_path_buf(),
            stamp,
            dialect: opts.dialect,
            separator: opts.path_separator,
        };

        let cell = {
            let mut entries = self.lock();
            let stale: Vec<CacheKey> = entries
                .iter()
                .filter(|(k, _)| k.path == key.path && k.stamp != key.stamp)
                .map(|(k, _)| k.clone())
                .collect();
            for k in stale {
                tracing::debug!(path = ?k.path, "dropping stale netlist");
                entries.pop(&k);
            }
            entries
                .get_or_insert(key.clone(), || Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| self.build(path, opts.dialect, opts.build_options()))
            .await
            .clone();
        if let Err(err) = &result {
            if matches!(**err, Error::Io { .. }) {
                self.lock().pop(&key);
            }
        }
        result
    }

    async fn build(
        &self,
        path: &Path,
        dialect: Option<Dialect>,
        opts: BuildOptions,
    ) -> ArcResult<Arc<HierarchyGraph>> {
        let text = self.source.read(path).await.map_err(|source| {
            Arc::new(Error::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        let follows_includes = self.source.follows_includes();
        let path = path.to_path_buf();

        let built = tokio::task::spawn_blocking(move || {
            let dialect = dialect.unwrap_or_else(|| Dialect::detect(Some(path.as_path()), &text));
            let name = path
                .file_name()
                .map(|n| ArcStr::from(&*n.to_string_lossy()))
                .unwrap_or_else(|| arcstr::literal!("netlist"));
            tracing::info!(?path, %dialect, "parsing netlist");

            let mut parser = Parser::new(dialect);
            if follows_includes {
                parser = parser.with_origin(path.clone());
            }
            let doc = parser
                .parse_document(name, text)
                .map_err(|e| Error::from_parser(&path, e))?;
            HierarchyGraph::build(Arc::new(doc), opts)
                .map(Arc::new)
                .map_err(|e| Error::from_build(&path, e))
        })
        .await;

        match built {
            Ok(graph) => graph.map_err(Arc::new),
            Err(e) => Err(Arc::new(Error::Task(e.to_string()))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
