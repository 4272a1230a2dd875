//! Fan-out of resolution requests over golden paths and target netlists.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcstr::ArcStr;
use hiergraph::HierarchyGraph;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::ParseCache;
use crate::config::MatchOptions;
use crate::error::{ArcResult, Error, Result};
use crate::escalate::DisambiguationTransport;
use crate::pipeline::{GoldenRef, Pair};
use crate::result::{ResolutionResponse, ResolutionResult, TargetResolution};

/// A request to resolve golden paths against target netlists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    /// The golden netlist file.
    pub golden_netlist: PathBuf,
    /// The target netlist files, keyed by target identifier.
    pub target_netlist_dict: IndexMap<ArcStr, PathBuf>,
    /// The golden paths to resolve.
    pub instance_paths: Vec<String>,
    /// Resolution options.
    #[serde(default)]
    pub options: MatchOptions,
}

impl ResolutionRequest {
    /// Reads a request from a JSON or TOML file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_toml = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        let req: Self = if is_toml {
            toml::from_str(&text).map_err(|e| Error::InvalidRequest(e.to_string()))?
        } else {
            serde_json::from_str(&text).map_err(|e| Error::InvalidRequest(e.to_string()))?
        };
        Ok(req)
    }

    /// Checks that the request is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.golden_netlist.as_os_str().is_empty() {
            return Err(Error::InvalidRequest("`golden_netlist` is empty".into()));
        }
        if self.target_netlist_dict.is_empty() {
            return Err(Error::InvalidRequest(
                "`target_netlist_dict` names no target netlist".into(),
            ));
        }
        if let Some(name) = self.target_netlist_dict.keys().find(|k| k.trim().is_empty()) {
            return Err(Error::InvalidRequest(format!(
                "target identifier `{name}` is empty"
            )));
        }
        if self.instance_paths.is_empty() {
            return Err(Error::InvalidRequest("`instance_paths` is empty".into()));
        }
        if self.instance_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::InvalidRequest(
                "`instance_paths` contains an empty path".into(),
            ));
        }
        self.options.validate()
    }
}

/// Resolves requests using a shared parse cache and an optional disambiguation transport.
#[derive(Clone)]
pub struct Coordinator {
    cache: Arc<ParseCache>,
    transport: Option<Arc<dyn DisambiguationTransport>>,
}

impl Coordinator {
    /// Creates a coordinator without a disambiguation transport.
    pub fn new(cache: Arc<ParseCache>) -> Self {
        Self {
            cache,
            transport: None,
        }
    }

    /// Uses `transport` for disambiguation.
    pub fn with_transport(mut self, transport: Arc<dyn DisambiguationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The parse cache.
    pub fn cache(&self) -> &Arc<ParseCache> {
        &self.cache
    }

    /// Returns `true` if a disambiguation transport is configured.
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Lists the subcircuits of the netlist at `path`, in document order.
    pub async fn list_subcircuits(
        &self,
        path: &Path,
        opts: &MatchOptions,
    ) -> ArcResult<Vec<ArcStr>> {
        let graph = self.cache.get(path, opts).await?;
        Ok(graph.doc().subckt_names())
    }

    /// Resolves every requested golden path against every target netlist.
    ///
    /// Results follow the order of `instance_paths` and, within each, the order of
    /// `target_netlist_dict`. Only malformed requests, an unreadable golden netlist, and
    /// cancellation fail the whole request.
    pub async fn resolve(
        &self,
        req: &ResolutionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolutionResult>> {
        req.validate()?;
        self.cache.stamp(&req.golden_netlist).await?;
        let opts = Arc::new(req.options.clone());
        tracing::info!(
            golden = ?req.golden_netlist,
            targets = req.target_netlist_dict.len(),
            paths = req.instance_paths.len(),
            "resolving hierarchy paths"
        );

        let golden = self.load(&req.golden_netlist, &opts, cancel).await?;
        let targets = self.load_targets(req, &opts, cancel).await?;

        let names: Vec<&ArcStr> = req.target_netlist_dict.keys().collect();
        let mut slots: Vec<Vec<Option<TargetResolution>>> =
            vec![vec![None; names.len()]; req.instance_paths.len()];
        let permits = Arc::new(Semaphore::new(opts.max_concurrency));
        let mut tasks = JoinSet::new();

        for (p, path) in req.instance_paths.iter().enumerate() {
            let golden = match &golden {
                Ok(golden) => golden,
                Err(err) => {
                    for (t, name) in names.iter().enumerate() {
                        slots[p][t] = Some(TargetResolution::error((*name).clone(), err));
                    }
                    continue;
                }
            };
            let Some(golden_ref) = GoldenRef::find(golden, path) else {
                tracing::warn!(path = %path, "golden path not found");
                let err = Error::PathNotFound(path.clone());
                for (t, name) in names.iter().enumerate() {
                    slots[p][t] = Some(TargetResolution::error((*name).clone(), &err));
                }
                continue;
            };

            for (t, target) in targets.iter().enumerate() {
                let target = match target {
                    Ok(target) => target.clone(),
                    Err(err) => {
                        slots[p][t] = Some(TargetResolution::error(names[t].clone(), err));
                        continue;
                    }
                };
                let pair = Pair {
                    golden: golden.clone(),
                    target,
                    target_name: names[t].clone(),
                    opts: opts.clone(),
                    transport: self.transport.clone(),
                    cancel: cancel.child_token(),
                };
                let span = tracing::info_span!("resolve", golden = %path, netlist = %names[t]);
                let permits = permits.clone();
                let golden_ref = golden_ref.clone();
                tasks.spawn(
                    async move {
                        let _permit = permits
                            .acquire_owned()
                            .await
                            .map_err(|e| Error::Task(e.to_string()))?;
                        let resolution = pair.resolve(&golden_ref).await?;
                        Ok::<_, Error>((p, t, resolution))
                    }
                    .instrument(span),
                );
            }
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok(Ok((p, t, resolution)))) => slots[p][t] = Some(resolution),
                Some(Ok(Err(err))) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Some(Err(err)) => {
                    tasks.abort_all();
                    return Err(Error::Task(err.to_string()));
                }
            }
        }

        slots
            .into_iter()
            .zip(req.instance_paths.iter())
            .map(|(row, path)| {
                let targets = row
                    .into_iter()
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| Error::Task(format!("resolution of `{path}` did not finish")))?;
                Ok(ResolutionResult {
                    golden_path: path.clone(),
                    targets,
                })
            })
            .collect()
    }

    /// Resolves a request and assembles the full response.
    ///
    /// With `dry_run` set, the request is only validated.
    pub async fn respond(
        &self,
        req: &ResolutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolutionResponse> {
        if req.options.dry_run {
            req.validate()?;
            self.cache.stamp(&req.golden_netlist).await?;
            return Ok(ResolutionResponse {
                success: true,
                message: "Dry run validation passed".to_string(),
                resolutions: Vec::new(),
                golden_subcircuits: Vec::new(),
                target_subcircuits: IndexMap::new(),
            });
        }

        let resolutions = self.resolve(req, cancel).await?;
        let golden_subcircuits = match self
            .list_subcircuits(&req.golden_netlist, &req.options)
            .await
        {
            Ok(subckts) => subckts,
            Err(err) => {
                tracing::warn!(netlist = ?req.golden_netlist, "cannot list golden subcircuits: {err}");
                Vec::new()
            }
        };
        let mut target_subcircuits = IndexMap::new();
        for (name, path) in req.target_netlist_dict.iter() {
            match self.list_subcircuits(path, &req.options).await {
                Ok(subckts) => {
                    target_subcircuits.insert(name.clone(), subckts);
                }
                Err(err) => {
                    tracing::warn!(target = %name, netlist = ?path, "cannot list target subcircuits: {err}");
                }
            }
        }

        let success = !resolutions.iter().any(ResolutionResult::has_error);
        let message = if success {
            "Hierarchy matching completed successfully"
        } else {
            "Processing completed with errors"
        };
        Ok(ResolutionResponse {
            success,
            message: message.to_string(),
            resolutions,
            golden_subcircuits,
            target_subcircuits,
        })
    }

    async fn load(
        &self,
        path: &Path,
        opts: &MatchOptions,
        cancel: &CancellationToken,
    ) -> Result<ArcResult<Arc<HierarchyGraph>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            graph = self.cache.get(path, opts) => Ok(graph),
        }
    }

    async fn load_targets(
        &self,
        req: &ResolutionRequest,
        opts: &Arc<MatchOptions>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArcResult<Arc<HierarchyGraph>>>> {
        let mut loads = JoinSet::new();
        for (i, path) in req.target_netlist_dict.values().enumerate() {
            let cache = self.cache.clone();
            let path = path.clone();
            let opts = opts.clone();
            loads.spawn(async move {
                let graph = cache.get(&path, &opts).await;
                if let Err(err) = &graph {
                    tracing::warn!(netlist = ?path, "target netlist unusable: {err}");
                }
                (i, graph)
            });
        }

        let mut graphs: Vec<Option<ArcResult<Arc<HierarchyGraph>>>> =
            vec![None; req.target_netlist_dict.len()];
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    loads.abort_all();
                    return Err(Error::Cancelled);
                }
                joined = loads.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok((i, graph))) => graphs[i] = Some(graph),
                Some(Err(err)) => {
                    loads.abort_all();
                    return Err(Error::Task(err.to_string()));
                }
            }
        }
        graphs
            .into_iter()
            .map(|g| g.ok_or_else(|| Error::Task("target netlist load did not finish".into())))
            .collect()
    }
}
