use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use arcstr::ArcStr;
use clap::{Args as ClapArgs, Parser as ClapParser, Subcommand};
use indexmap::IndexMap;
use netlist::Dialect;
use pathmatch::escalate::http::{HttpTransport, TransportConfig};
use pathmatch::{Coordinator, MatchOptions, ParseCache, ResolutionRequest};
use tracing_subscriber::EnvFilter;

mod cli;
mod server;

#[cfg(test)]
mod tests;

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "Failed to start the async runtime.")?;
    runtime.block_on(run(args))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    match args.command {
        Command::Resolve(resolve) => {
            let req = resolve.request(&args.llm)?;
            let coord = coordinator(&args.llm, &req.options);
            if resolve.interactive {
                cli::interactive(&coord, req).await?;
                return Ok(ExitCode::SUCCESS);
            }
            cli::resolve(&coord, &req, resolve.output.as_deref()).await
        }
        Command::Subckts { netlist, dialect } => {
            let opts = MatchOptions {
                dialect,
                ..Default::default()
            };
            let coord = coordinator(&args.llm, &opts);
            cli::subckts(&coord, &netlist, &opts).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve { addr, cache_capacity } => {
            let opts = MatchOptions {
                cache_capacity,
                ..Default::default()
            };
            let coord = coordinator(&args.llm, &opts);
            server::serve(addr, coord, args.llm.model).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Builds a coordinator, attaching an HTTP transport if an endpoint is configured.
fn coordinator(llm: &LlmArgs, opts: &MatchOptions) -> Coordinator {
    let coord = Coordinator::new(Arc::new(ParseCache::new(opts.cache_capacity)));
    match &llm.api_url {
        Some(api_url) => {
            tracing::info!(api_url = %api_url, "disambiguation enabled");
            coord.with_transport(Arc::new(HttpTransport::new(TransportConfig {
                api_url: api_url.clone(),
                api_key: llm.api_key.clone(),
            })))
        }
        None => {
            tracing::info!("no disambiguation endpoint configured; ties stay ambiguous");
            coord
        }
    }
}

/// Resolves hierarchical instance paths across structurally similar netlists.
#[derive(ClapParser)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
    #[command(flatten)]
    llm: LlmArgs,
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Disambiguation endpoint settings.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct LlmArgs {
    /// Base URL of an OpenAI-compatible chat completions API.
    ///
    /// Without one, candidates that cannot be told apart stay ambiguous.
    #[arg(long, env = "HIERMATCH_API_URL", global = true)]
    api_url: Option<String>,
    /// Bearer token for the disambiguation API.
    #[arg(long, env = "HIERMATCH_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,
    /// Model name sent to the disambiguation API.
    #[arg(long, env = "HIERMATCH_MODEL", global = true)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve golden instance paths in one or more target netlists.
    Resolve(ResolveArgs),
    /// List the subcircuits defined by a netlist.
    Subckts {
        /// The netlist to read.
        netlist: PathBuf,
        /// Overrides dialect detection.
        #[arg(long)]
        dialect: Option<Dialect>,
    },
    /// Serve the HTTP API.
    Serve {
        /// The address to listen on.
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
        /// The number of parsed netlists to keep.
        #[arg(long, default_value_t = 64)]
        cache_capacity: usize,
    },
}

/// Arguments to the `resolve` subcommand.
#[derive(ClapArgs, Debug)]
pub struct ResolveArgs {
    /// The golden netlist.
    ///
    /// Required unless `--config` names a request file.
    golden: Option<PathBuf>,
    /// A target netlist as `NAME=PATH`. May be repeated.
    #[arg(short, long = "target", value_parser = parse_target)]
    targets: Vec<(ArcStr, PathBuf)>,
    /// A golden instance path to resolve. May be repeated.
    #[arg(short, long = "path")]
    paths: Vec<String>,
    /// A JSON or TOML request file with `golden_netlist`, `target_netlist_dict`,
    /// `instance_paths`, and `options`.
    ///
    /// Positional arguments and flags extend or override its contents.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// A TOML file of resolution options.
    #[arg(long)]
    options: Option<PathBuf>,
    /// Where to write the full JSON response.
    ///
    /// The file and its parent directories will be created if necessary.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Prompt for paths on stdin instead of resolving `--path` arguments.
    #[arg(short, long)]
    interactive: bool,
    /// Overrides dialect detection.
    #[arg(long)]
    dialect: Option<Dialect>,
    /// Only validate the request.
    #[arg(long)]
    dry_run: bool,
}

impl ResolveArgs {
    /// Assembles the request: the request file if any, then command line arguments.
    ///
    /// Options come from `--options` if given, else from the request file.
    fn request(&self, llm: &LlmArgs) -> anyhow::Result<ResolutionRequest> {
        let mut req = match &self.config {
            Some(path) => ResolutionRequest::from_file(path)
                .with_context(|| format!("Failed to load request from {:?}.", path))?,
            None => ResolutionRequest {
                golden_netlist: PathBuf::new(),
                target_netlist_dict: IndexMap::new(),
                instance_paths: Vec::new(),
                options: MatchOptions::default(),
            },
        };
        if let Some(golden) = &self.golden {
            req.golden_netlist = golden.clone();
        }
        if req.golden_netlist.as_os_str().is_empty() {
            anyhow::bail!("No golden netlist given; pass one or name a request file with --config.");
        }
        for (name, path) in &self.targets {
            req.target_netlist_dict.insert(name.clone(), path.clone());
        }
        if req.target_netlist_dict.is_empty() {
            anyhow::bail!("No target netlists given; pass at least one --target NAME=PATH.");
        }
        req.instance_paths.extend(self.paths.iter().cloned());

        if let Some(path) = &self.options {
            req.options = MatchOptions::from_toml_file(path)
                .with_context(|| format!("Failed to load options from {:?}.", path))?;
        }
        if self.dialect.is_some() {
            req.options.dialect = self.dialect;
        }
        if let Some(model) = &llm.model {
            req.options.model = model.clone();
        }
        req.options.dry_run |= self.dry_run;
        Ok(req)
    }
}

fn parse_target(s: &str) -> Result<(ArcStr, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, found `{s}`"))?;
    let name = name.trim();
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, found `{s}`"));
    }
    Ok((ArcStr::from(name), PathBuf::from(path)))
}
