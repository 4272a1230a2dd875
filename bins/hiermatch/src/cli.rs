//! Batch, interactive, and listing front ends.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use pathmatch::{
    Coordinator, MatchOptions, Method, ResolutionRequest, ResolutionResponse, Status,
    TargetResolution,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Resolves every path of `req` and prints the results.
///
/// Fails the process if any pair ends in an error.
pub async fn resolve(
    coord: &Coordinator,
    req: &ResolutionRequest,
    output: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let cancel = cancel_on_ctrl_c();
    let response = coord
        .respond(req, &cancel)
        .await
        .with_context(|| "Failed to resolve hierarchy paths.")?;

    if let Some(path) = output {
        write_response(path, &response)?;
        eprintln!("Response written to {:?}.", path);
    }
    for result in &response.resolutions {
        for target in &result.targets {
            println!("{}", describe(&result.golden_path, target));
        }
    }
    eprintln!("{}", response.message);

    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Prints the subcircuits of a netlist.
pub async fn subckts(coord: &Coordinator, netlist: &Path, opts: &MatchOptions) -> anyhow::Result<()> {
    let names = coord
        .list_subcircuits(netlist, opts)
        .await
        .with_context(|| format!("Failed to read netlist {:?}.", netlist))?;
    for name in &names {
        println!("{name}");
    }
    eprintln!("{} subcircuits", names.len());
    Ok(())
}

/// Reads paths from stdin and resolves each against every target until `exit`.
///
/// Netlists are parsed once and reused for every path.
pub async fn interactive(coord: &Coordinator, mut req: ResolutionRequest) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    print_subckts(coord, "golden", &req.golden_netlist, &req.options).await;
    for (name, path) in &req.target_netlist_dict {
        print_subckts(coord, name, path, &req.options).await;
    }
    if !req.instance_paths.is_empty() {
        resolve_lines(coord, &req, &cancel).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("path> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" | "q" => break,
            path => req.instance_paths = vec![path.to_string()],
        }
        resolve_lines(coord, &req, &cancel).await;
    }
    Ok(())
}

async fn print_subckts(coord: &Coordinator, label: &str, path: &Path, opts: &MatchOptions) {
    match coord.list_subcircuits(path, opts).await {
        Ok(names) => {
            let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
            println!("{label}: {}", names.join(", "));
        }
        Err(err) => println!("{label}: unusable ({err})"),
    }
}

async fn resolve_lines(coord: &Coordinator, req: &ResolutionRequest, cancel: &CancellationToken) {
    match coord.resolve(req, cancel).await {
        Ok(results) => {
            for result in &results {
                for target in &result.targets {
                    println!("{}", describe(&result.golden_path, target));
                }
            }
        }
        Err(err) => println!("error: {err}"),
    }
}

/// Formats one resolution as a single line.
pub fn describe(golden: &str, t: &TargetResolution) -> String {
    let head = format!("{golden} -> [{}]", t.target);
    match t.status {
        Status::Resolved => format!(
            "{head} {} ({}, confidence {:.2})",
            t.resolved_path.as_deref().unwrap_or_default(),
            t.method.map(method_name).unwrap_or("unknown"),
            t.confidence
        ),
        Status::Ambiguous => {
            let paths: Vec<&str> = t.candidates.iter().map(|c| c.path.as_str()).collect();
            format!("{head} ambiguous between {}", paths.join(", "))
        }
        Status::Unresolved | Status::Error => {
            let label = if t.status == Status::Error {
                "error"
            } else {
                "unresolved"
            };
            match &t.reason {
                Some(reason) => format!("{head} {label}: {}", reason.message),
                None => format!("{head} {label}"),
            }
        }
    }
}

fn method_name(method: Method) -> &'static str {
    match method {
        Method::Structural => "structural",
        Method::Fuzzy => "fuzzy",
        Method::Llm => "llm",
    }
}

fn write_response(path: &Path, response: &ResolutionResponse) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}.", parent))?;
    }
    let json = serde_json::to_string_pretty(response)
        .with_context(|| "Failed to serialize the response.")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}.", path))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling");
            token.cancel();
        }
    });
    cancel
}
