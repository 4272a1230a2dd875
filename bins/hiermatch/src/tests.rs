use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use clap::Parser as ClapParser;
use pathmatch::escalate::http::{HttpTransport, TransportConfig};
use pathmatch::{Candidate, Coordinator, ParseCache, Reason, ReasonCode, Status, TargetResolution};
use serde_json::{json, Value};
use test_log::test;
use tower::ServiceExt;

use crate::cli::describe;
use crate::server::router;
use crate::{parse_target, Args, Command};

pub const TEST_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../tests/data");

#[inline]
pub fn test_data(file_name: &str) -> PathBuf {
    PathBuf::from(TEST_DATA_DIR).join(file_name)
}

fn app() -> axum::Router {
    router(Coordinator::new(Arc::new(ParseCache::new(8))), None)
}

async fn call(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: String) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[test]
fn parses_targets() {
    let (name, path) = parse_target("rev=nets/renamed.sp").unwrap();
    assert_eq!(name, "rev");
    assert_eq!(path, PathBuf::from("nets/renamed.sp"));

    assert!(parse_target("renamed.sp").is_err());
    assert!(parse_target("=renamed.sp").is_err());
    assert!(parse_target("rev=").is_err());
}

#[test]
fn builds_request_from_arguments() {
    let args = Args::try_parse_from([
        "hiermatch",
        "resolve",
        "golden.sp",
        "-t",
        "b=second.sp",
        "--target",
        "a=first.sp",
        "-p",
        "X_ADC",
        "-p",
        "X_ADC/R1",
        "--dialect",
        "cdl",
        "--dry-run",
        "--model",
        "small",
    ])
    .unwrap();
    let Command::Resolve(resolve) = &args.command else {
        panic!("expected the resolve subcommand");
    };
    let req = resolve.request(&args.llm).unwrap();

    assert_eq!(req.golden_netlist, PathBuf::from("golden.sp"));
    let names: Vec<&str> = req.target_netlist_dict.keys().map(|k| k.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
    assert_eq!(req.instance_paths, vec!["X_ADC", "X_ADC/R1"]);
    assert_eq!(req.options.dialect, Some(netlist::Dialect::Cdl));
    assert_eq!(req.options.model, "small");
    assert!(req.options.dry_run);
}

#[test]
fn request_needs_golden_and_targets() {
    let args = Args::try_parse_from(["hiermatch", "resolve", "-t", "a=t.sp"]).unwrap();
    let Command::Resolve(resolve) = &args.command else {
        panic!("expected the resolve subcommand");
    };
    assert!(resolve.request(&args.llm).is_err());

    let args = Args::try_parse_from(["hiermatch", "resolve", "golden.sp"]).unwrap();
    let Command::Resolve(resolve) = &args.command else {
        panic!("expected the resolve subcommand");
    };
    assert!(resolve.request(&args.llm).is_err());
}

#[test]
fn describes_resolutions() {
    let resolved = TargetResolution::resolved(
        arcstr::literal!("rev"),
        arcstr::literal!("X_ADC/X_AMPLIFIER"),
        0.8,
        pathmatch::Method::Fuzzy,
        Vec::new(),
    );
    assert_eq!(
        describe("X_ADC/X_AMP", &resolved),
        "X_ADC/X_AMP -> [rev] X_ADC/X_AMPLIFIER (fuzzy, confidence 0.80)"
    );

    let tied = TargetResolution::unsettled(
        arcstr::literal!("sym"),
        Status::Ambiguous,
        vec![
            Candidate {
                path: arcstr::literal!("X_LOAD/XP"),
                score: 0.5,
            },
            Candidate {
                path: arcstr::literal!("X_LOAD/XQ"),
                score: 0.5,
            },
        ],
        Reason::new(ReasonCode::DisambiguationUnavailable, "no transport"),
    );
    assert_eq!(
        describe("X_LOAD/XLEFT", &tied),
        "X_LOAD/XLEFT -> [sym] ambiguous between X_LOAD/XP, X_LOAD/XQ"
    );
}

#[test(tokio::test)]
async fn serves_banner_and_health() {
    let (status, body) = call(get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "Hierarchy Matching API");
    assert_eq!(body["status"], "running");
    assert_eq!(body["disambiguation"], false);

    let (status, body) = call(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[test(tokio::test)]
async fn banner_reports_disambiguation_transport() {
    let transport = Arc::new(HttpTransport::new(TransportConfig {
        api_url: "http://127.0.0.1:9".to_string(),
        api_key: None,
    }));
    let coord = Coordinator::new(Arc::new(ParseCache::new(8))).with_transport(transport);
    let response = router(coord, None).oneshot(get("/")).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["disambiguation"], true);
}

#[test(tokio::test)]
async fn resolves_over_http() {
    let body = json!({
        "golden_netlist": test_data("netlists/golden.sp"),
        "target_netlist_dict": { "copy": test_data("netlists/golden.sp") },
        "instance_paths": ["X_ADC/X_AMP/X_INV2"],
    });
    let (status, body) = call(post_json("/api/v1/hierarchy-matching", body.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Hierarchy matching completed successfully");
    let target = &body["resolutions"][0]["targets"][0];
    assert_eq!(target["target"], "copy");
    assert_eq!(target["status"], "resolved");
    assert_eq!(target["resolved_path"], "X_ADC/X_AMP/X_INV2");
    assert_eq!(target["method"], "structural");
    assert_eq!(body["golden_subcircuits"], json!(["inv", "amp", "adc"]));
    assert_eq!(body["target_subcircuits"]["copy"], json!(["inv", "amp", "adc"]));
}

#[test(tokio::test)]
async fn reports_errors_in_results() {
    let body = json!({
        "golden_netlist": test_data("netlists/golden.sp"),
        "target_netlist_dict": { "copy": test_data("netlists/golden.sp") },
        "instance_paths": ["X_ADC/X_MISSING"],
    });
    let (status, body) = call(post_json("/api/v1/hierarchy-matching", body.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    let target = &body["resolutions"][0]["targets"][0];
    assert_eq!(target["status"], "error");
    assert_eq!(target["reason"]["code"], "PathNotFoundError");
}

#[test(tokio::test)]
async fn rejects_bad_requests() {
    let (status, body) = call(post_json("/api/v1/hierarchy-matching", "{\"golden\"".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let body = json!({
        "golden_netlist": test_data("netlists/absent.sp"),
        "target_netlist_dict": { "copy": test_data("netlists/golden.sp") },
        "instance_paths": ["X_ADC"],
    });
    let (status, _) = call(post_json("/api/v1/hierarchy-matching", body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({
        "golden_netlist": test_data("netlists/golden.sp"),
        "target_netlist_dict": {},
        "instance_paths": ["X_ADC"],
    });
    let (status, _) = call(post_json("/api/v1/hierarchy-matching", body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[test(tokio::test)]
async fn dry_run_skips_resolution() {
    let body = json!({
        "golden_netlist": test_data("netlists/golden.sp"),
        "target_netlist_dict": { "copy": test_data("netlists/renamed.sp") },
        "instance_paths": ["X_ADC"],
        "options": { "dry_run": true },
    });
    let (status, body) = call(post_json("/api/v1/hierarchy-matching", body.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Dry run validation passed");
    assert_eq!(body["resolutions"], json!([]));
}

#[test(tokio::test)]
async fn lists_subcircuits() {
    let path = test_data("netlists/golden.sp");
    let uri = format!("/api/v1/subcircuits?netlist_path={}", path.display());
    let (status, body) = call(get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subcircuits"], json!(["inv", "amp", "adc"]));
    assert_eq!(body["count"], 3);

    let uri = format!(
        "/api/v1/subcircuits?netlist_path={}",
        test_data("netlists/absent.sp").display()
    );
    let (status, _) = call(get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
