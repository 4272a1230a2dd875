use approx::assert_relative_eq;
use arcstr::ArcStr;
use test_log::test;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::machine::{Event, Machine, Phase};
use crate::tests::Scripted;

fn offered() -> Vec<ArcStr> {
    vec![
        arcstr::literal!("X_LOAD/XP"),
        arcstr::literal!("X_LOAD/XQ"),
    ]
}

fn summary(path: &str) -> NodeSummary {
    NodeSummary {
        path: ArcStr::from(path),
        master: "half".to_string(),
        ancestors: vec!["load".to_string()],
        connections: vec![arcstr::literal!("n"), arcstr::literal!("vdd")],
        ports: vec![arcstr::literal!("d"), arcstr::literal!("vdd")],
        siblings: Vec::new(),
        children: vec!["M1 (<mos:pmos>)".to_string()],
        sibling_ordinal: 0,
        score: Some(0.5),
    }
}

fn escalating() -> Machine {
    let mut m = Machine::new(2, 1);
    m.apply(Event::StructuralTied).unwrap();
    m.apply(Event::FuzzyUndecided).unwrap();
    m
}

fn options() -> MatchOptions {
    MatchOptions {
        backoff_initial_ms: 1,
        backoff_max_ms: 2,
        ..Default::default()
    }
}

#[test]
fn extracts_first_balanced_object() {
    assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    assert_eq!(
        extract_json("Sure!\n```json\n{\"a\": {\"b\": 2}}\n```\n{\"c\": 3}"),
        Some("{\"a\": {\"b\": 2}}")
    );
    assert_eq!(
        extract_json(r#"x {"reason": "closes } early \" {", "n": 1} y"#),
        Some(r#"{"reason": "closes } early \" {", "n": 1}"#)
    );
    assert_eq!(extract_json("{\"a\": 1"), None);
    assert_eq!(extract_json("no json here"), None);
}

#[test]
fn validates_match() {
    let decision = validate(
        r#"{"decision": "match", "path": "x_load/xq", "reason": "right branch", "confidence": 0.7}"#,
        &offered(),
    )
    .unwrap();
    match decision {
        Decision::Match {
            path, confidence, ..
        } => {
            assert_eq!(path, "X_LOAD/XQ");
            assert_relative_eq!(confidence, 0.7);
        }
        other => panic!("unexpected decision: {other:?}"),
    }

    let decision = validate(
        r#"{"decision": "match", "path": "X_LOAD/XP", "reason": "left"}"#,
        &offered(),
    )
    .unwrap();
    assert_eq!(decision.verdict(), Verdict::Match);
    assert_eq!(decision.reason(), "left");
}

#[test]
fn validates_no_match_and_ties() {
    let decision = validate(
        r#"{"decision": "no_match", "reason": "different topology"}"#,
        &offered(),
    )
    .unwrap();
    assert_eq!(
        decision,
        Decision::NoMatch {
            reason: "different topology".to_string()
        }
    );

    let decision = validate(
        r#"{"decision": "no_match", "reason": "mirror images", "tied": ["X_LOAD/XP", "X_LOAD/XQ", "X_LOAD/XP"]}"#,
        &offered(),
    )
    .unwrap();
    assert_eq!(
        decision,
        Decision::Tie {
            paths: offered(),
            reason: "mirror images".to_string()
        }
    );
}

#[test]
fn rejects_contract_violations() {
    for (text, fragment) in [
        ("XP, definitely", "no JSON object"),
        (r#"{"path": "X_LOAD/XP", "reason": "x"}"#, "format"),
        (r#"{"decision": "maybe", "reason": "x"}"#, "format"),
        (r#"{"decision": "match", "path": "X_LOAD/XR", "reason": "x"}"#, "not one of"),
        (r#"{"decision": "match", "path": "X_LOAD/XP", "reason": "  "}"#, "must not be empty"),
        (
            r#"{"decision": "match", "path": "X_LOAD/XP", "reason": "x", "confidence": 1.5}"#,
            "confidence",
        ),
        (
            r#"{"decision": "no_match", "reason": "x", "tied": ["X_LOAD/XP"]}"#,
            "at least two",
        ),
    ] {
        let err = validate(text, &offered()).unwrap_err();
        assert!(err.0.contains(fragment), "{text}: {err}");
    }
}

#[test]
fn prompt_carries_feedback() {
    let mut request = DisambiguationRequest {
        model: "m".to_string(),
        golden: summary("X_LOAD/XLEFT"),
        candidates: vec![summary("X_LOAD/XP"), summary("X_LOAD/XQ")],
        attempt: 1,
        feedback: None,
    };
    let prompt = request.user_prompt();
    assert!(prompt.contains("X_LOAD/XLEFT"));
    assert!(prompt.contains("X_LOAD/XQ"));
    assert!(prompt.contains("\"decision\": \"no_match\""));
    assert!(!prompt.contains("rejected"));

    request.feedback = Some("`reason` must not be empty".to_string());
    assert!(request.user_prompt().contains("rejected: `reason` must not be empty"));
}

#[test(tokio::test)]
async fn escalator_reprompts_until_valid() {
    let transport = Scripted::new([
        Ok("not json".to_string()),
        Ok(r#"{"decision": "match", "path": "X_LOAD/XP", "reason": "left"}"#.to_string()),
    ]);
    let opts = options();
    let cancel = CancellationToken::new();
    let mut machine = escalating();
    let outcome = Escalator::new(&transport, &opts, &cancel)
        .resolve(
            &mut machine,
            summary("X_LOAD/XLEFT"),
            vec![summary("X_LOAD/XP"), summary("X_LOAD/XQ")],
        )
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Decided(Decision::Match { .. })));
    assert_eq!(machine.phase(), Phase::Resolved);
    assert_eq!(machine.requests(), 2);
    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[1].attempt, 2);
    assert_eq!(
        requests[1].feedback.as_deref(),
        Some("response contains no JSON object")
    );
}

#[test(tokio::test)]
async fn escalator_retries_transient_failures() {
    let transport = Scripted::new([
        Err(TransportError::retryable("503 service unavailable")),
        Ok(r#"{"decision": "no_match", "reason": "nothing fits"}"#.to_string()),
    ]);
    let opts = options();
    let cancel = CancellationToken::new();
    let mut machine = escalating();
    let outcome = Escalator::new(&transport, &opts, &cancel)
        .resolve(&mut machine, summary("X_LOAD/XLEFT"), vec![summary("X_LOAD/XP")])
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Decided(Decision::NoMatch {
            reason: "nothing fits".to_string()
        })
    );
    assert_eq!(machine.phase(), Phase::Unresolved);
    assert_eq!(machine.transport_failures(), 1);
    assert_eq!(transport.count(), 2);
}

#[test(tokio::test)]
async fn escalator_gives_up_on_fatal_failures() {
    let transport = Scripted::new([Err(TransportError::fatal("401 unauthorized"))]);
    let opts = options();
    let cancel = CancellationToken::new();
    let mut machine = escalating();
    let outcome = Escalator::new(&transport, &opts, &cancel)
        .resolve(&mut machine, summary("X_LOAD/XLEFT"), vec![summary("X_LOAD/XP")])
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::TransportExhausted {
            attempts: 1,
            message: "401 unauthorized".to_string()
        }
    );
    assert_eq!(transport.count(), 1);
}

#[test(tokio::test)]
async fn escalator_stops_when_cancelled() {
    let transport = crate::tests::Silent;
    let opts = options();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut machine = escalating();
    let err = Escalator::new(&transport, &opts, &cancel)
        .resolve(&mut machine, summary("X_LOAD/XLEFT"), vec![summary("X_LOAD/XP")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
