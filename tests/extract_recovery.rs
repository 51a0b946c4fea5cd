// tests/extract_recovery.rs
//
// Recovery escalation and the deliberation-channel fallback, end to end
// through the public helpers.

use demand_radar::extract::recover::{recover, recover_value};
use demand_radar::extract::stream::{StreamAccumulator, StreamEvent};
use demand_radar::extract::{extract_findings, ExtractOptions, Findings, MockBackend};
use serde_json::json;

#[test]
fn truncated_fenced_array_is_closed_at_last_boundary() {
    let text = "```json\n[{\"a\":1},{\"b\":2}\n```";
    let r = recover(text).expect("boundary repair should succeed");
    assert_eq!(r.value, json!([{"a": 1}]));
    assert_eq!(r.pass, "truncated_array");
}

#[test]
fn passes_escalate_in_order() {
    assert_eq!(recover(r#"[{"a":1}]"#).unwrap().pass, "as_is");
    assert_eq!(recover("[{'a': 'x'}]").unwrap().pass, "quote_repair");
    assert_eq!(recover("```\n[1,2]\n```").unwrap().pass, "fenced");
    assert_eq!(recover("Here you go: [1, 2] hope it helps").unwrap().pass, "outer_array");
    assert_eq!(recover("Result: {\"ok\": true}.").unwrap().pass, "outer_object");
}

#[test]
fn unrecoverable_text_is_none_not_panic() {
    for t in ["", "   ", "no json here", "[{", "{{{{", "```", "[}{]"] {
        assert!(recover_value(t).is_none(), "{t:?}");
    }
}

#[test]
fn deliberation_fallback_returns_embedded_json() {
    let mut acc = StreamAccumulator::new();
    acc.push_event(StreamEvent::Deliberation("... garbage ".into()));
    acc.push_event(StreamEvent::Deliberation("{\"x\":1} more garbage".into()));
    acc.push_event(StreamEvent::Done);
    assert_eq!(acc.finish(), "{\"x\":1}");
}

#[test]
fn prose_braces_before_the_answer_do_not_hide_it() {
    let mut acc = StreamAccumulator::new();
    acc.push_event(StreamEvent::Deliberation("Schema is {problem, audience}. ".into()));
    acc.push_event(StreamEvent::Deliberation("Answer: [{\"a\":1}]".into()));
    acc.push_event(StreamEvent::Done);
    let text = acc.finish();
    assert_eq!(text, r#"[{"a":1}]"#);
    assert_eq!(recover_value(&text), Some(json!([{"a": 1}])));
}

#[tokio::test]
async fn recovery_miss_degrades_instead_of_failing() {
    let backend = MockBackend::new("I could not find any problems worth listing.");
    let r = extract_findings(&backend, "prompt", ExtractOptions::default())
        .await
        .unwrap();
    match r.findings {
        Findings::Degraded { excerpt } => assert!(excerpt.starts_with("I could not find")),
        other => panic!("expected degraded, got {other:?}"),
    }
    assert_eq!(r.provenance.backend, "mock");
    assert_eq!(r.provenance.attempts, 1);
}
