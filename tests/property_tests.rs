//! Property-based tests for tree building, event synchronization and stack filtering
//!
//! These tests use proptest to check the run invariants across randomly shaped
//! test trees and stack traces.

use std::collections::VecDeque;
use std::sync::Arc;

use jasmine_bridge::protocol::{EventData, NodeKind, ProtocolError, RunEvent, parse};
use jasmine_bridge::{
    AssertionFailure, NoopLifecycle, RunError, TestInfo, TestReporter, TestSummary, TestTree, Traceback,
};
use proptest::prelude::*;
use serde_json::{Value, json};

// =============================================================================
// Generators
// =============================================================================

#[derive(Debug, Clone)]
enum Shape {
    Spec,
    Suite(Vec<Shape>),
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    Just(Shape::Spec).prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            Just(Shape::Spec),
            prop::collection::vec(inner, 0..4).prop_map(Shape::Suite),
        ]
    })
}

/// Children of the top-level suite.
fn forest_strategy() -> impl Strategy<Value = Vec<Shape>> {
    prop::collection::vec(shape_strategy(), 0..5)
}

/// Structural message and event stream of one generated run.
struct Run {
    message: Value,
    events: Vec<RunEvent>,
}

impl Run {
    fn new(forest: &[Shape]) -> Self {
        let mut next_id = 1;
        let mut events = Vec::new();
        let children: Vec<Value> = forest
            .iter()
            .map(|shape| describe(shape, &mut next_id, &mut events))
            .collect();
        let message = json!({
            "type": "suite", "id": "suite0", "fullName": "", "description": "",
            "children": children,
        });
        Self { message, events }
    }

    fn queue(&self) -> VecDeque<RunEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Describe `shape` with sequential ids, pushing the events jasmine would emit.
fn describe(shape: &Shape, next_id: &mut usize, events: &mut Vec<RunEvent>) -> Value {
    let n = *next_id;
    *next_id += 1;
    match shape {
        Shape::Spec => {
            let id = format!("spec{}", n);
            events.push(RunEvent::new(NodeKind::Spec.started_event(), EventData::new(&id)));
            events.push(RunEvent::new(
                NodeKind::Spec.done_event(),
                EventData::new(&id).with_status("passed"),
            ));
            json!({"type": "spec", "id": id, "fullName": format!("spec {}", n), "description": "it"})
        }
        Shape::Suite(children) => {
            let id = format!("suite{}", n);
            events.push(RunEvent::new(NodeKind::Suite.started_event(), EventData::new(&id)));
            let children: Vec<Value> = children.iter().map(|child| describe(child, next_id, events)).collect();
            events.push(RunEvent::new(
                NodeKind::Suite.done_event(),
                EventData::new(&id).with_status("finished"),
            ));
            json!({
                "type": "suite", "id": id, "fullName": format!("suite {}", n), "description": "describe",
                "children": children,
            })
        }
    }
}

struct Silent;

impl TestReporter for Silent {
    fn on_test_start(&mut self, _: &TestInfo) {}
    fn on_success(&mut self, _: &TestInfo) {}
    fn on_skip(&mut self, _: &TestInfo, _: &str) {}
    fn on_failure(&mut self, _: &TestInfo, _: &AssertionFailure) {}
    fn on_error(&mut self, _: &TestInfo, _: &str) {}
    fn on_run_complete(&mut self, _: &TestSummary) {}
}

fn build(message: &Value) -> TestTree {
    TestTree::build(message, Arc::new(NoopLifecycle)).unwrap()
}

// =============================================================================
// Tree and synchronization properties
// =============================================================================

proptest! {
    /// Property: the runnable tree has exactly the shape of the message
    #[test]
    fn built_tree_mirrors_message(forest in forest_strategy()) {
        let run = Run::new(&forest);
        let tree = build(&run.message);
        prop_assert_eq!(tree.to_item(), parse(&run.message).unwrap());
    }

    /// Property: a well-formed stream is consumed completely and sets every result
    #[test]
    fn well_formed_stream_completes(forest in forest_strategy()) {
        let run = Run::new(&forest);
        let mut tree = build(&run.message);
        let mut events = run.queue();

        let summary = tree.run_with(&mut events, &mut Silent).unwrap();

        prop_assert!(events.is_empty());
        prop_assert_eq!(summary.total, tree.test_count());
        prop_assert_eq!(summary.passed, summary.total);
        for node in tree.nodes().filter(|node| !node.is_root()) {
            prop_assert_eq!(node.result().map(|data| data.id.as_str()), Some(node.id()));
        }
    }

    /// Property: the reference tree consumes the same stream the same way
    #[test]
    fn reference_tree_consumes_whole_stream(forest in forest_strategy()) {
        let run = Run::new(&forest);
        let mut events = run.queue();
        let reference = parse(&run.message).unwrap();

        for mut child in reference.children().to_vec() {
            child.run(&mut events).unwrap();
            prop_assert!(child.result().is_some());
        }
        prop_assert!(events.is_empty());
    }

    /// Property: a corrupted event aborts the run right after it is read
    #[test]
    fn corrupted_event_is_detected_immediately(forest in forest_strategy(), pick in any::<prop::sample::Index>()) {
        let run = Run::new(&forest);
        prop_assume!(!run.events.is_empty());
        let k = pick.index(run.events.len());

        let mut events = run.queue();
        events[k].data.id = "corrupted".to_string();
        let mut tree = build(&run.message);

        let err = tree.run_with(&mut events, &mut Silent).unwrap_err();

        let is_mismatch = matches!(
            &err,
            RunError::Protocol(ProtocolError::Mismatch { actual_id, .. }) if actual_id == "corrupted"
        );
        prop_assert!(is_mismatch, "unexpected error: {:?}", err);
        prop_assert_eq!(events.len(), run.events.len() - (k + 1));
    }
}

// =============================================================================
// Traceback properties
// =============================================================================

fn internal_frame(i: usize) -> String {
    format!("    at QueueRunner.run (/project/node_modules/jasmine-core/lib/jasmine.js:{}:9)", i + 1)
}

fn user_frame(j: usize) -> String {
    format!("    at user{} (/project/spec/math_spec.js:{}:5)", j, j + 1)
}

proptest! {
    /// Property: only the span of user frames survives, outermost call first
    #[test]
    fn traceback_keeps_user_span(inner in 0usize..4, user in 0usize..5, outer in 0usize..4) {
        let mut lines = vec!["Error: Expected 2 to equal 1.".to_string()];
        lines.extend((0..inner).map(internal_frame));
        lines.extend((0..user).map(user_frame));
        lines.extend((0..outer).map(internal_frame));
        let stack = lines.join("\n");

        match Traceback::from_stack(&stack) {
            None => prop_assert_eq!(user, 0),
            Some(traceback) => {
                prop_assert_eq!(traceback.depth(), user);
                let names: Vec<String> = traceback.iter().map(|tb| tb.frame().code.name.clone()).collect();
                let expected: Vec<String> = (0..user).rev().map(|j| format!("user{}", j)).collect();
                prop_assert_eq!(names, expected);
                prop_assert!(traceback.iter().all(|tb| tb.lineno() as usize >= 1));
            }
        }
    }
}
