//! Generated node and parallel visitor sources, compiled as part of the
//! test build
//!
//! `tests/generated/` holds the output for a two-class grammar. The first
//! test keeps those files in sync with the renderers; the rest drive the
//! generated visitor against the real runtime.

#[allow(dead_code)]
#[path = "generated/nodes.rs"]
mod nodes;

#[allow(dead_code)]
#[path = "generated/parallel_visitor.rs"]
mod parallel_visitor;

use nodes::{Leaf, Pair};
use parallel_visitor::{ParallelAccept, ParallelVisitor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use treegen::render::{NodeRenderer, ParallelVisitorRenderer};
use treegen::{render_sequential, ClassDescriptor};

fn grammar() -> Vec<ClassDescriptor> {
    vec![
        ClassDescriptor::new("Pair")
            .doc("Leaf Leaf")
            .field("Leaf", "f0")
            .field("Leaf", "f1"),
        ClassDescriptor::new("Leaf"),
    ]
}

#[test]
fn test_checked_in_sources_match_renderers() {
    let classes = grammar();

    assert_eq!(
        render_sequential(&classes, &NodeRenderer).unwrap(),
        include_str!("generated/nodes.rs")
    );
    assert_eq!(
        render_sequential(&classes, &ParallelVisitorRenderer::new("ParallelVisitor")).unwrap(),
        include_str!("generated/parallel_visitor.rs")
    );
}

#[test]
fn test_generated_visitor_walks_and_terminates() {
    let root = Arc::new(Pair::new(Arc::new(Leaf), Arc::new(Leaf)));
    let visitor = ParallelVisitor::with_lanes(2).unwrap();

    let extra = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&extra);
    visitor
        .add_task(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    visitor.visit_all(root).unwrap();
    assert!(visitor.is_terminated());
    assert_eq!(extra.load(Ordering::SeqCst), 1);

    visitor.shutdown().unwrap();
}

#[test]
fn test_generated_accept_dispatches_from_any_node() {
    let visitor = ParallelVisitor::with_lanes(1).unwrap();

    // a leaf root forks nothing
    Arc::new(Leaf).accept(&visitor).unwrap();
    visitor.task_end().unwrap();
    visitor.await_termination().unwrap();
    assert!(visitor.is_terminated());

    // the visit is over, so further descents are refused
    let late = Arc::new(Pair::new(Arc::new(Leaf), Arc::new(Leaf)));
    assert!(late.accept(&visitor).is_err());

    visitor.shutdown().unwrap();
}
