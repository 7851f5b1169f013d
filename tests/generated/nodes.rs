// Generated by treegen. Do not edit.
//! Syntax tree nodes (2 classes)

use std::sync::Arc;

/// Leaf Leaf
#[derive(Debug, Clone)]
pub struct Pair {
    pub f0: Arc<Leaf>,
    pub f1: Arc<Leaf>,
}

impl Pair {
    pub fn new(f0: Arc<Leaf>, f1: Arc<Leaf>) -> Self {
        Self { f0, f1 }
    }
}

#[derive(Debug, Clone)]
pub struct Leaf;

