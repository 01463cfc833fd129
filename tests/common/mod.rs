#![allow(dead_code)]

use holdfast::{Classify, ResilienceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Failure classes the tests classify on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Connection,
    Validation,
    Auth,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} failure: {message}")]
pub struct TestError {
    pub kind: Kind,
    pub message: &'static str,
}

impl TestError {
    pub fn new(kind: Kind, message: &'static str) -> Self {
        Self { kind, message }
    }
}

impl Classify for TestError {
    type Kind = Kind;

    fn kind(&self) -> Kind {
        self.kind
    }
}

pub fn failure(kind: Kind) -> ResilienceError<TestError> {
    ResilienceError::Inner(TestError::new(kind, "boom"))
}

/// Shared invocation counter for units of work.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and return its 1-based index.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
