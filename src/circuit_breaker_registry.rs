//! Registry for managing named circuit breakers.
//!
//! Holds one breaker per logical dependency so admin surfaces can inspect and reset them by
//! name. The registry is an ordinary value: build it at startup and inject it where needed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use tracing::warn;

/// Errors from breaker registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The requested circuit breaker was not found.
    #[error("circuit breaker '{name}' not found")]
    NotFound { name: String },
}

/// In-memory registry backed by an RwLock. Clones share the same map.
#[derive(Default, Clone, Debug)]
pub struct BreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker under its own name, replacing any existing entry.
    ///
    /// When two breakers share a name the last registration wins; state is replaced, not merged.
    pub fn register(&self, breaker: CircuitBreaker) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let name = breaker.name().to_string();
        if map.contains_key(&name) {
            warn!(target: "holdfast::circuit_breaker_registry", breaker = %name, "circuit breaker id replaced; last registration wins");
        }
        map.insert(name, breaker);
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// Return the breaker registered as `name`, creating it with `make` if absent.
    pub fn get_or_insert_with<F>(&self, name: &str, make: F) -> CircuitBreaker
    where
        F: FnOnce() -> CircuitBreaker,
    {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(name.to_string()).or_insert_with(make).clone()
    }

    /// Reset a breaker by name, erroring if missing.
    pub fn reset(&self, name: &str) -> Result<(), RegistryError> {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                Ok(())
            }
            None => Err(RegistryError::NotFound { name: name.to_string() }),
        }
    }

    /// Snapshot every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<CircuitBreaker> =
            self.inner.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        let mut entries: Vec<BreakerSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn breaker(name: &str, threshold: usize) -> CircuitBreaker {
        CircuitBreaker::new(name, threshold, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn register_warns_and_replaces_duplicates() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = BreakerRegistry::new();
        registry.register(breaker("svc", 3));
        registry.register(breaker("svc", 7));

        let resolved = registry.get("svc").expect("breaker present");
        assert_eq!(resolved.config().failure_threshold(), 7, "last registration should win");
        assert_eq!(registry.len(), 1);

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("circuit breaker id replaced"),
            "warning should be emitted on duplicate registration"
        );
    }

    #[test]
    fn get_or_insert_with_reuses_existing() {
        let registry = BreakerRegistry::new();
        let first = registry.get_or_insert_with("db", || breaker("db", 2));
        let second = registry.get_or_insert_with("db", || breaker("db", 9));
        assert_eq!(second.config().failure_threshold(), 2);

        // Both handles drive the same circuit.
        first.try_acquire().unwrap().failure();
        first.try_acquire().unwrap().failure();
        assert_eq!(second.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_by_name_closes_breaker() {
        let registry = BreakerRegistry::new();
        let db = breaker("db", 1);
        registry.register(db.clone());

        let down = || std::io::Error::new(std::io::ErrorKind::Other, "down");
        let _ = db.guard(|| async move { Err::<(), _>(crate::ResilienceError::Inner(down())) }).await;
        assert_eq!(db.state(), CircuitState::Open);

        registry.reset("db").unwrap();
        assert_eq!(db.state(), CircuitState::Closed);
        assert_eq!(
            registry.reset("missing").unwrap_err(),
            RegistryError::NotFound { name: "missing".into() }
        );
    }

    #[test]
    fn snapshot_is_sorted_by_name() {
        let registry = BreakerRegistry::new();
        registry.register(breaker("inference", 3));
        registry.register(breaker("api", 5));
        registry.register(breaker("database", 5));

        let names: Vec<String> =
            registry.snapshot().iter().map(|s| s.name.to_string()).collect();
        assert_eq!(names, vec!["api", "database", "inference"]);
    }
}
