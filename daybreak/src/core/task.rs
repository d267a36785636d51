//! Collection tasks and the source seam behind them.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;

use super::TaskKind;
use crate::errors::FetchError;

/// Future returned by a task's fetch operation.
pub type FetchFuture = BoxFuture<'static, Result<serde_json::Value, FetchError>>;

type FetchFn = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// An external data source the digest draws from.
///
/// Implementations are opaque to the orchestrator: it never inspects the
/// payload, only whether the fetch succeeded.
#[async_trait]
pub trait Source: Send + Sync + Debug {
    /// Fetches the current value.
    async fn fetch(&self) -> Result<serde_json::Value, FetchError>;
}

/// A named unit of collection work.
#[derive(Clone)]
pub struct Task {
    key: String,
    kind: TaskKind,
    fetch: FetchFn,
}

impl Task {
    /// Creates a task from an async closure returning a JSON payload.
    pub fn new<F, Fut>(key: impl Into<String>, kind: TaskKind, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, FetchError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            kind,
            fetch: Arc::new(move || fetch().boxed()),
        }
    }

    /// Creates a task whose fetch returns any serializable value.
    ///
    /// A value that fails to serialize is reported as a fatal fetch error.
    pub fn typed<T, F, Fut>(key: impl Into<String>, kind: TaskKind, fetch: F) -> Self
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        Self::new(key, kind, move || {
            fetch().map(|result| {
                result.and_then(|value| {
                    serde_json::to_value(value)
                        .map_err(|e| FetchError::fatal(format!("unserializable payload: {e}")))
                })
            })
        })
    }

    /// Creates a date-deterministic task.
    pub fn deterministic<F, Fut>(key: impl Into<String>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, FetchError>> + Send + 'static,
    {
        Self::new(key, TaskKind::DateDeterministic, fetch)
    }

    /// Creates a dynamic task.
    pub fn dynamic<F, Fut>(key: impl Into<String>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, FetchError>> + Send + 'static,
    {
        Self::new(key, TaskKind::Dynamic, fetch)
    }

    /// Creates a task backed by a [`Source`].
    pub fn from_source<S>(key: impl Into<String>, kind: TaskKind, source: Arc<S>) -> Self
    where
        S: Source + 'static,
    {
        Self::new(key, kind, move || {
            let source = source.clone();
            async move { source.fetch().await }
        })
    }

    /// Returns the task key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the task classification.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Starts one fetch attempt.
    #[must_use]
    pub fn fetch(&self) -> FetchFuture {
        (self.fetch)()
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
