//! Schema retrieval: the only I/O-capable collaborator of the toolchain.
//!
//! The typechecker and the NN decoder obtain class and function schemas
//! through the abstract [`SchemaRetriever`]. [`CachingSchemaRetriever`]
//! wraps any retriever with a shared, coalescing cache: at most one
//! outstanding fetch per class, negative results (missing classes) cached
//! too, and a per-call deadline. Consumers see no locks; the cache handle
//! is cheap to clone and shared across toolchain invocations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::{ClassDef, Dataset, FunctionDef, FunctionKind};

/// Errors surfaced by schema retrieval.
///
/// Retries of transient failures are the retriever's responsibility; by
/// the time an error reaches the toolchain it is final.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("class @{kind} does not exist")]
    ClassNotFound { kind: String },

    #[error("class @{kind} has no {kind_of} named {name}")]
    FunctionNotFound {
        kind: String,
        name: String,
        kind_of: &'static str,
    },

    #[error("schema fetch for @{kind} timed out")]
    FetchTimeout { kind: String },

    #[error("schema transport error: {0}")]
    Transport(String),
}

/// Flags for [`SchemaRetriever::get_class`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassFlags {
    /// Populate `#_[canonical]` / `#_[confirmation]` / `#_[formatted]`
    /// annotations.
    pub inject_natural_language: bool,
    /// Fetch full metadata rather than the execution subset.
    pub get_meta: bool,
}

/// Abstract access to the Thingpedia catalogue.
#[async_trait]
pub trait SchemaRetriever: Send + Sync {
    async fn get_class(
        &self,
        kind: &str,
        flags: ClassFlags,
    ) -> Result<Arc<ClassDef>, SchemaError>;

    async fn get_function(
        &self,
        kind: &str,
        name: &str,
        kind_of: FunctionKind,
    ) -> Result<Arc<FunctionDef>, SchemaError> {
        let class = self.get_class(kind, ClassFlags::default()).await?;
        match class.get_function(kind_of, name) {
            Some(def) => Ok(Arc::new(def.clone())),
            None => Err(SchemaError::FunctionNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                kind_of: kind_of.surface(),
            }),
        }
    }

    /// Example templates for the given classes, merged into one dataset.
    async fn get_examples_by_kinds(&self, kinds: &[String]) -> Result<Dataset, SchemaError>;

    /// Populate natural-language annotations on a class. The default
    /// implementation returns the class unchanged.
    async fn inject_natural_language_annotations(
        &self,
        class: ClassDef,
    ) -> Result<ClassDef, SchemaError> {
        Ok(class)
    }
}

/// Shared caching layer over any [`SchemaRetriever`].
///
/// Lookups for the same class coalesce onto a single in-flight fetch.
/// `Ok(None)` entries record classes known to be missing so repeated
/// lookups do not hit the network again. Timeouts and transport errors
/// are not cached.
pub struct CachingSchemaRetriever<R> {
    inner: Arc<R>,
    classes: moka::future::Cache<String, Option<Arc<ClassDef>>>,
    deadline: Duration,
}

impl<R> Clone for CachingSchemaRetriever<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            classes: self.classes.clone(),
            deadline: self.deadline,
        }
    }
}

const DEFAULT_CACHE_CAPACITY: u64 = 4096;
const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

impl<R: SchemaRetriever + 'static> CachingSchemaRetriever<R> {
    pub fn new(inner: R) -> Self {
        Self::with_deadline(inner, DEFAULT_DEADLINE)
    }

    pub fn with_deadline(inner: R, deadline: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            classes: moka::future::Cache::new(DEFAULT_CACHE_CAPACITY),
            deadline,
        }
    }

    async fn lookup_class(
        &self,
        kind: &str,
        flags: ClassFlags,
    ) -> Result<Option<Arc<ClassDef>>, SchemaError> {
        if let Some(cached) = self.classes.get(kind).await {
            tracing::trace!(kind, "schema cache hit");
            return Ok(cached);
        }
        tracing::debug!(kind, "schema cache miss");
        let inner = self.inner.clone();
        let deadline = self.deadline;
        let owned_kind = kind.to_string();
        self.classes
            .try_get_with(kind.to_string(), async move {
                let fetch = inner.get_class(&owned_kind, flags);
                match tokio::time::timeout(deadline, fetch).await {
                    Ok(Ok(class)) => Ok(Some(class)),
                    // Missing classes are cached as negative entries.
                    Ok(Err(SchemaError::ClassNotFound { .. })) => Ok(None),
                    Ok(Err(other)) => Err(other),
                    Err(_) => Err(SchemaError::FetchTimeout { kind: owned_kind }),
                }
            })
            .await
            .map_err(|e: Arc<SchemaError>| (*e).clone())
    }
}

#[async_trait]
impl<R: SchemaRetriever + 'static> SchemaRetriever for CachingSchemaRetriever<R> {
    async fn get_class(
        &self,
        kind: &str,
        flags: ClassFlags,
    ) -> Result<Arc<ClassDef>, SchemaError> {
        match self.lookup_class(kind, flags).await? {
            Some(class) => Ok(class),
            None => Err(SchemaError::ClassNotFound {
                kind: kind.to_string(),
            }),
        }
    }

    async fn get_examples_by_kinds(&self, kinds: &[String]) -> Result<Dataset, SchemaError> {
        self.inner.get_examples_by_kinds(kinds).await
    }

    async fn inject_natural_language_annotations(
        &self,
        class: ClassDef,
    ) -> Result<ClassDef, SchemaError> {
        self.inner.inject_natural_language_annotations(class).await
    }
}

/// In-memory retriever backed by a class table. Used by tests and by
/// embedders that ship a static catalogue.
#[derive(Default)]
pub struct MemorySchemaRetriever {
    classes: std::sync::RwLock<IndexMap<String, Arc<ClassDef>>>,
    datasets: std::sync::RwLock<Vec<Dataset>>,
}

impl MemorySchemaRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&self, class: ClassDef) {
        self.classes
            .write()
            .expect("class table poisoned")
            .insert(class.kind.clone(), Arc::new(class));
    }

    pub fn add_dataset(&self, dataset: Dataset) {
        self.datasets
            .write()
            .expect("dataset table poisoned")
            .push(dataset);
    }
}

#[async_trait]
impl SchemaRetriever for MemorySchemaRetriever {
    async fn get_class(
        &self,
        kind: &str,
        _flags: ClassFlags,
    ) -> Result<Arc<ClassDef>, SchemaError> {
        self.classes
            .read()
            .expect("class table poisoned")
            .get(kind)
            .cloned()
            .ok_or_else(|| SchemaError::ClassNotFound {
                kind: kind.to_string(),
            })
    }

    async fn get_examples_by_kinds(&self, kinds: &[String]) -> Result<Dataset, SchemaError> {
        let datasets = self.datasets.read().expect("dataset table poisoned");
        let mut merged = Dataset {
            name: "org.thingpedia.dynamic".to_string(),
            language: None,
            examples: Vec::new(),
            annotations: Default::default(),
            span: None,
        };
        for dataset in datasets.iter() {
            if kinds.iter().any(|k| *k == dataset.name) {
                merged.examples.extend(dataset.examples.iter().cloned());
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ArgDirection, ArgumentDef, FunctionDef};
    use crate::types::Type;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRetriever {
        inner: MemorySchemaRetriever,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SchemaRetriever for CountingRetriever {
        async fn get_class(
            &self,
            kind: &str,
            flags: ClassFlags,
        ) -> Result<Arc<ClassDef>, SchemaError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.get_class(kind, flags).await
        }

        async fn get_examples_by_kinds(
            &self,
            kinds: &[String],
        ) -> Result<Dataset, SchemaError> {
            self.inner.get_examples_by_kinds(kinds).await
        }
    }

    fn twitter_class() -> ClassDef {
        let mut class = ClassDef::new("com.twitter");
        class.add_function(
            FunctionDef::new(FunctionKind::Action, "post").with_args(vec![ArgumentDef::new(
                "status",
                ArgDirection::InReq,
                Type::string(),
            )]),
        );
        class
    }

    #[tokio::test]
    async fn caching_coalesces_fetches() {
        let inner = CountingRetriever {
            inner: MemorySchemaRetriever::new(),
            fetches: AtomicUsize::new(0),
        };
        inner.inner.add_class(twitter_class());
        let cache = CachingSchemaRetriever::new(inner);

        let first = cache
            .get_function("com.twitter", "post", FunctionKind::Action)
            .await
            .unwrap();
        let second = cache
            .get_function("com.twitter", "post", FunctionKind::Action)
            .await
            .unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn negative_results_are_cached() {
        let inner = CountingRetriever {
            inner: MemorySchemaRetriever::new(),
            fetches: AtomicUsize::new(0),
        };
        let cache = CachingSchemaRetriever::new(inner);

        for _ in 0..3 {
            let err = cache
                .get_class("com.nonexistent", ClassFlags::default())
                .await
                .unwrap_err();
            assert!(matches!(err, SchemaError::ClassNotFound { .. }));
        }
        assert_eq!(cache.inner.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn examples_merge_by_kind() {
        let retriever = MemorySchemaRetriever::new();
        let mut dataset = Dataset {
            name: "com.twitter".to_string(),
            language: Some("en".to_string()),
            examples: Vec::new(),
            annotations: Default::default(),
            span: None,
        };
        dataset.examples.push(crate::ast::Example {
            id: None,
            params: Default::default(),
            body: crate::ast::DeclarationBody::Actions(Vec::new()),
            utterances: vec!["tweet something".to_string()],
            annotations: Default::default(),
            span: None,
        });
        retriever.add_dataset(dataset);

        let merged = retriever
            .get_examples_by_kinds(&["com.twitter".to_string()])
            .await
            .unwrap();
        assert_eq!(merged.examples.len(), 1);
        let empty = retriever
            .get_examples_by_kinds(&["com.gmail".to_string()])
            .await
            .unwrap();
        assert!(empty.examples.is_empty());
    }

    #[tokio::test]
    async fn missing_function_on_existing_class() {
        let retriever = MemorySchemaRetriever::new();
        retriever.add_class(twitter_class());
        let err = retriever
            .get_function("com.twitter", "retweet", FunctionKind::Action)
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::FunctionNotFound { .. }));
    }
}
