//! Rule snapshot and its background refresher.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::Method;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_storage::BlobStore;

use super::rule::{PathParams, Rule, RuleDocument, RuleError};
use crate::observability::record_rule_refresh;

/// The rule selected for a request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub rule: Arc<Rule>,
    pub params: PathParams,
}

/// An immutable set of rules. Replaced wholesale on refresh.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    rules: Vec<Arc<Rule>>,
}

impl RuleSnapshot {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Reads every document in the store. Keys are visited in sorted order
    /// and rules keep their position within a document.
    pub async fn load(store: &dyn BlobStore) -> Result<Self, RuleError> {
        let mut rules = Vec::new();
        for key in store.list().await? {
            let bytes = store.read(&key).await?;
            let document = RuleDocument::from_yaml(&key, &bytes)?;
            for config in document.rules {
                let order = rules.len();
                rules.push(Rule::from_config(config, order).map_err(|e| {
                    RuleError::InvalidDocument {
                        key: key.clone(),
                        message: e.to_string(),
                    }
                })?);
            }
        }
        Ok(Self::new(rules))
    }

    /// Selects the most specific rule matching `path`. The query string, if
    /// any, is ignored.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let path = path.split('?').next().unwrap_or(path);
        self.rules
            .iter()
            .filter_map(|rule| rule.matches(method, path).map(|params| (rule, params)))
            .max_by_key(|(rule, _)| rule.specificity())
            .map(|(rule, params)| RouteMatch {
                rule: Arc::clone(rule),
                params,
            })
    }
}

/// Serves lookups from the current snapshot while a single task refreshes it.
pub struct RuleMatcher {
    service: String,
    store: Arc<dyn BlobStore>,
    snapshot: ArcSwap<RuleSnapshot>,
}

impl RuleMatcher {
    /// Loads the initial snapshot; failure here is fatal to the caller.
    pub async fn load(
        service: impl Into<String>,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self, RuleError> {
        let service = service.into();
        let snapshot = RuleSnapshot::load(store.as_ref()).await?;
        info!(service = %service, rules = snapshot.len(), "loaded proxy rules");
        Ok(Self {
            service,
            store,
            snapshot: ArcSwap::from_pointee(snapshot),
        })
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.snapshot.load().find(method, path)
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.snapshot.load_full()
    }

    /// Rebuilds the snapshot. On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<usize, RuleError> {
        match RuleSnapshot::load(self.store.as_ref()).await {
            Ok(snapshot) => {
                let count = snapshot.len();
                self.snapshot.store(Arc::new(snapshot));
                record_rule_refresh(&self.service, true);
                debug!(service = %self.service, rules = count, "refreshed proxy rules");
                Ok(count)
            }
            Err(e) => {
                record_rule_refresh(&self.service, false);
                warn!(
                    service = %self.service,
                    error = %e,
                    "rule refresh failed, keeping previous rules"
                );
                Err(e)
            }
        }
    }

    /// Refreshes every `interval` until shutdown is signalled.
    pub fn spawn_refresher(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = self.refresh().await;
                    }
                    _ = shutdown.recv() => {
                        debug!(service = %self.service, "rule refresher stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use warden_storage::{StorageError, StorageResult};

    use super::*;

    /// In-memory blob store whose contents tests can swap.
    #[derive(Default)]
    struct StaticBlobs {
        documents: Mutex<Vec<(String, String)>>,
    }

    impl StaticBlobs {
        fn with(documents: &[(&str, &str)]) -> Self {
            let blobs = Self::default();
            blobs.set(documents);
            blobs
        }

        fn set(&self, documents: &[(&str, &str)]) {
            *self.documents.lock().unwrap() = documents
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }
    }

    #[async_trait]
    impl BlobStore for StaticBlobs {
        async fn list(&self) -> StorageResult<Vec<String>> {
            let mut keys: Vec<String> = self
                .documents
                .lock()
                .unwrap()
                .iter()
                .map(|(k, _)| k.clone())
                .collect();
            keys.sort();
            Ok(keys)
        }

        async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
            self.documents
                .lock()
                .unwrap()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone().into_bytes())
                .ok_or_else(|| StorageError::not_found("blob", key))
        }
    }

    fn rule(path: &str, name: &str) -> String {
        format!(
            "  - name: {name}\n    path: {path}\n    backend:\n      namespace: entropy\n      upstream: http://localhost:1\n"
        )
    }

    #[tokio::test]
    async fn test_most_specific_rule_wins() {
        let document = format!(
            "rules:\n{}{}",
            rule("/api/*", "broad"),
            rule("/api/v1/*", "narrow")
        );
        let store = Arc::new(StaticBlobs::with(&[("rules.yaml", &document)]));
        let matcher = RuleMatcher::load("test", store).await.unwrap();

        let found = matcher.find(&Method::GET, "/api/v1/widgets").unwrap();
        assert_eq!(found.rule.name, "narrow");

        let found = matcher.find(&Method::GET, "/api/v2/widgets").unwrap();
        assert_eq!(found.rule.name, "broad");

        assert!(matcher.find(&Method::GET, "/other").is_none());
    }

    #[tokio::test]
    async fn test_literal_segments_break_prefix_ties() {
        let document = format!(
            "rules:\n{}{}",
            rule("/p/{id}/*", "param"),
            rule("/p/{id}/items", "items")
        );
        let store = Arc::new(StaticBlobs::with(&[("rules.yaml", &document)]));
        let matcher = RuleMatcher::load("test", store).await.unwrap();

        let found = matcher.find(&Method::GET, "/p/42/items?limit=1").unwrap();
        assert_eq!(found.rule.name, "items");
        assert_eq!(found.params["id"], "42");
    }

    #[tokio::test]
    async fn test_declaration_order_breaks_full_ties() {
        let first = format!("rules:\n{}", rule("/api/*", "first"));
        let second = format!("rules:\n{}", rule("/api/*", "second"));
        let store = Arc::new(StaticBlobs::with(&[
            ("b.yaml", &second),
            ("a.yaml", &first),
        ]));
        let matcher = RuleMatcher::load("test", store).await.unwrap();

        let found = matcher.find(&Method::GET, "/api/x").unwrap();
        assert_eq!(found.rule.name, "first");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let document = format!("rules:\n{}", rule("/api/*", "api"));
        let store = Arc::new(StaticBlobs::with(&[("rules.yaml", &document)]));
        let matcher = RuleMatcher::load("test", store.clone()).await.unwrap();

        store.set(&[("rules.yaml", "rules: [")]);
        assert!(matcher.refresh().await.is_err());
        assert!(matcher.find(&Method::GET, "/api/x").is_some());

        let replaced = format!("rules:\n{}", rule("/v2/*", "v2"));
        store.set(&[("rules.yaml", &replaced)]);
        assert_eq!(matcher.refresh().await.unwrap(), 1);
        assert!(matcher.find(&Method::GET, "/api/x").is_none());
        assert!(matcher.find(&Method::GET, "/v2/x").is_some());
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_reported() {
        let store = Arc::new(StaticBlobs::with(&[("bad.yaml", "rules:\n  - path: nope\n    backend: {namespace: x, upstream: http://x}\n")]));
        let err = RuleMatcher::load("test", store).await.err().unwrap();
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[tokio::test]
    async fn test_refresher_stops_on_shutdown() {
        let store = Arc::new(StaticBlobs::with(&[]));
        let matcher = Arc::new(RuleMatcher::load("test", store).await.unwrap());
        let (tx, rx) = broadcast::channel(1);

        let handle = matcher.spawn_refresher(Duration::from_secs(3600), rx);
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
