//! Backend registry: discovers, health-checks, and addresses the
//! remote services the pipeline depends on (layout/OCR engines, the vision
//! LLM, the embeddings service). Modelled after the shared, concurrently
//! read, single-writer state the rest of this crate uses for anything that
//! outlives one document — see `tokio::sync::RwLock` usage here and in
//! [`crate::templates::TemplateRegistry`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    LayoutExtraction,
    VisionLlm,
    TextLlmLocal,
    TextLlmCloud,
    Embeddings,
}

#[derive(Debug, Clone)]
pub struct BackendEntry {
    pub name: String,
    pub base_url: String,
    pub capability: Capability,
    pub health: HealthState,
    pub last_probed: Option<chrono::DateTime<chrono::Utc>>,
}

/// Holds the registered backends behind a single-writer lock; reads (the
/// common case — one per pipeline stage) never block each other.
pub struct BackendRegistry {
    http: reqwest::Client,
    entries: RwLock<HashMap<String, BackendEntry>>,
    probe_timeout: Duration,
}

impl BackendRegistry {
    pub fn new(http: reqwest::Client, probe_timeout: Duration) -> Self {
        Self {
            http,
            entries: RwLock::new(HashMap::new()),
            probe_timeout,
        }
    }

    /// Register a backend as `Unknown` until its first health probe.
    pub async fn register(&self, name: impl Into<String>, base_url: impl Into<String>, capability: Capability) {
        let name = name.into();
        let mut entries = self.entries.write().await;
        entries.insert(
            name.clone(),
            BackendEntry {
                name,
                base_url: base_url.into(),
                capability,
                health: HealthState::Unknown,
                last_probed: None,
            },
        );
    }

    pub async fn resolve(&self, name: &str) -> Option<String> {
        self.entries.read().await.get(name).map(|e| e.base_url.clone())
    }

    pub async fn health(&self, name: &str) -> HealthState {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| e.health)
            .unwrap_or(HealthState::Unknown)
    }

    /// True iff at least one registered backend offering `capability` is
    /// currently `Healthy` or has never been probed yet (`Unknown` is
    /// optimistically treated as available so a freshly-started process
    /// can still route to a backend before the first probe completes).
    pub async fn is_available(&self, capability: Capability) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|e| e.capability == capability && e.health != HealthState::Degraded)
    }

    pub async fn first_healthy(&self, capability: Capability) -> Option<BackendEntry> {
        self.entries
            .read()
            .await
            .values()
            .find(|e| e.capability == capability && e.health != HealthState::Degraded)
            .cloned()
    }

    /// Probe one backend's `/health` endpoint and update its cached state.
    /// Probe failures are non-fatal — they only downgrade health.
    pub async fn probe(&self, name: &str) {
        let base_url = match self.resolve(name).await {
            Some(u) => u,
            None => return,
        };
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        let healthy = tokio::time::timeout(self.probe_timeout, self.http.get(&url).send())
            .await
            .ok()
            .and_then(|r| r.ok())
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.health = if healthy { HealthState::Healthy } else { HealthState::Degraded };
            entry.last_probed = Some(chrono::Utc::now());
            debug!(backend = %name, health = ?entry.health, "backend health probe");
        }
    }

    pub async fn probe_all(&self) {
        let names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for name in names {
            self.probe(&name).await;
        }
    }

    /// Explicitly mark a backend degraded, e.g. after a failed call outside
    /// the periodic probe loop, so the caller can fall through to the next
    /// entry in its strategy without waiting for the next probe tick.
    pub async fn mark_degraded(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.health = HealthState::Degraded;
            warn!(backend = %name, "backend marked degraded");
        }
    }
}

/// Spawn the background health-prober owned by [`crate::context::Context`].
/// Returns a handle the caller may abort on shutdown.
pub fn spawn_health_prober(registry: Arc<BackendRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.probe_all().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BackendRegistry {
        BackendRegistry::new(reqwest::Client::new(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn unregistered_backend_resolves_to_none() {
        let r = registry();
        assert_eq!(r.resolve("layout").await, None);
        assert_eq!(r.health("layout").await, HealthState::Unknown);
    }

    #[tokio::test]
    async fn unknown_health_counts_as_available() {
        let r = registry();
        r.register("layout", "http://127.0.0.1:1", Capability::LayoutExtraction).await;
        assert!(r.is_available(Capability::LayoutExtraction).await);
    }

    #[tokio::test]
    async fn degraded_backend_is_unavailable_when_it_is_the_only_one() {
        let r = registry();
        r.register("layout", "http://127.0.0.1:1", Capability::LayoutExtraction).await;
        r.mark_degraded("layout").await;
        assert!(!r.is_available(Capability::LayoutExtraction).await);
    }

    #[tokio::test]
    async fn first_healthy_skips_degraded_entries() {
        let r = registry();
        r.register("a", "http://a", Capability::Embeddings).await;
        r.register("b", "http://b", Capability::Embeddings).await;
        r.mark_degraded("a").await;
        let chosen = r.first_healthy(Capability::Embeddings).await.unwrap();
        assert_eq!(chosen.name, "b");
    }
}
