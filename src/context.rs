//! Application context: wires every shared resource the orchestrator and
//! HTTP layer need into one cloneable handle, and owns startup-time
//! initialisation (backend registration, health probing, template loading).

use crate::config::PipelineConfig;
use crate::pipeline::blob::FsBlobStore;
use crate::registry::{spawn_health_prober, BackendRegistry, Capability};
use crate::templates::TemplateRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct Context {
    pub config: Arc<PipelineConfig>,
    pub http: reqwest::Client,
    pub registry: Arc<BackendRegistry>,
    pub templates: Arc<TemplateRegistry>,
    pub blobs: Arc<FsBlobStore>,
}

impl Context {
    /// Build the context from `config`, registering whichever backends are
    /// configured and spawning the background health prober. Called once at
    /// startup; the returned handle is cloned into every request handler.
    pub async fn build(config: PipelineConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.layout_timeout_secs))
            .build()?;

        let registry = Arc::new(BackendRegistry::new(http.clone(), Duration::from_secs(config.health_probe_timeout_secs)));

        if let Some(url) = &config.layout_service_url {
            registry.register("layout", url.clone(), Capability::LayoutExtraction).await;
        }
        if let Some(url) = &config.vision_llm_url {
            registry.register("vision", url.clone(), Capability::VisionLlm).await;
        }
        if let Some(url) = &config.embed_service_url {
            registry.register("embeddings", url.clone(), Capability::Embeddings).await;
        }

        registry.probe_all().await;
        spawn_health_prober(Arc::clone(&registry), Duration::from_secs(config.health_probe_interval_secs));

        let templates = TemplateRegistry::load_dir(&config.templates_dir).await?;
        let blobs = FsBlobStore::new(config.blob_store_dir.clone());

        info!(
            templates_dir = %config.templates_dir.display(),
            blob_store_dir = %config.blob_store_dir.display(),
            "context initialised"
        );

        Ok(Self { config: Arc::new(config), http, registry, templates: Arc::new(templates), blobs: Arc::new(blobs) })
    }

    pub async fn from_env() -> anyhow::Result<Self> {
        Self::build(PipelineConfig::from_env()?).await
    }
}
