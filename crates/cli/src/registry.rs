//! Adapter registry construction from the `[generators]` config section.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use chapterforge_core::{
    testing::MockGenerator, AdapterRegistry, ArtifactStore, ContentType, FfmpegComposer,
    GeneratorBackend, GeneratorsConfig, HttpGenerator,
};

/// Build one adapter per configured capability.
pub async fn build_registry(
    generators: &GeneratorsConfig,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();

    for capability in ContentType::ALL {
        let Some(backend) = generators.get(capability) else {
            info!("No {} generator configured", capability);
            continue;
        };

        match backend {
            GeneratorBackend::Http(http_config) => {
                info!(
                    "Initializing HTTP {} generator at {}",
                    capability, http_config.endpoint
                );
                let generator =
                    HttpGenerator::new(capability, http_config.clone(), Arc::clone(&artifacts))
                        .with_context(|| format!("Failed to create {} generator", capability))?;
                registry.register(Arc::new(generator));
            }
            GeneratorBackend::Ffmpeg(ffmpeg_config) => {
                info!(
                    "Initializing ffmpeg composer ({})",
                    ffmpeg_config.ffmpeg_path.display()
                );
                registry.register(Arc::new(FfmpegComposer::new(
                    ffmpeg_config.clone(),
                    Arc::clone(&artifacts),
                )));
            }
            GeneratorBackend::Mock { delay_ms } => {
                warn!("Using mock {} generator", capability);
                let mock = MockGenerator::new(capability).with_store(Arc::clone(&artifacts));
                mock.set_delay(Duration::from_millis(*delay_ms)).await;
                registry.register(Arc::new(mock));
            }
        }
    }

    for (adapter, error) in registry.validate_all().await {
        warn!("Generator {} failed validation: {}", adapter, error);
    }

    Ok(registry)
}
