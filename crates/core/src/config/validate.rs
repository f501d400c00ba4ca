use super::{
    types::{Config, GeneratorBackend},
    ConfigError,
};
use crate::job::ContentType;

/// Validate configuration
/// Currently validates:
/// - Every slot pool and timeout is non-zero
/// - Retry policy is well formed
/// - HTTP backends have an endpoint; ffmpeg only composes video
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let orchestrator = &config.orchestrator;

    for capability in ContentType::ALL {
        if orchestrator.slots.for_capability(capability) == 0 {
            return Err(invalid(format!(
                "orchestrator.slots.{} cannot be 0",
                capability
            )));
        }
        if orchestrator.timeouts.for_capability(capability).is_zero() {
            return Err(invalid(format!(
                "orchestrator.timeouts.{}_ms cannot be 0",
                capability
            )));
        }
    }

    let retry = &orchestrator.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("orchestrator.retry.max_attempts cannot be 0"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(invalid(
            "orchestrator.retry.initial_delay_ms cannot exceed max_delay_ms",
        ));
    }
    if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
        return Err(invalid(
            "orchestrator.retry.backoff_multiplier must be at least 1.0",
        ));
    }

    if orchestrator.notification_buffer == 0 {
        return Err(invalid("orchestrator.notification_buffer cannot be 0"));
    }

    for capability in ContentType::ALL {
        match config.generators.get(capability) {
            Some(GeneratorBackend::Http(http)) if http.endpoint.trim().is_empty() => {
                return Err(invalid(format!(
                    "generators.{}.endpoint cannot be empty",
                    capability
                )));
            }
            Some(GeneratorBackend::Ffmpeg(_)) if capability != ContentType::Video => {
                return Err(invalid(format!(
                    "generators.{}: ffmpeg backend only produces video",
                    capability
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorsConfig;
    use crate::generator::{FfmpegComposerConfig, HttpGeneratorConfig};

    fn assert_invalid(config: &Config) {
        let result = validate_config(config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_slots_fails() {
        let mut config = Config::default();
        config.orchestrator.slots.audio = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let mut config = Config::default();
        config.orchestrator.timeouts.video_ms = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_retry_policy() {
        let mut config = Config::default();
        config.orchestrator.retry.max_attempts = 0;
        assert_invalid(&config);

        let mut config = Config::default();
        config.orchestrator.retry.initial_delay_ms = 60_000;
        assert_invalid(&config);

        let mut config = Config::default();
        config.orchestrator.retry.backoff_multiplier = 0.5;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_generator_backends() {
        let config = Config {
            generators: GeneratorsConfig {
                illustration: Some(GeneratorBackend::Http(HttpGeneratorConfig::new("  "))),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config);

        let config = Config {
            generators: GeneratorsConfig {
                audio: Some(GeneratorBackend::Ffmpeg(FfmpegComposerConfig::default())),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config);

        let config = Config {
            generators: GeneratorsConfig {
                video: Some(GeneratorBackend::Ffmpeg(FfmpegComposerConfig::default())),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }
}
