//! Render configuration
//!
//! Loaded from TOML. Every key is optional:
//!
//! ```toml
//! runtime = "node"
//! buffer_immediates = true
//! prevent_unhandled_rejection = false
//! validate_runtime_prefetch = false
//! skip_runtime_stage = false
//! ```

use serde::{Deserialize, Serialize};
use staged_sched::HostRuntime;
use std::path::Path;

/// Settings for one staged render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Host runtime kind; `edge` has no macrotask queue
    pub runtime: HostRuntime,

    /// Hold back run-soon callbacks from the render tick until the
    /// Runtime stage is reached
    pub buffer_immediates: bool,

    /// Silence warnings for stage results that fail unobserved
    pub prevent_unhandled_rejection: bool,

    /// Run the runtime prefetch validator after the render
    pub validate_runtime_prefetch: bool,

    /// Go from Static straight to Dynamic
    pub skip_runtime_stage: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            runtime: HostRuntime::Node,
            buffer_immediates: true,
            prevent_unhandled_rejection: false,
            validate_runtime_prefetch: false,
            skip_runtime_stage: false,
        }
    }
}

impl RenderConfig {
    /// Set the host runtime
    #[must_use]
    pub fn with_runtime(mut self, runtime: HostRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Enable or disable immediate buffering
    #[must_use]
    pub fn with_buffer_immediates(mut self, buffer: bool) -> Self {
        self.buffer_immediates = buffer;
        self
    }

    /// Enable or disable unhandled rejection warnings
    #[must_use]
    pub fn with_prevent_unhandled_rejection(mut self, prevent: bool) -> Self {
        self.prevent_unhandled_rejection = prevent;
        self
    }

    /// Enable or disable runtime prefetch validation
    #[must_use]
    pub fn with_validate_runtime_prefetch(mut self, validate: bool) -> Self {
        self.validate_runtime_prefetch = validate;
        self
    }

    /// Enable or disable skipping the Runtime stage
    #[must_use]
    pub fn with_skip_runtime_stage(mut self, skip: bool) -> Self {
        self.skip_runtime_stage = skip;
        self
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded render configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The TOML is invalid or names an unknown key or runtime
    /// - Validation is enabled while the Runtime stage is skipped
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check settings that cannot be combined
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if validation is requested for a
    /// render without a Runtime stage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validate_runtime_prefetch && self.skip_runtime_stage {
            return Err(ConfigError::Validation(
                "validate_runtime_prefetch needs the runtime stage; unset skip_runtime_stage"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Settings that cannot be combined
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_document_is_default() {
        let config = RenderConfig::from_toml_str("").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert!(config.buffer_immediates);
        assert_eq!(config.runtime, HostRuntime::Node);
    }

    #[test]
    fn parses_every_key() {
        let config = RenderConfig::from_toml_str(
            r#"
            runtime = "edge"
            buffer_immediates = false
            prevent_unhandled_rejection = true
            skip_runtime_stage = true
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            RenderConfig::default()
                .with_runtime(HostRuntime::Edge)
                .with_buffer_immediates(false)
                .with_prevent_unhandled_rejection(true)
                .with_skip_runtime_stage(true)
        );
    }

    #[test]
    fn unknown_runtime_is_rejected() {
        let err = RenderConfig::from_toml_str(r#"runtime = "deno""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = RenderConfig::from_toml_str("buffer_immediate = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_without_runtime_stage_is_rejected() {
        let err = RenderConfig::from_toml_str(
            "validate_runtime_prefetch = true\nskip_runtime_stage = true",
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(msg) => assert!(msg.contains("skip_runtime_stage")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn toml_output_parses_back() {
        let config = RenderConfig::default()
            .with_runtime(HostRuntime::Edge)
            .with_validate_runtime_prefetch(true);
        let text = config.to_toml().unwrap();
        assert!(text.contains("runtime = \"edge\""));
        assert_eq!(RenderConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "validate_runtime_prefetch = true").unwrap();

        let config = RenderConfig::load(file.path()).unwrap();
        assert!(config.validate_runtime_prefetch);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RenderConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().starts_with("failed to read configuration file"));
    }
}
