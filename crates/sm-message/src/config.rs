//! Configuration surface (spec §6.4): global process defaults plus
//! per-class overrides. Read once at `MessageSchema` registration and again
//! on every `publish()` call, matching the source's "global mutable state
//! ... writes at init, reads on every publish" design note. Shape mirrors
//! the teacher's plain-struct-with-`Default` config convention
//! (`fc-stream::StreamConfig`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

/// Where log output goes. `Disabled` suppresses the subscriber entirely —
/// distinct from a `Stdout`/`Stderr` sink at the lowest verbosity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoggerSink {
    Disabled,
    Stdout,
    Stderr,
    File(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggerConfig {
    pub sink: LoggerSink,
    pub level: String,
    pub format: LogFormat,
    pub rotation: Option<RotationPolicy>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            sink: LoggerSink::Stdout,
            level: "info".to_string(),
            format: LogFormat::Text,
            rotation: None,
        }
    }
}

/// Process-wide defaults (spec §6.4). `default_transports` is tried in
/// order by `MessageRuntime::publish` when a class declares no transports
/// of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub default_transports: Vec<String>,
    pub logger: LoggerConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_transports: vec!["memory".to_string()],
            logger: LoggerConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Layers environment variables over the compiled-in defaults, the same
    /// precedence the teacher's config loaders use: `SM_DEFAULT_TRANSPORTS`
    /// (comma-separated), `LOG_FORMAT` (`json`/`text`), `RUST_LOG` (level).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(transports) = std::env::var("SM_DEFAULT_TRANSPORTS") {
            config.default_transports = transports
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.logger.format = if format.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            config.logger.level = level;
        }

        config
    }
}

/// Per-class override (spec §6.4): any field present replaces the
/// corresponding `GlobalConfig` field; absent fields fall back to the
/// global default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassConfigOverride {
    pub transports: Option<Vec<String>>,
    pub logger: Option<LoggerConfig>,
    pub serializer: Option<String>,
}

/// Resolved view of global config plus one class's override, computed at
/// schema registration time.
#[derive(Debug, Clone)]
pub struct ResolvedClassConfig {
    pub transports: Vec<String>,
    pub logger: LoggerConfig,
    pub serializer: Option<String>,
}

impl GlobalConfig {
    pub fn resolve(&self, class_override: &ClassConfigOverride) -> ResolvedClassConfig {
        ResolvedClassConfig {
            transports: class_override
                .transports
                .clone()
                .unwrap_or_else(|| self.default_transports.clone()),
            logger: class_override.logger.clone().unwrap_or_else(|| self.logger.clone()),
            serializer: class_override.serializer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_override_replaces_only_its_own_fields() {
        let global = GlobalConfig {
            default_transports: vec!["memory".to_string(), "broker".to_string()],
            logger: LoggerConfig::default(),
        };
        let class_override = ClassConfigOverride {
            transports: Some(vec!["broker".to_string()]),
            logger: None,
            serializer: Some("json".to_string()),
        };

        let resolved = global.resolve(&class_override);
        assert_eq!(resolved.transports, vec!["broker".to_string()]);
        assert_eq!(resolved.logger, LoggerConfig::default());
        assert_eq!(resolved.serializer.as_deref(), Some("json"));
    }

    #[test]
    fn empty_override_falls_back_to_global_defaults() {
        let global = GlobalConfig::default();
        let resolved = global.resolve(&ClassConfigOverride::default());
        assert_eq!(resolved.transports, global.default_transports);
        assert_eq!(resolved.logger, global.logger);
        assert!(resolved.serializer.is_none());
    }
}
