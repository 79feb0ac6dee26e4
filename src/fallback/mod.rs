//! Ordered rendering with fallback between backends.
//!
//! Backends are tried one at a time in priority order. Each attempt is bounded by the
//! backend's timeout and retried up to its retry count; the first success wins and
//! every failure is kept in the result so operators can see why a backend was passed over.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::render::{
    AuthoringBackend, BackendKind, BaselineBackend, ExportOutputs, RemoteBackend, RenderBackend,
    RenderError, RenderRequest, RenderSettings, VideoInfo,
};

/// Longest timeout honoured for a single attempt
const MAX_TIMEOUT_SECONDS: f64 = 24.0 * 60.0 * 60.0;

/// How one backend takes part in the fallback chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lower values are tried first
    pub priority: i32,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,

    /// Attempts made before moving on, at least 1
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default)]
    pub extra_options: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_seconds() -> f64 {
    300.0
}

fn default_retry_count() -> u32 {
    1
}

impl BackendConfig {
    pub fn new(kind: BackendKind, priority: i32) -> Self {
        Self {
            kind,
            enabled: true,
            priority,
            timeout_seconds: default_timeout_seconds(),
            retry_count: default_retry_count(),
            extra_options: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.extra_options.insert(key.to_string(), value.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Number of attempts, never below 1
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// Per-attempt time budget
    pub fn attempt_timeout(&self) -> Duration {
        let seconds = if self.timeout_seconds.is_finite() && self.timeout_seconds > 0.0 {
            self.timeout_seconds.min(MAX_TIMEOUT_SECONDS)
        } else {
            default_timeout_seconds()
        };
        Duration::from_secs_f64(seconds)
    }
}

/// The chain used when the caller supplies none
pub fn default_backend_configs() -> Vec<BackendConfig> {
    vec![
        BackendConfig::new(BackendKind::Authoring, 1).with_timeout(600.0),
        BackendConfig::new(BackendKind::Baseline, 2)
            .with_timeout(900.0)
            .with_retries(2),
        BackendConfig::new(BackendKind::Remote, 3).disabled(),
    ]
}

/// Outcome of one [`FallbackManager::render`] call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackResult {
    pub success: bool,
    pub video_info: Option<VideoInfo>,
    pub used_backend: Option<BackendKind>,
    pub attempted_backends: Vec<BackendKind>,
    /// Last error seen for each backend
    pub errors: BTreeMap<BackendKind, String>,
}

impl FallbackResult {
    /// One line per failed backend, for error messages
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "no render backend is enabled".to_string();
        }

        self.errors
            .iter()
            .map(|(kind, error)| format!("{}: {}", kind, error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Diagnostic view of one configured backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub enabled: bool,
    pub priority: i32,
    pub timeout_seconds: f64,
    pub retry_count: u32,
}

/// Diagnostic view of the whole manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub backends: Vec<BackendStatus>,
    pub available: Vec<BackendKind>,
}

/// Builds the backend for a configuration
pub type BackendFactory = Box<dyn Fn(&BackendConfig, &RenderSettings) -> Arc<dyn RenderBackend> + Send + Sync>;

/// Tries render backends in priority order until one succeeds.
///
/// Backends are built on first use and reused for the lifetime of the manager.
/// `render` takes `&mut self`: one manager serves one caller at a time.
pub struct FallbackManager {
    configs: Vec<BackendConfig>,
    settings: RenderSettings,
    factories: HashMap<BackendKind, BackendFactory>,
    backends: HashMap<BackendKind, Arc<dyn RenderBackend>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl FallbackManager {
    /// Create a manager from `configs`, or from [`default_backend_configs`] when `None`
    pub fn new(configs: Option<Vec<BackendConfig>>, settings: RenderSettings) -> Self {
        let mut manager = Self {
            configs: configs.unwrap_or_else(default_backend_configs),
            settings,
            factories: HashMap::new(),
            backends: HashMap::new(),
            cancel: None,
        };

        manager.register_factory(BackendKind::Baseline, |config, settings| {
            Arc::new(BaselineBackend::new(settings).with_options(&config.extra_options))
        });
        manager.register_factory(BackendKind::Authoring, |_, settings| {
            Arc::new(AuthoringBackend::new(settings))
        });
        manager.register_factory(BackendKind::Remote, |_, _| Arc::new(RemoteBackend::new()));

        manager.sort_configs();
        manager
    }

    /// Stop starting new attempts once `cancel` reads `true`
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Replace how backends of `kind` are built. Drops any cached instance.
    pub fn register_factory<F>(&mut self, kind: BackendKind, factory: F)
    where
        F: Fn(&BackendConfig, &RenderSettings) -> Arc<dyn RenderBackend> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
        self.backends.remove(&kind);
    }

    /// Disable backends whose external prerequisites are missing on this machine
    pub fn auto_detect(&mut self) {
        let authoring_ready = self.settings.automation.prerequisites_present();

        for config in &mut self.configs {
            if config.kind == BackendKind::Authoring && config.enabled && !authoring_ready {
                tracing::warn!("Authoring tool or automation executable not found, disabling {}", config.kind);
                config.enabled = false;
            }
        }

        self.sort_configs();
    }

    /// Render with the first backend that succeeds.
    ///
    /// `preferred` is tried first when it is enabled. Backend failures never escape;
    /// they are recorded in [`FallbackResult::errors`].
    pub async fn render(
        &mut self,
        request: &RenderRequest,
        mut outputs: Option<&mut ExportOutputs>,
        preferred: Option<BackendKind>,
    ) -> FallbackResult {
        let mut result = FallbackResult::default();
        let candidates = self.candidates(preferred);

        if candidates.is_empty() {
            tracing::warn!("No render backend is enabled");
            return result;
        }

        'backends: for config in candidates {
            let kind = config.kind;
            result.attempted_backends.push(kind);

            let Some(backend) = self.backend(&config) else {
                result
                    .errors
                    .insert(kind, "no implementation registered".to_string());
                continue;
            };

            let attempts = config.attempts();
            for attempt in 1..=attempts {
                if self.is_cancelled() {
                    result.errors.insert(kind, RenderError::Cancelled.to_string());
                    break 'backends;
                }

                tracing::info!(backend = %kind, attempt, attempts, "Trying render backend");

                let outcome =
                    tokio::time::timeout(config.attempt_timeout(), backend.render(request, outputs.as_deref_mut()))
                        .await;

                match outcome {
                    Ok(Ok(video)) => {
                        tracing::info!(backend = %kind, "Render succeeded");
                        result.success = true;
                        result.video_info = Some(video);
                        result.used_backend = Some(kind);
                        return result;
                    }
                    Err(_) => {
                        let error = RenderError::Timeout(config.attempt_timeout().as_secs_f64());
                        tracing::warn!(backend = %kind, attempt, "Render attempt failed: {}", error);
                        result.errors.insert(kind, error.to_string());
                    }
                    Ok(Err(error)) if error.is_unsupported() => {
                        tracing::warn!(backend = %kind, "Backend unsupported, not retrying: {}", error);
                        result.errors.insert(kind, error.to_string());
                        break;
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(backend = %kind, attempt, "Render attempt failed: {}", error);
                        result.errors.insert(kind, error.to_string());

                        if attempt < attempts {
                            tokio::time::sleep(self.settings.retry_backoff).await;
                        }
                    }
                }
            }
        }

        tracing::error!("All render backends failed: {}", result.error_summary());
        result
    }

    /// Enabled backends in the order they would be tried
    pub fn available_backends(&self) -> Vec<BackendKind> {
        self.configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.kind)
            .collect()
    }

    /// Toggle one backend. Returns `false` if no such backend is configured.
    pub fn set_backend_enabled(&mut self, kind: BackendKind, enabled: bool) -> bool {
        match self.configs.iter_mut().find(|c| c.kind == kind) {
            Some(config) => {
                config.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            backends: self
                .configs
                .iter()
                .map(|c| BackendStatus {
                    kind: c.kind,
                    enabled: c.enabled,
                    priority: c.priority,
                    timeout_seconds: c.timeout_seconds,
                    retry_count: c.retry_count,
                })
                .collect(),
            available: self.available_backends(),
        }
    }

    pub fn configs(&self) -> &[BackendConfig] {
        &self.configs
    }

    fn candidates(&self, preferred: Option<BackendKind>) -> Vec<BackendConfig> {
        let mut candidates: Vec<BackendConfig> = self.configs.iter().filter(|c| c.enabled).cloned().collect();

        if let Some(preferred) = preferred {
            if let Some(position) = candidates.iter().position(|c| c.kind == preferred) {
                let config = candidates.remove(position);
                candidates.insert(0, config);
            } else {
                tracing::debug!("Preferred backend {} is not enabled, using priority order", preferred);
            }
        }

        candidates
    }

    fn backend(&mut self, config: &BackendConfig) -> Option<Arc<dyn RenderBackend>> {
        if let Some(backend) = self.backends.get(&config.kind) {
            return Some(Arc::clone(backend));
        }

        let factory = self.factories.get(&config.kind)?;
        let backend = factory(config, &self.settings);
        self.backends.insert(config.kind, Arc::clone(&backend));
        Some(backend)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    fn sort_configs(&mut self) {
        self.configs.sort_by_key(|c| c.priority);
    }
}
