use std::{fmt::Display, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    backend::{Backend, Capabilities, FileBackend, MemoryBackend},
    clock::{Clock, SystemClock},
    engine::TtlEngine,
    sweeper::Sweeper,
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            other => Err(Error::InvalidArgument(format!("unknown backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    /// Overrides the backend's declared precision.
    pub ttl_precision: Option<Duration>,
    /// Overrides the backend's declared `can_query_ttl`.
    pub can_query_ttl: Option<bool>,
    pub sweep_interval: Option<Duration>,
    pub aof_sync_interval: Duration,
    pub checkpoint_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            data_dir: PathBuf::from(Self::DEFAULT_DATA_DIR),
            ttl_precision: None,
            can_query_ttl: None,
            sweep_interval: None,
            aof_sync_interval: Self::DEFAULT_AOF_SYNC_INTERVAL,
            checkpoint_interval: None,
        }
    }
}

fn parse_or_warn<T>(name: &str, raw: Option<String>) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}

fn millis_or_warn(name: &str, raw: Option<String>) -> Option<Duration> {
    parse_or_warn::<u64>(name, raw).map(Duration::from_millis)
}

impl Config {
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_AOF_SYNC_INTERVAL: Duration = Duration::from_secs(1);

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset or malformed values
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            backend: parse_or_warn("KVTTL_BACKEND", lookup("KVTTL_BACKEND"))
                .unwrap_or(defaults.backend),
            data_dir: lookup("KVTTL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            ttl_precision: millis_or_warn("KVTTL_TTL_PRECISION_MS", lookup("KVTTL_TTL_PRECISION_MS"))
                .filter(|precision| {
                    let positive = !precision.is_zero();
                    if !positive {
                        warn!("Ignoring KVTTL_TTL_PRECISION_MS=0: precision must be positive");
                    }
                    positive
                }),
            can_query_ttl: parse_or_warn("KVTTL_CAN_QUERY_TTL", lookup("KVTTL_CAN_QUERY_TTL")),
            sweep_interval: millis_or_warn(
                "KVTTL_SWEEP_INTERVAL_MS",
                lookup("KVTTL_SWEEP_INTERVAL_MS"),
            )
            .filter(|d| !d.is_zero()),
            aof_sync_interval: millis_or_warn(
                "KVTTL_AOF_SYNC_INTERVAL_MS",
                lookup("KVTTL_AOF_SYNC_INTERVAL_MS"),
            )
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.aof_sync_interval),
            checkpoint_interval: millis_or_warn(
                "KVTTL_CHECKPOINT_INTERVAL_MS",
                lookup("KVTTL_CHECKPOINT_INTERVAL_MS"),
            )
            .filter(|d| !d.is_zero()),
        }
    }

    /// Applies configured overrides to a backend's declared capabilities.
    pub fn capabilities(&self, declared: Capabilities) -> Capabilities {
        let mut capabilities = declared;
        if let Some(precision) = self.ttl_precision {
            capabilities = capabilities.with_precision(precision);
        }
        if let Some(can_query_ttl) = self.can_query_ttl {
            capabilities = capabilities.with_ttl_queries(can_query_ttl);
        }
        capabilities
    }

    pub fn open_engine(&self) -> Result<TtlEngine> {
        self.open_engine_with_clock(Arc::new(SystemClock))
    }

    /// Opens the configured backend and wraps it in an engine. When called
    /// inside a tokio runtime, background sweeping and log maintenance are
    /// started as configured; they stop on their own once the engine is gone.
    pub fn open_engine_with_clock(&self, clock: Arc<dyn Clock>) -> Result<TtlEngine> {
        let in_runtime = tokio::runtime::Handle::try_current().is_ok();

        let backend: Arc<dyn Backend> = match self.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::with_capabilities(
                self.capabilities(MemoryBackend::DEFAULT_CAPABILITIES),
            )),
            BackendKind::File => {
                let backend = Arc::new(FileBackend::open_with_capabilities(
                    &self.data_dir,
                    self.capabilities(FileBackend::DEFAULT_CAPABILITIES),
                    clock.as_ref(),
                )?);
                if in_runtime {
                    backend.spawn_maintenance(
                        clock.clone(),
                        self.aof_sync_interval,
                        self.checkpoint_interval,
                    );
                }
                backend
            }
        };

        let engine = TtlEngine::with_clock(backend, clock);
        info!(
            "Opened {} backend with {:?}",
            engine.backend_name(),
            engine.capabilities()
        );

        if let (true, Some(every)) = (in_runtime, self.sweep_interval) {
            Sweeper::spawn(&engine, every);
        }

        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::engine::SetOptions;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.ttl_precision, None);
        assert_eq!(config.sweep_interval, None);
        assert_eq!(config.aof_sync_interval, Duration::from_secs(1));
    }

    #[test]
    fn reads_all_variables() {
        let config = config_from(&[
            ("KVTTL_BACKEND", "File"),
            ("KVTTL_DATA_DIR", "/tmp/kvttl"),
            ("KVTTL_TTL_PRECISION_MS", "250"),
            ("KVTTL_CAN_QUERY_TTL", "false"),
            ("KVTTL_SWEEP_INTERVAL_MS", "100"),
            ("KVTTL_AOF_SYNC_INTERVAL_MS", "50"),
            ("KVTTL_CHECKPOINT_INTERVAL_MS", "60000"),
        ]);
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/kvttl"));
        assert_eq!(config.ttl_precision, Some(Duration::from_millis(250)));
        assert_eq!(config.can_query_ttl, Some(false));
        assert_eq!(config.sweep_interval, Some(Duration::from_millis(100)));
        assert_eq!(config.aof_sync_interval, Duration::from_millis(50));
        assert_eq!(config.checkpoint_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = config_from(&[
            ("KVTTL_BACKEND", "redis"),
            ("KVTTL_TTL_PRECISION_MS", "0"),
            ("KVTTL_CAN_QUERY_TTL", "maybe"),
            ("KVTTL_AOF_SYNC_INTERVAL_MS", "soon"),
        ]);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.ttl_precision, None);
        assert_eq!(config.can_query_ttl, None);
        assert_eq!(config.aof_sync_interval, Duration::from_secs(1));
    }

    #[test]
    fn overrides_apply_to_declared_capabilities() {
        let config = config_from(&[("KVTTL_TTL_PRECISION_MS", "10")]);
        let caps = config.capabilities(FileBackend::DEFAULT_CAPABILITIES);
        assert_eq!(caps.ttl_precision, Duration::from_millis(10));
        assert!(caps.can_query_ttl);
    }

    #[tokio::test]
    async fn opens_file_backend_in_data_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            backend: BackendKind::File,
            data_dir: dir.path().join("store"),
            ..Config::default()
        };

        let engine = config.open_engine()?;
        assert_eq!(engine.backend_name(), "file");
        assert_eq!(engine.capabilities(), FileBackend::DEFAULT_CAPABILITIES);

        engine.set("k", "v", SetOptions::default()).await?;
        assert!(dir.path().join("store").join("appendonly.aof").exists());

        Ok(())
    }
}
