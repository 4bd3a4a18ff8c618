use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge::{stage_bundle_assets, AppPaths, AssetError, BridgeConfig, StageReport};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub(crate) const CONFIG_ENV_VAR: &str = "BRIDGE_CONFIG";
pub(crate) const TIMER_INTERVAL_ENV_VAR: &str = "BRIDGE_TIMER_INTERVAL_MS";
pub(crate) const DEMO_MAX_FPS_ENV_VAR: &str = "BRIDGE_DEMO_MAX_FPS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct HostConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    pub timer_interval_ms: u64,
    pub max_drained_actions: u32,
    pub metrics_log_interval_ms: u64,
    /// Answer the demo engine gives for the `MaxFps` attribute.
    pub demo_max_fps: bool,
    pub stage_assets: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            window_title: "Bridge Host".to_string(),
            window_width: 1280,
            window_height: 720,
            timer_interval_ms: 1,
            max_drained_actions: 256,
            metrics_log_interval_ms: 1000,
            demo_max_fps: false,
            stage_assets: true,
        }
    }
}

impl HostConfig {
    pub(crate) fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            timer_interval: Duration::from_millis(self.timer_interval_ms),
            max_drained_actions: self.max_drained_actions,
            metrics_log_interval: Duration::from_millis(self.metrics_log_interval_ms),
            ..BridgeConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostMode {
    Window,
    Replay { script: PathBuf },
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path} at {field}: {source}")]
    Parse {
        path: PathBuf,
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} (usage: host [replay <script.jsonl>])")]
    Usage(String),
}

pub(crate) struct AppWiring {
    pub(crate) config: HostConfig,
    pub(crate) mode: HostMode,
}

pub(crate) fn build_app<I>(args: I) -> Result<AppWiring, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    info!("=== Bridge Host Startup ===");
    let mode = parse_mode(args)?;
    let mut config = match env::var_os(CONFIG_ENV_VAR) {
        Some(path) => load_config_file(Path::new(&path))?,
        None => HostConfig::default(),
    };
    apply_env_overrides(&mut config, |name| env::var(name).ok());
    info!(
        ?mode,
        timer_interval_ms = config.timer_interval_ms,
        max_drained_actions = config.max_drained_actions,
        demo_max_fps = config.demo_max_fps,
        "host_config"
    );
    Ok(AppWiring { config, mode })
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Copies bundle assets into the data directory before the engine sees it.
/// A bundle without an `assets/` directory is left alone.
pub(crate) fn stage_assets(paths: &AppPaths) -> Result<Option<StageReport>, AssetError> {
    let bundle_assets = paths.bundle_assets_dir();
    if !bundle_assets.is_dir() {
        info!(bundle_assets = %bundle_assets.display(), "asset_staging_skipped");
        return Ok(None);
    }
    stage_bundle_assets(&bundle_assets, &paths.data_dir).map(Some)
}

fn parse_mode<I>(args: I) -> Result<HostMode, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let args = args.into_iter().collect::<Vec<_>>();
    match args.as_slice() {
        [] => Ok(HostMode::Window),
        [command, script] if command == "replay" => Ok(HostMode::Replay {
            script: PathBuf::from(script),
        }),
        [command] if command == "replay" => {
            Err(ConfigError::Usage("missing script path for replay".to_string()))
        }
        [other, ..] => Err(ConfigError::Usage(format!("unexpected argument '{other}'"))),
    }
}

fn load_config_file(path: &Path) -> Result<HostConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw).map_err(|(field, source)| ConfigError::Parse {
        path: path.to_path_buf(),
        field,
        source,
    })
}

fn parse_config(raw: &str) -> Result<HostConfig, (String, serde_json::Error)> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, HostConfig>(&mut deserializer).map_err(|error| {
        let field = error.path().to_string();
        (field, error.into_inner())
    })
}

fn apply_env_overrides<F>(config: &mut HostConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(TIMER_INTERVAL_ENV_VAR) {
        match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => config.timer_interval_ms = value,
            _ => warn!(
                var = TIMER_INTERVAL_ENV_VAR,
                value = %raw,
                fallback = config.timer_interval_ms,
                "invalid_env_override"
            ),
        }
    }

    if let Some(raw) = lookup(DEMO_MAX_FPS_ENV_VAR) {
        match parse_flag(&raw) {
            Some(value) => config.demo_max_fps = value,
            None => warn!(
                var = DEMO_MAX_FPS_ENV_VAR,
                value = %raw,
                fallback = config.demo_max_fps,
                "invalid_env_override"
            ),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_object_yields_defaults() {
        assert_eq!(parse_config("{}").expect("parse"), HostConfig::default());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config = parse_config(r#"{"window_title":"Demo","demo_max_fps":true}"#).expect("parse");
        assert_eq!(config.window_title, "Demo");
        assert!(config.demo_max_fps);
        assert_eq!(config.window_width, 1280);
    }

    #[test]
    fn parse_error_names_the_field() {
        let (field, _) = parse_config(r#"{"timer_interval_ms":"fast"}"#).expect_err("bad type");
        assert_eq!(field, "timer_interval_ms");

        assert!(parse_config(r#"{"unknown_knob":1}"#).is_err());
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("host.json");
        fs::write(&path, r#"{"timer_interval_ms": 16}"#).expect("write config");

        let config = load_config_file(&path).expect("load");
        assert_eq!(config.timer_interval_ms, 16);
        assert_eq!(config.bridge_config().timer_interval, Duration::from_millis(16));

        assert!(matches!(
            load_config_file(&temp.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn env_overrides_apply_and_invalid_values_fall_back() {
        let mut config = HostConfig::default();
        apply_env_overrides(
            &mut config,
            env_from(&[(TIMER_INTERVAL_ENV_VAR, "8"), (DEMO_MAX_FPS_ENV_VAR, "yes")]),
        );
        assert_eq!(config.timer_interval_ms, 8);
        assert!(config.demo_max_fps);

        apply_env_overrides(
            &mut config,
            env_from(&[(TIMER_INTERVAL_ENV_VAR, "0"), (DEMO_MAX_FPS_ENV_VAR, "maybe")]),
        );
        assert_eq!(config.timer_interval_ms, 8);
        assert!(config.demo_max_fps);
    }

    #[test]
    fn modes_parse_from_args() {
        assert_eq!(parse_mode(Vec::<String>::new()).expect("window"), HostMode::Window);
        assert_eq!(
            parse_mode(vec!["replay".to_string(), "s.jsonl".to_string()]).expect("replay"),
            HostMode::Replay {
                script: PathBuf::from("s.jsonl")
            }
        );
        assert!(matches!(
            parse_mode(vec!["replay".to_string()]),
            Err(ConfigError::Usage(_))
        ));
        assert!(matches!(
            parse_mode(vec!["--fast".to_string()]),
            Err(ConfigError::Usage(_))
        ));
    }

    #[test]
    fn staging_skips_bundle_without_assets() {
        let temp = TempDir::new().expect("tempdir");
        let paths = AppPaths {
            bundle_dir: temp.path().to_path_buf(),
            data_dir: temp.path().join("data"),
        };
        assert!(stage_assets(&paths).expect("stage").is_none());

        fs::create_dir_all(paths.bundle_assets_dir().join("Shaders")).expect("assets");
        fs::write(paths.bundle_assets_dir().join("Shaders").join("a.glsl"), "x").expect("file");
        assert!(matches!(
            stage_assets(&paths).expect("stage"),
            Some(StageReport::Staged { file_count: 1, .. })
        ));
    }
}
