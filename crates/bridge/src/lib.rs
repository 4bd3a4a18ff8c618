use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod assets;
mod bridge;
pub mod config;
pub mod control;
mod effects;
pub mod engine;
pub mod input;
mod metrics;
pub mod opcode;
mod render_loop;

pub use assets::{stage_bundle_assets, AssetError, StageReport, STAGED_MARKER_DIR};
pub use bridge::{Bridge, BridgeStatus, DrawSource, InputOutcome, KeyDisposition};
pub use config::{BridgeConfig, DEFAULT_MAX_FPS_ATTRIBUTE};
pub use control::{
    ChannelRedrawSink, ControlError, ControlHandle, ControlRequest, ControlSummary, ControlThread,
};
pub use effects::{HostEffects, RedrawSink, TimerTick};
pub use engine::{EngineBoundary, Orientation, ViewGeometry};
pub use input::{
    decode_modifiers, derive_key_char, encode_key, encode_modifiers, encode_pointer, InputEvent,
    KeyAction, KeyStroke, ModifierState, Modifiers, PointerAction, PointerSample, RawKeyEvent,
    RawPointerEvent, TouchPhase, TouchSample, KEYCODE_BACK, KEYCODE_UNKNOWN,
};
pub use metrics::LoopTotals;
pub use opcode::{DispatchReport, Opcode, OpcodeDispatcher, OpcodeKind};
pub use render_loop::{RenderLoopController, RenderLoopState};

pub const BUNDLE_DIR_ENV_VAR: &str = "BRIDGE_BUNDLE_DIR";
pub const DATA_DIR_ENV_VAR: &str = "BRIDGE_DATA_DIR";
const BUNDLE_ASSETS_DIR_NAME: &str = "assets";
const DEFAULT_DATA_DIR_NAME: &str = "data";

/// Read-only bundle location and writable data location handed to the
/// engine's `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub bundle_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    pub fn bundle_assets_dir(&self) -> PathBuf {
        self.bundle_dir.join(BUNDLE_ASSETS_DIR_NAME)
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error("{var} is set but is not a directory: {path}")]
    InvalidBundleDir { var: &'static str, path: PathBuf },
    #[error("failed to create data directory at {path}: {source}")]
    CreateDataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves bundle and data directories from `BRIDGE_BUNDLE_DIR` /
/// `BRIDGE_DATA_DIR`, falling back to the nearest ancestor of the executable
/// that holds an `assets/` directory. The data directory is created.
pub fn resolve_app_paths() -> Result<AppPaths, StartupError> {
    let bundle_override = read_env_path(BUNDLE_DIR_ENV_VAR)?;
    let data_override = read_env_path(DATA_DIR_ENV_VAR)?;

    let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
    let exe_dir = exe
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?;

    resolve_app_paths_from(bundle_override, data_override, &exe_dir)
}

fn resolve_app_paths_from(
    bundle_override: Option<PathBuf>,
    data_override: Option<PathBuf>,
    exe_dir: &Path,
) -> Result<AppPaths, StartupError> {
    let bundle_dir = match bundle_override {
        Some(path) => {
            let normalized = normalize_path(&path);
            if !normalized.is_dir() {
                return Err(StartupError::InvalidBundleDir {
                    var: BUNDLE_DIR_ENV_VAR,
                    path: normalized,
                });
            }
            normalized
        }
        None => exe_dir
            .ancestors()
            .find(|candidate| candidate.join(BUNDLE_ASSETS_DIR_NAME).is_dir())
            .map(normalize_path)
            .unwrap_or_else(|| normalize_path(exe_dir)),
    };

    let data_dir = data_override.unwrap_or_else(|| bundle_dir.join(DEFAULT_DATA_DIR_NAME));
    fs::create_dir_all(&data_dir).map_err(|source| StartupError::CreateDataDir {
        path: data_dir.clone(),
        source,
    })?;

    Ok(AppPaths {
        bundle_dir,
        data_dir: normalize_path(&data_dir),
    })
}

fn read_env_path(var: &'static str) -> Result<Option<PathBuf>, StartupError> {
    match env::var(var) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(PathBuf::from(value))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(StartupError::EnvVar { var, source }),
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn walks_up_to_directory_with_assets() {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path().join("bundle");
        let exe_dir = root.join("target").join("debug");
        fs::create_dir_all(root.join("assets")).expect("assets");
        fs::create_dir_all(&exe_dir).expect("exe dir");

        let paths = resolve_app_paths_from(None, None, &exe_dir).expect("paths");

        assert_eq!(paths.bundle_dir, normalize_path(&root));
        assert_eq!(paths.data_dir, normalize_path(&root.join("data")));
        assert!(paths.data_dir.is_dir());
        assert_eq!(paths.bundle_assets_dir(), paths.bundle_dir.join("assets"));
    }

    #[test]
    fn falls_back_to_exe_dir_without_assets() {
        let temp = TempDir::new().expect("tempdir");
        let exe_dir = temp.path().join("bin");
        fs::create_dir_all(&exe_dir).expect("exe dir");

        let paths = resolve_app_paths_from(None, None, &exe_dir).expect("paths");
        assert_eq!(paths.bundle_dir, normalize_path(&exe_dir));
    }

    #[test]
    fn overrides_win_and_data_dir_is_created() {
        let temp = TempDir::new().expect("tempdir");
        let bundle = temp.path().join("elsewhere");
        fs::create_dir_all(&bundle).expect("bundle");
        let data = temp.path().join("writable").join("state");

        let paths = resolve_app_paths_from(Some(bundle.clone()), Some(data.clone()), temp.path())
            .expect("paths");

        assert_eq!(paths.bundle_dir, normalize_path(&bundle));
        assert!(data.is_dir());
    }

    #[test]
    fn missing_bundle_override_is_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let result =
            resolve_app_paths_from(Some(temp.path().join("absent")), None, temp.path());
        assert!(matches!(
            result,
            Err(StartupError::InvalidBundleDir { .. })
        ));
    }
}
