use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

/// Directory whose presence in the data dir marks a completed staging.
pub const STAGED_MARKER_DIR: &str = "Shaders";
const STAMP_FILE_NAME: &str = ".bundle_stamp";
/// Relative paths written by the last staging, one per line.
const MANIFEST_FILE_NAME: &str = ".bundle_manifest";

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("bundle assets directory does not exist: {0}")]
    MissingBundle(PathBuf),
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read bundle file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write staged file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale staged file {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageReport {
    UpToDate {
        digest: String,
    },
    Staged {
        digest: String,
        file_count: usize,
        removed: usize,
    },
}

/// Copies every file under `bundle_assets` into `data_dir`, keeping relative
/// paths. Skipped when the marker directory exists and the stamp written by
/// the last staging matches the bundle's current digest. Files an earlier
/// staging wrote that the bundle no longer ships are removed; anything else
/// in `data_dir` is left alone.
pub fn stage_bundle_assets(bundle_assets: &Path, data_dir: &Path) -> Result<StageReport, AssetError> {
    if !bundle_assets.is_dir() {
        return Err(AssetError::MissingBundle(bundle_assets.to_path_buf()));
    }

    let files = collect_bundle_files(bundle_assets)?;
    let digest = digest_bundle(&files)?;
    let stamp_path = data_dir.join(STAMP_FILE_NAME);
    let marker_present = data_dir.join(STAGED_MARKER_DIR).is_dir();
    let stamp_matches = fs::read_to_string(&stamp_path)
        .map(|stamp| stamp.trim() == digest)
        .unwrap_or(false);

    if marker_present && stamp_matches {
        info!(digest = %digest, "assets_up_to_date");
        return Ok(StageReport::UpToDate { digest });
    }

    let manifest_path = data_dir.join(MANIFEST_FILE_NAME);
    let previous = read_manifest(&manifest_path);

    let mut staged = BTreeSet::new();
    for (rel, abs_path) in &files {
        let bytes = fs::read(abs_path).map_err(|source| AssetError::ReadFile {
            path: abs_path.clone(),
            source,
        })?;
        let target = data_dir.join(rel);
        write_bytes_atomic(&target, &bytes)
            .map_err(|source| AssetError::WriteFile { path: target, source })?;
        staged.insert(normalize_rel_path(rel));
    }
    let removed = remove_stale_files(data_dir, &previous, &staged)?;

    let manifest = staged.iter().map(|rel| format!("{rel}\n")).collect::<String>();
    write_bytes_atomic(&manifest_path, manifest.as_bytes()).map_err(|source| {
        AssetError::WriteFile {
            path: manifest_path.clone(),
            source,
        }
    })?;
    write_bytes_atomic(&stamp_path, digest.as_bytes()).map_err(|source| AssetError::WriteFile {
        path: stamp_path.clone(),
        source,
    })?;

    info!(
        file_count = files.len(),
        removed,
        data_dir = %data_dir.display(),
        digest = %digest,
        "assets_staged"
    );
    Ok(StageReport::Staged {
        digest,
        file_count: files.len(),
        removed,
    })
}

/// A missing or unreadable manifest means nothing is known to be stale.
fn read_manifest(path: &Path) -> BTreeSet<String> {
    fs::read_to_string(path)
        .map(|raw| {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn remove_stale_files(
    data_dir: &Path,
    previous: &BTreeSet<String>,
    staged: &BTreeSet<String>,
) -> Result<usize, AssetError> {
    let mut removed = 0;
    for rel in previous.difference(staged) {
        let rel_path = Path::new(rel);
        if !rel_path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            warn!(entry = %rel, "asset_manifest_entry_ignored");
            continue;
        }
        let target = data_dir.join(rel_path);
        match fs::remove_file(&target) {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(AssetError::RemoveFile { path: target, source }),
        }
    }
    Ok(removed)
}

fn collect_bundle_files(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>, AssetError> {
    let mut files = Vec::new();
    collect_recursive(root, root, &mut files)?;
    files.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(files)
}

fn collect_recursive(
    root: &Path,
    current: &Path,
    files: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<(), AssetError> {
    let entries = fs::read_dir(current).map_err(|source| AssetError::ReadDir {
        path: current.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| AssetError::ReadDir {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(root, &path, files)?;
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            files.push((rel.to_path_buf(), path));
        }
    }
    Ok(())
}

fn digest_bundle(files: &[(PathBuf, PathBuf)]) -> Result<String, AssetError> {
    let mut hasher = Sha256::new();
    for (rel, abs_path) in files {
        let bytes = fs::read(abs_path).map_err(|source| AssetError::ReadFile {
            path: abs_path.clone(),
            source,
        })?;
        hasher.update(normalize_rel_path(rel).as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);
    }
    Ok(to_hex_lower(&hasher.finalize()))
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn to_hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("asset");
    let tmp_path = path.with_file_name(format!("{file_name}.staging"));
    fs::write(&tmp_path, bytes)?;

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(error);
        }
    }
    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn bundle_with_shader(root: &Path) -> PathBuf {
        let assets = root.join("bundle").join("assets");
        fs::create_dir_all(assets.join("Shaders")).expect("mkdir shaders");
        fs::write(assets.join("Shaders").join("flat.glsl"), "void main() {}").expect("shader");
        fs::write(assets.join("config.txt"), "scale=2").expect("config");
        assets
    }

    #[test]
    fn first_run_copies_tree_and_writes_stamp() {
        let temp = TempDir::new().expect("tempdir");
        let assets = bundle_with_shader(temp.path());
        let data = temp.path().join("data");

        let report = stage_bundle_assets(&assets, &data).expect("stage");

        assert!(matches!(
            report,
            StageReport::Staged {
                file_count: 2,
                removed: 0,
                ..
            }
        ));
        assert_eq!(
            fs::read_to_string(data.join("Shaders").join("flat.glsl")).expect("staged shader"),
            "void main() {}"
        );
        assert_eq!(
            fs::read_to_string(data.join("config.txt")).expect("staged config"),
            "scale=2"
        );
        assert!(data.join(STAMP_FILE_NAME).is_file());
    }

    #[test]
    fn unchanged_bundle_is_not_restaged() {
        let temp = TempDir::new().expect("tempdir");
        let assets = bundle_with_shader(temp.path());
        let data = temp.path().join("data");
        stage_bundle_assets(&assets, &data).expect("first stage");

        fs::write(data.join("config.txt"), "edited locally").expect("local edit");
        let report = stage_bundle_assets(&assets, &data).expect("second stage");

        assert!(matches!(report, StageReport::UpToDate { .. }));
        assert_eq!(
            fs::read_to_string(data.join("config.txt")).expect("config"),
            "edited locally"
        );
    }

    #[test]
    fn changed_bundle_or_missing_marker_restages() {
        let temp = TempDir::new().expect("tempdir");
        let assets = bundle_with_shader(temp.path());
        let data = temp.path().join("data");
        stage_bundle_assets(&assets, &data).expect("first stage");

        fs::write(assets.join("config.txt"), "scale=3").expect("bundle edit");
        assert!(matches!(
            stage_bundle_assets(&assets, &data).expect("restage"),
            StageReport::Staged { .. }
        ));
        assert_eq!(
            fs::read_to_string(data.join("config.txt")).expect("config"),
            "scale=3"
        );

        fs::remove_dir_all(data.join("Shaders")).expect("remove marker");
        assert!(matches!(
            stage_bundle_assets(&assets, &data).expect("restage after marker loss"),
            StageReport::Staged { .. }
        ));
        assert!(data.join("Shaders").join("flat.glsl").is_file());
    }

    #[test]
    fn restaging_removes_files_the_bundle_dropped() {
        let temp = TempDir::new().expect("tempdir");
        let assets = bundle_with_shader(temp.path());
        let data = temp.path().join("data");
        stage_bundle_assets(&assets, &data).expect("first stage");
        fs::write(data.join("save.dat"), "progress").expect("engine file");

        fs::remove_file(assets.join("config.txt")).expect("drop config");
        fs::write(assets.join("Shaders").join("lit.glsl"), "void lit() {}").expect("new shader");
        let report = stage_bundle_assets(&assets, &data).expect("restage");

        assert!(matches!(
            report,
            StageReport::Staged {
                file_count: 2,
                removed: 1,
                ..
            }
        ));
        assert!(!data.join("config.txt").exists());
        assert!(data.join("Shaders").join("flat.glsl").is_file());
        assert!(data.join("Shaders").join("lit.glsl").is_file());
        assert_eq!(
            fs::read_to_string(data.join("save.dat")).expect("untouched"),
            "progress"
        );
    }

    #[test]
    fn manifest_entries_outside_data_dir_are_ignored() {
        let temp = TempDir::new().expect("tempdir");
        let assets = bundle_with_shader(temp.path());
        let data = temp.path().join("data");
        fs::create_dir_all(&data).expect("data dir");
        fs::write(temp.path().join("outside.txt"), "keep").expect("outside file");
        fs::write(data.join(MANIFEST_FILE_NAME), "../outside.txt\n").expect("manifest");

        stage_bundle_assets(&assets, &data).expect("stage");

        assert!(temp.path().join("outside.txt").is_file());
    }

    #[test]
    fn missing_bundle_is_an_error() {
        let temp = TempDir::new().expect("tempdir");
        let result = stage_bundle_assets(&temp.path().join("nope"), &temp.path().join("data"));
        assert!(matches!(result, Err(AssetError::MissingBundle(_))));
    }
}
