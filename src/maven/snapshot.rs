use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::error::{VaultError, VaultResult};
use crate::maven::coordinates::{is_generic_snapshot, strip_snapshot, Coordinate, SnapshotVersionInfo};
use crate::maven::metadata_xml::{Metadata, METADATA_FILENAME};
use crate::maven::paths::metadata_path;
use crate::storage::fs_storage::FsRepositoryStorage;

/// Timing information of the latest snapshot build from a version directory's metadata file.
///  Missing or unreadable metadata yields None, it is logged but never an error.
pub async fn read_snapshot_info(metadata_file: &Path) -> Option<SnapshotVersionInfo> {
    match Metadata::read(metadata_file).await {
        Ok(Some(metadata)) => {
            let result = metadata.snapshot_version();
            if result.is_none() {
                debug!("no snapshot timestamp in {}", metadata_file.display());
            }
            result
        }
        Ok(None) => {
            trace!("no snapshot metadata at {}", metadata_file.display());
            None
        }
        Err(e) => {
            warn!("ignoring snapshot metadata: {}", e);
            None
        }
    }
}

/// Heuristic for 'is this directory a version directory of `project`': a floating snapshot
///  directory contains a `<project>-<version without -SNAPSHOT>-*.pom`, a release directory
///  contains exactly `<project>-<version>.pom`, or the directory's metadata names the version.
pub async fn is_project_version(dir: &Path, project: &str, version: &str) -> VaultResult<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(VaultError::storage(dir, e)),
    };

    let release_pom = format!("{}-{}.pom", project, version);
    let snapshot_prefix = format!("{}-{}-", project, strip_snapshot(version));

    while let Some(entry) = entries.next_entry().await.map_err(|e| VaultError::storage(dir, e))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        let is_match = if is_generic_snapshot(version) {
            name.starts_with(&snapshot_prefix) && name.ends_with(".pom")
        }
        else {
            name == release_pom
        };
        if is_match {
            return Ok(true);
        }
    }

    let metadata = Metadata::read(&dir.join(METADATA_FILENAME)).await
        .unwrap_or_else(|e| {
            debug!("ignoring metadata while checking for version directory: {}", e);
            None
        });
    Ok(metadata
        .and_then(|m| m.version)
        .map(|v| v == version)
        .unwrap_or(false))
}

/// Turns floating snapshot versions into the concrete timestamped build recorded in local
///  metadata
#[derive(Clone)]
pub struct SnapshotResolver {
    storage: FsRepositoryStorage,
}
impl SnapshotResolver {
    pub fn new(storage: FsRepositoryStorage) -> SnapshotResolver {
        SnapshotResolver { storage }
    }

    /// the snapshot build info from the coordinate's local version metadata
    pub async fn local_snapshot_info(&self, coordinate: &Coordinate) -> Option<SnapshotVersionInfo> {
        let relative = metadata_path(&coordinate.namespace, &coordinate.project, Some(&coordinate.version));
        match self.storage.local_path(&relative) {
            Ok(path) => read_snapshot_info(&path).await,
            Err(e) => {
                warn!("ignoring snapshot metadata for {}: {}", coordinate, e);
                None
            }
        }
    }

    /// Rewrites a floating snapshot to its latest timestamped build if local metadata knows
    ///  it, and returns everything else unchanged.
    pub async fn resolve(&self, coordinate: &Coordinate) -> Coordinate {
        if !coordinate.is_floating_snapshot() {
            return coordinate.clone();
        }

        match self.local_snapshot_info(coordinate).await {
            Some(info) => {
                trace!("resolved {} to snapshot build {}", coordinate, info);
                coordinate.with_snapshot(info)
            }
            None => {
                debug!("no snapshot build info for {}, keeping floating version", coordinate);
                coordinate.clone()
            }
        }
    }

    /// The timestamped build of a floating snapshot, if it is present in local storage
    pub async fn find_local_timestamped(&self, coordinate: &Coordinate) -> Option<(Coordinate, PathBuf)> {
        if !coordinate.is_floating_snapshot() {
            return None;
        }

        let resolved = self.resolve(coordinate).await;
        if resolved.snapshot.is_none() {
            return None;
        }

        let relative = resolved.path();
        match self.storage.exists(&relative).await {
            Ok(true) => {
                let path = self.storage.local_path(&relative).ok()?;
                Some((resolved, path))
            }
            Ok(false) => None,
            Err(e) => {
                warn!("error checking for {}: {}", relative, e);
                None
            }
        }
    }
}
