use std::fs::Metadata as FsMetadata;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::error::{VaultError, VaultResult};
use crate::maven::coordinates::{ArtifactDescriptor, Coordinate};
use crate::maven::metadata_xml::{Metadata, METADATA_FILENAME, METADATA_FILENAME_START};
use crate::maven::paths::{to_path, PathCodec};
use crate::maven::snapshot::is_project_version;
use crate::storage::fs_storage::FsRepositoryStorage;
use crate::util::checksum::{ChecksumAlgorithm, ChecksummedFile};

/// files that live next to artifacts without being artifacts
const SUPPORT_FILES: [&str; 3] = ["resolver-status.properties", "_remote.repositories", "_maven.repositories"];

struct DirEntry {
    name: String,
    path: PathBuf,
    metadata: FsMetadata,
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// false for checksums, signatures, metadata and other support files
pub fn is_artifact_file(name: &str) -> bool {
    !is_hidden(name)
        && !ChecksumAlgorithm::is_checksum_file(name)
        && !name.ends_with(".asc")
        && name != METADATA_FILENAME
        && !SUPPORT_FILES.contains(&name)
        && !(name.starts_with(METADATA_FILENAME_START) && name.ends_with(".xml"))
}

/// Lists the contents of a managed repository by walking its directory structure.
///
/// All listings skip hidden entries and apply a caller supplied name filter. They are sorted by
///  name, and a directory that does not exist lists as empty. If reading some entries fails, the
///  failures are logged and the rest is returned; only if every entry fails is the listing an
///  error.
#[derive(Clone)]
pub struct ContentBrowser {
    storage: FsRepositoryStorage,
    codec: PathCodec,
}
impl ContentBrowser {
    pub fn new(storage: FsRepositoryStorage, codec: PathCodec) -> ContentBrowser {
        ContentBrowser { storage, codec }
    }

    /// Namespaces directly below `parent`, or the root namespaces. Root namespaces are all
    ///  directories at the top level, below that directories that are projects are excluded.
    pub async fn list_namespaces(&self, parent: Option<&str>, filter: &(dyn Fn(&str) -> bool + Sync)) -> VaultResult<Vec<String>> {
        let dir = match parent {
            Some(ns) => self.storage.local_path(&ns.replace('.', "/"))?,
            None => self.storage.root().to_path_buf(),
        };

        let mut results = Vec::new();
        for entry in self.list_dirs(&dir, filter).await? {
            let namespace = match parent {
                Some(ns) => format!("{}.{}", ns, entry.name),
                None => {
                    results.push(Ok(Some(entry.name)));
                    continue;
                }
            };
            results.push(self.is_project_dir(&entry.path, &entry.name)
                .await
                .map(|is_project| (!is_project).then_some(namespace)));
        }
        Ok(partition(&dir, results)?.into_iter().flatten().collect())
    }

    pub async fn list_projects(&self, namespace: &str, filter: &(dyn Fn(&str) -> bool + Sync)) -> VaultResult<Vec<String>> {
        let dir = self.storage.local_path(&namespace.replace('.', "/"))?;

        let mut results = Vec::new();
        for entry in self.list_dirs(&dir, filter).await? {
            results.push(self.is_project_dir(&entry.path, &entry.name)
                .await
                .map(|is_project| is_project.then_some(entry.name)));
        }
        Ok(partition(&dir, results)?.into_iter().flatten().collect())
    }

    pub async fn list_project_versions(&self, namespace: &str, project: &str, filter: &(dyn Fn(&str) -> bool + Sync)) -> VaultResult<Vec<String>> {
        let dir = self.storage.local_path(&format!("{}/{}", namespace.replace('.', "/"), project))?;
        Ok(self.list_dirs(&dir, filter).await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Artifacts in a version directory. Files whose names do not decode as artifacts of the
    ///  project are skipped.
    pub async fn list_artifacts(&self, namespace: &str, project: &str, version: &str, filter: &(dyn Fn(&str) -> bool + Sync)) -> VaultResult<Vec<ArtifactDescriptor>> {
        let dir = self.storage.local_path(&to_path(namespace, project, version, None))?;
        let entries = read_entries(&dir, &|name| is_artifact_file(name) && filter(name)).await?;

        let mut results = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) if e.metadata.is_file() => e,
                Ok(_) => continue,
                Err(e) => {
                    results.push(Err(e));
                    continue;
                }
            };

            let artifact = match self.codec.parse_path(&to_path(namespace, project, version, Some(&entry.name))) {
                Ok(a) => a,
                Err(e) => {
                    debug!("skipping {}: {}", entry.path.display(), e);
                    continue;
                }
            };
            results.push(self.descriptor(entry, artifact.coordinate).await);
        }

        partition(&dir, results)
    }

    /// true if `<namespace>/<project>` is a project directory
    pub async fn is_project(&self, namespace: &str, project: &str) -> VaultResult<bool> {
        let dir = self.storage.local_path(&format!("{}/{}", namespace.replace('.', "/"), project))?;
        self.is_project_dir(&dir, project).await
    }

    async fn is_project_dir(&self, dir: &Path, name: &str) -> VaultResult<bool> {
        for child in self.list_dirs(dir, &|_| true).await? {
            if is_project_version(&child.path, name, &child.name).await? {
                trace!("{} is a project directory", dir.display());
                return Ok(true);
            }
        }

        match Metadata::read(&dir.join(METADATA_FILENAME)).await {
            Ok(Some(metadata)) => Ok(metadata.artifactId.as_deref() == Some(name)),
            Ok(None) => Ok(false),
            Err(e) => {
                debug!("ignoring metadata while checking for project directory: {}", e);
                Ok(false)
            }
        }
    }

    async fn list_dirs(&self, dir: &Path, filter: &(dyn Fn(&str) -> bool + Sync)) -> VaultResult<Vec<DirEntry>> {
        let entries = read_entries(dir, filter).await?
            .into_iter()
            .filter(|e| !matches!(e, Ok(e) if !e.metadata.is_dir()))
            .collect();
        partition(dir, entries)
    }

    async fn descriptor(&self, entry: DirEntry, coordinate: Coordinate) -> VaultResult<ArtifactDescriptor> {
        let checksums = ChecksummedFile::new(&entry.path)
            .checksums()
            .await
            .map_err(|e| VaultError::storage(&entry.path, e))?;
        let last_modified = entry.metadata.modified()
            .map_err(|e| VaultError::storage(&entry.path, e))?;

        Ok(ArtifactDescriptor {
            coordinate,
            id: entry.name,
            size: entry.metadata.len(),
            last_modified,
            md5: Some(checksums.md5),
            sha1: Some(checksums.sha1),
            repository_id: self.storage.id().to_string(),
        })
    }
}

/// Visible entries accepted by the filter, sorted by name. A missing directory has no entries.
async fn read_entries(dir: &Path, filter: &(dyn Fn(&str) -> bool + Sync)) -> VaultResult<Vec<VaultResult<DirEntry>>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(r) => r,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(VaultError::storage(dir, e)),
    };

    let mut result = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| VaultError::storage(dir, e))? {
        let path = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(name) => {
                result.push(Err(VaultError::storage(&path, format!("file name {:?} is not valid UTF-8", name))));
                continue;
            }
        };
        if is_hidden(&name) || !filter(&name) {
            continue;
        }

        // follows symlinks
        let entry = tokio::fs::metadata(&path)
            .await
            .map(|metadata| DirEntry { name, path: path.clone(), metadata })
            .map_err(|e| VaultError::storage(&path, e));
        result.push(entry);
    }

    result.sort_by(|a, b| match (a, b) {
        (Ok(a), Ok(b)) => a.name.cmp(&b.name),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => std::cmp::Ordering::Equal,
    });
    Ok(result)
}

/// all entries failed -> error, some failed -> logged and skipped
fn partition<T>(dir: &Path, entries: Vec<VaultResult<T>>) -> VaultResult<Vec<T>> {
    let total = entries.len();
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for entry in entries {
        match entry {
            Ok(e) => successes.push(e),
            Err(e) => failures.push(e),
        }
    }

    if total > 0 && successes.is_empty() {
        let first = failures.into_iter().next()
            .map(|e| e.to_string())
            .unwrap_or_default();
        return Err(VaultError::StorageRuntime(format!("listing {} failed for all {} entries, e.g. {}", dir.display(), total, first)));
    }
    for failure in failures {
        warn!("skipping entry while listing {}: {}", dir.display(), failure);
    }
    Ok(successes)
}
