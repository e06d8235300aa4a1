use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::maven::metadata_merge::merge_all;
use crate::maven::metadata_xml::Metadata;
use crate::maven::paths::is_metadata_path;
use crate::maven::repository_storage::MavenRepositoryStorage;
use crate::storage::fs_storage::FsRepositoryStorage;
use crate::util::checksum::{ChecksumAlgorithm, ChecksummedFile, Digests};
use crate::util::http_transport::RemoteTransport;

/// Managed repositories served under one name. Artifacts come from the first member that has
///  them, metadata documents are merged across all members in member order.
pub struct RepositoryGroup {
    id: String,
    members: Vec<MavenRepositoryStorage>,
    merged: FsRepositoryStorage,
}
impl RepositoryGroup {
    pub fn new(id: &str, members: Vec<MavenRepositoryStorage>, merged: FsRepositoryStorage) -> RepositoryGroup {
        RepositoryGroup {
            id: id.to_string(),
            members,
            merged,
        }
    }

    pub fn from_config(config: &VaultConfig, id: &str, transport: Arc<dyn RemoteTransport>) -> anyhow::Result<RepositoryGroup> {
        let group = config.repository_group(id)
            .ok_or_else(|| anyhow!("unknown repository group {}", id))?;
        let members = group.members.iter()
            .map(|member| MavenRepositoryStorage::from_config(config, member, transport.clone()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let merged = FsRepositoryStorage::new(&group.id, &group.merged_location)?;
        Ok(RepositoryGroup::new(&group.id, members, merged))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &[MavenRepositoryStorage] {
        &self.members
    }

    /// The metadata document at `path` merged over all members that have it. Members failing
    ///  to deliver it are skipped.
    pub async fn merged_metadata(&self, path: &str) -> VaultResult<Metadata> {
        if !is_metadata_path(path) {
            return Err(VaultError::MalformedPath { path: path.to_string() });
        }

        let mut documents = Vec::new();
        for member in &self.members {
            let local = match member.fetch_path(path).await {
                Ok(Some(local)) => local,
                Ok(None) => {
                    debug!("no {} in repository {}", path, member.id());
                    continue;
                }
                Err(e) => {
                    warn!("skipping repository {} for merging {}: {}", member.id(), path, e);
                    continue;
                }
            };
            match Metadata::read(&local).await {
                Ok(Some(metadata)) => documents.push(metadata),
                Ok(None) => debug!("{} disappeared from repository {}", path, member.id()),
                Err(e) => warn!("skipping repository {} for merging {}: {}", member.id(), path, e),
            }
        }

        merge_all(&documents)
            .ok_or_else(|| VaultError::MetadataNotFound(format!("{} in group {}", path, self.id)))
    }

    /// Stores the merged metadata document with fresh .md5 and .sha1 files in the group's
    ///  merge location
    pub async fn write_merged_metadata(&self, path: &str) -> VaultResult<PathBuf> {
        let merged = self.merged_metadata(path).await?;
        let xml = merged.to_xml()
            .map_err(|e| VaultError::StorageRuntime(format!("serializing merged {}: {}", path, e)))?;

        let work_dir = self.merged.create_work_dir().await?;
        let staged = ChecksummedFile::new(work_dir.file(path));
        tokio::fs::write(staged.path(), xml.as_bytes())
            .await
            .map_err(|e| VaultError::storage(staged.path(), e))?;

        let mut digests = Digests::new();
        digests.update(xml.as_bytes());
        let checksums = digests.finalize();
        let mut sidecars = Vec::new();
        for algorithm in ChecksumAlgorithm::ALL {
            staged.write_sidecar(algorithm, &checksums)
                .await
                .map_err(|e| VaultError::storage(&staged.sidecar_path(algorithm), e))?;
            sidecars.push((algorithm, staged.sidecar_path(algorithm)));
        }

        let destination = self.merged.local_path(path)?;
        if !self.merged.install(path, staged.path(), &sidecars).await? {
            return Err(VaultError::storage(&destination, "unable to install merged metadata"));
        }
        info!("merged {} for group {}", path, self.id);
        Ok(destination)
    }

    /// The local file for `path`: merged metadata (and its checksums) for metadata requests,
    ///  otherwise the first member's copy. Fails only if every member failed.
    pub async fn fetch(&self, path: &str) -> VaultResult<Option<PathBuf>> {
        if is_metadata_path(path) {
            return self.write_merged_metadata(path).await.map(Some);
        }
        if let Some((primary, _)) = path.rsplit_once('.') {
            if ChecksumAlgorithm::is_checksum_file(path) && is_metadata_path(primary) {
                self.write_merged_metadata(primary).await?;
                return Ok(Some(self.merged.local_path(path)?));
            }
        }

        let mut last_error = None;
        let mut any_answered = false;
        for member in &self.members {
            match member.fetch_path(path).await {
                Ok(Some(local)) => return Ok(Some(local)),
                Ok(None) => any_answered = true,
                Err(e) => {
                    warn!("error fetching {} from repository {}: {}", path, member.id(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_answered => Err(e),
            _ => Ok(None),
        }
    }
}
