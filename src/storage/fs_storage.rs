use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{copy, create_dir_all, remove_file, rename, try_exists};
use tracing::{debug, error, trace, warn};

use crate::error::{VaultError, VaultResult};
use crate::storage::work_dir::WorkDir;
use crate::util::checksum::ChecksumAlgorithm;
use crate::util::path_locks::{PathLockGuard, PathLocks};

/// Name of the directory below a repository's root that holds work directories. It is hidden,
///  so browsing never sees it.
pub const WORK_DIR_NAME: &str = ".vault-tmp";

/// A managed repository's content on the local file system. Install locks are process wide, so
///  separate instances on the same root never write the same file concurrently.
#[derive(Clone)]
pub struct FsRepositoryStorage {
    id: String,
    root: PathBuf,
    locks: PathLocks,
}
impl FsRepositoryStorage {
    pub fn new(id: &str, root: impl AsRef<Path>) -> VaultResult<FsRepositoryStorage> {
        let root = std::path::absolute(root.as_ref())
            .map_err(|e| VaultError::storage(root.as_ref(), e))?;
        Ok(FsRepositoryStorage {
            id: id.to_string(),
            root,
            locks: PathLocks::global(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The absolute location of a repository-relative path. Paths escaping the root are rejected.
    pub fn local_path(&self, relative: &str) -> VaultResult<PathBuf> {
        let mut result = self.root.clone();
        for segment in relative.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => return Err(VaultError::MalformedPath { path: relative.to_string() }),
                s => result.push(s),
            }
        }
        Ok(result)
    }

    /// true if there is a regular file at the relative path
    pub async fn exists(&self, relative: &str) -> VaultResult<bool> {
        let path = self.local_path(relative)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(VaultError::storage(&path, e)),
        }
    }

    pub async fn create_work_dir(&self) -> VaultResult<WorkDir> {
        let parent = self.root.join(WORK_DIR_NAME);
        WorkDir::create(&parent)
            .await
            .map_err(|e| VaultError::storage(&parent, e))
    }

    pub async fn lock(&self, relative: &str) -> VaultResult<PathLockGuard> {
        Ok(self.locks.lock(&self.local_path(relative)?).await)
    }

    /// Moves staged files into place while holding the lock for `relative`: checksum sidecars
    ///  first (in the order given), the primary file last. Failing to replace an existing file is
    ///  logged and leaves that file untouched.
    ///
    /// Returns whether the primary file is present afterwards.
    pub async fn install(&self, relative: &str, primary: &Path, sidecars: &[(ChecksumAlgorithm, PathBuf)]) -> VaultResult<bool> {
        let destination = self.local_path(relative)?;
        let _guard = self.locks.lock(&destination).await;

        for (algorithm, staged) in sidecars {
            let sidecar = self.local_path(&algorithm.sidecar_name(relative))?;
            move_into_place(staged, &sidecar).await;
        }
        move_into_place(primary, &destination).await;

        try_exists(&destination)
            .await
            .map_err(|e| VaultError::storage(&destination, e))
    }

    /// Writes a complete file through a work directory, so readers never see partial content
    pub async fn write(&self, relative: &str, content: &[u8]) -> VaultResult<PathBuf> {
        let work_dir = self.create_work_dir().await?;
        let staged = work_dir.file(relative);
        tokio::fs::write(&staged, content)
            .await
            .map_err(|e| VaultError::storage(&staged, e))?;

        let destination = self.local_path(relative)?;
        if self.install(relative, &staged, &[]).await? {
            Ok(destination)
        }
        else {
            Err(VaultError::storage(&destination, "unable to write file"))
        }
    }
}

/// true if `source` ended up at `destination`
async fn move_into_place(source: &Path, destination: &Path) -> bool {
    match try_exists(source).await {
        Ok(true) => {}
        _ => return false,
    }

    match remove_file(destination).await {
        Ok(_) => debug!("removed stale file {}", destination.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            error!("unable to overwrite {}, leaving it in place: {}", destination.display(), e);
            return false;
        }
    }

    if let Some(parent) = destination.parent() {
        if let Err(e) = create_dir_all(parent).await {
            error!("unable to create directory {}: {}", parent.display(), e);
            return false;
        }
    }

    trace!("moving {} to {}", source.display(), destination.display());
    if let Err(e) = rename(source, destination).await {
        debug!("renaming {} failed, copying instead: {}", source.display(), e);
        if let Err(e) = copy(source, destination).await {
            error!("unable to copy {} to {}: {}", source.display(), destination.display(), e);
            return false;
        }
        if let Err(e) = remove_file(source).await {
            warn!("unable to remove {} after copying it: {}", source.display(), e);
        }
    }
    true
}
