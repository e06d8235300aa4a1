use std::path::{Path, PathBuf};

use tracing::{error, trace};
use uuid::Uuid;

/// A private directory for staging downloads. It is removed with everything in it when the
///  guard goes out of scope, regardless of how the download ended.
pub struct WorkDir {
    path: PathBuf,
}
impl WorkDir {
    pub(crate) async fn create(parent: &Path) -> std::io::Result<WorkDir> {
        let path = parent.join(Uuid::new_v4().as_hyphenated().to_string());
        tokio::fs::create_dir_all(&path).await?;
        trace!("created work directory {}", path.display());
        Ok(WorkDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// a path for a file in the work directory. Only the last component of `file_name` is used.
    pub fn file(&self, file_name: &str) -> PathBuf {
        let file_name = file_name.rsplit('/').next().unwrap_or(file_name);
        self.path.join(file_name)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        trace!("removing work directory {}", self.path.display());
        match std::fs::remove_dir_all(&self.path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("error cleaning up work directory {}: {}", self.path.display(), e),
        }
    }
}
