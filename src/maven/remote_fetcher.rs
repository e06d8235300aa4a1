use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use failsafe::backoff::{self, Constant};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::futures::CircuitBreaker;
use failsafe::{Config, StateMachine};
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::{ChecksumPolicy, FailureCacheConfig, RemoteEndpoint};
use crate::error::VaultResult;
use crate::maven::coordinates::Coordinate;
use crate::maven::metadata_xml::METADATA_FILENAME;
use crate::maven::paths::metadata_path;
use crate::maven::snapshot::{read_snapshot_info, SnapshotResolver};
use crate::storage::fs_storage::FsRepositoryStorage;
use crate::storage::work_dir::WorkDir;
use crate::util::checksum::{ChecksumAlgorithm, ChecksummedFile, ComputedChecksums, Digests};
use crate::util::http_transport::{RemoteResponse, RemoteTransport};

type FailureCache = StateMachine<ConsecutiveFailures<Constant>, ()>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// retrieved from a remote and installed. `checksums` lists the sidecar files installed with it.
    Fetched { path: PathBuf, endpoint_id: String, checksums: Vec<ChecksumAlgorithm> },
    AlreadyPresent { path: PathBuf },
    /// no endpoint delivered the resource, with one entry per endpoint saying why
    NotFound { failures: Vec<String> },
}
impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.local_path().is_some()
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            FetchResult::Fetched { path, .. } => Some(path),
            FetchResult::AlreadyPresent { path } => Some(path),
            FetchResult::NotFound { .. } => None,
        }
    }
}

enum Target<'a> {
    Artifact(&'a Coordinate),
    Path(&'a str),
}

enum EndpointOutcome {
    Installed(FetchResult),
    NotFound,
    Rejected(String),
}

/// Retrieves resources that are missing locally from an ordered list of remote repositories
///  and installs them into local storage.
///
/// Endpoints are tried strictly in the order given, and the first one to deliver the resource
///  wins. Missing resources and transport failures on one endpoint are logged and the next
///  endpoint is tried.
#[derive(Clone)]
pub struct RemoteFetcher {
    transport: Arc<dyn RemoteTransport>,
    checksum_policy: ChecksumPolicy,
    failure_cache_config: Option<FailureCacheConfig>,
    failure_caches: Arc<Mutex<HashMap<String, FailureCache>>>,
}
impl RemoteFetcher {
    pub fn new(transport: Arc<dyn RemoteTransport>, checksum_policy: ChecksumPolicy) -> RemoteFetcher {
        RemoteFetcher {
            transport,
            checksum_policy,
            failure_cache_config: None,
            failure_caches: Default::default(),
        }
    }

    /// skip endpoints for a while after repeated transport failures
    pub fn with_failure_cache(mut self, config: Option<FailureCacheConfig>) -> RemoteFetcher {
        self.failure_cache_config = config;
        self
    }

    pub fn checksum_policy(&self) -> ChecksumPolicy {
        self.checksum_policy
    }

    pub async fn fetch(&self, coordinate: &Coordinate, endpoints: &[RemoteEndpoint], storage: &FsRepositoryStorage) -> VaultResult<FetchResult> {
        let relative = coordinate.path();
        if storage.exists(&relative).await? {
            trace!("{} is present locally", relative);
            return Ok(FetchResult::AlreadyPresent { path: storage.local_path(&relative)? });
        }

        if coordinate.is_floating_snapshot() {
            if let Some((resolved, path)) = SnapshotResolver::new(storage.clone()).find_local_timestamped(coordinate).await {
                trace!("{} is present locally as {}", coordinate, resolved);
                return Ok(FetchResult::AlreadyPresent { path });
            }
        }

        Ok(self.fetch_remote(Target::Artifact(coordinate), endpoints, storage).await)
    }

    /// Fetches a file that is not an artifact, e.g. a metadata file, from the first endpoint that
    ///  has it
    pub async fn fetch_path(&self, relative: &str, endpoints: &[RemoteEndpoint], storage: &FsRepositoryStorage) -> VaultResult<FetchResult> {
        if storage.exists(relative).await? {
            return Ok(FetchResult::AlreadyPresent { path: storage.local_path(relative)? });
        }
        Ok(self.fetch_remote(Target::Path(relative), endpoints, storage).await)
    }

    async fn fetch_remote(&self, target: Target<'_>, endpoints: &[RemoteEndpoint], storage: &FsRepositoryStorage) -> FetchResult {
        let mut failures = Vec::new();

        for endpoint in endpoints {
            let outcome = match self.failure_cache(&endpoint.id) {
                None => self.fetch_from(endpoint, &target, storage).await,
                Some(failure_cache) => match failure_cache.call(self.fetch_from(endpoint, &target, storage)).await {
                    Ok(outcome) => Ok(outcome),
                    Err(failsafe::Error::Inner(e)) => Err(e),
                    Err(failsafe::Error::Rejected) => {
                        debug!("skipping remote {} after repeated failures", endpoint.id);
                        failures.push(format!("{}: skipped after repeated failures", endpoint.id));
                        continue;
                    }
                },
            };

            match outcome {
                Ok(EndpointOutcome::Installed(result)) => return result,
                Ok(EndpointOutcome::NotFound) => {
                    debug!("not found in remote {}", endpoint.id);
                    failures.push(format!("{}: not found", endpoint.id));
                }
                Ok(EndpointOutcome::Rejected(reason)) => {
                    warn!("rejected content from remote {}: {}", endpoint.id, reason);
                    failures.push(format!("{}: {}", endpoint.id, reason));
                }
                Err(e) => {
                    warn!("error fetching from remote {}: {:#}", endpoint.id, e);
                    failures.push(format!("{}: {}", endpoint.id, e));
                }
            }
        }

        FetchResult::NotFound { failures }
    }

    fn failure_cache(&self, endpoint_id: &str) -> Option<FailureCache> {
        let config = self.failure_cache_config.as_ref()?;
        let mut caches = self.failure_caches.lock().unwrap_or_else(|e| e.into_inner());
        let cache = caches.entry(endpoint_id.to_string())
            .or_insert_with(|| Config::new()
                .failure_policy(failure_policy::consecutive_failures(
                    config.consecutive_failures,
                    backoff::constant(Duration::from_secs(config.backoff_seconds)),
                ))
                .build());
        Some(cache.clone())
    }

    async fn fetch_from(&self, endpoint: &RemoteEndpoint, target: &Target<'_>, storage: &FsRepositoryStorage) -> anyhow::Result<EndpointOutcome> {
        let work_dir = storage.create_work_dir().await?;

        let (relative, snapshot_metadata) = match target {
            Target::Path(p) => (p.to_string(), None),
            Target::Artifact(coordinate) => {
                let (remote, snapshot_metadata) = self.remote_coordinate(endpoint, coordinate, &work_dir).await;
                (remote.path(), snapshot_metadata)
            }
        };

        let file_name = relative.rsplit('/').next().unwrap_or(&relative);
        let primary = ChecksummedFile::new(work_dir.file(file_name));
        let computed = match self.download(endpoint, &relative, primary.path()).await? {
            Some(c) => c,
            None => return Ok(EndpointOutcome::NotFound),
        };

        for algorithm in ChecksumAlgorithm::ALL {
            let sidecar = algorithm.sidecar_name(&relative);
            match self.download(endpoint, &sidecar, &primary.sidecar_path(algorithm)).await {
                Ok(Some(_)) => trace!("retrieved {} from {}", sidecar, endpoint.id),
                Ok(None) => trace!("no {} in {}", sidecar, endpoint.id),
                Err(e) => debug!("ignoring failure to retrieve {} from {}: {}", sidecar, endpoint.id, e),
            }
        }

        let installable = match self.apply_checksum_policy(&primary, &computed).await? {
            Ok(algorithms) => algorithms,
            Err(reason) => return Ok(EndpointOutcome::Rejected(reason)),
        };
        let sidecars: Vec<(ChecksumAlgorithm, PathBuf)> = installable.iter()
            .map(|a| (*a, primary.sidecar_path(*a)))
            .collect();

        if !storage.install(&relative, primary.path(), &sidecars).await? {
            return Err(anyhow!("{} is not present after installing it", relative));
        }
        if let Some((metadata_relative, staged)) = snapshot_metadata {
            storage.install(&metadata_relative, &staged, &[]).await?;
        }

        info!("retrieved {} from remote {}", relative, endpoint.id);
        Ok(EndpointOutcome::Installed(FetchResult::Fetched {
            path: storage.local_path(&relative)?,
            endpoint_id: endpoint.id.clone(),
            checksums: installable,
        }))
    }

    /// For floating snapshots, the timestamped build the endpoint's metadata points to, plus
    ///  the staged metadata file. Failure to read the metadata is not an error, the floating
    ///  file name is requested instead.
    async fn remote_coordinate(&self, endpoint: &RemoteEndpoint, coordinate: &Coordinate, work_dir: &WorkDir) -> (Coordinate, Option<(String, PathBuf)>) {
        if !coordinate.is_floating_snapshot() {
            return (coordinate.clone(), None);
        }

        let metadata_relative = metadata_path(&coordinate.namespace, &coordinate.project, Some(&coordinate.version));
        let staged = work_dir.file(METADATA_FILENAME);
        match self.download(endpoint, &metadata_relative, &staged).await {
            Ok(Some(_)) => match read_snapshot_info(&staged).await {
                Some(info) => {
                    debug!("remote {} has snapshot build {} for {}", endpoint.id, info, coordinate);
                    (coordinate.with_snapshot(info), Some((metadata_relative, staged)))
                }
                None => (coordinate.clone(), None),
            },
            Ok(None) => (coordinate.clone(), None),
            Err(e) => {
                debug!("unable to read snapshot metadata from {}: {}", endpoint.id, e);
                (coordinate.clone(), None)
            }
        }
    }

    /// Streams a remote resource into `destination`. Ok(None) if the remote does not have it.
    async fn download(&self, endpoint: &RemoteEndpoint, relative: &str, destination: &Path) -> anyhow::Result<Option<ComputedChecksums>> {
        let blob = match self.transport.get(endpoint, relative).await? {
            RemoteResponse::NotFound => return Ok(None),
            RemoteResponse::Found(blob) => blob,
        };

        let mut body = blob.into_validated();
        let mut file = File::create(destination).await?;
        let mut digests = Digests::new();
        loop {
            let chunk = timeout(endpoint.timeout(), body.next())
                .await
                .map_err(|_| anyhow!("reading {} from {} timed out after {}s", relative, endpoint.id, endpoint.timeout_seconds))?;
            match chunk {
                Some(chunk) => {
                    let chunk = chunk?;
                    digests.update(&chunk);
                    file.write_all(&chunk).await?;
                }
                None => break,
            }
        }
        file.flush().await?;

        Ok(Some(digests.finalize()))
    }

    /// The sidecar files to install with the primary file, or Err with the reason to reject
    ///  the download
    async fn apply_checksum_policy(&self, primary: &ChecksummedFile, computed: &ComputedChecksums) -> anyhow::Result<Result<Vec<ChecksumAlgorithm>, String>> {
        let mut installable = Vec::new();
        let mut any_verified = false;

        for algorithm in ChecksumAlgorithm::ALL {
            if self.checksum_policy == ChecksumPolicy::Ignore {
                if tokio::fs::try_exists(primary.sidecar_path(algorithm)).await? {
                    installable.push(algorithm);
                }
                continue;
            }

            let remote = primary.read_sidecar(algorithm).await?;
            match remote.as_deref().map(|r| r == computed.get(algorithm)) {
                Some(true) => {
                    any_verified = true;
                    installable.push(algorithm);
                }
                Some(false) if self.checksum_policy != ChecksumPolicy::Fix => {
                    return Ok(Err(format!("{} checksum mismatch, expected {}", algorithm.extension(), computed.get(algorithm))));
                }
                _ if self.checksum_policy == ChecksumPolicy::Fix => {
                    debug!("regenerating {} checksum of {}", algorithm.extension(), primary.path().display());
                    primary.write_sidecar(algorithm, computed).await?;
                    installable.push(algorithm);
                }
                _ => {}
            }
        }

        if self.checksum_policy == ChecksumPolicy::Require && !any_verified {
            return Ok(Err("no checksum available".to_string()));
        }
        Ok(Ok(installable))
    }
}
