use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_recursion::async_recursion;
use tracing::{debug, trace, warn};

use crate::config::{RemoteEndpoint, VaultConfig};
use crate::error::{RelocationKind, VaultError, VaultResult};
use crate::maven::browser::ContentBrowser;
use crate::maven::coordinates::Coordinate;
use crate::maven::model_resolver::ModelResolver;
use crate::maven::paths::{is_metadata_path, metadata_path, PathCodec};
use crate::maven::pom::{Pom, ProjectVersionMetadata};
use crate::maven::remote_fetcher::{FetchResult, RemoteFetcher};
use crate::maven::snapshot::SnapshotResolver;
use crate::maven::version_range::MetadataVersionRangeResolver;
use crate::storage::fs_storage::FsRepositoryStorage;
use crate::util::checksum::ChecksumAlgorithm;
use crate::util::http_transport::RemoteTransport;

/// One managed Maven 2 repository with everything needed to serve content from it: local
///  storage, the path codec, its remotes and the resolvers on top.
#[derive(Clone)]
pub struct MavenRepositoryStorage {
    storage: FsRepositoryStorage,
    codec: PathCodec,
    snapshots: SnapshotResolver,
    fetcher: RemoteFetcher,
    endpoints: Arc<[RemoteEndpoint]>,
    browser: ContentBrowser,
    model_resolver: ModelResolver,
}
impl MavenRepositoryStorage {
    pub fn new(storage: FsRepositoryStorage, codec: PathCodec, fetcher: RemoteFetcher, endpoints: Arc<[RemoteEndpoint]>) -> MavenRepositoryStorage {
        let range_resolver = MetadataVersionRangeResolver::new(storage.clone())
            .with_remote(fetcher.clone(), endpoints.clone());
        MavenRepositoryStorage {
            snapshots: SnapshotResolver::new(storage.clone()),
            browser: ContentBrowser::new(storage.clone(), codec.clone()),
            model_resolver: ModelResolver::new(storage.clone(), fetcher.clone(), endpoints.clone(), Arc::new(range_resolver)),
            storage,
            codec,
            fetcher,
            endpoints,
        }
    }

    pub fn from_config(config: &VaultConfig, id: &str, transport: Arc<dyn RemoteTransport>) -> anyhow::Result<MavenRepositoryStorage> {
        let managed = config.managed_repository(id)
            .ok_or_else(|| anyhow!("unknown managed repository {}", id))?;
        let storage = FsRepositoryStorage::new(&managed.id, &managed.location)?;
        let fetcher = RemoteFetcher::new(transport, managed.checksum_policy)
            .with_failure_cache(managed.failure_cache.clone());
        Ok(MavenRepositoryStorage::new(storage, PathCodec::default(), fetcher, config.remote_endpoints(id)?))
    }

    pub fn id(&self) -> &str {
        self.storage.id()
    }

    pub fn storage(&self) -> &FsRepositoryStorage {
        &self.storage
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    pub fn endpoints(&self) -> &[RemoteEndpoint] {
        &self.endpoints
    }

    pub fn browser(&self) -> &ContentBrowser {
        &self.browser
    }

    pub fn model_resolver(&self) -> &ModelResolver {
        &self.model_resolver
    }

    /// The local file for a repository path, retrieved from the remotes if it is missing.
    ///  None if no remote has it.
    pub async fn fetch_path(&self, path: &str) -> VaultResult<Option<PathBuf>> {
        if is_metadata_path(path) {
            let result = self.fetcher.fetch_path(path, &self.endpoints, &self.storage).await?;
            return Ok(local_file(result));
        }

        if ChecksumAlgorithm::is_checksum_file(path) {
            return self.fetch_checksum(path).await;
        }

        let artifact = self.codec.parse_path(path)?;
        let result = self.fetcher.fetch(&artifact.coordinate, &self.endpoints, &self.storage).await?;
        Ok(local_file(result))
    }

    /// Sidecars are fetched along with their primary file, so the primary is retrieved first
    #[async_recursion]
    async fn fetch_checksum(&self, path: &str) -> VaultResult<Option<PathBuf>> {
        let primary = match path.rsplit_once('.') {
            Some((primary, _)) => primary,
            None => return Err(VaultError::MalformedPath { path: path.to_string() }),
        };

        match self.fetch_path(primary).await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(None),
            Err(e) => debug!("unable to fetch {} for checksum {}: {}", primary, path, e),
        }

        if self.storage.exists(path).await? {
            return Ok(Some(self.storage.local_path(path)?));
        }
        let result = self.fetcher.fetch_path(path, &self.endpoints, &self.storage).await?;
        Ok(local_file(result))
    }

    /// Checks whether a request for `path` should be redirected: to the current timestamped
    ///  build for floating snapshots (temporary), or to the location declared by the artifact's
    ///  POM relocation (permanent). Returns the path unchanged if no relocation applies.
    pub async fn resolve_request_path(&self, path: &str) -> VaultResult<String> {
        if is_metadata_path(path) || ChecksumAlgorithm::is_checksum_file(path) {
            return Ok(path.to_string());
        }

        let coordinate = self.codec.parse_path(path)?.coordinate;

        if coordinate.is_floating_snapshot() {
            let relative = metadata_path(&coordinate.namespace, &coordinate.project, Some(&coordinate.version));
            if let Err(e) = self.fetcher.fetch_path(&relative, &self.endpoints, &self.storage).await {
                debug!("unable to fetch snapshot metadata {}: {}", relative, e);
            }
            if let Some(info) = self.snapshots.local_snapshot_info(&coordinate).await {
                let resolved = coordinate.with_snapshot(info);
                debug!("redirecting {} to snapshot build {}", coordinate, resolved);
                return Err(VaultError::RelocationRequested { path: resolved.path(), kind: RelocationKind::Temporary });
            }
        }

        if let Some(relocated) = self.relocation_target(&coordinate).await {
            let relocated_path = relocated.path();
            if relocated_path != path {
                debug!("{} is relocated to {}", coordinate, relocated);
                return Err(VaultError::RelocationRequested { path: relocated_path, kind: RelocationKind::Permanent });
            }
        }

        Ok(path.to_string())
    }

    /// The coordinate the artifact's POM relocates it to. Missing or unreadable POMs mean no
    ///  relocation.
    async fn relocation_target(&self, coordinate: &Coordinate) -> Option<Coordinate> {
        let pom_coordinate = coordinate.pom_coordinate();
        let pom_path = match self.fetcher.fetch(&pom_coordinate, &self.endpoints, &self.storage).await {
            Ok(result) => local_file(result)?,
            Err(e) => {
                debug!("unable to fetch POM {} for relocation: {}", pom_coordinate, e);
                return None;
            }
        };

        let pom = match Pom::read(&pom_path).await {
            Ok(pom) => pom?,
            Err(e) => {
                warn!("ignoring POM while checking for relocation: {}", e);
                return None;
            }
        };

        let relocation = pom.relocation()?;
        trace!("{} declares relocation {:?}", pom_coordinate, relocation);
        Some(Coordinate {
            namespace: relocation.groupId.clone().unwrap_or_else(|| coordinate.namespace.clone()),
            project: relocation.artifactId.clone().unwrap_or_else(|| coordinate.project.clone()),
            version: relocation.version.clone().unwrap_or_else(|| coordinate.version.clone()),
            snapshot: None,
            ..coordinate.clone()
        })
    }

    /// What the (effective) POM of a project version says about it. The POM's own coordinates
    ///  must match the path it was found at, and values it does not declare are inherited along
    ///  its parent chain.
    pub async fn read_project_version_metadata(&self, namespace: &str, project: &str, version: &str) -> VaultResult<ProjectVersionMetadata> {
        let source = self.model_resolver.resolve_model(namespace, project, version).await?;
        let pom = source.read().await?;

        let location = source.location().display().to_string();
        check_location(&location, "groupId", namespace, pom.group_id())?;
        check_location(&location, "artifactId", project, pom.artifactId.as_deref())?;
        check_location(&location, "version", version, pom.version())?;

        let effective = if pom.parent.is_some() {
            let lineage = self.model_resolver.resolve_lineage(namespace, project, version).await?;
            lineage.into_iter()
                .rev()
                .map(|(_, pom)| pom)
                .reduce(|parent, child| child.inherit(&parent))
                .unwrap_or(pom)
        }
        else {
            pom
        };

        Ok(ProjectVersionMetadata::new(namespace, project, version, &effective))
    }
}

fn local_file(result: FetchResult) -> Option<PathBuf> {
    match result {
        FetchResult::Fetched { path, .. } | FetchResult::AlreadyPresent { path } => Some(path),
        FetchResult::NotFound { failures } => {
            debug!("not found in any remote: {:?}", failures);
            None
        }
    }
}

fn check_location(path: &str, field: &str, expected: &str, found: Option<&str>) -> VaultResult<()> {
    match found {
        Some(found) if found != expected => Err(VaultError::ArtifactMislocated {
            path: path.to_string(),
            expected: format!("{} {}", field, expected),
            found: format!("{} {}", field, found),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;
    use super::*;
    use crate::config::ChecksumPolicy;
    use crate::maven::remote_fetcher::test::{endpoints, InMemoryTransport, HELLO_SHA1};

    fn repository(dir: &TempDir, transport: InMemoryTransport) -> (MavenRepositoryStorage, Arc<InMemoryTransport>) {
        let storage = FsRepositoryStorage::new("internal", dir.path()).unwrap();
        let transport = Arc::new(transport);
        let fetcher = RemoteFetcher::new(transport.clone(), ChecksumPolicy::VerifyIfPresent);
        (MavenRepositoryStorage::new(storage, PathCodec::default(), fetcher, endpoints(&["central", "mirror"]).into()), transport)
    }

    fn write(dir: &TempDir, relative: &str, content: &str) {
        let path = dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    const SNAPSHOT_METADATA: &str = "<metadata><groupId>org.example</groupId><artifactId>proj</artifactId><versioning><snapshot><timestamp>20240102.030405</timestamp><buildNumber>7</buildNumber></snapshot></versioning></metadata>";

    #[test]
    fn test_from_config() {
        let config = VaultConfig::from_json(r#"{
            "managed_repositories": [{"id": "internal", "location": "/var/repo/internal", "remotes": ["central"], "checksum_policy": "fix"}],
            "remote_repositories": [{"id": "central", "base_location": "https://repo1.maven.org/maven2"}]
        }"#).unwrap();

        let repository = MavenRepositoryStorage::from_config(&config, "internal", Arc::new(InMemoryTransport::default())).unwrap();
        assert_eq!(repository.id(), "internal");
        assert_eq!(repository.endpoints().len(), 1);
        assert_eq!(repository.endpoints()[0].id, "central");

        assert!(MavenRepositoryStorage::from_config(&config, "nope", Arc::new(InMemoryTransport::default())).is_err());
    }

    #[tokio::test]
    async fn test_fetch_path() {
        let dir = TempDir::new().unwrap();
        let (repository, _transport) = repository(&dir, InMemoryTransport::default()
            .with("mirror", "org/example/proj/1.0/proj-1.0.jar", "hello")
            .with("mirror", "org/example/proj/1.0/proj-1.0.jar.sha1", HELLO_SHA1)
            .with("central", "org/example/proj/maven-metadata.xml", "<metadata><versioning><versions><version>1.0</version></versions></versioning></metadata>"));

        let jar = repository.fetch_path("org/example/proj/1.0/proj-1.0.jar").await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(jar).unwrap(), "hello");

        let metadata = repository.fetch_path("org/example/proj/maven-metadata.xml").await.unwrap();
        assert_eq!(metadata, Some(dir.path().join("org/example/proj/maven-metadata.xml")));

        assert_eq!(repository.fetch_path("org/example/proj/2.0/proj-2.0.jar").await.unwrap(), None);
        assert!(matches!(repository.fetch_path("proj-1.0.jar").await, Err(VaultError::MalformedPath { .. })));
    }

    #[tokio::test]
    async fn test_fetch_checksum_fetches_primary() {
        let dir = TempDir::new().unwrap();
        let (repository, transport) = repository(&dir, InMemoryTransport::default()
            .with("central", "org/example/proj/1.0/proj-1.0.jar", "hello")
            .with("central", "org/example/proj/1.0/proj-1.0.jar.sha1", HELLO_SHA1));

        let sha1 = repository.fetch_path("org/example/proj/1.0/proj-1.0.jar.sha1").await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(sha1).unwrap(), HELLO_SHA1);
        assert!(dir.path().join("org/example/proj/1.0/proj-1.0.jar").is_file());

        let requests = transport.requests().len();
        assert_eq!(repository.fetch_path("org/example/proj/1.0/proj-1.0.jar.md5").await.unwrap(), None);
        assert!(transport.requests().len() > requests);
    }

    #[tokio::test]
    async fn test_resolve_request_path_for_snapshot() {
        let dir = TempDir::new().unwrap();
        write(&dir, "org/example/proj/1.0-SNAPSHOT/maven-metadata.xml", SNAPSHOT_METADATA);
        let (repository, _transport) = repository(&dir, InMemoryTransport::default());

        match repository.resolve_request_path("org/example/proj/1.0-SNAPSHOT/proj-1.0-SNAPSHOT.jar").await {
            Err(VaultError::RelocationRequested { path, kind }) => {
                assert_eq!(path, "org/example/proj/1.0-SNAPSHOT/proj-1.0-20240102.030405-7.jar");
                assert_eq!(kind, RelocationKind::Temporary);
            }
            other => panic!("unexpected {:?}", other),
        }

        let metadata = "org/example/proj/1.0-SNAPSHOT/maven-metadata.xml";
        assert_eq!(repository.resolve_request_path(metadata).await.unwrap(), metadata);
    }

    #[tokio::test]
    async fn test_resolve_request_path_for_relocated_pom() {
        let dir = TempDir::new().unwrap();
        let (repository, _transport) = repository(&dir, InMemoryTransport::default()
            .with("central", "org/old/proj/1.0/proj-1.0.pom",
                  "<project><groupId>org.old</groupId><artifactId>proj</artifactId><version>1.0</version>\
                   <distributionManagement><relocation><groupId>org.new</groupId></relocation></distributionManagement></project>")
            .with("central", "org/example/proj/1.0/proj-1.0.pom",
                  "<project><groupId>org.example</groupId><artifactId>proj</artifactId><version>1.0</version></project>"));

        match repository.resolve_request_path("org/old/proj/1.0/proj-1.0-sources.jar").await {
            Err(VaultError::RelocationRequested { path, kind }) => {
                assert_eq!(path, "org/new/proj/1.0/proj-1.0-sources.jar");
                assert_eq!(kind, RelocationKind::Permanent);
            }
            other => panic!("unexpected {:?}", other),
        }

        let plain = "org/example/proj/1.0/proj-1.0.jar";
        assert_eq!(repository.resolve_request_path(plain).await.unwrap(), plain);
        let unknown = "org/example/other/1.0/other-1.0.jar";
        assert_eq!(repository.resolve_request_path(unknown).await.unwrap(), unknown);
    }

    #[tokio::test]
    async fn test_read_project_version_metadata() {
        let dir = TempDir::new().unwrap();
        write(&dir, "org/example/proj/1.0/proj-1.0.pom", r#"<project>
  <parent><groupId>org.example</groupId><artifactId>parent</artifactId><version>3</version></parent>
  <artifactId>proj</artifactId>
  <version>1.0</version>
  <name>Proj</name>
  <dependencies>
    <dependency><groupId>org.slf4j</groupId><artifactId>slf4j-api</artifactId><version>2.0.9</version></dependency>
  </dependencies>
</project>"#);
        let (repository, _transport) = repository(&dir, InMemoryTransport::default()
            .with("central", "org/example/parent/3/parent-3.pom", r#"<project>
  <groupId>org.example</groupId><artifactId>parent</artifactId><version>3</version><packaging>pom</packaging>
  <url>https://example.org</url>
  <dependencies>
    <dependency><groupId>junit</groupId><artifactId>junit</artifactId><version>4.13</version><scope>test</scope></dependency>
  </dependencies>
</project>"#));

        let metadata = repository.read_project_version_metadata("org.example", "proj", "1.0").await.unwrap();
        assert_eq!(metadata.id, "1.0");
        assert_eq!(metadata.name.as_deref(), Some("Proj"));
        assert_eq!(metadata.url.as_deref(), Some("https://example.org"));
        assert_eq!(metadata.packaging, "jar");
        assert_eq!(metadata.parent.as_deref(), Some("org.example:parent:3"));
        assert_eq!(metadata.dependencies.len(), 2);
    }

    #[tokio::test]
    async fn test_read_project_version_metadata_errors() {
        let dir = TempDir::new().unwrap();
        write(&dir, "org/example/moved/1.0/moved-1.0.pom",
              "<project><groupId>org.other</groupId><artifactId>moved</artifactId><version>1.0</version></project>");
        write(&dir, "org/example/broken/1.0/broken-1.0.pom", "<project><groupId>");
        let (repository, _transport) = repository(&dir, InMemoryTransport::default());

        assert!(matches!(
            repository.read_project_version_metadata("org.example", "moved", "1.0").await,
            Err(VaultError::ArtifactMislocated { .. })
        ));
        assert!(matches!(
            repository.read_project_version_metadata("org.example", "broken", "1.0").await,
            Err(VaultError::MetadataInvalid { .. })
        ));
        assert!(matches!(
            repository.read_project_version_metadata("org.example", "missing", "1.0").await,
            Err(VaultError::MetadataNotFound(_))
        ));
    }
}
