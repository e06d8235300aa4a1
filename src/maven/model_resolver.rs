use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_recursion::async_recursion;
use tracing::{debug, trace, warn};

use crate::config::RemoteEndpoint;
use crate::error::{VaultError, VaultResult};
use crate::maven::coordinates::{is_generic_snapshot, Coordinate};
use crate::maven::pom::{Dependency, Parent, Pom};
use crate::maven::remote_fetcher::RemoteFetcher;
use crate::maven::snapshot::SnapshotResolver;
use crate::maven::version_range::{VersionRange, VersionRangeResolver};
use crate::storage::fs_storage::FsRepositoryStorage;

pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Where a model (POM) is expected in local storage. The file need not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub coordinate: Coordinate,
    pub path: PathBuf,
}
impl ModelSource {
    pub fn location(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// MetadataNotFound if the file is missing, MetadataInvalid if it does not parse
    pub async fn read(&self) -> VaultResult<Pom> {
        Pom::read(&self.path)
            .await?
            .ok_or_else(|| VaultError::MetadataNotFound(self.coordinate.to_string()))
    }
}

/// Locates POMs in one managed repository, retrieving them from its remotes when they are
///  missing locally.
///
/// Each instance tracks how deep into a parent chain it is, and [`ModelResolver::new_copy`]
///  hands out resolvers for the next level.
#[derive(Clone)]
pub struct ModelResolver {
    storage: FsRepositoryStorage,
    snapshots: SnapshotResolver,
    fetcher: RemoteFetcher,
    endpoints: Arc<[RemoteEndpoint]>,
    range_resolver: Arc<dyn VersionRangeResolver>,
    max_depth: usize,
    depth: usize,
}
impl ModelResolver {
    pub fn new(
        storage: FsRepositoryStorage,
        fetcher: RemoteFetcher,
        endpoints: Arc<[RemoteEndpoint]>,
        range_resolver: Arc<dyn VersionRangeResolver>,
    ) -> ModelResolver {
        ModelResolver {
            snapshots: SnapshotResolver::new(storage.clone()),
            storage,
            fetcher,
            endpoints,
            range_resolver,
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> ModelResolver {
        self.max_depth = max_depth;
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// An equivalent resolver for the next level of a recursive resolution: same storage,
    ///  remotes and range resolution, one level deeper.
    pub fn new_copy(&self) -> ModelResolver {
        ModelResolver {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    /// The local POM of a project version, fetched from the remotes if necessary. The source is
    ///  returned even if the POM could not be found anywhere; reading it then fails.
    pub async fn resolve_model(&self, namespace: &str, project: &str, version: &str) -> VaultResult<ModelSource> {
        let coordinate = Coordinate::pom(namespace, project, version);
        let relative = coordinate.path();
        let source = ModelSource {
            path: self.storage.local_path(&relative)?,
            coordinate: coordinate.clone(),
        };

        if source.exists().await {
            return Ok(source);
        }

        if is_generic_snapshot(version) {
            if let Some((resolved, path)) = self.snapshots.find_local_timestamped(&coordinate).await {
                trace!("using local snapshot build {} for {}", resolved, coordinate);
                return Ok(ModelSource { coordinate: resolved, path });
            }
        }

        match self.fetcher.fetch(&coordinate, &self.endpoints, &self.storage).await {
            Ok(result) => {
                if let Some(path) = result.local_path() {
                    let resolved = match self.storage.local_path(&relative) {
                        Ok(p) if p == path => coordinate.clone(),
                        _ => self.snapshots.resolve(&coordinate).await,
                    };
                    return Ok(ModelSource { coordinate: resolved, path: path.to_path_buf() });
                }
                debug!("model {} not found: {:?}", coordinate, result);
            }
            Err(e) => warn!("error fetching model {}: {}", coordinate, e),
        }
        Ok(source)
    }

    pub async fn resolve_parent(&self, parent: &Parent) -> VaultResult<ModelSource> {
        self.resolve_declared(parent.groupId.as_deref(), parent.artifactId.as_deref(), parent.version.as_deref()).await
    }

    pub async fn resolve_dependency(&self, dependency: &Dependency) -> VaultResult<ModelSource> {
        self.resolve_declared(dependency.groupId.as_deref(), dependency.artifactId.as_deref(), dependency.version.as_deref()).await
    }

    async fn resolve_declared(&self, group_id: Option<&str>, artifact_id: Option<&str>, version: Option<&str>) -> VaultResult<ModelSource> {
        let unresolvable = |reason: String| VaultError::UnresolvableModel {
            coordinate: format!("{}:{}:{}", group_id.unwrap_or(""), artifact_id.unwrap_or(""), version.unwrap_or("")),
            reason,
        };

        let (Some(group_id), Some(artifact_id), Some(version)) = (group_id, artifact_id, version) else {
            return Err(unresolvable("incomplete coordinates".to_string()));
        };

        let version = if VersionRange::is_range(version) {
            let resolved = self.range_resolver.resolve_version(group_id, artifact_id, version)
                .await
                .map_err(|e| unresolvable(format!("unable to resolve version range {}: {}", version, e)))?;
            debug!("resolved {}:{}:{} to version {}", group_id, artifact_id, version, resolved);
            resolved
        }
        else {
            version.to_string()
        };

        self.resolve_model(group_id, artifact_id, &version).await
    }

    /// A POM followed by its ancestors, nearest first. Missing or cyclic parents and chains
    ///  longer than the maximum depth are UnresolvableModel.
    pub async fn resolve_lineage(&self, namespace: &str, project: &str, version: &str) -> VaultResult<Vec<(ModelSource, Pom)>> {
        let source = self.resolve_model(namespace, project, version).await?;
        let mut lineage = Vec::new();
        self.collect_lineage(source, &mut lineage).await?;
        Ok(lineage)
    }

    #[async_recursion]
    async fn collect_lineage(&self, source: ModelSource, lineage: &mut Vec<(ModelSource, Pom)>) -> VaultResult<()> {
        if self.depth >= self.max_depth {
            return Err(VaultError::UnresolvableModel {
                coordinate: source.coordinate.to_string(),
                reason: format!("parent chain is longer than {}", self.max_depth),
            });
        }

        let pom = match source.read().await {
            Ok(pom) => pom,
            Err(VaultError::MetadataNotFound(c)) if self.depth > 0 => {
                return Err(VaultError::UnresolvableModel { coordinate: c, reason: "parent POM not found".to_string() });
            }
            Err(e) => return Err(e),
        };

        let is_cycle = lineage.iter().any(|(s, _): &(ModelSource, Pom)|
            s.coordinate.namespace == source.coordinate.namespace
                && s.coordinate.project == source.coordinate.project
                && s.coordinate.version == source.coordinate.version
        );
        if is_cycle {
            return Err(VaultError::UnresolvableModel {
                coordinate: source.coordinate.to_string(),
                reason: "cycle in parent chain".to_string(),
            });
        }

        let parent = pom.parent.clone();
        lineage.push((source, pom));

        if let Some(parent) = parent {
            let parent_source = self.resolve_parent(&parent).await?;
            self.new_copy().collect_lineage(parent_source, lineage).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use tempfile::TempDir;
    use super::*;
    use crate::config::ChecksumPolicy;
    use crate::maven::remote_fetcher::test::{endpoints, InMemoryTransport};
    use crate::maven::version_range::MetadataVersionRangeResolver;

    struct FailingRangeResolver;

    #[async_trait]
    impl VersionRangeResolver for FailingRangeResolver {
        async fn resolve_version(&self, _namespace: &str, _project: &str, spec: &str) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("nothing matches {}", spec))
        }
    }

    fn pom(group_id: &str, artifact_id: &str, version: &str, parent: Option<(&str, &str, &str)>) -> String {
        let parent = parent
            .map(|(g, a, v)| format!("<parent><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></parent>", g, a, v))
            .unwrap_or_default();
        format!("<project>{}<groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></project>", parent, group_id, artifact_id, version)
    }

    fn resolver(dir: &TempDir, transport: InMemoryTransport) -> (ModelResolver, Arc<InMemoryTransport>) {
        let storage = FsRepositoryStorage::new("internal", dir.path()).unwrap();
        let transport = Arc::new(transport);
        let fetcher = RemoteFetcher::new(transport.clone(), ChecksumPolicy::Ignore);
        let endpoints: Arc<[RemoteEndpoint]> = endpoints(&["central"]).into();
        let range_resolver = Arc::new(MetadataVersionRangeResolver::new(storage.clone()));
        (ModelResolver::new(storage, fetcher, endpoints, range_resolver), transport)
    }

    #[tokio::test]
    async fn test_resolve_model_fetches_missing_pom() {
        let dir = TempDir::new().unwrap();
        let pom_path = "org/example/proj/1.0/proj-1.0.pom";
        let (resolver, transport) = resolver(&dir, InMemoryTransport::default()
            .with("central", pom_path, &pom("org.example", "proj", "1.0", None)));

        let source = resolver.resolve_model("org.example", "proj", "1.0").await.unwrap();
        assert!(source.exists().await);
        assert_eq!(source.path, dir.path().join(pom_path));
        assert_eq!(source.read().await.unwrap().artifactId.as_deref(), Some("proj"));

        let requests = transport.requests().len();
        resolver.resolve_model("org.example", "proj", "1.0").await.unwrap();
        assert_eq!(transport.requests().len(), requests);
    }

    #[tokio::test]
    async fn test_resolve_model_returns_missing_source() {
        let dir = TempDir::new().unwrap();
        let (resolver, _transport) = resolver(&dir, InMemoryTransport::default().failing("central", "org/example/proj/1.0/proj-1.0.pom"));

        let source = resolver.resolve_model("org.example", "proj", "1.0").await.unwrap();
        assert!(!source.exists().await);
        assert!(matches!(source.read().await, Err(VaultError::MetadataNotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_model_uses_local_snapshot_build() {
        let dir = TempDir::new().unwrap();
        let version_dir = dir.path().join("org/example/proj/1.0-SNAPSHOT");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("maven-metadata.xml"),
            "<metadata><versioning><snapshot><timestamp>20230101.120000</timestamp><buildNumber>3</buildNumber></snapshot></versioning></metadata>").unwrap();
        std::fs::write(version_dir.join("proj-1.0-20230101.120000-3.pom"), pom("org.example", "proj", "1.0-SNAPSHOT", None)).unwrap();
        let (resolver, transport) = resolver(&dir, InMemoryTransport::default());

        let source = resolver.resolve_model("org.example", "proj", "1.0-SNAPSHOT").await.unwrap();
        assert_eq!(source.coordinate.file_name(), "proj-1.0-20230101.120000-3.pom");
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_parent_with_range() {
        let dir = TempDir::new().unwrap();
        let project_dir = dir.path().join("org/example/parent");
        for version in ["1", "2", "3"] {
            std::fs::create_dir_all(project_dir.join(version)).unwrap();
            std::fs::write(project_dir.join(version).join(format!("parent-{}.pom", version)), pom("org.example", "parent", version, None)).unwrap();
        }
        let (resolver, _transport) = resolver(&dir, InMemoryTransport::default());

        let parent = Parent {
            groupId: Some("org.example".to_string()),
            artifactId: Some("parent".to_string()),
            version: Some("[1,3)".to_string()),
            relativePath: None,
        };
        let source = resolver.resolve_parent(&parent).await.unwrap();
        assert_eq!(source.coordinate.version, "2");

        let failing = ModelResolver { range_resolver: Arc::new(FailingRangeResolver), ..resolver.clone() };
        match failing.resolve_parent(&parent).await {
            Err(VaultError::UnresolvableModel { reason, .. }) => assert!(reason.contains("[1,3)")),
            other => panic!("unexpected {:?}", other),
        }

        let dependency = Dependency { groupId: Some("org.example".to_string()), ..Default::default() };
        assert!(matches!(resolver.resolve_dependency(&dependency).await, Err(VaultError::UnresolvableModel { .. })));
    }

    #[tokio::test]
    async fn test_resolve_lineage() {
        let dir = TempDir::new().unwrap();
        let transport = InMemoryTransport::default()
            .with("central", "org/example/child/1/child-1.pom", &pom("org.example", "child", "1", Some(("org.example", "parent", "2"))))
            .with("central", "org/example/parent/2/parent-2.pom", &pom("org.example", "parent", "2", Some(("org.example", "root", "3"))))
            .with("central", "org/example/root/3/root-3.pom", &pom("org.example", "root", "3", None))
            .with("central", "org/example/a/1/a-1.pom", &pom("org.example", "a", "1", Some(("org.example", "b", "1"))))
            .with("central", "org/example/b/1/b-1.pom", &pom("org.example", "b", "1", Some(("org.example", "a", "1"))))
            .with("central", "org/example/orphan/1/orphan-1.pom", &pom("org.example", "orphan", "1", Some(("org.example", "missing", "1"))));
        let (resolver, _transport) = resolver(&dir, transport);

        let lineage = resolver.resolve_lineage("org.example", "child", "1").await.unwrap();
        let projects: Vec<&str> = lineage.iter().map(|(s, _)| s.coordinate.project.as_str()).collect();
        assert_eq!(projects, vec!["child", "parent", "root"]);

        match resolver.resolve_lineage("org.example", "a", "1").await {
            Err(VaultError::UnresolvableModel { reason, .. }) => assert!(reason.contains("cycle")),
            other => panic!("unexpected {:?}", other.map(|l| l.len())),
        }
        assert!(matches!(
            resolver.clone().with_max_depth(2).resolve_lineage("org.example", "child", "1").await,
            Err(VaultError::UnresolvableModel { .. })
        ));
        assert!(matches!(
            resolver.resolve_lineage("org.example", "orphan", "1").await,
            Err(VaultError::UnresolvableModel { .. })
        ));
        assert!(matches!(
            resolver.resolve_lineage("org.example", "nothing", "1").await,
            Err(VaultError::MetadataNotFound(_))
        ));
    }

    #[test]
    fn test_new_copy_goes_one_level_deeper() {
        let dir = TempDir::new().unwrap();
        let (resolver, _transport) = resolver(&dir, InMemoryTransport::default());
        assert_eq!(resolver.depth(), 0);
        assert_eq!(resolver.new_copy().new_copy().depth(), 2);
    }
}
