use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::config::RemoteEndpoint;
use crate::maven::metadata_xml::Metadata;
use crate::maven::paths::metadata_path;
use crate::maven::remote_fetcher::RemoteFetcher;
use crate::storage::fs_storage::FsRepositoryStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Number(u64),
    Qualifier(String),
}

/// well-known qualifiers in ascending order, "" being a release
const QUALIFIERS: [&str; 7] = ["alpha", "beta", "milestone", "rc", "snapshot", "", "sp"];

fn qualifier_rank(q: &str) -> (usize, &str) {
    match QUALIFIERS.iter().position(|k| *k == q) {
        Some(idx) => (idx, ""),
        None => (QUALIFIERS.len(), q),
    }
}

fn normalize_qualifier(q: &str) -> String {
    match q {
        "a" => "alpha",
        "b" => "beta",
        "m" => "milestone",
        "cr" => "rc",
        "ga" | "final" | "release" => "",
        other => other,
    }.to_string()
}

fn flush(current: &mut String, is_digit: bool, result: &mut Vec<Item>) {
    if current.is_empty() {
        return;
    }
    if is_digit {
        // 20+ digit numbers are rare enough to compare as text
        match current.parse::<u64>() {
            Ok(n) => result.push(Item::Number(n)),
            Err(_) => result.push(Item::Qualifier(current.clone())),
        }
    }
    else {
        result.push(Item::Qualifier(normalize_qualifier(current)));
    }
    current.clear();
}

fn items(version: &str) -> Vec<Item> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut current_is_digit = false;

    for c in version.to_ascii_lowercase().chars() {
        if c == '.' || c == '-' || c == '_' {
            flush(&mut current, current_is_digit, &mut result);
            continue;
        }
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != current_is_digit {
            flush(&mut current, current_is_digit, &mut result);
        }
        current_is_digit = is_digit;
        current.push(c);
    }
    flush(&mut current, current_is_digit, &mut result);
    result
}

fn compare_items(a: Option<&Item>, b: Option<&Item>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(a), None) => match a {
            Item::Number(0) => Ordering::Equal,
            Item::Number(_) => Ordering::Greater,
            Item::Qualifier(q) => qualifier_rank(q).cmp(&qualifier_rank("")),
        },
        (None, Some(b)) => compare_items(Some(b), None).reverse(),
        (Some(Item::Number(a)), Some(Item::Number(b))) => a.cmp(b),
        (Some(Item::Number(_)), Some(Item::Qualifier(_))) => Ordering::Greater,
        (Some(Item::Qualifier(_)), Some(Item::Number(_))) => Ordering::Less,
        (Some(Item::Qualifier(a)), Some(Item::Qualifier(b))) => qualifier_rank(a).cmp(&qualifier_rank(b)),
    }
}

/// Orders versions the way Maven does for the common cases: numeric segments compare as numbers,
///  trailing zeros do not matter, and pre-release qualifiers sort before the release.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = items(a);
    let b = items(b);
    for idx in 0..a.len().max(b.len()) {
        let result = compare_items(a.get(idx), b.get(idx));
        if result != Ordering::Equal {
            return result;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: String,
    inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Restriction {
    lower: Option<Bound>,
    upper: Option<Bound>,
}
impl Restriction {
    fn contains(&self, version: &str) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(b) => match compare_versions(version, &b.version) {
                Ordering::Greater => true,
                Ordering::Equal => b.inclusive,
                Ordering::Less => false,
            },
        };
        let below_upper = match &self.upper {
            None => true,
            Some(b) => match compare_versions(version, &b.version) {
                Ordering::Less => true,
                Ordering::Equal => b.inclusive,
                Ordering::Greater => false,
            },
        };
        above_lower && below_upper
    }
}

/// A version requirement: `[1.0,2.0)`, `(,1.0]`, `[1.0]`, `[1.0,)`, unions of these separated
///  by commas, or a plain version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    spec: String,
    restrictions: Vec<Restriction>,
}
impl VersionRange {
    pub fn is_range(spec: &str) -> bool {
        let spec = spec.trim();
        spec.starts_with('[') || spec.starts_with('(')
    }

    pub fn parse(spec: &str) -> anyhow::Result<VersionRange> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            bail!("empty version range");
        }
        if !VersionRange::is_range(trimmed) {
            return Ok(VersionRange {
                spec: spec.to_string(),
                restrictions: vec![Restriction {
                    lower: Some(Bound { version: trimmed.to_string(), inclusive: true }),
                    upper: Some(Bound { version: trimmed.to_string(), inclusive: true }),
                }],
            });
        }

        let mut restrictions = Vec::new();
        let mut rest = trimmed;
        while !rest.is_empty() {
            let inclusive_lower = match rest.chars().next() {
                Some('[') => true,
                Some('(') => false,
                _ => bail!("invalid version range {}: expected '[' or '('", spec),
            };
            let end = rest.find([']', ')'])
                .ok_or_else(|| anyhow!("invalid version range {}: unterminated restriction", spec))?;
            let inclusive_upper = rest[end..].starts_with(']');
            let inner = &rest[1..end];

            let restriction = match inner.split_once(',') {
                None => {
                    if !(inclusive_lower && inclusive_upper) || inner.trim().is_empty() {
                        bail!("invalid version range {}: single versions must be written as [version]", spec);
                    }
                    let bound = Bound { version: inner.trim().to_string(), inclusive: true };
                    Restriction { lower: Some(bound.clone()), upper: Some(bound) }
                }
                Some((lower, upper)) => {
                    let (lower, upper) = (lower.trim(), upper.trim());
                    if upper.contains(',') {
                        bail!("invalid version range {}: too many bounds", spec);
                    }
                    let restriction = Restriction {
                        lower: (!lower.is_empty()).then(|| Bound { version: lower.to_string(), inclusive: inclusive_lower }),
                        upper: (!upper.is_empty()).then(|| Bound { version: upper.to_string(), inclusive: inclusive_upper }),
                    };
                    if let (Some(l), Some(u)) = (&restriction.lower, &restriction.upper) {
                        if compare_versions(&l.version, &u.version) == Ordering::Greater {
                            bail!("invalid version range {}: lower bound above upper bound", spec);
                        }
                    }
                    restriction
                }
            };
            restrictions.push(restriction);

            rest = rest[end + 1..].trim_start();
            if let Some(r) = rest.strip_prefix(',') {
                rest = r.trim_start();
                if rest.is_empty() {
                    bail!("invalid version range {}: trailing ','", spec);
                }
            }
        }

        Ok(VersionRange { spec: spec.to_string(), restrictions })
    }

    pub fn contains(&self, version: &str) -> bool {
        self.restrictions.iter().any(|r| r.contains(version))
    }

    /// the highest of the candidate versions inside the range
    pub fn highest_match<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        candidates.into_iter()
            .filter(|v| self.contains(v))
            .max_by(|a, b| compare_versions(a, b))
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }
}

/// Chooses a concrete version for a version requirement
#[async_trait]
pub trait VersionRangeResolver: Send + Sync {
    async fn resolve_version(&self, namespace: &str, project: &str, spec: &str) -> anyhow::Result<String>;
}

/// Resolves ranges against the versions a managed repository knows about: the project-level
///  metadata file (fetched from the remotes if it is not present locally) and the version
///  directories in storage.
#[derive(Clone)]
pub struct MetadataVersionRangeResolver {
    storage: FsRepositoryStorage,
    remote: Option<(RemoteFetcher, Arc<[RemoteEndpoint]>)>,
}
impl MetadataVersionRangeResolver {
    pub fn new(storage: FsRepositoryStorage) -> MetadataVersionRangeResolver {
        MetadataVersionRangeResolver { storage, remote: None }
    }

    pub fn with_remote(mut self, fetcher: RemoteFetcher, endpoints: Arc<[RemoteEndpoint]>) -> MetadataVersionRangeResolver {
        self.remote = Some((fetcher, endpoints));
        self
    }

    async fn available_versions(&self, namespace: &str, project: &str) -> anyhow::Result<BTreeSet<String>> {
        let mut result = BTreeSet::new();

        let relative = metadata_path(namespace, project, None);
        if let Some((fetcher, endpoints)) = &self.remote {
            if let Err(e) = fetcher.fetch_path(&relative, endpoints, &self.storage).await {
                warn!("unable to fetch {}: {}", relative, e);
            }
        }
        match Metadata::read(&self.storage.local_path(&relative)?).await {
            Ok(Some(metadata)) => result.extend(metadata.versions().iter().cloned()),
            Ok(None) => trace!("no project metadata at {}", relative),
            Err(e) => debug!("ignoring project metadata: {}", e),
        }

        let project_dir = self.storage.local_path(&format!("{}/{}", namespace.replace('.', "/"), project))?;
        match tokio::fs::read_dir(&project_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        if let Ok(name) = entry.file_name().into_string() {
                            if !name.starts_with('.') {
                                result.insert(name);
                            }
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(result)
    }
}

#[async_trait]
impl VersionRangeResolver for MetadataVersionRangeResolver {
    async fn resolve_version(&self, namespace: &str, project: &str, spec: &str) -> anyhow::Result<String> {
        if !VersionRange::is_range(spec) {
            return Ok(spec.trim().to_string());
        }

        let range = VersionRange::parse(spec)?;
        let available = self.available_versions(namespace, project).await?;
        range.highest_match(available.iter().map(String::as_str))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no version of {}:{} matches {}", namespace, project, spec))
    }
}
