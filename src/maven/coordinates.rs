use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use lazy_static::lazy_static;
use regex::Regex;

pub const SNAPSHOT: &str = "SNAPSHOT";
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

lazy_static! {
    static ref UNIQUE_SNAPSHOT_REGEX: Regex = Regex::new(r"^(.*)-(\d{8}\.\d{6})-(\d+)$").unwrap();
}

/// true for both floating ("1.0-SNAPSHOT") and timestamped ("1.0-20230101.120000-3") snapshots.
///
/// NB: the suffix is matched case sensitively, "1.0-snapshot" is a release version
pub fn is_snapshot(version: &str) -> bool {
    is_generic_snapshot(version) || is_unique_snapshot(version)
}

pub fn is_generic_snapshot(version: &str) -> bool {
    version.ends_with(SNAPSHOT_SUFFIX)
}

pub fn is_unique_snapshot(version: &str) -> bool {
    UNIQUE_SNAPSHOT_REGEX.is_match(version)
}

/// "1.0-20230101.120000-3" -> "1.0-SNAPSHOT", everything else is returned unchanged
pub fn base_version(version: &str) -> String {
    match UNIQUE_SNAPSHOT_REGEX.captures(version) {
        Some(c) => format!("{}{}", &c[1], SNAPSHOT_SUFFIX),
        None => version.to_string(),
    }
}

/// "1.0-SNAPSHOT" -> "1.0"
pub fn strip_snapshot(version: &str) -> &str {
    version.strip_suffix(SNAPSHOT_SUFFIX).unwrap_or(version)
}

/// Timing information of the most recent build of a floating snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotVersionInfo {
    /// "yyyyMMdd.HHmmss", UTC
    pub timestamp: String,
    pub build_number: u32,
}
impl SnapshotVersionInfo {
    /// "1.0-SNAPSHOT" -> "1.0-<timestamp>-<buildNumber>"
    pub fn apply_to(&self, floating_version: &str) -> String {
        format!("{}-{}-{}", strip_snapshot(floating_version), self.timestamp, self.build_number)
    }
}
impl Display for SnapshotVersionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.timestamp, self.build_number)
    }
}

/// Identifies a single file in a Maven repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    /// dot separated, a.k.a. groupId
    pub namespace: String,
    /// a.k.a. artifactId
    pub project: String,
    /// the version directory, possibly a floating snapshot
    pub version: String,
    pub classifier: Option<String>,
    /// without leading '.', may be empty if a type mapping matched on the classifier alone
    pub extension: String,
    pub artifact_type: String,
    /// present if the file name carries a timestamped snapshot version
    pub snapshot: Option<SnapshotVersionInfo>,
}
impl Coordinate {
    pub fn new(namespace: &str, project: &str, version: &str, classifier: Option<&str>, extension: &str) -> Coordinate {
        Coordinate {
            namespace: namespace.to_string(),
            project: project.to_string(),
            version: version.to_string(),
            classifier: classifier.map(str::to_string),
            extension: extension.to_string(),
            artifact_type: extension.to_string(),
            snapshot: None,
        }
    }

    pub fn pom(namespace: &str, project: &str, version: &str) -> Coordinate {
        Coordinate::new(namespace, project, version, None, "pom")
    }

    pub fn is_floating_snapshot(&self) -> bool {
        self.snapshot.is_none() && is_generic_snapshot(&self.version)
    }

    /// The version as it appears in the file name
    pub fn file_version(&self) -> String {
        match &self.snapshot {
            Some(info) if is_generic_snapshot(&self.version) => info.apply_to(&self.version),
            _ => self.version.clone(),
        }
    }

    pub fn file_name(&self) -> String {
        crate::maven::paths::artifact_file_name(
            &self.project,
            &self.file_version(),
            self.classifier.as_deref(),
            &self.extension,
        )
    }

    pub fn path(&self) -> String {
        crate::maven::paths::to_path(&self.namespace, &self.project, &self.version, Some(&self.file_name()))
    }

    pub fn with_snapshot(&self, info: SnapshotVersionInfo) -> Coordinate {
        Coordinate {
            snapshot: Some(info),
            ..self.clone()
        }
    }

    /// same artifact, pom extension - e.g. for looking up relocation information
    pub fn pom_coordinate(&self) -> Coordinate {
        Coordinate {
            classifier: None,
            extension: "pom".to_string(),
            artifact_type: "pom".to_string(),
            ..self.clone()
        }
    }
}
impl Display for Coordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.project, self.file_version())?;
        if let Some(c) = &self.classifier {
            write!(f, ":{}", c)?;
        }
        if !self.extension.is_empty() {
            write!(f, ":{}", self.extension)?;
        }
        Ok(())
    }
}

/// A file found in (or fetched into) a managed repository, with its storage properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub coordinate: Coordinate,
    /// the file name
    pub id: String,
    pub size: u64,
    pub last_modified: SystemTime,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub repository_id: String,
}
