use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{VaultError, VaultResult};
use crate::maven::coordinates::*;
use crate::maven::metadata_xml::METADATA_FILENAME;
use crate::maven::type_mapping::ArtifactTypeMappings;

lazy_static! {
    static ref TIMESTAMP_REGEX: Regex = Regex::new(r"^(\d{8}\.\d{6})-(\d+)").unwrap();
}

/// "<namespace as dirs>/<project>/<version>[/<file_name>]"
pub fn to_path(namespace: &str, project: &str, version: &str, file_name: Option<&str>) -> String {
    let mut result = format!("{}/{}/{}", namespace.replace('.', "/"), project, version);
    if let Some(file_name) = file_name {
        result.push('/');
        result.push_str(file_name);
    }
    result
}

/// "<project>-<file_version>[-<classifier>][.<extension>]"
pub fn artifact_file_name(project: &str, file_version: &str, classifier: Option<&str>, extension: &str) -> String {
    let mut result = format!("{}-{}", project, file_version);
    if let Some(c) = classifier {
        result.push('-');
        result.push_str(c);
    }
    if !extension.is_empty() {
        result.push('.');
        result.push_str(extension);
    }
    result
}

/// Path of the metadata document at project level (no version) or version level
pub fn metadata_path(namespace: &str, project: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => to_path(namespace, project, v, Some(METADATA_FILENAME)),
        None => format!("{}/{}/{}", namespace.replace('.', "/"), project, METADATA_FILENAME),
    }
}

pub fn is_metadata_path(path: &str) -> bool {
    path.rsplit('/').next() == Some(METADATA_FILENAME)
}

/// A path that was parsed into its coordinate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub coordinate: Coordinate,
    pub file_name: String,
}

/// The parts of an artifact's file name, relative to its project id and version directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFilename {
    /// the version as it appears in the file name, i.e. timestamped for unique snapshots
    pub version: String,
    pub classifier: Option<String>,
    pub extension: Option<String>,
    pub snapshot: Option<SnapshotVersionInfo>,
    pub artifact_type: String,
}

/// Maps between coordinates and repository-relative paths. The type mapping rules are
///  injected, everything else is pure.
#[derive(Clone, Default)]
pub struct PathCodec {
    type_mappings: ArtifactTypeMappings,
}
impl PathCodec {
    pub fn new(type_mappings: ArtifactTypeMappings) -> PathCodec {
        PathCodec { type_mappings }
    }

    /// path is the relative path inside a maven repository, i.e. it starts with something like
    ///  "org/..." or "com/..."
    pub fn parse_path(&self, path: &str) -> VaultResult<ArtifactRef> {
        let normalized = path.replace('\\', "/");
        let segments: Vec<&str> = normalized.trim_start_matches('/').split('/').collect();
        if segments.len() < 4 || segments.iter().any(|s| s.is_empty()) {
            return Err(VaultError::MalformedPath { path: path.to_string() });
        }

        let (namespace, rest) = segments.split_at(segments.len() - 3);
        let (project, version, file_name) = (rest[0], rest[1], rest[2]);

        let decoded = self.decode_filename(project, version, file_name)?;
        Ok(ArtifactRef {
            coordinate: Coordinate {
                namespace: namespace.join("."),
                project: project.to_string(),
                version: version.to_string(),
                classifier: decoded.classifier,
                extension: decoded.extension.unwrap_or_default(),
                artifact_type: decoded.artifact_type,
                snapshot: decoded.snapshot,
            },
            file_name: file_name.to_string(),
        })
    }

    pub fn decode_filename(&self, project: &str, version: &str, file_name: &str) -> VaultResult<DecodedFilename> {
        let rest = file_name.strip_prefix(project)
            .and_then(|s| s.strip_prefix('-'))
            .ok_or_else(|| VaultError::invalid_artifact_id(file_name, format!("doesn't start with artifact ID '{}'", project)))?;

        let (resolved_version, snapshot) = if rest.starts_with(version) && !is_unique_snapshot(version) {
            (version.to_string(), None)
        }
        else if is_generic_snapshot(version) {
            let main_len = version.len() - SNAPSHOT.len();
            if main_len == 0 {
                return Err(VaultError::invalid_artifact_id(file_name, "timestamped snapshots must contain the main version"));
            }

            let not_timestamped = || VaultError::invalid_artifact_id(
                file_name,
                format!("doesn't contain a timestamped version matching snapshot '{}'", version),
            );
            let main_version = rest.get(..main_len).ok_or_else(not_timestamped)?;
            let captures = rest.get(main_len..)
                .and_then(|s| TIMESTAMP_REGEX.captures(s))
                .ok_or_else(not_timestamped)?;
            let build_number = captures[2].parse::<u32>()
                .map_err(|_| not_timestamped())?;

            let info = SnapshotVersionInfo {
                timestamp: captures[1].to_string(),
                build_number,
            };
            (format!("{}{}-{}", main_version, info.timestamp, captures[2].to_string()), Some(info))
        }
        else {
            return Err(VaultError::invalid_artifact_id(file_name, format!("doesn't contain version '{}'", version)));
        };

        let remainder = &rest[resolved_version.len()..];
        let (classifier, extension) = if remainder.is_empty() {
            (None, None)
        }
        else if let Some(remainder) = remainder.strip_prefix('-') {
            match remainder.find('.') {
                Some(dot) => (Some(&remainder[..dot]), Some(&remainder[dot + 1..])),
                None => (Some(remainder), None),
            }
        }
        else if let Some(remainder) = remainder.strip_prefix('.') {
            (None, Some(remainder))
        }
        else {
            return Err(VaultError::invalid_artifact_id(file_name, format!("expected classifier or extension but got '{}'", remainder)));
        };

        let artifact_type = self.type_mappings.infer_type(project, classifier, extension.unwrap_or(""))
            .ok_or_else(|| VaultError::invalid_artifact_id(file_name, "does not have a type"))?;

        Ok(DecodedFilename {
            version: resolved_version,
            classifier: classifier.map(str::to_string),
            extension: extension.map(str::to_string),
            snapshot,
            artifact_type,
        })
    }
}
