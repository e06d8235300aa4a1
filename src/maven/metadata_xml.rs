#![allow(non_snake_case)]

//! Document model of `maven-metadata.xml`, see
//!  https://maven.apache.org/ref/3.9.5/maven-repository-metadata/repository-metadata.html

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs::read_to_string;
use tracing::trace;

use crate::error::{VaultError, VaultResult};
use crate::maven::coordinates::SnapshotVersionInfo;

pub const METADATA_FILENAME: &str = "maven-metadata.xml";
pub const METADATA_FILENAME_START: &str = "maven-metadata";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "metadata")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groupId: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifactId: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versioning: Option<Versioning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Plugins>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<Versions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastUpdated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshotVersions: Option<SnapshotVersions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub version: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildNumber: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localCopy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVersions {
    #[serde(default)]
    pub snapshotVersion: Vec<SnapshotVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVersion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugins {
    #[serde(default)]
    pub plugin: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifactId: Option<String>,
}

impl Metadata {
    pub fn parse(xml: &str) -> anyhow::Result<Metadata> {
        Ok(serde_xml_rs::from_str(xml)?)
    }

    /// Ok(None) if there is no such file, MetadataInvalid if it can not be parsed
    pub async fn read(path: &Path) -> VaultResult<Option<Metadata>> {
        trace!("reading metadata from {}", path.display());
        let xml = match read_to_string(path).await {
            Ok(xml) => xml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultError::storage(path, e)),
        };
        Metadata::parse(&xml)
            .map(Some)
            .map_err(|e| VaultError::metadata_invalid(path, e))
    }

    pub fn to_xml(&self) -> anyhow::Result<String> {
        Ok(serde_xml_rs::to_string(self)?)
    }

    /// the most recent snapshot build, if both timestamp and build number are present
    pub fn snapshot_version(&self) -> Option<SnapshotVersionInfo> {
        let snapshot = self.versioning.as_ref()?.snapshot.as_ref()?;
        Some(SnapshotVersionInfo {
            timestamp: snapshot.timestamp.clone()?,
            build_number: snapshot.buildNumber?,
        })
    }

    pub fn versions(&self) -> &[String] {
        self.versioning.as_ref()
            .and_then(|v| v.versions.as_ref())
            .map(|v| v.version.as_slice())
            .unwrap_or(&[])
    }
}
