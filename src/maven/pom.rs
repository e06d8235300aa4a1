#![allow(non_snake_case)]

//! The parts of a POM the repository needs for browsing and model resolution

use std::path::Path;

use serde::Deserialize;
use tokio::fs::read_to_string;
use tracing::trace;

use crate::error::{VaultError, VaultResult};

pub const DEFAULT_PACKAGING: &str = "jar";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename = "project")]
pub struct Pom {
    pub groupId: Option<String>,
    pub artifactId: Option<String>,
    pub version: Option<String>,
    pub packaging: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub parent: Option<Parent>,
    pub dependencies: Option<Dependencies>,
    pub distributionManagement: Option<DistributionManagement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Parent {
    pub groupId: Option<String>,
    pub artifactId: Option<String>,
    pub version: Option<String>,
    pub relativePath: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub dependency: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Dependency {
    pub groupId: Option<String>,
    pub artifactId: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub dependencyType: Option<String>,
    pub classifier: Option<String>,
    pub scope: Option<String>,
    pub optional: Option<String>,
}
impl Dependency {
    /// "groupId:artifactId", identifies a dependency for inheritance
    pub fn key(&self) -> String {
        format!("{}:{}", self.groupId.as_deref().unwrap_or(""), self.artifactId.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DistributionManagement {
    pub relocation: Option<Relocation>,
}

/// Where an artifact moved to. Missing fields mean 'unchanged'.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Relocation {
    pub groupId: Option<String>,
    pub artifactId: Option<String>,
    pub version: Option<String>,
    pub message: Option<String>,
}

impl Pom {
    pub fn parse(xml: &str) -> anyhow::Result<Pom> {
        Ok(serde_xml_rs::from_str(xml)?)
    }

    /// Ok(None) if there is no such file, MetadataInvalid if it can not be parsed
    pub async fn read(path: &Path) -> VaultResult<Option<Pom>> {
        trace!("reading POM from {}", path.display());
        let xml = match read_to_string(path).await {
            Ok(xml) => xml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultError::storage(path, e)),
        };
        Pom::parse(&xml)
            .map(Some)
            .map_err(|e| VaultError::metadata_invalid(path, e))
    }

    /// the group id, inherited from the parent if the POM does not declare one
    pub fn group_id(&self) -> Option<&str> {
        self.groupId.as_deref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.groupId.as_deref()))
    }

    /// the version, inherited from the parent if the POM does not declare one
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.version.as_deref()))
    }

    pub fn packaging(&self) -> &str {
        self.packaging.as_deref().unwrap_or(DEFAULT_PACKAGING)
    }

    pub fn relocation(&self) -> Option<&Relocation> {
        self.distributionManagement.as_ref()?.relocation.as_ref()
    }

    pub fn dependency_list(&self) -> &[Dependency] {
        self.dependencies.as_ref()
            .map(|d| d.dependency.as_slice())
            .unwrap_or(&[])
    }

    /// This POM with the values it does not declare itself taken from its parent's (effective) POM
    pub fn inherit(mut self, parent: &Pom) -> Pom {
        if self.groupId.is_none() {
            self.groupId = parent.group_id().map(str::to_string);
        }
        if self.version.is_none() {
            self.version = parent.version().map(str::to_string);
        }
        if self.description.is_none() {
            self.description = parent.description.clone();
        }
        if self.url.is_none() {
            self.url = parent.url.clone();
        }

        let own_keys: Vec<String> = self.dependency_list().iter().map(Dependency::key).collect();
        let inherited: Vec<Dependency> = parent.dependency_list().iter()
            .filter(|d| !own_keys.contains(&d.key()))
            .cloned()
            .collect();
        if !inherited.is_empty() {
            self.dependencies.get_or_insert_with(Default::default)
                .dependency
                .extend(inherited);
        }
        self
    }
}

/// What the repository knows about one version of a project, from its (effective) POM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectVersionMetadata {
    /// the version
    pub id: String,
    pub namespace: String,
    pub project: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub packaging: String,
    /// "groupId:artifactId:version"
    pub parent: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub relocation: Option<Relocation>,
}
impl ProjectVersionMetadata {
    pub fn new(namespace: &str, project: &str, version: &str, pom: &Pom) -> ProjectVersionMetadata {
        ProjectVersionMetadata {
            id: version.to_string(),
            namespace: namespace.to_string(),
            project: project.to_string(),
            name: pom.name.clone(),
            description: pom.description.clone(),
            url: pom.url.clone(),
            packaging: pom.packaging().to_string(),
            parent: pom.parent.as_ref().map(|p| format!(
                "{}:{}:{}",
                p.groupId.as_deref().unwrap_or(""),
                p.artifactId.as_deref().unwrap_or(""),
                p.version.as_deref().unwrap_or(""),
            )),
            dependencies: pom.dependency_list().to_vec(),
            relocation: pom.relocation().cloned(),
        }
    }
}
