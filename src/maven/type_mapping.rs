use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MAVEN_PLUGIN_REGEX: Regex = Regex::new(r"^(maven-.*-plugin|.*-maven-plugin)$").unwrap();
}

/// Maps (classifier, extension) to an artifact type, or returns None if the rule does not apply
pub type TypeMappingRule = Arc<dyn Fn(Option<&str>, &str) -> Option<String> + Send + Sync>;

/// Ordered, first-match-wins rules for deriving an artifact's type from its file name.
#[derive(Clone)]
pub struct ArtifactTypeMappings {
    rules: Vec<TypeMappingRule>,
}
impl ArtifactTypeMappings {
    pub fn new(rules: Vec<TypeMappingRule>) -> ArtifactTypeMappings {
        ArtifactTypeMappings { rules }
    }

    pub fn empty() -> ArtifactTypeMappings {
        ArtifactTypeMappings::new(vec![])
    }

    pub fn with_rule(mut self, rule: impl Fn(Option<&str>, &str) -> Option<String> + Send + Sync + 'static) -> ArtifactTypeMappings {
        self.rules.push(Arc::new(rule));
        self
    }

    /// adds a rule matching an exact classifier / extension pair
    pub fn with_classifier(self, classifier: &'static str, extension: &'static str, artifact_type: &'static str) -> ArtifactTypeMappings {
        self.with_rule(move |c, e| {
            if c == Some(classifier) && e == extension {
                Some(artifact_type.to_string())
            }
            else {
                None
            }
        })
    }

    pub fn with_extension(self, extension: &'static str, artifact_type: &'static str) -> ArtifactTypeMappings {
        self.with_rule(move |_, e| if e == extension { Some(artifact_type.to_string()) } else { None })
    }

    pub fn map(&self, classifier: Option<&str>, extension: &str) -> Option<String> {
        self.rules.iter()
            .find_map(|rule| rule(classifier, extension))
    }

    /// mapping rules first, then plugin detection by name, then the extension itself
    pub fn infer_type(&self, project: &str, classifier: Option<&str>, extension: &str) -> Option<String> {
        if let Some(t) = self.map(classifier, extension) {
            return Some(t);
        }
        if extension == "jar" && is_maven_plugin(project) {
            return Some("maven-plugin".to_string());
        }
        if extension.is_empty() {
            None
        }
        else {
            Some(extension.to_string())
        }
    }
}
impl Default for ArtifactTypeMappings {
    fn default() -> Self {
        ArtifactTypeMappings::empty()
            .with_classifier("client", "jar", "ejb-client")
            .with_classifier("sources", "jar", "java-source")
            .with_classifier("javadoc", "jar", "javadoc")
            .with_classifier("tests", "jar", "test-jar")
            .with_extension("tar.gz", "distribution-tgz")
            .with_extension("tar.bz2", "distribution-bzip2")
    }
}

pub fn is_maven_plugin(project: &str) -> bool {
    MAVEN_PLUGIN_REGEX.is_match(project)
}
