use crate::maven::metadata_xml::*;

/// Folds metadata documents of several repositories into one, strictly left to right: scalar
///  fields of `next` win if present, list fields are unioned and de-duplicated by natural key.
pub fn merge(accumulated: Metadata, next: &Metadata) -> Metadata {
    Metadata {
        groupId: merge_scalar(accumulated.groupId, &next.groupId),
        artifactId: merge_scalar(accumulated.artifactId, &next.artifactId),
        version: merge_scalar(accumulated.version, &next.version),
        versioning: merge_optional(accumulated.versioning, &next.versioning, merge_versioning),
        plugins: merge_optional(accumulated.plugins, &next.plugins, |acc, next| Plugins {
            plugin: union_by_key(acc.plugin, &next.plugin, |p| (p.prefix.clone(), p.artifactId.clone())),
        }),
    }
}

pub fn merge_all<'a>(documents: impl IntoIterator<Item = &'a Metadata>) -> Option<Metadata> {
    let mut documents = documents.into_iter();
    let first = documents.next()?.clone();
    Some(documents.fold(first, merge))
}

fn merge_versioning(accumulated: Versioning, next: &Versioning) -> Versioning {
    Versioning {
        latest: merge_scalar(accumulated.latest, &next.latest),
        release: merge_scalar(accumulated.release, &next.release),
        snapshot: merge_optional(accumulated.snapshot, &next.snapshot, |acc, next| Snapshot {
            timestamp: merge_scalar(acc.timestamp, &next.timestamp),
            buildNumber: next.buildNumber.or(acc.buildNumber),
            localCopy: merge_scalar(acc.localCopy, &next.localCopy),
        }),
        versions: merge_optional(accumulated.versions, &next.versions, |acc, next| Versions {
            version: union_by_key(acc.version, &next.version, |v| v.clone()),
        }),
        lastUpdated: merge_scalar(accumulated.lastUpdated, &next.lastUpdated),
        snapshotVersions: merge_optional(accumulated.snapshotVersions, &next.snapshotVersions, |acc, next| SnapshotVersions {
            snapshotVersion: union_by_key(acc.snapshotVersion, &next.snapshotVersion, |s| (s.classifier.clone(), s.extension.clone())),
        }),
    }
}

fn merge_scalar(accumulated: Option<String>, next: &Option<String>) -> Option<String> {
    next.clone().or(accumulated)
}

fn merge_optional<T: Clone>(accumulated: Option<T>, next: &Option<T>, f: impl FnOnce(T, &T) -> T) -> Option<T> {
    match (accumulated, next) {
        (Some(acc), Some(next)) => Some(f(acc, next)),
        (acc, None) => acc,
        (None, Some(next)) => Some(next.clone()),
    }
}

/// keeps the position of the first occurrence of a key, the content of the last one
fn union_by_key<T: Clone, K: PartialEq>(mut accumulated: Vec<T>, next: &[T], key: impl Fn(&T) -> K) -> Vec<T> {
    for item in next {
        let k = key(item);
        match accumulated.iter().position(|existing| key(existing) == k) {
            Some(idx) => accumulated[idx] = item.clone(),
            None => accumulated.push(item.clone()),
        }
    }
    accumulated
}
