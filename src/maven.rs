pub mod browser;
pub mod coordinates;
pub mod group;
pub mod metadata_merge;
pub mod metadata_xml;
pub mod model_resolver;
pub mod paths;
pub mod pom;
pub mod remote_fetcher;
pub mod repository_storage;
pub mod snapshot;
pub mod type_mapping;
pub mod version_range;
