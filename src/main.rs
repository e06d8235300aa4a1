use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use arti_vault_core::config::VaultConfig;
use arti_vault_core::error::VaultError;
use arti_vault_core::maven::group::RepositoryGroup;
use arti_vault_core::maven::repository_storage::MavenRepositoryStorage;
use arti_vault_core::util::http_transport::{HttpTransport, RemoteTransport};

/// Resolves content of Maven 2 repositories managed by arti-vault
#[derive(Parser, Debug)]
#[command(name = "arti-vault", version, about)]
struct Cli {
    /// JSON configuration of managed repositories, remotes and groups
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Make a file available in a managed repository, retrieving it from the remotes if necessary
    Fetch {
        repository: String,
        path: String,
    },
    /// Browse a managed repository
    List {
        repository: String,
        namespace: Option<String>,
        project: Option<String>,
        version: Option<String>,
    },
    /// Merge a metadata document over the members of a repository group
    MergedMetadata {
        group: String,
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = VaultConfig::load(&cli.config).await?;
    let transport: Arc<dyn RemoteTransport> = Arc::new(HttpTransport::new());

    match cli.command {
        Command::Fetch { repository, path } => {
            let repository = MavenRepositoryStorage::from_config(&config, &repository, transport)?;
            let path = match repository.resolve_request_path(&path).await {
                Ok(path) => path,
                Err(VaultError::RelocationRequested { path, kind }) => {
                    info!("following {} relocation to {}", kind, path);
                    path
                }
                Err(e) => return Err(e.into()),
            };
            match repository.fetch_path(&path).await? {
                Some(local) => println!("{}", local.display()),
                None => anyhow::bail!("{} not found in {} or its remotes", path, repository.id()),
            }
        }
        Command::List { repository, namespace, project, version } => {
            let repository = MavenRepositoryStorage::from_config(&config, &repository, transport)?;
            let browser = repository.browser();
            let all = |_: &str| true;
            match (namespace, project, version) {
                (Some(namespace), Some(project), Some(version)) => {
                    for artifact in browser.list_artifacts(&namespace, &project, &version, &all).await? {
                        println!("{}\t{}\t{}", artifact.id, artifact.size, artifact.sha1.unwrap_or_default());
                    }
                }
                (Some(namespace), Some(project), None) => {
                    for version in browser.list_project_versions(&namespace, &project, &all).await? {
                        println!("{}", version);
                    }
                }
                (namespace, _, _) => {
                    for child in browser.list_namespaces(namespace.as_deref(), &all).await? {
                        println!("{}/", child);
                    }
                    if let Some(namespace) = namespace {
                        for project in browser.list_projects(&namespace, &all).await? {
                            println!("{}", project);
                        }
                    }
                }
            }
        }
        Command::MergedMetadata { group, path } => {
            let group = RepositoryGroup::from_config(&config, &group, transport)?;
            let merged = group.merged_metadata(&path).await?;
            println!("{}", merged.to_xml()?);
        }
    }

    Ok(())
}
