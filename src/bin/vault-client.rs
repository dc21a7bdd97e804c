//! `vault-client`: connects to one `vault-agent` over a Unix domain socket
//! and drives either a one-shot operation or the continuous watch/debounce/
//! commit pipeline of §5 "Client-side".

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::UnixStream;

use vault_api_types::{Action, ChunkerParams, RepoError};
use vault_client::watcher::ChangeQueue;
use vault_client::{committer, debouncer, delta_engine, restore, watcher, RpcClient};
use vault_tools::crypto::CryptConfig;

#[derive(Parser)]
#[command(name = "vault-client", about = "vault-backup client")]
struct Cli {
    /// Path to the agent's Unix domain socket.
    #[arg(long, global = true, default_value = vault_buildcfg::DEFAULT_AGENT_SOCKET)]
    agent_socket: PathBuf,

    /// Repository root, used only to read the manifest's KDF parameters
    /// (the agent owns the catalog and block store; it is never opened for
    /// write here). Must be the same repository the agent at
    /// `--agent-socket` is serving.
    #[arg(long)]
    repo: PathBuf,

    /// File containing the repository passphrase (never read from the
    /// environment).
    #[arg(long, global = true)]
    passphrase_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Commit one local file as a single version.
    Backup {
        /// Repository-relative path to record the version under.
        repo_path: String,
        /// Local file to read and chunk.
        local_path: PathBuf,
    },
    /// Watch a directory tree and continuously commit changes.
    Watch {
        /// Local directory to watch; repository paths are relative to it.
        root: PathBuf,
    },
    /// Restore a version to a local path.
    Restore {
        repo_path: String,
        version_id: i64,
        dest: PathBuf,
    },
    /// List tracked files, optionally filtered by path prefix.
    ListFiles {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List versions of one file.
    ListVersions { repo_path: String },
    /// Commit a tombstone version for a deleted file.
    Delete { repo_path: String },
    /// Run retention GC on the repository.
    Gc {
        #[arg(long)]
        retention_days: u32,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print repository-wide statistics.
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), RepoError> {
    let passphrase = read_passphrase(&cli.passphrase_file)?;
    let manifest = vault_datastore::manifest_io::read_manifest(&cli.repo)?;
    let crypto = CryptConfig::derive(&passphrase, &manifest.kdf)?;

    let stream = UnixStream::connect(&cli.agent_socket)
        .await
        .map_err(|err| RepoError::TransportError(format!("connect {}: {err}", cli.agent_socket.display())))?;
    let client = RpcClient::new(stream);

    let outcome = dispatch(&client, &crypto, cli.command).await;
    client.shutdown().await;
    outcome
}

fn read_passphrase(path: &std::path::Path) -> Result<Vec<u8>, RepoError> {
    let raw = std::fs::read(path)
        .map_err(|err| RepoError::ConfigError(format!("read passphrase file {}: {err}", path.display())))?;
    Ok(raw
        .into_iter()
        .rev()
        .skip_while(|&b| b == b'\n' || b == b'\r')
        .collect::<Vec<u8>>()
        .into_iter()
        .rev()
        .collect())
}

async fn dispatch(client: &RpcClient, crypto: &CryptConfig, command: Command) -> Result<(), RepoError> {
    match command {
        Command::Backup { repo_path, local_path } => {
            let outcome = delta_engine::commit_file(
                client,
                crypto,
                ChunkerParams::default(),
                &repo_path,
                &local_path,
                Action::Created,
            )
            .await?;
            println!(
                "committed version {} ({}/{} chunks uploaded)",
                outcome.version_id, outcome.uploaded_chunks, outcome.total_chunks
            );
            Ok(())
        }
        Command::Watch { root } => run_watch(client, crypto, &root).await,
        Command::Restore {
            repo_path,
            version_id,
            dest,
        } => {
            let bytes = restore::restore_to_path(client, crypto, &repo_path, version_id, &dest).await?;
            println!("restored {bytes} bytes to {}", dest.display());
            Ok(())
        }
        Command::ListFiles { prefix } => {
            for file in client.list_files(prefix).await? {
                println!("{}\t{:?}\t{} bytes", file.path, file.last_action, file.current_size);
            }
            Ok(())
        }
        Command::ListVersions { repo_path } => {
            for version in client.list_versions(repo_path).await? {
                println!(
                    "{}\t{:?}\t{} bytes\tat {}",
                    version.version_id, version.action, version.plain_size, version.timestamp
                );
            }
            Ok(())
        }
        Command::Delete { repo_path } => {
            let version_id = delta_engine::commit_deletion(client, &repo_path).await?;
            println!("committed tombstone version {version_id}");
            Ok(())
        }
        Command::Gc { retention_days, dry_run } => {
            let report = client.gc(retention_days, dry_run).await?;
            println!(
                "expired {} versions, freed {} blocks ({} bytes){}",
                report.expired_versions,
                report.freed_blocks,
                report.freed_bytes,
                if report.dry_run { " [dry run]" } else { "" }
            );
            Ok(())
        }
        Command::Stats => {
            let stats = client.stats().await?;
            println!(
                "files {}\tversions {}\tchunks {}\tstored {} bytes\tplain {} bytes",
                stats.file_count, stats.version_count, stats.chunk_count, stats.total_stored_bytes, stats.total_plain_bytes
            );
            Ok(())
        }
    }
}

async fn run_watch(client: &RpcClient, crypto: &CryptConfig, root: &std::path::Path) -> Result<(), RepoError> {
    let queue = std::sync::Arc::new(ChangeQueue::new(watcher::DEFAULT_QUEUE_CAPACITY));
    let _handle = watcher::watch_tree(root, queue.clone())?;

    let (tx, rx) = tokio::sync::mpsc::channel(watcher::DEFAULT_QUEUE_CAPACITY);
    tokio::spawn(async move {
        loop {
            let event = queue.pop().await;
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let debounced = debouncer::spawn(rx, debouncer::DEFAULT_IDLE);
    log::info!("watching {} for changes", root.display());
    committer::run(debounced, client, crypto, ChunkerParams::default()).await;
    Ok(())
}
