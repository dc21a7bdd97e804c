//! `vault-agent`: the long-lived server process that owns one repository's
//! catalog and block store and serves the RPC surface of §4.8 over a Unix
//! domain socket (the reference transport binding of §6 — a credentialed
//! transport proper is an external collaborator).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::UnixListener;

use vault_api_types::{ChunkerParams, RepoError};
use vault_datastore::{retention, Repository};
use vault_protocol::Dispatcher;

#[derive(Parser)]
#[command(name = "vault-agent", about = "vault-backup repository agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a brand-new repository.
    Init {
        #[arg(long)]
        repo: PathBuf,
        #[arg(long)]
        passphrase_file: PathBuf,
        #[arg(long, default_value_t = vault_api_types::manifest::KdfParams::MIN_ITERATIONS)]
        kdf_iterations: u32,
    },
    /// Open a repository and serve the RPC surface over a Unix socket.
    Run {
        #[arg(long)]
        repo: PathBuf,
        #[arg(long)]
        passphrase_file: PathBuf,
        #[arg(long, default_value = vault_buildcfg::DEFAULT_AGENT_SOCKET)]
        listen: PathBuf,
        #[arg(long, default_value_t = vault_protocol::dispatcher::DEFAULT_READER_CONCURRENCY)]
        reader_concurrency: usize,
    },
    /// Run retention GC directly against the repository, without an agent.
    Gc {
        #[arg(long)]
        repo: PathBuf,
        #[arg(long)]
        passphrase_file: PathBuf,
        #[arg(long)]
        retention_days: u32,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Read-only integrity sweep (§4.9): lists orphan blocks and any
    /// integrity violations.
    Audit {
        #[arg(long)]
        repo: PathBuf,
        #[arg(long)]
        passphrase_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Init {
            repo,
            passphrase_file,
            kdf_iterations,
        } => run_init(&repo, &passphrase_file, kdf_iterations),
        Command::Run {
            repo,
            passphrase_file,
            listen,
            reader_concurrency,
        } => run_serve(&repo, &passphrase_file, &listen, reader_concurrency).await,
        Command::Gc {
            repo,
            passphrase_file,
            retention_days,
            dry_run,
        } => run_gc(&repo, &passphrase_file, retention_days, dry_run),
        Command::Audit {
            repo,
            passphrase_file,
        } => run_audit(&repo, &passphrase_file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_logging() {
    if let Err(err) = syslog::init(
        syslog::Facility::LOG_DAEMON,
        log::LevelFilter::Info,
        Some("vault-agent"),
    ) {
        eprintln!("unable to initialize syslog, falling back to stderr logging: {err}");
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}

fn read_passphrase(path: &Path) -> Result<Vec<u8>, RepoError> {
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

fn now_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

fn run_init(repo: &Path, passphrase_file: &Path, kdf_iterations: u32) -> Result<(), RepoError> {
    let passphrase = read_passphrase(passphrase_file)?;
    Repository::init(repo, &passphrase, kdf_iterations, ChunkerParams::default(), now_micros())?;
    log::info!("initialized repository at {}", repo.display());
    Ok(())
}

async fn run_serve(
    repo: &Path,
    passphrase_file: &Path,
    listen: &Path,
    reader_concurrency: usize,
) -> Result<(), RepoError> {
    let passphrase = read_passphrase(passphrase_file)?;
    let repository = Repository::open(repo, &passphrase)?;
    let dispatcher = std::sync::Arc::new(Dispatcher::with_reader_concurrency(repository, reader_concurrency));

    if listen.exists() {
        std::fs::remove_file(listen)
            .map_err(|err| RepoError::ConfigError(format!("remove stale socket {}: {err}", listen.display())))?;
    }
    let listener = UnixListener::bind(listen)
        .map_err(|err| RepoError::ConfigError(format!("bind {}: {err}", listen.display())))?;
    log::info!("vault-agent listening on {}", listen.display());

    loop {
        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|err| RepoError::TransportError(format!("accept: {err}")))?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            log::info!("accepted connection");
            dispatcher.serve_connection(stream).await;
            log::info!("connection closed");
        });
    }
}

fn run_gc(repo: &Path, passphrase_file: &Path, retention_days: u32, dry_run: bool) -> Result<(), RepoError> {
    let passphrase = read_passphrase(passphrase_file)?;
    let repository = Repository::open(repo, &passphrase)?;
    let report = retention::run_gc(
        &repository.catalog,
        &repository.block_store,
        now_micros() / 1_000_000,
        i64::from(retention_days) * 86_400,
        dry_run,
    )?;
    println!(
        "expired {} versions, freed {} blocks ({} bytes){}",
        report.expired_versions,
        report.freed_blocks,
        report.freed_bytes,
        if dry_run { " [dry run]" } else { "" }
    );
    Ok(())
}

fn run_audit(repo: &Path, passphrase_file: &Path) -> Result<(), RepoError> {
    let passphrase = read_passphrase(passphrase_file)?;
    let repository = Repository::open(repo, &passphrase)?;
    let findings = retention::audit(&repository.catalog, &repository.block_store)?;

    if findings.is_empty() {
        println!("audit: no findings");
        return Ok(());
    }

    let mut integrity_violations = 0;
    for finding in &findings {
        match finding {
            vault_api_types::AuditFinding::OrphanBlock { hash } => {
                println!("orphan block (reclaimable): {hash}");
            }
            vault_api_types::AuditFinding::IntegrityViolation { hash } => {
                println!("INTEGRITY VIOLATION: chunk {hash} has no backing block");
                integrity_violations += 1;
            }
        }
    }

    if integrity_violations > 0 {
        return Err(RepoError::IntegrityViolation(format!(
            "{integrity_violations} chunk row(s) with no backing block"
        )));
    }
    Ok(())
}
