//! tbk: encrypted snapshot vault CLI
//!
//! Commands:
//!   init <profile> --source <dir>            - create a vault profile and its keys
//!   snapshot <profile>                       - take an incremental, signed snapshot
//!   restore <profile> [<id>] --target <dir>  - verified restore (latest by default)
//!   list <profile>                           - snapshots, oldest first
//!   diff <profile> [<id>]                    - compare a snapshot with a local directory
//!   delete-snapshot <profile> <id>           - remove one snapshot manifest
//!   delete <profile>                         - forget a profile on this machine
//!   profiles                                 - list local profiles
//!   rotate-recovery <profile>                - issue a new recovery phrase
//!   audit                                    - show recent audit events

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use tbk_core::config::TbkConfig;
use tbk_core::profile::{validate_name, RemoteBackend, RemoteConfig};
use tbk_core::{unix_now, Profile, ProfileStore};
use tbk_crypto::{KeyVault, MasterKey};
use tbk_secrets::{names, EnvPrompt, Prompt, TerminalPrompt};
use tbk_snapshot::{
    AuditLog, HookSet, ProgressFn, RestoreEngine, RestoreOptions, SnapshotEngine,
    SnapshotOutcome, UnlockedVault,
};
use tbk_storage::{build_operator, OpendalStore};

type Store = OpendalStore;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tbk",
    version,
    about = "Encrypted, signed, incremental directory snapshots",
    long_about = "tbk: client-side encrypted snapshot vault. The remote only ever sees \
                  ciphertext chunks and signed manifests."
)]
struct Cli {
    /// Path to config.toml (default: $XDG_CONFIG_HOME/tbk/config.toml)
    #[arg(long, short = 'c', env = "TBK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides [logging].level)
    #[arg(long, env = "TBK_LOG")]
    log: Option<String>,

    /// Log format (overrides [logging].format)
    #[arg(long, env = "TBK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault profile: keys, recovery phrase, remote settings
    Init(InitArgs),

    /// Snapshot the profile's source directory
    Snapshot {
        /// Profile name
        profile: String,
    },

    /// Restore a snapshot into a directory
    Restore {
        /// Profile name
        profile: String,
        /// Snapshot id (default: latest)
        snapshot: Option<String>,
        /// Directory to restore into (created if missing)
        #[arg(long, short = 't')]
        target: PathBuf,
        /// Replace files that already exist in the target
        #[arg(long)]
        overwrite: bool,
        /// Unlock with the recovery phrase instead of the password
        #[arg(long)]
        recovery: bool,
    },

    /// List the snapshots of a profile
    List {
        /// Profile name
        profile: String,
    },

    /// Compare a snapshot with a local directory
    Diff {
        /// Profile name
        profile: String,
        /// Snapshot id (default: latest)
        snapshot: Option<String>,
        /// Directory to compare against (default: the profile's source directory)
        #[arg(long)]
        local: Option<PathBuf>,
    },

    /// Remove one snapshot's manifest; chunks stay for later snapshots
    #[command(name = "delete-snapshot")]
    DeleteSnapshot {
        /// Profile name
        profile: String,
        /// Snapshot id
        snapshot: String,
    },

    /// Delete a profile and its stored credentials from this machine
    ///
    /// Remote data is not touched.
    Delete {
        /// Profile name
        profile: String,
    },

    /// List profiles on this machine
    Profiles,

    /// Replace the recovery phrase; the old phrase stops working
    #[command(name = "rotate-recovery")]
    RotateRecovery {
        /// Profile name
        profile: String,
        /// Unlock with the current recovery phrase instead of the password
        #[arg(long)]
        recovery: bool,
    },

    /// Show recent audit events
    Audit {
        /// Number of recent events to show
        #[arg(long, short = 'n', default_value_t = 50)]
        last: usize,
    },
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Profile name (letters, digits, '-' or '_')
    name: String,

    /// Directory to back up
    #[arg(long, short = 's')]
    source: PathBuf,

    /// Remote backend
    #[arg(long, value_enum, default_value = "fs")]
    backend: BackendArg,

    /// S3 endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// S3 region
    #[arg(long)]
    region: Option<String>,

    /// S3 bucket
    #[arg(long)]
    bucket: Option<String>,

    /// Root directory for the fs backend
    #[arg(long)]
    root: Option<PathBuf>,

    /// Key prefix inside the bucket or root (default: profile name)
    #[arg(long, short = 'p')]
    prefix: Option<String>,

    /// S3 access key id; the secret is read from AWS_SECRET_ACCESS_KEY or prompted
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    access_key_id: Option<String>,

    /// Glob to exclude (repeatable), matched against names and relative paths
    #[arg(long = "exclude", short = 'x')]
    exclude: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    S3,
    Fs,
    Memory,
}

impl From<BackendArg> for RemoteBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::S3 => RemoteBackend::S3,
            BackendArg::Fs => RemoteBackend::Fs,
            BackendArg::Memory => RemoteBackend::Memory,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| tbk_core::config_dir().join("config.toml"));
    let config = TbkConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| LogFormat::from_config(&config.logging.format));
    init_logging(&level, &format);
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "tbk starting"
    );

    let state_dir = config.state_dir();
    match cli.command {
        Commands::Init(args) => cmd_init(&config, &state_dir, &args),
        Commands::Snapshot { profile } => cmd_snapshot(&config, &state_dir, &profile).await,
        Commands::Restore {
            profile,
            snapshot,
            target,
            overwrite,
            recovery,
        } => {
            cmd_restore(
                &config,
                &state_dir,
                &profile,
                snapshot,
                &target,
                RestoreOptions { overwrite },
                recovery,
            )
            .await
        }
        Commands::List { profile } => cmd_list(&config, &state_dir, &profile).await,
        Commands::Diff {
            profile,
            snapshot,
            local,
        } => cmd_diff(&config, &state_dir, &profile, snapshot, local.as_deref()).await,
        Commands::DeleteSnapshot { profile, snapshot } => {
            cmd_delete_snapshot(&config, &state_dir, &profile, &snapshot).await
        }
        Commands::Delete { profile } => cmd_delete(&state_dir, &profile),
        Commands::Profiles => cmd_profiles(&state_dir),
        Commands::RotateRecovery { profile, recovery } => {
            cmd_rotate_recovery(&state_dir, &profile, recovery)
        }
        Commands::Audit { last } => cmd_audit(&state_dir, last),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Unlocking and remote access ───────────────────────────────────────────────

/// `TBK_PASSWORD` / `TBK_RECOVERY_PHRASE` when set, the terminal otherwise.
fn prompt() -> Box<dyn Prompt> {
    if EnvPrompt::available() {
        Box::new(EnvPrompt)
    } else {
        Box::new(TerminalPrompt)
    }
}

fn unlock_master(vault: &KeyVault, name: &str, recovery: bool) -> Result<MasterKey> {
    let prompt = prompt();
    let spinner = make_spinner("unlock");
    let master = if recovery {
        let phrase = prompt.recovery_phrase()?;
        spinner.set_message("checking recovery phrase...");
        vault.recover(&phrase)?
    } else {
        let password = prompt.password(&format!("Password for '{name}': "))?;
        spinner.set_message("deriving key (Argon2id)...");
        vault.unlock(&password)?
    };
    spinner.finish_and_clear();
    Ok(master)
}

/// A loaded profile, its unlocked keys, and its remote store.
struct OpenVault {
    profile: Profile,
    keys: Arc<UnlockedVault>,
    store: Store,
}

fn open_vault(config: &TbkConfig, state_dir: &Path, name: &str, recovery: bool) -> Result<OpenVault> {
    let profile = ProfileStore::new(state_dir).load(name)?;
    let vault = KeyVault::new(profile.keys.clone());
    let master = unlock_master(&vault, name, recovery)?;
    let keys = UnlockedVault::open(&vault, master)
        .with_context(|| format!("unlocking profile '{name}'"))?;
    let store = open_remote(config, state_dir, &profile, &keys)?;
    Ok(OpenVault {
        profile,
        keys: Arc::new(keys),
        store,
    })
}

fn open_remote(
    config: &TbkConfig,
    state_dir: &Path,
    profile: &Profile,
    keys: &UnlockedVault,
) -> Result<Store> {
    let secret = match profile.remote.access_key_id {
        Some(_) => tbk_secrets::open_store(profile.secret_backend, &profile.name, state_dir, keys.master())?
            .get(names::S3_SECRET_ACCESS_KEY)
            .context("reading S3 secret from secret store")?,
        None => None,
    };
    tbk_storage::connect(&profile.remote, &config.storage, secret.as_ref())
        .context("building storage operator")
}

fn audit_hooks(state_dir: &Path) -> HookSet {
    let mut hooks = HookSet::new();
    hooks.register(Arc::new(AuditLog::new(state_dir)));
    hooks
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Drives `pb` from engine progress; switches from spinner to bar once a
/// total is known.
fn progress_fn(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Arc::new(move |done, total, msg| {
        if total > 0 && pb.length() != Some(total) {
            pb.set_style(bar_style());
            pb.set_length(total);
        }
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `tbk init` ────────────────────────────────────────────────────────────────

fn cmd_init(config: &TbkConfig, state_dir: &Path, args: &InitArgs) -> Result<()> {
    validate_name(&args.name)?;
    let profiles = ProfileStore::new(state_dir);
    if profiles.exists(&args.name) {
        anyhow::bail!("profile '{}' already exists", args.name);
    }

    let source_dir = std::fs::canonicalize(&args.source)
        .with_context(|| format!("resolving source directory: {}", args.source.display()))?;
    if !source_dir.is_dir() {
        anyhow::bail!("not a directory: {}", source_dir.display());
    }

    let remote = RemoteConfig {
        backend: args.backend.into(),
        endpoint: args.endpoint.clone(),
        region: args.region.clone(),
        bucket: args.bucket.clone(),
        root: args.root.clone(),
        prefix: args.prefix.clone().unwrap_or_else(|| args.name.clone()),
        access_key_id: args.access_key_id.clone(),
    };
    // Reject a bad remote before asking for a password
    build_operator(&remote, &config.storage, None).context("checking remote configuration")?;

    let password = prompt().new_password()?;
    let spinner = make_spinner("init");
    spinner.set_message("deriving keys (Argon2id)...");
    let init = KeyVault::initialize(&password, &config.kdf, &config.password)?;
    spinner.finish_and_clear();

    let secret_backend = tbk_secrets::select_backend(&args.name);
    if remote.access_key_id.is_some() {
        let secret = match std::env::var("AWS_SECRET_ACCESS_KEY") {
            Ok(s) => SecretString::from(s),
            Err(_) => TerminalPrompt.password("S3 secret access key: ")?,
        };
        tbk_secrets::open_store(secret_backend, &args.name, state_dir, &init.master)?
            .put(names::S3_SECRET_ACCESS_KEY, &secret)
            .context("storing S3 secret")?;
    }

    let profile = Profile {
        name: args.name.clone(),
        source_dir,
        remote,
        exclude_patterns: args.exclude.clone(),
        created_at: unix_now(),
        secret_backend,
        keys: init.vault.keys().clone(),
    };
    profiles.save(&profile)?;
    info!(profile = %profile.name, backend = ?profile.remote.backend, "profile created");

    println!("Profile '{}' created.", profile.name);
    println!("  source:   {}", profile.source_dir.display());
    println!("  remote:   {:?} (prefix: {})", profile.remote.backend, profile.remote.prefix);
    println!("  secrets:  {:?}", profile.secret_backend);
    println!("  signing:  {}", profile.keys.public_key);
    println!();
    print_phrase(&init.phrase);
    Ok(())
}

fn print_phrase(phrase: &SecretString) {
    println!("RECOVERY PHRASE (shown once; write it down and keep it offline):");
    println!();
    for (i, word) in phrase.expose_secret().split_whitespace().enumerate() {
        print!("{:>2}. {word:<12}", i + 1);
        if (i + 1) % 4 == 0 {
            println!();
        }
    }
    println!();
    println!("If you lose both the password and this phrase, the snapshots cannot be decrypted.");
}

// ── `tbk snapshot` ────────────────────────────────────────────────────────────

async fn cmd_snapshot(config: &TbkConfig, state_dir: &Path, name: &str) -> Result<()> {
    let vault = open_vault(config, state_dir, name, false)?;
    let source = vault.profile.source_dir.clone();

    let pb = make_spinner("snapshot");
    pb.set_message("starting...");
    let engine = SnapshotEngine::new(&vault.profile, vault.store, vault.keys, state_dir)
        .with_engine_config(config.engine.clone())
        .with_hooks(audit_hooks(state_dir))
        .with_progress(progress_fn(&pb));

    let outcome = engine
        .snapshot()
        .await
        .with_context(|| format!("snapshot of {}", source.display()))?;
    pb.finish_and_clear();

    match outcome {
        SnapshotOutcome::NoChanges { latest } => {
            println!("No changes since {latest}; nothing uploaded.");
        }
        SnapshotOutcome::Committed(report) => {
            println!("Snapshot {} committed:", report.snapshot_id);
            println!("  files:     {} ({})", report.files, fmt_bytes(report.total_bytes));
            println!(
                "  changes:   +{} ~{} -{}",
                report.diff.added.len(),
                report.diff.modified.len(),
                report.diff.removed.len()
            );
            println!(
                "  chunks:    {} uploaded, {} reused",
                report.chunks_uploaded, report.chunks_reused
            );
            if report.chunks_repaired > 0 {
                println!("  repaired:  {} chunks missing from the remote", report.chunks_repaired);
            }
            println!("  uploaded:  {}", fmt_bytes(report.bytes_uploaded));
            println!("  manifest:  {}", &report.manifest_hash[..16]);
            println!("  took:      {:.1}s", report.duration.as_secs_f64());
            for skip in &report.skipped {
                println!("  skipped:   {} ({})", skip.path, skip.reason);
            }
        }
    }
    Ok(())
}

// ── `tbk restore` ─────────────────────────────────────────────────────────────

async fn cmd_restore(
    config: &TbkConfig,
    state_dir: &Path,
    name: &str,
    snapshot: Option<String>,
    target: &Path,
    options: RestoreOptions,
    recovery: bool,
) -> Result<()> {
    let vault = open_vault(config, state_dir, name, recovery)?;
    let restorer = RestoreEngine::new(&vault.profile, vault.store, vault.keys)
        .with_engine_config(config.engine.clone())
        .with_hooks(audit_hooks(state_dir));
    let snapshot_id = resolve_snapshot(&restorer, name, snapshot).await?;

    println!("Restoring {snapshot_id} → {}", target.display());
    let pb = make_spinner("restore");
    pb.set_message("verifying manifest...");
    let restorer = restorer.with_progress(progress_fn(&pb));
    let report = restorer
        .restore(&snapshot_id, target, options)
        .await
        .with_context(|| format!("restoring {snapshot_id}"))?;
    pb.finish_and_clear();

    println!(
        "  restored:  {} files ({})",
        report.restored.len(),
        fmt_bytes(report.bytes_written)
    );
    for failed in &report.failed {
        eprintln!("  FAILED     {}: {}", failed.path, failed.error);
    }
    if !report.is_complete() {
        anyhow::bail!(
            "{} of {} files could not be restored",
            report.failed.len(),
            report.failed.len() + report.restored.len()
        );
    }
    Ok(())
}

/// The given id, or the latest snapshot of the profile.
async fn resolve_snapshot(
    restorer: &RestoreEngine<Store>,
    name: &str,
    snapshot: Option<String>,
) -> Result<String> {
    if let Some(id) = snapshot {
        return Ok(id);
    }
    restorer
        .catalog()
        .list_ids()
        .await?
        .pop()
        .with_context(|| format!("profile '{name}' has no snapshots yet"))
}

// ── `tbk list` ────────────────────────────────────────────────────────────────

async fn cmd_list(config: &TbkConfig, state_dir: &Path, name: &str) -> Result<()> {
    let vault = open_vault(config, state_dir, name, false)?;
    let engine = SnapshotEngine::new(&vault.profile, vault.store, vault.keys, state_dir);
    let snapshots = engine.list().await?;

    if snapshots.is_empty() {
        println!("No snapshots for '{name}'.");
        return Ok(());
    }
    println!("{:<24} {:>8} {:>10}  {}", "SNAPSHOT", "FILES", "SIZE", "PREVIOUS");
    for s in &snapshots {
        let previous = s
            .previous_manifest_hash
            .as_deref()
            .map(|h| &h[..16.min(h.len())])
            .unwrap_or("-");
        println!(
            "{:<24} {:>8} {:>10}  {previous}",
            s.snapshot_id,
            s.files,
            fmt_bytes(s.total_bytes)
        );
    }
    Ok(())
}

// ── `tbk diff` ────────────────────────────────────────────────────────────────

async fn cmd_diff(
    config: &TbkConfig,
    state_dir: &Path,
    name: &str,
    snapshot: Option<String>,
    local: Option<&Path>,
) -> Result<()> {
    let vault = open_vault(config, state_dir, name, false)?;
    let local_dir = local
        .map(Path::to_path_buf)
        .unwrap_or_else(|| vault.profile.source_dir.clone());
    let restorer = RestoreEngine::new(&vault.profile, vault.store, vault.keys)
        .with_engine_config(config.engine.clone());
    let snapshot_id = resolve_snapshot(&restorer, name, snapshot).await?;

    let diff = restorer
        .diff(&snapshot_id, &local_dir)
        .await
        .with_context(|| format!("comparing {snapshot_id} with {}", local_dir.display()))?;

    println!("{snapshot_id} → {}", local_dir.display());
    if diff.is_empty() {
        println!("  no differences");
        return Ok(());
    }
    for path in &diff.added {
        println!("  + {path}");
    }
    for path in &diff.modified {
        println!("  ~ {path}");
    }
    for path in &diff.removed {
        println!("  - {path}");
    }
    println!("  {} to upload on next snapshot", fmt_bytes(diff.bytes_to_upload));
    Ok(())
}

// ── `tbk delete-snapshot` ─────────────────────────────────────────────────────

async fn cmd_delete_snapshot(
    config: &TbkConfig,
    state_dir: &Path,
    name: &str,
    snapshot_id: &str,
) -> Result<()> {
    let vault = open_vault(config, state_dir, name, false)?;
    let engine = SnapshotEngine::new(&vault.profile, vault.store, vault.keys, state_dir);
    engine.delete_snapshot(snapshot_id).await?;

    if let Err(e) = AuditLog::new(state_dir).record(name, "snapshot_deleted", Some(snapshot_id), Default::default()) {
        tracing::warn!(error = %e, "could not write audit record");
    }
    println!("Deleted snapshot {snapshot_id}.");
    Ok(())
}

// ── `tbk delete` ──────────────────────────────────────────────────────────────

fn cmd_delete(state_dir: &Path, name: &str) -> Result<()> {
    let profiles = ProfileStore::new(state_dir);
    let profile = profiles.load(name)?;

    // Only the vault owner may remove its credentials
    let vault = KeyVault::new(profile.keys.clone());
    let master = unlock_master(&vault, name, false)?;
    let keys = UnlockedVault::open(&vault, master)
        .with_context(|| format!("unlocking profile '{name}'"))?;

    if profile.remote.access_key_id.is_some() {
        tbk_secrets::open_store(profile.secret_backend, name, state_dir, keys.master())?
            .delete(names::S3_SECRET_ACCESS_KEY)
            .context("removing S3 secret")?;
    }
    profiles.delete(name)?;

    if let Err(e) = AuditLog::new(state_dir).record(name, "profile_deleted", None, Default::default()) {
        tracing::warn!(error = %e, "could not write audit record");
    }
    println!("Profile '{name}' deleted.");
    println!(
        "Remote data under prefix '{}' was left in place.",
        profile.remote.prefix
    );
    Ok(())
}

// ── `tbk profiles` ────────────────────────────────────────────────────────────

fn cmd_profiles(state_dir: &Path) -> Result<()> {
    let profiles = ProfileStore::new(state_dir);
    let names = profiles.list()?;
    if names.is_empty() {
        println!("No profiles. Create one with `tbk init <name> --source <dir>`.");
        return Ok(());
    }
    for name in names {
        match profiles.load(&name) {
            Ok(p) => println!(
                "{:<20} {:?}:{:<20} {}",
                p.name,
                p.remote.backend,
                p.remote.prefix,
                p.source_dir.display()
            ),
            Err(e) => println!("{name:<20} (unreadable: {e})"),
        }
    }
    Ok(())
}

// ── `tbk rotate-recovery` ─────────────────────────────────────────────────────

fn cmd_rotate_recovery(state_dir: &Path, name: &str, recovery: bool) -> Result<()> {
    let profiles = ProfileStore::new(state_dir);
    let mut profile = profiles.load(name)?;
    let mut vault = KeyVault::new(profile.keys.clone());
    let master = unlock_master(&vault, name, recovery)?;

    let phrase = vault
        .rotate_recovery(&master)
        .with_context(|| format!("rotating recovery phrase of '{name}'"))?;
    profile.keys = vault.keys().clone();
    profiles.save(&profile)?;

    if let Err(e) = AuditLog::new(state_dir).record(name, "recovery_rotated", None, Default::default()) {
        tracing::warn!(error = %e, "could not write audit record");
    }
    println!("Recovery phrase for '{name}' rotated. The previous phrase no longer works.");
    println!();
    print_phrase(&phrase);
    Ok(())
}

// ── `tbk audit` ───────────────────────────────────────────────────────────────

fn cmd_audit(state_dir: &Path, last: usize) -> Result<()> {
    let log = AuditLog::new(state_dir);
    let records = log.read_last(last)?;
    if records.is_empty() {
        println!("No audit events in {}.", log.path().display());
        return Ok(());
    }
    for r in records {
        println!(
            "{:>10}  {:<12} {:<20} {:<24} {}",
            r.ts,
            r.profile,
            r.event,
            r.snapshot_id.as_deref().unwrap_or("-"),
            if r.details.is_null() {
                String::new()
            } else {
                r.details.to_string()
            }
        );
    }
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
