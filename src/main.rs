use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;

mod cli;
mod config;
mod error;
mod logging;
mod net;
mod policy;
mod progress;
mod report;
mod security;
mod transfer;

use cli::args::{Cli, Commands, HistoryArgs, KeyArgs, ListenArgs, SendArgs};
use config::types::Verbosity;
use config::AppConfig;
use error::ShareError;
use net::receiver::Listener;
use net::sender::{resolve_recipient, send_files};
use policy::{normalize_extensions, SharedPolicy, TransferPolicy};
use report::console::{run_console, HistorySink};
use report::history::HistoryStore;
use report::Reporter;
use security::crypto::SharedKey;

fn main() {
    let cli = Cli::parse();

    // Convert CLI flags to verbosity level
    let verbosity = Verbosity::from((cli.quiet, cli.verbose));

    // Logs live next to history; a missing data dir only disables the file log
    let log_dir = config::paths::data_dir().ok().map(|dir| dir.join("logs"));
    logging::init(verbosity, log_dir.as_deref());

    if let Err(err) = run(cli) {
        tracing::debug!(kind = err.kind(), "Command failed");
        display_error(&err);
        std::process::exit(1);
    }
}

/// Execute the dispatched command.
fn run(cli: Cli) -> Result<(), ShareError> {
    let quiet = cli.quiet;
    match cli.command {
        Commands::Listen(args) => listen(args, quiet),
        Commands::Send(args) => send(args, quiet),
        Commands::History(args) => history(args),
        Commands::Keygen => {
            println!("{}", SharedKey::generate().to_base64());
            Ok(())
        }
        Commands::Completions(args) => {
            clap_complete::generate(
                args.shell,
                &mut Cli::command(),
                "fileshare",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

/// CLI key flags win over the `key` entry in config.toml.
fn resolve_key(args: &KeyArgs, config: &AppConfig) -> Result<Option<SharedKey>, ShareError> {
    if let Some(passphrase) = &args.passphrase {
        return SharedKey::from_passphrase(passphrase).map(Some);
    }
    match args.key.as_deref().or(config.key.as_deref()) {
        Some(encoded) => SharedKey::from_base64(encoded).map(Some),
        None => Ok(None),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, ShareError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ShareError::Config(format!("Failed to create async runtime: {}", e)))
}

/// Cancel `token` on the first Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            token.cancel();
        }
    });
}

fn listen(args: ListenArgs, quiet: bool) -> Result<(), ShareError> {
    let config = AppConfig::load(&config::paths::config_dir()?)?;
    let data_dir = config::paths::data_dir()?;

    let mut policy = TransferPolicy::from_config(&config, resolve_key(&args.key, &config)?);
    if let Some(dir) = args.download_dir {
        policy.download_dir = dir;
    }
    if !args.allow.is_empty() {
        policy.allowed_extensions = normalize_extensions(&args.allow);
    }
    policy.require_encryption |= args.require_encryption;
    if let Some(strategy) = args.on_conflict {
        policy.on_conflict = strategy;
    }
    if policy.require_encryption && policy.key.is_none() {
        return Err(ShareError::Config(
            "Requiring encryption needs a key (--key, --passphrase or `key` in config.toml)".into(),
        ));
    }

    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);
    let drain_timeout = config.drain_timeout();
    let sink = HistorySink {
        data_dir,
        limit: config.history_limit,
    };

    runtime()?.block_on(async move {
        let listener = Listener::bind(&host, port)
            .await?
            .with_drain_timeout(drain_timeout);
        let (reporter, events) = Reporter::channel();
        let console = tokio::spawn(run_console(events, Some(sink), quiet));

        reporter.status(format!(
            "Listening on {} (saving to {}, encryption {})",
            listener.local_addr(),
            policy.download_dir.display(),
            if policy.key.is_some() { "available" } else { "off" },
        ));
        let reachable = listener.reachable_addresses();
        if reachable.is_empty() {
            tracing::warn!("No network interface address found; peers need this host's IP");
        } else {
            let ips: Vec<String> = reachable.iter().map(|ip| ip.to_string()).collect();
            tracing::info!(addresses = %ips.join(", "), "Reachable addresses");
            reporter.status(format!(
                "Your IP Address: {} (port {})",
                ips.join(", "),
                listener.local_addr().port()
            ));
        }

        let shutdown = CancellationToken::new();
        cancel_on_ctrl_c(shutdown.clone());
        let result = listener
            .run(Arc::new(SharedPolicy::new(policy)), reporter, shutdown)
            .await;

        if let Err(e) = console.await {
            tracing::warn!("Console task failed: {}", e);
        }
        result
    })
}

fn send(args: SendArgs, quiet: bool) -> Result<(), ShareError> {
    let config = AppConfig::load(&config::paths::config_dir()?)?;
    let data_dir = config::paths::data_dir()?;
    let addr = resolve_recipient(&args.recipient)?;

    let mut policy = TransferPolicy::from_config(&config, resolve_key(&args.key, &config)?);
    if args.no_encrypt {
        policy.encrypt = false;
    }
    if !args.allow.is_empty() {
        policy.allowed_extensions = normalize_extensions(&args.allow);
    }
    if policy.encrypt && policy.key.is_none() {
        return Err(ShareError::Config(
            "Encryption is enabled but no key is configured. Pass --key or --passphrase, \
             set `key` in config.toml, or use --no-encrypt."
                .into(),
        ));
    }

    let sink = HistorySink {
        data_dir,
        limit: config.history_limit,
    };

    runtime()?.block_on(async move {
        let (reporter, events) = Reporter::channel();
        let console = tokio::spawn(run_console(events, Some(sink), quiet));

        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());

        tracing::info!(peer = %addr, files = args.files.len(), encrypted = policy.encrypt, "Sending");
        let summary = send_files(&addr, args.files, &policy, &reporter, cancel).await;
        reporter.status(summary.stats.batch_summary());
        drop(reporter);

        if let Err(e) = console.await {
            tracing::warn!("Console task failed: {}", e);
        }

        if summary.all_succeeded() {
            Ok(())
        } else {
            Err(ShareError::BatchFailed {
                failed: summary.stats.files_failed,
                total: summary.stats.files_total,
            })
        }
    })
}

fn history(args: HistoryArgs) -> Result<(), ShareError> {
    let config = AppConfig::load(&config::paths::config_dir()?)?;
    let mut store = HistoryStore::load(&config::paths::data_dir()?, config.history_limit)?;

    if args.clear {
        store.clear();
        store.save()?;
        eprintln!("Transfer history cleared.");
        return Ok(());
    }

    if store.list().is_empty() {
        println!("No transfer history.");
        return Ok(());
    }

    println!(
        "{:<19}  {:<7}  {:<32}  {:>10}  {}",
        "Date", "Type", "File", "Size", "Status"
    );
    for record in store.recent(args.count) {
        println!("{}", record.table_row());
    }
    Ok(())
}

/// Display a ShareError with optional suggestion hint to stderr.
fn display_error(err: &ShareError) {
    eprintln!("error: {}", err);
    if let Some(suggestion) = err.suggestion() {
        eprintln!("  hint: {}", suggestion);
    }
}
