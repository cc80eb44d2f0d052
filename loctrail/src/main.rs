//! # loctrail
//!
//! A CLI for per-day lines-of-code history of a git branch, split by language
//! and by production vs test code.
//!
//! ## Overview
//!
//! loctrail is built on top of loctraillib. `analyze` walks a local repository
//! incrementally and writes the day-by-day result as JSON; it can resume from
//! an earlier result and exchange results with a shared cache service, which
//! `serve` runs.
//!
//! ## Usage
//!
//! ```bash
//! # Analyze the current repository
//! loctrail analyze .
//!
//! # Resume from a previous run and write the result to a file
//! loctrail analyze . --resume history.json --output history.json
//!
//! # Reuse and update a shared cache
//! loctrail analyze . --cache http://localhost:8080 --push --token "$TOKEN"
//!
//! # Run the cache service
//! loctrail serve --bind 0.0.0.0:8080 --data-dir /var/lib/loctrail
//!
//! # Where does a repository live in the cache?
//! loctrail key https://github.com/rust-lang/cargo
//!
//! # Check a stored entry
//! loctrail validate entry.json.gz
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use console::Style;
use loctraillib::codec::decode_json_limited;
use loctraillib::repo_url::{cache_key, normalize, object_path};
use loctraillib::{
    parse_entry, serve, spawn_analysis, validate_entry, validate_result, AnalysisOptions,
    AnalysisResult, AppState, CacheClient, CacheStore, FilterConfig, FsObjectStore, GitSource,
    HeadVerifier, KnownHeads, ObjectSource, ProgressEvent, RefDiscoveryVerifier, SharedCacheEntry,
    StoreConfig,
};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "loctrail=info,loctraillib=info";

/// Build the clap Command structure
fn build_command() -> Command {
    Command::new("loctrail")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Arthur Debert")
        .about("Per-day lines-of-code history for git repositories, with test/code separation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("analyze")
                .about("Compute the day-by-day history of a branch")
                .arg(
                    Arg::new("path")
                        .help("Repository to analyze (defaults to current directory)")
                        .default_value("."),
                )
                .arg(
                    Arg::new("branch")
                        .short('b')
                        .long("branch")
                        .help("Branch or revision to walk (defaults to HEAD)"),
                )
                .arg(
                    Arg::new("repo-url")
                        .long("repo-url")
                        .help("Canonical repository URL (defaults to the fetch remote)"),
                )
                .arg(
                    Arg::new("resume")
                        .long("resume")
                        .value_name("FILE")
                        .help("Continue from an earlier result (.json or .json.gz)"),
                )
                .arg(
                    Arg::new("cache")
                        .long("cache")
                        .value_name("URL")
                        .env("LOCTRAIL_CACHE_URL")
                        .help("Shared cache service to resume from"),
                )
                .arg(
                    Arg::new("push")
                        .long("push")
                        .action(ArgAction::SetTrue)
                        .requires("cache")
                        .help("Upload the result to the shared cache"),
                )
                .arg(
                    Arg::new("token")
                        .long("token")
                        .env("LOCTRAIL_WRITE_TOKEN")
                        .hide_env_values(true)
                        .help("Bearer token for cache writes"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Write the result here instead of stdout"),
                )
                .arg(
                    Arg::new("include")
                        .short('i')
                        .long("include")
                        .action(ArgAction::Append)
                        .help("Include files matching glob pattern"),
                )
                .arg(
                    Arg::new("exclude")
                        .short('e')
                        .long("exclude")
                        .action(ArgAction::Append)
                        .help("Exclude files matching glob pattern"),
                )
                .arg(
                    Arg::new("concurrency")
                        .short('j')
                        .long("concurrency")
                        .value_parser(value_parser!(usize))
                        .default_value("8")
                        .help("Blob reads in flight at once"),
                )
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .action(ArgAction::SetTrue)
                        .help("No progress output"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the shared cache service")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .env("LOCTRAIL_BIND")
                        .default_value("127.0.0.1:8080")
                        .help("Address to listen on"),
                )
                .arg(
                    Arg::new("data-dir")
                        .long("data-dir")
                        .env("LOCTRAIL_DATA_DIR")
                        .help("Directory holding stored entries; without it every request is 404"),
                )
                .arg(
                    Arg::new("write-token")
                        .long("write-token")
                        .env("LOCTRAIL_WRITE_TOKEN")
                        .hide_env_values(true)
                        .help("Require this bearer token on writes"),
                )
                .arg(
                    Arg::new("rate-limit")
                        .long("rate-limit")
                        .env("LOCTRAIL_RATE_LIMIT")
                        .value_parser(value_parser!(u32))
                        .default_value("10")
                        .help("Writes allowed per origin per window"),
                )
                .arg(
                    Arg::new("rate-window-secs")
                        .long("rate-window-secs")
                        .env("LOCTRAIL_RATE_WINDOW_SECS")
                        .value_parser(value_parser!(u64))
                        .default_value("60")
                        .help("Length of the rate limit window"),
                )
                .arg(
                    Arg::new("upstream-proxy")
                        .long("upstream-proxy")
                        .env("LOCTRAIL_UPSTREAM_PROXY")
                        .help("Base URL of the forwarding layer for freshness checks"),
                )
                .arg(
                    Arg::new("trust-forwarded-for")
                        .long("trust-forwarded-for")
                        .env("LOCTRAIL_TRUST_FORWARDED_FOR")
                        .action(ArgAction::SetTrue)
                        .help("Rate-limit by the first X-Forwarded-For hop"),
                )
                .arg(
                    Arg::new("known-head")
                        .long("known-head")
                        .action(ArgAction::Append)
                        .value_name("COMMIT")
                        .help("Accept only these head commits instead of asking the upstream host"),
                ),
        )
        .subcommand(
            Command::new("key")
                .about("Print the cache key and object address of a repository")
                .arg(Arg::new("repo-url").required(true).help("Repository URL")),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a stored cache entry")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .help("Entry to check (.json or .json.gz)"),
                ),
        )
}

/// Build filter config from matches
fn build_filter(matches: &ArgMatches) -> anyhow::Result<FilterConfig> {
    let mut filter = FilterConfig::new();

    if let Some(includes) = matches.get_many::<String>("include") {
        for pattern in includes {
            filter = filter.include(pattern)?;
        }
    }

    if let Some(excludes) = matches.get_many::<String>("exclude") {
        for pattern in excludes {
            filter = filter.exclude(pattern)?;
        }
    }

    Ok(filter)
}

/// Parse an entry or bare result file into JSON, inflating gzip input.
fn read_json(path: &str) -> anyhow::Result<serde_json::Value> {
    let limits = StoreConfig::default();
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path))?;
    if data.starts_with(&[0x1f, 0x8b]) {
        return Ok(decode_json_limited(&data, limits.max_decompressed_bytes)?);
    }
    serde_json::from_slice(&data).with_context(|| format!("{} is not valid JSON", path))
}

/// A prior result from `--resume`: either a cache entry or a bare result.
fn load_prior(path: &str) -> anyhow::Result<AnalysisResult> {
    let value = read_json(path)?;
    let max_days = StoreConfig::default().max_days;
    if value.get("version").is_some() {
        let entry = parse_entry(value, max_days)?;
        return Ok(entry.result);
    }
    validate_result(&value, max_days)
        .with_context(|| format!("{} is not a valid analysis result", path))?;
    serde_json::from_value(value).with_context(|| format!("{} is not an analysis result", path))
}

fn short(commit: &str) -> &str {
    commit.get(..10).unwrap_or(commit)
}

fn render_event(event: &ProgressEvent, quiet: bool) {
    let dim = Style::new().dim();
    let warn = Style::new().yellow().bold();
    match event {
        ProgressEvent::Warning(message) => eprintln!("{} {}", warn.apply_to("warning:"), message),
        _ if quiet => {}
        ProgressEvent::History { commits } => {
            eprintln!("{}", dim.apply_to(format!("{} commits in history", commits)))
        }
        ProgressEvent::Resumed { from, pending } => eprintln!(
            "{}",
            dim.apply_to(format!(
                "resuming at {}, {} new commits",
                short(from),
                pending
            ))
        ),
        ProgressEvent::Processing { done, total } if done == total || done % 500 == 0 => {
            eprintln!("{}", dim.apply_to(format!("{}/{} commits", done, total)))
        }
        _ => {}
    }
}

async fn analyze_handler(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let path = matches
        .get_one::<String>("path")
        .map(|s| s.as_str())
        .unwrap_or(".");
    let quiet = matches.get_flag("quiet");
    let concurrency = matches.get_one::<usize>("concurrency").copied().unwrap_or(8);

    let source = GitSource::discover(path)?;

    let mut options = AnalysisOptions::new()
        .fetch_concurrency(concurrency)
        .filter(build_filter(matches)?);
    if let Some(branch) = matches.get_one::<String>("branch") {
        options = options.branch(branch);
    }
    let repo_url = matches
        .get_one::<String>("repo-url")
        .cloned()
        .or_else(|| source.remote_url());
    if let Some(url) = &repo_url {
        options = options.repo_url(normalize(url).unwrap_or_else(|_| url.clone()));
    }

    let client = match matches.get_one::<String>("cache") {
        Some(base) => {
            let mut client = CacheClient::new(base)?;
            if let Some(token) = matches.get_one::<String>("token") {
                client = client.token(token);
            }
            Some(client)
        }
        None => None,
    };

    if let Some(file) = matches.get_one::<String>("resume") {
        options = options.resume_from(load_prior(file)?);
    } else if let (Some(client), Some(url)) = (&client, &repo_url) {
        match client.fetch(url).await {
            Ok(Some(entry)) => {
                tracing::info!(head = %entry.head_commit, "resuming from shared cache");
                options = options.resume_from(entry.result);
            }
            Ok(None) => tracing::info!("no shared cache entry yet"),
            Err(e) => tracing::warn!(error = %e, "shared cache unavailable, starting cold"),
        }
    }

    let mut handle = spawn_analysis(source, options)?;
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(event) = handle.events.recv().await {
        render_event(&event, quiet);
        if event.is_terminal() {
            break;
        }
    }
    let result = tokio::task::spawn_blocking(move || handle.join()).await??;

    let json = serde_json::to_string_pretty(&result)?;
    match matches.get_one::<String>("output") {
        Some(file) => {
            std::fs::write(file, json + "\n").with_context(|| format!("failed to write {}", file))?
        }
        None => println!("{}", json),
    }

    if !quiet {
        let languages: Vec<String> = result
            .detected_languages
            .iter()
            .map(|l| l.to_string())
            .collect();
        eprintln!(
            "{} {} days through {} ({})",
            Style::new().green().bold().apply_to("done:"),
            result.days.len(),
            short(&result.head_commit),
            languages.join(", ")
        );
    }

    if matches.get_flag("push") {
        let Some(client) = &client else {
            bail!("--push needs --cache");
        };
        if result.repo_url.is_empty() {
            bail!("--push needs a repository URL; pass --repo-url or add a remote");
        }
        client
            .push(&SharedCacheEntry::new(result))
            .await
            .context("failed to push result")?;
    }

    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(?err, "failed to listen for CTRL+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => tracing::warn!(?err, "failed to listen for TERM signal"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

async fn serve_handler(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let bind = matches
        .get_one::<String>("bind")
        .map(|s| s.as_str())
        .unwrap_or("127.0.0.1:8080");
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", bind))?;

    let defaults = StoreConfig::default();
    let config = StoreConfig {
        write_token: matches.get_one::<String>("write-token").cloned(),
        rate_limit: matches
            .get_one::<u32>("rate-limit")
            .copied()
            .unwrap_or(defaults.rate_limit),
        rate_window: matches
            .get_one::<u64>("rate-window-secs")
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or(defaults.rate_window),
        trust_forwarded_for: matches.get_flag("trust-forwarded-for"),
        upstream_proxy: matches.get_one::<String>("upstream-proxy").cloned(),
        ..defaults
    };

    let store = match matches.get_one::<String>("data-dir") {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir))?;
            Some(CacheStore::new(
                Arc::new(FsObjectStore::new(dir)),
                config.edge_ttl,
            ))
        }
        None => {
            tracing::warn!("no data directory configured; every request will be 404");
            None
        }
    };

    let verifier: Arc<dyn HeadVerifier> = match matches.get_many::<String>("known-head") {
        Some(heads) => Arc::new(KnownHeads::new(heads.cloned())),
        None => Arc::new(RefDiscoveryVerifier::new(
            config.freshness_timeout,
            config.upstream_proxy.clone(),
        )?),
    };

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("failed to bind TCP listener")?;
    tracing::info!(%bind_addr, "cache service starting");

    serve(listener, AppState::new(config, store, verifier), shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(ExitCode::SUCCESS)
}

fn key_handler(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let url = matches
        .get_one::<String>("repo-url")
        .map(|s| s.as_str())
        .unwrap_or_default();
    let key = cache_key(url)?;
    println!("{}", normalize(url)?);
    println!("{}", key);
    println!("{}", object_path(&key));
    Ok(ExitCode::SUCCESS)
}

fn validate_handler(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let file = matches
        .get_one::<String>("file")
        .map(|s| s.as_str())
        .unwrap_or_default();
    let value = read_json(file)?;

    if let Err(e) = validate_entry(&value, StoreConfig::default().max_days) {
        eprintln!("{} {}", Style::new().red().bold().apply_to("invalid:"), e);
        return Ok(ExitCode::FAILURE);
    }

    let entry = parse_entry(value, StoreConfig::default().max_days)?;
    println!(
        "{} {} at {} ({} days)",
        Style::new().green().bold().apply_to("valid:"),
        entry.repo_url,
        entry.head_commit,
        entry.result.days.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let matches = build_command().get_matches();

    let outcome = match matches.subcommand() {
        Some(("analyze", sub)) => analyze_handler(sub).await,
        Some(("serve", sub)) => serve_handler(sub).await,
        Some(("key", sub)) => key_handler(sub),
        Some(("validate", sub)) => validate_handler(sub),
        _ => Ok(ExitCode::FAILURE),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
