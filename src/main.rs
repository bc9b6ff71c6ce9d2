//! `site-bootstrap` — provisions the site's remote singletons and `.env`.
//!
//! # Usage
//!
//! ```text
//! site-bootstrap [--config <path>] [--snapshot <path>] [--log-level <level>] [all|vapid|settings]
//!
//! Targets:
//!   all        VAPID keys, then the settings row (default)
//!   vapid      VAPID keypair only
//!   settings   initial settings row only
//!
//! Flags:
//!   --config, -c <path>     config file (default: config/default.toml)
//!   --snapshot, -o <path>   snapshot file (default: .env)
//!   --log-level, -l <lvl>   log level; overrides RUST_LOG and config
//!   --help, -h              print this help
//! ```
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger (`--log-level`, else `RUST_LOG`, else configured level)
//!   4. Run the bootstrap (credentials are checked before the store exists)
//!
//! Exit status: 0 on success, 1 on any bootstrap failure, 2 on usage errors.

use std::{env, path::PathBuf, process};

use site_bootstrap::{
    app::{self, Target},
    config,
    error::AppError,
    logger::{self, LevelSource},
    store::postgrest::PostgrestStore,
};

struct Args {
    config: Option<PathBuf>,
    snapshot: Option<String>,
    log_level: Option<String>,
    target: Target,
}

fn parse_args() -> Result<Args, String> {
    let mut config = None;
    let mut snapshot = None;
    let mut log_level = None;
    let mut target = None;
    let mut iter = env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(iter.next().ok_or("--config needs a path")?));
            }
            "--snapshot" | "-o" => {
                snapshot = Some(iter.next().ok_or("--snapshot needs a path")?);
            }
            "--log-level" | "-l" => {
                log_level = Some(iter.next().ok_or("--log-level needs a level")?);
            }
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            s if s.starts_with('-') => return Err(format!("unknown flag '{s}'")),
            s if target.is_none() => target = Some(s.parse::<Target>()?),
            s => return Err(format!("unexpected argument '{s}'")),
        }
    }

    Ok(Args { config, snapshot, log_level, target: target.unwrap_or_default() })
}

fn print_help() {
    eprintln!("usage: site-bootstrap [--config <path>] [--snapshot <path>] [--log-level <level>] [all|vapid|settings]");
    eprintln!();
    eprintln!("targets:");
    eprintln!("  all        VAPID keys, then the settings row (default)");
    eprintln!("  vapid      VAPID keypair only");
    eprintln!("  settings   initial settings row only");
    eprintln!();
    eprintln!("flags:");
    eprintln!("  --config,    -c <path>   config file (default: config/default.toml)");
    eprintln!("  --snapshot,  -o <path>   snapshot file (default: .env)");
    eprintln!("  --log-level, -l <level> error|warn|info|debug|trace (overrides RUST_LOG)");
    eprintln!("  --help,      -h         print this help");
    eprintln!();
    eprintln!("environment:");
    eprintln!("  {}, {} (required)", config::URL_VAR, config::ANON_KEY_VAR);
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("error: {msg}");
            print_help();
            process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "bootstrap failed");
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let mut config = match &args.config {
        Some(path) => config::load_from(
            path,
            env::var("SITE_BOOTSTRAP_LOG_LEVEL").ok().as_deref(),
            env::var("SITE_BOOTSTRAP_SNAPSHOT").ok().as_deref(),
        )?,
        None => config::load()?,
    };
    if let Some(snapshot) = &args.snapshot {
        config.snapshot_path = config::expand_home(snapshot);
    }

    match &args.log_level {
        Some(level) => logger::init(level, LevelSource::Flag)?,
        None => logger::init(&config.log_level, LevelSource::Config)?,
    }

    let timeout = config.remote_timeout;
    let outcome = app::run(
        &config,
        args.target,
        |name| env::var(name).ok(),
        |credentials| PostgrestStore::new(credentials, timeout).map_err(AppError::from),
    )
    .await?;

    if let Some(vapid) = &outcome.vapid {
        println!(
            "✓ VAPID keys {} (fingerprint {})",
            vapid.origin.as_str(),
            vapid.payload.fingerprint()
        );
    }
    if let Some(settings) = &outcome.settings {
        println!("✓ settings row {} (id {})", settings.origin.as_str(), settings.payload.id);
    }
    println!("✓ snapshot written to {}", outcome.snapshot_path.display());

    Ok(())
}
