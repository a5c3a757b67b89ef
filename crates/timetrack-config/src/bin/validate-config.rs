//! Config validation CLI tool
//!
//! Validates a timetrack configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use timetrack_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a timetrack configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match timetrack_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", timetrack_config::CURRENT_CONFIG_VERSION);
            println!("  Listen address: {}", settings.server.bind);
            println!("  Data directory: {}", settings.server.data_dir.display());
            println!("  User: {}", settings.auth.username);
            println!(
                "  Lock: wait {:?}, poll {:?}, stale after {:?}",
                settings.store.lock_wait,
                settings.store.lock_poll_interval,
                settings.store.lock_stale_after
            );
            println!(
                "  Sync: poll every {:?}, {} attempts, backoff {:?}..{:?}",
                settings.sync.poll_interval,
                settings.sync.max_attempts,
                settings.sync.backoff_base,
                settings.sync.backoff_cap
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                timetrack_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                timetrack_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                timetrack_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                timetrack_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        timetrack_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
