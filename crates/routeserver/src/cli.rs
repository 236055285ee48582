//! Exposes the command line application.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use routeserver_service::config::Config;
use routeserver_service::metrics;

use crate::logging;
use crate::server;

/// Routeserver commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web server.
    Run,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "routeserver", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded at this point, no runtime has been started yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags: BTreeMap<_, _> = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, hostname);
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure metrics")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli() {
        let cli = Cli::try_parse_from(["routeserver", "run", "-c", "local.yml"]).unwrap();
        assert_eq!(cli.config(), Some(Path::new("local.yml")));
        assert!(matches!(cli.command, Command::Run));

        let cli = Cli::try_parse_from(["routeserver", "run"]).unwrap();
        assert_eq!(cli.config(), None);

        assert!(Cli::try_parse_from(["routeserver"]).is_err());
    }
}
