//! hydrascope: command-line clients for the hydrascope relay.
//!
//! ## Subcommands
//!
//! - `probe`: page probe driven by JSON host signals on stdin
//! - `panel`: subscribes to a tab and prints one JSON line per status update
//! - `diff`: offline comparison of a server-rendered and a hydrated document
//! - `errors`: inspect and prune persisted mismatch records

mod diff;
mod errors;
mod logging;
mod panel;
mod probe;

use clap::{Parser, Subcommand};
use hydrascope_relay_protocol::TabId;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hydrascope")]
#[command(about = "Hydration mismatch inspector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a page probe for one tab (reads host signals from stdin)
    Probe {
        /// Tab the probe reports for
        #[arg(long = "tab")]
        tab_id: TabId,

        /// Upper bound on waiting for a terminal status after stdin closes
        #[arg(long, default_value_t = 6000)]
        linger_ms: u64,
    },

    /// Watch one tab and print its status updates as JSON lines
    Panel {
        /// Tab to watch
        #[arg(long = "tab")]
        tab_id: TabId,

        /// Exit after the first terminal status
        #[arg(long)]
        exit_on_complete: bool,
    },

    /// Compare a server-rendered document with its hydrated counterpart
    Diff {
        /// Server-rendered HTML file
        #[arg(value_name = "INITIAL")]
        initial: PathBuf,

        /// Post-hydration HTML file
        #[arg(value_name = "HYDRATED")]
        hydrated: PathBuf,

        /// Mount element id (defaults to the configured one)
        #[arg(long)]
        mount_id: Option<String>,
    },

    /// Manage persisted hydration errors
    Errors {
        /// Origin (or any URL on it) whose errors to manage
        #[arg(long)]
        origin: String,

        #[command(subcommand)]
        command: errors::ErrorsCommand,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe { tab_id, linger_ms } => {
            if let Err(e) = probe::run(tab_id, Duration::from_millis(linger_ms)) {
                tracing::error!(error = %e, "hydrascope probe failed");
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        Commands::Panel {
            tab_id,
            exit_on_complete,
        } => {
            if let Err(e) = panel::run(tab_id, exit_on_complete) {
                tracing::error!(error = %e, "hydrascope panel failed");
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        Commands::Diff {
            initial,
            hydrated,
            mount_id,
        } => match diff::run(&initial, &hydrated, mount_id) {
            Ok(outcome) => std::process::exit(outcome.exit_code()),
            Err(e) => {
                tracing::error!(error = %e, "hydrascope diff failed");
                eprintln!("{}", e);
                std::process::exit(2);
            }
        },
        Commands::Errors { origin, command } => {
            if let Err(e) = errors::run(&origin, command) {
                tracing::error!(error = %e, "hydrascope errors failed");
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    }
}
