//! `hydrascope errors`: persisted mismatch records for one origin.

use clap::Subcommand;
use hydrascope_core::panel::origin_of;
use hydrascope_core::{HydrationErrorStore, StorageConfig};

#[derive(Subcommand)]
pub enum ErrorsCommand {
    /// List summaries, newest last, one JSON object per line
    List,

    /// Print one full record
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Delete one record
    Remove {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Delete every record for the origin
    Clear,
}

pub fn run(origin: &str, command: ErrorsCommand) -> Result<(), String> {
    let storage = StorageConfig::from_home()?;
    let mut store = HydrationErrorStore::open(&storage);
    let origin = origin_of(origin).unwrap_or_else(|_| origin.to_string());
    store.init(&origin)?;

    match command {
        ErrorsCommand::List => {
            for summary in store.errors_list()? {
                let line = serde_json::to_string(&summary).map_err(|e| e.to_string())?;
                println!("{}", line);
            }
        }
        ErrorsCommand::Show { id } => {
            let record = store
                .error_detail(&id)?
                .ok_or_else(|| format!("No error {} for {}", id, origin))?;
            let json = serde_json::to_string_pretty(&record).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        ErrorsCommand::Remove { id } => {
            store.remove_error(&id)?;
            tracing::info!(origin = %origin, id = %id, "Removed hydration error");
        }
        ErrorsCommand::Clear => {
            let removed = store.clear_all_errors()?;
            println!("Removed {} errors", removed);
        }
    }
    Ok(())
}
