//! `hydrascope diff`: offline comparison of two saved documents.

use hydrascope_core::{
    hydration_diff, render_hydration_diff, HydrationComparison, IndentFormatter, StorageConfig,
};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Equal,
    Mismatch,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Equal => 0,
            Outcome::Mismatch => 1,
        }
    }
}

fn configured_mount_id() -> String {
    match StorageConfig::from_home().and_then(|storage| storage.load_config()) {
        Ok(config) => config.mount_id,
        Err(e) => {
            tracing::warn!(error = %e, "Using default mount id");
            hydrascope_core::DEFAULT_MOUNT_ID.to_string()
        }
    }
}

pub fn run(initial: &Path, hydrated: &Path, mount_id: Option<String>) -> Result<Outcome, String> {
    let initial_html = fs_err::read_to_string(initial).map_err(|e| e.to_string())?;
    let hydrated_html = fs_err::read_to_string(hydrated).map_err(|e| e.to_string())?;
    let mount_id = mount_id.unwrap_or_else(configured_mount_id);

    let comparison = hydration_diff(&initial_html, &hydrated_html, &mount_id)
        .ok_or_else(|| format!("Mount element #{} not found in both documents", mount_id))?;

    let (initial_root_html, hydrated_root_html) = match comparison {
        HydrationComparison::Equal => {
            println!("No hydration mismatch under #{}", mount_id);
            return Ok(Outcome::Equal);
        }
        HydrationComparison::Mismatch {
            initial_root_html,
            hydrated_root_html,
        } => (initial_root_html, hydrated_root_html),
    };

    let rendered = render_hydration_diff(
        &initial_root_html,
        &hydrated_root_html,
        &IndentFormatter::default(),
    )?;
    for segment in &rendered.line_diff {
        for line in segment.lines() {
            println!("{}{}", segment.kind.prefix(), line);
        }
    }
    Ok(Outcome::Mismatch)
}
