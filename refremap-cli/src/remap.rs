use anyhow::Context;
use refremap::remap::{remap_file, RemapRequest, RemapStatus};
use serde::Serialize;

use crate::output::print_output;

#[derive(Debug, Serialize)]
pub struct RemapSummary {
    pub input: String,
    pub target: String,
    pub output: String,
    pub sources: Vec<String>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remaining: Vec<String>,
}

/// Run one remap. Returns true if the output no longer references any source assembly.
pub fn run(request: &RemapRequest, json: bool) -> anyhow::Result<bool> {
    let status = remap_file(request)
        .with_context(|| format!("failed to remap {}", request.input.display()))?;

    let remaining = match status {
        RemapStatus::Complete => Vec::new(),
        RemapStatus::Incomplete(names) => names,
    };
    let summary = RemapSummary {
        input: request.input.display().to_string(),
        target: request.target.display().to_string(),
        output: request.output.display().to_string(),
        sources: request.sources.clone(),
        complete: remaining.is_empty(),
        remaining,
    };

    print_output(&summary, json, |s| {
        if s.complete {
            println!("Wrote {}", s.output);
        } else {
            println!("Wrote {} (still references {})", s.output, s.remaining.join(", "));
        }
    })?;

    Ok(summary.complete)
}
