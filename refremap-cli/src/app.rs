use std::path::PathBuf;

use clap::Parser;
use refremap::remap::{RemapOptions, RemapRequest};

/// refremap - redirect references to merged .NET assemblies onto the merged module
#[derive(Debug, Parser)]
#[command(name = "refremap", version, about, long_about = None)]
pub struct Cli {
    /// Path to the module whose references are redirected.
    #[arg(value_name = "ASSEMBLY")]
    pub assembly: Option<PathBuf>,

    /// Short name of a source assembly. Repeat or separate with commas for several.
    #[arg(short, long = "source", value_name = "NAME", value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Path to the module that now holds the source assemblies' types.
    #[arg(short, long, value_name = "PATH")]
    pub target: Option<PathBuf>,

    /// Where the rewritten module is written. Missing directories are created.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Resolve every imported reference against the target immediately.
    #[arg(long)]
    pub resolve: bool,

    /// Print a JSON run summary instead of log output.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Check the arguments in order and build the request.
    ///
    /// Returns the message to report for the first missing argument or input file.
    pub fn request(&self) -> Result<RemapRequest, &'static str> {
        let input = self.assembly.clone().ok_or("No assembly specified.")?;
        if self.sources.iter().all(|name| name.trim().is_empty()) {
            return Err("No source assembly names specified.");
        }
        let target = self.target.clone().ok_or("No target assembly specified.")?;
        let output = self.output.clone().ok_or("No output path specified.")?;

        if !input.is_file() {
            return Err("Input assembly not found.");
        }
        if !target.is_file() {
            return Err("Target assembly not found.");
        }

        Ok(RemapRequest {
            input,
            sources: self
                .sources
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            target,
            output,
            options: RemapOptions {
                eager_resolve: self.resolve,
            },
        })
    }
}
