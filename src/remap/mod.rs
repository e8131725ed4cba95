//! Reference remapping.
//!
//! A remap run redirects every reference a module holds into a set of *source*
//! assemblies so that it names the equivalent declaration of a *target* module. The
//! run is organized as a fixed sequence of passes over one shared [`RemapContext`]:
//!
//! | Pass | Applies to | Description |
//! |------|------------|-------------|
//! | [`RemapPass::References`] | every module | Rewrites type, member, generic instantiation and attribute references ([`references`]) |
//! | [`RemapPass::Markup`] | modules referencing WPF | Rewrites assembly names and pack paths in compiled markup ([`markup`]) |
//!
//! [`coordinator::remap_file`] drives a complete file-to-file run, including writing the
//! output and checking it for leftover source assembly references.
//!
//! # Examples
//!
//! ```rust
//! use refremap::{
//!     metadata::{
//!         identity::{AssemblyIdentity, AssemblyVersion},
//!         module::{ModuleDef, TypeDef},
//!     },
//!     remap::{RemapContext, RemapOptions},
//! };
//!
//! let mut target = ModuleDef::new("Merged.dll");
//! target.assembly = Some(AssemblyIdentity::new("Merged", AssemblyVersion::new(1, 0, 0, 0)));
//! target.add_type_def(TypeDef::new("SourceLib", "Widget"));
//!
//! let module = ModuleDef::new("App.dll");
//! let mut context = RemapContext::new(module, target, ["SourceLib", "Merged"], RemapOptions::default());
//! assert!(!context.sources.contains("Merged"));
//!
//! context.run()?;
//! # Ok::<(), refremap::Error>(())
//! ```

pub mod coordinator;
pub mod markup;
pub mod references;

use std::collections::BTreeSet;

use log::info;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{metadata::module::ModuleDef, Result};

pub use coordinator::{remap_file, RemapRequest};

/// Options for a remap run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapOptions {
    /// Resolve every imported type reference against the target module right away
    pub eager_resolve: bool,
}

/// Outcome of a remap run that produced output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemapStatus {
    /// No source assembly is referenced by the output
    Complete,
    /// The output still references these source assemblies
    Incomplete(Vec<String>),
}

impl RemapStatus {
    /// True if nothing was left behind.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, RemapStatus::Complete)
    }
}

/// State shared by all passes of one run.
#[derive(Debug)]
pub struct RemapContext {
    /// The module being edited
    pub module: ModuleDef,
    /// The module references are redirected to; never modified
    pub target: ModuleDef,
    /// Short names of the assemblies whose references are redirected
    pub sources: BTreeSet<String>,
    /// Run options
    pub options: RemapOptions,
}

impl RemapContext {
    /// Create the context for one run. The target's own assembly name is removed from
    /// `sources`.
    pub fn new<I, S>(module: ModuleDef, target: ModuleDef, sources: I, options: RemapOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sources: BTreeSet<String> = sources.into_iter().map(Into::into).collect();
        if let Some(assembly) = &target.assembly {
            sources.remove(&assembly.name);
        }

        RemapContext {
            module,
            target,
            sources,
            options,
        }
    }

    /// Run every compatible pass in order.
    ///
    /// # Errors
    /// Returns the first error raised by a pass. The edited module may be partially
    /// rewritten at that point and should be discarded.
    pub fn run(&mut self) -> Result<()> {
        for pass in RemapPass::iter() {
            if !pass.is_compatible(self) {
                info!("Skipping {} pass", pass);
                continue;
            }

            info!("Running {} pass", pass);
            let changes = pass.apply(self)?;
            info!("{} pass rewrote {} references", pass, changes);
        }

        Ok(())
    }
}

/// The passes of a remap run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum RemapPass {
    /// Metadata and IL references
    #[strum(to_string = "reference")]
    References,
    /// Compiled WPF markup resources
    #[strum(to_string = "markup")]
    Markup,
}

impl RemapPass {
    /// True if the pass has anything to do for the context's module.
    #[must_use]
    pub fn is_compatible(self, context: &RemapContext) -> bool {
        match self {
            RemapPass::References => true,
            RemapPass::Markup => markup::references_markup_assemblies(&context.module),
        }
    }

    /// Run the pass. Returns the number of rewritten references or markup values.
    ///
    /// # Errors
    /// See [`references::remap_references`] and [`markup::remap_markup`].
    pub fn apply(self, context: &mut RemapContext) -> Result<usize> {
        match self {
            RemapPass::References => references::remap_references(context),
            RemapPass::Markup => markup::remap_markup(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::sample_consumer;

    #[test]
    fn context_drops_target_from_sources() {
        let (module, target) = sample_consumer();
        let context = RemapContext::new(
            module,
            target,
            ["SourceLib", "Merged", "OtherLib"],
            RemapOptions::default(),
        );
        assert_eq!(
            context.sources.iter().map(String::as_str).collect::<Vec<_>>(),
            ["OtherLib", "SourceLib"]
        );
    }

    #[test]
    fn pass_order_and_gates() {
        let (module, target) = sample_consumer();
        let context = RemapContext::new(module, target, ["SourceLib"], RemapOptions::default());

        assert_eq!(
            RemapPass::iter().collect::<Vec<_>>(),
            [RemapPass::References, RemapPass::Markup]
        );
        assert!(RemapPass::References.is_compatible(&context));
        assert!(!RemapPass::Markup.is_compatible(&context));
        assert_eq!(RemapPass::Markup.to_string(), "markup");
    }

    #[test]
    fn run_is_idempotent() {
        let (module, target) = sample_consumer();
        let mut context = RemapContext::new(module, target, ["SourceLib"], RemapOptions::default());
        context.run().unwrap();
        let once = context.module.clone();

        context.run().unwrap();
        assert_eq!(context.module, once);
    }
}
