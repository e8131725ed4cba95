//! Embedded resources.
//!
//! [`ManifestResource`] is a named blob embedded in a module. Resources produced by the
//! .NET resource writer (`*.resources`, including the `*.g.resources` containers of WPF
//! applications) decode into a [`ResourceSet`] of raw entries which can be modified and
//! written back.
//!
//! # Examples
//!
//! ```rust
//! use refremap::metadata::resources::{ResourceEntry, ResourceSet};
//!
//! let mut set = ResourceSet::default();
//! set.entries.push(ResourceEntry::stream("mainwindow.baml", &[1, 2, 3]));
//!
//! let bytes = set.to_bytes()?;
//! let parsed = ResourceSet::parse(&bytes)?;
//! assert_eq!(parsed.entry("mainwindow.baml").unwrap().payload()?, &[1, 2, 3]);
//! # Ok::<(), refremap::Error>(())
//! ```
mod parser;
mod types;
mod writer;

pub use types::*;
