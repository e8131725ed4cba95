//! Metadata model of .NET modules.
//!
//! The model keeps a module's declarations and references in token-indexed tables:
//!
//! - [`module`] - [`module::ModuleDef`], the table arenas, name lookup, type import, and
//!   loading and saving PE images
//! - [`token`] / [`tables`] - metadata tokens, the table schema and raw rows
//! - [`cor20header`] / [`root`] / [`streams`] - the CLR header, metadata root and heaps
//! - [`signatures`] - type, method, field, property and local signatures with their
//!   ECMA-335 blob codec
//! - [`method`] - method bodies and instructions
//! - [`customattributes`] - attributes and their typed arguments
//! - [`identity`] - assembly names, versions and strong-name tokens
//! - [`resources`] - manifest resources and the `.resources` container codec
//!
//! # Examples
//!
//! ```rust,no_run
//! use refremap::metadata::module::ModuleDef;
//!
//! let module = ModuleDef::from_file("App.dll".as_ref())?;
//! for name in module.assembly_ref_names() {
//!     println!("references {}", name);
//! }
//! println!("Types: {}", module.type_defs.len());
//! # Ok::<(), refremap::Error>(())
//! ```

/// The CLR runtime header
pub mod cor20header;
/// Custom attributes and their arguments
pub mod customattributes;
/// Assembly identities and strong-name tokens
pub mod identity;
/// Method bodies and CIL instructions
pub mod method;
/// The module model and its PE reader and writer
pub mod module;
/// Manifest resources and `.resources` containers
pub mod resources;
/// The metadata root and stream directory
pub mod root;
/// Method and type signatures
pub mod signatures;
/// Metadata heaps and the tables stream
pub mod streams;
/// Metadata table identifiers and schema
pub mod tables;
/// Metadata tokens
pub mod token;
