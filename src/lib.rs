// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # refremap
//!
//! Redirects the references a .NET module holds into a set of *source* assemblies onto a
//! single *target* module, typically the result of merging those assemblies into one.
//! After a run, every type, member, generic instantiation and attribute argument that
//! named a source assembly names the equivalent declaration of the target instead, and the
//! compiled WPF markup embedded in the module points at the target as well.
//!
//! ## Features
//!
//! - **Module model** - token-indexed tables for types, members, signatures, method bodies,
//!   attributes and manifest resources, loaded from and written to managed PE files
//! - **Reference remapping** - a visit-once walk over every definition that imports
//!   replacement references from the target, preserving generic arity and argument order
//! - **Markup remapping** - a BAML codec and the rules that rewrite assembly names, xmlns
//!   mappings and pack URIs inside `.g.resources`
//! - **Verification** - the written output is reloaded and checked for leftover source
//!   assembly references
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use refremap::prelude::*;
//!
//! let request = RemapRequest {
//!     input: "App.dll".into(),
//!     sources: vec!["SourceLib".to_string()],
//!     target: "Merged.dll".into(),
//!     output: "out/App.dll".into(),
//!     options: RemapOptions::default(),
//! };
//!
//! match remap_file(&request)? {
//!     RemapStatus::Complete => println!("done"),
//!     RemapStatus::Incomplete(left) => println!("still referencing {:?}", left),
//! }
//! # Ok::<(), refremap::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`metadata`] - the module model and its codecs
//! - [`baml`] - compiled XAML streams
//! - [`remap`] - the remap passes and the file-to-file driver
//! - [`prelude`] - the commonly used types in one import

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust
/// use refremap::prelude::*;
///
/// let module = ModuleDef::new("App.dll");
/// assert!(module.type_defs.is_empty());
/// ```
pub mod prelude;

/// Compiled XAML (BAML) streams.
///
/// See [`baml::BamlDocument`] for parsing and writing streams.
pub mod baml;

/// The metadata model of a .NET module.
///
/// See [`metadata::module::ModuleDef`] for the entry point.
pub mod metadata;

/// Reference remapping passes and the file-to-file driver.
pub mod remap;

/// `refremap` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `refremap` Error type
///
/// Every fallible operation of the crate reports one of these variants.
pub use error::Error;

/// Low-level input, decoding and encoding utilities.
///
/// # Example
///
/// ```rust
/// use refremap::{Parser, Writer};
///
/// let mut writer = Writer::new();
/// writer.write_7bit_encoded_int(300);
///
/// let data = writer.into_inner();
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_7bit_encoded_int()?, 300);
/// # Ok::<(), refremap::Error>(())
/// ```
pub use file::{parser::Parser, writer::Writer, File};
