//! Compiled WPF markup (BAML).
//!
//! A BAML stream is a short header followed by a flat list of records. [`BamlDocument`]
//! keeps the records in order; the ones that carry text the remapper rewrites
//! (assembly declarations, XML namespace mappings, property values and text) are
//! decoded into fields, all others keep their payload bytes.
//!
//! Records that store a byte offset to a later record (deferred content and dictionary
//! keys) hold the index of that record instead, so records can grow or shrink freely.
//! [`BamlDocument::to_bytes`] recomputes every size and offset.
//!
//! # Examples
//!
//! ```rust
//! use refremap::baml::{BamlDocument, BamlRecord};
//!
//! let document = BamlDocument {
//!     records: vec![BamlRecord::AssemblyInfo {
//!         assembly_id: 1,
//!         assembly_full_name: "SourceLib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
//!             .to_string(),
//!     }],
//!     ..BamlDocument::default()
//! };
//!
//! let bytes = document.to_bytes()?;
//! assert_eq!(BamlDocument::parse(&bytes)?, document);
//! # Ok::<(), refremap::Error>(())
//! ```

mod reader;
mod records;
mod writer;

pub use records::{BamlRecord, BamlRecordType, RecordLayout};

/// Signature of every BAML stream.
pub const BAML_SIGNATURE: &str = "MSBAML";

/// A `major.minor` format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BamlVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
}

/// Version written by every released WPF markup compiler.
pub const BAML_VERSION: BamlVersion = BamlVersion {
    major: 0,
    minor: 96,
};

/// A parsed BAML stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BamlDocument {
    /// Stream signature, always [`BAML_SIGNATURE`] for parsed documents
    pub signature: String,
    /// Minimum reader version
    pub reader_version: BamlVersion,
    /// Updater version
    pub updater_version: BamlVersion,
    /// Version of the writer that produced the stream
    pub writer_version: BamlVersion,
    /// Records in stream order
    pub records: Vec<BamlRecord>,
}

impl Default for BamlDocument {
    fn default() -> Self {
        BamlDocument {
            signature: BAML_SIGNATURE.to_string(),
            reader_version: BAML_VERSION,
            updater_version: BAML_VERSION,
            writer_version: BAML_VERSION,
            records: Vec::new(),
        }
    }
}
