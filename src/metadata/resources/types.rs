use bitflags::bitflags;

use crate::{file::parser::Parser, Result};

/// The magic number that identifies a .NET resource set (0xBEEFCACE)
pub const RESOURCE_MAGIC: u32 = 0xBEEF_CACE;

/// Resource manager header version written by [`ResourceSet::to_bytes`]
pub const RESOURCE_MANAGER_VERSION: u32 = 1;

/// Runtime resource reader version, the only one accepted by [`ResourceSet::parse`]
pub const RESOURCE_READER_VERSION: u32 = 2;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Type codes of resource values
pub mod RESOURCE_TYPE_CODE {
    pub const NULL: u32 = 0x00;
    pub const STRING: u32 = 0x01;
    pub const BOOLEAN: u32 = 0x02;
    pub const INT32: u32 = 0x08;
    pub const BYTE_ARRAY: u32 = 0x20;
    pub const STREAM: u32 = 0x21;
    pub const START_OF_USER_TYPES: u32 = 0x40;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// `ManifestResource` visibility flags - ECMA-335 II.23.1.9
    pub struct ManifestResourceAttributes: u32 {
        /// Exported from the assembly
        const PUBLIC = 0x0001;
        /// Private to the assembly
        const PRIVATE = 0x0002;
    }
}

/// A resource embedded in a module.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestResource {
    /// Name of the resource, e.g. `MyApp.g.resources`
    pub name: String,
    /// Visibility
    pub flags: ManifestResourceAttributes,
    /// Raw resource data, without the length prefix of the PE layout
    pub data: Vec<u8>,
}

impl ManifestResource {
    /// Create a public resource.
    #[must_use]
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        ManifestResource {
            name: name.into(),
            flags: ManifestResourceAttributes::PUBLIC,
            data,
        }
    }
}

/// One named entry of a [`ResourceSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    /// Entry name
    pub name: String,
    /// Value type code, see [`RESOURCE_TYPE_CODE`]
    pub type_code: u32,
    /// Encoded value following the type code
    pub data: Vec<u8>,
}

impl ResourceEntry {
    /// Create an entry holding a stream value.
    #[must_use]
    pub fn stream(name: impl Into<String>, payload: &[u8]) -> Self {
        let mut entry = ResourceEntry {
            name: name.into(),
            type_code: RESOURCE_TYPE_CODE::STREAM,
            data: Vec::new(),
        };
        entry.set_payload(payload);
        entry
    }

    /// True for byte array and stream values.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.type_code == RESOURCE_TYPE_CODE::BYTE_ARRAY || self.type_code == RESOURCE_TYPE_CODE::STREAM
    }

    /// Bytes of a byte array or stream value, without the 4-byte length header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for other value types or a length header that
    /// exceeds the entry.
    pub fn payload(&self) -> Result<&[u8]> {
        if !self.is_binary() {
            return Err(malformed_error!(
                "Resource '{}' does not hold binary data - type code {:#x}",
                self.name,
                self.type_code
            ));
        }

        let mut parser = Parser::new(&self.data);
        let length = parser.read_le::<u32>()? as usize;
        parser.read_bytes(length)
    }

    /// Replace the value with `payload`, recomputing the length header. The type code is kept.
    pub fn set_payload(&mut self, payload: &[u8]) {
        let mut data = Vec::with_capacity(payload.len() + 4);
        // Resource payloads are bounded by the 32-bit length header
        #[allow(clippy::cast_possible_truncation)]
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
        self.data = data;
    }
}

/// A parsed `.resources` container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceSet {
    /// Class name of the `IResourceReader`
    pub reader_type: String,
    /// Class name of the `ResourceSet`
    pub resource_set_type: String,
    /// Names of the user types referenced by type codes from 0x40 on
    pub type_names: Vec<String>,
    /// Entries in name-section order
    pub entries: Vec<ResourceEntry>,
}

impl ResourceSet {
    /// Find an entry by name.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&ResourceEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

/// Hash used by the resource reader to look up names (`FastResourceComparer`).
#[must_use]
pub fn resource_name_hash(name: &str) -> u32 {
    name.encode_utf16().fold(5381_u32, |hash, unit| {
        (hash << 5).wrapping_add(hash) ^ u32::from(unit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_hash() {
        assert_eq!(resource_name_hash(""), 5381);
        assert_eq!(resource_name_hash("a"), 177_604);
    }

    #[test]
    fn stream_payload() {
        let entry = ResourceEntry::stream("main.baml", &[1, 2, 3]);
        assert_eq!(entry.data, vec![3, 0, 0, 0, 1, 2, 3]);
        assert_eq!(entry.payload().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn payload_rejects_text() {
        let entry = ResourceEntry {
            name: "title".to_string(),
            type_code: RESOURCE_TYPE_CODE::STRING,
            data: vec![1, b'x'],
        };
        assert!(entry.payload().is_err());

        let truncated = ResourceEntry {
            name: "x.baml".to_string(),
            type_code: RESOURCE_TYPE_CODE::STREAM,
            data: vec![10, 0, 0, 0, 1],
        };
        assert!(truncated.payload().is_err());
    }
}
