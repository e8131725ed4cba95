use crate::{
    file::writer::Writer,
    metadata::resources::{
        resource_name_hash, ResourceSet, RESOURCE_MAGIC, RESOURCE_MANAGER_VERSION,
        RESOURCE_READER_VERSION,
    },
    Result,
};

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Resource set too large - {}", value))
}

impl ResourceSet {
    /// Serialize the resource set.
    ///
    /// Entries are written in their stored order; the hash table is rebuilt and sorted.
    /// A set produced by [`ResourceSet::parse`] from a container in canonical layout
    /// serializes back to the same bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a section exceeds the 32-bit offset range.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = Writer::new();
        header.write_prefixed_string_utf8(&self.reader_type)?;
        header.write_prefixed_string_utf8(&self.resource_set_type)?;

        let mut out = Writer::new();
        out.write_le(RESOURCE_MAGIC);
        out.write_le(RESOURCE_MANAGER_VERSION);
        out.write_le(to_u32(header.pos())?);
        out.write_bytes(header.data());

        out.write_le(RESOURCE_READER_VERSION);
        out.write_le(to_u32(self.entries.len())?);
        out.write_le(to_u32(self.type_names.len())?);
        for type_name in &self.type_names {
            out.write_prefixed_string_utf8(type_name)?;
        }

        let padding = (8 - out.pos() % 8) % 8;
        for i in 0..padding {
            out.write_le(b"PAD"[i % 3]);
        }

        let mut names = Writer::new();
        let mut values = Writer::new();
        let mut hashes = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            hashes.push((resource_name_hash(&entry.name), to_u32(names.pos())?));
            names.write_prefixed_string_utf16(&entry.name)?;
            names.write_le(to_u32(values.pos())?);

            values.write_7bit_encoded_int(entry.type_code);
            values.write_bytes(&entry.data);
        }
        hashes.sort_by_key(|&(hash, _)| hash);

        for (hash, _) in &hashes {
            out.write_le(*hash);
        }
        for (_, position) in &hashes {
            out.write_le(*position);
        }

        let data_section_offset = out.pos() + 4 + names.pos();
        out.write_le(to_u32(data_section_offset)?);
        out.write_bytes(names.data());
        out.write_bytes(values.data());

        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use crate::metadata::resources::{ResourceEntry, ResourceSet};

    fn sample() -> ResourceSet {
        ResourceSet {
            reader_type: "System.Resources.ResourceReader, mscorlib".to_string(),
            resource_set_type: "System.Resources.RuntimeResourceSet".to_string(),
            type_names: vec!["System.Drawing.Icon, System.Drawing".to_string()],
            entries: vec![
                ResourceEntry::stream("views/main.baml", &[0xAA; 17]),
                ResourceEntry::stream("views/about.baml", &[0xBB; 3]),
                ResourceEntry {
                    name: "app.ico".to_string(),
                    type_code: 0x40,
                    data: vec![0, 1, 2, 3],
                },
            ],
        }
    }

    #[test]
    fn header_is_aligned() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[0xCE, 0xCA, 0xEF, 0xBE]);

        let parsed = ResourceSet::parse(&bytes).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn reserialization_is_stable() {
        let bytes = sample().to_bytes().unwrap();
        let again = ResourceSet::parse(&bytes).unwrap().to_bytes().unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn empty_set() {
        let set = ResourceSet::default();
        let parsed = ResourceSet::parse(&set.to_bytes().unwrap()).unwrap();
        assert!(parsed.entries.is_empty());
    }
}
