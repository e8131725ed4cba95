use crate::{
    baml::{
        records::{key_base_index, BamlRecord, BamlRecordType, RecordLayout},
        BamlDocument, BamlVersion,
    },
    file::writer::{size_of_7bit_encoded_int, Writer},
    Result,
};

/// Location of an offset field that is filled in once all record positions are known.
struct OffsetFixup {
    record_index: usize,
    field_position: usize,
    target: usize,
}

impl BamlDocument {
    /// Serialize the document.
    ///
    /// Record sizes are recomputed from the content and every stored record index is
    /// converted back into a byte offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a record points before the position its
    /// offset is relative to, or past the end of the document, or if a raw record's
    /// payload does not match its fixed size.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new();
        write_signature(&mut writer, &self.signature)?;
        write_version(&mut writer, self.reader_version);
        write_version(&mut writer, self.updater_version);
        write_version(&mut writer, self.writer_version);

        let mut positions = Vec::with_capacity(self.records.len() + 1);
        let mut fixups = Vec::new();
        for (record_index, record) in self.records.iter().enumerate() {
            positions.push(writer.pos());
            if let Some(field_position) = write_record(&mut writer, record)? {
                fixups.push(OffsetFixup {
                    record_index,
                    field_position,
                    target: record.defer_target().unwrap_or_default(),
                });
            }
        }
        positions.push(writer.pos());

        let types: Vec<BamlRecordType> = self.records.iter().map(BamlRecord::record_type).collect();
        for fixup in fixups {
            let target_position = *positions.get(fixup.target).ok_or_else(|| {
                malformed_error!(
                    "Record {} points past the end of the document ({})",
                    fixup.record_index,
                    fixup.target
                )
            })?;
            let base_position = match types[fixup.record_index] {
                BamlRecordType::DeferableContentStart => fixup.field_position + 4,
                _ => positions[key_base_index(&types, fixup.record_index)],
            };
            let value = target_position.checked_sub(base_position).ok_or_else(|| {
                malformed_error!(
                    "Record {} points backwards to record {}",
                    fixup.record_index,
                    fixup.target
                )
            })?;
            let value = u32::try_from(value)
                .map_err(|_| malformed_error!("Offset {} does not fit 32 bits", value))?;
            writer.patch_le_at::<u32>(fixup.field_position, value)?;
        }

        Ok(writer.into_inner())
    }
}

fn write_signature(writer: &mut Writer, signature: &str) -> Result<()> {
    let units: Vec<u16> = signature.encode_utf16().collect();
    let length = u32::try_from(units.len() * 2)
        .map_err(|_| malformed_error!("BAML signature too long"))?;

    writer.write_le::<u32>(length);
    for unit in units {
        writer.write_le::<u16>(unit);
    }
    writer.align(4, 0);
    Ok(())
}

fn write_version(writer: &mut Writer, version: BamlVersion) {
    writer.write_le::<u16>(version.major);
    writer.write_le::<u16>(version.minor);
}

/// Write one record. Returns the absolute position of its offset field, if it has one.
fn write_record(writer: &mut Writer, record: &BamlRecord) -> Result<Option<usize>> {
    let record_type = record.record_type();
    let mut payload = Writer::new();
    let mut offset_field = None;

    match record {
        BamlRecord::AssemblyInfo {
            assembly_id,
            assembly_full_name,
        } => {
            payload.write_le::<u16>(*assembly_id);
            payload.write_prefixed_string_utf8(assembly_full_name)?;
        }
        BamlRecord::XmlnsProperty {
            prefix,
            xml_namespace,
            assembly_ids,
        } => {
            payload.write_prefixed_string_utf8(prefix)?;
            payload.write_prefixed_string_utf8(xml_namespace)?;
            let count = u16::try_from(assembly_ids.len())
                .map_err(|_| malformed_error!("Too many assemblies for xmlns '{}'", prefix))?;
            payload.write_le::<u16>(count);
            for id in assembly_ids {
                payload.write_le::<u16>(*id);
            }
        }
        BamlRecord::Property {
            attribute_id,
            value,
        } => {
            payload.write_le::<u16>(*attribute_id);
            payload.write_prefixed_string_utf8(value)?;
        }
        BamlRecord::PropertyWithConverter {
            attribute_id,
            value,
            converter_type_id,
        } => {
            payload.write_le::<u16>(*attribute_id);
            payload.write_prefixed_string_utf8(value)?;
            payload.write_le::<u16>(*converter_type_id);
        }
        BamlRecord::Text { value } => {
            payload.write_prefixed_string_utf8(value)?;
        }
        BamlRecord::TextWithConverter {
            value,
            converter_type_id,
        } => {
            payload.write_prefixed_string_utf8(value)?;
            payload.write_le::<u16>(*converter_type_id);
        }
        BamlRecord::TypeInfo {
            type_id,
            assembly_id,
            type_full_name,
        } => {
            payload.write_le::<u16>(*type_id);
            payload.write_le::<u16>(*assembly_id);
            payload.write_prefixed_string_utf8(type_full_name)?;
        }
        BamlRecord::TypeSerializerInfo {
            type_id,
            assembly_id,
            type_full_name,
            serializer_type_id,
        } => {
            payload.write_le::<u16>(*type_id);
            payload.write_le::<u16>(*assembly_id);
            payload.write_prefixed_string_utf8(type_full_name)?;
            payload.write_le::<u16>(*serializer_type_id);
        }
        BamlRecord::DeferableContentStart { .. } => {
            offset_field = Some(payload.pos());
            payload.write_le::<u32>(0);
        }
        BamlRecord::DefAttributeKeyString {
            value_id,
            shared,
            shared_set,
            ..
        } => {
            payload.write_le::<u16>(*value_id);
            offset_field = Some(payload.pos());
            payload.write_le::<u32>(0);
            payload.write_le::<u8>(u8::from(*shared));
            payload.write_le::<u8>(u8::from(*shared_set));
        }
        BamlRecord::DefAttributeKeyType {
            type_id,
            flags,
            shared,
            shared_set,
            ..
        }
        | BamlRecord::KeyElementStart {
            type_id,
            flags,
            shared,
            shared_set,
            ..
        } => {
            payload.write_le::<u16>(*type_id);
            payload.write_le::<u8>(*flags);
            offset_field = Some(payload.pos());
            payload.write_le::<u32>(0);
            payload.write_le::<u8>(u8::from(*shared));
            payload.write_le::<u8>(u8::from(*shared_set));
        }
        BamlRecord::Raw { data, .. } => payload.write_bytes(data),
    }

    let payload = payload.into_inner();
    writer.write_le::<u8>(record_type as u8);

    match record_type.layout() {
        RecordLayout::Fixed(length) if length != payload.len() => {
            return Err(malformed_error!(
                "{} record must have {} bytes, got {}",
                record_type,
                length,
                payload.len()
            ));
        }
        RecordLayout::Fixed(_) | RecordLayout::NamedElement => {}
        RecordLayout::Sized => {
            let payload_length = u32::try_from(payload.len())
                .map_err(|_| malformed_error!("{} record too large", record_type))?;
            let inner = size_of_7bit_encoded_int(payload_length) as u32 + payload_length;
            let size = size_of_7bit_encoded_int(inner) as u32 + payload_length;
            writer.write_7bit_encoded_int(size);
        }
    }

    let payload_start = writer.pos();
    writer.write_bytes(&payload);
    Ok(offset_field.map(|field| payload_start + field))
}

#[cfg(test)]
mod tests {
    use crate::baml::{records::BamlRecordType, BamlDocument, BamlRecord};
    use crate::test::baml::{sample_document, sample_document_bytes};

    #[test]
    fn reserializes_identically() {
        let bytes = sample_document_bytes();
        let document = BamlDocument::parse(&bytes).unwrap();
        assert_eq!(document.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn recomputes_sizes_and_offsets() {
        let mut document = sample_document();
        let original = BamlDocument::parse(&document.to_bytes().unwrap()).unwrap();
        assert_eq!(original, document);

        for record in &mut document.records {
            if let BamlRecord::Property { value, .. } = record {
                value.push_str(&"x".repeat(200));
            }
        }

        let reparsed = BamlDocument::parse(&document.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed, document);
        assert_eq!(
            reparsed.records.iter().filter_map(BamlRecord::defer_target).collect::<Vec<_>>(),
            original.records.iter().filter_map(BamlRecord::defer_target).collect::<Vec<_>>()
        );
    }

    #[test]
    fn size_field_growth() {
        // 126 payload bytes fit a one-byte size, 127 need two
        for (length, expected_size) in [(126usize, 127u8), (127, 129)] {
            let document = BamlDocument {
                records: vec![BamlRecord::Raw {
                    record_type: BamlRecordType::Comment,
                    data: vec![0; length],
                }],
                ..BamlDocument::default()
            };
            let bytes = document.to_bytes().unwrap();
            let header = bytes.len() - length - if length == 126 { 2 } else { 3 };
            assert_eq!(bytes[header], BamlRecordType::Comment as u8);
            assert_eq!(bytes[header + 1] & 0x7F, expected_size & 0x7F);
            assert_eq!(BamlDocument::parse(&bytes).unwrap(), document);
        }
    }

    #[test]
    fn rejects_bad_targets() {
        let document = BamlDocument {
            records: vec![BamlRecord::DeferableContentStart { target: 5 }],
            ..BamlDocument::default()
        };
        assert!(document.to_bytes().is_err());

        let document = BamlDocument {
            records: vec![
                BamlRecord::Raw {
                    record_type: BamlRecordType::ElementEnd,
                    data: Vec::new(),
                },
                BamlRecord::DeferableContentStart { target: 0 },
            ],
            ..BamlDocument::default()
        };
        assert!(document.to_bytes().is_err());
    }

    #[test]
    fn rejects_wrong_fixed_length() {
        let document = BamlDocument {
            records: vec![BamlRecord::Raw {
                record_type: BamlRecordType::ElementStart,
                data: vec![1, 2],
            }],
            ..BamlDocument::default()
        };
        assert!(document.to_bytes().is_err());
    }
}
