//! BAML and `.g.resources` fixtures.
//!
//! [`sample_document_bytes`] is encoded by hand, record by record, so that the BAML reader
//! and writer are checked against bytes neither of them produced.

use crate::{
    baml::{BamlDocument, BamlRecord, BamlRecordType},
    metadata::resources::{ResourceEntry, ResourceSet},
};

const SOURCE_ASSEMBLY: &str = "SourceLib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null";
const FRAMEWORK_ASSEMBLY: &str =
    "PresentationFramework, Version=4.0.0.0, Culture=neutral, PublicKeyToken=31bf3856ad364e35";
const PRESENTATION_XMLNS: &str = "http://schemas.microsoft.com/winfx/2006/xaml/presentation";
const CONTROLS_XMLNS: &str = "clr-namespace:SourceLib.Controls;assembly=SourceLib";
const THEME_PATH: &str = "/SourceLib;component/Themes/Generic.xaml";
const LOGO_URI: &str = "pack://application:,,,/SourceLib;component/Images/logo.png";

fn raw(record_type: BamlRecordType, data: &[u8]) -> BamlRecord {
    BamlRecord::Raw {
        record_type,
        data: data.to_vec(),
    }
}

/// A window with one resource dictionary holding two keyed entries.
pub fn sample_document() -> BamlDocument {
    use BamlRecordType::*;

    BamlDocument {
        records: vec![
            raw(DocumentStart, &[0; 6]),
            BamlRecord::AssemblyInfo {
                assembly_id: 1,
                assembly_full_name: SOURCE_ASSEMBLY.to_string(),
            },
            BamlRecord::AssemblyInfo {
                assembly_id: 2,
                assembly_full_name: FRAMEWORK_ASSEMBLY.to_string(),
            },
            BamlRecord::TypeInfo {
                type_id: 1,
                assembly_id: 1,
                type_full_name: "SourceLib.Controls.Badge".to_string(),
            },
            raw(StringInfo, &[1, 0, 4, b'K', b'e', b'y', b'1']),
            raw(ElementStart, &[1, 0, 0]),
            BamlRecord::XmlnsProperty {
                prefix: String::new(),
                xml_namespace: PRESENTATION_XMLNS.to_string(),
                assembly_ids: vec![2],
            },
            BamlRecord::XmlnsProperty {
                prefix: "src".to_string(),
                xml_namespace: CONTROLS_XMLNS.to_string(),
                assembly_ids: vec![1],
            },
            BamlRecord::Property {
                attribute_id: 0x10,
                value: THEME_PATH.to_string(),
            },
            raw(PropertyComplexStart, &[0x11, 0]),
            raw(ElementStart, &[2, 0, 0]),
            BamlRecord::DeferableContentStart { target: 14 },
            BamlRecord::DefAttributeKeyString {
                value_id: 1,
                target: 14,
                shared: true,
                shared_set: false,
            },
            BamlRecord::DefAttributeKeyType {
                type_id: 1,
                flags: 0,
                target: 17,
                shared: true,
                shared_set: false,
            },
            raw(ElementStart, &[1, 0, 0]),
            BamlRecord::Text {
                value: LOGO_URI.to_string(),
            },
            raw(ElementEnd, &[]),
            raw(ElementStart, &[1, 0, 0]),
            raw(ElementEnd, &[]),
            raw(ElementEnd, &[]),
            raw(PropertyComplexEnd, &[]),
            raw(ElementEnd, &[]),
            raw(DocumentEnd, &[]),
        ],
        ..BamlDocument::default()
    }
}

// Helper to append a length-prefixed UTF-8 string; every fixture string is shorter than 128 bytes
fn string(out: &mut Vec<u8>, value: &str) {
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
}

// Helper to append a record with a one-byte size field, which counts itself
fn sized(out: &mut Vec<u8>, record_type: BamlRecordType, payload: &[u8]) {
    out.push(record_type as u8);
    out.push(payload.len() as u8 + 1);
    out.extend_from_slice(payload);
}

// Helper to append a fixed-length record
fn fixed(out: &mut Vec<u8>, record_type: BamlRecordType, payload: &[u8]) {
    out.push(record_type as u8);
    out.extend_from_slice(payload);
}

/// The encoded form of [`sample_document`].
pub fn sample_document_bytes() -> Vec<u8> {
    use BamlRecordType::*;

    let mut out = vec![12, 0, 0, 0];
    for unit in "MSBAML".encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    for _ in 0..3 {
        out.extend_from_slice(&[0, 0, 96, 0]);
    }

    let mut positions = Vec::new();
    let mut payload = Vec::new();

    positions.push(out.len());
    fixed(&mut out, DocumentStart, &[0; 6]);

    for (id, name) in [(1u8, SOURCE_ASSEMBLY), (2, FRAMEWORK_ASSEMBLY)] {
        positions.push(out.len());
        payload.clear();
        payload.extend_from_slice(&[id, 0]);
        string(&mut payload, name);
        sized(&mut out, AssemblyInfo, &payload);
    }

    positions.push(out.len());
    payload.clear();
    payload.extend_from_slice(&[1, 0, 1, 0]);
    string(&mut payload, "SourceLib.Controls.Badge");
    sized(&mut out, TypeInfo, &payload);

    positions.push(out.len());
    sized(&mut out, StringInfo, &[1, 0, 4, b'K', b'e', b'y', b'1']);

    positions.push(out.len());
    fixed(&mut out, ElementStart, &[1, 0, 0]);

    for (prefix, namespace, id) in [("", PRESENTATION_XMLNS, 2u8), ("src", CONTROLS_XMLNS, 1)] {
        positions.push(out.len());
        payload.clear();
        string(&mut payload, prefix);
        string(&mut payload, namespace);
        payload.extend_from_slice(&[1, 0, id, 0]);
        sized(&mut out, XmlnsProperty, &payload);
    }

    positions.push(out.len());
    payload.clear();
    payload.extend_from_slice(&[0x10, 0]);
    string(&mut payload, THEME_PATH);
    sized(&mut out, Property, &payload);

    positions.push(out.len());
    fixed(&mut out, PropertyComplexStart, &[0x11, 0]);
    positions.push(out.len());
    fixed(&mut out, ElementStart, &[2, 0, 0]);

    // Offsets are patched below, once the positions of the keyed elements are known
    positions.push(out.len());
    fixed(&mut out, DeferableContentStart, &[0; 4]);
    positions.push(out.len());
    sized(&mut out, DefAttributeKeyString, &[1, 0, 0, 0, 0, 0, 1, 0]);
    positions.push(out.len());
    fixed(&mut out, DefAttributeKeyType, &[1, 0, 0, 0, 0, 0, 0, 1, 0]);

    positions.push(out.len());
    fixed(&mut out, ElementStart, &[1, 0, 0]);
    positions.push(out.len());
    payload.clear();
    string(&mut payload, LOGO_URI);
    sized(&mut out, Text, &payload);
    positions.push(out.len());
    fixed(&mut out, ElementEnd, &[]);

    positions.push(out.len());
    fixed(&mut out, ElementStart, &[1, 0, 0]);
    for record_type in [ElementEnd, ElementEnd, PropertyComplexEnd, ElementEnd, DocumentEnd] {
        positions.push(out.len());
        fixed(&mut out, record_type, &[]);
    }

    // Deferred content offset: from the end of the offset field to the first keyed element
    let deferable = positions[11];
    let value = (positions[14] - (deferable + 5)) as u32;
    out[deferable + 1..deferable + 5].copy_from_slice(&value.to_le_bytes());

    // Key offsets: from the first record after the key run
    let key_string = positions[12];
    out[key_string + 4..key_string + 8].copy_from_slice(&0u32.to_le_bytes());
    let key_type = positions[13];
    let value = (positions[17] - positions[14]) as u32;
    out[key_type + 4..key_type + 8].copy_from_slice(&value.to_le_bytes());

    out
}

/// A `.g.resources` container with [`sample_document_bytes`] as `mainwindow.baml` next to
/// an image.
pub fn sample_resources() -> Vec<u8> {
    ResourceSet {
        reader_type: "System.Resources.ResourceReader, mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089".to_string(),
        resource_set_type: "System.Resources.RuntimeResourceSet".to_string(),
        type_names: Vec::new(),
        entries: vec![
            ResourceEntry::stream("images/logo.png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            ResourceEntry::stream("mainwindow.baml", &sample_document_bytes()),
        ],
    }
    .to_bytes()
    .unwrap()
}
