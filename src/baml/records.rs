use strum::{Display, EnumIter, FromRepr};

/// Record kinds of a BAML stream, as stored in the first byte of each record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, EnumIter, FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum BamlRecordType {
    DocumentStart = 1,
    DocumentEnd = 2,
    ElementStart = 3,
    ElementEnd = 4,
    Property = 5,
    PropertyCustom = 6,
    PropertyComplexStart = 7,
    PropertyComplexEnd = 8,
    PropertyArrayStart = 9,
    PropertyArrayEnd = 10,
    PropertyIListStart = 11,
    PropertyIListEnd = 12,
    PropertyIDictionaryStart = 13,
    PropertyIDictionaryEnd = 14,
    LiteralContent = 15,
    Text = 16,
    TextWithConverter = 17,
    RoutedEvent = 18,
    ClrEvent = 19,
    XmlnsProperty = 20,
    XmlAttribute = 21,
    ProcessingInstruction = 22,
    Comment = 23,
    DefTag = 24,
    DefAttribute = 25,
    EndAttributes = 26,
    PIMapping = 27,
    AssemblyInfo = 28,
    TypeInfo = 29,
    TypeSerializerInfo = 30,
    AttributeInfo = 31,
    StringInfo = 32,
    PropertyStringReference = 33,
    PropertyTypeReference = 34,
    PropertyWithExtension = 35,
    PropertyWithConverter = 36,
    DeferableContentStart = 37,
    DefAttributeKeyString = 38,
    DefAttributeKeyType = 39,
    KeyElementStart = 40,
    KeyElementEnd = 41,
    ConstructorParametersStart = 42,
    ConstructorParametersEnd = 43,
    ConstructorParameterType = 44,
    ConnectionId = 45,
    ContentProperty = 46,
    NamedElementStart = 47,
    StaticResourceStart = 48,
    StaticResourceEnd = 49,
    StaticResourceId = 50,
    TextWithId = 51,
    PresentationOptionsAttribute = 52,
    LineNumberAndPosition = 53,
    LinePosition = 54,
    OptimizedStaticResource = 55,
    PropertyWithStaticResourceId = 56,
}

/// How the length of a record's payload is determined.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecordLayout {
    /// Payload of a fixed number of bytes
    Fixed(usize),
    /// Payload preceded by a 7-bit encoded size that counts the size field itself
    Sized,
    /// `u16` type id followed by a length-prefixed string
    NamedElement,
}

impl BamlRecordType {
    /// Payload layout of this record kind.
    #[must_use]
    pub fn layout(self) -> RecordLayout {
        use BamlRecordType::*;

        match self {
            DocumentEnd
            | ElementEnd
            | PropertyComplexEnd
            | PropertyArrayEnd
            | PropertyIListEnd
            | PropertyIDictionaryEnd
            | KeyElementEnd
            | ConstructorParametersStart
            | ConstructorParametersEnd
            | StaticResourceEnd => RecordLayout::Fixed(0),
            PropertyComplexStart
            | PropertyArrayStart
            | PropertyIListStart
            | PropertyIDictionaryStart
            | ConstructorParameterType
            | ContentProperty
            | StaticResourceId => RecordLayout::Fixed(2),
            ElementStart | StaticResourceStart | OptimizedStaticResource => RecordLayout::Fixed(3),
            DeferableContentStart
            | ConnectionId
            | LinePosition
            | PropertyTypeReference
            | PropertyStringReference
            | PropertyWithStaticResourceId => RecordLayout::Fixed(4),
            DocumentStart | PropertyWithExtension => RecordLayout::Fixed(6),
            LineNumberAndPosition => RecordLayout::Fixed(8),
            DefAttributeKeyType | KeyElementStart => RecordLayout::Fixed(9),
            NamedElementStart => RecordLayout::NamedElement,
            _ => RecordLayout::Sized,
        }
    }

    /// True for the record kinds that precede the content they key in a dictionary.
    #[must_use]
    pub fn is_key(self) -> bool {
        matches!(
            self,
            BamlRecordType::DefAttributeKeyString
                | BamlRecordType::DefAttributeKeyType
                | BamlRecordType::OptimizedStaticResource
                | BamlRecordType::StaticResourceStart
                | BamlRecordType::KeyElementStart
        )
    }
}

/// A single BAML record.
///
/// Records the remapper reads or rewrites are decoded into named fields; every other record
/// keeps its payload verbatim. Records that store a byte offset to a later record hold the
/// index of that record instead, and the offset is recomputed on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BamlRecord {
    /// Declares an assembly used by the document
    AssemblyInfo {
        /// Id other records use to refer to the assembly
        assembly_id: u16,
        /// Full display name
        assembly_full_name: String,
    },
    /// Maps an XML namespace prefix
    XmlnsProperty {
        /// Namespace prefix
        prefix: String,
        /// Namespace, e.g. `clr-namespace:App.Controls;assembly=App`
        xml_namespace: String,
        /// Assemblies contributing to the namespace
        assembly_ids: Vec<u16>,
    },
    /// Property set from a literal string
    Property {
        /// Attribute id of the property
        attribute_id: u16,
        /// Literal value
        value: String,
    },
    /// Property set from a string converted by a type converter
    PropertyWithConverter {
        /// Attribute id of the property
        attribute_id: u16,
        /// Literal value
        value: String,
        /// Type id of the converter
        converter_type_id: u16,
    },
    /// Text content
    Text {
        /// The text
        value: String,
    },
    /// Text content converted by a type converter
    TextWithConverter {
        /// The text
        value: String,
        /// Type id of the converter
        converter_type_id: u16,
    },
    /// Declares a type used by the document
    TypeInfo {
        /// Id other records use to refer to the type
        type_id: u16,
        /// Declaring assembly id, with flags in the high bits
        assembly_id: u16,
        /// Full type name
        type_full_name: String,
    },
    /// Declares a type with a custom serializer
    TypeSerializerInfo {
        /// Id other records use to refer to the type
        type_id: u16,
        /// Declaring assembly id, with flags in the high bits
        assembly_id: u16,
        /// Full type name
        type_full_name: String,
        /// Type id of the serializer
        serializer_type_id: u16,
    },
    /// Start of content that is loaded on demand
    DeferableContentStart {
        /// Index of the first record after the deferred content
        target: usize,
    },
    /// Dictionary key given as a string
    DefAttributeKeyString {
        /// String id of the key
        value_id: u16,
        /// Index of the keyed value record
        target: usize,
        /// `x:Shared`
        shared: bool,
        /// `x:Shared` was set explicitly
        shared_set: bool,
    },
    /// Dictionary key given as a type
    DefAttributeKeyType {
        /// Type id of the key
        type_id: u16,
        /// Element flags
        flags: u8,
        /// Index of the keyed value record
        target: usize,
        /// `x:Shared`
        shared: bool,
        /// `x:Shared` was set explicitly
        shared_set: bool,
    },
    /// Dictionary key given as an element tree
    KeyElementStart {
        /// Type id of the key element
        type_id: u16,
        /// Element flags
        flags: u8,
        /// Index of the keyed value record
        target: usize,
        /// `x:Shared`
        shared: bool,
        /// `x:Shared` was set explicitly
        shared_set: bool,
    },
    /// Any other record, payload kept as is
    Raw {
        /// Record kind
        record_type: BamlRecordType,
        /// Payload, without the size field of sized records
        data: Vec<u8>,
    },
}

impl BamlRecord {
    /// Kind of this record.
    #[must_use]
    pub fn record_type(&self) -> BamlRecordType {
        match self {
            BamlRecord::AssemblyInfo { .. } => BamlRecordType::AssemblyInfo,
            BamlRecord::XmlnsProperty { .. } => BamlRecordType::XmlnsProperty,
            BamlRecord::Property { .. } => BamlRecordType::Property,
            BamlRecord::PropertyWithConverter { .. } => BamlRecordType::PropertyWithConverter,
            BamlRecord::Text { .. } => BamlRecordType::Text,
            BamlRecord::TextWithConverter { .. } => BamlRecordType::TextWithConverter,
            BamlRecord::TypeInfo { .. } => BamlRecordType::TypeInfo,
            BamlRecord::TypeSerializerInfo { .. } => BamlRecordType::TypeSerializerInfo,
            BamlRecord::DeferableContentStart { .. } => BamlRecordType::DeferableContentStart,
            BamlRecord::DefAttributeKeyString { .. } => BamlRecordType::DefAttributeKeyString,
            BamlRecord::DefAttributeKeyType { .. } => BamlRecordType::DefAttributeKeyType,
            BamlRecord::KeyElementStart { .. } => BamlRecordType::KeyElementStart,
            BamlRecord::Raw { record_type, .. } => *record_type,
        }
    }

    /// Index of the record this one points to, for records that store an offset.
    #[must_use]
    pub fn defer_target(&self) -> Option<usize> {
        match self {
            BamlRecord::DeferableContentStart { target }
            | BamlRecord::DefAttributeKeyString { target, .. }
            | BamlRecord::DefAttributeKeyType { target, .. }
            | BamlRecord::KeyElementStart { target, .. } => Some(*target),
            _ => None,
        }
    }
}

/// Index of the record key offsets are relative to: the first record after the run of
/// keys starting at `index`. Static resource and key element trees count as part of the run.
pub(crate) fn key_base_index(types: &[BamlRecordType], mut index: usize) -> usize {
    while let Some(&record_type) = types.get(index) {
        if !record_type.is_key() {
            break;
        }

        match record_type {
            BamlRecordType::StaticResourceStart => {
                index = skip_tree(
                    types,
                    index,
                    BamlRecordType::StaticResourceStart,
                    BamlRecordType::StaticResourceEnd,
                );
            }
            BamlRecordType::KeyElementStart => {
                index = skip_tree(
                    types,
                    index,
                    BamlRecordType::KeyElementStart,
                    BamlRecordType::KeyElementEnd,
                );
            }
            _ => {}
        }
        index += 1;
    }

    index
}

/// Index of the `end` record closing the tree opened at `index`, or the last record.
fn skip_tree(
    types: &[BamlRecordType],
    mut index: usize,
    start: BamlRecordType,
    end: BamlRecordType,
) -> usize {
    let mut depth = 0usize;
    while let Some(&record_type) = types.get(index) {
        if record_type == start {
            depth += 1;
        } else if record_type == end {
            depth = depth.saturating_sub(1);
        }
        if depth == 0 {
            break;
        }
        index += 1;
    }
    index
}
