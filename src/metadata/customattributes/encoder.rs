use crate::{
    file::writer::Writer,
    metadata::{
        customattributes::{
            AttributeTypes, CustomAttribute, CustomAttributeArgument, CustomAttributeValue,
            SERIALIZATION_TYPE,
        },
        signatures::TypeSignature,
    },
    Result,
};

/// Encode the blob of `attribute`. Attributes loaded undecoded return their original blob.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a value does not match its declared type and
/// [`crate::Error::Unsupported`] for types an attribute blob cannot express.
pub fn encode_custom_attribute(
    attribute: &CustomAttribute,
    types: &dyn AttributeTypes,
) -> Result<Vec<u8>> {
    if let Some(raw_value) = &attribute.raw_value {
        return Ok(raw_value.clone());
    }

    let mut encoder = CustomAttributeEncoder {
        writer: Writer::new(),
        types,
    };
    encoder.writer.write_le::<u16>(0x0001);

    for arg in &attribute.fixed_args {
        encoder.value(&arg.arg_type, &arg.value)?;
    }

    let count = u16::try_from(attribute.named_args.len())
        .map_err(|_| malformed_error!("Too many named arguments"))?;
    encoder.writer.write_le(count);
    for named in &attribute.named_args {
        encoder.writer.write_le(if named.is_field {
            SERIALIZATION_TYPE::FIELD
        } else {
            SERIALIZATION_TYPE::PROPERTY
        });
        encoder.field_or_prop_type(&named.argument.arg_type)?;
        encoder.ser_string(Some(&named.name))?;
        encoder.value(&named.argument.arg_type, &named.argument.value)?;
    }

    Ok(encoder.writer.into_inner())
}

struct CustomAttributeEncoder<'a> {
    writer: Writer,
    types: &'a dyn AttributeTypes,
}

impl CustomAttributeEncoder<'_> {
    fn ser_string(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => {
                let length = u32::try_from(value.len())
                    .map_err(|_| malformed_error!("String too long - {}", value.len()))?;
                self.writer.write_compressed_uint(length)?;
                self.writer.write_bytes(value.as_bytes());
                Ok(())
            }
            None => {
                self.writer.write_le::<u8>(0xFF);
                Ok(())
            }
        }
    }

    fn field_or_prop_type(&mut self, arg_type: &TypeSignature) -> Result<()> {
        let tag = match arg_type {
            TypeSignature::Boolean => SERIALIZATION_TYPE::BOOLEAN,
            TypeSignature::Char => SERIALIZATION_TYPE::CHAR,
            TypeSignature::I1 => SERIALIZATION_TYPE::I1,
            TypeSignature::U1 => SERIALIZATION_TYPE::U1,
            TypeSignature::I2 => SERIALIZATION_TYPE::I2,
            TypeSignature::U2 => SERIALIZATION_TYPE::U2,
            TypeSignature::I4 => SERIALIZATION_TYPE::I4,
            TypeSignature::U4 => SERIALIZATION_TYPE::U4,
            TypeSignature::I8 => SERIALIZATION_TYPE::I8,
            TypeSignature::U8 => SERIALIZATION_TYPE::U8,
            TypeSignature::R4 => SERIALIZATION_TYPE::R4,
            TypeSignature::R8 => SERIALIZATION_TYPE::R8,
            TypeSignature::String => SERIALIZATION_TYPE::STRING,
            TypeSignature::Object => SERIALIZATION_TYPE::TAGGED_OBJECT,
            TypeSignature::Class(_) => SERIALIZATION_TYPE::TYPE,
            TypeSignature::SzArray(element) => {
                self.writer.write_le(SERIALIZATION_TYPE::SZARRAY);
                return self.field_or_prop_type(element);
            }
            TypeSignature::ValueType(token) => {
                self.writer.write_le(SERIALIZATION_TYPE::ENUM);
                let name = self.types.serialized_type_name(*token)?;
                return self.ser_string(Some(&name));
            }
            other => {
                return Err(unsupported_error!(
                    "Custom attribute argument of type {:?}",
                    other
                ))
            }
        };
        self.writer.write_le(tag);
        Ok(())
    }

    fn value(&mut self, arg_type: &TypeSignature, value: &CustomAttributeValue) -> Result<()> {
        match (arg_type, value) {
            (TypeSignature::String | TypeSignature::Class(_), CustomAttributeValue::Null) => {
                self.ser_string(None)?;
            }
            (TypeSignature::SzArray(_), CustomAttributeValue::Null) => {
                self.writer.write_le(u32::MAX);
            }
            (TypeSignature::String, CustomAttributeValue::String(value))
            | (TypeSignature::Class(_), CustomAttributeValue::Type(value)) => {
                self.ser_string(Some(value))?;
            }
            (TypeSignature::Object, CustomAttributeValue::Boxed(inner)) => {
                self.field_or_prop_type(&inner.arg_type)?;
                self.value(&inner.arg_type, &inner.value)?;
            }
            (TypeSignature::SzArray(element), CustomAttributeValue::Array(items)) => {
                let count = u32::try_from(items.len())
                    .map_err(|_| malformed_error!("Attribute array too long"))?;
                self.writer.write_le(count);
                for CustomAttributeArgument { value, .. } in items {
                    self.value(element, value)?;
                }
            }
            (TypeSignature::ValueType(_), value) => self.primitive(value)?,
            (_, value) => {
                if !matches!(
                    (arg_type, value),
                    (TypeSignature::Boolean, CustomAttributeValue::Bool(_))
                        | (TypeSignature::Char, CustomAttributeValue::Char(_))
                        | (TypeSignature::I1, CustomAttributeValue::I1(_))
                        | (TypeSignature::U1, CustomAttributeValue::U1(_))
                        | (TypeSignature::I2, CustomAttributeValue::I2(_))
                        | (TypeSignature::U2, CustomAttributeValue::U2(_))
                        | (TypeSignature::I4, CustomAttributeValue::I4(_))
                        | (TypeSignature::U4, CustomAttributeValue::U4(_))
                        | (TypeSignature::I8, CustomAttributeValue::I8(_))
                        | (TypeSignature::U8, CustomAttributeValue::U8(_))
                        | (TypeSignature::R4, CustomAttributeValue::R4(_))
                        | (TypeSignature::R8, CustomAttributeValue::R8(_))
                ) {
                    return Err(malformed_error!(
                        "Attribute value {:?} does not match its type {:?}",
                        value,
                        arg_type
                    ));
                }
                self.primitive(value)?;
            }
        }
        Ok(())
    }

    fn primitive(&mut self, value: &CustomAttributeValue) -> Result<()> {
        match value {
            CustomAttributeValue::Bool(value) => self.writer.write_le(u8::from(*value)),
            CustomAttributeValue::Char(value) | CustomAttributeValue::U2(value) => {
                self.writer.write_le(*value);
            }
            CustomAttributeValue::I1(value) => self.writer.write_le(*value),
            CustomAttributeValue::U1(value) => self.writer.write_le(*value),
            CustomAttributeValue::I2(value) => self.writer.write_le(*value),
            CustomAttributeValue::I4(value) => self.writer.write_le(*value),
            CustomAttributeValue::U4(value) => self.writer.write_le(*value),
            CustomAttributeValue::I8(value) => self.writer.write_le(*value),
            CustomAttributeValue::U8(value) => self.writer.write_le(*value),
            CustomAttributeValue::R4(value) => self.writer.write_le(*value),
            CustomAttributeValue::R8(value) => self.writer.write_le(*value),
            other => {
                return Err(malformed_error!(
                    "Attribute value {:?} is not a primitive",
                    other
                ))
            }
        }
        Ok(())
    }
}
