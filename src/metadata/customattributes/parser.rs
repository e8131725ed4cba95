//! Custom attribute blob decoding - ECMA-335 II.23.3.

use crate::{
    file::parser::Parser,
    metadata::{
        customattributes::{
            AttributeTypes, CustomAttributeArgument, CustomAttributeNamedArgument,
            CustomAttributeValue, SERIALIZATION_TYPE,
        },
        signatures::TypeSignature,
    },
    Result,
};

const MAX_NESTING: usize = 16;

/// Decode the blob of an attribute whose constructor takes `params`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for an invalid prolog or value,
/// [`crate::Error::OutOfBounds`] for truncated blobs and [`crate::Error::Unsupported`]
/// for parameter types an attribute cannot carry.
pub fn parse_custom_attribute(
    blob: &[u8],
    params: &[TypeSignature],
    types: &mut dyn AttributeTypes,
) -> Result<(Vec<CustomAttributeArgument>, Vec<CustomAttributeNamedArgument>)> {
    let mut parser = CustomAttributeParser {
        parser: Parser::new(blob),
        types,
    };

    let prolog = parser.parser.read_le::<u16>()?;
    if prolog != 0x0001 {
        return Err(malformed_error!("Invalid custom attribute prolog - 0x{:04X}", prolog));
    }

    let mut fixed_args = Vec::with_capacity(params.len());
    for param in params {
        fixed_args.push(CustomAttributeArgument {
            arg_type: param.clone(),
            value: parser.value(param, 0)?,
        });
    }

    let mut named_args = Vec::new();
    // Some compilers omit the named argument count when there are none
    if parser.parser.has_more_data() {
        let count = parser.parser.read_le::<u16>()?;
        for _ in 0..count {
            named_args.push(parser.named_argument()?);
        }
    }
    if parser.parser.has_more_data() {
        return Err(malformed_error!(
            "{} trailing bytes after custom attribute arguments",
            parser.parser.remaining()
        ));
    }

    Ok((fixed_args, named_args))
}

struct CustomAttributeParser<'a, 'b> {
    parser: Parser<'a>,
    types: &'b mut dyn AttributeTypes,
}

impl CustomAttributeParser<'_, '_> {
    fn ser_string(&mut self) -> Result<Option<String>> {
        if self.parser.peek_byte()? == 0xFF {
            self.parser.read_le::<u8>()?;
            return Ok(None);
        }

        let length = self.parser.read_compressed_uint()? as usize;
        let bytes = self.parser.read_bytes(length)?;
        match std::str::from_utf8(bytes) {
            Ok(value) => Ok(Some(value.to_string())),
            Err(_) => Err(malformed_error!("Custom attribute string is not valid UTF-8")),
        }
    }

    fn field_or_prop_type(&mut self, depth: usize) -> Result<TypeSignature> {
        if depth > MAX_NESTING {
            return Err(malformed_error!("Custom attribute type nested too deeply"));
        }

        Ok(match self.parser.read_le::<u8>()? {
            SERIALIZATION_TYPE::BOOLEAN => TypeSignature::Boolean,
            SERIALIZATION_TYPE::CHAR => TypeSignature::Char,
            SERIALIZATION_TYPE::I1 => TypeSignature::I1,
            SERIALIZATION_TYPE::U1 => TypeSignature::U1,
            SERIALIZATION_TYPE::I2 => TypeSignature::I2,
            SERIALIZATION_TYPE::U2 => TypeSignature::U2,
            SERIALIZATION_TYPE::I4 => TypeSignature::I4,
            SERIALIZATION_TYPE::U4 => TypeSignature::U4,
            SERIALIZATION_TYPE::I8 => TypeSignature::I8,
            SERIALIZATION_TYPE::U8 => TypeSignature::U8,
            SERIALIZATION_TYPE::R4 => TypeSignature::R4,
            SERIALIZATION_TYPE::R8 => TypeSignature::R8,
            SERIALIZATION_TYPE::STRING => TypeSignature::String,
            SERIALIZATION_TYPE::TAGGED_OBJECT => TypeSignature::Object,
            SERIALIZATION_TYPE::TYPE => {
                TypeSignature::Class(self.types.resolve_type_name("System.Type")?)
            }
            SERIALIZATION_TYPE::SZARRAY => {
                TypeSignature::SzArray(Box::new(self.field_or_prop_type(depth + 1)?))
            }
            SERIALIZATION_TYPE::ENUM => {
                let Some(name) = self.ser_string()? else {
                    return Err(malformed_error!("Enum argument without a type name"));
                };
                TypeSignature::ValueType(self.types.resolve_type_name(&name)?)
            }
            other => {
                return Err(malformed_error!(
                    "Invalid custom attribute type tag - 0x{:02X}",
                    other
                ))
            }
        })
    }

    fn value(&mut self, arg_type: &TypeSignature, depth: usize) -> Result<CustomAttributeValue> {
        if depth > MAX_NESTING {
            return Err(malformed_error!("Custom attribute value nested too deeply"));
        }

        Ok(match arg_type {
            TypeSignature::Boolean => CustomAttributeValue::Bool(self.parser.read_le::<u8>()? != 0),
            TypeSignature::Char => CustomAttributeValue::Char(self.parser.read_le()?),
            TypeSignature::I1 => CustomAttributeValue::I1(self.parser.read_le()?),
            TypeSignature::U1 => CustomAttributeValue::U1(self.parser.read_le()?),
            TypeSignature::I2 => CustomAttributeValue::I2(self.parser.read_le()?),
            TypeSignature::U2 => CustomAttributeValue::U2(self.parser.read_le()?),
            TypeSignature::I4 => CustomAttributeValue::I4(self.parser.read_le()?),
            TypeSignature::U4 => CustomAttributeValue::U4(self.parser.read_le()?),
            TypeSignature::I8 => CustomAttributeValue::I8(self.parser.read_le()?),
            TypeSignature::U8 => CustomAttributeValue::U8(self.parser.read_le()?),
            TypeSignature::R4 => CustomAttributeValue::R4(self.parser.read_le()?),
            TypeSignature::R8 => CustomAttributeValue::R8(self.parser.read_le()?),
            TypeSignature::String => match self.ser_string()? {
                Some(value) => CustomAttributeValue::String(value),
                None => CustomAttributeValue::Null,
            },
            // System.Type is the only class an attribute argument can declare
            TypeSignature::Class(_) => match self.ser_string()? {
                Some(value) => CustomAttributeValue::Type(value),
                None => CustomAttributeValue::Null,
            },
            TypeSignature::Object => {
                let boxed_type = self.field_or_prop_type(depth + 1)?;
                let value = self.value(&boxed_type, depth + 1)?;
                CustomAttributeValue::Boxed(Box::new(CustomAttributeArgument {
                    arg_type: boxed_type,
                    value,
                }))
            }
            TypeSignature::ValueType(token) => {
                let underlying = self
                    .types
                    .enum_underlying_type(*token)
                    .unwrap_or(TypeSignature::I4);
                if matches!(underlying, TypeSignature::ValueType(_)) {
                    return Err(malformed_error!("Enum {} is backed by another enum", token));
                }
                self.value(&underlying, depth + 1)?
            }
            TypeSignature::SzArray(element) => {
                let count = self.parser.read_le::<u32>()?;
                if count == u32::MAX {
                    CustomAttributeValue::Null
                } else {
                    if count as usize > self.parser.remaining() {
                        return Err(out_of_bounds_error!());
                    }
                    let mut items = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        items.push(CustomAttributeArgument {
                            arg_type: element.as_ref().clone(),
                            value: self.value(element, depth + 1)?,
                        });
                    }
                    CustomAttributeValue::Array(items)
                }
            }
            other => {
                return Err(unsupported_error!(
                    "Custom attribute argument of type {:?}",
                    other
                ))
            }
        })
    }

    fn named_argument(&mut self) -> Result<CustomAttributeNamedArgument> {
        let is_field = match self.parser.read_le::<u8>()? {
            SERIALIZATION_TYPE::FIELD => true,
            SERIALIZATION_TYPE::PROPERTY => false,
            other => {
                return Err(malformed_error!(
                    "Invalid named argument kind - 0x{:02X}",
                    other
                ))
            }
        };
        let arg_type = self.field_or_prop_type(0)?;
        let Some(name) = self.ser_string()? else {
            return Err(malformed_error!("Named argument without a name"));
        };
        let value = self.value(&arg_type, 0)?;

        Ok(CustomAttributeNamedArgument {
            is_field,
            name,
            argument: CustomAttributeArgument { arg_type, value },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metadata::token::Token;

    /// Resolves every name to a fixed set of tokens.
    pub(crate) struct FixedTypes;

    pub(crate) const BYTE_ENUM: Token = Token(0x0200_0002);
    pub(crate) const SYSTEM_TYPE: Token = Token(0x0100_0001);
    pub(crate) const FOREIGN_ENUM: Token = Token(0x0100_0002);

    impl AttributeTypes for FixedTypes {
        fn enum_underlying_type(&self, token: Token) -> Option<TypeSignature> {
            (token == BYTE_ENUM).then_some(TypeSignature::U1)
        }

        fn resolve_type_name(&mut self, name: &str) -> crate::Result<Token> {
            match name {
                "System.Type" => Ok(SYSTEM_TYPE),
                "App.Mode" => Ok(BYTE_ENUM),
                "Lib.Color, Lib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null" => {
                    Ok(FOREIGN_ENUM)
                }
                _ => Err(crate::Error::TypeNotFound(name.to_string())),
            }
        }

        fn serialized_type_name(&self, token: Token) -> crate::Result<String> {
            match token {
                SYSTEM_TYPE => Ok("System.Type".to_string()),
                BYTE_ENUM => Ok("App.Mode".to_string()),
                FOREIGN_ENUM => Ok(
                    "Lib.Color, Lib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
                        .to_string(),
                ),
                _ => Err(crate::Error::TokenNotFound(token)),
            }
        }
    }

    #[test]
    fn fixed_arguments() {
        #[rustfmt::skip]
        let blob = [
            0x01, 0x00,
            0x05, b'H', b'e', b'l', b'l', b'o',
            0x2A, 0x00, 0x00, 0x00,
            0x03,
            0xFF,
            0x00, 0x00,
        ];
        let params = [
            TypeSignature::String,
            TypeSignature::I4,
            TypeSignature::ValueType(BYTE_ENUM),
            TypeSignature::Class(SYSTEM_TYPE),
        ];

        let (fixed, named) = parse_custom_attribute(&blob, &params, &mut FixedTypes).unwrap();
        assert!(named.is_empty());
        assert_eq!(fixed[0].value, CustomAttributeValue::String("Hello".to_string()));
        assert_eq!(fixed[1].value, CustomAttributeValue::I4(42));
        assert_eq!(fixed[2].value, CustomAttributeValue::U1(3));
        assert_eq!(fixed[2].arg_type, TypeSignature::ValueType(BYTE_ENUM));
        assert_eq!(fixed[3].value, CustomAttributeValue::Null);
    }

    #[test]
    fn boxed_enum_and_named_arguments() {
        let enum_name = b"Lib.Color, Lib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null";
        let mut blob = vec![0x01, 0x00, 0x51, 0x55, enum_name.len() as u8];
        blob.extend_from_slice(enum_name);
        blob.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        blob.extend_from_slice(&[0x01, 0x00]);
        // property Tags: string[] = { "a", null }
        blob.extend_from_slice(&[0x54, 0x1D, 0x0E, 0x04, b'T', b'a', b'g', b's']);
        blob.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x01, b'a', 0xFF]);

        let (fixed, named) =
            parse_custom_attribute(&blob, &[TypeSignature::Object], &mut FixedTypes).unwrap();
        let CustomAttributeValue::Boxed(inner) = &fixed[0].value else {
            panic!("expected a boxed value");
        };
        assert_eq!(inner.arg_type, TypeSignature::ValueType(FOREIGN_ENUM));
        assert_eq!(inner.value, CustomAttributeValue::I4(2));

        assert_eq!(named.len(), 1);
        assert!(!named[0].is_field);
        assert_eq!(named[0].name, "Tags");
        let CustomAttributeValue::Array(items) = &named[0].argument.value else {
            panic!("expected an array");
        };
        assert_eq!(items[0].value, CustomAttributeValue::String("a".to_string()));
        assert_eq!(items[1].value, CustomAttributeValue::Null);
    }

    #[test]
    fn invalid_blobs() {
        let mut types = FixedTypes;
        assert!(parse_custom_attribute(&[0x02, 0x00], &[], &mut types).is_err());
        assert!(parse_custom_attribute(&[0x01, 0x00, 0x01], &[TypeSignature::I4], &mut types)
            .is_err());
        assert!(matches!(
            parse_custom_attribute(
                &[0x01, 0x00, 0x00],
                &[TypeSignature::GenericParamType(0)],
                &mut types
            ),
            Err(crate::Error::Unsupported { .. })
        ));
        // trailing data after the named argument count
        assert!(parse_custom_attribute(&[0x01, 0x00, 0x00, 0x00, 0x07], &[], &mut types).is_err());
        // enum name the module cannot resolve
        assert!(parse_custom_attribute(
            &[0x01, 0x00, 0x01, 0x00, 0x53, 0x55, 0x01, b'X', 0x01, b'F', 0x00, 0x00, 0x00, 0x00],
            &[],
            &mut types
        )
        .is_err());
    }
}
