use crate::{
    file::parser::Parser,
    metadata::signatures::{
        SignatureArray, SignatureMethod, SignatureProperty, TypeSignature, CALLING_CONVENTION,
        ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Result,
};

/// Maximum nesting depth accepted for a single type
const MAX_RECURSION_DEPTH: usize = 50;

/// Decoder for ECMA-335 II.23.2 signature blobs.
///
/// Custom modifiers wrap the type they precede. Vararg sentinels are rejected.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a parser over a signature blob.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    /// True if the whole blob has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.parser.has_more_data()
    }

    /// Parse a single type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown element types or excessive nesting.
    pub fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(malformed_error!(
                "Signature nesting exceeds {} levels",
                MAX_RECURSION_DEPTH
            ));
        }

        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_boxed(&mut self) -> Result<Box<TypeSignature>> {
        Ok(Box::new(self.parse_type()?))
    }

    fn parse_type_inner(&mut self) -> Result<TypeSignature> {
        let current_byte = self.parser.read_le::<u8>()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(TypeSignature::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSignature::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSignature::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSignature::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSignature::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSignature::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSignature::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSignature::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSignature::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSignature::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSignature::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSignature::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSignature::R8),
            ELEMENT_TYPE::STRING => Ok(TypeSignature::String),
            ELEMENT_TYPE::PTR => Ok(TypeSignature::Ptr(self.parse_boxed()?)),
            ELEMENT_TYPE::BYREF => Ok(TypeSignature::ByRef(self.parse_boxed()?)),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSignature::ValueType(
                self.parser.read_compressed_token()?,
            )),
            ELEMENT_TYPE::CLASS => Ok(TypeSignature::Class(self.parser.read_compressed_token()?)),
            ELEMENT_TYPE::VAR => Ok(TypeSignature::GenericParamType(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::ARRAY => {
                let base = self.parse_boxed()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                let mut sizes = Vec::with_capacity(num_sizes.min(rank) as usize);
                for _ in 0..num_sizes {
                    sizes.push(self.parser.read_compressed_uint()?);
                }

                let num_lo_bounds = self.parser.read_compressed_uint()?;
                let mut lower_bounds = Vec::with_capacity(num_lo_bounds.min(rank) as usize);
                for _ in 0..num_lo_bounds {
                    lower_bounds.push(self.parser.read_compressed_int()?);
                }

                Ok(TypeSignature::Array(SignatureArray {
                    base,
                    rank,
                    sizes,
                    lower_bounds,
                }))
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_boxed()?;
                let arg_count = self.parser.read_compressed_uint()?;
                if arg_count == 0 {
                    return Err(malformed_error!("GENERICINST without arguments"));
                }

                let mut type_args = Vec::new();
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                Ok(TypeSignature::GenericInst(base_type, type_args))
            }
            ELEMENT_TYPE::TYPEDBYREF => Ok(TypeSignature::TypedByRef),
            ELEMENT_TYPE::I => Ok(TypeSignature::I),
            ELEMENT_TYPE::U => Ok(TypeSignature::U),
            ELEMENT_TYPE::FNPTR => Ok(TypeSignature::FnPtr(Box::new(
                self.parse_method_signature()?,
            ))),
            ELEMENT_TYPE::OBJECT => Ok(TypeSignature::Object),
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::SzArray(self.parse_boxed()?)),
            ELEMENT_TYPE::MVAR => Ok(TypeSignature::GenericParamMethod(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::PINNED => Ok(TypeSignature::Pinned(self.parse_boxed()?)),
            ELEMENT_TYPE::CMOD_REQD => {
                let modifier = self.parser.read_compressed_token()?;
                Ok(TypeSignature::ModifiedRequired(modifier, self.parse_boxed()?))
            }
            ELEMENT_TYPE::CMOD_OPT => {
                let modifier = self.parser.read_compressed_token()?;
                Ok(TypeSignature::ModifiedOptional(modifier, self.parse_boxed()?))
            }
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                current_byte
            )),
        }
    }

    /// Parse a method signature, starting at its calling convention byte.
    ///
    /// # Errors
    /// Returns an error for truncated or invalid blobs and for vararg sentinels.
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let convention_byte = self.parser.read_le::<u8>()?;

        let param_count_generic = if convention_byte & CALLING_CONVENTION::GENERIC != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };
        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_type()?;

        let mut params = Vec::new();
        for _ in 0..param_count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                return Err(unsupported_error!("Vararg call sites are not supported"));
            }
            params.push(self.parse_type()?);
        }

        Ok(SignatureMethod {
            has_this: convention_byte & CALLING_CONVENTION::HASTHIS != 0,
            explicit_this: convention_byte & CALLING_CONVENTION::EXPLICITTHIS != 0,
            calling_convention: convention_byte & 0x0F,
            param_count_generic,
            return_type,
            params,
        })
    }

    /// Parse a field signature (`0x06` followed by the field type).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong header byte.
    pub fn parse_field_signature(&mut self) -> Result<TypeSignature> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        self.parse_type()
    }

    /// Parse a property signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong header byte.
    pub fn parse_property_signature(&mut self) -> Result<SignatureProperty> {
        let head_byte = self.parser.read_le::<u8>()?;
        if (head_byte & SIGNATURE_HEADER::PROPERTY) == 0 {
            return Err(malformed_error!(
                "SignatureProperty - invalid start - {}",
                head_byte
            ));
        }

        let param_count = self.parser.read_compressed_uint()?;
        let base = self.parse_type()?;

        let mut params = Vec::new();
        for _ in 0..param_count {
            params.push(self.parse_type()?);
        }

        Ok(SignatureProperty {
            has_this: (head_byte & CALLING_CONVENTION::HASTHIS) != 0,
            base,
            params,
        })
    }

    /// Parse a local variable signature. Pinned and by-reference locals appear as
    /// [`TypeSignature::Pinned`] and [`TypeSignature::ByRef`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong header byte.
    pub fn parse_local_var_signature(&mut self) -> Result<Vec<TypeSignature>> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "SignatureLocalVar - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;
        let mut locals = Vec::new();
        for _ in 0..count {
            locals.push(self.parse_type()?);
        }

        Ok(locals)
    }

    /// Parse a method instantiation signature (`0x0A`, count, arguments).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong header byte.
    pub fn parse_method_spec_signature(&mut self) -> Result<Vec<TypeSignature>> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::METHOD_SPEC {
            return Err(malformed_error!(
                "SignatureMethodSpec - invalid start - {}",
                head_byte
            ));
        }

        let arg_count = self.parser.read_compressed_uint()?;
        let mut generic_args = Vec::new();
        for _ in 0..arg_count {
            generic_args.push(self.parse_type()?);
        }

        Ok(generic_args)
    }
}
