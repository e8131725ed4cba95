use crate::{
    file::writer::Writer,
    metadata::signatures::{
        SignatureMethod, SignatureProperty, TypeSignature, CALLING_CONVENTION, ELEMENT_TYPE,
        SIGNATURE_HEADER,
    },
    Result,
};

fn count(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| malformed_error!("Too many signature elements: {}", len))
}

/// Append the blob encoding of a single type.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a token cannot be encoded as `TypeDefOrRef`
/// or a count exceeds the compressed integer range.
pub fn write_type_signature(signature: &TypeSignature, writer: &mut Writer) -> Result<()> {
    match signature {
        TypeSignature::Void => writer.write_le(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => writer.write_le(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => writer.write_le(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => writer.write_le(ELEMENT_TYPE::I1),
        TypeSignature::U1 => writer.write_le(ELEMENT_TYPE::U1),
        TypeSignature::I2 => writer.write_le(ELEMENT_TYPE::I2),
        TypeSignature::U2 => writer.write_le(ELEMENT_TYPE::U2),
        TypeSignature::I4 => writer.write_le(ELEMENT_TYPE::I4),
        TypeSignature::U4 => writer.write_le(ELEMENT_TYPE::U4),
        TypeSignature::I8 => writer.write_le(ELEMENT_TYPE::I8),
        TypeSignature::U8 => writer.write_le(ELEMENT_TYPE::U8),
        TypeSignature::R4 => writer.write_le(ELEMENT_TYPE::R4),
        TypeSignature::R8 => writer.write_le(ELEMENT_TYPE::R8),
        TypeSignature::String => writer.write_le(ELEMENT_TYPE::STRING),
        TypeSignature::TypedByRef => writer.write_le(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::I => writer.write_le(ELEMENT_TYPE::I),
        TypeSignature::U => writer.write_le(ELEMENT_TYPE::U),
        TypeSignature::Object => writer.write_le(ELEMENT_TYPE::OBJECT),
        TypeSignature::Ptr(inner) => {
            writer.write_le(ELEMENT_TYPE::PTR);
            write_type_signature(inner, writer)?;
        }
        TypeSignature::ByRef(inner) => {
            writer.write_le(ELEMENT_TYPE::BYREF);
            write_type_signature(inner, writer)?;
        }
        TypeSignature::SzArray(inner) => {
            writer.write_le(ELEMENT_TYPE::SZARRAY);
            write_type_signature(inner, writer)?;
        }
        TypeSignature::Pinned(inner) => {
            writer.write_le(ELEMENT_TYPE::PINNED);
            write_type_signature(inner, writer)?;
        }
        TypeSignature::ModifiedRequired(modifier, inner) => {
            writer.write_le(ELEMENT_TYPE::CMOD_REQD);
            writer.write_compressed_token(*modifier)?;
            write_type_signature(inner, writer)?;
        }
        TypeSignature::ModifiedOptional(modifier, inner) => {
            writer.write_le(ELEMENT_TYPE::CMOD_OPT);
            writer.write_compressed_token(*modifier)?;
            write_type_signature(inner, writer)?;
        }
        TypeSignature::ValueType(token) => {
            writer.write_le(ELEMENT_TYPE::VALUETYPE);
            writer.write_compressed_token(*token)?;
        }
        TypeSignature::Class(token) => {
            writer.write_le(ELEMENT_TYPE::CLASS);
            writer.write_compressed_token(*token)?;
        }
        TypeSignature::GenericParamType(index) => {
            writer.write_le(ELEMENT_TYPE::VAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            writer.write_le(ELEMENT_TYPE::MVAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSignature::Array(array) => {
            writer.write_le(ELEMENT_TYPE::ARRAY);
            write_type_signature(&array.base, writer)?;
            writer.write_compressed_uint(array.rank)?;
            writer.write_compressed_uint(count(array.sizes.len())?)?;
            for size in &array.sizes {
                writer.write_compressed_uint(*size)?;
            }
            writer.write_compressed_uint(count(array.lower_bounds.len())?)?;
            for bound in &array.lower_bounds {
                writer.write_compressed_int(*bound)?;
            }
        }
        TypeSignature::GenericInst(open, args) => {
            if !matches!(
                open.as_ref(),
                TypeSignature::Class(_) | TypeSignature::ValueType(_)
            ) {
                return Err(malformed_error!(
                    "Generic instantiation of a non-class type - {:?}",
                    open
                ));
            }
            writer.write_le(ELEMENT_TYPE::GENERICINST);
            write_type_signature(open, writer)?;
            writer.write_compressed_uint(count(args.len())?)?;
            for arg in args {
                write_type_signature(arg, writer)?;
            }
        }
        TypeSignature::FnPtr(method) => {
            writer.write_le(ELEMENT_TYPE::FNPTR);
            write_method_signature(method, writer)?;
        }
    }

    Ok(())
}

fn write_method_signature(signature: &SignatureMethod, writer: &mut Writer) -> Result<()> {
    let mut calling_convention = signature.calling_convention & 0x0F;
    if signature.has_this {
        calling_convention |= CALLING_CONVENTION::HASTHIS;
    }
    if signature.explicit_this {
        calling_convention |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    if signature.param_count_generic > 0 {
        calling_convention |= CALLING_CONVENTION::GENERIC;
    }
    writer.write_le(calling_convention);

    if signature.param_count_generic > 0 {
        writer.write_compressed_uint(signature.param_count_generic)?;
    }

    writer.write_compressed_uint(count(signature.params.len())?)?;
    write_type_signature(&signature.return_type, writer)?;
    for param in &signature.params {
        write_type_signature(param, writer)?;
    }

    Ok(())
}

/// Encode a type specification blob.
///
/// # Errors
/// See [`write_type_signature`].
pub fn encode_type_signature(signature: &TypeSignature) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    write_type_signature(signature, &mut writer)?;
    Ok(writer.into_inner())
}

/// Encode a method signature blob.
///
/// # Errors
/// See [`write_type_signature`].
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    write_method_signature(signature, &mut writer)?;
    Ok(writer.into_inner())
}

/// Encode a field signature blob.
///
/// # Errors
/// See [`write_type_signature`].
pub fn encode_field_signature(signature: &TypeSignature) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    writer.write_le(SIGNATURE_HEADER::FIELD);
    write_type_signature(signature, &mut writer)?;
    Ok(writer.into_inner())
}

/// Encode a property signature blob.
///
/// # Errors
/// See [`write_type_signature`].
pub fn encode_property_signature(signature: &SignatureProperty) -> Result<Vec<u8>> {
    let mut writer = Writer::new();

    let mut prolog = SIGNATURE_HEADER::PROPERTY;
    if signature.has_this {
        prolog |= CALLING_CONVENTION::HASTHIS;
    }
    writer.write_le(prolog);
    writer.write_compressed_uint(count(signature.params.len())?)?;
    write_type_signature(&signature.base, &mut writer)?;
    for param in &signature.params {
        write_type_signature(param, &mut writer)?;
    }

    Ok(writer.into_inner())
}

/// Encode a local variable signature blob.
///
/// # Errors
/// See [`write_type_signature`].
pub fn encode_local_var_signature(locals: &[TypeSignature]) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    writer.write_le(SIGNATURE_HEADER::LOCAL_SIG);
    writer.write_compressed_uint(count(locals.len())?)?;
    for local in locals {
        write_type_signature(local, &mut writer)?;
    }
    Ok(writer.into_inner())
}

/// Encode a method instantiation blob.
///
/// # Errors
/// See [`write_type_signature`].
pub fn encode_method_spec_signature(generic_args: &[TypeSignature]) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    writer.write_le(SIGNATURE_HEADER::METHOD_SPEC);
    writer.write_compressed_uint(count(generic_args.len())?)?;
    for arg in generic_args {
        write_type_signature(arg, &mut writer)?;
    }
    Ok(writer.into_inner())
}
