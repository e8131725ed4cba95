use crate::metadata::{signatures::TypeSignature, token::Token};

/// Type tags of named arguments and boxed values - ECMA-335 II.23.3
#[allow(non_snake_case, dead_code, missing_docs)]
pub mod SERIALIZATION_TYPE {
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const SZARRAY: u8 = 0x1D;
    pub const TYPE: u8 = 0x50;
    pub const TAGGED_OBJECT: u8 = 0x51;
    pub const FIELD: u8 = 0x53;
    pub const PROPERTY: u8 = 0x54;
    pub const ENUM: u8 = 0x55;
}

/// An argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttributeValue {
    /// `null` string, type or array
    Null,
    /// `bool`
    Bool(bool),
    /// `char`
    Char(u16),
    /// `sbyte`
    I1(i8),
    /// `byte`
    U1(u8),
    /// `short`
    I2(i16),
    /// `ushort`
    U2(u16),
    /// `int`, also used for enum values backed by `int`
    I4(i32),
    /// `uint`
    U4(u32),
    /// `long`
    I8(i64),
    /// `ulong`
    U8(u64),
    /// `float`
    R4(f32),
    /// `double`
    R8(f64),
    /// `string`
    String(String),
    /// `System.Type`, stored as its serialized type name
    Type(String),
    /// Value boxed into `object`
    Boxed(Box<CustomAttributeArgument>),
    /// Single-dimensional array
    Array(Vec<CustomAttributeArgument>),
}

/// A typed argument.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeArgument {
    /// Declared type of the argument
    pub arg_type: TypeSignature,
    /// Argument value
    pub value: CustomAttributeValue,
}

/// A named field or property assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeNamedArgument {
    /// True for a field, false for a property
    pub is_field: bool,
    /// Member name
    pub name: String,
    /// Assigned value
    pub argument: CustomAttributeArgument,
}

/// An attribute applied to a metadata row.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttribute {
    /// Constructor, a MethodDef or MemberRef token
    pub constructor: Token,
    /// Positional constructor arguments
    pub fixed_args: Vec<CustomAttributeArgument>,
    /// Named arguments
    pub named_args: Vec<CustomAttributeNamedArgument>,
    /// Original blob of an attribute whose arguments could not be decoded. It is written
    /// back unchanged and the argument lists stay empty.
    pub raw_value: Option<Vec<u8>>,
}

impl CustomAttribute {
    /// Attribute with only positional arguments.
    #[must_use]
    pub fn new(constructor: Token, fixed_args: Vec<CustomAttributeArgument>) -> Self {
        CustomAttribute {
            constructor,
            fixed_args,
            named_args: Vec::new(),
            raw_value: None,
        }
    }

    /// Visit the constructor token and every token in declared argument types.
    pub fn for_each_token(&self, f: &mut dyn FnMut(Token)) {
        f(self.constructor);
        for arg in self.arguments() {
            arg.for_each_token(f);
        }
    }

    /// Mutable counterpart of [`CustomAttribute::for_each_token`].
    pub fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        f(&mut self.constructor);
        for arg in &mut self.fixed_args {
            arg.for_each_token_mut(f);
        }
        for named in &mut self.named_args {
            named.argument.for_each_token_mut(f);
        }
    }

    /// Fixed arguments followed by named argument values.
    pub fn arguments(&self) -> impl Iterator<Item = &CustomAttributeArgument> {
        self.fixed_args
            .iter()
            .chain(self.named_args.iter().map(|named| &named.argument))
    }
}

impl CustomAttributeArgument {
    /// Visit every token in the declared type, including nested boxed and array elements.
    pub fn for_each_token(&self, f: &mut dyn FnMut(Token)) {
        self.arg_type.for_each_token(f);
        match &self.value {
            CustomAttributeValue::Boxed(inner) => inner.for_each_token(f),
            CustomAttributeValue::Array(items) => {
                for item in items {
                    item.for_each_token(f);
                }
            }
            _ => {}
        }
    }

    /// Mutable counterpart of [`CustomAttributeArgument::for_each_token`].
    pub fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        self.arg_type.for_each_token_mut(f);
        match &mut self.value {
            CustomAttributeValue::Boxed(inner) => inner.for_each_token_mut(f),
            CustomAttributeValue::Array(items) => {
                for item in items {
                    item.for_each_token_mut(f);
                }
            }
            _ => {}
        }
    }
}
