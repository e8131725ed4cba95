use crate::metadata::token::Token;

/// A type as it appears inside a signature blob.
///
/// `Class` and `ValueType` hold a `TypeDefOrRef` token (TypeDef, TypeRef or TypeSpec).
/// Wrappers (`SzArray`, `ByRef`, `Ptr`, `Pinned`, `Array`) and `GenericInst` nest
/// arbitrarily, so `SourceLib.Widget<int>[]` is
/// `SzArray(GenericInst(Class(TypeRef), [I4]))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeSignature {
    /// `void`
    #[default]
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
    /// `string`
    String,
    /// `T*`
    Ptr(Box<TypeSignature>),
    /// `T&`
    ByRef(Box<TypeSignature>),
    /// A value type
    ValueType(Token),
    /// A reference type
    Class(Token),
    /// Generic parameter of the enclosing type, `!N`
    GenericParamType(u32),
    /// Multi-dimensional array
    Array(SignatureArray),
    /// Instantiation of an open generic type
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// `System.TypedReference`
    TypedByRef,
    /// `nint`
    I,
    /// `nuint`
    U,
    /// Function pointer
    FnPtr(Box<SignatureMethod>),
    /// `object`
    Object,
    /// Single-dimensional zero-based array, `T[]`
    SzArray(Box<TypeSignature>),
    /// Generic parameter of the enclosing method, `!!N`
    GenericParamMethod(u32),
    /// Pinned local
    Pinned(Box<TypeSignature>),
    /// `modreq(Modifier) T`
    ModifiedRequired(Token, Box<TypeSignature>),
    /// `modopt(Modifier) T`
    ModifiedOptional(Token, Box<TypeSignature>),
}

/// A general array shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureArray {
    /// Element type
    pub base: Box<TypeSignature>,
    /// Number of dimensions
    pub rank: u32,
    /// Declared sizes, possibly fewer than `rank`
    pub sizes: Vec<u32>,
    /// Declared lower bounds, possibly fewer than `rank`
    pub lower_bounds: Vec<i32>,
}

/// A method signature (`MethodDefSig`, `MethodRefSig` or the target of a function pointer).
///
/// By-reference parameters are expressed as [`TypeSignature::ByRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureMethod {
    /// Instance method
    pub has_this: bool,
    /// `this` is passed explicitly as the first parameter
    pub explicit_this: bool,
    /// Calling convention kind from the low nibble of the header (0 = default)
    pub calling_convention: u8,
    /// Number of generic parameters
    pub param_count_generic: u32,
    /// Return type
    pub return_type: TypeSignature,
    /// Parameter types
    pub params: Vec<TypeSignature>,
}

/// A property signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureProperty {
    /// Instance property
    pub has_this: bool,
    /// Property type
    pub base: TypeSignature,
    /// Indexer parameters
    pub params: Vec<TypeSignature>,
}

impl TypeSignature {
    /// The `TypeDefOrRef` token at the leaf of this signature, looking through wrappers,
    /// custom modifiers and generic instantiations.
    #[must_use]
    pub fn leaf_token(&self) -> Option<Token> {
        match self {
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => Some(*token),
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::SzArray(inner)
            | TypeSignature::Pinned(inner)
            | TypeSignature::ModifiedRequired(_, inner)
            | TypeSignature::ModifiedOptional(_, inner)
            | TypeSignature::GenericInst(inner, _) => inner.leaf_token(),
            TypeSignature::Array(array) => array.base.leaf_token(),
            _ => None,
        }
    }

    /// Visit every token referenced by this signature.
    pub fn for_each_token(&self, f: &mut dyn FnMut(Token)) {
        match self {
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => f(*token),
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::SzArray(inner)
            | TypeSignature::Pinned(inner) => inner.for_each_token(f),
            TypeSignature::ModifiedRequired(modifier, inner)
            | TypeSignature::ModifiedOptional(modifier, inner) => {
                f(*modifier);
                inner.for_each_token(f);
            }
            TypeSignature::Array(array) => array.base.for_each_token(f),
            TypeSignature::GenericInst(open, args) => {
                open.for_each_token(f);
                for arg in args {
                    arg.for_each_token(f);
                }
            }
            TypeSignature::FnPtr(method) => method.for_each_token(f),
            _ => {}
        }
    }

    /// Visit every token referenced by this signature, allowing it to be replaced.
    pub fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        match self {
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => f(token),
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::SzArray(inner)
            | TypeSignature::Pinned(inner) => inner.for_each_token_mut(f),
            TypeSignature::ModifiedRequired(modifier, inner)
            | TypeSignature::ModifiedOptional(modifier, inner) => {
                f(modifier);
                inner.for_each_token_mut(f);
            }
            TypeSignature::Array(array) => array.base.for_each_token_mut(f),
            TypeSignature::GenericInst(open, args) => {
                open.for_each_token_mut(f);
                for arg in args {
                    arg.for_each_token_mut(f);
                }
            }
            TypeSignature::FnPtr(method) => method.for_each_token_mut(f),
            _ => {}
        }
    }
}

impl SignatureMethod {
    /// Visit every token in the return type and parameters.
    pub fn for_each_token(&self, f: &mut dyn FnMut(Token)) {
        self.return_type.for_each_token(f);
        for param in &self.params {
            param.for_each_token(f);
        }
    }

    /// Mutable counterpart of [`SignatureMethod::for_each_token`].
    pub fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        self.return_type.for_each_token_mut(f);
        for param in &mut self.params {
            param.for_each_token_mut(f);
        }
    }
}

impl SignatureProperty {
    /// Visit every token in the property type and parameters.
    pub fn for_each_token(&self, f: &mut dyn FnMut(Token)) {
        self.base.for_each_token(f);
        for param in &self.params {
            param.for_each_token(f);
        }
    }

    /// Mutable counterpart of [`SignatureProperty::for_each_token`].
    pub fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        self.base.for_each_token_mut(f);
        for param in &mut self.params {
            param.for_each_token_mut(f);
        }
    }
}
