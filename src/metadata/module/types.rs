use bitflags::bitflags;

use crate::metadata::{
    customattributes::CustomAttribute,
    method::MethodBody,
    signatures::{SignatureMethod, SignatureProperty, TypeSignature},
    token::Token,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// `TypeDef` flags - ECMA-335 II.23.1.15
    pub struct TypeAttributes: u32 {
        /// Visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Nested, visible everywhere
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested, visible to the enclosing type only
        const NESTED_PRIVATE = 0x0000_0003;
        /// Fields are laid out sequentially
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Interface
        const INTERFACE = 0x0000_0020;
        /// Cannot be instantiated
        const ABSTRACT = 0x0000_0080;
        /// Cannot be derived from
        const SEALED = 0x0000_0100;
        /// Name has special meaning to the runtime
        const SPECIAL_NAME = 0x0000_0400;
        /// Initialize the type before the first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

/// Name of the type holding global fields and methods
pub const GLOBAL_TYPE_NAME: &str = "<Module>";

/// A generic parameter of a type or method definition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenericParam {
    /// Parameter name, e.g. `T`
    pub name: String,
    /// `GenericParamAttributes`: variance and special constraints
    pub flags: u16,
    /// Constraint types (`TypeDef`, `TypeRef` or `TypeSpec` tokens)
    pub constraints: Vec<Token>,
}

/// A type declared by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Namespace, empty for nested types and the global namespace
    pub namespace: String,
    /// Simple name, including a `` `N`` generic arity suffix
    pub name: String,
    /// Flags
    pub flags: TypeAttributes,
    /// Base type (`TypeDef`, `TypeRef` or `TypeSpec`)
    pub extends: Option<Token>,
    /// Implemented interfaces
    pub interfaces: Vec<Token>,
    /// Generic parameters, in declaration order
    pub generic_params: Vec<GenericParam>,
    /// Owned fields
    pub fields: Vec<Token>,
    /// Owned methods
    pub methods: Vec<Token>,
    /// Owned properties
    pub properties: Vec<Token>,
    /// Directly nested types
    pub nested_types: Vec<Token>,
    /// Enclosing type, for nested types
    pub enclosing: Option<Token>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl TypeDef {
    /// Create an empty public class.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef {
            namespace: namespace.into(),
            name: name.into(),
            flags: TypeAttributes::PUBLIC,
            extends: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            nested_types: Vec::new(),
            enclosing: None,
            custom_attributes: Vec::new(),
        }
    }

    /// The global `<Module>` type every module starts with.
    #[must_use]
    pub fn global() -> Self {
        TypeDef {
            flags: TypeAttributes::empty(),
            ..TypeDef::new("", GLOBAL_TYPE_NAME)
        }
    }

    /// True for the global `<Module>` type.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.name == GLOBAL_TYPE_NAME && self.namespace.is_empty() && self.enclosing.is_none()
    }

    /// Type with the given base type.
    #[must_use]
    pub fn with_base(mut self, extends: Token) -> Self {
        self.extends = Some(extends);
        self
    }
}

/// A reference to a type declared in another assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Resolution scope: an `AssemblyRef`, or the enclosing `TypeRef` of a nested type
    pub scope: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
}

/// A constructed type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSpec {
    /// The type signature
    pub signature: TypeSignature,
}

/// A field declared by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// `FieldAttributes`
    pub flags: u16,
    /// Field type
    pub signature: TypeSignature,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl FieldDef {
    /// Public instance field of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: TypeSignature) -> Self {
        FieldDef {
            name: name.into(),
            flags: 0x0006,
            signature,
            custom_attributes: Vec::new(),
        }
    }
}

/// An explicit interface implementation (`MethodImpl`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodOverride {
    /// The implementing method
    pub body: Token,
    /// The implemented declaration, a `MethodDef` or `MemberRef`
    pub declaration: Token,
}

/// A method declared by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// `MethodAttributes`
    pub flags: u16,
    /// `MethodImplAttributes`
    pub impl_flags: u16,
    /// Signature
    pub signature: SignatureMethod,
    /// Generic parameters, in declaration order
    pub generic_params: Vec<GenericParam>,
    /// Body, `None` for abstract and extern methods
    pub body: Option<MethodBody>,
    /// Explicit overrides
    pub overrides: Vec<MethodOverride>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl MethodDef {
    /// Public method without a body.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: SignatureMethod) -> Self {
        MethodDef {
            name: name.into(),
            flags: 0x0006,
            impl_flags: 0,
            signature,
            generic_params: Vec::new(),
            body: None,
            overrides: Vec::new(),
            custom_attributes: Vec::new(),
        }
    }

    /// Method with the given body.
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }
}

/// A property declared by the module.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// `PropertyAttributes`
    pub flags: u16,
    /// Signature
    pub signature: SignatureProperty,
    /// Getter methods
    pub getters: Vec<Token>,
    /// Setter methods
    pub setters: Vec<Token>,
    /// Other accessor methods
    pub others: Vec<Token>,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// Signature of a member reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberRefSignature {
    /// Referenced field type
    Field(TypeSignature),
    /// Referenced method signature
    Method(SignatureMethod),
}

/// A reference to a field or method, usually declared in another assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRef {
    /// Owning class: `TypeRef`, `TypeDef`, `TypeSpec` or `MethodDef` (vararg call sites)
    pub class: Token,
    /// Member name
    pub name: String,
    /// Signature
    pub signature: MemberRefSignature,
    /// Attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl MemberRef {
    /// Method reference without attributes.
    #[must_use]
    pub fn method(class: Token, name: impl Into<String>, signature: SignatureMethod) -> Self {
        MemberRef {
            class,
            name: name.into(),
            signature: MemberRefSignature::Method(signature),
            custom_attributes: Vec::new(),
        }
    }

    /// Field reference without attributes.
    #[must_use]
    pub fn field(class: Token, name: impl Into<String>, signature: TypeSignature) -> Self {
        MemberRef {
            class,
            name: name.into(),
            signature: MemberRefSignature::Field(signature),
            custom_attributes: Vec::new(),
        }
    }
}

/// An instantiation of a generic method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSpec {
    /// Generic method, a `MethodDef` or `MemberRef`
    pub method: Token,
    /// Generic arguments
    pub instantiation: Vec<TypeSignature>,
}

/// A stand-alone method signature, used by `calli`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StandAloneSig {
    /// Call site signature
    pub signature: SignatureMethod,
}
