//! The module model.
//!
//! [`ModuleDef`] owns every declaration and reference of a module in token-indexed
//! arenas: a [`Token`] of table `T` and row `n` refers to element `n - 1` of the arena
//! for `T`. Cross references between rows are always tokens, never pointers, so the
//! model can be cloned, compared, mutated in place and serialized without fix-ups.
//!
//! Modules are loaded from and written to managed PE files (see [`ModuleDef::from_file`]
//! and [`ModuleDef::write_to_file`]). A loaded module remembers its source image: tables
//! the model does not cover are carried over as raw rows, and the rewritten metadata is
//! appended to the original file in a new section.
//!
//! # Examples
//!
//! ```rust
//! use refremap::metadata::{
//!     identity::{AssemblyIdentity, AssemblyVersion},
//!     module::{ModuleDef, TypeDef},
//! };
//!
//! let mut module = ModuleDef::new("Merged.dll");
//! module.assembly = Some(AssemblyIdentity::new("Merged", AssemblyVersion::new(1, 0, 0, 0)));
//!
//! let outer = module.add_type_def(TypeDef::new("Merged.Ui", "Window"));
//! let inner = module.add_nested_type(outer, TypeDef::new("", "Handle"))?;
//!
//! assert_eq!(module.type_full_name(inner)?, "Merged.Ui.Window/Handle");
//! assert_eq!(module.find_type("Merged.Ui.Window/Handle"), Some(inner));
//! # Ok::<(), refremap::Error>(())
//! ```

mod image;
mod loader;
mod pe;
mod prune;
mod typenames;
mod types;
mod writer;

pub use types::*;

use uguid::Guid;

use crate::{
    metadata::{
        customattributes::CustomAttribute,
        identity::AssemblyIdentity,
        resources::ManifestResource,
        signatures::{SignatureMethod, TypeSignature},
        tables::TableId,
        token::Token,
    },
    Error::{TokenNotFound, TypeNotFound},
    Result,
};

macro_rules! row_accessors {
    ($table:ident, $field:ident, $row:ty, $get:ident, $get_mut:ident) => {
        #[doc = concat!("The `", stringify!($table), "` row of `token`.")]
        ///
        /// # Errors
        /// Returns [`crate::Error::TokenNotFound`] if the token does not name an existing row
        /// of that table.
        pub fn $get(&self, token: Token) -> Result<&$row> {
            Self::row_index(token, TableId::$table)
                .and_then(|index| self.$field.get(index))
                .ok_or(TokenNotFound(token))
        }

        #[doc = concat!("Mutable `", stringify!($table), "` row of `token`.")]
        ///
        /// # Errors
        /// Returns [`crate::Error::TokenNotFound`] if the token does not name an existing row
        /// of that table.
        pub fn $get_mut(&mut self, token: Token) -> Result<&mut $row> {
            Self::row_index(token, TableId::$table)
                .and_then(|index| self.$field.get_mut(index))
                .ok_or(TokenNotFound(token))
        }
    };
}

/// A loaded module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDef {
    /// Module file name, e.g. `App.dll`
    pub name: String,
    /// Module version id
    pub mvid: Guid,
    /// Identity of the assembly this module is the manifest of
    pub assembly: Option<AssemblyIdentity>,
    /// `AssemblyRef` table
    pub assembly_refs: Vec<AssemblyIdentity>,
    /// `TypeRef` table
    pub type_refs: Vec<TypeRef>,
    /// `TypeDef` table
    pub type_defs: Vec<TypeDef>,
    /// `TypeSpec` table
    pub type_specs: Vec<TypeSpec>,
    /// `Field` table
    pub fields: Vec<FieldDef>,
    /// `MethodDef` table
    pub methods: Vec<MethodDef>,
    /// `Property` table
    pub properties: Vec<PropertyDef>,
    /// `MemberRef` table
    pub member_refs: Vec<MemberRef>,
    /// `MethodSpec` table
    pub method_specs: Vec<MethodSpec>,
    /// `StandAloneSig` table
    pub stand_alone_sigs: Vec<StandAloneSig>,
    /// User strings, referenced by `ldstr`
    pub user_strings: Vec<String>,
    /// Embedded resources
    pub resources: Vec<ManifestResource>,
    /// The image the module was loaded from, `None` for modules built in memory
    pub(crate) image: Option<image::PeImage>,
}

impl ModuleDef {
    /// Create an empty module. Its only type is the global `<Module>` type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ModuleDef {
            name: name.into(),
            mvid: Guid::ZERO,
            assembly: None,
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            type_defs: vec![TypeDef::global()],
            type_specs: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            member_refs: Vec::new(),
            method_specs: Vec::new(),
            stand_alone_sigs: Vec::new(),
            user_strings: Vec::new(),
            resources: Vec::new(),
            image: None,
        }
    }

    fn row_index(token: Token, table: TableId) -> Option<usize> {
        if token.is_table(table) {
            token.index()
        } else {
            None
        }
    }

    row_accessors!(TypeDef, type_defs, TypeDef, type_def, type_def_mut);
    row_accessors!(TypeRef, type_refs, TypeRef, type_ref, type_ref_mut);
    row_accessors!(TypeSpec, type_specs, TypeSpec, type_spec, type_spec_mut);
    row_accessors!(Field, fields, FieldDef, field, field_mut);
    row_accessors!(MethodDef, methods, MethodDef, method, method_mut);
    row_accessors!(Property, properties, PropertyDef, property, property_mut);
    row_accessors!(MemberRef, member_refs, MemberRef, member_ref, member_ref_mut);
    row_accessors!(MethodSpec, method_specs, MethodSpec, method_spec, method_spec_mut);
    row_accessors!(StandAloneSig, stand_alone_sigs, StandAloneSig, stand_alone_sig, stand_alone_sig_mut);
    row_accessors!(AssemblyRef, assembly_refs, AssemblyIdentity, assembly_ref, assembly_ref_mut);

    /// Attributes of an attribute-carrying row (type, field, method, property or member
    /// reference).
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenNotFound`] for missing rows and rows of other tables.
    pub fn custom_attributes_mut(&mut self, owner: Token) -> Result<&mut Vec<CustomAttribute>> {
        match owner.table_id() {
            Some(TableId::TypeDef) => Ok(&mut self.type_def_mut(owner)?.custom_attributes),
            Some(TableId::Field) => Ok(&mut self.field_mut(owner)?.custom_attributes),
            Some(TableId::MethodDef) => Ok(&mut self.method_mut(owner)?.custom_attributes),
            Some(TableId::Property) => Ok(&mut self.property_mut(owner)?.custom_attributes),
            Some(TableId::MemberRef) => Ok(&mut self.member_ref_mut(owner)?.custom_attributes),
            _ => Err(TokenNotFound(owner)),
        }
    }

    /// Number of rows in `table`. Tables the model does not own have none.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> usize {
        match table {
            TableId::TypeRef => self.type_refs.len(),
            TableId::TypeDef => self.type_defs.len(),
            TableId::Field => self.fields.len(),
            TableId::MethodDef => self.methods.len(),
            TableId::MemberRef => self.member_refs.len(),
            TableId::StandAloneSig => self.stand_alone_sigs.len(),
            TableId::Property => self.properties.len(),
            TableId::TypeSpec => self.type_specs.len(),
            TableId::AssemblyRef => self.assembly_refs.len(),
            TableId::MethodSpec => self.method_specs.len(),
            TableId::UserString => self.user_strings.len(),
            _ => 0,
        }
    }

    /// True for the tables held as typed rows of this model.
    #[must_use]
    pub fn is_modeled(table: TableId) -> bool {
        matches!(
            table,
            TableId::TypeRef
                | TableId::TypeDef
                | TableId::Field
                | TableId::MethodDef
                | TableId::MemberRef
                | TableId::StandAloneSig
                | TableId::Property
                | TableId::TypeSpec
                | TableId::AssemblyRef
                | TableId::MethodSpec
                | TableId::UserString
        )
    }

    /// True if `token` names an existing row.
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        match (token.table_id(), token.index()) {
            (Some(table), Some(index)) => index < self.row_count(table),
            _ => false,
        }
    }

    /// Tokens of all rows of `table`, in row order.
    pub fn tokens(&self, table: TableId) -> impl Iterator<Item = Token> {
        (0..self.row_count(table)).map(move |index| Token::from_index(table, index))
    }

    /// Tokens of the types that are not nested in another type.
    #[must_use]
    pub fn top_level_types(&self) -> Vec<Token> {
        self.type_defs
            .iter()
            .enumerate()
            .filter(|(_, type_def)| type_def.enclosing.is_none())
            .map(|(index, _)| Token::from_index(TableId::TypeDef, index))
            .collect()
    }

    /// Add a top-level type.
    pub fn add_type_def(&mut self, type_def: TypeDef) -> Token {
        self.type_defs.push(TypeDef {
            enclosing: None,
            ..type_def
        });
        Token::from_index(TableId::TypeDef, self.type_defs.len() - 1)
    }

    /// Add a type nested in `enclosing`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenNotFound`] if `enclosing` is not a type of this module.
    pub fn add_nested_type(&mut self, enclosing: Token, type_def: TypeDef) -> Result<Token> {
        self.type_def(enclosing)?;
        self.type_defs.push(TypeDef {
            enclosing: Some(enclosing),
            ..type_def
        });
        let token = Token::from_index(TableId::TypeDef, self.type_defs.len() - 1);
        self.type_def_mut(enclosing)?.nested_types.push(token);
        Ok(token)
    }

    /// Add a field to `owner`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenNotFound`] if `owner` is not a type of this module.
    pub fn add_field(&mut self, owner: Token, field: FieldDef) -> Result<Token> {
        self.type_def(owner)?;
        self.fields.push(field);
        let token = Token::from_index(TableId::Field, self.fields.len() - 1);
        self.type_def_mut(owner)?.fields.push(token);
        Ok(token)
    }

    /// Add a method to `owner`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenNotFound`] if `owner` is not a type of this module.
    pub fn add_method(&mut self, owner: Token, method: MethodDef) -> Result<Token> {
        self.type_def(owner)?;
        self.methods.push(method);
        let token = Token::from_index(TableId::MethodDef, self.methods.len() - 1);
        self.type_def_mut(owner)?.methods.push(token);
        Ok(token)
    }

    /// Add a property to `owner`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenNotFound`] if `owner` is not a type of this module.
    pub fn add_property(&mut self, owner: Token, property: PropertyDef) -> Result<Token> {
        self.type_def(owner)?;
        self.properties.push(property);
        let token = Token::from_index(TableId::Property, self.properties.len() - 1);
        self.type_def_mut(owner)?.properties.push(token);
        Ok(token)
    }

    /// Reuse the `AssemblyRef` matching `identity` or append a new one.
    pub fn add_assembly_ref(&mut self, identity: &AssemblyIdentity) -> Token {
        let index = match self
            .assembly_refs
            .iter()
            .position(|existing| existing.matches(identity))
        {
            Some(index) => index,
            None => {
                self.assembly_refs.push(identity.clone());
                self.assembly_refs.len() - 1
            }
        };
        Token::from_index(TableId::AssemblyRef, index)
    }

    /// Reuse an identical `TypeRef` or append a new one.
    pub fn add_type_ref(&mut self, type_ref: TypeRef) -> Token {
        let index = match self.type_refs.iter().position(|existing| *existing == type_ref) {
            Some(index) => index,
            None => {
                self.type_refs.push(type_ref);
                self.type_refs.len() - 1
            }
        };
        Token::from_index(TableId::TypeRef, index)
    }

    /// Reuse an identical `TypeSpec` or append a new one.
    pub fn add_type_spec(&mut self, signature: TypeSignature) -> Token {
        let index = match self
            .type_specs
            .iter()
            .position(|existing| existing.signature == signature)
        {
            Some(index) => index,
            None => {
                self.type_specs.push(TypeSpec { signature });
                self.type_specs.len() - 1
            }
        };
        Token::from_index(TableId::TypeSpec, index)
    }

    /// Append a member reference.
    pub fn add_member_ref(&mut self, member_ref: MemberRef) -> Token {
        self.member_refs.push(member_ref);
        Token::from_index(TableId::MemberRef, self.member_refs.len() - 1)
    }

    /// Append a generic method instantiation.
    pub fn add_method_spec(&mut self, method_spec: MethodSpec) -> Token {
        self.method_specs.push(method_spec);
        Token::from_index(TableId::MethodSpec, self.method_specs.len() - 1)
    }

    /// Append a stand-alone signature.
    pub fn add_stand_alone_sig(&mut self, signature: SignatureMethod) -> Token {
        self.stand_alone_sigs.push(StandAloneSig { signature });
        Token::from_index(TableId::StandAloneSig, self.stand_alone_sigs.len() - 1)
    }

    /// Append a user string.
    pub fn add_user_string(&mut self, value: impl Into<String>) -> Token {
        self.user_strings.push(value.into());
        Token::from_index(TableId::UserString, self.user_strings.len() - 1)
    }

    /// Full name of a `TypeDef` or `TypeRef`: `Namespace.Name`, with nested types
    /// appended as `/Name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenNotFound`] for other tokens and
    /// [`crate::Error::Malformed`] for a cyclic nesting chain.
    pub fn type_full_name(&self, token: Token) -> Result<String> {
        let mut names = Vec::new();
        let mut current = token;
        let limit = self.type_defs.len() + self.type_refs.len();

        loop {
            if names.len() > limit {
                return Err(malformed_error!("Cyclic nesting chain at {}", token));
            }

            let (namespace, name, outer) = match current.table_id() {
                Some(TableId::TypeDef) => {
                    let type_def = self.type_def(current)?;
                    (&type_def.namespace, &type_def.name, type_def.enclosing)
                }
                Some(TableId::TypeRef) => {
                    let type_ref = self.type_ref(current)?;
                    let outer = type_ref
                        .scope
                        .is_table(TableId::TypeRef)
                        .then_some(type_ref.scope);
                    (&type_ref.namespace, &type_ref.name, outer)
                }
                _ => return Err(TokenNotFound(current)),
            };

            match outer {
                Some(outer) => {
                    names.push(name.as_str());
                    current = outer;
                }
                None => {
                    let mut full_name = if namespace.is_empty() {
                        name.clone()
                    } else {
                        format!("{namespace}.{name}")
                    };
                    for nested in names.iter().rev() {
                        full_name.push('/');
                        full_name.push_str(nested);
                    }
                    return Ok(full_name);
                }
            }
        }
    }

    /// Find a type definition by exact full name.
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<Token> {
        self.tokens(TableId::TypeDef)
            .find(|&token| matches!(self.type_full_name(token), Ok(name) if name == full_name))
    }

    /// Find a type definition by full name.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] if no type has that name.
    pub fn find_type_or_err(&self, full_name: &str) -> Result<Token> {
        self.find_type(full_name)
            .ok_or_else(|| TypeNotFound(full_name.to_string()))
    }

    /// Find a type reference by the short name of its defining assembly and its full name.
    #[must_use]
    pub fn find_type_ref(&self, assembly: &str, full_name: &str) -> Option<Token> {
        self.tokens(TableId::TypeRef).find(|&token| {
            self.defining_assembly(token) == Some(assembly)
                && matches!(self.type_full_name(token), Ok(name) if name == full_name)
        })
    }

    /// True if the type definition derives from `System.ValueType` or `System.Enum`.
    #[must_use]
    pub fn is_value_type(&self, type_def: Token) -> bool {
        let Ok(definition) = self.type_def(type_def) else {
            return false;
        };
        let Some(base) = definition.extends else {
            return false;
        };

        match self.type_full_name(base) {
            Ok(base_name) => {
                (base_name == "System.ValueType" || base_name == "System.Enum")
                    && !matches!(self.type_full_name(type_def), Ok(name) if name == "System.Enum")
            }
            Err(_) => false,
        }
    }

    /// Short name of the assembly that declares the type behind a `TypeDef` or `TypeRef`.
    ///
    /// Types of this module belong to its own assembly; references follow their
    /// resolution scope to an `AssemblyRef`. `None` if the owner cannot be determined.
    #[must_use]
    pub fn defining_assembly(&self, token: Token) -> Option<&str> {
        match token.table_id()? {
            TableId::TypeDef => {
                self.type_def(token).ok()?;
                self.assembly.as_ref().map(|assembly| assembly.name.as_str())
            }
            TableId::TypeRef => {
                let mut current = token;
                for _ in 0..=self.type_refs.len() {
                    let scope = self.type_ref(current).ok()?.scope;
                    match scope.table_id()? {
                        TableId::TypeRef => current = scope,
                        TableId::AssemblyRef => {
                            return self.assembly_ref(scope).ok().map(|a| a.name.as_str());
                        }
                        _ => return None,
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Short names of all referenced assemblies.
    pub fn assembly_ref_names(&self) -> impl Iterator<Item = &str> {
        self.assembly_refs.iter().map(|identity| identity.name.as_str())
    }

    /// Create (or reuse) a reference to the type definition `type_def` of `target`.
    ///
    /// The `AssemblyRef` carries the target's assembly identity; nested types are
    /// scoped to the reference of their enclosing type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `target` has no assembly identity,
    /// [`crate::Error::TokenNotFound`] for an unknown type and [`crate::Error::Malformed`]
    /// for a cyclic nesting chain in `target`.
    pub fn import_type(&mut self, target: &ModuleDef, type_def: Token) -> Result<Token> {
        let identity = target.assembly.as_ref().ok_or_else(|| {
            crate::Error::Error(format!(
                "Target module '{}' does not define an assembly",
                target.name
            ))
        })?;

        let mut chain = Vec::new();
        let mut current = Some(type_def);
        while let Some(token) = current {
            if chain.len() > target.type_defs.len() {
                return Err(malformed_error!("Cyclic nesting chain at {}", type_def));
            }
            let definition = target.type_def(token)?;
            chain.push(definition);
            current = definition.enclosing;
        }

        let mut scope = self.add_assembly_ref(identity);
        for definition in chain.iter().rev() {
            scope = self.add_type_ref(TypeRef {
                scope,
                namespace: definition.namespace.clone(),
                name: definition.name.clone(),
            });
        }

        Ok(scope)
    }

    /// Resolve a `TypeRef` of this module to a type definition of `target`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] if the reference is not scoped to the
    /// target's assembly or the target has no type of that name.
    pub fn resolve_type_ref(&self, type_ref: Token, target: &ModuleDef) -> Result<Token> {
        let full_name = self.type_full_name(type_ref)?;
        let target_name = target.assembly.as_ref().map(|assembly| assembly.name.as_str());
        match (self.defining_assembly(type_ref), target_name) {
            (Some(scope), Some(target_name)) if scope == target_name => {
                target.find_type_or_err(&full_name)
            }
            _ => Err(TypeNotFound(full_name)),
        }
    }
}
