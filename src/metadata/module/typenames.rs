//! Serialized type names, as custom attribute blobs spell them: `Ns.Outer+Inner`,
//! optionally followed by `, ` and an assembly display name.

use crate::{
    metadata::{
        customattributes::AttributeTypes,
        identity::{short_name, AssemblyIdentity},
        module::{ModuleDef, TypeRef},
        signatures::TypeSignature,
        tables::TableId,
        token::Token,
    },
    Error::{TokenNotFound, TypeNotFound},
    Result,
};

/// Assemblies an unqualified name falls back to when the module does not define it.
const CORE_LIBRARIES: [&str; 4] = [
    "mscorlib",
    "System.Runtime",
    "netstandard",
    "System.Private.CoreLib",
];

/// Split a serialized name into the model's `/`-nested full name and the assembly part.
fn split_name(name: &str) -> Result<(String, Option<&str>)> {
    if name.contains('[') || name.contains('*') || name.contains('&') {
        return Err(unsupported_error!(
            "Constructed type name in custom attribute - {}",
            name
        ));
    }

    let (type_name, assembly) = match name.split_once(',') {
        Some((type_name, assembly)) => (type_name, Some(assembly.trim())),
        None => (name, None),
    };
    let type_name = type_name.trim();
    if type_name.is_empty() {
        return Err(malformed_error!("Empty type name in custom attribute"));
    }

    Ok((type_name.replace('+', "/"), assembly))
}

impl ModuleDef {
    /// Reuse or add the `TypeRef` chain for the `/`-nested `full_name` under `scope`.
    fn add_type_ref_chain(&mut self, mut scope: Token, full_name: &str) -> Token {
        for (position, segment) in full_name.split('/').enumerate() {
            let (namespace, name) = match (position, segment.rsplit_once('.')) {
                (0, Some((namespace, name))) => (namespace.to_string(), name.to_string()),
                _ => (String::new(), segment.to_string()),
            };
            scope = self.add_type_ref(TypeRef {
                scope,
                namespace,
                name,
            });
        }
        scope
    }

    fn is_own_assembly(&self, assembly: &str) -> bool {
        self.assembly
            .as_ref()
            .is_some_and(|identity| identity.name == short_name(assembly))
    }
}

impl AttributeTypes for ModuleDef {
    fn enum_underlying_type(&self, token: Token) -> Option<TypeSignature> {
        let type_def = self.type_def(token).ok()?;
        type_def
            .fields
            .iter()
            .filter_map(|&field| self.field(field).ok())
            // instance field; static literals are the enum members
            .find(|field| field.name == "value__" && field.flags & 0x0010 == 0)
            .map(|field| field.signature.clone())
    }

    fn resolve_type_name(&mut self, name: &str) -> Result<Token> {
        let (full_name, assembly) = split_name(name)?;

        match assembly {
            Some(assembly) if !self.is_own_assembly(assembly) => {
                let identity = AssemblyIdentity::parse(assembly)?;
                let scope = self.add_assembly_ref(&identity);
                Ok(self.add_type_ref_chain(scope, &full_name))
            }
            Some(_) => self.find_type_or_err(&full_name),
            None => {
                if let Some(token) = self.find_type(&full_name) {
                    return Ok(token);
                }
                let existing = self.tokens(TableId::TypeRef).find(|&token| {
                    matches!(self.type_full_name(token), Ok(candidate) if candidate == full_name)
                });
                if let Some(token) = existing {
                    return Ok(token);
                }

                let core = self.tokens(TableId::AssemblyRef).find(|&token| {
                    self.assembly_ref(token)
                        .is_ok_and(|identity| CORE_LIBRARIES.contains(&identity.name.as_str()))
                });
                match core {
                    Some(scope) => Ok(self.add_type_ref_chain(scope, &full_name)),
                    None => Err(TypeNotFound(full_name)),
                }
            }
        }
    }

    fn serialized_type_name(&self, token: Token) -> Result<String> {
        let full_name = self.type_full_name(token)?.replace('/', "+");
        match token.table_id() {
            Some(TableId::TypeDef) => Ok(full_name),
            Some(TableId::TypeRef) => {
                let mut current = token;
                for _ in 0..=self.type_refs.len() {
                    let scope = self.type_ref(current)?.scope;
                    match scope.table_id() {
                        Some(TableId::TypeRef) => current = scope,
                        Some(TableId::AssemblyRef) => {
                            let identity = self.assembly_ref(scope)?;
                            return Ok(format!("{}, {}", full_name, identity.display_name()));
                        }
                        _ => return Ok(full_name),
                    }
                }
                Err(malformed_error!("Cyclic resolution scope at {}", token))
            }
            _ => Err(TokenNotFound(token)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::module::FieldDef, test::ModuleBuilder};

    #[test]
    fn resolves_local_nested_and_qualified_names() {
        let mut builder = ModuleBuilder::new("App");
        let outer = builder.class("App", "Outer");
        let inner = builder.nested_class(outer, "Mode");
        let mut module = builder.build();

        assert_eq!(module.resolve_type_name("App.Outer+Mode").unwrap(), inner);
        assert_eq!(
            module
                .resolve_type_name("App.Outer+Mode, App, Version=1.0.0.0")
                .unwrap(),
            inner
        );
        assert!(module.resolve_type_name("App.Missing, App").is_err());

        let color = module
            .resolve_type_name(
                "Lib.Palette+Color, Lib, Version=2.0.0.0, Culture=neutral, PublicKeyToken=null",
            )
            .unwrap();
        assert_eq!(module.type_full_name(color).unwrap(), "Lib.Palette/Color");
        assert_eq!(module.defining_assembly(color), Some("Lib"));
        assert_eq!(
            module.serialized_type_name(color).unwrap(),
            "Lib.Palette+Color, Lib, Version=2.0.0.0, Culture=neutral, PublicKeyToken=null"
        );
        assert_eq!(module.serialized_type_name(inner).unwrap(), "App.Outer+Mode");

        // resolving the same name again reuses the rows
        let rows = module.type_refs.len();
        module
            .resolve_type_name("Lib.Palette+Color, Lib, Version=2.0.0.0")
            .unwrap();
        assert_eq!(module.type_refs.len(), rows);
    }

    #[test]
    fn unqualified_names_fall_back_to_the_core_library() {
        let mut builder = ModuleBuilder::new("App");
        let mscorlib = builder.assembly_ref("mscorlib");
        let mut module = builder.build();

        let type_token = module.resolve_type_name("System.Type").unwrap();
        assert_eq!(module.type_ref(type_token).unwrap().scope, mscorlib);
        assert_eq!(module.resolve_type_name("System.Type").unwrap(), type_token);

        let mut bare = ModuleDef::new("Bare.dll");
        assert!(matches!(
            bare.resolve_type_name("System.Type"),
            Err(crate::Error::TypeNotFound(_))
        ));
        assert!(matches!(
            bare.resolve_type_name("System.Collections.Generic.List`1[[System.Int32]]"),
            Err(crate::Error::Unsupported { .. })
        ));
    }

    #[test]
    fn enum_backing_field() {
        let mut builder = ModuleBuilder::new("App");
        let mode = builder.value_type("App", "Mode");
        builder.field(mode, "value__", TypeSignature::U2);
        let mut member = FieldDef::new("Fast", TypeSignature::ValueType(mode));
        member.flags = 0x8056;
        builder.module_mut().add_field(mode, member).unwrap();
        let plain = builder.class("App", "Plain");
        let module = builder.build();

        assert_eq!(module.enum_underlying_type(mode), Some(TypeSignature::U2));
        assert_eq!(module.enum_underlying_type(plain), None);
        assert_eq!(
            module.enum_underlying_type(Token::from_parts(TableId::TypeRef, 1)),
            None
        );
    }
}
