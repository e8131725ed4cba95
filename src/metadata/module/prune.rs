//! Token graph walks over a [`ModuleDef`]: reference validation after load and removal of
//! unreferenced reference rows before save.

use std::collections::{HashMap, HashSet};

use strum::IntoEnumIterator;

use crate::{
    metadata::{
        customattributes::CustomAttribute,
        module::{MemberRefSignature, ModuleDef},
        tables::TableId,
        token::Token,
    },
    Result,
};

/// Reference tables that are rebuilt on save. Definitions and user strings are kept as is.
const PRUNED_TABLES: [TableId; 6] = [
    TableId::TypeRef,
    TableId::TypeSpec,
    TableId::MemberRef,
    TableId::MethodSpec,
    TableId::StandAloneSig,
    TableId::AssemblyRef,
];

fn attributes(custom_attributes: &[CustomAttribute], f: &mut dyn FnMut(Token)) {
    for attribute in custom_attributes {
        attribute.for_each_token(f);
    }
}

fn attributes_mut(custom_attributes: &mut [CustomAttribute], f: &mut dyn FnMut(&mut Token)) {
    for attribute in custom_attributes {
        attribute.for_each_token_mut(f);
    }
}

fn retain<T>(rows: &mut Vec<T>, table: TableId, reachable: &HashSet<Token>) {
    let mut index = 0;
    rows.retain(|_| {
        let keep = reachable.contains(&Token::from_index(table, index));
        index += 1;
        keep
    });
}

impl ModuleDef {
    /// Visit every token stored in the row `token`. Unknown rows visit nothing.
    pub(crate) fn row_tokens(&self, token: Token, f: &mut dyn FnMut(Token)) {
        match token.table_id() {
            Some(TableId::TypeRef) => {
                if let Ok(type_ref) = self.type_ref(token) {
                    f(type_ref.scope);
                }
            }
            Some(TableId::TypeDef) => {
                if let Ok(type_def) = self.type_def(token) {
                    if let Some(extends) = type_def.extends {
                        f(extends);
                    }
                    if let Some(enclosing) = type_def.enclosing {
                        f(enclosing);
                    }
                    for generic_param in &type_def.generic_params {
                        generic_param.constraints.iter().for_each(|&c| f(c));
                    }
                    type_def
                        .interfaces
                        .iter()
                        .chain(&type_def.fields)
                        .chain(&type_def.methods)
                        .chain(&type_def.properties)
                        .chain(&type_def.nested_types)
                        .for_each(|&t| f(t));
                    attributes(&type_def.custom_attributes, f);
                }
            }
            Some(TableId::TypeSpec) => {
                if let Ok(type_spec) = self.type_spec(token) {
                    type_spec.signature.for_each_token(f);
                }
            }
            Some(TableId::Field) => {
                if let Ok(field) = self.field(token) {
                    field.signature.for_each_token(f);
                    attributes(&field.custom_attributes, f);
                }
            }
            Some(TableId::MethodDef) => {
                if let Ok(method) = self.method(token) {
                    method.signature.for_each_token(f);
                    for generic_param in &method.generic_params {
                        generic_param.constraints.iter().for_each(|&c| f(c));
                    }
                    if let Some(body) = &method.body {
                        body.for_each_token(f);
                    }
                    for method_override in &method.overrides {
                        f(method_override.body);
                        f(method_override.declaration);
                    }
                    attributes(&method.custom_attributes, f);
                }
            }
            Some(TableId::Property) => {
                if let Ok(property) = self.property(token) {
                    property.signature.for_each_token(f);
                    property
                        .getters
                        .iter()
                        .chain(&property.setters)
                        .chain(&property.others)
                        .for_each(|&t| f(t));
                    attributes(&property.custom_attributes, f);
                }
            }
            Some(TableId::MemberRef) => {
                if let Ok(member_ref) = self.member_ref(token) {
                    f(member_ref.class);
                    match &member_ref.signature {
                        MemberRefSignature::Field(signature) => signature.for_each_token(f),
                        MemberRefSignature::Method(signature) => signature.for_each_token(f),
                    }
                    attributes(&member_ref.custom_attributes, f);
                }
            }
            Some(TableId::MethodSpec) => {
                if let Ok(method_spec) = self.method_spec(token) {
                    f(method_spec.method);
                    for arg in &method_spec.instantiation {
                        arg.for_each_token(f);
                    }
                }
            }
            Some(TableId::StandAloneSig) => {
                if let Ok(stand_alone_sig) = self.stand_alone_sig(token) {
                    stand_alone_sig.signature.for_each_token(f);
                }
            }
            _ => {}
        }
    }

    /// Visit every token stored anywhere in the module, allowing it to be replaced.
    pub(crate) fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        for type_ref in &mut self.type_refs {
            f(&mut type_ref.scope);
        }
        for type_def in &mut self.type_defs {
            if let Some(extends) = &mut type_def.extends {
                f(extends);
            }
            if let Some(enclosing) = &mut type_def.enclosing {
                f(enclosing);
            }
            for generic_param in &mut type_def.generic_params {
                generic_param.constraints.iter_mut().for_each(&mut *f);
            }
            type_def
                .interfaces
                .iter_mut()
                .chain(&mut type_def.fields)
                .chain(&mut type_def.methods)
                .chain(&mut type_def.properties)
                .chain(&mut type_def.nested_types)
                .for_each(&mut *f);
            attributes_mut(&mut type_def.custom_attributes, f);
        }
        for type_spec in &mut self.type_specs {
            type_spec.signature.for_each_token_mut(f);
        }
        for field in &mut self.fields {
            field.signature.for_each_token_mut(f);
            attributes_mut(&mut field.custom_attributes, f);
        }
        for method in &mut self.methods {
            method.signature.for_each_token_mut(f);
            for generic_param in &mut method.generic_params {
                generic_param.constraints.iter_mut().for_each(&mut *f);
            }
            if let Some(body) = &mut method.body {
                body.for_each_token_mut(f);
            }
            for method_override in &mut method.overrides {
                f(&mut method_override.body);
                f(&mut method_override.declaration);
            }
            attributes_mut(&mut method.custom_attributes, f);
        }
        for property in &mut self.properties {
            property.signature.for_each_token_mut(f);
            property
                .getters
                .iter_mut()
                .chain(&mut property.setters)
                .chain(&mut property.others)
                .for_each(&mut *f);
            attributes_mut(&mut property.custom_attributes, f);
        }
        for member_ref in &mut self.member_refs {
            f(&mut member_ref.class);
            match &mut member_ref.signature {
                MemberRefSignature::Field(signature) => signature.for_each_token_mut(f),
                MemberRefSignature::Method(signature) => signature.for_each_token_mut(f),
            }
            attributes_mut(&mut member_ref.custom_attributes, f);
        }
        for method_spec in &mut self.method_specs {
            f(&mut method_spec.method);
            for arg in &mut method_spec.instantiation {
                arg.for_each_token_mut(f);
            }
        }
        for stand_alone_sig in &mut self.stand_alone_sigs {
            stand_alone_sig.signature.for_each_token_mut(f);
        }
        if let Some(image) = &mut self.image {
            image.for_each_token_mut(f);
        }
    }

    /// Check that every stored token of a modeled table names an existing row. Tokens
    /// into tables kept as raw rows (`Param`, `ModuleRef`, ...) are not checked.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] naming the first dangling token.
    pub fn validate(&self) -> Result<()> {
        for table in TableId::iter() {
            for owner in self.tokens(table) {
                let mut dangling = None;
                self.row_tokens(owner, &mut |token| {
                    let modeled = token.table_id().is_some_and(ModuleDef::is_modeled);
                    if dangling.is_none() && modeled && !self.contains(token) {
                        dangling = Some(token);
                    }
                });
                if let Some(token) = dangling {
                    return Err(malformed_error!(
                        "Row {} references missing row {}",
                        owner,
                        token
                    ));
                }
            }
        }

        Ok(())
    }

    /// Remove reference rows that no definition reaches and renumber the survivors.
    ///
    /// Definitions, user strings and resources are never removed. Rows carried over
    /// from the source image keep what they point to alive, except for attributes and
    /// platform rows of a removed reference, which are dropped with it. Returns the
    /// number of removed rows.
    pub fn prune_references(&mut self) -> usize {
        let mut reachable: HashSet<Token> = HashSet::new();
        let mut worklist: Vec<Token> = [TableId::TypeDef, TableId::Field, TableId::MethodDef, TableId::Property]
            .into_iter()
            .flat_map(|table| self.tokens(table))
            .collect();
        if let Some(image) = &self.image {
            image.for_each_strong_token(&mut |token| worklist.push(token));
        }

        while let Some(token) = worklist.pop() {
            if !reachable.insert(token) {
                continue;
            }
            self.row_tokens(token, &mut |next| {
                if !reachable.contains(&next) {
                    worklist.push(next);
                }
            });
        }

        let mut renumbered = HashMap::new();
        let mut removed = 0;
        for table in PRUNED_TABLES {
            let mut next_index = 0;
            for token in self.tokens(table) {
                if reachable.contains(&token) {
                    renumbered.insert(token, Token::from_index(table, next_index));
                    next_index += 1;
                } else {
                    removed += 1;
                }
            }
        }

        if removed == 0 {
            return 0;
        }

        retain(&mut self.type_refs, TableId::TypeRef, &reachable);
        retain(&mut self.type_specs, TableId::TypeSpec, &reachable);
        retain(&mut self.member_refs, TableId::MemberRef, &reachable);
        retain(&mut self.method_specs, TableId::MethodSpec, &reachable);
        retain(&mut self.stand_alone_sigs, TableId::StandAloneSig, &reachable);
        retain(&mut self.assembly_refs, TableId::AssemblyRef, &reachable);
        if let Some(image) = &mut self.image {
            image.retain_rows(&|token| {
                token
                    .table_id()
                    .map_or(true, |table| !PRUNED_TABLES.contains(&table))
                    || reachable.contains(&token)
            });
        }

        self.for_each_token_mut(&mut |token| {
            if let Some(new_token) = renumbered.get(token) {
                *token = *new_token;
            }
        });

        removed
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        metadata::{
            identity::{AssemblyIdentity, AssemblyVersion},
            method::{opcodes, Instruction, MethodBody},
            module::{MemberRef, ModuleDef, TypeDef, TypeRef},
            signatures::{SignatureMethod, TypeSignature},
            tables::TableId,
            token::Token,
        },
        test::ModuleBuilder,
    };

    #[test]
    fn validate_reports_dangling_tokens() {
        let mut module = ModuleDef::new("App.dll");
        module.add_type_def(TypeDef::new("App", "Program").with_base(Token::new(0x0100_0005)));
        assert!(module.validate().is_err());
    }

    #[test]
    fn prune_removes_unused_references() {
        let mut builder = ModuleBuilder::new("App");
        let lib = builder.assembly_ref("Lib");
        let old = builder.assembly_ref("OldLib");
        let used = builder.type_ref(lib, "Lib", "Used");
        let unused = builder.type_ref(old, "OldLib", "Unused");
        let program = builder.class("App", "Program");
        builder.add_member_ref(MemberRef::method(
            unused,
            ".ctor",
            SignatureMethod {
                has_this: true,
                ..Default::default()
            },
        ));

        let body = MethodBody {
            locals: vec![TypeSignature::Class(used)],
            instructions: vec![Instruction::simple(opcodes::RET)],
            ..Default::default()
        };
        builder.method(program, "Main", SignatureMethod::default(), Some(body));
        let mut module = builder.build();

        assert_eq!(module.prune_references(), 3);
        assert_eq!(module.assembly_refs.len(), 1);
        assert_eq!(module.assembly_refs[0].name, "Lib");
        assert_eq!(module.type_refs.len(), 1);
        assert!(module.member_refs.is_empty());

        let main = module.method(Token::from_parts(TableId::MethodDef, 1)).unwrap();
        let local = &main.body.as_ref().unwrap().locals[0];
        assert_eq!(*local, TypeSignature::Class(Token::from_parts(TableId::TypeRef, 1)));
        assert_eq!(
            module.type_ref(Token::from_parts(TableId::TypeRef, 1)).unwrap().scope,
            Token::from_parts(TableId::AssemblyRef, 1)
        );
        module.validate().unwrap();
    }

    #[test]
    fn prune_keeps_nested_scopes() {
        let mut module = ModuleDef::new("App.dll");
        let lib = module.add_assembly_ref(&AssemblyIdentity::new(
            "Lib",
            AssemblyVersion::default(),
        ));
        let outer = module.add_type_ref(TypeRef {
            scope: lib,
            namespace: "Lib".to_string(),
            name: "Outer".to_string(),
        });
        let inner = module.add_type_ref(TypeRef {
            scope: outer,
            namespace: String::new(),
            name: "Inner".to_string(),
        });
        module.add_type_def(TypeDef::new("App", "Derived").with_base(inner));

        assert_eq!(module.prune_references(), 0);
        assert_eq!(module.type_refs.len(), 2);
    }
}
