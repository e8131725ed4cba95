//! Rewriting of metadata and IL references.
//!
//! [`ReferenceRemapper`] walks every type declared by the edited module (depth first,
//! nested types after their enclosing type) and everything reachable from it:
//! attributes, generic constraints, base types, interfaces, fields, properties,
//! methods with their signatures, overrides, locals and instruction operands, and
//! through those the member references, generic method instantiations and type
//! specifications they use.
//!
//! A type reference whose defining assembly is a source assembly is *imported*: the
//! type with the same full name is looked up in the target module and a reference to it
//! (scoped to the target's assembly) replaces the original. Signatures are rewritten
//! structurally, so `SourceLib.Widget[]`, `SourceLib.Widget&` and
//! `List<SourceLib.Widget>` keep their shape and only the leaves change.
//!
//! Every row is visited at most once per run. Methods are marked before their body is
//! processed, which also stops recursion through self- and mutually-recursive calls.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::{
    metadata::{
        customattributes::{CustomAttribute, CustomAttributeArgument, CustomAttributeValue},
        method::{opcodes, Instruction, Operand},
        module::{MemberRefSignature, ModuleDef},
        signatures::{SignatureMethod, SignatureProperty, TypeSignature},
        tables::TableId,
        token::Token,
    },
    remap::{RemapContext, RemapOptions},
    Result,
};

/// Run the reference pass over the context's module.
///
/// Returns the number of imported references.
///
/// # Errors
/// - [`crate::Error::TypeNotFound`] if a referenced source type has no counterpart in
///   the target module, or eager resolution of an imported reference fails
/// - [`crate::Error::Unsupported`] for source references behind pointers, function
///   pointers, pinned locals and multi-dimensional arrays, for attributes whose
///   constructor is a method definition and for operands of unexpected tables
/// - [`crate::Error::TokenNotFound`] for dangling tokens
pub fn remap_references(context: &mut RemapContext) -> Result<usize> {
    let mut remapper = ReferenceRemapper::new(
        &mut context.module,
        &context.target,
        &context.sources,
        context.options,
    );
    remapper.run()?;
    Ok(remapper.remapped())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

/// A single reference pass over one module.
pub struct ReferenceRemapper<'a> {
    module: &'a mut ModuleDef,
    target: &'a ModuleDef,
    sources: &'a BTreeSet<String>,
    options: RemapOptions,
    visited: HashMap<Token, VisitState>,
    remapped: usize,
}

impl<'a> ReferenceRemapper<'a> {
    /// Create a remapper that rewrites `module` in place.
    pub fn new(
        module: &'a mut ModuleDef,
        target: &'a ModuleDef,
        sources: &'a BTreeSet<String>,
        options: RemapOptions,
    ) -> Self {
        ReferenceRemapper {
            module,
            target,
            sources,
            options,
            visited: HashMap::new(),
            remapped: 0,
        }
    }

    /// Number of references imported so far.
    #[must_use]
    pub fn remapped(&self) -> usize {
        self.remapped
    }

    /// Remap everything reachable from the module's types.
    ///
    /// # Errors
    /// See [`remap_references`].
    pub fn run(&mut self) -> Result<()> {
        for type_def in self.module.top_level_types() {
            self.remap_type_def(type_def)?;
        }
        Ok(())
    }

    /// Mark `token` as entered. False if it was entered before.
    fn enter(&mut self, token: Token) -> bool {
        if self.visited.contains_key(&token) {
            return false;
        }
        self.visited.insert(token, VisitState::InProgress);
        true
    }

    fn leave(&mut self, token: Token) {
        self.visited.insert(token, VisitState::Done);
    }

    fn remap_type_def(&mut self, token: Token) -> Result<()> {
        if !self.enter(token) {
            return Ok(());
        }

        self.remap_custom_attributes(token)?;

        let type_def = self.module.type_def(token)?.clone();
        for (index, generic_param) in type_def.generic_params.iter().enumerate() {
            for (position, constraint) in generic_param.constraints.iter().enumerate() {
                let remapped = self.remap_type_token(*constraint)?;
                self.module.type_def_mut(token)?.generic_params[index].constraints[position] =
                    remapped;
            }
        }

        if let Some(extends) = type_def.extends {
            let remapped = self.remap_type_token(extends)?;
            self.module.type_def_mut(token)?.extends = Some(remapped);
        }

        for (index, interface) in type_def.interfaces.iter().enumerate() {
            let remapped = self.remap_type_token(*interface)?;
            self.module.type_def_mut(token)?.interfaces[index] = remapped;
        }

        for field in &type_def.fields {
            self.remap_field(*field)?;
        }
        for property in &type_def.properties {
            self.remap_property(*property)?;
        }
        for method in &type_def.methods {
            self.remap_method(*method)?;
        }

        self.leave(token);

        for nested in &type_def.nested_types {
            self.remap_type_def(*nested)?;
        }
        Ok(())
    }

    fn remap_field(&mut self, token: Token) -> Result<()> {
        if !self.enter(token) {
            return Ok(());
        }

        self.remap_custom_attributes(token)?;
        let signature = self.module.field(token)?.signature.clone();
        let remapped = self.remap_signature(&signature)?;
        self.module.field_mut(token)?.signature = remapped;

        self.leave(token);
        Ok(())
    }

    fn remap_property(&mut self, token: Token) -> Result<()> {
        if !self.enter(token) {
            return Ok(());
        }

        self.remap_custom_attributes(token)?;

        let property = self.module.property(token)?;
        let accessors: Vec<Token> = property
            .getters
            .iter()
            .chain(&property.setters)
            .chain(&property.others)
            .copied()
            .collect();
        for accessor in accessors {
            self.remap_method(accessor)?;
        }

        let signature = self.module.property(token)?.signature.clone();
        let remapped = self.remap_property_signature(&signature)?;
        self.module.property_mut(token)?.signature = remapped;

        self.leave(token);
        Ok(())
    }

    fn remap_method(&mut self, token: Token) -> Result<()> {
        // Calls back into a method that is being processed end here
        if !self.enter(token) {
            return Ok(());
        }

        self.remap_custom_attributes(token)?;

        let signature = self.module.method(token)?.signature.clone();
        let remapped = self.remap_method_signature(&signature)?;
        self.module.method_mut(token)?.signature = remapped;

        let generic_params = self.module.method(token)?.generic_params.clone();
        for (index, generic_param) in generic_params.iter().enumerate() {
            for (position, constraint) in generic_param.constraints.iter().enumerate() {
                let remapped = self.remap_type_token(*constraint)?;
                self.module.method_mut(token)?.generic_params[index].constraints[position] =
                    remapped;
            }
        }

        let overrides = self.module.method(token)?.overrides.clone();
        for method_override in overrides {
            self.remap_method_def_or_ref(method_override.body)?;
            self.remap_method_def_or_ref(method_override.declaration)?;
        }

        if let Some(mut body) = self.module.method_mut(token)?.body.take() {
            let result = self.remap_body(&mut body.locals, &mut body.instructions);
            self.module.method_mut(token)?.body = Some(body);
            result?;
        }

        self.leave(token);
        Ok(())
    }

    fn remap_body(
        &mut self,
        locals: &mut [TypeSignature],
        instructions: &mut [Instruction],
    ) -> Result<()> {
        for local in locals.iter_mut() {
            *local = self.remap_signature(local)?;
        }

        for instruction in instructions.iter_mut() {
            // The operand of calli is a call site signature, not a reference
            if instruction.opcode == opcodes::CALLI {
                continue;
            }
            if let Operand::Token(token) = &mut instruction.operand {
                *token = self.remap_operand(*token)?;
            }
        }
        Ok(())
    }

    /// Remap the row behind an instruction operand. Returns the token the instruction
    /// should carry afterwards.
    fn remap_operand(&mut self, token: Token) -> Result<Token> {
        match token.table_id() {
            Some(TableId::Field) => self.remap_field(token)?,
            Some(TableId::MemberRef) => self.remap_member_ref(token)?,
            Some(TableId::MethodSpec) => self.remap_method_spec(token)?,
            Some(TableId::MethodDef) => self.remap_method(token)?,
            Some(TableId::TypeRef | TableId::TypeSpec | TableId::TypeDef) => {
                return self.remap_type_token(token)
            }
            Some(TableId::UserString) => {}
            _ => {
                return Err(unsupported_error!(
                    "Instruction operand {} has an unsupported table",
                    token
                ))
            }
        }
        Ok(token)
    }

    fn remap_method_def_or_ref(&mut self, token: Token) -> Result<()> {
        match token.table_id() {
            Some(TableId::MethodDef) => self.remap_method(token),
            Some(TableId::MemberRef) => self.remap_member_ref(token),
            _ => Err(unsupported_error!(
                "Expected a method definition or member reference, got {}",
                token
            )),
        }
    }

    fn remap_member_ref(&mut self, token: Token) -> Result<()> {
        if !self.enter(token) {
            return Ok(());
        }

        self.remap_custom_attributes(token)?;

        let class = self.module.member_ref(token)?.class;
        match class.table_id() {
            Some(TableId::TypeRef | TableId::TypeDef | TableId::TypeSpec) => {
                let remapped = self.remap_type_token(class)?;
                self.module.member_ref_mut(token)?.class = remapped;
            }
            Some(TableId::MethodDef) => self.remap_method(class)?,
            _ => {
                return Err(unsupported_error!(
                    "Member reference {} has an unsupported parent {}",
                    token,
                    class
                ))
            }
        }

        let signature = match self.module.member_ref(token)?.signature.clone() {
            MemberRefSignature::Field(field) => {
                MemberRefSignature::Field(self.remap_signature(&field)?)
            }
            MemberRefSignature::Method(method) => {
                MemberRefSignature::Method(self.remap_method_signature(&method)?)
            }
        };
        self.module.member_ref_mut(token)?.signature = signature;

        self.leave(token);
        Ok(())
    }

    fn remap_method_spec(&mut self, token: Token) -> Result<()> {
        if !self.enter(token) {
            return Ok(());
        }

        let method_spec = self.module.method_spec(token)?.clone();
        let instantiation = method_spec
            .instantiation
            .iter()
            .map(|arg| self.remap_signature(arg))
            .collect::<Result<Vec<_>>>()?;
        self.module.method_spec_mut(token)?.instantiation = instantiation;
        self.remap_method_def_or_ref(method_spec.method)?;

        self.leave(token);
        Ok(())
    }

    fn remap_type_spec(&mut self, token: Token) -> Result<()> {
        if !self.enter(token) {
            return Ok(());
        }

        let signature = self.module.type_spec(token)?.signature.clone();
        let remapped = self.remap_signature(&signature)?;
        self.module.type_spec_mut(token)?.signature = remapped;

        self.leave(token);
        Ok(())
    }

    fn remap_custom_attributes(&mut self, owner: Token) -> Result<()> {
        let mut attributes = std::mem::take(self.module.custom_attributes_mut(owner)?);
        let result = attributes
            .iter_mut()
            .try_for_each(|attribute| self.remap_custom_attribute(attribute));
        *self.module.custom_attributes_mut(owner)? = attributes;
        result
    }

    fn remap_custom_attribute(&mut self, attribute: &mut CustomAttribute) -> Result<()> {
        match attribute.constructor.table_id() {
            Some(TableId::MemberRef) => self.remap_member_ref(attribute.constructor)?,
            _ => {
                return Err(unsupported_error!(
                    "Attribute constructor {} is not a member reference",
                    attribute.constructor
                ))
            }
        }

        for argument in &mut attribute.fixed_args {
            self.remap_attribute_argument(argument)?;
        }
        for named in &mut attribute.named_args {
            self.remap_attribute_argument(&mut named.argument)?;
        }
        Ok(())
    }

    fn remap_attribute_argument(&mut self, argument: &mut CustomAttributeArgument) -> Result<()> {
        argument.arg_type = self.remap_signature(&argument.arg_type)?;
        match &mut argument.value {
            CustomAttributeValue::Boxed(inner) => self.remap_attribute_argument(inner),
            CustomAttributeValue::Array(items) => items
                .iter_mut()
                .try_for_each(|item| self.remap_attribute_argument(item)),
            _ => Ok(()),
        }
    }

    fn remap_method_signature(&mut self, signature: &SignatureMethod) -> Result<SignatureMethod> {
        Ok(SignatureMethod {
            return_type: self.remap_signature(&signature.return_type)?,
            params: signature
                .params
                .iter()
                .map(|param| self.remap_signature(param))
                .collect::<Result<_>>()?,
            ..signature.clone()
        })
    }

    fn remap_property_signature(
        &mut self,
        signature: &SignatureProperty,
    ) -> Result<SignatureProperty> {
        Ok(SignatureProperty {
            has_this: signature.has_this,
            base: self.remap_signature(&signature.base)?,
            params: signature
                .params
                .iter()
                .map(|param| self.remap_signature(param))
                .collect::<Result<_>>()?,
        })
    }

    /// Rewrite a signature, keeping its shape and replacing source-declared leaves.
    pub fn remap_signature(&mut self, signature: &TypeSignature) -> Result<TypeSignature> {
        match signature {
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => {
                self.remap_leaf(signature, *token)
            }
            TypeSignature::SzArray(inner) => {
                Ok(TypeSignature::SzArray(Box::new(self.remap_signature(inner)?)))
            }
            TypeSignature::ByRef(inner) => {
                Ok(TypeSignature::ByRef(Box::new(self.remap_signature(inner)?)))
            }
            TypeSignature::ModifiedRequired(modifier, inner) => Ok(TypeSignature::ModifiedRequired(
                self.remap_type_token(*modifier)?,
                Box::new(self.remap_signature(inner)?),
            )),
            TypeSignature::ModifiedOptional(modifier, inner) => Ok(TypeSignature::ModifiedOptional(
                self.remap_type_token(*modifier)?,
                Box::new(self.remap_signature(inner)?),
            )),
            TypeSignature::GenericInst(open, args) => {
                let open = self.remap_signature(open)?;
                let args = args
                    .iter()
                    .map(|arg| self.remap_signature(arg))
                    .collect::<Result<Vec<_>>>()?;
                Ok(TypeSignature::GenericInst(Box::new(open), args))
            }
            TypeSignature::Ptr(_)
            | TypeSignature::Pinned(_)
            | TypeSignature::Array(_)
            | TypeSignature::FnPtr(_) => {
                if self.references_source(signature) {
                    return Err(unsupported_error!(
                        "Cannot remap a pointer, pinned, function pointer or multi-dimensional array reference - {:?}",
                        signature
                    ));
                }
                Ok(signature.clone())
            }
            _ => Ok(signature.clone()),
        }
    }

    fn remap_leaf(&mut self, signature: &TypeSignature, token: Token) -> Result<TypeSignature> {
        match token.table_id() {
            Some(TableId::TypeDef) => Ok(signature.clone()),
            Some(TableId::TypeSpec) => {
                self.remap_type_spec(token)?;
                Ok(signature.clone())
            }
            Some(TableId::TypeRef) => Ok(match self.import(token)? {
                Some((imported, true)) => TypeSignature::ValueType(imported),
                Some((imported, false)) => TypeSignature::Class(imported),
                None => signature.clone(),
            }),
            _ => Err(unsupported_error!(
                "Type signature references {}, which is not a type",
                token
            )),
        }
    }

    /// Remap a `TypeDefOrRef` token. Type specifications keep their row and are rewritten
    /// in place.
    fn remap_type_token(&mut self, token: Token) -> Result<Token> {
        match token.table_id() {
            Some(TableId::TypeDef) => Ok(token),
            Some(TableId::TypeSpec) => {
                self.remap_type_spec(token)?;
                Ok(token)
            }
            Some(TableId::TypeRef) => Ok(self.import(token)?.map_or(token, |(imported, _)| imported)),
            _ => Err(unsupported_error!("{} is not a type reference", token)),
        }
    }

    fn is_source_type(&self, token: Token) -> bool {
        self.module
            .defining_assembly(token)
            .is_some_and(|assembly| self.sources.contains(assembly))
    }

    /// True if any type named by `signature`, looking into type specifications, is
    /// declared by a source assembly.
    fn references_source(&self, signature: &TypeSignature) -> bool {
        let mut pending = Vec::new();
        signature.for_each_token(&mut |token| pending.push(token));

        let mut seen = BTreeSet::new();
        while let Some(token) = pending.pop() {
            if !seen.insert(token) {
                continue;
            }
            if token.is_table(TableId::TypeSpec) {
                if let Ok(type_spec) = self.module.type_spec(token) {
                    type_spec.signature.for_each_token(&mut |inner| pending.push(inner));
                }
            } else if self.is_source_type(token) {
                return true;
            }
        }
        false
    }

    /// Import the target's counterpart of a source-declared type reference. Returns the
    /// new reference and whether it is a value type, or `None` for references that stay.
    fn import(&mut self, type_ref: Token) -> Result<Option<(Token, bool)>> {
        if !self.is_source_type(type_ref) {
            return Ok(None);
        }

        let full_name = self.module.type_full_name(type_ref)?;
        let definition = self.target.find_type_or_err(&full_name)?;
        let imported = self.module.import_type(self.target, definition)?;
        if self.options.eager_resolve {
            self.module.resolve_type_ref(imported, self.target)?;
        }

        debug!("Remapped {} ({} -> {})", full_name, type_ref, imported);
        self.remapped += 1;
        Ok(Some((imported, self.target.is_value_type(definition))))
    }
}
