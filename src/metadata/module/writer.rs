//! Serializes a [`ModuleDef`] into a managed PE file.
//!
//! The tables are regenerated from the model and merged with the raw rows carried over
//! from the source image. Method bodies, embedded resources, the metadata root and a new
//! CLI header are laid out in one section that [`PeLayout::append_section`] adds to the
//! source image, or to an empty [`pe::skeleton`] for modules built in memory.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::{
    file::writer::Writer,
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE, FLAG_STRONG_NAME_SIGNED},
        customattributes::{encode_custom_attribute, CustomAttribute},
        identity::Identity,
        method::{opcodes, Operand},
        module::{
            loader::{
                ASSEMBLY_FLAG_PUBLIC_KEY, SEMANTICS_GETTER, SEMANTICS_OTHER, SEMANTICS_SETTER,
            },
            pe::{self, PeLayout},
            MemberRefSignature, ModuleDef, TypeDef,
        },
        root::Root,
        signatures::{
            encode_field_signature, encode_local_var_signature, encode_method_signature,
            encode_method_spec_signature, encode_property_signature, encode_type_signature,
        },
        streams::{HeapBuilder, StreamHeader, TablesHeader},
        tables::{schema, CodedIndexType, ColumnKind, RawRow, RawValue, TableId},
        token::Token,
    },
    Result,
};

const DEFAULT_RUNTIME_VERSION: &str = "v4.0.30319";
const DEFAULT_TABLES_VERSION: (u8, u8) = (2, 0);
/// Sorted-table bits compilers emit for the tables ECMA-335 requires to be sorted
const DEFAULT_SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;
/// `CALG_SHA1`
const DEFAULT_HASH_ALGORITHM: u32 = 0x8004;

/// Tables that must be sorted by one key column, with that column.
const SORTED_TABLES: [(TableId, usize); 12] = [
    (TableId::InterfaceImpl, 0),
    (TableId::Constant, 1),
    (TableId::CustomAttribute, 0),
    (TableId::FieldMarshal, 0),
    (TableId::DeclSecurity, 1),
    (TableId::ClassLayout, 2),
    (TableId::FieldLayout, 1),
    (TableId::MethodSemantics, 2),
    (TableId::MethodImpl, 0),
    (TableId::ImplMap, 1),
    (TableId::FieldRVA, 1),
    (TableId::NestedClass, 0),
];

fn token(value: Token) -> RawValue {
    RawValue::Token(value)
}

fn string(value: &str) -> RawValue {
    RawValue::Str(value.to_string())
}

fn list_start(table: TableId, index: usize) -> Result<RawValue> {
    let Ok(row) = u32::try_from(index + 1) else {
        return Err(malformed_error!("{} list start {} is too large", table, index));
    };
    Ok(RawValue::Token(Token::from_parts(table, row)))
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Value {} does not fit 32 bits", value))
}

/// New row order of `table` so that the rows owned through `lists` are contiguous in
/// list order. Every row must be owned exactly once.
fn list_order<'a>(
    lists: impl Iterator<Item = &'a [Token]>,
    table: TableId,
    count: usize,
) -> Result<Vec<usize>> {
    let mut order = Vec::with_capacity(count);
    let mut owned = vec![false; count];
    for &member in lists.flatten() {
        let index = member
            .index()
            .filter(|&index| member.is_table(table) && index < count);
        let Some(index) = index else {
            return Err(malformed_error!("List entry {} is not a {} row", member, table));
        };
        if std::mem::replace(&mut owned[index], true) {
            return Err(malformed_error!("{} is listed by more than one type", member));
        }
        order.push(index);
    }
    if order.len() != count {
        return Err(malformed_error!(
            "{} of {} {} rows are not owned by any type",
            count - order.len(),
            count,
            table
        ));
    }
    Ok(order)
}

/// Apply `f` to every token of the module, the raw rows and the entry point.
fn retarget(module: &mut ModuleDef, f: &mut dyn FnMut(&mut Token)) {
    module.for_each_token_mut(f);
    if let Some(image) = &mut module.image {
        let mut entry_point = Token::new(image.cor20.entry_point_token);
        if entry_point.row() != 0 {
            f(&mut entry_point);
            image.cor20.entry_point_token = entry_point.value();
        }
    }
}

/// Move the rows of `table` into `order` (new position to old index) and update every
/// token pointing at them.
fn renumber<T>(
    module: &mut ModuleDef,
    rows: fn(&mut ModuleDef) -> &mut Vec<T>,
    table: TableId,
    order: &[usize],
) {
    if order.iter().enumerate().all(|(position, index)| position == *index) {
        return;
    }

    let mut new_index = vec![0; order.len()];
    for (position, index) in order.iter().enumerate() {
        new_index[*index] = position;
    }
    retarget(module, &mut |token| {
        if token.is_table(table) {
            if let Some(position) = token.index().and_then(|index| new_index.get(index)) {
                *token = Token::from_index(table, *position);
            }
        }
    });

    let mut old: Vec<Option<T>> = std::mem::take(rows(module)).into_iter().map(Some).collect();
    *rows(module) = order.iter().filter_map(|index| old[*index].take()).collect();
}

/// Bring a clone of the module into the shape the tables need: the global type first,
/// fields, methods, parameters and properties contiguous in type order.
fn normalize(module: &mut ModuleDef) -> Result<()> {
    if !module.type_defs.first().is_some_and(TypeDef::is_global) {
        retarget(module, &mut |token| {
            if token.is_table(TableId::TypeDef) && token.row() != 0 {
                *token = Token::from_parts(TableId::TypeDef, token.row() + 1);
            }
        });
        module.type_defs.insert(0, TypeDef::global());
    }

    let field_order = list_order(
        module.type_defs.iter().map(|t| t.fields.as_slice()),
        TableId::Field,
        module.fields.len(),
    )?;
    renumber(module, |m| &mut m.fields, TableId::Field, &field_order);

    let method_order = list_order(
        module.type_defs.iter().map(|t| t.methods.as_slice()),
        TableId::MethodDef,
        module.methods.len(),
    )?;
    renumber_params(module, &method_order)?;
    renumber(module, |m| &mut m.methods, TableId::MethodDef, &method_order);

    let property_order = list_order(
        module.type_defs.iter().map(|t| t.properties.as_slice()),
        TableId::Property,
        module.properties.len(),
    )?;
    renumber(module, |m| &mut m.properties, TableId::Property, &property_order);

    Ok(())
}

/// Move the raw `Param` rows along with their methods.
fn renumber_params(module: &mut ModuleDef, method_order: &[usize]) -> Result<()> {
    let method_count = module.methods.len();
    let Some(image) = &mut module.image else {
        return Ok(());
    };
    if image.param_counts.len() > method_count {
        return Err(malformed_error!(
            "{} parameter lists for {} methods",
            image.param_counts.len(),
            method_count
        ));
    }
    image.param_counts.resize(method_count, 0);

    let mut starts = Vec::with_capacity(method_count);
    let mut next = 0usize;
    for count in &image.param_counts {
        starts.push(next);
        next += *count as usize;
    }
    if next != image.rows(TableId::Param).len() {
        return Err(malformed_error!(
            "Methods own {} parameters, the Param table has {}",
            next,
            image.rows(TableId::Param).len()
        ));
    }

    let mut param_order = Vec::with_capacity(next);
    for index in method_order {
        let start = starts[*index];
        param_order.extend(start..start + image.param_counts[*index] as usize);
    }
    image.param_counts = method_order.iter().map(|index| image.param_counts[*index]).collect();

    if param_order.iter().enumerate().all(|(position, index)| position == *index) {
        return Ok(());
    }
    let mut new_row = vec![0; param_order.len()];
    for (position, index) in param_order.iter().enumerate() {
        new_row[*index] = position;
    }
    if let Some(params) = image.raw_tables.get_mut(&TableId::Param) {
        let mut old: Vec<Option<RawRow>> = std::mem::take(params).into_iter().map(Some).collect();
        *params = param_order.iter().filter_map(|index| old[*index].take()).collect();
    }
    image.for_each_token_mut(&mut |token| {
        if token.is_table(TableId::Param) {
            if let Some(position) = token.index().and_then(|index| new_row.get(index)) {
                *token = Token::from_index(TableId::Param, *position);
            }
        }
    });
    Ok(())
}

/// Stable sort of `rows` by the key column `column`.
fn sort_rows(rows: &mut Vec<RawRow>, table: TableId, column: usize) -> Result<()> {
    let kind = schema(table).get(column).copied();
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        let key = match kind {
            Some(ColumnKind::Coded(coded)) => coded.encode(row.token(column))?,
            _ => row.token(column).row(),
        };
        keyed.push((key, row));
    }
    keyed.sort_by_key(|(key, _)| *key);
    rows.extend(keyed.into_iter().map(|(_, row)| row));
    Ok(())
}

/// Heap layout and RVAs of the new section, collected while it is written.
struct Section {
    base_rva: u32,
    content: Writer,
    /// `#US` offset of every user string
    user_strings: Vec<u32>,
    /// RVA of every method body, 0 for methods without one
    body_rvas: Vec<u32>,
    /// Local variable signature blobs, appended to `StandAloneSig` after the call sites
    local_sigs: Vec<Vec<u8>>,
    /// Offset of every embedded resource in the resource directory
    resource_offsets: Vec<u32>,
    heaps: HeapBuilder,
}

impl Section {
    fn rva(&self) -> Result<u32> {
        let position = to_u32(self.content.pos())?;
        self.base_rva
            .checked_add(position)
            .ok_or_else(|| malformed_error!("Section of {} bytes overflows", position))
    }

    fn write_bodies(&mut self, module: &ModuleDef) -> Result<()> {
        let mut local_tokens: HashMap<Vec<u8>, Token> = HashMap::new();
        for (index, method) in module.methods.iter().enumerate() {
            let Some(body) = &method.body else {
                self.body_rvas.push(0);
                continue;
            };

            let mut body = body.clone();
            for instruction in &mut body.instructions {
                let Operand::Token(literal) = &mut instruction.operand else {
                    continue;
                };
                if instruction.opcode != opcodes::LDSTR {
                    continue;
                }
                let offset = literal
                    .index()
                    .filter(|_| literal.is_table(TableId::UserString))
                    .and_then(|index| self.user_strings.get(index));
                let Some(offset) = offset else {
                    return Err(malformed_error!(
                        "Method {} loads missing user string {}",
                        Token::from_index(TableId::MethodDef, index),
                        literal
                    ));
                };
                *literal = Token::from_parts(TableId::UserString, *offset);
            }

            let local_var_sig = if body.locals.is_empty() {
                Token::new(0)
            } else {
                let blob = encode_local_var_signature(&body.locals)?;
                match local_tokens.get(&blob) {
                    Some(existing) => *existing,
                    None => {
                        self.local_sigs.push(blob.clone());
                        let row = module.stand_alone_sigs.len() + self.local_sigs.len();
                        let token = Token::from_parts(TableId::StandAloneSig, to_u32(row)?);
                        local_tokens.insert(blob, token);
                        token
                    }
                }
            };

            self.content.align(4, 0);
            self.body_rvas.push(self.rva()?);
            body.encode(local_var_sig, &mut self.content)?;
        }
        Ok(())
    }

    /// Write the resource directory, returning its RVA and size.
    fn write_resources(&mut self, module: &ModuleDef) -> Result<(u32, u32)> {
        if module.resources.is_empty() {
            return Ok((0, 0));
        }

        self.content.align(8, 0);
        let start = self.content.pos();
        let rva = self.rva()?;
        for resource in &module.resources {
            self.resource_offsets.push(to_u32(self.content.pos() - start)?);
            self.content.write_le::<u32>(to_u32(resource.data.len())?);
            self.content.write_bytes(&resource.data);
            self.content.align(8, 0);
        }
        Ok((rva, to_u32(self.content.pos() - start)?))
    }
}

/// Builds the rows of every table from the normalized model.
struct TableBuilder<'a> {
    module: &'a ModuleDef,
    section: &'a Section,
    tables: BTreeMap<TableId, Vec<RawRow>>,
}

impl TableBuilder<'_> {
    fn push(&mut self, table: TableId, values: Vec<RawValue>) {
        self.tables.entry(table).or_default().push(RawRow(values));
    }

    fn module_row(&mut self) {
        let mvid = RawValue::Guid(self.module.mvid.to_bytes());
        let row = match self.module.image.as_ref().map(|image| &image.module_row) {
            Some(RawRow(values)) if values.len() == 5 => {
                let mut values = values.clone();
                values[1] = string(&self.module.name);
                values[2] = mvid;
                values
            }
            _ => vec![
                RawValue::Int(0),
                string(&self.module.name),
                mvid,
                RawValue::Guid([0; 16]),
                RawValue::Guid([0; 16]),
            ],
        };
        self.push(TableId::Module, row);
    }

    fn references(&mut self) -> Result<()> {
        let module = self.module;
        for type_ref in &module.type_refs {
            self.push(
                TableId::TypeRef,
                vec![token(type_ref.scope), string(&type_ref.name), string(&type_ref.namespace)],
            );
        }
        for type_spec in &module.type_specs {
            self.push(
                TableId::TypeSpec,
                vec![RawValue::Blob(encode_type_signature(&type_spec.signature)?)],
            );
        }
        for member_ref in &module.member_refs {
            let signature = match &member_ref.signature {
                MemberRefSignature::Field(signature) => encode_field_signature(signature)?,
                MemberRefSignature::Method(signature) => encode_method_signature(signature)?,
            };
            self.push(
                TableId::MemberRef,
                vec![token(member_ref.class), string(&member_ref.name), RawValue::Blob(signature)],
            );
        }
        for method_spec in &module.method_specs {
            self.push(
                TableId::MethodSpec,
                vec![
                    token(method_spec.method),
                    RawValue::Blob(encode_method_spec_signature(&method_spec.instantiation)?),
                ],
            );
        }
        for stand_alone_sig in &module.stand_alone_sigs {
            self.push(
                TableId::StandAloneSig,
                vec![RawValue::Blob(encode_method_signature(&stand_alone_sig.signature)?)],
            );
        }
        for blob in &self.section.local_sigs {
            self.push(TableId::StandAloneSig, vec![RawValue::Blob(blob.clone())]);
        }
        Ok(())
    }

    fn definitions(&mut self) -> Result<()> {
        let module = self.module;
        let param_counts = module.image.as_ref().map(|image| image.param_counts.as_slice());

        let (mut next_field, mut next_method, mut next_property) = (0, 0, 0);
        for (index, type_def) in module.type_defs.iter().enumerate() {
            let owner = Token::from_index(TableId::TypeDef, index);
            self.push(
                TableId::TypeDef,
                vec![
                    RawValue::Int(type_def.flags.bits()),
                    string(&type_def.name),
                    string(&type_def.namespace),
                    token(type_def.extends.unwrap_or(Token::new(0))),
                    list_start(TableId::Field, next_field)?,
                    list_start(TableId::MethodDef, next_method)?,
                ],
            );
            next_field += type_def.fields.len();
            next_method += type_def.methods.len();

            if !type_def.properties.is_empty() {
                self.push(
                    TableId::PropertyMap,
                    vec![token(owner), list_start(TableId::Property, next_property)?],
                );
                next_property += type_def.properties.len();
            }
            for interface in &type_def.interfaces {
                self.push(TableId::InterfaceImpl, vec![token(owner), token(*interface)]);
            }
            if let Some(enclosing) = type_def.enclosing {
                self.push(TableId::NestedClass, vec![token(owner), token(enclosing)]);
            }
            for method in &type_def.methods {
                for method_override in &module.method(*method)?.overrides {
                    self.push(
                        TableId::MethodImpl,
                        vec![
                            token(owner),
                            token(method_override.body),
                            token(method_override.declaration),
                        ],
                    );
                }
            }
        }

        for field in &module.fields {
            self.push(
                TableId::Field,
                vec![
                    RawValue::Int(u32::from(field.flags)),
                    string(&field.name),
                    RawValue::Blob(encode_field_signature(&field.signature)?),
                ],
            );
        }

        let mut next_param = 0;
        for (index, method) in module.methods.iter().enumerate() {
            self.push(
                TableId::MethodDef,
                vec![
                    RawValue::Int(self.section.body_rvas.get(index).copied().unwrap_or(0)),
                    RawValue::Int(u32::from(method.impl_flags)),
                    RawValue::Int(u32::from(method.flags)),
                    string(&method.name),
                    RawValue::Blob(encode_method_signature(&method.signature)?),
                    list_start(TableId::Param, next_param)?,
                ],
            );
            next_param += param_counts
                .and_then(|counts| counts.get(index))
                .map_or(0, |count| *count as usize);
        }

        for (index, property) in module.properties.iter().enumerate() {
            let owner = Token::from_index(TableId::Property, index);
            self.push(
                TableId::Property,
                vec![
                    RawValue::Int(u32::from(property.flags)),
                    string(&property.name),
                    RawValue::Blob(encode_property_signature(&property.signature)?),
                ],
            );
            for (semantics, methods) in [
                (SEMANTICS_GETTER, &property.getters),
                (SEMANTICS_SETTER, &property.setters),
                (SEMANTICS_OTHER, &property.others),
            ] {
                for method in methods {
                    self.push(
                        TableId::MethodSemantics,
                        vec![RawValue::Int(semantics), token(*method), token(owner)],
                    );
                }
            }
        }

        self.generic_params()
    }

    fn generic_params(&mut self) -> Result<()> {
        let module = self.module;
        let owners = module
            .type_defs
            .iter()
            .enumerate()
            .map(|(index, t)| (Token::from_index(TableId::TypeDef, index), &t.generic_params))
            .chain(module.methods.iter().enumerate().map(|(index, m)| {
                (Token::from_index(TableId::MethodDef, index), &m.generic_params)
            }));

        let mut params = Vec::new();
        for (owner, generic_params) in owners {
            let key = CodedIndexType::TypeOrMethodDef.encode(owner)?;
            for (number, param) in generic_params.iter().enumerate() {
                params.push((key, number, owner, param));
            }
        }
        params.sort_by_key(|(key, number, _, _)| (*key, *number));

        for (index, (_, number, owner, param)) in params.iter().enumerate() {
            let Ok(number) = u32::try_from(*number) else {
                return Err(malformed_error!("{} has too many generic parameters", owner));
            };
            self.push(
                TableId::GenericParam,
                vec![
                    RawValue::Int(number),
                    RawValue::Int(u32::from(param.flags)),
                    token(*owner),
                    string(&param.name),
                ],
            );
            let param_token = Token::from_index(TableId::GenericParam, index);
            for constraint in &param.constraints {
                self.push(
                    TableId::GenericParamConstraint,
                    vec![token(param_token), token(*constraint)],
                );
            }
        }
        Ok(())
    }

    fn custom_attributes(&mut self) -> Result<()> {
        let module = self.module;
        let owners: [(TableId, Vec<&Vec<CustomAttribute>>); 5] = [
            (TableId::TypeDef, module.type_defs.iter().map(|t| &t.custom_attributes).collect()),
            (TableId::Field, module.fields.iter().map(|f| &f.custom_attributes).collect()),
            (TableId::MethodDef, module.methods.iter().map(|m| &m.custom_attributes).collect()),
            (TableId::Property, module.properties.iter().map(|p| &p.custom_attributes).collect()),
            (TableId::MemberRef, module.member_refs.iter().map(|m| &m.custom_attributes).collect()),
        ];

        for (table, attribute_lists) in owners {
            for (index, attributes) in attribute_lists.into_iter().enumerate() {
                let parent = Token::from_index(table, index);
                for attribute in attributes {
                    self.push(
                        TableId::CustomAttribute,
                        vec![
                            token(parent),
                            token(attribute.constructor),
                            RawValue::Blob(encode_custom_attribute(attribute, module)?),
                        ],
                    );
                }
            }
        }
        Ok(())
    }

    fn assemblies(&mut self) -> Result<()> {
        let module = self.module;
        let image = module.image.as_ref();

        if let Some(assembly) = &module.assembly {
            let (hash_algorithm, mut flags) = image
                .and_then(|image| image.assembly)
                .unwrap_or((DEFAULT_HASH_ALGORITHM, 0));
            let public_key = match &assembly.strong_name {
                None => Vec::new(),
                Some(Identity::PubKey(key)) => {
                    flags |= ASSEMBLY_FLAG_PUBLIC_KEY;
                    key.clone()
                }
                Some(Identity::Token(_)) => {
                    return Err(malformed_error!(
                        "Assembly '{}' has a public key token instead of a key",
                        assembly.name
                    ))
                }
            };
            let version = &assembly.version;
            self.push(
                TableId::Assembly,
                vec![
                    RawValue::Int(hash_algorithm),
                    RawValue::Int(u32::from(version.major)),
                    RawValue::Int(u32::from(version.minor)),
                    RawValue::Int(u32::from(version.build)),
                    RawValue::Int(u32::from(version.revision)),
                    RawValue::Int(flags),
                    RawValue::Blob(public_key),
                    string(&assembly.name),
                    string(assembly.culture.as_deref().unwrap_or_default()),
                ],
            );
        }

        for identity in &module.assembly_refs {
            let extras = image.and_then(|image| {
                image
                    .assembly_refs
                    .iter()
                    .find(|extras| extras.identity == *identity)
            });
            let mut flags = extras.map_or(0, |extras| extras.flags);
            let key = match &identity.strong_name {
                None => Vec::new(),
                Some(Identity::PubKey(key)) => {
                    flags |= ASSEMBLY_FLAG_PUBLIC_KEY;
                    key.clone()
                }
                Some(Identity::Token(value)) => value.to_le_bytes().to_vec(),
            };
            let version = &identity.version;
            self.push(
                TableId::AssemblyRef,
                vec![
                    RawValue::Int(u32::from(version.major)),
                    RawValue::Int(u32::from(version.minor)),
                    RawValue::Int(u32::from(version.build)),
                    RawValue::Int(u32::from(version.revision)),
                    RawValue::Int(flags),
                    RawValue::Blob(key),
                    string(&identity.name),
                    string(identity.culture.as_deref().unwrap_or_default()),
                    RawValue::Blob(extras.map(|extras| extras.hash.clone()).unwrap_or_default()),
                ],
            );
        }

        for (resource, offset) in module.resources.iter().zip(&self.section.resource_offsets) {
            self.push(
                TableId::ManifestResource,
                vec![
                    RawValue::Int(*offset),
                    RawValue::Int(resource.flags.bits()),
                    string(&resource.name),
                    token(Token::new(0)),
                ],
            );
        }
        Ok(())
    }

    /// Append the raw rows of the source image and restore the sort order of the tables
    /// that need one.
    fn finish(mut self) -> Result<BTreeMap<TableId, Vec<RawRow>>> {
        if let Some(image) = &self.module.image {
            for (table, rows) in &image.raw_tables {
                self.tables.entry(*table).or_default().extend(rows.iter().cloned());
            }
        }
        for (table, column) in SORTED_TABLES {
            if let Some(rows) = self.tables.get_mut(&table) {
                sort_rows(rows, table, column)?;
            }
        }
        Ok(self.tables)
    }
}

fn build_tables(module: &ModuleDef, section: &Section) -> Result<BTreeMap<TableId, Vec<RawRow>>> {
    let mut builder = TableBuilder {
        module,
        section,
        tables: BTreeMap::new(),
    };
    builder.module_row();
    builder.references()?;
    builder.definitions()?;
    builder.custom_attributes()?;
    builder.assemblies()?;
    builder.finish()
}

fn padded(mut data: Vec<u8>) -> Vec<u8> {
    data.resize(data.len().next_multiple_of(4), 0);
    data
}

/// Serialize `module` as a managed PE file.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] when the model cannot be laid out as tables
/// (dangling user strings, members without an owner, values out of range) and the
/// errors of [`PeLayout`] when the source image cannot take another section.
pub(super) fn write(module: &ModuleDef) -> Result<Vec<u8>> {
    let mut module = module.clone();
    normalize(&mut module)?;

    let base = match &module.image {
        Some(image) => image.data.to_vec(),
        None => pe::skeleton(),
    };
    let layout = PeLayout::parse(&base)?;

    let mut section = Section {
        base_rva: layout.next_section_rva()?,
        content: Writer::new(),
        user_strings: Vec::with_capacity(module.user_strings.len()),
        body_rvas: Vec::with_capacity(module.methods.len()),
        local_sigs: Vec::new(),
        resource_offsets: Vec::with_capacity(module.resources.len()),
        heaps: HeapBuilder::default(),
    };
    for value in &module.user_strings {
        let offset = section.heaps.user_strings.intern(value)?;
        section.user_strings.push(offset);
    }

    // the CLI header goes first and is filled in last
    section.content.write_bytes(&[0; COR20_HEADER_SIZE as usize]);
    section.write_bodies(&module)?;
    let (resource_rva, resource_size) = section.write_resources(&module)?;

    let tables = build_tables(&module, &section)?;
    let image = module.image.as_ref();
    let (major_version, minor_version) =
        image.map_or(DEFAULT_TABLES_VERSION, |image| image.tables_version);
    let tables_stream = TablesHeader {
        major_version,
        minor_version,
        sorted: image.map_or(DEFAULT_SORTED_TABLES, |image| image.sorted),
        tables,
    }
    .write(&mut section.heaps)?;

    let streams = [
        ("#~", tables_stream),
        ("#Strings", padded(section.heaps.strings.finish())),
        ("#US", padded(section.heaps.user_strings.finish())),
        ("#GUID", padded(section.heaps.guids.finish())),
        ("#Blob", padded(section.heaps.blobs.finish())),
    ];
    let mut root = Root {
        major_version: 1,
        minor_version: 1,
        version: image.map_or_else(
            || DEFAULT_RUNTIME_VERSION.to_string(),
            |image| image.runtime_version.clone(),
        ),
        flags: 0,
        stream_headers: streams
            .iter()
            .map(|(name, _)| StreamHeader {
                offset: 0,
                size: 0,
                name: (*name).to_string(),
            })
            .collect(),
    };
    let mut offset = to_u32(root.encoded_len())?;
    for (header, (_, data)) in root.stream_headers.iter_mut().zip(&streams) {
        header.offset = offset;
        header.size = to_u32(data.len())?;
        offset += header.size;
    }

    section.content.align(4, 0);
    let meta_data_rva = section.rva()?;
    root.write(&mut section.content);
    for (_, data) in &streams {
        section.content.write_bytes(data);
    }

    let mut cor20 = image.map_or_else(Cor20Header::il_only, |image| image.cor20.clone());
    cor20.cb = COR20_HEADER_SIZE;
    cor20.meta_data_rva = meta_data_rva;
    cor20.meta_data_size = offset;
    cor20.resource_rva = resource_rva;
    cor20.resource_size = resource_size;
    cor20.flags &= !FLAG_STRONG_NAME_SIGNED;
    cor20.strong_name_signature_rva = 0;
    cor20.strong_name_signature_size = 0;
    let mut header = Writer::new();
    cor20.write(&mut header);

    let cor20_rva = section.base_rva;
    let mut content = section.content.into_inner();
    content[..COR20_HEADER_SIZE as usize].copy_from_slice(header.data());

    debug!(
        "Writing module '{}': {} bytes of metadata, {} method bodies",
        module.name,
        offset,
        section.body_rvas.iter().filter(|rva| **rva != 0).count()
    );
    layout.append_section(base, &content, cor20_rva, COR20_HEADER_SIZE)
}
