//! Builds a [`ModuleDef`] from the metadata of a managed PE image.
//!
//! Tables the model owns are decoded into typed rows. Everything else (parameters,
//! constants, events, P/Invoke maps, layout information, security and exported types)
//! stays in [`PeImage`] as raw rows and is written back next to the regenerated tables.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use log::debug;
use uguid::Guid;

use crate::{
    file::{io::read_le, File},
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        customattributes::{parse_custom_attribute, CustomAttribute},
        identity::{AssemblyIdentity, AssemblyVersion, Identity},
        method::{opcodes, MethodBody, Operand},
        module::{
            image::{AssemblyRefExtras, PeImage},
            FieldDef, GenericParam, MemberRef, MemberRefSignature, MethodDef, MethodOverride,
            MethodSpec, ModuleDef, PropertyDef, TypeAttributes, TypeDef, TypeRef, TypeSpec,
        },
        resources::{ManifestResource, ManifestResourceAttributes},
        root::Root,
        signatures::{
            parse_field_signature, parse_local_var_signature, parse_method_signature,
            parse_method_spec_signature, parse_property_signature, parse_type_signature,
            TypeSignature, SIGNATURE_HEADER,
        },
        streams::{Heaps, TablesHeader, UserStrings},
        tables::{RawRow, RawValue, TableId},
        token::Token,
    },
    Result,
};

/// `AssemblyFlags.PublicKey`: the key column holds the full public key
pub(crate) const ASSEMBLY_FLAG_PUBLIC_KEY: u32 = 0x0001;

/// `MethodImplAttributes.CodeTypeMask`
const CODE_TYPE_MASK: u16 = 0x0003;

/// `MethodSemanticsAttributes`
pub(crate) const SEMANTICS_SETTER: u32 = 0x0001;
pub(crate) const SEMANTICS_GETTER: u32 = 0x0002;
pub(crate) const SEMANTICS_OTHER: u32 = 0x0004;

fn to_u16(value: u32) -> u16 {
    #[allow(clippy::cast_possible_truncation)]
    let value = value as u16;
    value
}

fn version(row: &RawRow, first: usize) -> AssemblyVersion {
    AssemblyVersion::new(
        to_u16(row.int(first)),
        to_u16(row.int(first + 1)),
        to_u16(row.int(first + 2)),
        to_u16(row.int(first + 3)),
    )
}

fn culture(row: &RawRow, column: usize) -> Option<String> {
    let culture = row.str(column);
    (!culture.is_empty() && culture != "neutral").then(|| culture.to_string())
}

/// Split a list column (`FieldList`, `MethodList`, ...) into per-row ranges of 0-based
/// indices into a table of `count` rows.
fn ranges(starts: &[u32], count: usize, table: TableId) -> Result<Vec<std::ops::Range<usize>>> {
    let mut ranges = Vec::with_capacity(starts.len());
    for (position, start) in starts.iter().enumerate() {
        let start = (*start as usize).max(1) - 1;
        let end = match starts.get(position + 1) {
            Some(next) => (*next as usize).max(1) - 1,
            None => count,
        };
        if start > end || end > count {
            return Err(malformed_error!(
                "Invalid {} list: rows {}..{} of {}",
                table,
                start + 1,
                end + 1,
                count
            ));
        }
        ranges.push(start..end);
    }
    Ok(ranges)
}

struct Loader<'a> {
    file: &'a File,
    cor20: Cor20Header,
    tables: BTreeMap<TableId, Vec<RawRow>>,
    user_strings: UserStrings<'a>,
    module: ModuleDef,
    /// Raw `StandAloneSig` tokens of call site signatures, mapped to model tokens
    call_sites: HashMap<Token, Token>,
    /// Raw `StandAloneSig` tokens of local variable signatures
    locals: HashMap<Token, Vec<TypeSignature>>,
    /// `#US` offsets already turned into user string rows
    literals: HashMap<u32, Token>,
    raw: BTreeMap<TableId, Vec<RawRow>>,
}

impl Loader<'_> {
    fn take(&mut self, table: TableId) -> Vec<RawRow> {
        self.tables.remove(&table).unwrap_or_default()
    }

    fn keep_raw(&mut self, table: TableId, row: RawRow) {
        self.raw.entry(table).or_default().push(row);
    }

    fn load_module(&mut self) -> Result<RawRow> {
        let Some(row) = self.take(TableId::Module).into_iter().next() else {
            return Err(malformed_error!("Module table is empty"));
        };
        self.module.name = row.str(1).to_string();
        self.module.mvid = Guid::from_bytes(row.guid(2));
        Ok(row)
    }

    fn load_assembly(&mut self) -> Option<(u32, u32)> {
        let row = self.take(TableId::Assembly).into_iter().next()?;
        let mut identity = AssemblyIdentity::new(row.str(7), version(&row, 1));
        identity.culture = culture(&row, 8);
        let public_key = row.blob(6);
        if !public_key.is_empty() {
            identity.strong_name = Some(Identity::PubKey(public_key.to_vec()));
        }
        self.module.assembly = Some(identity);
        Some((row.int(0), row.int(5) & !ASSEMBLY_FLAG_PUBLIC_KEY))
    }

    fn load_assembly_refs(&mut self) -> Result<Vec<AssemblyRefExtras>> {
        let mut extras = Vec::new();
        for row in self.take(TableId::AssemblyRef) {
            let flags = row.int(4);
            let mut identity = AssemblyIdentity::new(row.str(6), version(&row, 0));
            identity.culture = culture(&row, 7);
            let key = row.blob(5);
            identity.strong_name = match key.len() {
                0 => None,
                _ if flags & ASSEMBLY_FLAG_PUBLIC_KEY != 0 => {
                    Some(Identity::PubKey(key.to_vec()))
                }
                8 => {
                    let mut token = [0u8; 8];
                    token.copy_from_slice(key);
                    Some(Identity::Token(u64::from_le_bytes(token)))
                }
                other => {
                    return Err(malformed_error!(
                        "AssemblyRef '{}' has a public key token of {} bytes",
                        identity.name,
                        other
                    ))
                }
            };

            extras.push(AssemblyRefExtras {
                identity: identity.clone(),
                flags: flags & !ASSEMBLY_FLAG_PUBLIC_KEY,
                hash: row.blob(8).to_vec(),
            });
            self.module.assembly_refs.push(identity);
        }
        Ok(extras)
    }

    fn load_signatures(&mut self) -> Result<()> {
        for row in self.take(TableId::TypeRef) {
            self.module.type_refs.push(TypeRef {
                scope: row.token(0),
                name: row.str(1).to_string(),
                namespace: row.str(2).to_string(),
            });
        }

        for row in self.take(TableId::TypeSpec) {
            self.module.type_specs.push(TypeSpec {
                signature: parse_type_signature(row.blob(0))?,
            });
        }

        for row in self.take(TableId::MemberRef) {
            let blob = row.blob(2);
            let signature = if blob.first() == Some(&SIGNATURE_HEADER::FIELD) {
                MemberRefSignature::Field(parse_field_signature(blob)?)
            } else {
                MemberRefSignature::Method(parse_method_signature(blob)?)
            };
            self.module.member_refs.push(MemberRef {
                class: row.token(0),
                name: row.str(1).to_string(),
                signature,
                custom_attributes: Vec::new(),
            });
        }

        for row in self.take(TableId::MethodSpec) {
            self.module.method_specs.push(MethodSpec {
                method: row.token(0),
                instantiation: parse_method_spec_signature(row.blob(1))?,
            });
        }

        for (index, row) in self.take(TableId::StandAloneSig).into_iter().enumerate() {
            let raw_token = Token::from_index(TableId::StandAloneSig, index);
            let blob = row.blob(0);
            if blob.first() == Some(&SIGNATURE_HEADER::LOCAL_SIG) {
                self.locals.insert(raw_token, parse_local_var_signature(blob)?);
                continue;
            }

            let signature = parse_method_signature(blob).map_err(|error| {
                unsupported_error!("Stand-alone signature {} - {}", raw_token, error)
            })?;
            let token = self.module.add_stand_alone_sig(signature);
            self.call_sites.insert(raw_token, token);
        }

        Ok(())
    }

    fn load_definitions(&mut self) -> Result<Vec<u32>> {
        let field_rows = self.take(TableId::Field);
        let method_rows = self.take(TableId::MethodDef);
        let property_rows = self.take(TableId::Property);
        let param_count = self.tables.get(&TableId::Param).map_or(0, Vec::len);

        for row in &field_rows {
            self.module.fields.push(FieldDef {
                name: row.str(1).to_string(),
                flags: to_u16(row.int(0)),
                signature: parse_field_signature(row.blob(2))?,
                custom_attributes: Vec::new(),
            });
        }

        let param_starts: Vec<u32> = method_rows.iter().map(|row| row.token(5).row()).collect();
        let param_counts = ranges(&param_starts, param_count, TableId::Param)?
            .into_iter()
            .map(|range| u32::try_from(range.len()).unwrap_or(u32::MAX))
            .collect();

        for (index, row) in method_rows.iter().enumerate() {
            let token = Token::from_index(TableId::MethodDef, index);
            let mut method = MethodDef::new(row.str(3), parse_method_signature(row.blob(4))?);
            method.impl_flags = to_u16(row.int(1));
            method.flags = to_u16(row.int(2));

            let rva = row.int(0);
            if rva != 0 {
                if method.impl_flags & CODE_TYPE_MASK != 0 {
                    return Err(unsupported_error!(
                        "Method {} '{}' has native code",
                        token,
                        method.name
                    ));
                }
                method.body = Some(self.load_body(token, rva)?);
            }
            self.module.methods.push(method);
        }

        for row in &property_rows {
            self.module.properties.push(PropertyDef {
                name: row.str(1).to_string(),
                flags: to_u16(row.int(0)),
                signature: parse_property_signature(row.blob(2))?,
                getters: Vec::new(),
                setters: Vec::new(),
                others: Vec::new(),
                custom_attributes: Vec::new(),
            });
        }

        let type_rows = self.take(TableId::TypeDef);
        let field_starts: Vec<u32> = type_rows.iter().map(|row| row.token(4).row()).collect();
        let method_starts: Vec<u32> = type_rows.iter().map(|row| row.token(5).row()).collect();
        let field_ranges = ranges(&field_starts, field_rows.len(), TableId::Field)?;
        let method_ranges = ranges(&method_starts, method_rows.len(), TableId::MethodDef)?;

        for ((row, fields), methods) in type_rows.iter().zip(field_ranges).zip(method_ranges) {
            let mut type_def = TypeDef::new(row.str(2), row.str(1));
            type_def.flags = TypeAttributes::from_bits_retain(row.int(0));
            let extends = row.token(3);
            type_def.extends = (extends.row() != 0).then_some(extends);
            type_def.fields = fields
                .map(|index| Token::from_index(TableId::Field, index))
                .collect();
            type_def.methods = methods
                .map(|index| Token::from_index(TableId::MethodDef, index))
                .collect();
            self.module.type_defs.push(type_def);
        }

        Ok(param_counts)
    }

    fn load_body(&mut self, method: Token, rva: u32) -> Result<MethodBody> {
        let offset = self.file.rva_to_offset(rva as usize)?;
        let Some(data) = self.file.data().get(offset..) else {
            return Err(out_of_bounds_error!());
        };
        let decoded = MethodBody::decode(data)?;
        let mut body = decoded.body;

        if !decoded.local_var_sig.is_null() {
            let Some(locals) = self.locals.get(&decoded.local_var_sig) else {
                return Err(malformed_error!(
                    "Method {} uses {} as its locals signature",
                    method,
                    decoded.local_var_sig
                ));
            };
            body.locals.clone_from(locals);
        }

        for instruction in &mut body.instructions {
            let Operand::Token(token) = &mut instruction.operand else {
                continue;
            };
            if instruction.opcode == opcodes::LDSTR {
                *token = self.user_string(*token)?;
            } else if token.is_table(TableId::StandAloneSig) {
                let Some(call_site) = self.call_sites.get(token) else {
                    return Err(malformed_error!(
                        "Method {} calls through locals signature {}",
                        method,
                        token
                    ));
                };
                *token = *call_site;
            }
        }

        Ok(body)
    }

    fn user_string(&mut self, token: Token) -> Result<Token> {
        if !token.is_table(TableId::UserString) {
            return Err(malformed_error!("ldstr operand {} is not a user string", token));
        }
        if let Some(existing) = self.literals.get(&token.row()) {
            return Ok(*existing);
        }
        let value = self.user_strings.get(token.row() as usize)?;
        let model = self.module.add_user_string(value);
        self.literals.insert(token.row(), model);
        Ok(model)
    }

    fn load_type_relations(&mut self) -> Result<()> {
        for row in self.take(TableId::NestedClass) {
            let (nested, enclosing) = (row.token(0), row.token(1));
            self.module.type_def(enclosing)?;
            self.module.type_def_mut(nested)?.enclosing = Some(enclosing);
            self.module.type_def_mut(enclosing)?.nested_types.push(nested);
        }

        for row in self.take(TableId::InterfaceImpl) {
            let interface = row.token(1);
            self.module.type_def_mut(row.token(0))?.interfaces.push(interface);
        }

        let property_maps = self.take(TableId::PropertyMap);
        let starts: Vec<u32> = property_maps.iter().map(|row| row.token(1).row()).collect();
        let property_ranges = ranges(&starts, self.module.properties.len(), TableId::Property)?;
        for (row, properties) in property_maps.iter().zip(property_ranges) {
            self.module.type_def_mut(row.token(0))?.properties = properties
                .map(|index| Token::from_index(TableId::Property, index))
                .collect();
        }

        for row in self.take(TableId::MethodSemantics) {
            let (semantics, method, association) = (row.int(0), row.token(1), row.token(2));
            if !association.is_table(TableId::Property) {
                self.keep_raw(TableId::MethodSemantics, row);
                continue;
            }
            let property = self.module.property_mut(association)?;
            match semantics {
                SEMANTICS_GETTER => property.getters.push(method),
                SEMANTICS_SETTER => property.setters.push(method),
                _ => property.others.push(method),
            }
        }

        for row in self.take(TableId::MethodImpl) {
            let (body, declaration) = (row.token(1), row.token(2));
            if !body.is_table(TableId::MethodDef) {
                return Err(unsupported_error!(
                    "Method override implemented by member reference {}",
                    body
                ));
            }
            self.module
                .method_mut(body)?
                .overrides
                .push(MethodOverride { body, declaration });
        }

        self.load_generic_params()
    }

    fn load_generic_params(&mut self) -> Result<()> {
        let mut params: Vec<(usize, RawRow)> =
            self.take(TableId::GenericParam).into_iter().enumerate().collect();
        params.sort_by_key(|(_, row)| (row.token(2).value(), row.int(0)));

        let mut placed = HashMap::new();
        for (index, row) in params {
            let owner = row.token(2);
            let generic_params = match owner.table_id() {
                Some(TableId::TypeDef) => &mut self.module.type_def_mut(owner)?.generic_params,
                Some(TableId::MethodDef) => &mut self.module.method_mut(owner)?.generic_params,
                _ => return Err(malformed_error!("Generic parameter owned by {}", owner)),
            };
            generic_params.push(GenericParam {
                name: row.str(3).to_string(),
                flags: to_u16(row.int(1)),
                constraints: Vec::new(),
            });
            placed.insert(
                Token::from_index(TableId::GenericParam, index),
                (owner, generic_params.len() - 1),
            );
        }

        for row in self.take(TableId::GenericParamConstraint) {
            let Some((owner, position)) = placed.get(&row.token(0)).copied() else {
                return Err(malformed_error!("Constraint of missing {}", row.token(0)));
            };
            let generic_params = if owner.is_table(TableId::TypeDef) {
                &mut self.module.type_def_mut(owner)?.generic_params
            } else {
                &mut self.module.method_mut(owner)?.generic_params
            };
            generic_params[position].constraints.push(row.token(1));
        }

        Ok(())
    }

    fn load_resources(&mut self) -> Result<()> {
        for row in self.take(TableId::ManifestResource) {
            if row.token(3).row() != 0 {
                self.keep_raw(TableId::ManifestResource, row);
                continue;
            }
            if self.cor20.resource_rva == 0 {
                return Err(malformed_error!(
                    "Embedded resource '{}' without a resource directory",
                    row.str(2)
                ));
            }

            let start = self.file.rva_to_offset(self.cor20.resource_rva as usize)?;
            let Some(offset) = start.checked_add(row.int(0) as usize) else {
                return Err(out_of_bounds_error!());
            };
            let length = read_le::<u32>(self.file.data_slice(offset, 4)?)? as usize;
            let data = self.file.data_slice(offset + 4, length)?.to_vec();

            self.module.resources.push(ManifestResource {
                name: row.str(2).to_string(),
                flags: ManifestResourceAttributes::from_bits_retain(row.int(1)),
                data,
            });
        }
        Ok(())
    }

    fn load_custom_attributes(&mut self) -> Result<()> {
        for mut row in self.take(TableId::CustomAttribute) {
            let (parent, constructor) = (row.token(0), row.token(1));
            let decoded = matches!(
                parent.table_id(),
                Some(
                    TableId::TypeDef
                        | TableId::Field
                        | TableId::MethodDef
                        | TableId::Property
                        | TableId::MemberRef
                )
            );
            if !decoded {
                if parent.is_table(TableId::StandAloneSig) {
                    match self.call_sites.get(&parent) {
                        Some(call_site) => row.0[0] = RawValue::Token(*call_site),
                        None => continue,
                    }
                }
                self.keep_raw(TableId::CustomAttribute, row);
                continue;
            }

            let params = match constructor.table_id() {
                Some(TableId::MethodDef) => self.module.method(constructor)?.signature.params.clone(),
                Some(TableId::MemberRef) => match &self.module.member_ref(constructor)?.signature {
                    MemberRefSignature::Method(signature) => signature.params.clone(),
                    MemberRefSignature::Field(_) => {
                        return Err(malformed_error!(
                            "Attribute constructor {} is a field",
                            constructor
                        ))
                    }
                },
                _ => return Err(malformed_error!("Attribute constructor {}", constructor)),
            };

            let blob = row.blob(2);
            let attribute = match parse_custom_attribute(blob, &params, &mut self.module) {
                Ok((fixed_args, named_args)) => CustomAttribute {
                    constructor,
                    fixed_args,
                    named_args,
                    raw_value: None,
                },
                Err(error) => {
                    debug!("Keeping attribute on {} undecoded: {}", parent, error);
                    CustomAttribute {
                        constructor,
                        fixed_args: Vec::new(),
                        named_args: Vec::new(),
                        raw_value: Some(blob.to_vec()),
                    }
                }
            };
            self.module.custom_attributes_mut(parent)?.push(attribute);
        }
        Ok(())
    }
}

/// Load the module of a managed PE file.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for invalid
/// metadata and [`crate::Error::Unsupported`] for images this crate cannot rewrite:
/// mixed-mode and precompiled images, uncompressed metadata and native method bodies.
pub(super) fn load(file: &File) -> Result<ModuleDef> {
    let (clr_rva, clr_size) = file.clr()?;
    if clr_size < COR20_HEADER_SIZE as usize {
        return Err(malformed_error!("CLR header of {} bytes", clr_size));
    }
    let clr_offset = file.rva_to_offset(clr_rva)?;
    let cor20 = Cor20Header::read(file.data_slice(clr_offset, COR20_HEADER_SIZE as usize)?)?;

    if cor20.vtable_fixups_size != 0 {
        return Err(unsupported_error!("Mixed-mode image with VTable fixups"));
    }
    if cor20.managed_native_header_size != 0 {
        return Err(unsupported_error!("Precompiled image with a managed native header"));
    }

    let metadata_offset = file.rva_to_offset(cor20.meta_data_rva as usize)?;
    let metadata = file.data_slice(metadata_offset, cor20.meta_data_size as usize)?;
    let root = Root::read(metadata)?;
    if root.stream(metadata, "#-").is_some() {
        return Err(unsupported_error!("Uncompressed #- metadata tables"));
    }
    let Some(tables_stream) = root.stream(metadata, "#~") else {
        return Err(malformed_error!("Metadata has no #~ stream"));
    };

    let heaps = Heaps::new(
        root.stream(metadata, "#Strings").unwrap_or_default(),
        root.stream(metadata, "#Blob").unwrap_or_default(),
        root.stream(metadata, "#GUID").unwrap_or_default(),
    )?;
    let header = TablesHeader::read(tables_stream, &heaps)?;

    let mut loader = Loader {
        file,
        cor20,
        tables: header.tables,
        user_strings: UserStrings::from(root.stream(metadata, "#US").unwrap_or_default())?,
        module: ModuleDef::new(String::new()),
        call_sites: HashMap::new(),
        locals: HashMap::new(),
        literals: HashMap::new(),
        raw: BTreeMap::new(),
    };

    let module_row = loader.load_module()?;
    let assembly = loader.load_assembly();
    let assembly_refs = loader.load_assembly_refs()?;
    loader.load_signatures()?;
    let param_counts = loader.load_definitions()?;
    loader.load_type_relations()?;
    loader.load_resources()?;
    loader.load_custom_attributes()?;

    for table in [TableId::EncLog, TableId::EncMap] {
        if loader.tables.remove(&table).is_some() {
            debug!("Dropping edit-and-continue table {}", table);
        }
    }
    let remaining = std::mem::take(&mut loader.tables);
    for (table, rows) in remaining {
        loader.raw.entry(table).or_default().extend(rows);
    }

    let mut module = loader.module;
    module.image = Some(PeImage {
        data: Arc::from(file.data()),
        cor20: loader.cor20,
        runtime_version: root.version,
        tables_version: (header.major_version, header.minor_version),
        sorted: header.sorted,
        module_row,
        raw_tables: loader.raw,
        param_counts,
        assembly,
        assembly_refs,
    });
    module.validate()?;

    debug!(
        "Loaded module '{}': {} types, {} methods, {} type references",
        module.name,
        module.type_defs.len(),
        module.methods.len(),
        module.type_refs.len()
    );
    Ok(module)
}
