//! Loading and saving modules as managed PE files.
//!
//! [`PeImage`] remembers what a loaded module came from: the original file, its CLI
//! header, the metadata versions and the rows of every table the model does not cover.
//! Saving keeps all original sections and appends the rewritten method bodies,
//! resources and metadata in one new section (see [`super::pe`]).

use std::{collections::BTreeMap, path::Path, sync::Arc};

use log::debug;

use crate::{
    file::File,
    metadata::{
        cor20header::Cor20Header,
        identity::AssemblyIdentity,
        module::{loader, writer, ModuleDef},
        tables::{RawRow, TableId},
        token::Token,
    },
    Result,
};

/// Flags and hash of a loaded `AssemblyRef`, which the model does not keep.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AssemblyRefExtras {
    /// Identity the row was loaded as
    pub identity: AssemblyIdentity,
    /// `AssemblyFlags` without the public key bit
    pub flags: u32,
    /// Hash value blob
    pub hash: Vec<u8>,
}

/// The source image of a loaded module.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PeImage {
    /// The complete original file
    pub data: Arc<[u8]>,
    /// The original CLI header
    pub cor20: Cor20Header,
    /// Runtime version string of the metadata root
    pub runtime_version: String,
    /// Major and minor version of the `#~` stream
    pub tables_version: (u8, u8),
    /// Sorted-table bit vector of the `#~` stream
    pub sorted: u64,
    /// The `Module` row, for its generation and edit-and-continue ids
    pub module_row: RawRow,
    /// Rows of the tables the model does not cover, plus event semantics, attributes of
    /// rows outside the model and linked manifest resources
    pub raw_tables: BTreeMap<TableId, Vec<RawRow>>,
    /// Number of `Param` rows of every method, in method order
    pub param_counts: Vec<u32>,
    /// `HashAlgId` and flags of the `Assembly` row
    pub assembly: Option<(u32, u32)>,
    /// Flags and hashes of the loaded assembly references
    pub assembly_refs: Vec<AssemblyRefExtras>,
}

/// Column of `table` that only links a row to the row it describes. Such a link does not
/// keep its target alive; the row goes away with the target instead.
fn weak_column(table: TableId) -> Option<usize> {
    match table {
        TableId::CustomAttribute => Some(0),
        TableId::AssemblyRefProcessor => Some(1),
        TableId::AssemblyRefOS => Some(3),
        _ => None,
    }
}

impl PeImage {
    /// Visit every token of the raw rows except weak links.
    pub(crate) fn for_each_strong_token(&self, f: &mut dyn FnMut(Token)) {
        for (table, rows) in &self.raw_tables {
            let weak = weak_column(*table);
            for row in rows {
                for column in 0..row.0.len() {
                    let token = row.token(column);
                    if Some(column) != weak && token.row() != 0 {
                        f(token);
                    }
                }
            }
        }
    }

    /// Visit every token of the raw rows, allowing it to be replaced.
    pub(crate) fn for_each_token_mut(&mut self, f: &mut dyn FnMut(&mut Token)) {
        for rows in self.raw_tables.values_mut() {
            for row in rows {
                row.for_each_token_mut(&mut *f);
            }
        }
    }

    /// Drop raw rows whose weak link points to a row `keep` rejects.
    pub(crate) fn retain_rows(&mut self, keep: &dyn Fn(Token) -> bool) {
        for (table, rows) in &mut self.raw_tables {
            if let Some(column) = weak_column(*table) {
                rows.retain(|row| keep(row.token(column)));
            }
        }
    }

    /// The raw rows of `table`.
    pub(crate) fn rows(&self, table: TableId) -> &[RawRow] {
        self.raw_tables.get(&table).map_or(&[], Vec::as_slice)
    }
}

impl ModuleDef {
    /// Load a module from a managed PE file on disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read,
    /// [`crate::Error::Empty`] for an empty file, [`crate::Error::GoblinErr`] if it is not
    /// a PE file, [`crate::Error::Malformed`] for corrupt metadata and
    /// [`crate::Error::Unsupported`] for images that cannot be rewritten.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::from_file(path)?;
        loader::load(&file)
    }

    /// Load a module from an owned buffer.
    ///
    /// # Errors
    /// See [`ModuleDef::from_file`].
    pub fn from_mem(data: Vec<u8>) -> Result<Self> {
        let file = File::from_mem(data)?;
        loader::load(&file)
    }

    /// Serialize the module as it is, without pruning.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a row cannot be encoded and
    /// [`crate::Error::Unsupported`] if the source image cannot take the new layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        writer::write(self)
    }

    /// Write the module to `path`, dropping reference rows nothing points to.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be written, otherwise see
    /// [`ModuleDef::to_bytes`].
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let mut pruned = self.clone();
        let removed = pruned.prune_references();
        if removed > 0 {
            debug!("Removed {} unused reference rows from '{}'", removed, self.name);
        }

        std::fs::write(path, pruned.to_bytes()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            customattributes::{
                CustomAttribute, CustomAttributeArgument, CustomAttributeNamedArgument,
                CustomAttributeValue,
            },
            identity::AssemblyVersion,
            method::{opcodes, Instruction, MethodBody},
            module::{FieldDef, MemberRef, TypeDef},
            resources::ManifestResource,
            signatures::{SignatureMethod, TypeSignature},
            tables::RawValue,
        },
        test::{sample_consumer, ModuleBuilder},
    };

    fn reload(module: &ModuleDef) -> ModuleDef {
        ModuleDef::from_mem(module.to_bytes().unwrap()).unwrap()
    }

    fn without_image(mut module: ModuleDef) -> ModuleDef {
        module.image = None;
        module
    }

    #[test]
    fn built_module_roundtrip() {
        let mut builder = ModuleBuilder::new("App");
        let mscorlib = builder.assembly_ref("mscorlib");
        let object = builder.type_ref(mscorlib, "System", "Object");
        let program = builder.class("App", "Program");
        builder.module_mut().type_def_mut(program).unwrap().extends = Some(object);
        builder.field(program, "count", TypeSignature::I4);
        let ctor = builder.add_member_ref(MemberRef::method(
            object,
            ".ctor",
            SignatureMethod {
                has_this: true,
                ..Default::default()
            },
        ));
        let greeting = builder.module_mut().add_user_string("héllo");
        let body = MethodBody {
            max_stack: 2,
            locals: vec![TypeSignature::String],
            instructions: vec![
                Instruction::with_token(opcodes::NEWOBJ, ctor),
                Instruction::simple(opcodes::POP),
                Instruction::with_token(opcodes::LDSTR, greeting),
                Instruction::simple(opcodes::STLOC_0),
                Instruction::simple(opcodes::RET),
            ],
            ..Default::default()
        };
        builder.method(program, "Main", SignatureMethod::default(), Some(body));
        let mut module = builder.build();
        module.resources.push(ManifestResource::new("App.g.resources", vec![1, 2, 3]));

        let bytes = module.to_bytes().unwrap();
        assert_eq!(&bytes[..2], b"MZ");
        let loaded = ModuleDef::from_mem(bytes).unwrap();
        assert!(loaded.image.is_some());
        assert_eq!(without_image(loaded.clone()), module);

        // a loaded module writes back to the same model
        assert_eq!(without_image(reload(&loaded)), module);
    }

    #[test]
    fn attribute_values_roundtrip() {
        let mut builder = ModuleBuilder::new("Attrs");
        let class = builder.class("Attrs", "Marked");
        let ctor = builder.add_member_ref(MemberRef::method(
            class,
            ".ctor",
            SignatureMethod {
                has_this: true,
                params: vec![TypeSignature::Object],
                ..Default::default()
            },
        ));
        let mut module = builder.build();
        module.type_def_mut(class).unwrap().custom_attributes.push(CustomAttribute {
            constructor: ctor,
            fixed_args: vec![CustomAttributeArgument {
                arg_type: TypeSignature::Object,
                value: CustomAttributeValue::Boxed(Box::new(CustomAttributeArgument {
                    arg_type: TypeSignature::SzArray(Box::new(TypeSignature::R8)),
                    value: CustomAttributeValue::Array(vec![CustomAttributeArgument {
                        arg_type: TypeSignature::R8,
                        value: CustomAttributeValue::R8(0.5),
                    }]),
                })),
            }],
            named_args: vec![CustomAttributeNamedArgument {
                is_field: false,
                name: "Kind".to_string(),
                argument: CustomAttributeArgument {
                    arg_type: TypeSignature::String,
                    value: CustomAttributeValue::String("x".to_string()),
                },
            }],
            raw_value: None,
        });

        assert_eq!(without_image(reload(&module)), module);
    }

    #[test]
    fn undecodable_attribute_is_kept_verbatim() {
        let mut builder = ModuleBuilder::new("Attrs");
        let class = builder.class("Attrs", "Marked");
        let ctor = builder.add_member_ref(MemberRef::method(
            class,
            ".ctor",
            SignatureMethod {
                has_this: true,
                params: vec![TypeSignature::I4],
                ..Default::default()
            },
        ));
        let mut module = builder.build();
        let blob = vec![0x01, 0x00, 0x07];
        module.type_def_mut(class).unwrap().custom_attributes.push(CustomAttribute {
            constructor: ctor,
            fixed_args: Vec::new(),
            named_args: Vec::new(),
            raw_value: Some(blob.clone()),
        });

        let loaded = reload(&module);
        let attribute = &loaded.type_def(class).unwrap().custom_attributes[0];
        assert_eq!(attribute.raw_value.as_deref(), Some(blob.as_slice()));
        assert!(attribute.fixed_args.is_empty());
    }

    #[test]
    fn load_rejects_corrupt_images() {
        assert!(matches!(ModuleDef::from_mem(Vec::new()), Err(crate::Error::Empty)));
        assert!(ModuleDef::from_mem(b"MZ\x90\x00".to_vec()).is_err());

        let (module, _) = sample_consumer();
        let bytes = module.to_bytes().unwrap();
        assert!(ModuleDef::from_mem(bytes[..bytes.len() / 2].to_vec()).is_err());

        // zero the metadata signature
        let mut broken = bytes;
        let position = broken
            .windows(4)
            .rposition(|window| window == b"BSJB")
            .unwrap();
        broken[position..position + 4].fill(0);
        assert!(matches!(
            ModuleDef::from_mem(broken),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn load_rejects_dangling_user_string() {
        let mut builder = ModuleBuilder::new("Broken");
        let class = builder.class("Broken", "Program");
        let body = MethodBody {
            instructions: vec![
                Instruction::with_token(opcodes::LDSTR, Token::from_parts(TableId::UserString, 3)),
                Instruction::simple(opcodes::RET),
            ],
            ..Default::default()
        };
        builder.method(class, "Main", SignatureMethod::default(), Some(body));
        let module = builder.build();

        assert!(module.to_bytes().is_err());
    }

    #[test]
    fn raw_rows_survive_rewrite() {
        let (module, _) = sample_consumer();
        let mut loaded = reload(&module);
        let field = Token::from_parts(TableId::Field, 1);
        let image = loaded.image.as_mut().unwrap();
        image.raw_tables.insert(
            TableId::Constant,
            vec![RawRow(vec![
                RawValue::Int(0x08),
                RawValue::Token(field),
                RawValue::Blob(vec![7, 0, 0, 0]),
            ])],
        );

        let again = reload(&loaded);
        let constants = again.image.as_ref().unwrap().rows(TableId::Constant);
        assert_eq!(constants.len(), 1);
        assert_eq!(constants[0].token(1), field);
        assert_eq!(constants[0].blob(2), &[7, 0, 0, 0]);
    }

    #[test]
    fn write_prunes_and_reloads() {
        let (mut module, _) = sample_consumer();
        let stale = module.add_assembly_ref(&AssemblyIdentity::new(
            "Stale",
            AssemblyVersion::default(),
        ));
        assert!(module.contains(stale));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.dll");
        module.write_to_file(&path).unwrap();

        let loaded = ModuleDef::from_file(&path).unwrap();
        assert!(loaded.assembly_ref_names().all(|name| name != "Stale"));
        let names: Vec<_> = loaded.type_defs.iter().map(|t| t.name.as_str()).collect();
        let expected: Vec<_> = module.type_defs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn prune_drops_attributes_of_removed_references() {
        let (module, _) = sample_consumer();
        let mut loaded = reload(&module);
        let stale = loaded.add_assembly_ref(&AssemblyIdentity::new(
            "Stale",
            AssemblyVersion::default(),
        ));
        let ctor = loaded.member_refs.iter().position(|m| m.name == ".ctor").unwrap();
        let image = loaded.image.as_mut().unwrap();
        image.raw_tables.insert(
            TableId::CustomAttribute,
            vec![RawRow(vec![
                RawValue::Token(stale),
                RawValue::Token(Token::from_index(TableId::MemberRef, ctor)),
                RawValue::Blob(vec![1, 0, 0, 0]),
            ])],
        );

        assert!(loaded.prune_references() >= 1);
        assert!(loaded.image.as_ref().unwrap().rows(TableId::CustomAttribute).is_empty());
        assert!(loaded.assembly_ref_names().all(|name| name != "Stale"));
    }

    #[test]
    fn module_without_global_type_gets_one() {
        let mut module = ModuleDef::new("Lib.dll");
        module.type_defs.clear();
        let class = module.add_type_def(TypeDef::new("Lib", "Only"));
        module
            .add_field(class, FieldDef::new("value", TypeSignature::I4))
            .unwrap();

        let loaded = reload(&module);
        assert!(loaded.type_defs[0].is_global());
        assert_eq!(loaded.type_defs[1].name, "Only");
        assert_eq!(
            loaded.type_defs[1].fields,
            vec![Token::from_parts(TableId::Field, 1)]
        );
    }
}
