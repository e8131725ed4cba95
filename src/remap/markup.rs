//! Rewriting of compiled WPF markup.
//!
//! WPF projects embed their compiled XAML as BAML streams inside a `<name>.g.resources`
//! manifest resource. Those streams name assemblies in three places that the reference
//! pass cannot see:
//!
//! - `AssemblyInfo` records carry full assembly display names
//! - `XmlnsProperty` records map prefixes to `clr-namespace:...;assembly=<name>`
//! - property values and text hold pack URIs such as `/SourceLib;component/Themes/Generic.xaml`
//!
//! Each of these is redirected to the target assembly. Pack paths keep the original
//! assembly name as their first path segment, because resources merged into the target
//! are stored under a folder named after the assembly they came from.
//!
//! # Examples
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use refremap::remap::markup::{patch_path, patch_xmlns};
//!
//! let sources: BTreeSet<String> = ["SourceLib".to_string()].into_iter().collect();
//!
//! assert_eq!(
//!     patch_path("/SourceLib;component/Assets/icon.png", &sources, Some("App"), "Merged").as_deref(),
//!     Some("/Merged;component/SourceLib/Assets/icon.png")
//! );
//! assert_eq!(
//!     patch_xmlns("clr-namespace:Foo;assembly=SourceLib", &sources, "Merged").as_deref(),
//!     Some("clr-namespace:Foo;assembly=Merged")
//! );
//! ```

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::{
    baml::{BamlDocument, BamlRecord},
    metadata::{identity::short_name, module::ModuleDef, resources::ResourceSet},
    remap::RemapContext,
    Error, Result,
};

/// Assemblies whose presence marks a module as a WPF module.
pub const MARKUP_ASSEMBLIES: [&str; 4] = [
    "WindowsBase",
    "PresentationCore",
    "PresentationFramework",
    "System.Xaml",
];

/// Suffix of the manifest resources that hold compiled markup.
pub const MARKUP_CONTAINER_SUFFIX: &str = ".g.resources";

/// Suffix of the compiled markup entries inside a container.
pub const MARKUP_ENTRY_SUFFIX: &str = ".baml";

const ASSEMBLY_CLAUSE: &str = "assembly=";

/// True if `module` references any of the [`MARKUP_ASSEMBLIES`].
#[must_use]
pub fn references_markup_assemblies(module: &ModuleDef) -> bool {
    module
        .assembly_ref_names()
        .any(|name| MARKUP_ASSEMBLIES.contains(&name))
}

/// Run the markup pass over the context's module.
///
/// Only containers in which at least one document changed are rebuilt; each rebuilt
/// container replaces the original resource at the same position. Returns the number
/// of rewritten records.
///
/// # Errors
/// - [`crate::Error::Error`] if the target module has no assembly identity
/// - [`crate::Error::Unsupported`] for generic type names in markup type records
/// - [`crate::Error::Malformed`] for damaged containers or BAML streams
///
/// On error no container of the failing resource is replaced.
pub fn remap_markup(context: &mut RemapContext) -> Result<usize> {
    let target = context.target.assembly.as_ref().ok_or_else(|| {
        Error::Error(format!(
            "Target module '{}' does not define an assembly",
            context.target.name
        ))
    })?;

    let remapper = MarkupRemapper {
        sources: &context.sources,
        module_assembly: context.module.assembly.as_ref().map(|a| a.name.as_str()),
        target_name: &target.name,
        target_full_name: target.display_name(),
    };

    let mut rebuilt = Vec::new();
    let mut changes = 0;
    for (index, resource) in context.module.resources.iter().enumerate() {
        if !resource.name.ends_with(MARKUP_CONTAINER_SUFFIX) {
            continue;
        }

        debug!("Processing markup container {}", resource.name);
        if let Some((data, count)) = remapper.remap_container(&resource.data)? {
            rebuilt.push((index, data));
            changes += count;
        }
    }

    for (index, data) in rebuilt {
        context.module.resources[index].data = data;
    }
    Ok(changes)
}

/// Rewrites markup containers for one run.
pub struct MarkupRemapper<'a> {
    /// Assemblies whose names are replaced
    pub sources: &'a BTreeSet<String>,
    /// Short name of the edited module's own assembly
    pub module_assembly: Option<&'a str>,
    /// Short name of the target assembly
    pub target_name: &'a str,
    /// Full display name of the target assembly
    pub target_full_name: String,
}

impl MarkupRemapper<'_> {
    /// Rewrite every BAML entry of a `.resources` container. Returns the rebuilt
    /// container and the number of rewritten records, or `None` if nothing changed.
    ///
    /// # Errors
    /// See [`remap_markup`].
    pub fn remap_container(&self, data: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        let mut set = ResourceSet::parse(data)?;
        let mut changes = 0;

        for entry in &mut set.entries {
            if !entry.name.ends_with(MARKUP_ENTRY_SUFFIX) {
                continue;
            }
            if !entry.is_binary() {
                warn!("Skipping markup entry {} - not a stream", entry.name);
                continue;
            }

            let mut document = BamlDocument::parse(entry.payload()?)?;
            let count = self.remap_document(&mut document)?;
            if count > 0 {
                debug!("Rewrote {} records in {}", count, entry.name);
                entry.set_payload(&document.to_bytes()?);
                changes += count;
            }
        }

        if changes == 0 {
            return Ok(None);
        }
        Ok(Some((set.to_bytes()?, changes)))
    }

    /// Rewrite the records of one document in place. Returns the number of changed records.
    ///
    /// # Errors
    /// Returns [`crate::Error::Unsupported`] for a type record naming a generic type.
    pub fn remap_document(&self, document: &mut BamlDocument) -> Result<usize> {
        let mut changes = 0;

        for record in &mut document.records {
            let changed = match record {
                BamlRecord::AssemblyInfo {
                    assembly_full_name, ..
                } => {
                    if self.sources.contains(short_name(assembly_full_name)) {
                        debug!("{} -> {}", assembly_full_name, self.target_full_name);
                        assembly_full_name.clone_from(&self.target_full_name);
                        true
                    } else {
                        false
                    }
                }
                BamlRecord::XmlnsProperty { xml_namespace, .. } => {
                    let patched = patch_xmlns(xml_namespace, self.sources, self.target_name);
                    replace(xml_namespace, patched)
                }
                BamlRecord::Property { value, .. }
                | BamlRecord::PropertyWithConverter { value, .. }
                | BamlRecord::Text { value }
                | BamlRecord::TextWithConverter { value, .. } => {
                    let patched =
                        patch_path(value, self.sources, self.module_assembly, self.target_name);
                    replace(value, patched)
                }
                BamlRecord::TypeInfo { type_full_name, .. }
                | BamlRecord::TypeSerializerInfo { type_full_name, .. } => {
                    if type_full_name.contains("[[") {
                        return Err(unsupported_error!(
                            "Generic types in markup are not supported - {}",
                            type_full_name
                        ));
                    }
                    false
                }
                _ => false,
            };

            if changed {
                changes += 1;
            }
        }

        Ok(changes)
    }
}

fn replace(value: &mut String, patched: Option<String>) -> bool {
    match patched {
        Some(patched) => {
            debug!("{} -> {}", value, patched);
            *value = patched;
            true
        }
        None => false,
    }
}

/// Redirect the `assembly=` clause of an XML namespace mapping to `target`.
///
/// Returns `None` if the namespace has no such clause or names an assembly outside
/// `sources`.
#[must_use]
pub fn patch_xmlns(xml_namespace: &str, sources: &BTreeSet<String>, target: &str) -> Option<String> {
    let index = xml_namespace.find(ASSEMBLY_CLAUSE)?;
    let assembly = &xml_namespace[index + ASSEMBLY_CLAUSE.len()..];
    if !sources.contains(assembly) {
        return None;
    }

    Some(format!("{}{}{}", &xml_namespace[..index], ASSEMBLY_CLAUSE, target))
}

/// Redirect a pack path to the target assembly.
///
/// Only values starting with `/` or `pack://` are considered. Each source name and then
/// the edited module's own assembly name is tried in turn; the first `N` for which
/// `/N;component` occurs is rewritten to `/<target>;component/N`. Returns `None` if no
/// candidate occurs.
#[must_use]
pub fn patch_path(
    path: &str,
    sources: &BTreeSet<String>,
    module_assembly: Option<&str>,
    target: &str,
) -> Option<String> {
    if !(path.starts_with('/') || path.starts_with("pack://")) {
        return None;
    }

    sources
        .iter()
        .map(String::as_str)
        .chain(module_assembly)
        .find_map(|name| {
            let reference = format!("/{name};component");
            path.contains(&reference)
                .then(|| path.replace(&reference, &format!("/{target};component/{name}")))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        baml::BamlRecordType,
        metadata::resources::ResourceEntry,
        remap::RemapOptions,
        test::{
            baml::{sample_document, sample_resources},
            sample_markup_consumer,
        },
    };

    fn sources() -> BTreeSet<String> {
        ["SourceLib".to_string()].into_iter().collect()
    }

    fn remapper(sources: &BTreeSet<String>) -> MarkupRemapper<'_> {
        MarkupRemapper {
            sources,
            module_assembly: Some("App"),
            target_name: "Merged",
            target_full_name: "Merged, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
                .to_string(),
        }
    }

    #[test]
    fn path_patching() {
        let sources = sources();
        assert_eq!(
            patch_path("/SourceLib;component/Assets/icon.png", &sources, None, "Merged").as_deref(),
            Some("/Merged;component/SourceLib/Assets/icon.png")
        );
        assert_eq!(
            patch_path(
                "pack://application:,,,/SourceLib;component/Themes/Generic.xaml",
                &sources,
                None,
                "Merged"
            )
            .as_deref(),
            Some("pack://application:,,,/Merged;component/SourceLib/Themes/Generic.xaml")
        );
        assert_eq!(
            patch_path("/App;component/MainWindow.xaml", &sources, Some("App"), "Merged").as_deref(),
            Some("/Merged;component/App/MainWindow.xaml")
        );
        assert_eq!(patch_path("SourceLib;component/x.png", &sources, None, "Merged"), None);
        assert_eq!(patch_path("/Other;component/x.png", &sources, Some("App"), "Merged"), None);
        assert_eq!(patch_path("", &sources, None, "Merged"), None);
    }

    #[test]
    fn xmlns_patching() {
        let sources = sources();
        assert_eq!(
            patch_xmlns("clr-namespace:Foo;assembly=SourceLib", &sources, "Merged").as_deref(),
            Some("clr-namespace:Foo;assembly=Merged")
        );
        assert_eq!(patch_xmlns("clr-namespace:Foo", &sources, "Merged"), None);
        assert_eq!(
            patch_xmlns("clr-namespace:Foo;assembly=Other", &sources, "Merged"),
            None
        );
        assert_eq!(
            patch_xmlns(
                "http://schemas.microsoft.com/winfx/2006/xaml/presentation",
                &sources,
                "Merged"
            ),
            None
        );
    }

    #[test]
    fn document_rules() {
        let sources = sources();
        let mut document = sample_document();
        let original = document.clone();

        let changes = remapper(&sources).remap_document(&mut document).unwrap();
        assert_eq!(changes, 4);
        assert_eq!(document.records.len(), original.records.len());

        assert!(document.records.iter().any(|record| matches!(
            record,
            BamlRecord::AssemblyInfo { assembly_full_name, .. }
                if assembly_full_name == "Merged, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
        )));
        assert!(document.records.iter().any(|record| matches!(
            record,
            BamlRecord::XmlnsProperty { prefix, xml_namespace, .. }
                if prefix == "src" && xml_namespace == "clr-namespace:SourceLib.Controls;assembly=Merged"
        )));
        assert!(document.records.iter().any(|record| matches!(
            record,
            BamlRecord::Property { value, .. }
                if value == "/Merged;component/SourceLib/Themes/Generic.xaml"
        )));
        assert!(document.records.iter().any(|record| matches!(
            record,
            BamlRecord::Text { value }
                if value == "pack://application:,,,/Merged;component/SourceLib/Images/logo.png"
        )));

        // Framework records and raw records are untouched
        for (before, after) in original.records.iter().zip(&document.records) {
            if before.record_type() == BamlRecordType::AssemblyInfo
                && matches!(before, BamlRecord::AssemblyInfo { assembly_full_name, .. } if assembly_full_name.starts_with("PresentationFramework"))
            {
                assert_eq!(before, after);
            }
            if matches!(before, BamlRecord::Raw { .. }) {
                assert_eq!(before, after);
            }
        }

        // A second pass finds nothing left to change
        assert_eq!(remapper(&sources).remap_document(&mut document).unwrap(), 0);
    }

    #[test]
    fn rejects_generic_type_records() {
        let sources = sources();
        let mut document = BamlDocument {
            records: vec![BamlRecord::TypeInfo {
                type_id: 1,
                assembly_id: 1,
                type_full_name: "SourceLib.Box`1[[System.Int32, mscorlib]]".to_string(),
            }],
            ..BamlDocument::default()
        };
        assert!(matches!(
            remapper(&sources).remap_document(&mut document),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn containers_are_rebuilt_only_when_changed() {
        let sources = sources();
        let remapper = remapper(&sources);

        let (data, changes) = remapper.remap_container(&sample_resources()).unwrap().unwrap();
        assert_eq!(changes, 4);
        let set = ResourceSet::parse(&data).unwrap();
        let original = ResourceSet::parse(&sample_resources()).unwrap();
        assert_eq!(set.entries.len(), original.entries.len());
        for (before, after) in original.entries.iter().zip(&set.entries) {
            assert_eq!(before.name, after.name);
            if !before.name.ends_with(".baml") {
                assert_eq!(before, after);
            }
        }

        let document = BamlDocument::parse(set.entry("mainwindow.baml").unwrap().payload().unwrap()).unwrap();
        assert!(document.records.iter().all(|record| !matches!(
            record,
            BamlRecord::AssemblyInfo { assembly_full_name, .. } if assembly_full_name.starts_with("SourceLib")
        )));

        assert!(remapper.remap_container(&data).unwrap().is_none());
    }

    #[test]
    fn non_stream_markup_entries_are_skipped() {
        let sources = sources();
        let set = ResourceSet {
            reader_type: "System.Resources.ResourceReader, mscorlib".to_string(),
            resource_set_type: "System.Resources.RuntimeResourceSet".to_string(),
            type_names: Vec::new(),
            entries: vec![ResourceEntry {
                name: "broken.baml".to_string(),
                type_code: crate::metadata::resources::RESOURCE_TYPE_CODE::STRING,
                data: vec![2, b'h', b'i'],
            }],
        };
        let data = set.to_bytes().unwrap();
        assert!(remapper(&sources).remap_container(&data).unwrap().is_none());
    }

    #[test]
    fn markup_pass_replaces_resource_in_place() {
        let (module, target) = sample_markup_consumer();
        let original = module.resources.clone();
        let mut context = RemapContext::new(module, target, ["SourceLib"], RemapOptions::default());
        assert!(references_markup_assemblies(&context.module));

        let changes = remap_markup(&mut context).unwrap();
        assert_eq!(changes, 4);

        let resources = &context.module.resources;
        assert_eq!(resources.len(), original.len());
        for (before, after) in original.iter().zip(resources) {
            assert_eq!(before.name, after.name);
            if before.name.ends_with(".g.resources") {
                assert_ne!(before.data, after.data);
            } else {
                assert_eq!(before.data, after.data);
            }
        }
    }

    #[test]
    fn failed_markup_pass_keeps_every_container() {
        let (mut module, target) = sample_markup_consumer();
        let generic = BamlDocument {
            records: vec![BamlRecord::TypeInfo {
                type_id: 1,
                assembly_id: 1,
                type_full_name: "SourceLib.Box`1[[System.Int32, mscorlib]]".to_string(),
            }],
            ..BamlDocument::default()
        };
        let set = ResourceSet {
            reader_type: "System.Resources.ResourceReader, mscorlib".to_string(),
            resource_set_type: "System.Resources.RuntimeResourceSet".to_string(),
            type_names: Vec::new(),
            entries: vec![
                ResourceEntry::stream("page.baml", &sample_document().to_bytes().unwrap()),
                ResourceEntry::stream("zzz.baml", &generic.to_bytes().unwrap()),
            ],
        };
        module.resources.push(crate::metadata::resources::ManifestResource::new(
            "Extra.g.resources",
            set.to_bytes().unwrap(),
        ));
        let original = module.resources.clone();

        let mut context = RemapContext::new(module, target, ["SourceLib"], RemapOptions::default());
        assert!(matches!(
            remap_markup(&mut context),
            Err(Error::Unsupported { .. })
        ));
        assert_eq!(context.module.resources, original);
    }

    #[test]
    fn markup_pass_requires_target_identity() {
        let (module, mut target) = sample_markup_consumer();
        target.assembly = None;
        let mut context = RemapContext::new(module, target, ["SourceLib"], RemapOptions::default());
        assert!(matches!(remap_markup(&mut context), Err(Error::Error(_))));
    }
}
