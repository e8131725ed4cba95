//! End-to-end tests for the markup pass.
//!
//! A WPF consumer carries an `App.g.resources` container with one compiled page; after a
//! run, the page written to disk must name the merged assembly everywhere.

use refremap::prelude::*;

const PAGE: &str = "views/page.baml";

fn identity(name: &str, major: u16) -> AssemblyIdentity {
    AssemblyIdentity::new(name, AssemblyVersion::new(major, 0, 0, 0))
}

fn page() -> BamlDocument {
    BamlDocument {
        records: vec![
            BamlRecord::AssemblyInfo {
                assembly_id: 1,
                assembly_full_name: "SourceLib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
                    .to_string(),
            },
            BamlRecord::XmlnsProperty {
                prefix: "lib".to_string(),
                xml_namespace: "clr-namespace:SourceLib.Views;assembly=SourceLib".to_string(),
                assembly_ids: vec![1],
            },
            BamlRecord::Property {
                attribute_id: 3,
                value: "/App;component/Styles.xaml".to_string(),
            },
            BamlRecord::PropertyWithConverter {
                attribute_id: 4,
                value: "pack://application:,,,/SourceLib;component/Images/icon.png".to_string(),
                converter_type_id: 0xFF00,
            },
            BamlRecord::Text {
                value: "plain text".to_string(),
            },
            BamlRecord::Raw {
                record_type: BamlRecordType::DocumentEnd,
                data: Vec::new(),
            },
        ],
        ..BamlDocument::default()
    }
}

fn container(page: &BamlDocument) -> Result<Vec<u8>> {
    ResourceSet {
        reader_type: "System.Resources.ResourceReader, mscorlib".to_string(),
        resource_set_type: "System.Resources.RuntimeResourceSet".to_string(),
        type_names: Vec::new(),
        entries: vec![
            ResourceEntry::stream(PAGE, &page.to_bytes()?),
            ResourceEntry::stream("images/icon.png", &[0x89, b'P', b'N', b'G']),
        ],
    }
    .to_bytes()
}

fn wpf_consumer(framework: bool) -> Result<ModuleDef> {
    let mut module = ModuleDef::new("App.dll");
    module.assembly = Some(identity("App", 1));
    let scope = if framework {
        module.add_assembly_ref(&identity("PresentationFramework", 4))
    } else {
        module.add_assembly_ref(&identity("mscorlib", 4))
    };
    let window = module.add_type_ref(TypeRef {
        scope,
        namespace: "System.Windows".to_string(),
        name: "Window".to_string(),
    });
    module.add_type_def(TypeDef::new("App", "Page").with_base(window));
    module
        .resources
        .push(ManifestResource::new("App.g.resources", container(&page())?));
    Ok(module)
}

fn run(module: &ModuleDef) -> Result<ModuleDef> {
    let dir = tempfile::tempdir()?;
    let mut target = ModuleDef::new("Merged.dll");
    target.assembly = Some(identity("Merged", 2));
    module.write_to_file(&dir.path().join("App.dll"))?;
    target.write_to_file(&dir.path().join("Merged.dll"))?;

    let request = RemapRequest {
        input: dir.path().join("App.dll"),
        sources: vec!["SourceLib".to_string()],
        target: dir.path().join("Merged.dll"),
        output: dir.path().join("bin").join("App.dll"),
        options: RemapOptions::default(),
    };
    assert!(remap_file(&request)?.is_complete());
    ModuleDef::from_file(&request.output)
}

/// Assembly names, xmlns clauses and pack paths inside the page are redirected.
#[test]
fn test_compiled_page_is_redirected() -> Result<()> {
    let written = run(&wpf_consumer(true)?)?;

    let set = ResourceSet::parse(&written.resources[0].data)?;
    let document = BamlDocument::parse(set.entry(PAGE).unwrap().payload()?)?;
    let expected = vec![
        BamlRecord::AssemblyInfo {
            assembly_id: 1,
            assembly_full_name: "Merged, Version=2.0.0.0, Culture=neutral, PublicKeyToken=null"
                .to_string(),
        },
        BamlRecord::XmlnsProperty {
            prefix: "lib".to_string(),
            xml_namespace: "clr-namespace:SourceLib.Views;assembly=Merged".to_string(),
            assembly_ids: vec![1],
        },
        BamlRecord::Property {
            attribute_id: 3,
            value: "/Merged;component/App/Styles.xaml".to_string(),
        },
        BamlRecord::PropertyWithConverter {
            attribute_id: 4,
            value: "pack://application:,,,/Merged;component/SourceLib/Images/icon.png".to_string(),
            converter_type_id: 0xFF00,
        },
        BamlRecord::Text {
            value: "plain text".to_string(),
        },
        BamlRecord::Raw {
            record_type: BamlRecordType::DocumentEnd,
            data: Vec::new(),
        },
    ];
    assert_eq!(document.records, expected);

    let original = ResourceSet::parse(&container(&page())?)?;
    assert_eq!(set.entry("images/icon.png"), original.entry("images/icon.png"));

    Ok(())
}

/// Modules that do not reference WPF keep their resources byte for byte.
#[test]
fn test_markup_pass_requires_wpf_reference() -> Result<()> {
    let module = wpf_consumer(false)?;
    let written = run(&module)?;
    assert_eq!(written.resources, module.resources);
    Ok(())
}
