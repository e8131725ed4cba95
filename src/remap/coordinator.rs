//! File-to-file remap runs.

use std::path::{Path, PathBuf};

use log::{error, info};

use crate::{
    metadata::module::ModuleDef,
    remap::{RemapContext, RemapOptions, RemapStatus},
    Result,
};

/// Everything needed for one run.
#[derive(Debug, Clone)]
pub struct RemapRequest {
    /// Module to rewrite
    pub input: PathBuf,
    /// Short names of the assemblies whose references are redirected
    pub sources: Vec<String>,
    /// Module references are redirected to
    pub target: PathBuf,
    /// Where the rewritten module is written
    pub output: PathBuf,
    /// Run options
    pub options: RemapOptions,
}

/// Remap `request.input` and write the result to `request.output`.
///
/// The file stem of the target path is always removed from the source names. After the
/// passes ran, the output is written (creating its directory if needed), loaded again
/// and its assembly references are checked for source assemblies that are still
/// referenced. Leftovers are reported as [`RemapStatus::Incomplete`]; the output is
/// kept in that case.
///
/// # Errors
/// Returns an error if a module cannot be loaded or written, or if a pass fails. Nothing
/// is written when a pass fails.
pub fn remap_file(request: &RemapRequest) -> Result<RemapStatus> {
    let target_stem = request
        .target
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned());
    let sources = request
        .sources
        .iter()
        .filter(|name| Some(name.as_str()) != target_stem.as_deref())
        .cloned();

    info!("Loading {}", request.input.display());
    let module = ModuleDef::from_file(&request.input)?;
    info!("Loading target {}", request.target.display());
    let target = ModuleDef::from_file(&request.target)?;

    let mut context = RemapContext::new(module, target, sources, request.options);
    info!(
        "Remapping references to {} onto {}",
        context
            .sources
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        context.target.name
    );
    context.run()?;

    create_parent_dir(&request.output)?;
    info!("Writing {}", request.output.display());
    context.module.write_to_file(&request.output)?;

    let written = ModuleDef::from_file(&request.output)?;
    let remaining: Vec<String> = written
        .assembly_ref_names()
        .filter(|name| context.sources.contains(*name))
        .map(str::to_string)
        .collect();

    if remaining.is_empty() {
        info!("Remap complete");
        Ok(RemapStatus::Complete)
    } else {
        error!("Remap completed with errors. Some portions were not remapped.");
        for name in &remaining {
            error!("Output still references {}", name);
        }
        Ok(RemapStatus::Incomplete(remaining))
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            identity::{AssemblyIdentity, AssemblyVersion},
            method::{opcodes, Instruction, MethodBody},
            module::{MethodDef, TypeDef, TypeRef},
            signatures::{SignatureMethod, TypeSignature},
        },
        test::{sample_consumer, ModuleBuilder},
    };

    fn request(dir: &Path, output: PathBuf) -> RemapRequest {
        RemapRequest {
            input: dir.join("App.dll"),
            sources: vec!["SourceLib".to_string(), "Merged".to_string()],
            target: dir.join("Merged.dll"),
            output,
            options: RemapOptions::default(),
        }
    }

    #[test]
    fn remaps_and_verifies_output() {
        let dir = tempfile::tempdir().unwrap();
        let (module, target) = sample_consumer();
        module.write_to_file(&dir.path().join("App.dll")).unwrap();
        target.write_to_file(&dir.path().join("Merged.dll")).unwrap();

        let output = dir.path().join("out").join("nested").join("App.dll");
        let status = remap_file(&request(dir.path(), output.clone())).unwrap();
        assert_eq!(status, RemapStatus::Complete);

        let written = ModuleDef::from_file(&output).unwrap();
        assert!(written.assembly_ref_names().any(|name| name == "Merged"));
        assert!(written.assembly_ref_names().all(|name| name != "SourceLib"));
    }

    #[test]
    fn reports_leftover_references() {
        let dir = tempfile::tempdir().unwrap();
        let (mut module, target) = sample_consumer();

        // Signatures of calli sites are left alone, so this reference survives
        let source = module.add_assembly_ref(&AssemblyIdentity::new(
            "SourceLib",
            AssemblyVersion::new(1, 0, 0, 0),
        ));
        let widget = module.add_type_ref(TypeRef {
            scope: source,
            namespace: "SourceLib".to_string(),
            name: "Gadget".to_string(),
        });
        let holder = module.add_type_def(TypeDef::new("App", "Holder"));
        let sig = module.add_stand_alone_sig(SignatureMethod {
            params: vec![TypeSignature::Class(widget)],
            ..Default::default()
        });
        let body = MethodBody {
            instructions: vec![
                Instruction::with_token(opcodes::CALLI, sig),
                Instruction::simple(opcodes::RET),
            ],
            ..Default::default()
        };
        module
            .add_method(holder, MethodDef::new("Invoke", SignatureMethod::default()).with_body(body))
            .unwrap();

        module.write_to_file(&dir.path().join("App.dll")).unwrap();
        target.write_to_file(&dir.path().join("Merged.dll")).unwrap();

        let output = dir.path().join("App.out.dll");
        let status = remap_file(&request(dir.path(), output.clone())).unwrap();
        assert_eq!(status, RemapStatus::Incomplete(vec!["SourceLib".to_string()]));
        assert!(output.exists());
    }

    #[test]
    fn missing_type_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (module, _) = sample_consumer();
        let mut target = ModuleBuilder::new("Merged").build();
        target.add_type_def(TypeDef::new("Unrelated", "Thing"));
        module.write_to_file(&dir.path().join("App.dll")).unwrap();
        target.write_to_file(&dir.path().join("Merged.dll")).unwrap();

        let output = dir.path().join("App.out.dll");
        assert!(matches!(
            remap_file(&request(dir.path(), output.clone())),
            Err(crate::Error::TypeNotFound(_))
        ));
        assert!(!output.exists());
    }

    #[test]
    fn missing_input_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("App.out.dll");
        assert!(matches!(
            remap_file(&request(dir.path(), output)),
            Err(crate::Error::FileError(_))
        ));
    }
}
