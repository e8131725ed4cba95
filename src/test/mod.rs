//! Shared fixtures for unit tests.

pub mod baml;

use crate::metadata::{
    customattributes::{CustomAttribute, CustomAttributeArgument, CustomAttributeValue},
    identity::{AssemblyIdentity, AssemblyVersion},
    method::{opcodes, Instruction, MethodBody},
    module::{
        FieldDef, GenericParam, MemberRef, MethodDef, MethodSpec, ModuleDef, PropertyDef,
        TypeDef, TypeRef,
    },
    resources::ManifestResource,
    signatures::{SignatureMethod, SignatureProperty, TypeSignature},
    token::Token,
};

/// Version used for every assembly created by the fixtures, except the framework ones.
const FIXTURE_VERSION: AssemblyVersion = AssemblyVersion::new(1, 0, 0, 0);

/// Builds small modules row by row. Every helper returns the token of the row it added.
pub struct ModuleBuilder {
    module: ModuleDef,
}

impl ModuleBuilder {
    /// Module `<name>.dll` of assembly `<name>` 1.0.0.0.
    pub fn new(name: &str) -> Self {
        let mut module = ModuleDef::new(format!("{name}.dll"));
        module.assembly = Some(AssemblyIdentity::new(name, FIXTURE_VERSION));
        ModuleBuilder { module }
    }

    // Helper function to create an AssemblyRef; framework assemblies get version 4.0.0.0
    pub fn assembly_ref(&mut self, name: &str) -> Token {
        let version = match name {
            "mscorlib" | "WindowsBase" | "PresentationCore" | "PresentationFramework"
            | "System.Xaml" => AssemblyVersion::new(4, 0, 0, 0),
            _ => FIXTURE_VERSION,
        };
        self.module
            .add_assembly_ref(&AssemblyIdentity::new(name, version))
    }

    // Helper function to create a TypeRef scoped to an AssemblyRef or an enclosing TypeRef
    pub fn type_ref(&mut self, scope: Token, namespace: &str, name: &str) -> Token {
        self.module.add_type_ref(TypeRef {
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    // Helper function to create a top-level class without a base type
    pub fn class(&mut self, namespace: &str, name: &str) -> Token {
        self.module.add_type_def(TypeDef::new(namespace, name))
    }

    // Helper function to create a generic class; the arity suffix is appended to the name
    pub fn generic_class(&mut self, namespace: &str, name: &str, params: &[&str]) -> Token {
        let mut type_def = TypeDef::new(namespace, format!("{}`{}", name, params.len()));
        type_def.generic_params = params
            .iter()
            .map(|param| GenericParam {
                name: (*param).to_string(),
                ..Default::default()
            })
            .collect();
        self.module.add_type_def(type_def)
    }

    // Helper function to create a struct deriving from mscorlib's System.ValueType
    pub fn value_type(&mut self, namespace: &str, name: &str) -> Token {
        let mscorlib = self.assembly_ref("mscorlib");
        let value_type = self.type_ref(mscorlib, "System", "ValueType");
        self.module
            .add_type_def(TypeDef::new(namespace, name).with_base(value_type))
    }

    // Helper function to create a class nested in `enclosing`
    pub fn nested_class(&mut self, enclosing: Token, name: &str) -> Token {
        self.module
            .add_nested_type(enclosing, TypeDef::new("", name))
            .unwrap()
    }

    pub fn field(&mut self, owner: Token, name: &str, signature: TypeSignature) -> Token {
        self.module
            .add_field(owner, FieldDef::new(name, signature))
            .unwrap()
    }

    pub fn method(
        &mut self,
        owner: Token,
        name: &str,
        signature: SignatureMethod,
        body: Option<MethodBody>,
    ) -> Token {
        let mut method = MethodDef::new(name, signature);
        method.body = body;
        self.module.add_method(owner, method).unwrap()
    }

    pub fn add_member_ref(&mut self, member_ref: MemberRef) -> Token {
        self.module.add_member_ref(member_ref)
    }

    pub fn module_mut(&mut self) -> &mut ModuleDef {
        &mut self.module
    }

    pub fn build(self) -> ModuleDef {
        self.module
    }
}

fn instance() -> SignatureMethod {
    SignatureMethod {
        has_this: true,
        ..Default::default()
    }
}

/// The merged module `Merged.dll` that carries the former `SourceLib` types.
pub fn sample_target() -> ModuleDef {
    let mut builder = ModuleBuilder::new("Merged");

    builder.class("SourceLib", "Widget");
    builder.value_type("SourceLib", "Point");
    builder.generic_class("SourceLib", "Pair", &["TFirst", "TSecond"]);
    builder.generic_class("SourceLib", "Container", &["T"]);
    builder.class("SourceLib", "WidgetAttribute");
    let panel = builder.class("SourceLib", "Panel");
    builder.nested_class(panel, "Slot");
    builder.class("SourceLib.Controls", "Badge");
    builder.class("Merged", "Startup");

    builder.build()
}

/// A consumer `App.dll` that uses `SourceLib` in every supported position, paired with
/// [`sample_target`].
///
/// Every reference row is reachable from a definition, so pruning leaves it unchanged.
pub fn sample_consumer() -> (ModuleDef, ModuleDef) {
    let mut builder = ModuleBuilder::new("App");
    let mscorlib = builder.assembly_ref("mscorlib");
    let source = builder.assembly_ref("SourceLib");

    let object = builder.type_ref(mscorlib, "System", "Object");
    let widget = builder.type_ref(source, "SourceLib", "Widget");
    let point = builder.type_ref(source, "SourceLib", "Point");
    let pair = builder.type_ref(source, "SourceLib", "Pair`2");
    let container = builder.type_ref(source, "SourceLib", "Container`1");
    let attribute = builder.type_ref(source, "SourceLib", "WidgetAttribute");
    let panel = builder.type_ref(source, "SourceLib", "Panel");
    let slot = builder.type_ref(panel, "", "Slot");

    let widget_ctor = builder.add_member_ref(MemberRef::method(widget, ".ctor", instance()));
    let create = builder.add_member_ref(MemberRef::method(
        widget,
        "Create",
        SignatureMethod {
            param_count_generic: 1,
            return_type: TypeSignature::GenericParamMethod(0),
            ..Default::default()
        },
    ));
    let attribute_ctor = builder.add_member_ref(MemberRef::method(
        attribute,
        ".ctor",
        SignatureMethod {
            has_this: true,
            params: vec![TypeSignature::Object],
            ..Default::default()
        },
    ));

    let program = builder.class("App", "Program");
    builder.module_mut().type_def_mut(program).unwrap().extends = Some(object);
    builder.field(program, "widget", TypeSignature::Class(widget));
    builder.field(
        program,
        "points",
        TypeSignature::SzArray(Box::new(TypeSignature::ValueType(point))),
    );
    builder.field(
        program,
        "pair",
        TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(pair)),
            vec![TypeSignature::ValueType(point), TypeSignature::Class(widget)],
        ),
    );

    let module = builder.module_mut();
    let create_point = module.add_method_spec(MethodSpec {
        method: create,
        instantiation: vec![TypeSignature::ValueType(point)],
    });
    let widgets = module.add_type_spec(TypeSignature::GenericInst(
        Box::new(TypeSignature::Class(container)),
        vec![TypeSignature::Class(widget)],
    ));
    let greeting = module.add_user_string("hello");

    let main_body = MethodBody {
        max_stack: 2,
        init_locals: true,
        locals: vec![TypeSignature::Class(widget)],
        instructions: vec![
            Instruction::with_token(opcodes::NEWOBJ, widget_ctor),
            Instruction::with_token(opcodes::CALL, create_point),
            Instruction::with_token(opcodes::LDTOKEN, widgets),
            Instruction::with_token(opcodes::LDSTR, greeting),
            Instruction::simple(opcodes::RET),
        ],
        ..Default::default()
    };
    let main = builder.method(program, "Main", SignatureMethod::default(), Some(main_body));
    builder.method(
        program,
        "Show",
        SignatureMethod {
            params: vec![TypeSignature::Class(widget)],
            ..Default::default()
        },
        Some(MethodBody {
            instructions: vec![
                Instruction::with_token(opcodes::CALL, main),
                Instruction::simple(opcodes::RET),
            ],
            ..Default::default()
        }),
    );
    let getter = builder.method(
        program,
        "get_Current",
        SignatureMethod {
            has_this: true,
            return_type: TypeSignature::Class(widget),
            ..Default::default()
        },
        None,
    );

    let module = builder.module_mut();
    module
        .add_property(
            program,
            PropertyDef {
                name: "Current".to_string(),
                flags: 0,
                signature: SignatureProperty {
                    has_this: true,
                    base: TypeSignature::Class(widget),
                    params: Vec::new(),
                },
                getters: vec![getter],
                setters: Vec::new(),
                others: Vec::new(),
                custom_attributes: Vec::new(),
            },
        )
        .unwrap();
    module
        .type_def_mut(program)
        .unwrap()
        .custom_attributes
        .push(CustomAttribute::new(
            attribute_ctor,
            vec![CustomAttributeArgument {
                arg_type: TypeSignature::Object,
                value: CustomAttributeValue::Boxed(Box::new(CustomAttributeArgument {
                    arg_type: TypeSignature::ValueType(point),
                    value: CustomAttributeValue::I4(3),
                })),
            }],
        ));

    let derived = builder.class("App", "FancyWidget");
    let derived_row = builder.module_mut().type_def_mut(derived).unwrap();
    derived_row.extends = Some(widget);
    derived_row.interfaces.push(slot);

    (builder.build(), sample_target())
}

/// A WPF consumer carrying `App.g.resources` with [`baml::sample_resources`], paired with
/// [`sample_target`].
pub fn sample_markup_consumer() -> (ModuleDef, ModuleDef) {
    let mut builder = ModuleBuilder::new("App");
    let framework = builder.assembly_ref("PresentationFramework");
    let window = builder.type_ref(framework, "System.Windows", "Window");

    let main_window = builder.class("App", "MainWindow");
    builder.module_mut().type_def_mut(main_window).unwrap().extends = Some(window);

    let mut module = builder.build();
    module
        .resources
        .push(ManifestResource::new("App.Properties.Resources.resources", vec![0xCE, 0xCA, 0xEF, 0xBE]));
    module
        .resources
        .push(ManifestResource::new("App.g.resources", baml::sample_resources()));

    (module, sample_target())
}
