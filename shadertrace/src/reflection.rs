//! Shader resource reflection.
//!
//! Rather than reflecting compiled bytecode, these are built directly off
//! the traced [`crate::ast::Structure`] while it is still in memory — we
//! already know every binding's name, type, and accumulated permission, so
//! there is nothing a reflection pass over SPIR-V could tell us that we
//! don't already have.
use crate::{
    ast::{AccessPermission, Statement, Structure, TypeData, VarKind},
    context::StageRecord,
};
use indexmap::IndexMap;
use smol_str::SmolStr;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BindType {
    PushConstantMember,
    StageInput,
    StageOutput,
    UniformBuffer,
    /// A texture bound only through a sampler (reads through `.sample()`).
    SampledImage,
    /// A generic texture binding not distinguished by sample/storage use.
    /// Not produced by `push_var_binding`, which always picks `SampledImage`
    /// or `StorageTexture` once it knows the accumulated permission; kept so
    /// callers that only care "is this some kind of texture" have a catch-all
    /// to match against.
    Texture,
    Sampler,
    /// A typed, structured buffer (`StructuredBuffer`/`RWStructuredBuffer`).
    StorageBuffer,
    /// An untyped byte-addressed buffer. Not produced by the current
    /// builder surface — there is no raw-buffer proxy type yet — kept so
    /// the vocabulary matches the full resource-binding model.
    RawBuffer,
    /// A texture accessed directly (`.at()`/`.assign()`), without going
    /// through a sampler, so it is read/write-capable like an image store.
    StorageTexture,
    /// No binding role; not produced by `push_var_binding`, which is only
    /// ever called for a variable that does have one.
    None,
}

#[derive(Clone, Debug)]
pub struct BindInfo {
    pub set: u32,
    pub binding: u32,
    pub location: u32,
    pub semantic: Option<SmolStr>,
    pub variate_name: SmolStr,
    pub type_name: SmolStr,
    pub bind_type: BindType,
    pub permission: AccessPermission,
}

/// The reflected resource surface of one compiled stage (or, for the
/// bindless pass, one whole pipeline).
#[derive(Clone, Debug, Default)]
pub struct ShaderResources {
    pub push_constant_size: u32,
    pub push_constant_name: Option<SmolStr>,
    pub bind_info_pool: IndexMap<SmolStr, BindInfo>,
}

impl ShaderResources {
    pub fn find(&self, name: &str) -> Option<&BindInfo> {
        self.bind_info_pool.get(name)
    }
}

/// Builds the reflection surface for one stage record: its inputs, outputs,
/// and whatever global uniforms/arrays/textures it uses, drawn from the
/// shared `Structure` the stage was traced into.
pub fn reflect_stage(
    structure: &Structure,
    stage: &StageRecord,
    type_name: impl Fn(&Structure, crate::context::Id<TypeData>) -> String,
) -> ShaderResources {
    let mut resources = ShaderResources::default();
    let mut binding = 0u32;

    for stmt in &stage.inputs {
        if let Statement::DefineInput(id) | Statement::DefineSystemSemanticVariable(id) = *stmt {
            push_var_binding(structure, &mut resources, id, BindType::StageInput, &mut binding, &type_name);
        }
    }
    for stmt in &stage.outputs {
        if let Statement::DefineOutput(id) | Statement::DefineSystemSemanticVariable(id) = *stmt {
            push_var_binding(structure, &mut resources, id, BindType::StageOutput, &mut binding, &type_name);
        }
    }
    for stmt in &structure.global_statements {
        match *stmt {
            Statement::DefineUniform(id) => {
                let var = structure.values[id].as_var();
                let push_constant = matches!(var.map(|v| &v.kind), Some(VarKind::Uniform { push_constant: true }));
                let is_sampler = matches!(var.map(|v| &structure.types[v.ty]), Some(TypeData::Sampler));
                let bind_type = if is_sampler {
                    BindType::Sampler
                } else if push_constant {
                    BindType::PushConstantMember
                } else {
                    BindType::UniformBuffer
                };
                push_var_binding(structure, &mut resources, id, bind_type, &mut binding, &type_name);
            }
            Statement::DefineUniversalArray(id) => {
                push_var_binding(structure, &mut resources, id, BindType::StorageBuffer, &mut binding, &type_name);
            }
            Statement::DefineUniversalTexture2D(id) => {
                let written = structure.values[id].as_var().map_or(false, |v| v.permission.contains(AccessPermission::WRITE));
                let bind_type = if written { BindType::StorageTexture } else { BindType::SampledImage };
                push_var_binding(structure, &mut resources, id, bind_type, &mut binding, &type_name);
            }
            _ => {}
        }
    }
    resources
}

fn push_var_binding(
    structure: &Structure,
    resources: &mut ShaderResources,
    id: crate::context::Id<crate::ast::ValueData>,
    bind_type: BindType,
    binding: &mut u32,
    type_name: &impl Fn(&Structure, crate::context::Id<TypeData>) -> String,
) {
    let var = structure.values[id].as_var().expect("reflection target must be a Var node");
    let (location, semantic) = match &var.kind {
        VarKind::Input { location } => (*location, None),
        VarKind::Output { location, semantic } => (location.unwrap_or(0), semantic.as_ref().map(|s| SmolStr::new(s.slang_name()))),
        _ => (0, None),
    };
    if matches!(bind_type, BindType::PushConstantMember) {
        resources.push_constant_name = Some(var.name.clone());
    }
    let declared_type_name = match bind_type {
        BindType::StorageBuffer | BindType::SampledImage | BindType::StorageTexture => crate::emit::binding_type_name(structure, var),
        _ => type_name(structure, var.ty),
    };
    let info = BindInfo {
        set: 0,
        binding: *binding,
        location,
        semantic,
        variate_name: var.name.clone(),
        type_name: SmolStr::new(declared_type_name),
        bind_type,
        permission: var.permission,
    };
    if !matches!(bind_type, BindType::StageInput | BindType::StageOutput) {
        *binding += 1;
    }
    resources.bind_info_pool.insert(var.name.clone(), info);
}
