//! Vertex/fragment and compute pipeline drivers.
//!
//! Each driver runs the host's builder closures once per stage (twice, for a
//! bindless-enabled pipeline: a first pass to establish the non-bindless
//! program, then a second re-trace so interned aggregate/bindless-resource
//! identities persist but the statement lists are rebuilt against the
//! bindless prelude) and hands the recorded program to [`crate::emit`] and
//! [`crate::backend`].
use crate::{
    backend::{BackendRegistry, CompiledShader, CompilerOption, ShaderLanguage, TranslateError},
    cache::HardcodeManager,
    context::{self, Stage},
    emit::Emitter,
    reflection::{self, BindType, ShaderResources},
};
use std::collections::HashMap;
use thiserror::Error;

/// A call-site tag (see [`crate::source_location!`]) plus the hardcode
/// manager to deposit successful compiles into.
pub type Cache<'a> = (&'a str, &'a HardcodeManager);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("vertex stage output `{0}` has no matching fragment stage input")]
    UnmatchedInterfaceVariable(String),
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

/// One stage's emitted source plus its reflected resource surface.
#[derive(Clone, Debug)]
pub struct CompiledStage {
    pub stage: Stage,
    pub artifacts: HashMap<ShaderLanguage, CompiledShader>,
    pub resources: ShaderResources,
}

#[derive(Clone, Debug)]
pub struct CompiledPipeline {
    pub stages: Vec<CompiledStage>,
    /// The reflected, pipeline-wide resource surface built from the
    /// bindless pass when bindless compilation was requested.
    pub bindless_resources: Option<ShaderResources>,
}

fn compile_stages(
    bindless: bool,
    continuing: bool,
    options: CompilerOption,
    registry: &BackendRegistry,
    cache: Option<Cache>,
    trace: impl FnOnce(),
) -> Result<Vec<CompiledStage>, PipelineError> {
    if continuing {
        // Re-trace on the same context: keeps interned aggregate/primitive
        // identities and name counters from the first pass.
        context::begin_next_pass(bindless);
    } else {
        context::begin_pipeline(bindless);
    }
    trace();
    let stage_records = context::with_context(|ctx| ctx.end_pipeline_parse());
    // The type/value arenas are global to the pipeline compile and are not
    // reset between stages, so a snapshot taken after end_pipeline_parse
    // still holds every node referenced by every stage record, permissions
    // included — end_pipeline_parse no longer clears them.
    let structure_snapshot = context::with_context(|ctx| std::mem::take(&mut ctx.structure));

    let mut compiled = Vec::new();
    for record in &stage_records {
        let emitted_source = Emitter::new(&structure_snapshot, bindless).emit_pipeline(std::slice::from_ref(record));
        let resources = reflection::reflect_stage(&structure_snapshot, record, crate::emit::type_name);

        let mut artifacts = HashMap::new();
        for (lang, enabled) in target_languages(&options) {
            if !enabled {
                continue;
            }
            let compiled_artifact = match cache {
                Some((site, mgr)) => {
                    mgr.get_or_try_compile(site, lang, bindless, || registry.translate(&emitted_source, lang, &resources))?
                }
                None => registry.translate(&emitted_source, lang, &resources)?,
            };
            artifacts.insert(lang, compiled_artifact);
        }

        compiled.push(CompiledStage {
            stage: record.stage,
            artifacts,
            resources,
        });
    }
    Ok(compiled)
}

fn target_languages(options: &CompilerOption) -> [(ShaderLanguage, bool); 6] {
    [
        (ShaderLanguage::Glsl, options.compile_glsl),
        (ShaderLanguage::Hlsl, options.compile_hlsl),
        (ShaderLanguage::Dxil, options.compile_dxil),
        (ShaderLanguage::Dxbc, options.compile_dxbc),
        (ShaderLanguage::SpirV, options.compile_spirv),
        (ShaderLanguage::Slang, true),
    ]
}

/// Checks that every fragment-stage input location has a same-typed
/// vertex-stage output at that location, per the vertex↔fragment
/// interface-matching rule. Matching is by `location`, not by generated
/// variable name: each stage traces its own independently named locals, so
/// location is the only thing the two sides actually agree on.
fn check_interface_match(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<(), PipelineError> {
    let vertex_outputs: HashMap<u32, &str> = vertex
        .resources
        .bind_info_pool
        .values()
        .filter(|info| info.bind_type == BindType::StageOutput)
        .map(|info| (info.location, info.type_name.as_str()))
        .collect();
    for info in fragment.resources.bind_info_pool.values() {
        if info.bind_type != BindType::StageInput {
            continue;
        }
        match vertex_outputs.get(&info.location) {
            Some(&ty) if ty == info.type_name.as_str() => {}
            _ => return Err(PipelineError::UnmatchedInterfaceVariable(info.variate_name.to_string())),
        }
    }
    Ok(())
}

/// Compiles a vertex+fragment pipeline by tracing `vertex_fn` then
/// `fragment_fn` in sequence on one [`crate::context::ParserContext`], then
/// (if `options.enable_bindless`) re-tracing both against the bindless
/// prelude to produce the bindless-pass artifacts.
pub fn compile_rasterized_pipeline(
    vertex_fn: impl FnOnce() + Clone,
    fragment_fn: impl FnOnce() + Clone,
    options: CompilerOption,
    registry: &BackendRegistry,
) -> Result<CompiledPipeline, PipelineError> {
    compile_rasterized_pipeline_cached(vertex_fn, fragment_fn, options, registry, None)
}

/// Like [`compile_rasterized_pipeline`], but deposits (and looks up)
/// successful per-language compiles in `cache` under `cache`'s call-site
/// tag, so a repeat compile of the same pipeline skips the back-end
/// translation step entirely.
pub fn compile_rasterized_pipeline_cached(
    vertex_fn: impl FnOnce() + Clone,
    fragment_fn: impl FnOnce() + Clone,
    options: CompilerOption,
    registry: &BackendRegistry,
    cache: Option<Cache>,
) -> Result<CompiledPipeline, PipelineError> {
    let stages = compile_stages(false, false, options, registry, cache, || {
        context::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
        vertex_fn.clone()();
        context::with_context(|ctx| ctx.begin_shader_parse(Stage::Fragment));
        fragment_fn.clone()();
    })?;
    check_interface_match(&stages[0], &stages[1])?;

    let bindless_resources = if options.enable_bindless {
        let bindless_stages = compile_stages(true, true, options, registry, cache, || {
            context::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
            vertex_fn();
            context::with_context(|ctx| ctx.begin_shader_parse(Stage::Fragment));
            fragment_fn();
        })?;
        Some(merge_resources(&bindless_stages))
    } else {
        None
    };

    Ok(CompiledPipeline {
        stages,
        bindless_resources,
    })
}

/// Compiles a single-stage compute pipeline.
pub fn compile_compute_pipeline(
    compute_fn: impl FnOnce() + Clone,
    options: CompilerOption,
    registry: &BackendRegistry,
) -> Result<CompiledPipeline, PipelineError> {
    compile_compute_pipeline_cached(compute_fn, options, registry, None)
}

/// Like [`compile_compute_pipeline`], but deposits (and looks up) successful
/// per-language compiles in `cache` under `cache`'s call-site tag.
pub fn compile_compute_pipeline_cached(
    compute_fn: impl FnOnce() + Clone,
    options: CompilerOption,
    registry: &BackendRegistry,
    cache: Option<Cache>,
) -> Result<CompiledPipeline, PipelineError> {
    let stages = compile_stages(false, false, options, registry, cache, || {
        context::with_context(|ctx| ctx.begin_shader_parse(Stage::Compute));
        compute_fn.clone()();
    })?;

    let bindless_resources = if options.enable_bindless {
        let bindless_stages = compile_stages(true, true, options, registry, cache, || {
            context::with_context(|ctx| ctx.begin_shader_parse(Stage::Compute));
            compute_fn();
        })?;
        Some(merge_resources(&bindless_stages))
    } else {
        None
    };

    Ok(CompiledPipeline {
        stages,
        bindless_resources,
    })
}

fn merge_resources(stages: &[CompiledStage]) -> ShaderResources {
    let mut merged = ShaderResources::default();
    for stage in stages {
        for (name, info) in &stage.resources.bind_info_pool {
            merged.bind_info_pool.entry(name.clone()).or_insert_with(|| info.clone());
        }
        if let Some(name) = &stage.resources.push_constant_name {
            merged.push_constant_name = Some(name.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Proxy, Vec4, F32};

    #[test]
    fn rasterized_pipeline_emits_vertex_and_fragment_stages() {
        let registry = BackendRegistry::default();
        let pipeline = compile_rasterized_pipeline(
            || {
                let pos = Vec4::default();
                context::with_context(|ctx| {
                    let ty = <Vec4 as Proxy>::shader_type(ctx);
                    ctx.get_position_output(ty);
                });
                let _ = pos;
            },
            || {
                let _color = Vec4::default();
            },
            CompilerOption::default(),
            &registry,
        )
        .unwrap();

        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[0].stage, Stage::Vertex);
        assert_eq!(pipeline.stages[1].stage, Stage::Fragment);
        assert!(pipeline.stages[0].artifacts.contains_key(&ShaderLanguage::Slang));
    }

    #[test]
    fn compute_pipeline_emits_a_single_stage() {
        let registry = BackendRegistry::default();
        let pipeline = compile_compute_pipeline(
            || {
                let _x = F32::default();
            },
            CompilerOption::default(),
            &registry,
        )
        .unwrap();
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].stage, Stage::Compute);
    }

    #[test]
    fn bindless_request_adds_a_merged_resource_snapshot() {
        let registry = BackendRegistry::default();
        let mut options = CompilerOption::default();
        options.enable_bindless = true;
        let pipeline = compile_compute_pipeline(
            || {
                let _x = F32::default();
            },
            options,
            &registry,
        )
        .unwrap();
        assert!(pipeline.bindless_resources.is_some());
    }

    #[test]
    fn non_bindless_request_skips_the_second_pass() {
        let registry = BackendRegistry::default();
        let mut options = CompilerOption::default();
        options.enable_bindless = false;
        let pipeline = compile_compute_pipeline(
            || {
                let _x = F32::default();
            },
            options,
            &registry,
        )
        .unwrap();
        assert!(pipeline.bindless_resources.is_none());
    }

    #[test]
    fn cached_compile_is_served_from_the_hardcode_manager_on_repeat() {
        let registry = BackendRegistry::default();
        let cache = crate::cache::HardcodeManager::new();
        let site = crate::source_location!();
        for _ in 0..2 {
            let pipeline = compile_compute_pipeline_cached(
                || {
                    let _x = F32::default();
                },
                CompilerOption::default(),
                &registry,
                Some((site, &cache)),
            )
            .unwrap();
            assert_eq!(pipeline.stages.len(), 1);
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn mismatched_vertex_fragment_interface_is_rejected() {
        let registry = BackendRegistry::default();
        let result = compile_rasterized_pipeline(
            || {
                context::with_context(|ctx| {
                    let ty = <Vec4 as Proxy>::shader_type(ctx);
                    ctx.get_position_output(ty);
                    let out_ty = ctx.primitive_type(crate::ast::PrimitiveType::F32);
                    ctx.define_output_variate(out_ty, Some(3), None);
                });
            },
            || {
                context::with_context(|ctx| {
                    let in_ty = ctx.primitive_type(crate::ast::PrimitiveType::F32);
                    ctx.define_input_variate(in_ty, 9);
                });
            },
            CompilerOption::default(),
            &registry,
        );
        assert!(matches!(result, Err(PipelineError::UnmatchedInterfaceVariable(_))));
    }
}
