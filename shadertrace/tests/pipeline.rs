//! End-to-end builder scenarios, exercised through the public `shadertrace`
//! API rather than internal module paths.
use shadertrace::{
    compile_compute_pipeline, compile_rasterized_pipeline, context, AggregateProxy, Array, BackendRegistry,
    CompilerOption, Proxy, ShaderLanguage, ShaderStruct, Stage, I32, U32, UVec3, Vec2, Vec4, F32,
};

#[derive(ShaderStruct)]
struct Material {
    albedo: Vec4,
    roughness: F32,
}

fn mock_registry() -> BackendRegistry {
    BackendRegistry::with_mock_translator()
}

#[test]
fn vertex_fragment_pipeline_emits_both_stage_entry_points() {
    let pipeline = compile_rasterized_pipeline(
        || {
            let position = Vec4::default();
            context::with_context(|ctx| {
                let ty = <Vec4 as Proxy>::shader_type(ctx);
                ctx.get_position_output(ty);
            });
            let _ = position;
        },
        || {
            let color = Vec4::default();
            let _ = color;
        },
        CompilerOption {
            enable_bindless: false,
            ..CompilerOption::default()
        },
        &mock_registry(),
    )
    .unwrap();

    assert_eq!(pipeline.stages.len(), 2);
    assert_eq!(pipeline.stages[0].stage, Stage::Vertex);
    assert_eq!(pipeline.stages[1].stage, Stage::Fragment);

    let vertex_source = pipeline.stages[0].artifacts[&ShaderLanguage::Slang].as_source().unwrap();
    assert!(vertex_source.contains("VSMain"));
    let fragment_source = pipeline.stages[1].artifacts[&ShaderLanguage::Slang].as_source().unwrap();
    assert!(fragment_source.contains("PSMain"));
}

#[test]
fn compute_pipeline_traces_a_storage_buffer_write() {
    let pipeline = compile_compute_pipeline(
        || {
            context::with_context(|ctx| {
                let u32_ty = ctx.primitive_type(shadertrace::ast::PrimitiveType::U32);
                let array_ty = ctx.array_type(u32_ty);
                let buf = ctx.define_uniform_variate(array_ty, false);
                let zero = ctx.literal(u32_ty, shadertrace::ast::Literal::Scalar(shadertrace::ast::ScalarLit::U32(0)));
                let elem = ctx.at(buf, zero);
                let one = ctx.literal(u32_ty, shadertrace::ast::Literal::Scalar(shadertrace::ast::ScalarLit::U32(1)));
                ctx.assign(elem, one);
                ctx.accumulate_permission(elem, shadertrace::AccessPermission::WRITE);
            });
        },
        CompilerOption {
            enable_bindless: false,
            ..CompilerOption::default()
        },
        &mock_registry(),
    )
    .unwrap();

    assert_eq!(pipeline.stages.len(), 1);
    let resources = &pipeline.stages[0].resources;
    let storage = resources
        .bind_info_pool
        .values()
        .find(|info| info.bind_type == shadertrace::BindType::StorageBuffer)
        .expect("no storage buffer binding recorded");
    assert!(storage.type_name.starts_with("RW"));
}

#[test]
fn host_aggregate_derives_a_struct_definition_and_member_access() {
    let pipeline = compile_compute_pipeline(
        || {
            let material = AggregateProxy::<Material>::default();
            let _albedo = material.fields.albedo;
            let _roughness = material.fields.roughness;
        },
        CompilerOption {
            enable_bindless: false,
            ..CompilerOption::default()
        },
        &mock_registry(),
    )
    .unwrap();

    let source = pipeline.stages[0].artifacts[&ShaderLanguage::Slang].as_source().unwrap();
    assert!(source.contains("struct Material") || source.contains("aggregate_type"));
}

#[test]
fn bindless_pipeline_runs_a_second_pass_with_the_descriptor_prelude() {
    let pipeline = compile_compute_pipeline(
        || {
            let _dispatch_id = UVec3::default();
        },
        CompilerOption {
            enable_bindless: true,
            ..CompilerOption::default()
        },
        &mock_registry(),
    )
    .unwrap();

    assert!(pipeline.bindless_resources.is_some());
}

#[test]
fn mismatched_interface_locations_fail_the_compile() {
    let result = compile_rasterized_pipeline(
        || {
            context::with_context(|ctx| {
                let ty = <Vec4 as Proxy>::shader_type(ctx);
                ctx.get_position_output(ty);
                let f32_ty = ctx.primitive_type(shadertrace::ast::PrimitiveType::F32);
                ctx.define_output_variate(f32_ty, Some(0), None);
            });
        },
        || {
            context::with_context(|ctx| {
                let vec2_ty = <Vec2 as Proxy>::shader_type(ctx);
                ctx.define_input_variate(vec2_ty, 0);
            });
        },
        CompilerOption {
            enable_bindless: false,
            ..CompilerOption::default()
        },
        &mock_registry(),
    );

    assert!(result.is_err());
}

#[test]
fn array_indexing_round_trips_through_construct_default() {
    let pipeline = compile_compute_pipeline(
        || {
            let arr: Array<I32> = Array::default();
            let index = U32::from(2u32);
            let _elem = arr.at(index);
        },
        CompilerOption {
            enable_bindless: false,
            ..CompilerOption::default()
        },
        &mock_registry(),
    )
    .unwrap();
    assert_eq!(pipeline.stages.len(), 1);
}
