//! A minimal fullscreen-background pass: a vertex stage that places a single
//! clip-space quad vertex and a fragment stage that samples a scrolling
//! uniform-driven color, compiled to every configured target language and
//! logged at `debug`.
use anyhow::Context;
use shadertrace::{
    compile_rasterized_pipeline, context, BackendRegistry, CompilerOption, Proxy, ShaderLanguage, Vec2, Vec4, F32,
};

#[derive(Copy, Clone)]
struct BackgroundParams {
    resolution: Vec2,
    scroll_offset: Vec2,
    zoom: F32,
}

fn vertex_stage() {
    let position = Vec4::default();
    context::with_context(|ctx| {
        let ty = <Vec4 as Proxy>::shader_type(ctx);
        ctx.get_position_output(ty);
    });
    let _ = position;
}

fn fragment_stage() {
    context::with_context(|ctx| {
        let vec2_ty = <Vec2 as Proxy>::shader_type(ctx);
        let f32_ty = <F32 as Proxy>::shader_type(ctx);
        let resolution = ctx.define_uniform_variate(vec2_ty, false);
        let scroll_offset = ctx.define_uniform_variate(vec2_ty, false);
        let zoom = ctx.define_uniform_variate(f32_ty, false);
        let _params = BackgroundParams {
            resolution: Vec2::from_value(resolution),
            scroll_offset: Vec2::from_value(scroll_offset),
            zoom: F32::from_value(zoom),
        };
        let out_ty = <Vec4 as Proxy>::shader_type(ctx);
        ctx.define_output_variate(out_ty, Some(0), None);
    });
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = BackendRegistry::with_mock_translator();
    let options = CompilerOption {
        enable_bindless: false,
        ..CompilerOption::default()
    };
    let pipeline = compile_rasterized_pipeline(vertex_stage, fragment_stage, options, &registry)
        .context("background pipeline failed to compile")?;

    for stage in &pipeline.stages {
        let slang_source = stage.artifacts[&ShaderLanguage::Slang]
            .as_source()
            .context("expected a source artifact for the Slang target")?;
        tracing::debug!(stage = ?stage.stage, source = %slang_source, "compiled background stage");
    }
    Ok(())
}
