//! A trace-and-emit shader DSL: write shader bodies as ordinary Rust
//! functions over proxy values, and get a Slang (or GLSL/HLSL/SPIR-V)
//! program back.
//!
//! Proxy types (see [`proxy`]) overload arithmetic and comparison operators
//! to record AST nodes into a thread-local [`context::ParserContext`]
//! instead of computing anything. A pipeline driver in [`pipeline`] runs the
//! host's closures once per stage, then [`emit`] walks the recorded
//! [`ast::Structure`] to produce Slang source, [`reflection`] builds the
//! resource surface straight off the same structure, and [`backend`]
//! dispatches the emitted source to whichever target compiler the caller
//! registered. [`cache`] memoizes the whole pipeline by call site.
/// Expands to a `&'static str` identifying the call site, for keying
/// [`HardcodeManager`] entries without spelling out `file!()`/`line!()` by
/// hand.
#[macro_export]
macro_rules! source_location {
    () => {
        concat!(file!(), ":", line!(), ":", column!())
    };
}

pub mod ast;
pub mod backend;
pub mod cache;
pub mod context;
pub mod control_flow;
pub mod emit;
pub mod pipeline;
pub mod proxy;
pub mod reflection;

pub use shadertrace_macros::ShaderStruct;

pub use crate::{
    ast::{AccessPermission, Field},
    backend::{BackendRegistry, CompiledShader, CompilerOption, MockTranslator, ShaderLanguage, TranslateError, Translator},
    cache::HardcodeManager,
    context::{ParserContext, Stage},
    control_flow::{shader_do_while, shader_for, shader_if, shader_while},
    pipeline::{
        compile_compute_pipeline, compile_compute_pipeline_cached, compile_rasterized_pipeline,
        compile_rasterized_pipeline_cached, Cache, CompiledPipeline, CompiledStage, PipelineError,
    },
    proxy::{
        Aggregate, AggregateProxy, Array, Bool, Compare, Effect, Element, Matrix, Proxy, Sampler, Scalar,
        Texture2D, Vector, F32, F64, I32, IVec2, Mat3, Mat4, U32, UVec3, Vec2, Vec3, Vec4,
    },
    reflection::{BindInfo, BindType, ShaderResources},
};
