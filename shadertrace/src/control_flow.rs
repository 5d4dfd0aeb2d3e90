//! RAII combinators over the raw `begin_*`/`end_*` pairs in [`crate::context`].
//!
//! These exist so a forgotten closing call is a compile error (an unused
//! guard) rather than a malformed AST discovered only at emit time. A loop
//! body closure is invoked exactly once regardless of the host condition's
//! truth value: proxy tracing is a single static pass over the builder, not
//! an interpretation of it, so the closure's job is only to populate
//! `Statement::While`'s `body`.
use crate::{
    ast::LoopKind,
    context,
    proxy::{Bool, Proxy},
};

/// `shader_if(cond, || { ... })` with an optional chained `.elif`/`.else_`.
/// Both arms are fully recorded by the time this (or any chained call)
/// returns, so the builder carries no state of its own — it only exists to
/// give `.elif`/`.else_` somewhere to attach.
pub struct IfBuilder;

pub fn shader_if(cond: Bool, then: impl FnOnce()) -> IfBuilder {
    context::with_context(|ctx| ctx.begin_if(cond.value_id()));
    then();
    context::with_context(|ctx| ctx.end_if());
    IfBuilder
}

impl IfBuilder {
    pub fn elif(self, cond: Bool, then: impl FnOnce()) -> Self {
        context::with_context(|ctx| ctx.begin_elif(cond.value_id()));
        then();
        context::with_context(|ctx| ctx.end_elif());
        self
    }

    pub fn else_(self, then: impl FnOnce()) {
        context::with_context(|ctx| ctx.begin_else());
        then();
        context::with_context(|ctx| ctx.end_else());
    }
}

/// `shader_while(|| cond_expr, || { body })`. The condition closure is
/// re-evaluated on the host exactly once, *before* the body, to build the
/// `cond` node; it must not depend on loop-carried host state the way a real
/// interpreted `while` would, since the body runs only once during tracing.
pub fn shader_while(cond: impl FnOnce() -> Bool, body: impl FnOnce()) {
    let cond = cond();
    context::with_context(|ctx| ctx.begin_while(cond.value_id(), LoopKind::While));
    body();
    context::with_context(|ctx| ctx.end_while());
}

/// `shader_do_while(|| { body }, || cond_expr)`: matches `do { body } while
/// (cond);` — the condition is traced after the body, reflecting that in the
/// source language the condition expression's variables are in scope after
/// one iteration of the body.
pub fn shader_do_while(body: impl FnOnce(), cond: impl FnOnce() -> Bool) {
    context::with_context(|ctx| ctx.begin_while(placeholder_cond(), LoopKind::DoWhile));
    body();
    let cond = cond();
    context::with_context(|ctx| ctx.set_while_cond(cond.value_id()));
    context::with_context(|ctx| ctx.end_while());
}

fn placeholder_cond() -> crate::context::Id<crate::ast::ValueData> {
    context::with_context(|ctx| {
        let ty = ctx.primitive_type(crate::ast::PrimitiveType::Bool);
        ctx.literal(ty, crate::ast::Literal::Scalar(crate::ast::ScalarLit::Bool(true)))
    })
}

/// `shader_for(init, || cond_expr, || step_effect, || { body })`: lowers to a
/// `while` node with the init hoisted before it and the step folded into the
/// tail of the body, matching how the back end only has `while`/`do-while`.
pub fn shader_for<Init>(init: impl FnOnce() -> Init, cond: impl FnOnce() -> Bool, step: impl FnOnce(), body: impl FnOnce())
where
    Init: Proxy,
{
    let _ = init();
    shader_while(cond, || {
        body();
        step();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::Statement,
        context::Stage,
        proxy::{Scalar, I32},
    };

    fn begin(stage: Stage) {
        context::begin_pipeline(false);
        context::with_context(|ctx| ctx.begin_shader_parse(stage));
    }

    /// Finds the last `If`/`While` statement appended to the top-level local
    /// list, skipping over the `DefineLocal`s a `Bool::from(..)` condition
    /// materialises in the caller's scope before the control-flow call.
    fn last_statement(ctx: &crate::context::ParserContext) -> &Statement {
        ctx.structure.local_statements.last().expect("no statement recorded")
    }

    #[test]
    fn shader_if_records_a_single_if_statement_regardless_of_branch() {
        begin(Stage::Fragment);
        let cond = Bool::from(true);
        shader_if(cond, || {
            let _x = I32::default();
        });
        context::with_context(|ctx| {
            assert!(matches!(last_statement(ctx), Statement::If { .. }));
        });
    }

    #[test]
    fn if_elif_else_chain_builds_one_statement_with_all_arms() {
        begin(Stage::Fragment);
        let cond = Bool::from(true);
        let elif_cond = Bool::from(false);
        shader_if(cond, || {}).elif(elif_cond, || {}).else_(|| {});
        context::with_context(|ctx| match last_statement(ctx) {
            Statement::If { arms, else_body } => {
                assert_eq!(arms.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected If, got {:?}", other),
        });
    }

    #[test]
    fn shader_while_runs_body_closure_exactly_once() {
        begin(Stage::Compute);
        let mut calls = 0;
        shader_while(
            || Bool::from(true),
            || {
                calls += 1;
                let _x = I32::default();
            },
        );
        assert_eq!(calls, 1);
        context::with_context(|ctx| match last_statement(ctx) {
            Statement::While { body, .. } => assert_eq!(body.len(), 1),
            other => panic!("expected While, got {:?}", other),
        });
    }

    #[test]
    fn shader_do_while_traces_condition_after_the_body() {
        begin(Stage::Compute);
        shader_do_while(
            || {
                let _x = I32::default();
            },
            || Bool::from(false),
        );
        context::with_context(|ctx| match last_statement(ctx) {
            Statement::While { cond, kind, body } => {
                assert_eq!(*kind, crate::ast::LoopKind::DoWhile);
                // The condition was patched away from the placeholder literal:
                // it now names the local the real condition got wrapped in,
                // and that local's own DefineLocal (appended to the body
                // after the real body statements) inits from `false`.
                let define = body
                    .iter()
                    .find_map(|s| match s {
                        Statement::DefineLocal { var, init } if *var == *cond => *init,
                        _ => None,
                    })
                    .expect("no DefineLocal for the patched condition");
                assert!(matches!(
                    &ctx.structure.values[define],
                    crate::ast::ValueData::Literal {
                        lit: crate::ast::Literal::Scalar(crate::ast::ScalarLit::Bool(false)),
                        ..
                    }
                ));
            }
            other => panic!("expected While, got {:?}", other),
        });
    }

    #[test]
    fn shader_for_folds_step_into_the_body_tail() {
        begin(Stage::Compute);
        shader_for(
            || Scalar::<i32>::from(0),
            || Bool::from(true),
            || {
                let _ = I32::default();
            },
            || {
                let _ = I32::default();
            },
        );
        context::with_context(|ctx| match last_statement(ctx) {
            Statement::While { body, kind, .. } => {
                assert_eq!(*kind, crate::ast::LoopKind::While);
                assert_eq!(body.len(), 2);
            }
            other => panic!("expected While, got {:?}", other),
        });
    }
}
