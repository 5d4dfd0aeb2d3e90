//! The per-thread parser context.
//!
//! Proxy operator overloads have no context parameter — they need an ambient
//! "where am I writing to?" pointer. We give them one through a thread-local
//! [`ParserContext`] rather than a raw static, so multiple pipelines can
//! compile concurrently on different threads without mutual interference and
//! without locking on the hot tracing path (see the crate's concurrency
//! notes). The statement "stack" below is not a stack of pointers into the
//! AST (those would dangle the moment a `Vec<Statement>` reallocates) — it is
//! a path of indices, re-walked from the stage's local-statement list on
//! every push. Depth is bounded by nesting of `if`/`while`, so the cost is
//! negligible.
use crate::ast::{
    AccessPermission, AggregateType, Field, IfArm, Literal, LoopKind, PrimitiveType, Semantic, Statement,
    Structure, TypeData, ValueData, VarData, VarKind,
};
use smol_str::SmolStr;
use std::{
    any::TypeId,
    cell::RefCell,
    collections::HashMap,
};

pub use crate::ast::Id;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}

impl Stage {
    pub fn slang_attribute(&self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
            Stage::Compute => "compute",
        }
    }
}

/// One stage's recorded statements, snapshotted when the stage is closed
/// (`beginShaderParse` of the next stage, or `endPipelineParse`).
#[derive(Debug)]
pub struct StageRecord {
    pub stage: Stage,
    pub inputs: Vec<Statement>,
    pub outputs: Vec<Statement>,
    pub locals: Vec<Statement>,
}

#[derive(Clone, Debug)]
enum Descend {
    IfArm(usize),
    IfElse,
    WhileBody,
}

/// How a default-constructed proxy decides what kind of AST node to create;
/// see `proxy::Proxy::construct_default`.
#[derive(Clone, Debug)]
pub enum ConstructionScope {
    VectorComponent {
        parent: Id<ValueData>,
        arity: u8,
    },
    AggregateMember {
        parent: Id<ValueData>,
        fields: Vec<Field>,
        next_index: usize,
    },
    InputParameter {
        next_location: u32,
    },
}

pub struct ParserContext {
    pub structure: Structure,
    path: Vec<(usize, Descend)>,
    construction_scopes: Vec<ConstructionScope>,

    local_counter: u32,
    global_counter: u32,
    aggregate_counter: u32,

    aggregate_interner: HashMap<TypeId, Id<TypeData>>,
    primitive_cache: HashMap<PrimitiveType, Id<TypeData>>,

    position_output: Option<Id<ValueData>>,
    dispatch_thread_id_input: Option<Id<ValueData>>,

    active_stage: Option<Stage>,
    is_in_shader_parse: bool,
    pub bindless: bool,
    completed: Vec<StageRecord>,
}

impl ParserContext {
    fn new(bindless: bool) -> ParserContext {
        ParserContext {
            structure: Structure::new(),
            path: Vec::new(),
            construction_scopes: Vec::new(),
            local_counter: 0,
            global_counter: 0,
            aggregate_counter: 0,
            aggregate_interner: HashMap::new(),
            primitive_cache: HashMap::new(),
            position_output: None,
            dispatch_thread_id_input: None,
            active_stage: None,
            is_in_shader_parse: false,
            bindless,
            completed: Vec::new(),
        }
    }

    pub fn is_in_shader_parse(&self) -> bool {
        self.is_in_shader_parse
    }

    pub fn active_stage(&self) -> Option<Stage> {
        self.active_stage
    }

    ////////////////////////////////////////////////////////////////////////
    // Lifecycle
    ////////////////////////////////////////////////////////////////////////

    /// Flushes any still-open stage, sets the active stage, and resets the
    /// per-stage lists and local counter.
    pub fn begin_shader_parse(&mut self, stage: Stage) {
        tracing::debug!(?stage, "beginShaderParse");
        if self.active_stage.is_some() {
            self.flush_stage();
        }
        self.reset();
        self.active_stage = Some(stage);
        self.is_in_shader_parse = true;
        self.position_output = None;
        self.dispatch_thread_id_input = None;
    }

    /// Clears the per-stage lists and the local name counter. Globals and
    /// their counter persist until the pipeline ends.
    pub fn reset(&mut self) {
        self.structure.reset_stage();
        self.local_counter = 0;
        self.path.clear();
        self.construction_scopes.clear();
    }

    fn flush_stage(&mut self) {
        let stage = self.active_stage.take().expect("flush_stage called with no active stage");
        self.completed.push(StageRecord {
            stage,
            inputs: std::mem::take(&mut self.structure.input_statements),
            outputs: std::mem::take(&mut self.structure.output_statements),
            locals: std::mem::take(&mut self.structure.local_statements),
        });
        self.is_in_shader_parse = false;
    }

    /// Flushes the open stage and returns the accumulated per-stage records
    /// in the order the stages were opened. Global permissions are left as
    /// the trace recorded them — the emitter and reflection read them right
    /// after this call returns, so clearing them here would erase the very
    /// information they need. They are reset only when a new pass starts,
    /// by [`begin_next_pass`](Self::begin_next_pass).
    pub fn end_pipeline_parse(&mut self) -> Vec<StageRecord> {
        tracing::debug!("endPipelineParse");
        if self.active_stage.is_some() {
            self.flush_stage();
        }
        std::mem::take(&mut self.completed)
    }

    /// Starts a new trace pass on this same context, for a pipeline that
    /// re-traces its stages (the bindless descriptor-heap pass). Unlike
    /// [`begin_pipeline`], this keeps the type/aggregate interning tables and
    /// name counters so resources re-declared by the new pass keep the
    /// identities and names they were given the first time; only the
    /// per-pass bookkeeping (open stage, statement cursor, accumulated
    /// permissions) is reset.
    pub fn begin_next_pass(&mut self, bindless: bool) {
        if self.active_stage.is_some() {
            self.flush_stage();
        }
        self.path.clear();
        self.construction_scopes.clear();
        self.completed.clear();
        self.reset_global_permissions();
        self.position_output = None;
        self.dispatch_thread_id_input = None;
        self.bindless = bindless;
    }

    fn reset_global_permissions(&mut self) {
        for stmt in &self.structure.global_statements {
            let value_id = match *stmt {
                Statement::DefineUniform(id)
                | Statement::DefineUniversalArray(id)
                | Statement::DefineUniversalTexture2D(id) => Some(id),
                _ => None,
            };
            if let Some(id) = value_id {
                if let Some(var) = self.structure.values[id].as_var_mut() {
                    var.permission = AccessPermission::empty();
                }
            }
            if let Statement::DefineAggregateType(ty_id) = *stmt {
                if let TypeData::Aggregate(agg) = &mut self.structure.types[ty_id] {
                    agg.permission = AccessPermission::empty();
                }
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Unique-name allocators
    ////////////////////////////////////////////////////////////////////////

    pub fn fresh_local_name(&mut self) -> SmolStr {
        let n = self.local_counter;
        self.local_counter += 1;
        SmolStr::new(format!("var_{}", n))
    }

    pub fn fresh_global_name(&mut self) -> SmolStr {
        let n = self.global_counter;
        self.global_counter += 1;
        SmolStr::new(format!("global_var_{}", n))
    }

    pub fn fresh_aggregate_name(&mut self) -> SmolStr {
        let n = self.aggregate_counter;
        self.aggregate_counter += 1;
        SmolStr::new(format!("aggregate_type_{}", n))
    }

    ////////////////////////////////////////////////////////////////////////
    // Types
    ////////////////////////////////////////////////////////////////////////

    pub fn primitive_type(&mut self, prim: PrimitiveType) -> Id<TypeData> {
        if let Some(id) = self.primitive_cache.get(&prim) {
            return *id;
        }
        let id = self.structure.types.push(TypeData::Scalar(prim));
        self.primitive_cache.insert(prim, id);
        id
    }

    pub fn vector_type(&mut self, elem: PrimitiveType, len: u8) -> Id<TypeData> {
        self.structure.types.push(TypeData::Vector { elem, len })
    }

    pub fn matrix_type(&mut self, elem: PrimitiveType, rows: u8, cols: u8) -> Id<TypeData> {
        self.structure.types.push(TypeData::Matrix { elem, rows, cols })
    }

    pub fn array_type(&mut self, elem_ty: Id<TypeData>) -> Id<TypeData> {
        self.structure.types.push(TypeData::Array(elem_ty))
    }

    pub fn texture2d_type(&mut self, texel_ty: Id<TypeData>) -> Id<TypeData> {
        self.structure.types.push(TypeData::Texture2D(texel_ty))
    }

    pub fn sampler_type(&mut self) -> Id<TypeData> {
        self.structure.types.push(TypeData::Sampler)
    }

    /// Interns an aggregate type by host aggregate identity: repeated calls
    /// with the same `key` return the same [`Id<TypeData>`] and do not
    /// re-append a `define-aggregate-type` statement.
    pub fn create_aggregate_type(&mut self, key: TypeId, fields: Vec<Field>) -> Id<TypeData> {
        if let Some(id) = self.aggregate_interner.get(&key) {
            return *id;
        }
        let name = self.fresh_aggregate_name();
        let id = self.structure.types.push(TypeData::Aggregate(AggregateType {
            name,
            fields,
            permission: AccessPermission::empty(),
        }));
        self.aggregate_interner.insert(key, id);
        self.structure.global_statements.push(Statement::DefineAggregateType(id));
        id
    }

    ////////////////////////////////////////////////////////////////////////
    // Values / variables
    ////////////////////////////////////////////////////////////////////////

    fn push_var(&mut self, name: SmolStr, ty: Id<TypeData>, kind: VarKind) -> Id<ValueData> {
        self.structure.values.push(ValueData::Var(VarData {
            name,
            ty,
            kind,
            permission: AccessPermission::empty(),
        }))
    }

    pub fn define_local_variate(&mut self, ty: Id<TypeData>, init: Option<Id<ValueData>>) -> Id<ValueData> {
        let name = self.fresh_local_name();
        let var = self.push_var(name, ty, VarKind::Local);
        if let Some(init) = init {
            self.accumulate_permission(init, AccessPermission::READ);
        }
        self.push_statement(Statement::DefineLocal { var, init });
        var
    }

    pub fn define_input_variate(&mut self, ty: Id<TypeData>, location: u32) -> Id<ValueData> {
        let name = self.fresh_global_name();
        let var = self.push_var(name, ty, VarKind::Input { location });
        self.structure.input_statements.push(Statement::DefineInput(var));
        var
    }

    pub fn define_output_variate(
        &mut self,
        ty: Id<TypeData>,
        location: Option<u32>,
        semantic: Option<Semantic>,
    ) -> Id<ValueData> {
        let name = self.fresh_global_name();
        let var = self.push_var(name, ty, VarKind::Output { location, semantic });
        self.structure.output_statements.push(Statement::DefineOutput(var));
        var
    }

    pub fn define_system_semantic_variable(
        &mut self,
        ty: Id<TypeData>,
        semantic: Semantic,
        is_output: bool,
    ) -> Id<ValueData> {
        let name = SmolStr::new(match &semantic {
            Semantic::Position => "sv_position",
            Semantic::DispatchThreadId => "sv_dispatch_thread_id",
            Semantic::Custom(s) => s.as_str(),
        });
        let kind = if is_output {
            VarKind::Output {
                location: None,
                semantic: Some(semantic),
            }
        } else {
            VarKind::Input { location: 0 }
        };
        let var = self.push_var(name, ty, kind);
        let list = if is_output {
            &mut self.structure.output_statements
        } else {
            &mut self.structure.input_statements
        };
        list.push(Statement::DefineSystemSemanticVariable(var));
        var
    }

    pub fn define_uniform_variate(&mut self, ty: Id<TypeData>, push_constant: bool) -> Id<ValueData> {
        let name = self.fresh_global_name();
        let var = self.push_var(name, ty, VarKind::Uniform { push_constant });
        self.structure.global_statements.push(Statement::DefineUniform(var));
        var
    }

    pub fn define_universal_array(&mut self, elem_ty: Id<TypeData>) -> Id<ValueData> {
        let array_ty = self.array_type(elem_ty);
        let name = self.fresh_global_name();
        let var = self.push_var(name, array_ty, VarKind::Uniform { push_constant: false });
        self.structure.global_statements.push(Statement::DefineUniversalArray(var));
        var
    }

    pub fn define_universal_texture2d(&mut self, texel_ty: Id<TypeData>) -> Id<ValueData> {
        let tex_ty = self.texture2d_type(texel_ty);
        let name = self.fresh_global_name();
        let var = self.push_var(name, tex_ty, VarKind::Uniform { push_constant: false });
        self.structure
            .global_statements
            .push(Statement::DefineUniversalTexture2D(var));
        var
    }

    pub fn get_position_output(&mut self, vec4_ty: Id<TypeData>) -> Id<ValueData> {
        if let Some(id) = self.position_output {
            return id;
        }
        let id = self.define_system_semantic_variable(vec4_ty, Semantic::Position, true);
        self.position_output = Some(id);
        id
    }

    pub fn get_dispatch_thread_id_input(&mut self, uvec3_ty: Id<TypeData>) -> Id<ValueData> {
        if let Some(id) = self.dispatch_thread_id_input {
            return id;
        }
        let id = self.define_system_semantic_variable(uvec3_ty, Semantic::DispatchThreadId, false);
        self.dispatch_thread_id_input = Some(id);
        id
    }

    /// Walks a variable-reference chain (`member`/`element` accesses) down to
    /// its root resource and accumulates `perm` at every step.
    pub fn accumulate_permission(&mut self, value: Id<ValueData>, perm: AccessPermission) {
        let (kind, ty) = match &self.structure.values[value] {
            ValueData::Var(v) => (Some(v.kind.clone()), v.ty),
            _ => (None, self.structure.values[value].ty()),
        };
        let _ = ty;
        if let Some(var) = self.structure.values[value].as_var_mut() {
            var.permission |= perm;
        }
        match kind {
            Some(VarKind::Member { base, .. }) => self.accumulate_permission(base, perm),
            Some(VarKind::Element { base, index }) => {
                self.accumulate_permission(base, perm);
                self.accumulate_permission(index, AccessPermission::READ);
            }
            _ => {}
        }
        self.propagate_aggregate_permission(value, perm);
    }

    fn propagate_aggregate_permission(&mut self, value: Id<ValueData>, perm: AccessPermission) {
        if let ValueData::Var(VarData { ty, kind, .. }) = &self.structure.values[value] {
            let ty = *ty;
            if matches!(kind, VarKind::Member { .. }) {
                if let TypeData::Aggregate(agg) = &mut self.structure.types[ty] {
                    agg.permission |= perm;
                }
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Operators
    ////////////////////////////////////////////////////////////////////////

    pub fn binary_operator(
        &mut self,
        lhs: Id<ValueData>,
        rhs: Id<ValueData>,
        op: crate::ast::BinaryOp,
        result_ty: Option<Id<TypeData>>,
    ) -> Id<ValueData> {
        self.accumulate_permission(lhs, AccessPermission::READ);
        self.accumulate_permission(rhs, AccessPermission::READ);
        let ty = result_ty.unwrap_or_else(|| {
            if op.is_comparison() {
                self.primitive_type(PrimitiveType::Bool)
            } else {
                self.structure.values[lhs].ty()
            }
        });
        self.structure.values.push(ValueData::Binary { op, lhs, rhs, ty })
    }

    pub fn unary_operator(&mut self, operand: Id<ValueData>, op: crate::ast::UnaryOp, prefix: bool) -> Id<ValueData> {
        let perm = if op.is_mutating() {
            AccessPermission::READ | AccessPermission::WRITE
        } else {
            AccessPermission::READ
        };
        self.accumulate_permission(operand, perm);
        let ty = self.structure.values[operand].ty();
        self.structure.values.push(ValueData::Unary { op, operand, prefix, ty })
    }

    pub fn assign(&mut self, lvalue: Id<ValueData>, rvalue: Id<ValueData>) {
        self.accumulate_permission(lvalue, AccessPermission::WRITE);
        self.accumulate_permission(rvalue, AccessPermission::READ);
        self.push_statement(Statement::Assign { lvalue, rvalue });
    }

    pub fn at(&mut self, array: Id<ValueData>, index: Id<ValueData>) -> Id<ValueData> {
        let array_ty = self.structure.values[array].ty();
        let elem_ty = match &self.structure.types[array_ty] {
            TypeData::Array(elem) => *elem,
            TypeData::Texture2D(texel) => *texel,
            _ => panic!("`at` requires an array or texture2D value"),
        };
        let name = self.structure.values[array].as_var().map(|v| v.name.clone()).unwrap_or_default();
        self.push_var(name, elem_ty, VarKind::Element { base: array, index })
    }

    pub fn member(&mut self, base: Id<ValueData>, field_name: SmolStr, field_ty: Id<TypeData>) -> Id<ValueData> {
        self.push_var(field_name.clone(), field_ty, VarKind::Member { base, field: field_name })
    }

    pub fn call_func(
        &mut self,
        name: impl Into<SmolStr>,
        ret_ty: Id<TypeData>,
        args: &[Id<ValueData>],
        arg_permission: AccessPermission,
    ) -> Id<ValueData> {
        for &arg in args {
            self.accumulate_permission(arg, arg_permission);
        }
        let args = args.iter().copied().collect();
        self.structure.values.push(ValueData::Call {
            name: name.into(),
            args,
            ty: ret_ty,
        })
    }

    pub fn literal(&mut self, ty: Id<TypeData>, lit: Literal) -> Id<ValueData> {
        self.structure.values.push(ValueData::Literal { ty, lit })
    }

    /// A side-effecting expression whose value was discarded by the host
    /// (e.g. a bare `x++;`): record it so it is not lost. See
    /// `proxy`'s universal-statement deferral.
    pub fn universal_statement(&mut self, value: Id<ValueData>) {
        self.push_statement(Statement::UniversalStatement(value));
    }

    ////////////////////////////////////////////////////////////////////////
    // Control flow
    ////////////////////////////////////////////////////////////////////////

    fn list_for_path(&mut self, path_len: usize) -> &mut Vec<Statement> {
        let mut list = &mut self.structure.local_statements;
        for (index, descend) in &self.path[..path_len] {
            let stmt = &mut list[*index];
            list = match (stmt, descend) {
                (Statement::If { arms, .. }, Descend::IfArm(n)) => &mut arms[*n].body,
                (Statement::If { else_body, .. }, Descend::IfElse) => {
                    else_body.as_mut().expect("if-chain has no open else arm")
                }
                (Statement::While { body, .. }, Descend::WhileBody) => body,
                _ => panic!("malformed control-flow cursor"),
            };
        }
        list
    }

    fn current_list_mut(&mut self) -> &mut Vec<Statement> {
        self.list_for_path(self.path.len())
    }

    fn push_statement(&mut self, stmt: Statement) -> usize {
        let list = self.current_list_mut();
        list.push(stmt);
        list.len() - 1
    }

    pub fn begin_if(&mut self, cond: Id<ValueData>) {
        self.accumulate_permission(cond, AccessPermission::READ);
        let index = self.push_statement(Statement::If {
            arms: vec![IfArm { cond, body: Vec::new() }],
            else_body: None,
        });
        self.path.push((index, Descend::IfArm(0)));
    }

    pub fn end_if(&mut self) {
        self.path.pop().expect("end_if without matching begin_if");
    }

    pub fn begin_elif(&mut self, cond: Id<ValueData>) {
        self.accumulate_permission(cond, AccessPermission::READ);
        let list = self.current_list_mut();
        let last = list.len() - 1;
        let arm_index = match &mut list[last] {
            Statement::If { arms, .. } => {
                arms.push(IfArm { cond, body: Vec::new() });
                arms.len() - 1
            }
            _ => panic!("$ELIF without a preceding $IF"),
        };
        self.path.push((last, Descend::IfArm(arm_index)));
    }

    pub fn end_elif(&mut self) {
        self.path.pop().expect("end_elif without matching begin_elif");
    }

    pub fn begin_else(&mut self) {
        let list = self.current_list_mut();
        let last = list.len() - 1;
        match &mut list[last] {
            Statement::If { else_body, .. } => {
                assert!(else_body.is_none(), "an if-chain may have at most one $ELSE");
                *else_body = Some(Vec::new());
            }
            _ => panic!("$ELSE without a preceding $IF"),
        }
        self.path.push((last, Descend::IfElse));
    }

    pub fn end_else(&mut self) {
        self.path.pop().expect("end_else without matching begin_else");
    }

    pub fn begin_while(&mut self, cond: Id<ValueData>, kind: LoopKind) {
        self.accumulate_permission(cond, AccessPermission::READ);
        let index = self.push_statement(Statement::While {
            cond,
            body: Vec::new(),
            kind,
        });
        self.path.push((index, Descend::WhileBody));
    }

    pub fn end_while(&mut self) {
        self.path.pop().expect("end_while without matching begin_while");
    }

    /// Rewrites the condition of the currently-open `while`/`do-while`
    /// statement. Used by `do { ... } while (cond)` lowering, where the
    /// condition expression is only traceable after the body has run once.
    pub fn set_while_cond(&mut self, cond: Id<ValueData>) {
        self.accumulate_permission(cond, AccessPermission::READ);
        let (index, _) = *self.path.last().expect("set_while_cond outside an open while body");
        let parent_len = self.path.len() - 1;
        let list = self.list_for_path(parent_len);
        match &mut list[index] {
            Statement::While { cond: c, .. } => *c = cond,
            _ => panic!("set_while_cond: cursor does not point at a While statement"),
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Construction scopes (see proxy::Construct)
    ////////////////////////////////////////////////////////////////////////

    pub fn push_construction_scope(&mut self, scope: ConstructionScope) {
        self.construction_scopes.push(scope);
    }

    pub fn pop_construction_scope(&mut self) -> Option<ConstructionScope> {
        self.construction_scopes.pop()
    }

    pub fn current_construction_scope_mut(&mut self) -> Option<&mut ConstructionScope> {
        self.construction_scopes.last_mut()
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<ParserContext>> = RefCell::new(None);
}

/// Starts a fresh pipeline compile on the current thread, discarding (and
/// freeing) whatever AST the previous pipeline compile left behind.
pub fn begin_pipeline(bindless: bool) {
    CONTEXT.with(|cell| *cell.borrow_mut() = Some(ParserContext::new(bindless)));
}

/// Continues the current thread's pipeline compile into a new trace pass —
/// see [`ParserContext::begin_next_pass`]. Use this instead of
/// [`begin_pipeline`] for a re-trace that must keep the first pass's
/// interned identities.
pub fn begin_next_pass(bindless: bool) {
    with_context(|ctx| ctx.begin_next_pass(bindless));
}

/// Runs `f` with mutable access to the current thread's parser context.
///
/// # Panics
/// Panics if called outside a [`begin_pipeline`]/pipeline-compile scope —
/// this mirrors the source's behaviour of dereferencing an uninitialized
/// thread-local singleton, except with a readable message instead of UB.
pub fn with_context<R>(f: impl FnOnce(&mut ParserContext) -> R) -> R {
    CONTEXT.with(|cell| {
        let mut guard = cell.borrow_mut();
        let ctx = guard
            .as_mut()
            .expect("no active shader parse on this thread: call context::begin_pipeline first");
        f(ctx)
    })
}

pub fn in_shader_parse() -> bool {
    CONTEXT.with(|cell| cell.borrow().as_ref().map_or(false, |c| c.is_in_shader_parse))
}
