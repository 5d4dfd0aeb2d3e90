//! Slang-ish text emission.
//!
//! Walks the statement lists a pipeline's stages left behind and renders a
//! single translation unit: interned aggregate struct definitions, uniform
//! globals (promoted to `RW...` where any traced access wrote through them),
//! then one entry-point function per stage. This never touches a real Slang
//! compiler — `backend` hands the text to whichever pluggable translator the
//! host registered.
use crate::{
    ast::{AccessPermission, AggregateType, Literal, ScalarLit, Semantic, Statement, Structure, TypeData, UnaryOp, ValueData, VarData, VarKind},
    context::{Id, Stage, StageRecord},
};
use std::fmt::Write as _;

const BINDLESS_PRELUDE: &str = r#"// bindless descriptor-heap prelude
struct DescriptorHandle { uint index; };
ConstantBuffer<DescriptorHandle> g_handles[] : register(space1);
"#;

pub struct Emitter<'a> {
    structure: &'a Structure,
    bindless: bool,
    out: String,
}

impl<'a> Emitter<'a> {
    pub fn new(structure: &'a Structure, bindless: bool) -> Self {
        Emitter {
            structure,
            bindless,
            out: String::new(),
        }
    }

    pub fn emit_pipeline(mut self, stages: &[StageRecord]) -> String {
        if self.bindless {
            self.out.push_str(BINDLESS_PRELUDE);
            self.out.push('\n');
        }
        self.emit_aggregate_types();
        self.emit_globals();
        for stage in stages {
            self.emit_stage(stage);
        }
        self.out
    }

    ////////////////////////////////////////////////////////////////////////
    // Types
    ////////////////////////////////////////////////////////////////////////

    fn type_name(&self, id: Id<TypeData>) -> String {
        type_name(self.structure, id)
    }

    fn emit_aggregate_types(&mut self) {
        for stmt in &self.structure.global_statements {
            if let Statement::DefineAggregateType(ty_id) = *stmt {
                let agg = match &self.structure.types[ty_id] {
                    TypeData::Aggregate(a) => a.clone(),
                    _ => unreachable!(),
                };
                self.emit_struct(&agg);
            }
        }
    }

    fn emit_struct(&mut self, agg: &AggregateType) {
        writeln!(self.out, "struct {} {{", agg.name).unwrap();
        for field in &agg.fields {
            writeln!(self.out, "    {} {};", self.type_name(field.ty), field.name).unwrap();
        }
        writeln!(self.out, "}};\n").unwrap();
    }

    ////////////////////////////////////////////////////////////////////////
    // Uniform globals
    ////////////////////////////////////////////////////////////////////////

    /// A global that was declared but never read or written through by any
    /// traced stage is elided from the emitted source entirely — it has no
    /// binding slot to claim, so declaring it would just waste a register.
    fn is_accessed(&self, id: Id<ValueData>) -> bool {
        !self.structure.values[id]
            .as_var()
            .map_or(AccessPermission::empty(), |v| v.permission)
            .is_empty()
    }

    fn emit_globals(&mut self) {
        for stmt in &self.structure.global_statements {
            match *stmt {
                Statement::DefineUniform(id) => {
                    if self.is_accessed(id) {
                        self.emit_uniform(id);
                    }
                }
                Statement::DefineUniversalArray(id) => {
                    if self.is_accessed(id) {
                        self.emit_uniform_array(id);
                    }
                }
                Statement::DefineUniversalTexture2D(id) => {
                    if self.is_accessed(id) {
                        self.emit_uniform_texture(id);
                    }
                }
                Statement::DefineAggregateType(_) => {}
                _ => unreachable!("unexpected global statement"),
            }
        }
        self.out.push('\n');
    }

    fn emit_uniform(&mut self, id: Id<ValueData>) {
        let var = self.structure.values[id].as_var().unwrap();
        let push_constant = matches!(var.kind, VarKind::Uniform { push_constant: true });
        let keyword = if push_constant { "[[vk::push_constant]]\nuniform" } else { "uniform" };
        writeln!(self.out, "{} {} {};", keyword, self.type_name(var.ty), var.name).unwrap();
    }

    fn emit_uniform_array(&mut self, id: Id<ValueData>) {
        let var = self.structure.values[id].as_var().unwrap();
        writeln!(self.out, "{} {};", binding_type_name(self.structure, var), var.name).unwrap();
    }

    fn emit_uniform_texture(&mut self, id: Id<ValueData>) {
        let var = self.structure.values[id].as_var().unwrap();
        writeln!(self.out, "{} {};", binding_type_name(self.structure, var), var.name).unwrap();
    }

    ////////////////////////////////////////////////////////////////////////
    // Stages
    ////////////////////////////////////////////////////////////////////////

    fn entry_point_name(stage: Stage) -> &'static str {
        match stage {
            Stage::Vertex => "VSMain",
            Stage::Fragment => "PSMain",
            Stage::Compute => "CSMain",
        }
    }

    fn emit_stage(&mut self, stage: &StageRecord) {
        let params = self.stage_params(stage);
        let ret_ty = self.stage_return_type(stage);
        writeln!(
            self.out,
            "[shader(\"{}\")]\n{} {}({}) {{",
            stage.stage.slang_attribute(),
            ret_ty,
            Self::entry_point_name(stage.stage),
            params
        )
        .unwrap();
        for stmt in &stage.locals {
            self.emit_statement(stmt, 1);
        }
        if !stage.outputs.is_empty() {
            self.emit_stage_return(stage);
        }
        writeln!(self.out, "}}\n").unwrap();
    }

    fn stage_params(&self, stage: &StageRecord) -> String {
        let mut parts = Vec::new();
        for stmt in &stage.inputs {
            let id = match *stmt {
                Statement::DefineInput(id) => id,
                Statement::DefineSystemSemanticVariable(id) => id,
                _ => continue,
            };
            let var = self.structure.values[id].as_var().unwrap();
            let semantic = match &var.kind {
                VarKind::Input { location } => format!(": TEXCOORD{}", location),
                _ => {
                    if var.name == "sv_dispatch_thread_id" {
                        ": SV_DispatchThreadID".to_string()
                    } else {
                        String::new()
                    }
                }
            };
            parts.push(format!("{} {} {}", self.type_name(var.ty), var.name, semantic));
        }
        parts.join(", ")
    }

    fn stage_return_type(&self, stage: &StageRecord) -> String {
        if stage.outputs.is_empty() {
            return "void".to_string();
        }
        if stage.outputs.len() == 1 {
            if let Statement::DefineSystemSemanticVariable(id) = stage.outputs[0] {
                let var = self.structure.values[id].as_var().unwrap();
                return self.type_name(var.ty);
            }
        }
        format!("{}Output", Self::entry_point_name(stage.stage))
    }

    fn emit_stage_return(&mut self, stage: &StageRecord) {
        if stage.outputs.len() == 1 {
            if let Statement::DefineSystemSemanticVariable(id) = stage.outputs[0] {
                let var = self.structure.values[id].as_var().unwrap();
                writeln!(self.out, "    return {};", var.name).unwrap();
                return;
            }
        }
        let out_ty = self.stage_return_type(stage);
        writeln!(self.out, "    {} result;", out_ty).unwrap();
        for stmt in &stage.outputs {
            let id = match *stmt {
                Statement::DefineOutput(id) | Statement::DefineSystemSemanticVariable(id) => id,
                _ => continue,
            };
            let var = self.structure.values[id].as_var().unwrap();
            writeln!(self.out, "    result.{} = {};", var.name, var.name).unwrap();
        }
        writeln!(self.out, "    return result;").unwrap();
    }

    ////////////////////////////////////////////////////////////////////////
    // Statements
    ////////////////////////////////////////////////////////////////////////

    fn indent(out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("    ");
        }
    }

    fn emit_statement(&mut self, stmt: &Statement, depth: usize) {
        match stmt {
            Statement::DefineLocal { var, init } => {
                let v = self.structure.values[*var].as_var().unwrap();
                Self::indent(&mut self.out, depth);
                match init {
                    Some(init) => {
                        let init_text = self.expr_text(*init);
                        writeln!(self.out, "{} {} = {};", self.type_name(v.ty), v.name, init_text).unwrap();
                    }
                    None => writeln!(self.out, "{} {};", self.type_name(v.ty), v.name).unwrap(),
                }
            }
            Statement::Assign { lvalue, rvalue } => {
                let lhs = self.expr_text(*lvalue);
                let rhs = self.expr_text(*rvalue);
                Self::indent(&mut self.out, depth);
                writeln!(self.out, "{} = {};", lhs, rhs).unwrap();
            }
            Statement::UniversalStatement(v) => {
                let text = self.expr_text(*v);
                Self::indent(&mut self.out, depth);
                writeln!(self.out, "{};", text).unwrap();
            }
            Statement::If { arms, else_body } => {
                for (i, arm) in arms.iter().enumerate() {
                    let cond = self.expr_text(arm.cond);
                    Self::indent(&mut self.out, depth);
                    if i == 0 {
                        writeln!(self.out, "if ({}) {{", cond).unwrap();
                    } else {
                        writeln!(self.out, "else if ({}) {{", cond).unwrap();
                    }
                    for s in &arm.body {
                        self.emit_statement(s, depth + 1);
                    }
                    Self::indent(&mut self.out, depth);
                    writeln!(self.out, "}}").unwrap();
                }
                if let Some(body) = else_body {
                    Self::indent(&mut self.out, depth);
                    writeln!(self.out, "else {{").unwrap();
                    for s in body {
                        self.emit_statement(s, depth + 1);
                    }
                    Self::indent(&mut self.out, depth);
                    writeln!(self.out, "}}").unwrap();
                }
            }
            Statement::While { cond, body, kind } => {
                let cond_text = self.expr_text(*cond);
                Self::indent(&mut self.out, depth);
                match kind {
                    crate::ast::LoopKind::DoWhile => writeln!(self.out, "do {{").unwrap(),
                    _ => writeln!(self.out, "while ({}) {{", cond_text).unwrap(),
                }
                for s in body {
                    self.emit_statement(s, depth + 1);
                }
                Self::indent(&mut self.out, depth);
                match kind {
                    crate::ast::LoopKind::DoWhile => writeln!(self.out, "}} while ({});", cond_text).unwrap(),
                    _ => writeln!(self.out, "}}").unwrap(),
                }
            }
            Statement::DefineInput(_)
            | Statement::DefineOutput(_)
            | Statement::DefineUniform(_)
            | Statement::DefineUniversalArray(_)
            | Statement::DefineUniversalTexture2D(_)
            | Statement::DefineAggregateType(_)
            | Statement::DefineSystemSemanticVariable(_) => {
                // handled by emit_globals / stage_params / emit_stage_return
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Expressions
    ////////////////////////////////////////////////////////////////////////

    fn expr_text(&self, id: Id<ValueData>) -> String {
        match &self.structure.values[id] {
            ValueData::Literal { lit, .. } => self.literal_text(lit),
            ValueData::Var(v) => match &v.kind {
                VarKind::Member { base, field } => format!("{}.{}", self.expr_text(*base), field),
                VarKind::Element { base, index } => format!("{}[{}]", self.expr_text(*base), self.expr_text(*index)),
                _ => v.name.to_string(),
            },
            ValueData::Binary { op, lhs, rhs, .. } => {
                format!("({} {} {})", self.expr_text(*lhs), op.slang_symbol(), self.expr_text(*rhs))
            }
            ValueData::Unary { op, operand, prefix, .. } => {
                let operand_text = self.expr_text(*operand);
                if matches!(op, UnaryOp::Inc | UnaryOp::Dec) {
                    if *prefix {
                        format!("{}{}", op.slang_symbol(), operand_text)
                    } else {
                        format!("{}{}", operand_text, op.slang_symbol())
                    }
                } else {
                    format!("({}{})", op.slang_symbol(), operand_text)
                }
            }
            ValueData::Call { name, args, .. } => {
                let args_text: Vec<_> = args.iter().map(|a| self.expr_text(*a)).collect();
                format!("{}({})", name, args_text.join(", "))
            }
        }
    }

    fn literal_text(&self, lit: &Literal) -> String {
        match lit {
            Literal::Scalar(s) => scalar_lit_text(s),
            Literal::Vector(cs) => {
                let parts: Vec<_> = cs.iter().map(scalar_lit_text).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Literal::Matrix(cs) => {
                let parts: Vec<_> = cs.iter().map(scalar_lit_text).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Literal::Aggregate(fields) => {
                let parts: Vec<_> = fields.iter().map(|f| self.expr_text(*f)).collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

fn scalar_lit_text(lit: &ScalarLit) -> String {
    match lit {
        ScalarLit::I32(v) => v.to_string(),
        ScalarLit::U32(v) => format!("{}u", v),
        ScalarLit::F32(bits) => format!("{:?}", f32::from_bits(*bits)),
        ScalarLit::F64(bits) => format!("{:?}", f64::from_bits(*bits)),
        ScalarLit::Bool(b) => b.to_string(),
    }
}

/// Resolves the system semantic's Slang attribute text, used when a stage's
/// position/dispatch-id variable is emitted as part of an output struct
/// rather than the direct-return fast path.
pub fn semantic_attribute(semantic: &Semantic) -> std::borrow::Cow<'_, str> {
    semantic.slang_name()
}

/// The Slang spelling of a type, shared by the emitter and by reflection
/// (which needs a human-readable type name per bind-info entry without
/// spinning up an `Emitter`).
pub fn type_name(structure: &Structure, id: Id<TypeData>) -> String {
    match &structure.types[id] {
        TypeData::Scalar(p) => p.slang_name().to_string(),
        TypeData::Vector { elem, len } => format!("{}{}", elem.slang_name(), len),
        TypeData::Matrix { elem, rows, cols } => format!("{}{}x{}", elem.slang_name(), rows, cols),
        TypeData::Aggregate(agg) => agg.name.to_string(),
        TypeData::Array(elem) => type_name(structure, *elem),
        TypeData::Texture2D(texel) => format!("Texture2D<{}>", type_name(structure, *texel)),
        TypeData::Sampler => "SamplerState".to_string(),
    }
}

/// `"RW"` if any traced access wrote through a variable carrying this
/// permission, else empty — the promotion prefix for `StructuredBuffer`/
/// `Texture2D` declarations.
pub fn rw_prefix(perm: AccessPermission) -> &'static str {
    if perm.contains(AccessPermission::WRITE) {
        "RW"
    } else {
        ""
    }
}

/// The full declared type of a uniform array or texture binding, RW-promoted
/// and wrapped in its resource type (`StructuredBuffer`/`Texture2D`) —
/// shared by the emitter's own declarations and by reflection, which needs
/// the same text without spinning up an `Emitter`. Falls back to the plain
/// [`type_name`] for anything that isn't an array or texture binding.
pub fn binding_type_name(structure: &Structure, var: &VarData) -> String {
    match &structure.types[var.ty] {
        TypeData::Array(elem) => format!("{}StructuredBuffer<{}>", rw_prefix(var.permission), type_name(structure, *elem)),
        TypeData::Texture2D(texel) => format!("{}Texture2D<{}>", rw_prefix(var.permission), type_name(structure, *texel)),
        _ => type_name(structure, var.ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::PrimitiveType,
        context::{self, Stage},
        proxy::{Proxy, F32},
    };

    #[test]
    fn type_name_vector_and_array_and_texture() {
        let mut structure = Structure::new();
        let f32_ty = structure.types.push(TypeData::Scalar(PrimitiveType::F32));
        assert_eq!(type_name(&structure, f32_ty), "float");
        let vec3_ty = structure.types.push(TypeData::Vector { elem: PrimitiveType::F32, len: 3 });
        assert_eq!(type_name(&structure, vec3_ty), "float3");
        let array_ty = structure.types.push(TypeData::Array(f32_ty));
        assert_eq!(type_name(&structure, array_ty), "float");
        let tex_ty = structure.types.push(TypeData::Texture2D(vec3_ty));
        assert_eq!(type_name(&structure, tex_ty), "Texture2D<float3>");
    }

    #[test]
    fn scalar_lit_text_formats_suffixes() {
        assert_eq!(scalar_lit_text(&ScalarLit::I32(-3)), "-3");
        assert_eq!(scalar_lit_text(&ScalarLit::U32(7)), "7u");
        assert_eq!(scalar_lit_text(&ScalarLit::Bool(true)), "true");
    }

    #[test]
    fn emit_pipeline_renders_a_traced_fragment_entry_point() {
        context::begin_pipeline(false);
        context::with_context(|ctx| ctx.begin_shader_parse(Stage::Fragment));
        let a = F32::default();
        let b = F32::from(2.0f32);
        let sum = a + b;
        let out_ty = context::with_context(F32::shader_type);
        let out_var = context::with_context(|ctx| ctx.define_output_variate(out_ty, Some(0), None));
        context::with_context(|ctx| ctx.assign(out_var, sum.value_id()));

        let records = context::with_context(|ctx| ctx.end_pipeline_parse());
        let structure = context::with_context(|ctx| std::mem::take(&mut ctx.structure));
        let text = Emitter::new(&structure, false).emit_pipeline(&records);

        assert!(text.contains("PSMain"), "{}", text);
        assert!(text.contains("2"), "{}", text);
    }

    #[test]
    fn bindless_pipeline_prepends_the_descriptor_heap_prelude() {
        context::begin_pipeline(true);
        context::with_context(|ctx| ctx.begin_shader_parse(Stage::Compute));
        let records = context::with_context(|ctx| ctx.end_pipeline_parse());
        let structure = context::with_context(|ctx| std::mem::take(&mut ctx.structure));
        let text = Emitter::new(&structure, true).emit_pipeline(&records);
        assert!(text.starts_with("// bindless descriptor-heap prelude"));
    }
}
