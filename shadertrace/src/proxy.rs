//! The proxy-value algebra.
//!
//! A [`Proxy`] is a typed wrapper holding the [`Id<ValueData>`] of the AST
//! expression it stands for. Arithmetic, comparison, and bitwise operators on
//! proxies are overloaded (via `std::ops`) to build the corresponding
//! `binary`/`unary` node instead of computing a result — that is the whole
//! trick the rest of the crate is built on. `++`/`--` have no Rust operator
//! to hook, so they are named methods (`pre_inc`, `post_inc`, ...) that
//! return a `#[must_use]` [`Effect`] — a drop-bomb that records the
//! side-effecting expression as a `UniversalStatement` unless the caller
//! explicitly folds it back into another expression with `.value()`.
use crate::{
    ast::{
        AccessPermission, BinaryOp, Literal, PrimitiveType, ScalarLit, TypeData, UnaryOp, ValueData,
    },
    context::{self, ConstructionScope, Id, ParserContext},
};
use smol_str::SmolStr;
use std::marker::PhantomData;

/// Implemented by every proxy type (`Scalar<T>`, `Vector<T, N>`, `Array<T>`,
/// `Texture2D<T>`, user aggregates, ...). Carries the context-sensitive
/// default-construction contract: where a default-constructed proxy ends
/// up (local, uniform, input parameter, aggregate member) depends on the
/// ambient construction scope it is built under.
pub trait Proxy: Sized {
    fn shader_type(ctx: &mut ParserContext) -> Id<TypeData>;
    fn from_value(value: Id<ValueData>) -> Self;
    fn value_id(&self) -> Id<ValueData>;

    /// Inspects the ambient construction scope (if any) to decide what kind
    /// of variable this default-constructed proxy should become; falls back
    /// to local-vs-uniform scope.
    fn construct_default() -> Self {
        context::with_context(|ctx| {
            let ty = Self::shader_type(ctx);
            let value = construct_in_context(ctx, ty);
            Self::from_value(value)
        })
    }
}

fn construct_in_context(ctx: &mut ParserContext, ty: Id<TypeData>) -> Id<ValueData> {
    // Priority 2: aggregate-member initialisation scope.
    if let Some(ConstructionScope::AggregateMember { parent, fields, next_index }) =
        ctx.current_construction_scope_mut()
    {
        let parent = *parent;
        let field = fields[*next_index].clone();
        *next_index += 1;
        return ctx.member(parent, field.name, field.ty);
    }
    // Priority 3: input-parameter construction scope.
    if let Some(ConstructionScope::InputParameter { next_location }) = ctx.current_construction_scope_mut() {
        let location = *next_location;
        *next_location += 1;
        return ctx.define_input_variate(ty, location);
    }
    // Priority 4: shader-body tracing.
    if ctx.is_in_shader_parse() {
        return ctx.define_local_variate(ty, None);
    }
    // Priority 5: otherwise, a uniform.
    ctx.define_uniform_variate(ty, false)
}

/// Materialises a *new* variable initialised from `init`'s expression: used
/// by copy-construction (`let b = a;`) and by literal construction.
fn construct_with_init(ctx: &mut ParserContext, ty: Id<TypeData>, init: Id<ValueData>) -> Id<ValueData> {
    if ctx.is_in_shader_parse() {
        ctx.define_local_variate(ty, Some(init))
    } else {
        // Global scope: materialise a uniform: the initialiser is informational
        // only (uniforms get their value from the host at bind time), so the
        // init value is traced for its permission bookkeeping and discarded.
        ctx.accumulate_permission(init, AccessPermission::READ);
        ctx.define_uniform_variate(ty, false)
    }
}

/// A drop-bomb returned by side-effecting proxy operations (`pre_inc`,
/// `post_inc`, a direct call to a void-returning helper, ...). If dropped
/// without being consumed, it is recorded as a `UniversalStatement` so the
/// effect is never silently lost; `.value()` disarms the bomb and returns the
/// resulting proxy for use inside a larger expression.
#[must_use = "this shader expression has a side effect: bind it, chain it with `.value()`, or let it run as its own statement"]
pub struct Effect<P> {
    value: Option<Id<ValueData>>,
    _marker: PhantomData<P>,
}

impl<P: Proxy> Effect<P> {
    pub(crate) fn new(value: Id<ValueData>) -> Self {
        Effect {
            value: Some(value),
            _marker: PhantomData,
        }
    }

    /// Disarms the deferred-statement drop and returns the proxy so it can be
    /// embedded in a further expression.
    pub fn value(mut self) -> P {
        P::from_value(self.value.take().expect("Effect::value called twice"))
    }
}

impl<P> Drop for Effect<P> {
    fn drop(&mut self) {
        if let Some(v) = self.value.take() {
            context::with_context(|ctx| ctx.universal_statement(v));
        }
    }
}

////////////////////////////////////////////////////////////////////////////
// Scalars
////////////////////////////////////////////////////////////////////////////

/// Implemented by the host numeric/boolean types usable as `Scalar<T>`'s
/// element type and as vector/matrix element types.
pub trait ScalarKind: Copy + 'static {
    const PRIM: PrimitiveType;
    fn to_lit(self) -> ScalarLit;
}

impl ScalarKind for i32 {
    const PRIM: PrimitiveType = PrimitiveType::I32;
    fn to_lit(self) -> ScalarLit {
        ScalarLit::I32(self)
    }
}
impl ScalarKind for u32 {
    const PRIM: PrimitiveType = PrimitiveType::U32;
    fn to_lit(self) -> ScalarLit {
        ScalarLit::U32(self)
    }
}
impl ScalarKind for f32 {
    const PRIM: PrimitiveType = PrimitiveType::F32;
    fn to_lit(self) -> ScalarLit {
        ScalarLit::from_f32(self)
    }
}
impl ScalarKind for f64 {
    const PRIM: PrimitiveType = PrimitiveType::F64;
    fn to_lit(self) -> ScalarLit {
        ScalarLit::from_f64(self)
    }
}
impl ScalarKind for bool {
    const PRIM: PrimitiveType = PrimitiveType::Bool;
    fn to_lit(self) -> ScalarLit {
        ScalarLit::Bool(self)
    }
}

/// A single scalar value (`int`, `uint`, `float`, `double`, or `bool`).
#[derive(Copy, Clone, Debug)]
pub struct Scalar<T: ScalarKind> {
    value: Id<ValueData>,
    needs_universal_statement: bool,
    _marker: PhantomData<T>,
}

impl<T: ScalarKind> Proxy for Scalar<T> {
    fn shader_type(ctx: &mut ParserContext) -> Id<TypeData> {
        ctx.primitive_type(T::PRIM)
    }
    fn from_value(value: Id<ValueData>) -> Self {
        Scalar {
            value,
            needs_universal_statement: false,
            _marker: PhantomData,
        }
    }
    fn value_id(&self) -> Id<ValueData> {
        self.value
    }
}

impl<T: ScalarKind> Default for Scalar<T> {
    fn default() -> Self {
        Self::construct_default()
    }
}

impl<T: ScalarKind> From<T> for Scalar<T> {
    /// A host literal, traced as a new local (inside a shader body) or a new
    /// uniform (at global scope).
    fn from(v: T) -> Self {
        context::with_context(|ctx| {
            let ty = ctx.primitive_type(T::PRIM);
            let lit = ctx.literal(ty, Literal::Scalar(v.to_lit()));
            let value = construct_with_init(ctx, ty, lit);
            Scalar::from_value(value)
        })
    }
}

impl<T: ScalarKind> Scalar<T> {
    /// Copy-construction: `let b = a;` materialises a new local initialised
    /// from `a`'s expression.
    pub fn copy_from(other: &Scalar<T>) -> Self {
        context::with_context(|ctx| {
            let ty = ctx.structure.values[other.value].ty();
            let value = construct_with_init(ctx, ty, other.value);
            Scalar::from_value(value)
        })
    }

    pub fn assign(&self, rhs: Scalar<T>) {
        context::with_context(|ctx| ctx.assign(self.value, rhs.value));
    }

    fn unary(self, op: UnaryOp, prefix: bool) -> Id<ValueData> {
        context::with_context(|ctx| ctx.unary_operator(self.value, op, prefix))
    }

    pub fn pre_inc(self) -> Effect<Scalar<T>> {
        Effect::new(self.unary(UnaryOp::Inc, true))
    }
    pub fn post_inc(self) -> Effect<Scalar<T>> {
        Effect::new(self.unary(UnaryOp::Inc, false))
    }
    pub fn pre_dec(self) -> Effect<Scalar<T>> {
        Effect::new(self.unary(UnaryOp::Dec, true))
    }
    pub fn post_dec(self) -> Effect<Scalar<T>> {
        Effect::new(self.unary(UnaryOp::Dec, false))
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: ScalarKind> std::ops::$trait for Scalar<T> {
            type Output = Scalar<T>;
            fn $method(self, rhs: Scalar<T>) -> Scalar<T> {
                let id = context::with_context(|ctx| ctx.binary_operator(self.value, rhs.value, $op, None));
                Scalar::from_value(id)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);
impl_binary_op!(Rem, rem, BinaryOp::Mod);
impl_binary_op!(BitAnd, bitand, BinaryOp::BitAnd);
impl_binary_op!(BitOr, bitor, BinaryOp::BitOr);
impl_binary_op!(BitXor, bitxor, BinaryOp::BitXor);
impl_binary_op!(Shl, shl, BinaryOp::Shl);
impl_binary_op!(Shr, shr, BinaryOp::Shr);

/// `a += b` traces the same way `a.assign(a + b)` would: the binary op is
/// recorded first, then an `assign` statement writes its result back into
/// `a`'s lvalue.
macro_rules! impl_compound_assign_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: ScalarKind> std::ops::$trait for Scalar<T> {
            fn $method(&mut self, rhs: Scalar<T>) {
                let computed = context::with_context(|ctx| ctx.binary_operator(self.value, rhs.value, $op, None));
                context::with_context(|ctx| ctx.assign(self.value, computed));
            }
        }
    };
}

impl_compound_assign_op!(AddAssign, add_assign, BinaryOp::Add);
impl_compound_assign_op!(SubAssign, sub_assign, BinaryOp::Sub);
impl_compound_assign_op!(MulAssign, mul_assign, BinaryOp::Mul);
impl_compound_assign_op!(DivAssign, div_assign, BinaryOp::Div);
impl_compound_assign_op!(RemAssign, rem_assign, BinaryOp::Mod);
impl_compound_assign_op!(BitAndAssign, bitand_assign, BinaryOp::BitAnd);
impl_compound_assign_op!(BitOrAssign, bitor_assign, BinaryOp::BitOr);
impl_compound_assign_op!(BitXorAssign, bitxor_assign, BinaryOp::BitXor);
impl_compound_assign_op!(ShlAssign, shl_assign, BinaryOp::Shl);
impl_compound_assign_op!(ShrAssign, shr_assign, BinaryOp::Shr);

impl<T: ScalarKind> std::ops::Neg for Scalar<T> {
    type Output = Scalar<T>;
    fn neg(self) -> Scalar<T> {
        let id = self.unary(UnaryOp::Neg, true);
        Scalar::from_value(id)
    }
}

impl std::ops::Not for Scalar<bool> {
    type Output = Scalar<bool>;
    fn not(self) -> Scalar<bool> {
        let id = self.unary(UnaryOp::Not, true);
        Scalar::from_value(id)
    }
}

/// Comparison operators always return `Scalar<bool>` regardless of the
/// operand type.
pub trait Compare {
    fn eq_(self, rhs: Self) -> Scalar<bool>;
    fn ne_(self, rhs: Self) -> Scalar<bool>;
    fn lt(self, rhs: Self) -> Scalar<bool>;
    fn le(self, rhs: Self) -> Scalar<bool>;
    fn gt(self, rhs: Self) -> Scalar<bool>;
    fn ge(self, rhs: Self) -> Scalar<bool>;
}

macro_rules! impl_compare {
    ($ty:ty) => {
        impl Compare for $ty {
            fn eq_(self, rhs: Self) -> Scalar<bool> {
                cmp(self, rhs, BinaryOp::Eq)
            }
            fn ne_(self, rhs: Self) -> Scalar<bool> {
                cmp(self, rhs, BinaryOp::Ne)
            }
            fn lt(self, rhs: Self) -> Scalar<bool> {
                cmp(self, rhs, BinaryOp::Lt)
            }
            fn le(self, rhs: Self) -> Scalar<bool> {
                cmp(self, rhs, BinaryOp::Le)
            }
            fn gt(self, rhs: Self) -> Scalar<bool> {
                cmp(self, rhs, BinaryOp::Gt)
            }
            fn ge(self, rhs: Self) -> Scalar<bool> {
                cmp(self, rhs, BinaryOp::Ge)
            }
        }
    };
}

fn cmp<T: ScalarKind>(lhs: Scalar<T>, rhs: Scalar<T>, op: BinaryOp) -> Scalar<bool> {
    let id = context::with_context(|ctx| ctx.binary_operator(lhs.value, rhs.value, op, None));
    Scalar::from_value(id)
}

impl_compare!(Scalar<i32>);
impl_compare!(Scalar<u32>);
impl_compare!(Scalar<f32>);
impl_compare!(Scalar<f64>);
impl_compare!(Scalar<bool>);

pub type I32 = Scalar<i32>;
pub type U32 = Scalar<u32>;
pub type F32 = Scalar<f32>;
pub type F64 = Scalar<f64>;
pub type Bool = Scalar<bool>;

impl Bool {
    pub fn and(self, rhs: Bool) -> Bool {
        let id = context::with_context(|ctx| ctx.binary_operator(self.value, rhs.value, BinaryOp::And, None));
        Scalar::from_value(id)
    }
    pub fn or(self, rhs: Bool) -> Bool {
        let id = context::with_context(|ctx| ctx.binary_operator(self.value, rhs.value, BinaryOp::Or, None));
        Scalar::from_value(id)
    }
}

////////////////////////////////////////////////////////////////////////////
// Vectors
////////////////////////////////////////////////////////////////////////////

const SWIZZLE_LETTERS: [char; 4] = ['x', 'y', 'z', 'w'];

/// A vector of `N` (2, 3, or 4) elements of scalar type `T`.
#[derive(Copy, Clone, Debug)]
pub struct Vector<T: ScalarKind, const N: usize> {
    value: Id<ValueData>,
    _marker: PhantomData<T>,
}

impl<T: ScalarKind, const N: usize> Proxy for Vector<T, N> {
    fn shader_type(ctx: &mut ParserContext) -> Id<TypeData> {
        ctx.vector_type(T::PRIM, N as u8)
    }
    fn from_value(value: Id<ValueData>) -> Self {
        Vector { value, _marker: PhantomData }
    }
    fn value_id(&self) -> Id<ValueData> {
        self.value
    }
}

impl<T: ScalarKind, const N: usize> Default for Vector<T, N> {
    fn default() -> Self {
        Self::construct_default()
    }
}

impl<T: ScalarKind, const N: usize> Vector<T, N> {
    /// `vecN(a, b, ...)`-style construction from N scalar arguments.
    pub fn new(components: [Scalar<T>; N]) -> Self {
        context::with_context(|ctx| {
            let ty = ctx.vector_type(T::PRIM, N as u8);
            let args: smallvec::SmallVec<[Id<ValueData>; 4]> = components.iter().map(|c| c.value_id()).collect();
            let call = ctx.call_func(vector_constructor_name(N), ty, &args, AccessPermission::READ);
            Vector::from_value(call)
        })
    }

    pub fn copy_from(other: &Self) -> Self {
        context::with_context(|ctx| {
            let ty = ctx.structure.values[other.value].ty();
            let value = construct_with_init(ctx, ty, other.value);
            Vector::from_value(value)
        })
    }

    pub fn assign(&self, rhs: Self) {
        context::with_context(|ctx| ctx.assign(self.value, rhs.value));
    }

    /// Builds the member node for an arbitrary swizzle, e.g. `"xyz"` or
    /// `"wzyx"`. `letters.len()` must be 2, 3, or 4 and every letter must be
    /// one of `x`, `y`, `z`, `w` within this vector's arity.
    fn swizzle_raw(&self, letters: &str) -> Id<ValueData> {
        assert!((2..=4).contains(&letters.len()), "swizzles must select 2, 3, or 4 components");
        for c in letters.chars() {
            let idx = SWIZZLE_LETTERS.iter().position(|&l| l == c).expect("swizzle letters must be x/y/z/w");
            assert!(idx < N, "swizzle `{}` references a component past this vector's arity", letters);
        }
        context::with_context(|ctx| {
            let elem_ty = match &ctx.structure.types[ctx.structure.values[self.value].ty()] {
                TypeData::Vector { elem, .. } => *elem,
                _ => unreachable!(),
            };
            let result_ty = if letters.len() == 1 {
                ctx.primitive_type(elem_ty)
            } else {
                ctx.vector_type(elem_ty, letters.len() as u8)
            };
            let member = ctx.member(self.value, SmolStr::new(letters), result_ty);
            ctx.accumulate_permission(member, AccessPermission::READ);
            member
        })
    }

    pub fn swizzle2(&self, letters: &str) -> Vector<T, 2> {
        Vector::from_value(self.swizzle_raw(letters))
    }
    pub fn swizzle3(&self, letters: &str) -> Vector<T, 3> {
        Vector::from_value(self.swizzle_raw(letters))
    }
    pub fn swizzle4(&self, letters: &str) -> Vector<T, 4> {
        Vector::from_value(self.swizzle_raw(letters))
    }
    pub fn component(&self, letter: char) -> Scalar<T> {
        Scalar::from_value(self.swizzle_raw(&letter.to_string()))
    }

    pub fn x(&self) -> Scalar<T> {
        self.component('x')
    }
    pub fn y(&self) -> Scalar<T> {
        self.component('y')
    }
    pub fn z(&self) -> Scalar<T> {
        assert!(N >= 3);
        self.component('z')
    }
    pub fn w(&self) -> Scalar<T> {
        assert!(N >= 4);
        self.component('w')
    }
    pub fn xy(&self) -> Vector<T, 2> {
        self.swizzle2("xy")
    }
    pub fn xyz(&self) -> Vector<T, 3> {
        self.swizzle3("xyz")
    }
    pub fn xyzw(&self) -> Vector<T, 4> {
        self.swizzle4("xyzw")
    }
}

fn vector_constructor_name(n: usize) -> &'static str {
    match n {
        2 => "float2",
        3 => "float3",
        4 => "float4",
        _ => panic!("unsupported vector arity {}", n),
    }
}

macro_rules! impl_vector_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: ScalarKind, const N: usize> std::ops::$trait for Vector<T, N> {
            type Output = Vector<T, N>;
            fn $method(self, rhs: Vector<T, N>) -> Vector<T, N> {
                let id = context::with_context(|ctx| ctx.binary_operator(self.value, rhs.value, $op, None));
                Vector::from_value(id)
            }
        }
    };
}

impl_vector_binary_op!(Add, add, BinaryOp::Add);
impl_vector_binary_op!(Sub, sub, BinaryOp::Sub);
impl_vector_binary_op!(Mul, mul, BinaryOp::Mul);
impl_vector_binary_op!(Div, div, BinaryOp::Div);

pub type Vec2 = Vector<f32, 2>;
pub type Vec3 = Vector<f32, 3>;
pub type Vec4 = Vector<f32, 4>;
pub type UVec3 = Vector<u32, 3>;
pub type IVec2 = Vector<i32, 2>;

/// A host-side `glam` vector literal, traced as a new local (or uniform, at
/// global scope) initialised from a vector literal node — the same
/// construction path `Scalar::from` uses for a single host float.
fn vector_literal<const N: usize>(components: &[f32; N]) -> Id<ValueData> {
    context::with_context(|ctx| {
        let ty = ctx.vector_type(PrimitiveType::F32, N as u8);
        let lit = ctx.literal(ty, Literal::Vector(components.iter().map(|c| ScalarLit::from_f32(*c)).collect()));
        construct_with_init(ctx, ty, lit)
    })
}

impl From<glam::Vec2> for Vec2 {
    fn from(v: glam::Vec2) -> Self {
        Vector::from_value(vector_literal(&v.to_array()))
    }
}

impl From<glam::Vec3> for Vec3 {
    fn from(v: glam::Vec3) -> Self {
        Vector::from_value(vector_literal(&v.to_array()))
    }
}

impl From<glam::Vec4> for Vec4 {
    fn from(v: glam::Vec4) -> Self {
        Vector::from_value(vector_literal(&v.to_array()))
    }
}

////////////////////////////////////////////////////////////////////////////
// Matrices
////////////////////////////////////////////////////////////////////////////

/// An `R`x`C` matrix of scalar type `T` (column-major).
#[derive(Copy, Clone, Debug)]
pub struct Matrix<T: ScalarKind, const R: usize, const C: usize> {
    value: Id<ValueData>,
    _marker: PhantomData<T>,
}

impl<T: ScalarKind, const R: usize, const C: usize> Proxy for Matrix<T, R, C> {
    fn shader_type(ctx: &mut ParserContext) -> Id<TypeData> {
        ctx.matrix_type(T::PRIM, R as u8, C as u8)
    }
    fn from_value(value: Id<ValueData>) -> Self {
        Matrix { value, _marker: PhantomData }
    }
    fn value_id(&self) -> Id<ValueData> {
        self.value
    }
}

impl<T: ScalarKind, const R: usize, const C: usize> Default for Matrix<T, R, C> {
    fn default() -> Self {
        Self::construct_default()
    }
}

impl<T: ScalarKind, const R: usize, const C: usize> Matrix<T, R, C> {
    pub fn assign(&self, rhs: Self) {
        context::with_context(|ctx| ctx.assign(self.value, rhs.value));
    }
}

impl<const R: usize, const C: usize> std::ops::Mul<Vector<f32, C>> for Matrix<f32, R, C> {
    type Output = Vector<f32, R>;
    fn mul(self, rhs: Vector<f32, C>) -> Vector<f32, R> {
        let id = context::with_context(|ctx| ctx.binary_operator(self.value, rhs.value_id(), BinaryOp::Mul, None));
        Vector::from_value(id)
    }
}

pub type Mat3 = Matrix<f32, 3, 3>;
pub type Mat4 = Matrix<f32, 4, 4>;

fn matrix_literal(cols: &[f32], rows: u8, columns: u8) -> Id<ValueData> {
    context::with_context(|ctx| {
        let ty = ctx.matrix_type(PrimitiveType::F32, rows, columns);
        let lit = ctx.literal(ty, Literal::Matrix(cols.iter().map(|c| ScalarLit::from_f32(*c)).collect()));
        construct_with_init(ctx, ty, lit)
    })
}

impl From<glam::Mat3> for Mat3 {
    fn from(m: glam::Mat3) -> Self {
        Matrix::from_value(matrix_literal(&m.to_cols_array(), 3, 3))
    }
}

impl From<glam::Mat4> for Mat4 {
    fn from(m: glam::Mat4) -> Self {
        Matrix::from_value(matrix_literal(&m.to_cols_array(), 4, 4))
    }
}

////////////////////////////////////////////////////////////////////////////
// Arrays
////////////////////////////////////////////////////////////////////////////

/// An unbounded shader array of `T`. Read accesses leave the backing global
/// declared as its plain element type; any write promotes it to `RW...` at
/// emission.
#[derive(Copy, Clone, Debug)]
pub struct Array<T: Proxy> {
    value: Id<ValueData>,
    _marker: PhantomData<T>,
}

impl<T: Proxy> Array<T> {
    pub fn new() -> Self {
        context::with_context(|ctx| {
            let elem_ty = T::shader_type(ctx);
            let value = ctx.define_universal_array(elem_ty);
            Array { value, _marker: PhantomData }
        })
    }

    pub fn at(&self, index: Scalar<u32>) -> Element<T> {
        context::with_context(|ctx| {
            let value = ctx.at(self.value, index.value_id());
            Element { value, _marker: PhantomData }
        })
    }

    pub fn value_id(&self) -> Id<ValueData> {
        self.value
    }
}

impl<T: Proxy> Default for Array<T> {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////
// Textures and samplers
////////////////////////////////////////////////////////////////////////////

/// A 2D texture of texel type `T`.
#[derive(Copy, Clone, Debug)]
pub struct Texture2D<T: Proxy> {
    value: Id<ValueData>,
    _marker: PhantomData<T>,
}

impl<T: Proxy> Texture2D<T> {
    pub fn new() -> Self {
        context::with_context(|ctx| {
            let texel_ty = T::shader_type(ctx);
            let value = ctx.define_universal_texture2d(texel_ty);
            Texture2D { value, _marker: PhantomData }
        })
    }

    pub fn at(&self, index: Vector<u32, 2>) -> Element<T> {
        context::with_context(|ctx| {
            let value = ctx.at(self.value, index.value_id());
            Element { value, _marker: PhantomData }
        })
    }

    /// `tex.sample(sampler, uv)`: both the texture and the sampler gain
    /// `Read` permission; the sampler is lazily realised as a uniform
    /// `SamplerState` on first use (see [`Sampler`]).
    pub fn sample(&self, sampler: &Sampler, uv: Vector<f32, 2>) -> T {
        context::with_context(|ctx| {
            ctx.accumulate_permission(self.value, AccessPermission::READ);
            let sampler_value = sampler.realise(ctx);
            ctx.accumulate_permission(sampler_value, AccessPermission::READ);
            let texel_ty = T::shader_type(ctx);
            let call = ctx.call_func(
                "Sample",
                texel_ty,
                &[self.value, sampler_value, uv.value_id()],
                AccessPermission::empty(),
            );
            T::from_value(call)
        })
    }

    pub fn value_id(&self) -> Id<ValueData> {
        self.value
    }
}

impl<T: Proxy> Default for Texture2D<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An assignable reference into an array or texture (`arr[i]`), itself a
/// `member`/`element` variable reference.
#[derive(Copy, Clone, Debug)]
pub struct Element<T> {
    value: Id<ValueData>,
    _marker: PhantomData<T>,
}

impl<T: Proxy> Element<T> {
    pub fn get(&self) -> T {
        context::with_context(|ctx| ctx.accumulate_permission(self.value, AccessPermission::READ));
        T::from_value(self.value)
    }

    pub fn assign(&self, rhs: T) {
        context::with_context(|ctx| ctx.assign(self.value, rhs.value_id()));
    }

    pub fn value_id(&self) -> Id<ValueData> {
        self.value
    }
}

/// A sampler state, lazily registered as a uniform on first `.sample()` call.
pub struct Sampler {
    value: once_cell::unsync::OnceCell<Id<ValueData>>,
}

impl Sampler {
    pub fn new() -> Self {
        Sampler {
            value: once_cell::unsync::OnceCell::new(),
        }
    }

    fn realise(&self, ctx: &mut ParserContext) -> Id<ValueData> {
        if let Some(v) = self.value.get() {
            return *v;
        }
        let ty = ctx.sampler_type();
        let v = ctx.define_uniform_variate(ty, false);
        let _ = self.value.set(v);
        v
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////
// Aggregates
////////////////////////////////////////////////////////////////////////////

/// Implemented by `#[derive(ShaderStruct)]` host structs whose fields are
/// themselves proxies. The aggregate type is interned once per host type
/// (via `TypeId`), so repeated construction — including across the
/// non-bindless and bindless passes of one pipeline compile — always refers
/// to the same struct declaration.
pub trait Aggregate: Sized + 'static {
    /// Field name/type pairs in declaration order, computed by tracing each
    /// field's own `shader_type`.
    fn shader_fields(ctx: &mut ParserContext) -> Vec<crate::ast::Field>;

    /// Builds one instance whose fields are `Member(parent, field_name)`
    /// proxies, by opening an aggregate-member construction scope around a
    /// default-construction of each field in turn.
    fn from_parent(ctx: &mut ParserContext, parent: Id<ValueData>) -> Self;
}

/// Blanket [`Proxy`] impl for every [`Aggregate`]: the aggregate's own value
/// is a variable of its interned struct type, and its fields are members
/// hanging off that variable.
pub struct AggregateProxy<A: Aggregate> {
    var: Id<ValueData>,
    pub fields: A,
}

impl<A: Aggregate> AggregateProxy<A> {
    fn aggregate_type(ctx: &mut ParserContext) -> Id<TypeData> {
        let key = std::any::TypeId::of::<A>();
        let fields = A::shader_fields(ctx);
        ctx.create_aggregate_type(key, fields)
    }
}

impl<A: Aggregate> Proxy for AggregateProxy<A> {
    fn shader_type(ctx: &mut ParserContext) -> Id<TypeData> {
        Self::aggregate_type(ctx)
    }

    fn from_value(value: Id<ValueData>) -> Self {
        context::with_context(|ctx| AggregateProxy {
            var: value,
            fields: A::from_parent(ctx, value),
        })
    }

    fn value_id(&self) -> Id<ValueData> {
        self.var
    }
}

impl<A: Aggregate> Default for AggregateProxy<A> {
    fn default() -> Self {
        Self::construct_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{self as ctx_mod, Stage};

    struct Point {
        x: F32,
        y: F32,
    }

    impl Aggregate for Point {
        fn shader_fields(ctx: &mut ParserContext) -> Vec<crate::ast::Field> {
            vec![
                crate::ast::Field { name: "x".into(), ty: F32::shader_type(ctx) },
                crate::ast::Field { name: "y".into(), ty: F32::shader_type(ctx) },
            ]
        }
        fn from_parent(ctx: &mut ParserContext, parent: Id<ValueData>) -> Self {
            ctx.push_construction_scope(ConstructionScope::AggregateMember {
                parent,
                fields: Self::shader_fields(ctx),
                next_index: 0,
            });
            let result = Point { x: F32::construct_default(), y: F32::construct_default() };
            ctx.pop_construction_scope();
            result
        }
    }

    #[test]
    fn scalar_default_construction_follows_ambient_scope() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
        let a = F32::default();
        let b = F32::default();
        assert_ne!(a.value_id(), b.value_id());
    }

    #[test]
    fn scalar_from_host_literal_records_a_literal_node() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Fragment));
        let x = F32::from(1.0f32);
        ctx_mod::with_context(|ctx| {
            assert!(matches!(ctx.structure.local_statements.last(), Some(crate::ast::Statement::DefineLocal { .. })));
        });
        let _ = x;
    }

    #[test]
    fn compound_assign_records_a_binary_op_and_an_assign_statement() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Compute));
        let mut x = I32::default();
        let y = I32::from(2);
        let before = ctx_mod::with_context(|ctx| ctx.structure.local_statements.len());
        x += y;
        let after = ctx_mod::with_context(|ctx| ctx.structure.local_statements.len());
        assert_eq!(after, before + 1);
        ctx_mod::with_context(|ctx| match ctx.structure.local_statements.last() {
            Some(crate::ast::Statement::Assign { lvalue, rvalue }) => {
                assert_eq!(*lvalue, x.value_id());
                assert!(matches!(ctx.structure.values[*rvalue], ValueData::Binary { op: BinaryOp::Add, .. }));
            }
            other => panic!("expected Assign, got {:?}", other),
        });
    }

    #[test]
    fn glam_vector_conversion_records_a_local_initialised_from_a_literal() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
        let v: Vec3 = glam::Vec3::new(1.0, 2.0, 3.0).into();
        ctx_mod::with_context(|ctx| match ctx.structure.local_statements.last() {
            Some(crate::ast::Statement::DefineLocal { init: Some(init), .. }) => {
                assert!(matches!(ctx.structure.values[*init], ValueData::Literal { lit: Literal::Vector(_), .. }));
            }
            other => panic!("expected DefineLocal with a vector literal init, got {:?}", other),
        });
        let _ = v;
    }

    #[test]
    fn glam_matrix_conversion_records_a_local_initialised_from_a_literal() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
        let m: Mat4 = glam::Mat4::IDENTITY.into();
        ctx_mod::with_context(|ctx| match ctx.structure.local_statements.last() {
            Some(crate::ast::Statement::DefineLocal { init: Some(init), .. }) => {
                assert!(matches!(ctx.structure.values[*init], ValueData::Literal { lit: Literal::Matrix(_), .. }));
            }
            other => panic!("expected DefineLocal with a matrix literal init, got {:?}", other),
        });
        let _ = m;
    }

    #[test]
    fn vector_swizzle_out_of_arity_panics() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
        let v: Vector<f32, 2> = Vector::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| v.z()));
        assert!(result.is_err());
    }

    #[test]
    fn post_inc_without_value_records_a_universal_statement() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Compute));
        let x = I32::default();
        {
            let _ = x.post_inc();
        }
        ctx_mod::with_context(|ctx| {
            assert!(matches!(
                ctx.structure.local_statements.last(),
                Some(crate::ast::Statement::UniversalStatement(_))
            ));
        });
    }

    #[test]
    fn post_inc_folded_into_value_does_not_record_a_universal_statement() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Compute));
        let x = I32::default();
        let before = ctx_mod::with_context(|ctx| ctx.structure.local_statements.len());
        let _y = x.post_inc().value();
        let after = ctx_mod::with_context(|ctx| ctx.structure.local_statements.len());
        assert_eq!(before, after);
    }

    #[test]
    fn aggregate_fields_are_members_of_the_parent_variable() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
        let p = AggregateProxy::<Point>::default();
        ctx_mod::with_context(|ctx| {
            let field_var = ctx.structure.values[p.fields.x.value_id()].as_var().unwrap();
            match &field_var.kind {
                crate::ast::VarKind::Member { base, field } => {
                    assert_eq!(*base, p.value_id());
                    assert_eq!(field.as_str(), "x");
                }
                other => panic!("expected Member, got {:?}", other),
            }
        });
    }

    #[test]
    fn aggregate_type_is_interned_across_constructions() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Vertex));
        let p1 = AggregateProxy::<Point>::default();
        let p2 = AggregateProxy::<Point>::default();
        let ty1 = ctx_mod::with_context(|ctx| ctx.structure.values[p1.value_id()].ty());
        let ty2 = ctx_mod::with_context(|ctx| ctx.structure.values[p2.value_id()].ty());
        assert_eq!(ty1, ty2);
    }

    #[test]
    fn texture_sample_realises_the_sampler_exactly_once() {
        ctx_mod::begin_pipeline(false);
        ctx_mod::with_context(|ctx| ctx.begin_shader_parse(Stage::Fragment));
        let tex: Texture2D<Vec4> = Texture2D::new();
        let sampler = Sampler::new();
        let uv = Vec2::default();
        let _ = tex.sample(&sampler, uv);
        let _ = tex.sample(&sampler, uv);
        let uniform_count = ctx_mod::with_context(|ctx| {
            ctx.structure
                .global_statements
                .iter()
                .filter(|s| matches!(s, crate::ast::Statement::DefineUniform(_)))
                .count()
        });
        assert_eq!(uniform_count, 1);
    }
}
