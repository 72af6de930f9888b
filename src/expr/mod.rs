//! Expression compilation and evaluation
//!
//! Plan expressions arrive as JSON arrays of the form `[name, args...]` and
//! compile against the labels of the rows they will see. The catalog is an
//! explicit registry value carried in the execution context; there is no
//! process-global registration.
//!
//! Evaluation returns encoded JSON bytes, borrowing from the input row where
//! possible (`field` access is zero-copy). `missing` (the empty slice)
//! propagates through comparisons; boolean contexts treat anything but
//! literal `true` as false.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::exec::{ExecCtx, ExecError, ExecResult, TempSlot, Vars};
use crate::value::{Labels, FALSE, MISSING, TRUE};

/// A compiled expression.
pub trait Expr: Send + Sync {
    /// Evaluates against one row.
    fn eval<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        vars: &'a Vars,
        row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>>;
}

/// Boxed compiled expression.
pub type BoxExpr = Box<dyn Expr>;

/// Constructor for one named expression kind.
pub type ExprBuilder = fn(&ExprCatalog, &[Value], &Labels) -> ExecResult<BoxExpr>;

/// Registry of expression constructors, keyed by name.
pub struct ExprCatalog {
    builders: HashMap<String, ExprBuilder>,
}

impl ExprCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Creates the catalog with the standard expression set.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register("json", build_json);
        catalog.register("field", build_field);
        catalog.register("path", build_path);
        catalog.register("eq", |c, a, l| build_cmp(c, a, l, CmpOp::Eq));
        catalog.register("lt", |c, a, l| build_cmp(c, a, l, CmpOp::Lt));
        catalog.register("le", |c, a, l| build_cmp(c, a, l, CmpOp::Le));
        catalog.register("gt", |c, a, l| build_cmp(c, a, l, CmpOp::Gt));
        catalog.register("ge", |c, a, l| build_cmp(c, a, l, CmpOp::Ge));
        catalog.register("not", build_not);
        catalog.register("and", build_and);
        catalog.register("or", build_or);
        catalog.register("windowFrameCount", build_frame_count);
        catalog
    }

    /// Registers (or replaces) a named expression constructor.
    pub fn register(&mut self, name: impl Into<String>, builder: ExprBuilder) {
        self.builders.insert(name.into(), builder);
    }

    /// Compiles one expression spec against `labels`.
    pub fn compile(&self, spec: &Value, labels: &Labels) -> ExecResult<BoxExpr> {
        let parts = spec
            .as_array()
            .ok_or_else(|| ExecError::expr(format!("expression must be an array, got {spec}")))?;
        let name = parts
            .first()
            .and_then(|n| n.as_str())
            .ok_or_else(|| ExecError::expr("expression name must be a string"))?;
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| ExecError::expr(format!("unknown expression: {name}")))?;
        builder(self, &parts[1..], labels)
    }

    /// Compiles a list of expression specs against `labels`.
    pub fn compile_all(&self, specs: &[Value], labels: &Labels) -> ExecResult<Vec<BoxExpr>> {
        specs.iter().map(|s| self.compile(s, labels)).collect()
    }
}

impl Default for ExprCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Boolean context: only literal `true` counts.
pub fn is_true(bytes: &[u8]) -> bool {
    bytes == TRUE
}

fn bool_bytes(b: bool) -> Cow<'static, [u8]> {
    Cow::Borrowed(if b { TRUE } else { FALSE })
}

// ---- literal ----

struct JsonLiteral {
    bytes: Vec<u8>,
}

impl Expr for JsonLiteral {
    fn eval<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        _vars: &'a Vars,
        _row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(&self.bytes))
    }
}

fn build_json(_catalog: &ExprCatalog, args: &[Value], _labels: &Labels) -> ExecResult<BoxExpr> {
    let value = args
        .first()
        .ok_or_else(|| ExecError::expr("json: missing literal"))?;
    let bytes = serde_json::to_vec(value).map_err(|e| ExecError::expr(e.to_string()))?;
    Ok(Box::new(JsonLiteral { bytes }))
}

// ---- field access ----

struct FieldRef {
    index: usize,
}

impl Expr for FieldRef {
    fn eval<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        _vars: &'a Vars,
        row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(row.get(self.index).copied().unwrap_or(MISSING)))
    }
}

fn build_field(_catalog: &ExprCatalog, args: &[Value], labels: &Labels) -> ExecResult<BoxExpr> {
    let name = args
        .first()
        .and_then(|n| n.as_str())
        .ok_or_else(|| ExecError::expr("field: missing label name"))?;
    let index = labels
        .iter()
        .position(|l| l == name)
        .ok_or_else(|| ExecError::expr(format!("field: unknown label {name:?}")))?;
    Ok(Box::new(FieldRef { index }))
}

// ---- nested member access ----

enum PathStep {
    Key(String),
    Index(usize),
}

struct PathExpr {
    base: BoxExpr,
    steps: Vec<PathStep>,
}

impl Expr for PathExpr {
    fn eval<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        vars: &'a Vars,
        row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        let base = self.base.eval(ctx, vars, row)?;
        if base.is_empty() {
            return Ok(Cow::Borrowed(MISSING));
        }
        let mut current: Value = serde_json::from_slice(&base)
            .map_err(|e| ExecError::expr(format!("path: base is not JSON: {e}")))?;
        for step in &self.steps {
            let next = match (step, &mut current) {
                (PathStep::Key(k), Value::Object(fields)) => fields.remove(k),
                (PathStep::Index(i), Value::Array(items)) => {
                    (*i < items.len()).then(|| items.swap_remove(*i))
                }
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return Ok(Cow::Borrowed(MISSING)),
            }
        }
        let bytes = serde_json::to_vec(&current).map_err(|e| ExecError::expr(e.to_string()))?;
        Ok(Cow::Owned(bytes))
    }
}

fn build_path(catalog: &ExprCatalog, args: &[Value], labels: &Labels) -> ExecResult<BoxExpr> {
    let base_spec = args
        .first()
        .ok_or_else(|| ExecError::expr("path: missing base expression"))?;
    let base = catalog.compile(base_spec, labels)?;
    let mut steps = Vec::with_capacity(args.len() - 1);
    for step in &args[1..] {
        match step {
            Value::String(k) => steps.push(PathStep::Key(k.clone())),
            Value::Number(n) => {
                let i = n
                    .as_u64()
                    .ok_or_else(|| ExecError::expr("path: index must be unsigned"))?;
                steps.push(PathStep::Index(i as usize));
            }
            other => return Err(ExecError::expr(format!("path: bad step {other}"))),
        }
    }
    Ok(Box::new(PathExpr { base, steps }))
}

// ---- comparisons ----

#[derive(Clone, Copy)]
enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn admits(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

struct CmpExpr {
    op: CmpOp,
    lhs: BoxExpr,
    rhs: BoxExpr,
}

impl Expr for CmpExpr {
    fn eval<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        vars: &'a Vars,
        row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        let lhs = self.lhs.eval(ctx, vars, row)?;
        let rhs = self.rhs.eval(ctx, vars, row)?;
        if lhs.is_empty() || rhs.is_empty() {
            return Ok(Cow::Borrowed(MISSING));
        }
        let ord = ctx.comparer().compare_bytes(&lhs, &rhs);
        Ok(bool_bytes(self.op.admits(ord)))
    }
}

fn build_cmp(
    catalog: &ExprCatalog,
    args: &[Value],
    labels: &Labels,
    op: CmpOp,
) -> ExecResult<BoxExpr> {
    if args.len() != 2 {
        return Err(ExecError::expr("comparison takes two arguments"));
    }
    Ok(Box::new(CmpExpr {
        op,
        lhs: catalog.compile(&args[0], labels)?,
        rhs: catalog.compile(&args[1], labels)?,
    }))
}

// ---- boolean combinators ----

struct NotExpr {
    inner: BoxExpr,
}

impl Expr for NotExpr {
    fn eval<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        vars: &'a Vars,
        row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        let inner = self.inner.eval(ctx, vars, row)?;
        Ok(bool_bytes(!is_true(&inner)))
    }
}

fn build_not(catalog: &ExprCatalog, args: &[Value], labels: &Labels) -> ExecResult<BoxExpr> {
    let spec = args
        .first()
        .ok_or_else(|| ExecError::expr("not: missing argument"))?;
    Ok(Box::new(NotExpr {
        inner: catalog.compile(spec, labels)?,
    }))
}

struct AndExpr {
    terms: Vec<BoxExpr>,
}

impl Expr for AndExpr {
    fn eval<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        vars: &'a Vars,
        row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        for term in &self.terms {
            if !is_true(&term.eval(ctx, vars, row)?) {
                return Ok(bool_bytes(false));
            }
        }
        Ok(bool_bytes(true))
    }
}

fn build_and(catalog: &ExprCatalog, args: &[Value], labels: &Labels) -> ExecResult<BoxExpr> {
    Ok(Box::new(AndExpr {
        terms: catalog.compile_all(args, labels)?,
    }))
}

struct OrExpr {
    terms: Vec<BoxExpr>,
}

impl Expr for OrExpr {
    fn eval<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        vars: &'a Vars,
        row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        for term in &self.terms {
            if is_true(&term.eval(ctx, vars, row)?) {
                return Ok(bool_bytes(true));
            }
        }
        Ok(bool_bytes(false))
    }
}

fn build_or(catalog: &ExprCatalog, args: &[Value], labels: &Labels) -> ExecResult<BoxExpr> {
    Ok(Box::new(OrExpr {
        terms: catalog.compile_all(args, labels)?,
    }))
}

// ---- window frame access ----

struct FrameCountExpr {
    slot: usize,
    frame: usize,
}

impl Expr for FrameCountExpr {
    fn eval<'a>(
        &'a self,
        _ctx: &'a ExecCtx,
        vars: &'a Vars,
        _row: &'a [&'a [u8]],
    ) -> ExecResult<Cow<'a, [u8]>> {
        let Some(TempSlot::Windows(state)) = vars.temp(self.slot) else {
            return Err(ExecError::expr(format!(
                "windowFrameCount: no window state in temp slot {}",
                self.slot
            )));
        };
        let state = state.borrow();
        let frame = state.frames.get(self.frame).ok_or_else(|| {
            ExecError::expr(format!("windowFrameCount: no frame {}", self.frame))
        })?;
        Ok(Cow::Owned(frame.count().to_string().into_bytes()))
    }
}

fn build_frame_count(
    _catalog: &ExprCatalog,
    args: &[Value],
    _labels: &Labels,
) -> ExecResult<BoxExpr> {
    let slot = args
        .first()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ExecError::expr("windowFrameCount: missing slot index"))?;
    let frame = args
        .get(1)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ExecError::expr("windowFrameCount: missing frame index"))?;
    Ok(Box::new(FrameCountExpr {
        slot: slot as usize,
        frame: frame as usize,
    }))
}
