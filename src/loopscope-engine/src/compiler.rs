// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Lowers a parsed project to the executable IR.
//!
//! The module-instance tree is flattened into a single dense slot space:
//! slots 0..4 are the implicit `time`/`dt`/`initial_time`/`final_time`,
//! and every leaf variable of every module instance (and every element of
//! every arrayed variable) owns one slot.  Module references become plain
//! copy expressions, so ordering and cycle detection work on one global
//! graph and cycles that cross module boundaries need no special casing.

use std::collections::{BTreeSet, HashMap};

use smallvec::SmallVec;

use crate::ast::{self, Ast, BinaryOp, IndexExpr, UnaryOp};
use crate::builtins::BuiltinFn;
use crate::common::{CompileError, EquationError, EquationResult, ErrorCode, Ident};
use crate::datamodel::{self, Dimension, Dt, SimMethod};
use crate::eqn_err;
use crate::macros::is_synthetic_ident;
use crate::model::Model;
use crate::project::Project;
use crate::variable::{cartesian_keys, Table, Variable};

pub const TIME_OFF: usize = 0;
pub const DT_OFF: usize = 1;
pub const INITIAL_TIME_OFF: usize = 2;
pub const FINAL_TIME_OFF: usize = 3;
pub const IMPLICIT_VAR_COUNT: usize = 4;

pub const IMPLICIT_VAR_NAMES: [&str; IMPLICIT_VAR_COUNT] =
    ["time", "dt", "initial_time", "final_time"];

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum Method {
    Euler,
    RungeKutta4,
}

#[derive(Clone, Debug)]
pub struct Specs {
    pub start: f64,
    pub stop: f64,
    pub dt: f64,
    pub save_step: f64,
    pub method: Method,
}

fn dt_value(dt: &Dt) -> f64 {
    match dt {
        Dt::Dt(value) => *value,
        Dt::Reciprocal(value) => 1.0 / *value,
    }
}

impl Specs {
    pub fn from(specs: &datamodel::SimSpecs) -> Result<Self, CompileError> {
        let bad = |_: ()| {
            let mut err = CompileError::new("main", "sim_specs", ErrorCode::BadSimSpecs);
            err.loc = None;
            err
        };

        let dt = dt_value(&specs.dt);
        let save_step = match &specs.save_step {
            None => dt,
            Some(s) => dt_value(s),
        };
        // saving more often than we calculate makes no sense
        let save_step = if save_step < dt { dt } else { save_step };

        if !specs.start.is_finite() || !specs.stop.is_finite() || specs.stop <= specs.start {
            return Err(bad(()));
        }
        if !dt.is_finite() || dt <= 0.0 {
            return Err(bad(()));
        }
        // the save step must be an integer multiple of dt (within tolerance)
        let ratio = save_step / dt;
        if (ratio - ratio.round()).abs() > 1e-6 {
            return Err(bad(()));
        }
        let n_steps = (specs.stop - specs.start) / dt;
        if !n_steps.is_finite() || n_steps.round() < 1.0 {
            return Err(bad(()));
        }

        let method = match specs.sim_method {
            SimMethod::Euler => Method::Euler,
            SimMethod::RungeKutta4 => Method::RungeKutta4,
        };

        Ok(Specs {
            start: specs.start,
            stop: specs.stop,
            dt,
            save_step,
            method,
        })
    }

    pub fn n_steps(&self) -> usize {
        ((self.stop - self.start) / self.dt).round() as usize
    }

    pub fn save_every(&self) -> usize {
        (self.save_step / self.dt).round().max(1.0) as usize
    }
}

/// A compiled expression over slot offsets.
#[derive(PartialEq, Clone, Debug)]
pub enum Expr {
    Const(f64),
    /// current-frame slot read
    Var(usize),
    /// previous-frame slot read (the PREVIOUS builtin)
    Prev(usize),
    /// base offset, one 1-based index expression per dimension, dim sizes
    Subscript(usize, Vec<Expr>, Vec<usize>),
    /// sum over a dense slot range: base, len
    SumRange(usize, usize),
    App(BuiltinFn<Expr>),
    Op2(BinaryOp, Box<Expr>, Box<Expr>),
    Op1(UnaryOp, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VarKind {
    Stock,
    Flow,
    Aux,
}

/// One slot's worth of compiled variable.  Arrayed variables produce one
/// CompiledVar per element; module instances contribute their child
/// models' variables with dotted idents.
#[derive(Clone, Debug)]
pub struct CompiledVar {
    pub slot: usize,
    pub ident: Ident,
    pub model: Ident,
    pub kind: VarKind,
    pub is_synthetic: bool,
    /// per-step expression; None for stocks (the integrator owns them)
    pub expr: Option<Expr>,
    /// initial-value expression; Some for stocks only
    pub init_expr: Option<Expr>,
    /// current-step slots this variable's expression reads
    pub deps: Vec<usize>,
    /// previous-frame slots read (no ordering constraint)
    pub prev_deps: Vec<usize>,
}

impl CompiledVar {
    pub fn is_stock(&self) -> bool {
        self.kind == VarKind::Stock
    }
}

#[derive(Clone, Debug)]
pub struct StockUpdate {
    pub slot: usize,
    pub inflows: SmallVec<[usize; 4]>,
    pub outflows: SmallVec<[usize; 4]>,
    pub non_negative: bool,
}

/// The executable form of a project: immutable once built, shareable
/// across concurrent runs.
#[derive(Clone, Debug)]
pub struct CompiledProject {
    pub specs: Specs,
    pub n_slots: usize,
    /// one entry per non-implicit slot, ordered by slot
    pub vars: Vec<CompiledVar>,
    /// indices into `vars`, dependency-ordered, covering every variable
    /// (used for the t0 full evaluation)
    pub runlist_initials: Vec<usize>,
    /// indices into `vars`, dependency-ordered, non-stocks only
    pub runlist_flows: Vec<usize>,
    pub stocks: Vec<StockUpdate>,
    pub offsets: HashMap<Ident, usize>,
    pub slot_names: Vec<Ident>,
    pub tables: Vec<Table>,
}

impl CompiledProject {
    pub fn var_for_slot(&self, slot: usize) -> Option<&CompiledVar> {
        if slot < IMPLICIT_VAR_COUNT {
            return None;
        }
        self.vars.get(slot - IMPLICIT_VAR_COUNT)
    }

    pub fn is_stock_slot(&self, slot: usize) -> bool {
        self.var_for_slot(slot).map(|v| v.is_stock()).unwrap_or(false)
    }
}

struct VarMeta {
    /// absolute base offset
    off: usize,
    size: usize,
    dims: Option<Vec<Dimension>>,
    /// for module variables, the index of the child instance
    child_instance: Option<usize>,
}

struct Instance {
    model_name: Ident,
    /// "" for the root, "sub." or "a.b." otherwise
    prefix: Ident,
    parent: Option<usize>,
    offsets: HashMap<Ident, VarMeta>,
    /// dst ident -> src ident, resolved against the parent instance
    inputs: HashMap<Ident, Ident>,
}

/// leaf slot count of a model, including nested modules
fn slot_count(
    project: &Project,
    model_name: &str,
    memo: &mut HashMap<Ident, usize>,
) -> Result<usize, CompileError> {
    if let Some(n) = memo.get(model_name) {
        return Ok(*n);
    }
    let model = project.models.get(model_name).ok_or_else(|| {
        CompileError::new(model_name, model_name, ErrorCode::ModuleNotFound)
    })?;

    let mut n = 0;
    for name in model.var_names() {
        let var = &model.variables[name];
        n += match var {
            Variable::Module { model_name, .. } => slot_count(project, model_name, memo)?,
            _ => var
                .get_dimensions()
                .map(|dims| dims.iter().map(|d| d.len()).product())
                .unwrap_or(1),
        };
    }
    memo.insert(model_name.to_string(), n);
    Ok(n)
}

fn build_instances(
    project: &Project,
    model_name: &str,
    prefix: &str,
    base: usize,
    parent: Option<usize>,
    inputs: HashMap<Ident, Ident>,
    instances: &mut Vec<Instance>,
    memo: &mut HashMap<Ident, usize>,
) -> Result<usize, CompileError> {
    let model = project.models.get(model_name).ok_or_else(|| {
        CompileError::new(model_name, model_name, ErrorCode::ModuleNotFound)
    })?;

    let idx = instances.len();
    instances.push(Instance {
        model_name: model_name.to_string(),
        prefix: prefix.to_string(),
        parent,
        offsets: HashMap::new(),
        inputs,
    });

    let mut off = base;
    let mut offsets: HashMap<Ident, VarMeta> = HashMap::new();
    for name in model.var_names() {
        let var = &model.variables[name];
        match var {
            Variable::Module {
                ident,
                model_name: child_model,
                inputs: module_inputs,
                ..
            } => {
                let size = slot_count(project, child_model, memo)?;
                let child_prefix = format!("{}{}.", prefix, ident);
                let child_inputs: HashMap<Ident, Ident> = module_inputs
                    .iter()
                    .map(|mi| (mi.dst.clone(), mi.src.clone()))
                    .collect();
                let child_idx = build_instances(
                    project,
                    child_model,
                    &child_prefix,
                    off,
                    Some(idx),
                    child_inputs,
                    instances,
                    memo,
                )?;
                offsets.insert(
                    ident.clone(),
                    VarMeta {
                        off,
                        size,
                        dims: None,
                        child_instance: Some(child_idx),
                    },
                );
                off += size;
            }
            _ => {
                let dims = var.get_dimensions().map(|d| d.to_vec());
                let size = dims
                    .as_ref()
                    .map(|dims| dims.iter().map(|d| d.len()).product())
                    .unwrap_or(1);
                offsets.insert(
                    name.to_string(),
                    VarMeta {
                        off,
                        size,
                        dims,
                        child_instance: None,
                    },
                );
                off += size;
            }
        }
    }

    instances[idx].offsets = offsets;
    Ok(idx)
}

fn strides(sizes: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; sizes.len()];
    for i in (0..sizes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * sizes[i + 1];
    }
    strides
}

/// row-major decode of a flat element index into per-dimension indices
fn multi_index(mut i: usize, sizes: &[usize]) -> Vec<usize> {
    let strides = strides(sizes);
    let mut result = Vec::with_capacity(sizes.len());
    for stride in strides {
        result.push(i / stride);
        i %= stride;
    }
    result
}

/// walk a possibly-dotted ident to its absolute offset, size, and dims
fn resolve_meta<'i>(
    instances: &'i [Instance],
    instance: usize,
    ident: &str,
) -> Option<(usize, usize, Option<&'i Vec<Dimension>>)> {
    let inst = &instances[instance];
    if let Some(pos) = ident.find('.') {
        let head = &ident[..pos];
        let rest = &ident[pos + 1..];
        let meta = inst.offsets.get(head)?;
        let child = meta.child_instance?;
        resolve_meta(instances, child, rest)
    } else {
        let meta = inst.offsets.get(ident)?;
        // a module has no scalar value of its own
        if meta.child_instance.is_some() {
            return None;
        }
        Some((meta.off, meta.size, meta.dims.as_ref()))
    }
}

struct LowerCtx<'a> {
    project: &'a Project,
    instances: &'a [Instance],
    instance: usize,
    /// dims and the active element index per dim, for ApplyToAll/Arrayed
    active: Option<(&'a [Dimension], Vec<usize>)>,
    tables: &'a mut Vec<Table>,
    table_ids: &'a mut HashMap<Ident, usize>,
}

impl<'a> LowerCtx<'a> {
    fn resolve_meta(
        &self,
        instance: usize,
        ident: &str,
    ) -> Option<(usize, usize, Option<&Vec<Dimension>>)> {
        resolve_meta(self.instances, instance, ident)
    }

    /// resolve an identifier used as a scalar value
    fn resolve_scalar(&self, ident: &str, loc: ast::Loc) -> EquationResult<Expr> {
        match ident {
            "time" => return Ok(Expr::Var(TIME_OFF)),
            "dt" => return Ok(Expr::Var(DT_OFF)),
            "initial_time" => return Ok(Expr::Var(INITIAL_TIME_OFF)),
            "final_time" => return Ok(Expr::Var(FINAL_TIME_OFF)),
            _ => {}
        }

        let (off, _size, dims) = self
            .resolve_meta(self.instance, ident)
            .ok_or(EquationError {
                start: loc.start,
                end: loc.end,
                code: ErrorCode::UndefinedIdent,
            })?;

        match dims {
            None => Ok(Expr::Var(off)),
            Some(dims) => {
                // a bare reference to an arrayed variable is only
                // meaningful element-wise, with matching dimensions
                let Some((active_dims, active_idx)) = &self.active else {
                    return eqn_err!(BadSubscript, loc.start, loc.end);
                };
                if active_dims.len() != dims.len()
                    || !active_dims
                        .iter()
                        .zip(dims.iter())
                        .all(|(a, b)| a.name == b.name)
                {
                    return eqn_err!(BadSubscript, loc.start, loc.end);
                }
                let sizes: Vec<usize> = dims.iter().map(|d| d.len()).collect();
                let strides = strides(&sizes);
                let element: usize = active_idx
                    .iter()
                    .zip(strides.iter())
                    .map(|(i, s)| i * s)
                    .sum();
                Ok(Expr::Var(off + element))
            }
        }
    }

    fn table_for(&mut self, ident: &str, loc: ast::Loc) -> EquationResult<usize> {
        let inst = &self.instances[self.instance];
        let absolute = format!("{}{}", inst.prefix, ident);
        if let Some(id) = self.table_ids.get(&absolute) {
            return Ok(*id);
        }

        // find the parsed variable this ident names, crossing modules
        fn find_var<'p>(
            ctx: &LowerCtx<'p>,
            instance: usize,
            ident: &str,
        ) -> Option<&'p Variable> {
            let inst = &ctx.instances[instance];
            let model = &ctx.project.models[&inst.model_name];
            if let Some(pos) = ident.find('.') {
                let head = &ident[..pos];
                let child = inst.offsets.get(head)?.child_instance?;
                find_var(ctx, child, &ident[pos + 1..])
            } else {
                model.variables.get(ident)
            }
        }

        let table = find_var(self, self.instance, ident)
            .and_then(|v| v.table())
            .cloned();
        match table {
            Some(table) => {
                let id = self.tables.len();
                self.tables.push(table);
                self.table_ids.insert(absolute, id);
                Ok(id)
            }
            None => eqn_err!(BadGraphicalFunction, loc.start, loc.end),
        }
    }

    fn lower_index(
        &mut self,
        dim: &Dimension,
        index: &IndexExpr,
        loc: ast::Loc,
    ) -> EquationResult<Expr> {
        let IndexExpr::Expr(expr) = index else {
            // a bare wildcard is only valid under sum()
            return eqn_err!(BadSubscript, loc.start, loc.end);
        };

        if let ast::Expr::Var(name, _) = expr {
            // a named element of this dimension
            if let Some(i) = dim
                .elements
                .iter()
                .position(|el| crate::common::canonicalize(el) == *name)
            {
                return Ok(Expr::Const((i + 1) as f64));
            }
            // the dimension name itself: the active element
            if let Some((active_dims, active_idx)) = &self.active {
                if let Some(i) = active_dims.iter().position(|d| {
                    crate::common::canonicalize(&d.name) == *name
                }) {
                    return Ok(Expr::Const((active_idx[i] + 1) as f64));
                }
            }
        }

        self.lower(expr)
    }

    fn lower(&mut self, expr: &ast::Expr) -> EquationResult<Expr> {
        let result = match expr {
            ast::Expr::Const(_, n, _) => Expr::Const(*n),
            ast::Expr::Var(id, loc) => self.resolve_scalar(id, *loc)?,
            ast::Expr::App(func, args, loc) => self.lower_app(func, args, *loc)?,
            ast::Expr::Subscript(id, indices, loc) => {
                let (off, _size, dims) =
                    self.resolve_meta(self.instance, id).ok_or(EquationError {
                        start: loc.start,
                        end: loc.end,
                        code: ErrorCode::UndefinedIdent,
                    })?;
                let Some(dims) = dims else {
                    return eqn_err!(BadSubscript, loc.start, loc.end);
                };
                if indices.len() != dims.len() {
                    return eqn_err!(BadSubscript, loc.start, loc.end);
                }
                let dims = dims.clone();
                let sizes: Vec<usize> = dims.iter().map(|d| d.len()).collect();
                let indices: EquationResult<Vec<Expr>> = dims
                    .iter()
                    .zip(indices.iter())
                    .map(|(dim, index)| self.lower_index(dim, index, *loc))
                    .collect();
                Expr::Subscript(off, indices?, sizes)
            }
            ast::Expr::Op1(op, r, _loc) => {
                let r = self.lower(r)?;
                match op {
                    UnaryOp::Positive => r,
                    UnaryOp::Negative => Expr::Op1(UnaryOp::Negative, Box::new(r)),
                    UnaryOp::Not => Expr::Op1(UnaryOp::Not, Box::new(r)),
                }
            }
            ast::Expr::Op2(op, l, r, _loc) => {
                let l = self.lower(l)?;
                let r = self.lower(r)?;
                Expr::Op2(*op, Box::new(l), Box::new(r))
            }
            ast::Expr::If(cond, t, f, _loc) => {
                let cond = self.lower(cond)?;
                let t = self.lower(t)?;
                let f = self.lower(f)?;
                Expr::If(Box::new(cond), Box::new(t), Box::new(f))
            }
        };

        Ok(result)
    }

    fn lower_app(
        &mut self,
        func: &str,
        orig_args: &[ast::Expr],
        loc: ast::Loc,
    ) -> EquationResult<Expr> {
        // sum needs the unlowered subscript shape
        if func == "sum" {
            if orig_args.len() != 1 {
                return eqn_err!(ArityMismatch, loc.start, loc.end);
            }
            let (id, all_wild) = match &orig_args[0] {
                ast::Expr::Var(id, _) => (id, true),
                ast::Expr::Subscript(id, indices, _) => (
                    id,
                    indices.iter().all(|i| matches!(i, IndexExpr::Wildcard(_))),
                ),
                _ => return eqn_err!(TypeMismatch, loc.start, loc.end),
            };
            if !all_wild {
                return eqn_err!(TypeMismatch, loc.start, loc.end);
            }
            let (off, size, dims) = self.resolve_meta(self.instance, id).ok_or(EquationError {
                start: loc.start,
                end: loc.end,
                code: ErrorCode::UndefinedIdent,
            })?;
            if dims.is_none() {
                return eqn_err!(TypeMismatch, loc.start, loc.end);
            }
            return Ok(Expr::SumRange(off, size));
        }

        if func == "previous" {
            if orig_args.len() != 1 {
                return eqn_err!(ArityMismatch, loc.start, loc.end);
            }
            let ast::Expr::Var(id, vloc) = &orig_args[0] else {
                return eqn_err!(TypeMismatch, loc.start, loc.end);
            };
            return match self.resolve_scalar(id, *vloc)? {
                Expr::Var(off) => Ok(Expr::Prev(off)),
                _ => eqn_err!(TypeMismatch, loc.start, loc.end),
            };
        }

        if func == "lookup" {
            if orig_args.len() != 2 {
                return eqn_err!(ArityMismatch, loc.start, loc.end);
            }
            let ast::Expr::Var(id, _) = &orig_args[0] else {
                return eqn_err!(BadGraphicalFunction, loc.start, loc.end);
            };
            let table_id = self.table_for(id, loc)?;
            let index = self.lower(&orig_args[1])?;
            return Ok(Expr::App(BuiltinFn::Lookup(table_id, Box::new(index))));
        }

        let args: EquationResult<Vec<Expr>> =
            orig_args.iter().map(|e| self.lower(e)).collect();
        let mut args = args?;

        macro_rules! check_arity {
            ($builtin_fn:tt, 0) => {{
                if !args.is_empty() {
                    return eqn_err!(ArityMismatch, loc.start, loc.end);
                }

                BuiltinFn::$builtin_fn
            }};
            ($builtin_fn:tt, 1) => {{
                if args.len() != 1 {
                    return eqn_err!(ArityMismatch, loc.start, loc.end);
                }

                let a = args.remove(0);
                BuiltinFn::$builtin_fn(Box::new(a))
            }};
            ($builtin_fn:tt, 2) => {{
                if args.len() != 2 {
                    return eqn_err!(ArityMismatch, loc.start, loc.end);
                }

                let b = args.remove(1);
                let a = args.remove(0);
                BuiltinFn::$builtin_fn(Box::new(a), Box::new(b))
            }};
            ($builtin_fn:tt, 2, 3) => {{
                if args.len() == 2 {
                    let b = args.remove(1);
                    let a = args.remove(0);
                    BuiltinFn::$builtin_fn(Box::new(a), Box::new(b), None)
                } else if args.len() == 3 {
                    let c = args.remove(2);
                    let b = args.remove(1);
                    let a = args.remove(0);
                    BuiltinFn::$builtin_fn(Box::new(a), Box::new(b), Some(Box::new(c)))
                } else {
                    return eqn_err!(ArityMismatch, loc.start, loc.end);
                }
            }};
        }

        let builtin = match func {
            "abs" => check_arity!(Abs, 1),
            "arccos" => check_arity!(Arccos, 1),
            "arcsin" => check_arity!(Arcsin, 1),
            "arctan" => check_arity!(Arctan, 1),
            "cos" => check_arity!(Cos, 1),
            "exp" => check_arity!(Exp, 1),
            "inf" => check_arity!(Inf, 0),
            "int" => check_arity!(Int, 1),
            "ln" => check_arity!(Ln, 1),
            "log10" => check_arity!(Log10, 1),
            "max" => check_arity!(Max, 2),
            "mean" => {
                if args.is_empty() {
                    return eqn_err!(ArityMismatch, loc.start, loc.end);
                }
                BuiltinFn::Mean(args)
            }
            "min" => check_arity!(Min, 2),
            "nonnegative" => {
                if args.len() != 1 {
                    return eqn_err!(ArityMismatch, loc.start, loc.end);
                }
                let a = args.remove(0);
                BuiltinFn::Max(Box::new(a), Box::new(Expr::Const(0.0)))
            }
            "pi" => check_arity!(Pi, 0),
            "pulse" => check_arity!(Pulse, 2, 3),
            "ramp" => check_arity!(Ramp, 2, 3),
            "safediv" => check_arity!(SafeDiv, 2, 3),
            "sin" => check_arity!(Sin, 1),
            "sqrt" => check_arity!(Sqrt, 1),
            "step" => check_arity!(Step, 2),
            "tan" => check_arity!(Tan, 1),
            "time" => check_arity!(Time, 0),
            "time_step" | "dt" => check_arity!(TimeStep, 0),
            "initial_time" => check_arity!(StartTime, 0),
            "final_time" => check_arity!(FinalTime, 0),
            _ => {
                return eqn_err!(UnknownBuiltin, loc.start, loc.end);
            }
        };
        Ok(Expr::App(builtin))
    }
}

fn collect_deps(expr: &Expr, curr: &mut BTreeSet<usize>, prev: &mut BTreeSet<usize>) {
    match expr {
        Expr::Const(_) => {}
        Expr::Var(off) => {
            if *off >= IMPLICIT_VAR_COUNT {
                curr.insert(*off);
            }
        }
        Expr::Prev(off) => {
            if *off >= IMPLICIT_VAR_COUNT {
                prev.insert(*off);
            }
        }
        Expr::Subscript(off, indices, sizes) => {
            let size: usize = sizes.iter().product();
            for slot in *off..*off + size {
                curr.insert(slot);
            }
            for index in indices {
                collect_deps(index, curr, prev);
            }
        }
        Expr::SumRange(off, size) => {
            for slot in *off..*off + size {
                curr.insert(slot);
            }
        }
        Expr::App(builtin) => {
            use BuiltinFn::*;
            match builtin {
                Lookup(_, a) | Abs(a) | Arccos(a) | Arcsin(a) | Arctan(a) | Cos(a) | Exp(a)
                | Int(a) | Ln(a) | Log10(a) | Sin(a) | Sqrt(a) | Tan(a) => {
                    collect_deps(a, curr, prev)
                }
                Max(a, b) | Min(a, b) | Step(a, b) => {
                    collect_deps(a, curr, prev);
                    collect_deps(b, curr, prev);
                }
                Mean(args) => {
                    for arg in args {
                        collect_deps(arg, curr, prev);
                    }
                }
                Pulse(a, b, c) | Ramp(a, b, c) | SafeDiv(a, b, c) => {
                    collect_deps(a, curr, prev);
                    collect_deps(b, curr, prev);
                    if let Some(c) = c {
                        collect_deps(c, curr, prev);
                    }
                }
                Inf | Pi | Time | TimeStep | StartTime | FinalTime => {}
            }
        }
        Expr::Op2(_, l, r) => {
            collect_deps(l, curr, prev);
            collect_deps(r, curr, prev);
        }
        Expr::Op1(_, r) => collect_deps(r, curr, prev),
        Expr::If(cond, t, f) => {
            collect_deps(cond, curr, prev);
            collect_deps(t, curr, prev);
            collect_deps(f, curr, prev);
        }
    }
}

fn element_suffix(dims: &[Dimension], element: usize) -> String {
    let sizes: Vec<usize> = dims.iter().map(|d| d.len()).collect();
    let idx = multi_index(element, &sizes);
    let names: Vec<String> = idx
        .iter()
        .zip(dims.iter())
        .map(|(i, dim)| crate::common::canonicalize(&dim.elements[*i]))
        .collect();
    format!("[{}]", names.join(","))
}

struct ModelCompiler<'a> {
    project: &'a Project,
    instances: Vec<Instance>,
    vars: Vec<CompiledVar>,
    stocks: Vec<StockUpdate>,
    tables: Vec<Table>,
    table_ids: HashMap<Ident, usize>,
    errors: Vec<CompileError>,
}

impl<'a> ModelCompiler<'a> {
    fn lower_in(
        &mut self,
        instance: usize,
        active: Option<(&[Dimension], Vec<usize>)>,
        expr: &ast::Expr,
    ) -> EquationResult<Expr> {
        let mut ctx = LowerCtx {
            project: self.project,
            instances: &self.instances,
            instance,
            active,
            tables: &mut self.tables,
            table_ids: &mut self.table_ids,
        };
        ctx.lower(expr)
    }

    fn err(&mut self, instance: usize, ident: &str, err: EquationError) {
        let model = self.instances[instance].model_name.clone();
        self.errors
            .push(CompileError::from_equation_error(&model, ident, &err));
    }

    /// the flow slot feeding element `element` of a stock, or an error if
    /// the shapes don't line up
    fn flow_slot(
        &mut self,
        instance: usize,
        stock_ident: &str,
        stock_dims: Option<&[Dimension]>,
        flow_ident: &str,
        element: usize,
    ) -> Option<usize> {
        let Some((off, _size, dims)) = resolve_meta(&self.instances, instance, flow_ident)
        else {
            // already reported by model validation
            return None;
        };
        let compatible = match (stock_dims, dims) {
            (None, None) => true,
            (Some(sd), Some(fd)) => {
                sd.len() == fd.len() && sd.iter().zip(fd.iter()).all(|(a, b)| a.name == b.name)
            }
            _ => false,
        };
        if !compatible {
            self.err(
                instance,
                stock_ident,
                EquationError {
                    start: 0,
                    end: 0,
                    code: ErrorCode::TypeMismatch,
                },
            );
            return None;
        }
        Some(off + if stock_dims.is_some() { element } else { 0 })
    }

    fn compile_instance(&mut self, instance: usize) {
        let project = self.project;
        let inst_model_name = self.instances[instance].model_name.clone();
        let prefix = self.instances[instance].prefix.clone();
        let model: &Model = &project.models[&inst_model_name];

        for name in model.var_names() {
            let var = &model.variables[name];
            if var.is_module() {
                // child instances are compiled in their own pass
                continue;
            }

            let (base_off, dims) = {
                let meta = &self.instances[instance].offsets[name];
                (meta.off, meta.dims.clone())
            };
            let size = dims
                .as_ref()
                .map(|d| d.iter().map(|dim| dim.len()).product())
                .unwrap_or(1);

            // a module input override replaces the variable's own equation
            // with a copy from the parent scope
            let wired_src = self.instances[instance].inputs.get(name).cloned();
            if let Some(src) = wired_src {
                let parent = self.instances[instance].parent.unwrap_or(instance);
                let src_expr = self.lower_in(parent, None, &ast::Expr::Var(src, ast::Loc::default()));
                match src_expr {
                    Ok(expr) => {
                        self.push_var(instance, name, &prefix, base_off, var, None, Some(expr), None)
                    }
                    Err(e) => self.err(instance, name, e),
                }
                continue;
            }

            match var {
                Variable::Stock {
                    init_ast,
                    inflows,
                    outflows,
                    non_negative,
                    ..
                } => {
                    let Some(init_ast) = init_ast else {
                        // parse errors were already recorded
                        continue;
                    };
                    for element in 0..size {
                        let init_expr = self.lower_element(instance, init_ast, element);
                        let init_expr = match init_expr {
                            Ok(expr) => expr,
                            Err(e) => {
                                self.err(instance, name, e);
                                continue;
                            }
                        };

                        let inflow_slots: SmallVec<[usize; 4]> = inflows
                            .iter()
                            .filter_map(|f| {
                                self.flow_slot(instance, name, dims.as_deref(), f, element)
                            })
                            .collect();
                        let outflow_slots: SmallVec<[usize; 4]> = outflows
                            .iter()
                            .filter_map(|f| {
                                self.flow_slot(instance, name, dims.as_deref(), f, element)
                            })
                            .collect();

                        self.push_element(
                            instance,
                            name,
                            &prefix,
                            base_off,
                            element,
                            dims.as_deref(),
                            VarKind::Stock,
                            None,
                            Some(init_expr),
                        );
                        self.stocks.push(StockUpdate {
                            slot: base_off + element,
                            inflows: inflow_slots,
                            outflows: outflow_slots,
                            non_negative: *non_negative,
                        });
                    }
                }
                Variable::Var {
                    ast,
                    table,
                    non_negative,
                    ..
                } => {
                    let Some(ast) = ast else {
                        // unwired and empty
                        self.err(
                            instance,
                            name,
                            EquationError {
                                start: 0,
                                end: 0,
                                code: ErrorCode::EmptyEquation,
                            },
                        );
                        continue;
                    };
                    for element in 0..size {
                        let expr = self.lower_element(instance, ast, element);
                        let mut expr = match expr {
                            Ok(expr) => expr,
                            Err(e) => {
                                self.err(instance, name, e);
                                continue;
                            }
                        };
                        if table.is_some() {
                            let table_id = {
                                let mut ctx = LowerCtx {
                                    project: self.project,
                                    instances: &self.instances,
                                    instance,
                                    active: None,
                                    tables: &mut self.tables,
                                    table_ids: &mut self.table_ids,
                                };
                                ctx.table_for(name, ast::Loc::default())
                            };
                            match table_id {
                                Ok(id) => {
                                    expr = Expr::App(BuiltinFn::Lookup(id, Box::new(expr)));
                                }
                                Err(e) => {
                                    self.err(instance, name, e);
                                    continue;
                                }
                            }
                        }
                        if *non_negative {
                            expr = Expr::App(BuiltinFn::Max(
                                Box::new(expr),
                                Box::new(Expr::Const(0.0)),
                            ));
                        }
                        let kind = if var.is_flow() {
                            VarKind::Flow
                        } else {
                            VarKind::Aux
                        };
                        self.push_element(
                            instance,
                            name,
                            &prefix,
                            base_off,
                            element,
                            dims.as_deref(),
                            kind,
                            Some(expr),
                            None,
                        );
                    }
                }
                Variable::Module { .. } => unreachable!(),
            }
        }
    }

    fn lower_element(
        &mut self,
        instance: usize,
        ast: &Ast,
        element: usize,
    ) -> EquationResult<Expr> {
        match ast {
            Ast::Scalar(expr) => self.lower_in(instance, None, expr),
            Ast::ApplyToAll(dims, expr) => {
                let sizes: Vec<usize> = dims.iter().map(|d| d.len()).collect();
                let idx = multi_index(element, &sizes);
                let dims = dims.clone();
                self.lower_in(instance, Some((&dims, idx)), expr)
            }
            Ast::Arrayed(dims, elements) => {
                let key = &cartesian_keys(dims)[element];
                let Some(expr) = elements.get(key) else {
                    return Err(EquationError {
                        start: 0,
                        end: 0,
                        code: ErrorCode::BadSubscript,
                    });
                };
                let sizes: Vec<usize> = dims.iter().map(|d| d.len()).collect();
                let idx = multi_index(element, &sizes);
                let dims = dims.clone();
                self.lower_in(instance, Some((&dims, idx)), expr)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_element(
        &mut self,
        instance: usize,
        name: &str,
        prefix: &str,
        base_off: usize,
        element: usize,
        dims: Option<&[Dimension]>,
        kind: VarKind,
        expr: Option<Expr>,
        init_expr: Option<Expr>,
    ) {
        let ident = match dims {
            None => format!("{}{}", prefix, name),
            Some(dims) => format!("{}{}{}", prefix, name, element_suffix(dims, element)),
        };
        let mut curr = BTreeSet::new();
        let mut prev = BTreeSet::new();
        if let Some(expr) = &expr {
            collect_deps(expr, &mut curr, &mut prev);
        }
        if let Some(init_expr) = &init_expr {
            collect_deps(init_expr, &mut curr, &mut prev);
        }
        let model = self.instances[instance].model_name.clone();
        self.vars.push(CompiledVar {
            slot: base_off + element,
            ident: ident.clone(),
            model,
            kind,
            is_synthetic: is_synthetic_ident(&ident),
            expr,
            init_expr,
            deps: curr.into_iter().collect(),
            prev_deps: prev.into_iter().collect(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn push_var(
        &mut self,
        instance: usize,
        name: &str,
        prefix: &str,
        base_off: usize,
        var: &Variable,
        _dims: Option<&[Dimension]>,
        expr: Option<Expr>,
        init_expr: Option<Expr>,
    ) {
        let kind = if var.is_stock() {
            VarKind::Stock
        } else if var.is_flow() {
            VarKind::Flow
        } else {
            VarKind::Aux
        };
        self.push_element(
            instance, name, prefix, base_off, 0, None, kind, expr, init_expr,
        );
    }
}

/// DFS postorder over the slot graph; returns the run order or the cycle
/// it found.
fn order_nodes(
    nodes: &[usize],
    deps_of: impl Fn(usize) -> Vec<usize>,
    node_exists: impl Fn(usize) -> bool,
) -> Result<Vec<usize>, Vec<usize>> {
    #[derive(Copy, Clone, PartialEq)]
    enum State {
        New,
        Visiting,
        Done,
    }

    fn visit(
        slot: usize,
        deps_of: &impl Fn(usize) -> Vec<usize>,
        node_exists: &impl Fn(usize) -> bool,
        state: &mut HashMap<usize, State>,
        stack: &mut Vec<usize>,
        out: &mut Vec<usize>,
    ) -> Result<(), Vec<usize>> {
        match state.get(&slot).copied().unwrap_or(State::New) {
            State::Done => return Ok(()),
            State::Visiting => {
                let pos = stack.iter().position(|s| *s == slot).unwrap_or(0);
                return Err(stack[pos..].to_vec());
            }
            State::New => {}
        }
        state.insert(slot, State::Visiting);
        stack.push(slot);
        for dep in deps_of(slot) {
            if node_exists(dep) {
                visit(dep, deps_of, node_exists, state, stack, out)?;
            }
        }
        stack.pop();
        state.insert(slot, State::Done);
        out.push(slot);
        Ok(())
    }

    let mut state = HashMap::new();
    let mut out = Vec::with_capacity(nodes.len());
    for slot in nodes {
        visit(
            *slot,
            &deps_of,
            &node_exists,
            &mut state,
            &mut Vec::new(),
            &mut out,
        )?;
    }
    Ok(out)
}

pub fn compile(project: &Project) -> Result<CompiledProject, Vec<CompileError>> {
    let mut errors = project.compile_errors();

    let specs = match Specs::from(&project.datamodel.sim_specs) {
        Ok(specs) => Some(specs),
        Err(err) => {
            errors.push(err);
            None
        }
    };

    if !project.models.contains_key("main") {
        errors.push(CompileError::new("main", "main", ErrorCode::NotSimulatable));
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    let specs = specs.unwrap();

    let mut instances: Vec<Instance> = Vec::new();
    let mut memo = HashMap::new();
    if let Err(err) = build_instances(
        project,
        "main",
        "",
        IMPLICIT_VAR_COUNT,
        None,
        HashMap::new(),
        &mut instances,
        &mut memo,
    ) {
        return Err(vec![err]);
    }
    let n_slots = IMPLICIT_VAR_COUNT + slot_count(project, "main", &mut memo).map_err(|e| vec![e])?;

    let mut compiler = ModelCompiler {
        project,
        instances,
        vars: Vec::new(),
        stocks: Vec::new(),
        tables: Vec::new(),
        table_ids: HashMap::new(),
        errors: Vec::new(),
    };

    for instance in 0..compiler.instances.len() {
        compiler.compile_instance(instance);
    }

    if !compiler.errors.is_empty() {
        return Err(compiler.errors);
    }

    let ModelCompiler {
        mut vars,
        mut stocks,
        tables,
        ..
    } = compiler;

    vars.sort_unstable_by_key(|v| v.slot);
    stocks.sort_unstable_by_key(|s| s.slot);
    debug_assert!(vars
        .iter()
        .enumerate()
        .all(|(i, v)| v.slot == i + IMPLICIT_VAR_COUNT));

    let node_idx = |slot: usize| slot.checked_sub(IMPLICIT_VAR_COUNT);
    let node_exists = |slot: usize| {
        node_idx(slot)
            .map(|i| i < vars.len())
            .unwrap_or(false)
    };

    let cycle_error = |vars: &[CompiledVar], cycle: Vec<usize>| {
        let path: Vec<Ident> = cycle
            .iter()
            .filter_map(|slot| node_idx(*slot).map(|i| vars[i].ident.clone()))
            .collect();
        let model = cycle
            .first()
            .and_then(|slot| node_idx(*slot).map(|i| vars[i].model.clone()))
            .unwrap_or_else(|| "main".to_string());
        let ident = path.first().cloned().unwrap_or_default();
        let mut err = CompileError::new(&model, &ident, ErrorCode::CircularDependency);
        err.path = path;
        err
    };

    // the per-step ordering: non-stock variables, with stock reads free
    // (the integrator wrote stocks before this pass runs)
    let flow_nodes: Vec<usize> = vars
        .iter()
        .filter(|v| !v.is_stock())
        .map(|v| v.slot)
        .collect();
    let flow_deps = |slot: usize| -> Vec<usize> {
        let v = &vars[node_idx(slot).unwrap()];
        v.deps
            .iter()
            .copied()
            .filter(|dep| {
                node_idx(*dep)
                    .map(|i| i < vars.len() && !vars[i].is_stock())
                    .unwrap_or(false)
            })
            .collect()
    };
    let runlist_flows_slots = match order_nodes(&flow_nodes, flow_deps, node_exists) {
        Ok(order) => order,
        Err(cycle) => return Err(vec![cycle_error(&vars, cycle)]),
    };

    // the t0 ordering: everything, stocks initialize from their initial
    // expressions and do not break cycles
    let all_nodes: Vec<usize> = vars.iter().map(|v| v.slot).collect();
    let init_deps = |slot: usize| -> Vec<usize> {
        let v = &vars[node_idx(slot).unwrap()];
        let mut deps: Vec<usize> = v.deps.clone();
        // PREVIOUS(x) at t0 reads x(t0)
        deps.extend(v.prev_deps.iter().copied());
        deps
    };
    let runlist_initials_slots = match order_nodes(&all_nodes, init_deps, node_exists) {
        Ok(order) => order,
        Err(cycle) => return Err(vec![cycle_error(&vars, cycle)]),
    };

    let slot_to_var_idx = |slot: usize| slot - IMPLICIT_VAR_COUNT;
    let runlist_flows: Vec<usize> = runlist_flows_slots.into_iter().map(slot_to_var_idx).collect();
    let runlist_initials: Vec<usize> = runlist_initials_slots
        .into_iter()
        .map(slot_to_var_idx)
        .collect();

    let mut slot_names: Vec<Ident> = IMPLICIT_VAR_NAMES.iter().map(|s| s.to_string()).collect();
    slot_names.extend(vars.iter().map(|v| v.ident.clone()));

    let mut offsets: HashMap<Ident, usize> = HashMap::new();
    for (i, name) in slot_names.iter().enumerate() {
        offsets.insert(name.clone(), i);
    }

    Ok(CompiledProject {
        specs,
        n_slots,
        vars,
        runlist_initials,
        runlist_flows,
        stocks,
        offsets,
        slot_names,
        tables,
    })
}
