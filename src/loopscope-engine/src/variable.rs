// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashSet;

use crate::ast::{Ast, Expr, IndexExpr};
use crate::common::{canonicalize, EquationError, EquationResult, ErrorCode, Ident};
use crate::datamodel::{self, Dimension, GraphicalFunctionKind};
use crate::eqn_err;
use crate::macros::{expand_stateful_builtins, SyntheticVar};
use crate::parser;

/// A graphical function ready for evaluation.  `x` is always populated --
/// if the datamodel omitted explicit points we derive a uniform grid over
/// the x scale.
#[derive(Clone, PartialEq, Debug)]
pub struct Table {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub kind: GraphicalFunctionKind,
}

impl Table {
    pub fn new(gf: &datamodel::GraphicalFunction) -> EquationResult<Self> {
        let x: Vec<f64> = match &gf.x_points {
            Some(x_points) => x_points.clone(),
            None => {
                let x_min = gf.x_scale.min;
                let x_max = gf.x_scale.max;
                let size = gf.y_points.len() as f64;
                gf.y_points
                    .iter()
                    .enumerate()
                    .map(|(i, _)| ((i as f64) / (size - 1.0).max(1.0)) * (x_max - x_min) + x_min)
                    .collect()
            }
        };

        if x.len() != gf.y_points.len() || x.is_empty() {
            return eqn_err!(BadGraphicalFunction, 0, 0);
        }
        if x.windows(2).any(|w| w[0] >= w[1]) {
            return eqn_err!(BadGraphicalFunction, 0, 0);
        }

        Ok(Table {
            x,
            y: gf.y_points.clone(),
            kind: gf.kind,
        })
    }

    pub fn lookup(&self, index: f64) -> f64 {
        if self.x.is_empty() || index.is_nan() {
            return f64::NAN;
        }

        let size = self.x.len();
        match self.kind {
            GraphicalFunctionKind::Discrete => {
                // step function: y_k for x in [x_k, x_{k+1})
                if index < self.x[0] {
                    return self.y[0];
                }
                for i in (0..size).rev() {
                    if index >= self.x[i] {
                        return self.y[i];
                    }
                }
                self.y[size - 1]
            }
            GraphicalFunctionKind::Continuous => {
                if index <= self.x[0] {
                    self.y[0]
                } else if index >= self.x[size - 1] {
                    self.y[size - 1]
                } else {
                    self.interpolate(index)
                }
            }
            GraphicalFunctionKind::Extrapolate => {
                if size == 1 {
                    self.y[0]
                } else if index < self.x[0] {
                    let slope = (self.y[1] - self.y[0]) / (self.x[1] - self.x[0]);
                    self.y[0] + (index - self.x[0]) * slope
                } else if index > self.x[size - 1] {
                    let slope = (self.y[size - 1] - self.y[size - 2])
                        / (self.x[size - 1] - self.x[size - 2]);
                    self.y[size - 1] + (index - self.x[size - 1]) * slope
                } else {
                    self.interpolate(index)
                }
            }
        }
    }

    fn interpolate(&self, index: f64) -> f64 {
        // binary search for the first x >= index
        let mut low = 0;
        let mut high = self.x.len();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.x[mid] < index {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        let i = low;
        if self.x[i] == index {
            self.y[i]
        } else {
            let slope = (self.y[i] - self.y[i - 1]) / (self.x[i] - self.x[i - 1]);
            (index - self.x[i - 1]) * slope + self.y[i - 1]
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModuleInput {
    /// the identifier in the instantiating model we read from
    pub src: Ident,
    /// the identifier inside the module's model we override
    pub dst: Ident,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Variable {
    Stock {
        ident: Ident,
        init_ast: Option<Ast>,
        inflows: Vec<Ident>,
        outflows: Vec<Ident>,
        non_negative: bool,
        errors: Vec<EquationError>,
    },
    Var {
        ident: Ident,
        ast: Option<Ast>,
        table: Option<Table>,
        is_flow: bool,
        non_negative: bool,
        errors: Vec<EquationError>,
    },
    Module {
        ident: Ident,
        model_name: Ident,
        inputs: Vec<ModuleInput>,
        errors: Vec<EquationError>,
    },
}

impl Variable {
    pub fn ident(&self) -> &str {
        match self {
            Variable::Stock { ident, .. }
            | Variable::Var { ident, .. }
            | Variable::Module { ident, .. } => ident.as_str(),
        }
    }

    pub fn ast(&self) -> Option<&Ast> {
        match self {
            Variable::Stock {
                init_ast: Some(ast),
                ..
            }
            | Variable::Var { ast: Some(ast), .. } => Some(ast),
            _ => None,
        }
    }

    pub fn is_stock(&self) -> bool {
        matches!(self, Variable::Stock { .. })
    }

    pub fn is_flow(&self) -> bool {
        matches!(self, Variable::Var { is_flow: true, .. })
    }

    pub fn is_module(&self) -> bool {
        matches!(self, Variable::Module { .. })
    }

    pub fn table(&self) -> Option<&Table> {
        match self {
            Variable::Var { table, .. } => table.as_ref(),
            _ => None,
        }
    }

    pub fn get_dimensions(&self) -> Option<&[Dimension]> {
        match self.ast() {
            Some(Ast::ApplyToAll(dims, _)) | Some(Ast::Arrayed(dims, _)) => Some(dims),
            _ => None,
        }
    }

    pub fn errors(&self) -> &[EquationError] {
        match self {
            Variable::Stock { errors, .. }
            | Variable::Var { errors, .. }
            | Variable::Module { errors, .. } => errors,
        }
    }

    pub fn push_error(&mut self, err: EquationError) {
        match self {
            Variable::Stock { errors, .. }
            | Variable::Var { errors, .. }
            | Variable::Module { errors, .. } => errors.push(err),
        }
    }

    /// The identifiers this variable's equation reads.  Module variables
    /// read their input sources.
    pub fn direct_deps(&self, dimensions: &[Dimension]) -> HashSet<Ident> {
        match self {
            Variable::Module { inputs, .. } => {
                inputs.iter().map(|mi| mi.src.clone()).collect()
            }
            _ => match self.ast() {
                Some(ast) => identifier_set(ast, dimensions),
                None => HashSet::new(),
            },
        }
    }
}

fn get_dimensions(
    dimensions: &[Dimension],
    names: &[String],
) -> Result<Vec<Dimension>, EquationError> {
    names
        .iter()
        .map(|name| {
            let canonical = canonicalize(name);
            dimensions
                .iter()
                .find(|dim| canonicalize(&dim.name) == canonical)
                .cloned()
                .ok_or(EquationError {
                    start: 0,
                    end: 0,
                    code: ErrorCode::BadDimensionName,
                })
        })
        .collect()
}

/// All comma-joined element keys of the cartesian product of `dims`, in
/// row-major order.
pub fn cartesian_keys(dims: &[Dimension]) -> Vec<String> {
    let mut keys: Vec<String> = vec![String::new()];
    for dim in dims {
        let mut next = Vec::with_capacity(keys.len() * dim.len());
        for key in keys.iter() {
            for element in dim.elements.iter() {
                let element = canonicalize(element);
                if key.is_empty() {
                    next.push(element);
                } else {
                    next.push(format!("{},{}", key, element));
                }
            }
        }
        keys = next;
    }
    keys
}

fn parse_equation(
    eqn: &datamodel::Equation,
    dimensions: &[Dimension],
) -> (Option<Ast>, Vec<EquationError>) {
    fn parse_inner(eqn: &str) -> (Option<Expr>, Vec<EquationError>) {
        match parser::parse(eqn) {
            Ok(expr) => (expr, vec![]),
            Err(error) => (None, vec![error]),
        }
    }
    match eqn {
        datamodel::Equation::Scalar(eqn) => {
            let (ast, errors) = parse_inner(eqn);
            (ast.map(Ast::Scalar), errors)
        }
        datamodel::Equation::ApplyToAll(dimension_names, eqn) => {
            let (ast, mut errors) = parse_inner(eqn);

            match get_dimensions(dimensions, dimension_names) {
                Ok(dims) => (ast.map(|ast| Ast::ApplyToAll(dims, ast)), errors),
                Err(err) => {
                    errors.push(err);
                    (None, errors)
                }
            }
        }
        datamodel::Equation::Arrayed(dimension_names, elements) => {
            let mut errors: Vec<EquationError> = vec![];
            let elements: std::collections::HashMap<_, _> = elements
                .iter()
                .filter_map(|(subscript, eqn)| {
                    let (ast, single_errors) = parse_inner(eqn);
                    errors.extend(single_errors);
                    let key: String = subscript
                        .split(',')
                        .map(canonicalize)
                        .collect::<Vec<_>>()
                        .join(",");
                    ast.map(|ast| (key, ast))
                })
                .collect();

            match get_dimensions(dimensions, dimension_names) {
                Ok(dims) => {
                    // the element map must cover the full cartesian product
                    for key in cartesian_keys(&dims) {
                        if !elements.contains_key(&key) {
                            errors.push(EquationError {
                                start: 0,
                                end: 0,
                                code: ErrorCode::BadSubscript,
                            });
                            break;
                        }
                    }
                    (Some(Ast::Arrayed(dims, elements)), errors)
                }
                Err(err) => {
                    errors.push(err);
                    (None, errors)
                }
            }
        }
    }
}

/// Parse a datamodel variable into its checked form.  Synthetic variables
/// created by stateful-builtin expansion are appended to `implicit_vars`.
pub fn parse_var(
    dimensions: &[Dimension],
    v: &datamodel::Variable,
    implicit_vars: &mut Vec<SyntheticVar>,
) -> Variable {
    let mut parse_and_expand =
        |ident: &str, eqn: &datamodel::Equation| -> (Option<Ast>, Vec<EquationError>) {
            let (ast, mut errors) = parse_equation(eqn, dimensions);
            let ast = match ast {
                Some(ast) => match expand_stateful_builtins(ident, ast) {
                    Ok((ast, mut new_vars)) => {
                        implicit_vars.append(&mut new_vars);
                        Some(ast)
                    }
                    Err(err) => {
                        errors.push(err);
                        None
                    }
                },
                None => None,
            };
            (ast, errors)
        };

    match v {
        datamodel::Variable::Stock(v) => {
            let ident = canonicalize(&v.ident);
            let (ast, mut errors) = parse_and_expand(&ident, &v.equation);
            if ast.is_none() && errors.is_empty() {
                // a stock always needs an initial value
                errors.push(EquationError {
                    start: 0,
                    end: 0,
                    code: ErrorCode::EmptyEquation,
                });
            }
            Variable::Stock {
                ident,
                init_ast: ast,
                inflows: v.inflows.iter().map(|id| canonicalize(id)).collect(),
                outflows: v.outflows.iter().map(|id| canonicalize(id)).collect(),
                non_negative: v.non_negative,
                errors,
            }
        }
        datamodel::Variable::Flow(v) => {
            let ident = canonicalize(&v.ident);
            let (ast, mut errors) = parse_and_expand(&ident, &v.equation);
            let table = parse_table(&ident, &v.gf, &mut errors);
            Variable::Var {
                ident,
                ast,
                table,
                is_flow: true,
                non_negative: v.non_negative,
                errors,
            }
        }
        datamodel::Variable::Aux(v) => {
            let ident = canonicalize(&v.ident);
            let (ast, mut errors) = parse_and_expand(&ident, &v.equation);
            let table = parse_table(&ident, &v.gf, &mut errors);
            Variable::Var {
                ident,
                ast,
                table,
                is_flow: false,
                non_negative: false,
                errors,
            }
        }
        datamodel::Variable::Module(v) => {
            let ident = canonicalize(&v.ident);
            let mut errors = vec![];
            let inputs = v
                .references
                .iter()
                .filter_map(|r| match parse_module_reference(&ident, r) {
                    Ok(input) => Some(input),
                    Err(err) => {
                        errors.push(err);
                        None
                    }
                })
                .collect();
            Variable::Module {
                ident,
                model_name: canonicalize(&v.model_name),
                inputs,
                errors,
            }
        }
    }
}

fn parse_table(
    _ident: &str,
    gf: &Option<datamodel::GraphicalFunction>,
    errors: &mut Vec<EquationError>,
) -> Option<Table> {
    match gf {
        None => None,
        Some(gf) => match Table::new(gf) {
            Ok(table) => Some(table),
            Err(err) => {
                errors.push(err);
                None
            }
        },
    }
}

fn parse_module_reference(
    module_ident: &str,
    r: &datamodel::ModuleReference,
) -> EquationResult<ModuleInput> {
    let src = canonicalize(&r.src);
    let dst = canonicalize(&r.dst);

    // accept both a bare input ident and the "module.input" form some
    // importers produce
    let prefix = format!("{}.", module_ident);
    let dst = dst.strip_prefix(&prefix).unwrap_or(&dst).to_string();

    if dst.is_empty() || dst.contains('.') {
        return eqn_err!(BadModuleInputDst, 0, 0);
    }
    if src.is_empty() {
        return eqn_err!(BadModuleInputSrc, 0, 0);
    }

    Ok(ModuleInput { src, dst })
}

struct IdentifierSetVisitor<'a> {
    identifiers: HashSet<Ident>,
    dimensions: &'a [Dimension],
}

impl<'a> IdentifierSetVisitor<'a> {
    fn is_subscript_or_dimension(&self, ident: &str) -> bool {
        self.dimensions.iter().any(|dim| {
            canonicalize(&dim.name) == ident
                || dim.elements.iter().any(|el| canonicalize(el) == ident)
        })
    }

    fn walk_index(&mut self, e: &IndexExpr) {
        match e {
            IndexExpr::Wildcard(_) => {}
            IndexExpr::Expr(expr) => {
                if let Expr::Var(arg_ident, _) = expr {
                    if !self.is_subscript_or_dimension(arg_ident) {
                        self.walk(expr);
                    }
                } else {
                    self.walk(expr)
                }
            }
        }
    }

    fn walk(&mut self, e: &Expr) {
        match e {
            Expr::Const(_, _, _) => (),
            Expr::Var(id, _) => {
                self.identifiers.insert(id.clone());
            }
            Expr::App(_func, args, _) => {
                for arg in args.iter() {
                    self.walk(arg);
                }
            }
            Expr::Subscript(id, args, _) => {
                self.identifiers.insert(id.clone());
                args.iter().for_each(|arg| self.walk_index(arg));
            }
            Expr::Op2(_, l, r, _) => {
                self.walk(l);
                self.walk(r);
            }
            Expr::Op1(_, l, _) => {
                self.walk(l);
            }
            Expr::If(cond, t, f, _) => {
                self.walk(cond);
                self.walk(t);
                self.walk(f);
            }
        }
    }
}

pub fn identifier_set(ast: &Ast, dimensions: &[Dimension]) -> HashSet<Ident> {
    let mut id_visitor = IdentifierSetVisitor {
        identifiers: HashSet::new(),
        dimensions,
    };
    match ast {
        Ast::Scalar(ast) => id_visitor.walk(ast),
        Ast::ApplyToAll(_, ast) => id_visitor.walk(ast),
        Ast::Arrayed(_, elements) => {
            for ast in elements.values() {
                id_visitor.walk(ast);
            }
        }
    };
    id_visitor.identifiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{GraphicalFunction, GraphicalFunctionScale};

    fn gf(kind: GraphicalFunctionKind, x: Option<Vec<f64>>, y: Vec<f64>) -> GraphicalFunction {
        GraphicalFunction {
            kind,
            x_points: x,
            y_points: y,
            x_scale: GraphicalFunctionScale { min: 0.0, max: 3.0 },
            y_scale: GraphicalFunctionScale { min: 0.0, max: 9.0 },
        }
    }

    #[test]
    fn test_table_uniform_grid() {
        let table = Table::new(&gf(
            GraphicalFunctionKind::Continuous,
            None,
            vec![0.0, 1.0, 4.0, 9.0],
        ))
        .unwrap();
        assert_eq!(vec![0.0, 1.0, 2.0, 3.0], table.x);
    }

    #[test]
    fn test_table_continuous_clamps() {
        let table = Table::new(&gf(
            GraphicalFunctionKind::Continuous,
            Some(vec![0.0, 1.0, 2.0]),
            vec![0.0, 10.0, 40.0],
        ))
        .unwrap();
        assert_eq!(0.0, table.lookup(-5.0));
        assert_eq!(40.0, table.lookup(7.0));
        assert_eq!(5.0, table.lookup(0.5));
        assert_eq!(10.0, table.lookup(1.0));
    }

    #[test]
    fn test_table_extrapolate() {
        let table = Table::new(&gf(
            GraphicalFunctionKind::Extrapolate,
            Some(vec![0.0, 1.0, 2.0]),
            vec![0.0, 10.0, 40.0],
        ))
        .unwrap();
        assert_eq!(-10.0, table.lookup(-1.0));
        assert_eq!(70.0, table.lookup(3.0));
        assert_eq!(25.0, table.lookup(1.5));
    }

    #[test]
    fn test_table_discrete() {
        let table = Table::new(&gf(
            GraphicalFunctionKind::Discrete,
            Some(vec![0.0, 1.0, 2.0]),
            vec![5.0, 10.0, 20.0],
        ))
        .unwrap();
        assert_eq!(5.0, table.lookup(-1.0));
        assert_eq!(5.0, table.lookup(0.5));
        assert_eq!(10.0, table.lookup(1.0));
        assert_eq!(10.0, table.lookup(1.99));
        assert_eq!(20.0, table.lookup(2.0));
        assert_eq!(20.0, table.lookup(12.0));
    }

    #[test]
    fn test_table_validation() {
        // x must be strictly increasing
        assert!(Table::new(&gf(
            GraphicalFunctionKind::Continuous,
            Some(vec![0.0, 0.0, 1.0]),
            vec![1.0, 2.0, 3.0],
        ))
        .is_err());
        // lengths must match
        assert!(Table::new(&gf(
            GraphicalFunctionKind::Continuous,
            Some(vec![0.0, 1.0]),
            vec![1.0, 2.0, 3.0],
        ))
        .is_err());
    }

    #[test]
    fn test_identifier_set() {
        let cases: &[(&str, &[&str])] = &[
            ("if a then b else c", &["a", "b", "c"]),
            ("lookup(b, c)", &["b", "c"]),
            ("-(a)", &["a"]),
            ("if a = 1 then -c else lookup(c,b)", &["a", "b", "c"]),
            ("g[foo]", &["g"]),
            ("g[i]", &["g", "i"]),
            ("previous(a)", &["a"]),
        ];

        let dimensions = vec![Dimension {
            name: "dim1".to_string(),
            elements: vec!["foo".to_string()],
        }];

        for (eqn, expected) in cases.iter() {
            let expr = parser::parse(eqn).unwrap().unwrap();
            let id_set = identifier_set(&Ast::Scalar(expr), &dimensions);
            let expected: HashSet<Ident> = expected.iter().map(|s| s.to_string()).collect();
            assert_eq!(expected, id_set, "for equation {}", eqn);
        }
    }

    #[test]
    fn test_parse_var_stock() {
        let mut implicit = vec![];
        let var = parse_var(
            &[],
            &datamodel::Variable::Stock(datamodel::Stock {
                ident: "Population".to_string(),
                equation: datamodel::Equation::Scalar("100".to_string()),
                documentation: "".to_string(),
                units: None,
                inflows: vec!["Births".to_string()],
                outflows: vec![],
                non_negative: false,
            }),
            &mut implicit,
        );
        assert!(implicit.is_empty());
        assert!(var.errors().is_empty());
        assert_eq!("population", var.ident());
        if let Variable::Stock { inflows, .. } = &var {
            assert_eq!(vec!["births".to_string()], *inflows);
        } else {
            panic!("expected stock");
        }
    }

    #[test]
    fn test_parse_var_empty_stock_errors() {
        let mut implicit = vec![];
        let var = parse_var(
            &[],
            &datamodel::Variable::Stock(datamodel::Stock {
                ident: "s".to_string(),
                equation: datamodel::Equation::Scalar("".to_string()),
                documentation: "".to_string(),
                units: None,
                inflows: vec![],
                outflows: vec![],
                non_negative: false,
            }),
            &mut implicit,
        );
        assert_eq!(ErrorCode::EmptyEquation, var.errors()[0].code);
    }

    #[test]
    fn test_cartesian_keys() {
        let dims = vec![
            Dimension {
                name: "a".to_string(),
                elements: vec!["x".to_string(), "y".to_string()],
            },
            Dimension {
                name: "b".to_string(),
                elements: vec!["1".to_string(), "2".to_string()],
            },
        ];
        assert_eq!(vec!["x,1", "x,2", "y,1", "y,2"], cartesian_keys(&dims));
    }

    #[test]
    fn test_module_reference_forms() {
        let input = parse_module_reference(
            "hares",
            &datamodel::ModuleReference {
                src: "area".to_string(),
                dst: "hares.area".to_string(),
            },
        )
        .unwrap();
        assert_eq!("area", input.src);
        assert_eq!("area", input.dst);

        let input = parse_module_reference(
            "hares",
            &datamodel::ModuleReference {
                src: "lynxes.lynxes_stock".to_string(),
                dst: "lynxes".to_string(),
            },
        )
        .unwrap();
        assert_eq!("lynxes.lynxes_stock", input.src);
        assert_eq!("lynxes", input.dst);
    }
}
