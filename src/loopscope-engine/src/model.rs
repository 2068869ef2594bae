// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::{BTreeSet, HashMap};

use crate::common::{
    canonicalize, is_reserved_ident, CompileError, EquationError, ErrorCode, Ident,
};
use crate::datamodel::{self, Dimension};
use crate::macros::SyntheticVar;
use crate::variable::{parse_var, Variable};

#[derive(Clone, PartialEq, Debug)]
pub struct Model {
    pub name: Ident,
    pub variables: HashMap<Ident, Variable>,
    /// model-scoped problems (duplicates, reserved names, bad references);
    /// equation-scoped problems live on each variable
    pub errors: Vec<CompileError>,
    /// names of models instantiated by modules in this model
    pub model_deps: BTreeSet<Ident>,
}

impl Model {
    pub fn new(x_model: &datamodel::Model, dimensions: &[Dimension]) -> Self {
        let name = canonicalize(&x_model.name);
        let mut errors: Vec<CompileError> = Vec::new();

        let mut implicit_vars: Vec<SyntheticVar> = Vec::new();
        let mut variable_list: Vec<Variable> = x_model
            .variables
            .iter()
            .map(|v| parse_var(dimensions, v, &mut implicit_vars))
            .collect();

        variable_list.extend(implicit_vars.into_iter().map(synthetic_to_variable));

        let mut variables: HashMap<Ident, Variable> = HashMap::new();
        for var in variable_list.into_iter() {
            let ident = var.ident().to_string();
            if is_reserved_ident(&ident) {
                errors.push(CompileError::new(&name, &ident, ErrorCode::ReservedIdent));
                continue;
            }
            if variables.contains_key(&ident) {
                errors.push(CompileError::new(&name, &ident, ErrorCode::DuplicateIdent));
                continue;
            }
            variables.insert(ident, var);
        }

        let model_deps: BTreeSet<Ident> = variables
            .values()
            .filter_map(|v| match v {
                Variable::Module { model_name, .. } => Some(model_name.clone()),
                _ => None,
            })
            .collect();

        let mut model = Model {
            name,
            variables,
            errors,
            model_deps,
        };
        model.check_stock_flow_refs();
        model.check_local_deps(dimensions);
        model
    }

    /// every inflow/outflow an ident on a stock must name a flow in this
    /// model
    fn check_stock_flow_refs(&mut self) {
        let mut errors: Vec<(Ident, EquationError)> = vec![];
        for (ident, var) in self.variables.iter() {
            if let Variable::Stock {
                inflows, outflows, ..
            } = var
            {
                for flow in inflows.iter().chain(outflows.iter()) {
                    match self.variables.get(flow) {
                        None => errors.push((
                            ident.clone(),
                            EquationError {
                                start: 0,
                                end: 0,
                                code: ErrorCode::UndefinedIdent,
                            },
                        )),
                        Some(v) if !v.is_flow() => errors.push((
                            ident.clone(),
                            EquationError {
                                start: 0,
                                end: 0,
                                code: ErrorCode::TypeMismatch,
                            },
                        )),
                        Some(_) => {}
                    }
                }
            }
        }
        for (ident, err) in errors {
            if let Some(var) = self.variables.get_mut(&ident) {
                var.push_error(err);
            }
        }
    }

    /// non-dotted dependencies must resolve inside this model; the head of
    /// a dotted dependency must name a module here (the remainder is
    /// checked against the child model at the project level)
    fn check_local_deps(&mut self, dimensions: &[Dimension]) {
        let known: BTreeSet<Ident> = self.variables.keys().cloned().collect();
        let modules: BTreeSet<Ident> = self
            .variables
            .values()
            .filter(|v| v.is_module())
            .map(|v| v.ident().to_string())
            .collect();

        let mut errors: Vec<(Ident, EquationError)> = vec![];
        for (ident, var) in self.variables.iter() {
            for dep in var.direct_deps(dimensions) {
                let head = match dep.find('.') {
                    Some(pos) => &dep[..pos],
                    None => dep.as_str(),
                };
                let resolves = if dep.contains('.') {
                    modules.contains(head)
                } else {
                    known.contains(head) || is_reserved_ident(head)
                };
                if !resolves {
                    let loc = var
                        .ast()
                        .and_then(|ast| ast.get_var_loc(&dep))
                        .unwrap_or_default();
                    errors.push((
                        ident.clone(),
                        EquationError {
                            start: loc.start,
                            end: loc.end,
                            code: ErrorCode::UndefinedIdent,
                        },
                    ));
                }
            }
        }
        for (ident, err) in errors {
            if let Some(var) = self.variables.get_mut(&ident) {
                var.push_error(err);
            }
        }
    }

    /// variable names in deterministic order
    pub fn var_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.variables.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn compile_errors(&self) -> Vec<CompileError> {
        let mut result = self.errors.clone();
        for name in self.var_names() {
            let var = &self.variables[name];
            for err in var.errors() {
                result.push(CompileError::from_equation_error(&self.name, name, err));
            }
        }
        result
    }
}

fn synthetic_to_variable(v: SyntheticVar) -> Variable {
    use crate::ast::Ast;
    match v {
        SyntheticVar::Stock {
            ident,
            init,
            inflows,
            outflows,
        } => Variable::Stock {
            ident,
            init_ast: Some(Ast::Scalar(init)),
            inflows,
            outflows,
            non_negative: false,
            errors: vec![],
        },
        SyntheticVar::Flow { ident, ast } => Variable::Var {
            ident,
            ast: Some(Ast::Scalar(ast)),
            table: None,
            is_flow: true,
            non_negative: false,
            errors: vec![],
        },
    }
}

#[cfg(test)]
pub(crate) mod testutils {
    use crate::datamodel::{
        Aux, Dt, Equation, Flow, Model, Module, ModuleReference, Project, SimMethod, SimSpecs,
        Stock, Variable,
    };

    pub fn x_aux(ident: &str, eqn: &str) -> Variable {
        Variable::Aux(Aux {
            ident: ident.to_string(),
            equation: Equation::Scalar(eqn.to_string()),
            documentation: "".to_string(),
            units: None,
            gf: None,
        })
    }

    pub fn x_flow(ident: &str, eqn: &str) -> Variable {
        Variable::Flow(Flow {
            ident: ident.to_string(),
            equation: Equation::Scalar(eqn.to_string()),
            documentation: "".to_string(),
            units: None,
            gf: None,
            non_negative: false,
        })
    }

    pub fn x_stock(ident: &str, eqn: &str, inflows: &[&str], outflows: &[&str]) -> Variable {
        Variable::Stock(Stock {
            ident: ident.to_string(),
            equation: Equation::Scalar(eqn.to_string()),
            documentation: "".to_string(),
            units: None,
            inflows: inflows.iter().map(|s| s.to_string()).collect(),
            outflows: outflows.iter().map(|s| s.to_string()).collect(),
            non_negative: false,
        })
    }

    pub fn x_module(ident: &str, model_name: &str, refs: &[(&str, &str)]) -> Variable {
        Variable::Module(Module {
            ident: ident.to_string(),
            model_name: model_name.to_string(),
            documentation: "".to_string(),
            units: None,
            references: refs
                .iter()
                .map(|(src, dst)| ModuleReference {
                    src: src.to_string(),
                    dst: dst.to_string(),
                })
                .collect(),
        })
    }

    pub fn x_model(name: &str, variables: Vec<Variable>) -> Model {
        Model {
            name: name.to_string(),
            variables,
            views: vec![],
        }
    }

    pub fn x_project(models: Vec<Model>) -> Project {
        Project {
            name: "test".to_string(),
            sim_specs: SimSpecs {
                start: 0.0,
                stop: 10.0,
                dt: Dt::Dt(1.0),
                save_step: None,
                sim_method: SimMethod::Euler,
                time_units: None,
            },
            dimensions: vec![],
            models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::*;
    use super::*;

    #[test]
    fn test_unknown_dependency() {
        let x_model = x_model("main", vec![x_aux("aux_3", "unknown_variable * 3.14")]);
        let model = Model::new(&x_model, &[]);

        let errors = model.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::UndefinedIdent, errors[0].code);
        assert_eq!("aux_3", errors[0].ident);
        // the span points at the unknown name
        assert_eq!(Some((0, 16)), errors[0].loc);
    }

    #[test]
    fn test_duplicate_ident() {
        let x_model = x_model("main", vec![x_aux("a", "1"), x_aux("A", "2")]);
        let model = Model::new(&x_model, &[]);
        let errors = model.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::DuplicateIdent, errors[0].code);
    }

    #[test]
    fn test_reserved_ident() {
        let x_model = x_model("main", vec![x_aux("time", "1")]);
        let model = Model::new(&x_model, &[]);
        let errors = model.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::ReservedIdent, errors[0].code);
    }

    #[test]
    fn test_time_is_usable() {
        let x_model = x_model("main", vec![x_aux("a", "time * 2")]);
        let model = Model::new(&x_model, &[]);
        assert!(model.compile_errors().is_empty());
    }

    #[test]
    fn test_stock_flow_refs_checked() {
        let x_model = x_model(
            "main",
            vec![
                x_stock("s", "100", &["not_a_flow"], &[]),
                x_aux("not_a_flow", "5"),
            ],
        );
        let model = Model::new(&x_model, &[]);
        let errors = model.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::TypeMismatch, errors[0].code);
        assert_eq!("s", errors[0].ident);
    }

    #[test]
    fn test_stock_missing_flow() {
        let x_model = x_model("main", vec![x_stock("s", "100", &["ghost"], &[])]);
        let model = Model::new(&x_model, &[]);
        let errors = model.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::UndefinedIdent, errors[0].code);
    }

    #[test]
    fn test_synthetic_vars_added() {
        let x_model = x_model(
            "main",
            vec![x_aux("input", "5"), x_aux("smoothed", "SMTH1(input, 3)")],
        );
        let model = Model::new(&x_model, &[]);
        assert!(model.compile_errors().is_empty());
        assert!(model.variables.contains_key("$smoothed·0·smth1·s"));
        assert!(model.variables.contains_key("$smoothed·0·smth1·net"));
    }

    #[test]
    fn test_dotted_dep_requires_module() {
        let model_def = x_model("main", vec![x_aux("a", "nonexistent.output")]);
        let model = Model::new(&model_def, &[]);
        let errors = model.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::UndefinedIdent, errors[0].code);

        let x_model2 = x_model(
            "main",
            vec![
                x_module("sub", "submodel", &[]),
                x_aux("a", "sub.output"),
            ],
        );
        let model = Model::new(&x_model2, &[]);
        // the head resolves to a module; the tail is checked at project level
        assert!(model.compile_errors().is_empty());
    }
}
