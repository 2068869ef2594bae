// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::common::{canonicalize, CompileError, ErrorCode, Ident};
use crate::datamodel;
use crate::model::Model;
use crate::variable::Variable;

/// A parsed and cross-validated project.  Equation-level problems live on
/// the variables; `compile_errors` collects everything.
#[derive(Clone, Debug)]
pub struct Project {
    pub datamodel: datamodel::Project,
    pub models: HashMap<Ident, Rc<Model>>,
    /// project-scoped problems: missing module targets, instantiation
    /// cycles, bad module wiring
    pub errors: Vec<CompileError>,
}

impl Project {
    pub fn name(&self) -> &str {
        &self.datamodel.name
    }

    pub fn compile_errors(&self) -> Vec<CompileError> {
        let mut result = self.errors.clone();
        let mut model_names: Vec<&Ident> = self.models.keys().collect();
        model_names.sort_unstable();
        for name in model_names {
            result.extend(self.models[name].compile_errors());
        }
        result
    }
}

/// Follow a possibly-dotted identifier from `model_name` to the variable it
/// names, crossing module boundaries.
pub fn resolve_relative<'a>(
    models: &'a HashMap<Ident, Model>,
    model_name: &str,
    ident: &str,
) -> Option<&'a Variable> {
    let model = models.get(model_name)?;

    if let Some(pos) = ident.find('.') {
        let module_ident = &ident[..pos];
        let rest = &ident[pos + 1..];
        match model.variables.get(module_ident)? {
            Variable::Module { model_name, .. } => {
                resolve_relative(models, model_name, rest)
            }
            _ => None,
        }
    } else {
        model.variables.get(ident)
    }
}

fn check_module_instantiation_cycles(
    models: &HashMap<Ident, Model>,
    errors: &mut Vec<CompileError>,
) {
    fn visit(
        models: &HashMap<Ident, Model>,
        name: &str,
        visiting: &mut Vec<Ident>,
        done: &mut BTreeSet<Ident>,
        errors: &mut Vec<CompileError>,
    ) {
        if done.contains(name) {
            return;
        }
        if let Some(pos) = visiting.iter().position(|n| n == name) {
            let path: Vec<Ident> = visiting[pos..].to_vec();
            let mut err = CompileError::new(name, name, ErrorCode::CircularDependency);
            err.path = path;
            errors.push(err);
            return;
        }
        let Some(model) = models.get(name) else {
            return;
        };
        visiting.push(name.to_string());
        for dep in model.model_deps.iter() {
            visit(models, dep, visiting, done, errors);
        }
        visiting.pop();
        done.insert(name.to_string());
    }

    let mut names: Vec<&Ident> = models.keys().collect();
    names.sort_unstable();
    let mut done = BTreeSet::new();
    for name in names {
        visit(models, name, &mut Vec::new(), &mut done, errors);
    }
}

fn check_modules(models: &HashMap<Ident, Model>, errors: &mut Vec<CompileError>) {
    let mut model_names: Vec<&Ident> = models.keys().collect();
    model_names.sort_unstable();

    for model_name in model_names {
        let model = &models[model_name];
        for name in model.var_names() {
            let var = &model.variables[name];

            // dotted dependency tails must resolve through the module tree
            for dep in var.direct_deps(&[]) {
                if dep.contains('.') && resolve_relative(models, model_name, &dep).is_none() {
                    errors.push(CompileError::new(
                        model_name,
                        name,
                        ErrorCode::UndefinedIdent,
                    ));
                }
            }

            let Variable::Module {
                ident,
                model_name: target,
                inputs,
                ..
            } = var
            else {
                continue;
            };

            let Some(child) = models.get(target) else {
                let mut err = CompileError::new(model_name, ident, ErrorCode::ModuleNotFound);
                err.path = vec![target.clone()];
                errors.push(err);
                continue;
            };

            for input in inputs.iter() {
                match child.variables.get(&input.dst) {
                    None => {
                        errors.push(CompileError::new(
                            model_name,
                            ident,
                            ErrorCode::BadModuleInputDst,
                        ));
                    }
                    Some(dst_var) => {
                        // only scalar flows and auxes can be overridden by
                        // a wire
                        if dst_var.get_dimensions().is_some()
                            || dst_var.is_module()
                            || dst_var.is_stock()
                        {
                            errors.push(CompileError::new(
                                model_name,
                                ident,
                                ErrorCode::TypeMismatch,
                            ));
                        }
                    }
                }
                match resolve_relative(models, model_name, &input.src) {
                    None => {
                        errors.push(CompileError::new(
                            model_name,
                            ident,
                            ErrorCode::BadModuleInputSrc,
                        ));
                    }
                    Some(src_var) => {
                        // passing an arrayed variable through a scalar
                        // module input is rejected
                        if src_var.get_dimensions().is_some() {
                            errors.push(CompileError::new(
                                model_name,
                                ident,
                                ErrorCode::TypeMismatch,
                            ));
                        }
                    }
                }
            }
        }
    }
}

impl From<datamodel::Project> for Project {
    fn from(project_datamodel: datamodel::Project) -> Self {
        let mut models_map: HashMap<Ident, Model> = HashMap::new();
        let mut errors: Vec<CompileError> = Vec::new();

        for x_model in project_datamodel.models.iter() {
            let model = Model::new(x_model, &project_datamodel.dimensions);
            let name = model.name.clone();
            if models_map.contains_key(&name) {
                errors.push(CompileError::new(&name, &name, ErrorCode::DuplicateIdent));
                continue;
            }
            models_map.insert(name, model);
        }

        check_module_instantiation_cycles(&models_map, &mut errors);
        // wiring checks only make sense on an acyclic module tree
        if errors.is_empty() {
            check_modules(&models_map, &mut errors);
        }

        let models = models_map
            .into_iter()
            .map(|(name, m)| (name, Rc::new(m)))
            .collect();

        Project {
            datamodel: project_datamodel,
            models,
            errors,
        }
    }
}

impl Project {
    pub fn get_model(&self, name: &str) -> Option<&Rc<Model>> {
        self.models.get(&canonicalize(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutils::*;

    #[test]
    fn test_missing_module_target() {
        let project = x_project(vec![x_model(
            "main",
            vec![x_module("mod_1", "no_such_model", &[])],
        )]);
        let project = Project::from(project);
        let errors = project.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::ModuleNotFound, errors[0].code);
        assert_eq!(vec!["no_such_model".to_string()], errors[0].path);
    }

    #[test]
    fn test_module_instantiation_cycle() {
        let project = x_project(vec![
            x_model("main", vec![x_module("a", "model_a", &[])]),
            x_model("model_a", vec![x_module("b", "model_b", &[])]),
            x_model("model_b", vec![x_module("a2", "model_a", &[])]),
        ]);
        let project = Project::from(project);
        assert!(project
            .compile_errors()
            .iter()
            .any(|e| e.code == ErrorCode::CircularDependency));
    }

    #[test]
    fn test_module_wiring() {
        let project = x_project(vec![
            x_model(
                "main",
                vec![
                    x_aux("main_input", "7"),
                    x_module("sub", "submodel", &[("main_input", "inp")]),
                    x_flow("reader", "sub.output"),
                ],
            ),
            x_model(
                "submodel",
                vec![x_aux("inp", "0"), x_aux("output", "inp * 2")],
            ),
        ]);
        let project = Project::from(project);
        assert!(project.compile_errors().is_empty(), "{:?}", project.compile_errors());
    }

    #[test]
    fn test_bad_module_dst() {
        let project = x_project(vec![
            x_model(
                "main",
                vec![
                    x_aux("main_input", "7"),
                    x_module("sub", "submodel", &[("main_input", "missing")]),
                ],
            ),
            x_model("submodel", vec![x_aux("output", "2")]),
        ]);
        let project = Project::from(project);
        let errors = project.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::BadModuleInputDst, errors[0].code);
    }

    #[test]
    fn test_dotted_tail_checked() {
        let project = x_project(vec![
            x_model(
                "main",
                vec![
                    x_module("sub", "submodel", &[]),
                    x_aux("a", "sub.missing_output"),
                ],
            ),
            x_model("submodel", vec![x_aux("output", "2")]),
        ]);
        let project = Project::from(project);
        let errors = project.compile_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::UndefinedIdent, errors[0].code);
        assert_eq!("a", errors[0].ident);
    }
}
