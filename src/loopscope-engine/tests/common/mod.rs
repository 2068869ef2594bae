// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![allow(dead_code)]

use loopscope_engine::datamodel::{
    Aux, Dt, Equation, Flow, Model, Module, ModuleReference, Project, SimMethod, SimSpecs, Stock,
    Variable,
};
use loopscope_engine::{compile, run, CompiledProject, Results, RunOptions};

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

pub fn x_project(stop: f64, dt: f64, models: Vec<Model>) -> Project {
    Project {
        name: "test".to_string(),
        sim_specs: SimSpecs {
            start: 0.0,
            stop,
            dt: Dt::Dt(dt),
            save_step: None,
            sim_method: SimMethod::Euler,
            time_units: None,
        },
        dimensions: vec![],
        models,
    }
}

pub fn simulate(project: &Project, enable_ltm: bool) -> (CompiledProject, Results) {
    let compiled = compile(project).unwrap_or_else(|errors| {
        panic!("compile errors: {:?}", errors);
    });
    let results = run(
        &compiled,
        RunOptions {
            enable_ltm,
            ..Default::default()
        },
    );
    (compiled, results)
}
