// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A system-dynamics simulation engine with Loops-That-Matter loop
//! dominance analysis.
//!
//! The pipeline: a [`datamodel::Project`] (produced by an importer or
//! [`deserialize`]) is [`compile`]d into an immutable [`CompiledProject`],
//! [`run`] produces a [`Results`] bundle, and [`analyze_ltm`] +
//! [`project_simplified_cld`] turn a run's link scores into loop-dominance
//! series and a simplified causal-loop diagram.

#![forbid(unsafe_code)]

pub use prost;

pub mod ast;
pub mod builtins;
pub mod common;
pub mod compiler;
pub mod datamodel;
pub mod ltm;
pub mod macros;
pub mod model;
mod parser;
pub mod project;
pub mod project_io;
pub mod results;
pub mod serde;
mod token;
pub mod variable;
pub mod vm;

pub use crate::common::{canonicalize, CompileError, Error, ErrorCode, Ident};
pub use crate::compiler::{CompiledProject, Method, Specs};
pub use crate::ltm::{
    analyze_ltm, project_simplified_cld, LoopSpec, LtmOptions, LtmReport, PathSpec, SimplifiedCld,
    SimplifyOptions,
};
pub use crate::project::Project;
pub use crate::results::{read_binary, Results, StopReason};
pub use crate::serde::{deserialize, serialize};
pub use crate::variable::Table;
pub use crate::vm::{run, CancelHandle, RunOptions};

/// Parse, validate, and lower a project to its executable form,
/// collecting every compile error rather than stopping at the first.
pub fn compile(
    project: &datamodel::Project,
) -> std::result::Result<CompiledProject, Vec<CompileError>> {
    for model in project.models.iter() {
        for view in model.views.iter() {
            let datamodel::View::StockFlow(sf) = view;
            let broken = sf.broken_uid_refs();
            if !broken.is_empty() {
                tracing::warn!(
                    model = model.name.as_str(),
                    ?broken,
                    "view references missing uids"
                );
            }
        }
    }

    let parsed = Project::from(project.clone());
    let compiled = compiler::compile(&parsed)?;
    tracing::debug!(
        slots = compiled.n_slots,
        stocks = compiled.stocks.len(),
        "compiled project"
    );
    Ok(compiled)
}
