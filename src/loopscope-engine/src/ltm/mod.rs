// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Loops That Matter: per-step link scores, loop discovery, loop-dominance
//! aggregation, and the simplified-CLD projection.

use serde::Serialize;

use crate::common::Ident;

pub mod aggregate;
pub mod cld;
pub mod loops;
pub mod scores;

pub use aggregate::{analyze_ltm, LtmOptions, LtmReport, ReportLink, ReportLoop, ReportPath};
pub use cld::{project_simplified_cld, CldLink, CldLoop, SimplifiedCld, SimplifyOptions};

/// A signed link score for one dt interval: magnitude × polarity.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct LinkScore {
    pub from: u32,
    pub to: u32,
    pub score: f64,
}

/// All the non-zero link scores for one dt interval.
pub type LinkScoreFrame = Vec<LinkScore>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum LinkPolarity {
    Positive,
    Negative,
    Mixed,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum LoopPolarity {
    Reinforcing,
    Balancing,
    Mixed,
}

/// An explicitly registered loop the analyzer scores whether or not
/// discovery finds it.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct LoopSpec {
    pub id: Option<String>,
    pub idents: Vec<Ident>,
}

/// An explicitly registered open path to score.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PathSpec {
    pub idents: Vec<Ident>,
}

/// Non-fatal analyzer diagnostics; a failed LTM pass still returns the
/// best-effort report.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub enum LtmError {
    LoopNotDiscovered { loop_spec: Vec<Ident> },
    PathNotWellFormed { path: Vec<Ident> },
}
