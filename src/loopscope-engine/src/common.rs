// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::{error, result};

use lazy_static::lazy_static;
use regex::Regex;

pub type Ident = String;
pub type DimensionName = String;
pub type ElementName = String;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    DoesNotExist,
    ProtobufDecode,
    InvalidToken,
    UnrecognizedEof,
    UnrecognizedToken,
    ExtraToken,
    UnclosedComment,
    UnclosedQuotedIdent,
    ExpectedNumber,
    EmptyEquation,
    UndefinedIdent,
    UnknownBuiltin,
    ArityMismatch,
    TypeMismatch,
    BadSubscript,
    BadDimensionName,
    CircularDependency,
    DuplicateIdent,
    BadGraphicalFunction,
    ModuleNotFound,
    ReservedIdent,
    BadModuleInputSrc,
    BadModuleInputDst,
    BadSimSpecs,
    NotSimulatable,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            DoesNotExist => "does_not_exist",
            ProtobufDecode => "protobuf_decode",
            InvalidToken => "invalid_token",
            UnrecognizedEof => "unrecognized_eof",
            UnrecognizedToken => "unrecognized_token",
            ExtraToken => "extra_token",
            UnclosedComment => "unclosed_comment",
            UnclosedQuotedIdent => "unclosed_quoted_ident",
            ExpectedNumber => "expected_number",
            EmptyEquation => "empty_equation",
            UndefinedIdent => "undefined_ident",
            UnknownBuiltin => "unknown_builtin",
            ArityMismatch => "arity_mismatch",
            TypeMismatch => "type_mismatch",
            BadSubscript => "bad_subscript",
            BadDimensionName => "bad_dimension_name",
            CircularDependency => "circular_dependency",
            DuplicateIdent => "duplicate_ident",
            BadGraphicalFunction => "bad_graphical_function",
            ModuleNotFound => "module_not_found",
            ReservedIdent => "reserved_ident",
            BadModuleInputSrc => "bad_module_input_src",
            BadModuleInputDst => "bad_module_input_dst",
            BadSimSpecs => "bad_sim_specs",
            NotSimulatable => "not_simulatable",
            Generic => "generic",
        };

        write!(f, "{}", name)
    }
}

/// An error attributable to a span of a single equation's text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EquationError {
    pub start: u16,
    pub end: u16,
    pub code: ErrorCode,
}

impl fmt::Display for EquationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.end, self.code)
    }
}

/// A single problem found during compilation, attributed to the model and
/// variable it occurred in.  `compile` collects every CompileError in the
/// project rather than stopping at the first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompileError {
    pub model: Ident,
    pub ident: Ident,
    pub code: ErrorCode,
    /// span within the offending variable's equation, when known
    pub loc: Option<(u16, u16)>,
    /// for CircularDependency: the cycle, in evaluation order
    pub path: Vec<Ident>,
}

impl CompileError {
    pub fn new(model: &str, ident: &str, code: ErrorCode) -> Self {
        CompileError {
            model: model.to_owned(),
            ident: ident.to_owned(),
            code,
            loc: None,
            path: vec![],
        }
    }

    pub fn from_equation_error(model: &str, ident: &str, err: &EquationError) -> Self {
        CompileError {
            model: model.to_owned(),
            ident: ident.to_owned(),
            code: err.code,
            loc: Some((err.start, err.end)),
            path: vec![],
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.loc {
            Some((start, end)) => write!(
                f,
                "{}:{}:{}:{}:{}",
                self.model, self.ident, start, end, self.code
            ),
            None => write!(f, "{}:{}:{}", self.model, self.ident, self.code),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Import,
    Model,
    Simulation,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Import => "ImportError",
            ErrorKind::Model => "ModelError",
            ErrorKind::Simulation => "SimulationError",
            ErrorKind::Variable => "VariableError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;
pub type EquationResult<T> = result::Result<T, EquationError>;

#[macro_export]
macro_rules! eqn_err(
    ($code:tt, $start:expr, $end:expr) => {{
        use $crate::common::{EquationError, ErrorCode};
        Err(EquationError{ start: $start, end: $end, code: ErrorCode::$code})
    }}
);

/// Variable names that resolve to implicit simulation slots and may not be
/// redefined by a model.
pub const RESERVED_IDENTS: &[&str] = &["time", "dt", "initial_time", "final_time"];

pub fn is_reserved_ident(ident: &str) -> bool {
    RESERVED_IDENTS.contains(&ident)
}

/// Normalize a variable name for identity comparisons: trim surrounding
/// whitespace, strip one pair of enclosing double-quotes (only if both are
/// present), collapse each run of whitespace to a single underscore, and
/// lower-case the result.  canonicalize is idempotent.
pub fn canonicalize(name: &str) -> Ident {
    let mut name = name.trim();

    // strip enclosing double-quote pairs (all of them, so canonicalize
    // stays idempotent on already-quoted quoted names)
    loop {
        let bytes = name.as_bytes();
        if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
            name = &name[1..name.len() - 1];
        } else {
            break;
        }
    }

    lazy_static! {
        static ref UNDERSCORE_RE: Regex = Regex::new(r"(\\n|\\r|[\s\x{00A0}])+").unwrap();
    }

    let name = UNDERSCORE_RE.replace_all(name, "_");
    name.to_lowercase()
}

/// Topological sort of `runlist` given each entry's full dependency set.
/// Callers must have already rejected cycles.
pub fn topo_sort<'out>(
    runlist: Vec<&'out str>,
    dependencies: &'out HashMap<Ident, BTreeSet<Ident>>,
) -> Vec<&'out str> {
    use std::collections::HashSet;

    let runlist_len = runlist.len();
    let mut result: Vec<&'out str> = Vec::with_capacity(runlist_len);
    let mut used: HashSet<&str> = HashSet::new();

    // postorder traversal so dependencies land before their dependents
    fn add<'a>(
        dependencies: &'a HashMap<Ident, BTreeSet<Ident>>,
        result: &mut Vec<&'a str>,
        used: &mut HashSet<&'a str>,
        ident: &'a str,
    ) {
        if used.contains(ident) {
            return;
        }
        used.insert(ident);
        if let Some(deps) = dependencies.get(ident) {
            for dep in deps.iter() {
                if dependencies.contains_key(dep.as_str()) {
                    add(dependencies, result, used, dep)
                }
            }
        }
        result.push(ident);
    }

    for ident in runlist.into_iter() {
        add(dependencies, &mut result, &mut used, ident);
    }

    assert_eq!(runlist_len, result.len());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize() {
        assert_eq!("quoted", canonicalize("\"quoted\""));
        assert_eq!("a_b", canonicalize("   a b"));
        assert_eq!("a_b", canonicalize("a \n b"));
        assert_eq!("a_b", canonicalize("A\u{00A0}B"));
        assert_eq!("contact_rate", canonicalize("Contact Rate"));
        assert_eq!("x.y", canonicalize("X.y"));
        assert_eq!("\"half", canonicalize("\"half"));
        assert_eq!("", canonicalize("  "));
    }

    #[test]
    fn test_canonicalize_idempotent() {
        for s in &["\"A b\"", "  Foo\tBar ", "a.b.c", "ALL_CAPS", "x  y\nz"] {
            let once = canonicalize(s);
            assert_eq!(once, canonicalize(&once));
        }
    }

    #[test]
    fn test_reserved() {
        assert!(is_reserved_ident("time"));
        assert!(is_reserved_ident("dt"));
        assert!(!is_reserved_ident("timer"));
    }

    #[test]
    fn test_topo_sort() {
        let deps: HashMap<Ident, BTreeSet<Ident>> = [
            ("a", vec!["b", "c"]),
            ("b", vec!["c"]),
            ("c", vec![]),
        ]
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                v.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            )
        })
        .collect();

        let sorted = topo_sort(vec!["a", "b", "c"], &deps);
        assert_eq!(vec!["c", "b", "a"], sorted);
    }
}
