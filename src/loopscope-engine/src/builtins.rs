// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

/// Typed builtin applications, produced by the compiler from `App` AST
/// nodes.  `Lookup` carries an index into the compiled table list.
#[derive(PartialEq, Clone, Debug)]
pub enum BuiltinFn<Expr> {
    Lookup(usize, Box<Expr>),
    Abs(Box<Expr>),
    Arccos(Box<Expr>),
    Arcsin(Box<Expr>),
    Arctan(Box<Expr>),
    Cos(Box<Expr>),
    Exp(Box<Expr>),
    Inf,
    Int(Box<Expr>),
    Ln(Box<Expr>),
    Log10(Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Mean(Vec<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Pi,
    Pulse(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    Ramp(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    SafeDiv(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    Sin(Box<Expr>),
    Sqrt(Box<Expr>),
    Step(Box<Expr>, Box<Expr>),
    Tan(Box<Expr>),
    Time,
    TimeStep,
    StartTime,
    FinalTime,
}

pub fn is_0_arity_builtin_fn(name: &str) -> bool {
    matches!(
        name,
        "inf" | "pi" | "time" | "time_step" | "dt" | "initial_time" | "final_time"
    )
}

pub fn is_builtin_fn(name: &str) -> bool {
    matches!(
        name,
        "lookup"
            | "abs"
            | "arccos"
            | "arcsin"
            | "arctan"
            | "cos"
            | "exp"
            | "inf"
            | "int"
            | "ln"
            | "log10"
            | "max"
            | "mean"
            | "min"
            | "nonnegative"
            | "pi"
            | "previous"
            | "pulse"
            | "ramp"
            | "safediv"
            | "sin"
            | "sqrt"
            | "step"
            | "sum"
            | "tan"
            | "time"
            | "time_step"
            | "dt"
            | "initial_time"
            | "final_time"
    )
}

/// Stateful builtins that are rewritten into synthetic stocks and flows
/// before compilation (perfect-mixing analogues for conveyor and queue).
pub fn is_stateful_fn(name: &str) -> bool {
    matches!(
        name,
        "delay1" | "delay3" | "smth1" | "smth3" | "conveyor" | "queue"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_builtin_fn() {
        assert!(is_builtin_fn("lookup"));
        assert!(is_builtin_fn("max"));
        assert!(is_builtin_fn("nonnegative"));
        assert!(!is_builtin_fn("lookupz"));
        assert!(!is_builtin_fn("delay1"));
    }

    #[test]
    fn test_is_0_arity_builtin_fn() {
        assert!(!is_0_arity_builtin_fn("lookup"));
        assert!(is_0_arity_builtin_fn("time"));
        assert!(is_0_arity_builtin_fn("dt"));
    }

    #[test]
    fn test_is_stateful_fn() {
        assert!(is_stateful_fn("delay3"));
        assert!(is_stateful_fn("smth1"));
        assert!(is_stateful_fn("conveyor"));
        assert!(!is_stateful_fn("step"));
    }
}
