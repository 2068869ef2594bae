// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Rewrites stateful builtin applications (DELAY1/DELAY3, SMTH1/SMTH3, and
//! the perfect-mixing CONVEYOR/QUEUE analogues) into synthetic stocks and
//! flows in the owning model.  The synthetic variables carry a `$` prefix,
//! which no user-typed identifier can produce, and are treated as
//! macro-internal by the LTM aggregator.

use std::collections::HashMap;

use crate::ast::{Ast, BinaryOp, Expr, Loc};
use crate::builtins::is_stateful_fn;
use crate::common::{EquationError, EquationResult, ErrorCode, Ident};
use crate::eqn_err;

/// A compiler-generated variable.  These never round-trip through the
/// datamodel: their equations are ASTs built directly here.
#[derive(Clone, PartialEq, Debug)]
pub enum SyntheticVar {
    Stock {
        ident: Ident,
        init: Expr,
        inflows: Vec<Ident>,
        outflows: Vec<Ident>,
    },
    Flow {
        ident: Ident,
        ast: Expr,
    },
}

impl SyntheticVar {
    pub fn ident(&self) -> &str {
        match self {
            SyntheticVar::Stock { ident, .. } | SyntheticVar::Flow { ident, .. } => ident,
        }
    }
}

pub fn is_synthetic_ident(ident: &str) -> bool {
    ident.contains('$')
}

struct MacroExpander<'a> {
    variable_name: &'a str,
    vars: Vec<SyntheticVar>,
    n: usize,
}

impl<'a> MacroExpander<'a> {
    fn new(variable_name: &'a str) -> Self {
        Self {
            variable_name,
            vars: Vec::new(),
            n: 0,
        }
    }

    fn walk(&mut self, expr: Expr) -> EquationResult<Expr> {
        use std::mem;
        let result: Expr = match expr {
            Expr::Const(_, _, _) => expr,
            Expr::Var(_, _) => expr,
            Expr::App(func, args, loc) => {
                let args: EquationResult<Vec<Expr>> =
                    args.into_iter().map(|e| self.walk(e)).collect();
                let args = args?;
                if is_stateful_fn(&func) {
                    self.expand(&func, args, loc)?
                } else {
                    Expr::App(func, args, loc)
                }
            }
            Expr::Subscript(id, args, loc) => Expr::Subscript(id, args, loc),
            Expr::Op1(op, mut r, loc) => {
                *r = self.walk(mem::take(&mut *r))?;
                Expr::Op1(op, r, loc)
            }
            Expr::Op2(op, mut l, mut r, loc) => {
                *l = self.walk(mem::take(&mut *l))?;
                *r = self.walk(mem::take(&mut *r))?;
                Expr::Op2(op, l, r, loc)
            }
            Expr::If(mut cond, mut t, mut f, loc) => {
                *cond = self.walk(mem::take(&mut *cond))?;
                *t = self.walk(mem::take(&mut *t))?;
                *f = self.walk(mem::take(&mut *f))?;
                Expr::If(cond, t, f, loc)
            }
        };

        Ok(result)
    }

    fn expand(&mut self, func: &str, mut args: Vec<Expr>, loc: Loc) -> EquationResult<Expr> {
        if args.len() < 2 || args.len() > 3 {
            return eqn_err!(ArityMismatch, loc.start, loc.end);
        }
        let init = if args.len() == 3 { args.pop() } else { None };
        let tau = args.pop().unwrap();
        let input = args.pop().unwrap();
        // the default initial input is the input expression evaluated at t0
        let init = init.unwrap_or_else(|| input.clone());

        let base = format!("${}·{}·{}", self.variable_name, self.n, func);
        self.n += 1;

        let result = match func {
            "delay1" | "conveyor" | "queue" => self.delay1(&base, input, tau, init, loc),
            "delay3" => self.delay3(&base, input, tau, init, loc),
            "smth1" => self.smth1(&base, input, tau, init, loc),
            "smth3" => self.smth3(&base, input, tau, init, loc),
            _ => unreachable!("unhandled stateful builtin {}", func),
        };
        Ok(result)
    }

    /// S(0) = init·τ, dS/dt = in − S/τ, result S/τ
    fn delay1(&mut self, base: &str, input: Expr, tau: Expr, init: Expr, loc: Loc) -> Expr {
        let stock = format!("{}·s", base);
        let in_flow = format!("{}·in", base);
        let out_flow = format!("{}·out", base);

        self.vars.push(SyntheticVar::Flow {
            ident: in_flow.clone(),
            ast: input,
        });
        self.vars.push(SyntheticVar::Flow {
            ident: out_flow.clone(),
            ast: Expr::Op2(
                BinaryOp::Div,
                Box::new(Expr::Var(stock.clone(), loc)),
                Box::new(tau.clone()),
                loc,
            ),
        });
        self.vars.push(SyntheticVar::Stock {
            ident: stock,
            init: Expr::Op2(BinaryOp::Mul, Box::new(init), Box::new(tau), loc),
            inflows: vec![in_flow],
            outflows: vec![out_flow.clone()],
        });

        Expr::Var(out_flow, loc)
    }

    /// three first-order delays cascaded, each with τ/3
    fn delay3(&mut self, base: &str, input: Expr, tau: Expr, init: Expr, loc: Loc) -> Expr {
        let tau3 = |tau: &Expr| {
            Expr::Op2(
                BinaryOp::Div,
                Box::new(tau.clone()),
                Box::new(Expr::Const("3".to_string(), 3.0, loc)),
                loc,
            )
        };

        let mut upstream = input;
        for stage in 1..=3 {
            let stock = format!("{}·s{}", base, stage);
            let in_flow = format!("{}·in{}", base, stage);
            let out_flow = format!("{}·out{}", base, stage);

            self.vars.push(SyntheticVar::Flow {
                ident: in_flow.clone(),
                ast: upstream,
            });
            self.vars.push(SyntheticVar::Flow {
                ident: out_flow.clone(),
                ast: Expr::Op2(
                    BinaryOp::Div,
                    Box::new(Expr::Var(stock.clone(), loc)),
                    Box::new(tau3(&tau)),
                    loc,
                ),
            });
            self.vars.push(SyntheticVar::Stock {
                ident: stock,
                init: Expr::Op2(
                    BinaryOp::Mul,
                    Box::new(init.clone()),
                    Box::new(tau3(&tau)),
                    loc,
                ),
                inflows: vec![in_flow],
                outflows: vec![out_flow.clone()],
            });

            upstream = Expr::Var(out_flow, loc);
        }

        upstream
    }

    /// S(0) = init, dS/dt = (in − S)/τ, result S
    fn smth1(&mut self, base: &str, input: Expr, tau: Expr, init: Expr, loc: Loc) -> Expr {
        let (stock, _) = self.smth1_stage(base, "", input, tau, init, loc);
        Expr::Var(stock, loc)
    }

    fn smth3(&mut self, base: &str, input: Expr, tau: Expr, init: Expr, loc: Loc) -> Expr {
        let tau3 = Expr::Op2(
            BinaryOp::Div,
            Box::new(tau),
            Box::new(Expr::Const("3".to_string(), 3.0, loc)),
            loc,
        );

        let mut upstream = input;
        for stage in 1..=3 {
            let suffix = format!("·{}", stage);
            let (stock, _) =
                self.smth1_stage(base, &suffix, upstream, tau3.clone(), init.clone(), loc);
            upstream = Expr::Var(stock, loc);
        }

        upstream
    }

    fn smth1_stage(
        &mut self,
        base: &str,
        suffix: &str,
        input: Expr,
        tau: Expr,
        init: Expr,
        loc: Loc,
    ) -> (Ident, Ident) {
        let stock = format!("{}{}·s", base, suffix);
        let net_flow = format!("{}{}·net", base, suffix);

        self.vars.push(SyntheticVar::Flow {
            ident: net_flow.clone(),
            ast: Expr::Op2(
                BinaryOp::Div,
                Box::new(Expr::Op2(
                    BinaryOp::Sub,
                    Box::new(input),
                    Box::new(Expr::Var(stock.clone(), loc)),
                    loc,
                )),
                Box::new(tau),
                loc,
            ),
        });
        self.vars.push(SyntheticVar::Stock {
            ident: stock.clone(),
            init,
            inflows: vec![net_flow.clone()],
            outflows: vec![],
        });

        (stock, net_flow)
    }
}

/// Rewrite every stateful builtin application in `ast`, returning the new
/// AST and the synthetic variables to splice into the model.  Stateful
/// builtins inside arrayed equations are rejected: each element would need
/// its own synthetic state, which this engine does not allocate.
pub fn expand_stateful_builtins(
    variable_name: &str,
    ast: Ast,
) -> EquationResult<(Ast, Vec<SyntheticVar>)> {
    let mut expander = MacroExpander::new(variable_name);
    let ast = match ast {
        Ast::Scalar(expr) => Ast::Scalar(expander.walk(expr)?),
        Ast::ApplyToAll(dims, expr) => {
            if contains_stateful(&expr) {
                return Err(EquationError {
                    start: 0,
                    end: 0,
                    code: ErrorCode::TypeMismatch,
                });
            }
            Ast::ApplyToAll(dims, expr)
        }
        Ast::Arrayed(dims, elements) => {
            if elements.values().any(contains_stateful) {
                return Err(EquationError {
                    start: 0,
                    end: 0,
                    code: ErrorCode::TypeMismatch,
                });
            }
            let elements: HashMap<_, _> = elements.into_iter().collect();
            Ast::Arrayed(dims, elements)
        }
    };
    Ok((ast, expander.vars))
}

fn contains_stateful(expr: &Expr) -> bool {
    match expr {
        Expr::Const(_, _, _) | Expr::Var(_, _) => false,
        Expr::App(func, args, _) => {
            is_stateful_fn(func) || args.iter().any(contains_stateful)
        }
        Expr::Subscript(_, _, _) => false,
        Expr::Op1(_, r, _) => contains_stateful(r),
        Expr::Op2(_, l, r, _) => contains_stateful(l) || contains_stateful(r),
        Expr::If(cond, t, f, _) => {
            contains_stateful(cond) || contains_stateful(t) || contains_stateful(f)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn expand(var: &str, eqn: &str) -> (Ast, Vec<SyntheticVar>) {
        let expr = parse(eqn).unwrap().unwrap();
        expand_stateful_builtins(var, Ast::Scalar(expr)).unwrap()
    }

    #[test]
    fn test_delay1_expansion() {
        let (ast, vars) = expand("y", "DELAY1(inflow, 6)");

        // one stock, two flows
        assert_eq!(3, vars.len());
        let stocks: Vec<_> = vars
            .iter()
            .filter(|v| matches!(v, SyntheticVar::Stock { .. }))
            .collect();
        assert_eq!(1, stocks.len());
        assert_eq!("$y·0·delay1·s", stocks[0].ident());

        // the variable now reads the outflow
        if let Ast::Scalar(Expr::Var(id, _)) = ast {
            assert_eq!("$y·0·delay1·out", id);
        } else {
            panic!("expected var replacement");
        }
    }

    #[test]
    fn test_delay3_expansion() {
        let (ast, vars) = expand("y", "DELAY3(STEP(1, 2), 6)");

        let stocks = vars
            .iter()
            .filter(|v| matches!(v, SyntheticVar::Stock { .. }))
            .count();
        assert_eq!(3, stocks);
        assert_eq!(9, vars.len());

        if let Ast::Scalar(Expr::Var(id, _)) = ast {
            assert_eq!("$y·0·delay3·out3", id);
        } else {
            panic!("expected var replacement");
        }
    }

    #[test]
    fn test_smth1_expansion() {
        let (ast, vars) = expand("y", "SMTH1(input, 4, 0)");

        assert_eq!(2, vars.len());
        // smoothing reports the stock itself
        if let Ast::Scalar(Expr::Var(id, _)) = ast {
            assert_eq!("$y·0·smth1·s", id);
        } else {
            panic!("expected var replacement");
        }

        // explicit initial value is used directly
        let stock = vars
            .iter()
            .find(|v| matches!(v, SyntheticVar::Stock { .. }))
            .unwrap();
        if let SyntheticVar::Stock { init, .. } = stock {
            assert!(matches!(init, Expr::Const(_, n, _) if *n == 0.0));
        }
    }

    #[test]
    fn test_nested_and_multiple() {
        let (_ast, vars) = expand("y", "SMTH1(x, 2) + DELAY1(x, 3)");
        let stocks = vars
            .iter()
            .filter(|v| matches!(v, SyntheticVar::Stock { .. }))
            .count();
        assert_eq!(2, stocks);
    }

    #[test]
    fn test_arity_checked() {
        let expr = parse("DELAY1(x)").unwrap().unwrap();
        let err = expand_stateful_builtins("y", Ast::Scalar(expr)).unwrap_err();
        assert_eq!(ErrorCode::ArityMismatch, err.code);
    }

    #[test]
    fn test_arrayed_rejected() {
        let expr = parse("SMTH1(x, 2)").unwrap().unwrap();
        let dims = vec![crate::datamodel::Dimension {
            name: "dim".to_string(),
            elements: vec!["a".to_string()],
        }];
        let err = expand_stateful_builtins("y", Ast::ApplyToAll(dims, expr)).unwrap_err();
        assert_eq!(ErrorCode::TypeMismatch, err.code);
    }

    #[test]
    fn test_synthetic_ident() {
        assert!(is_synthetic_ident("$y·0·delay1·s"));
        assert!(is_synthetic_ident("mod.$y·0·smth1·s"));
        assert!(!is_synthetic_ident("population"));
    }
}
