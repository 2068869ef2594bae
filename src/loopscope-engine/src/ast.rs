// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use crate::common::{ElementName, Ident};
use crate::datamodel::Dimension;

// equations are strings typed by humans for a single
// variable -- u16 is long enough
#[derive(PartialEq, Clone, Copy, Debug, Default)]
pub struct Loc {
    pub start: u16,
    pub end: u16,
}

impl Loc {
    pub fn new(start: usize, end: usize) -> Self {
        Loc {
            start: start as u16,
            end: end as u16,
        }
    }

    pub fn union(&self, rhs: &Self) -> Self {
        Loc {
            start: self.start.min(rhs.start),
            end: self.end.max(rhs.end),
        }
    }
}

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Exp,
    Mul,
    Div,
    Mod,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    And,
    Or,
}

impl BinaryOp {
    // higher precedence binds tighter: Mul.precedence() > Add.precedence()
    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Exp => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte => 3,
            BinaryOp::Eq | BinaryOp::Neq => 2,
            BinaryOp::And | BinaryOp::Or => 1,
        }
    }
}

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
}

/// An index inside `x[...]`: either a plain expression (a subscript
/// element, a dimension name, or a 1-based numeric position) or `*`.
#[derive(PartialEq, Clone, Debug)]
pub enum IndexExpr {
    Wildcard(Loc),
    Expr(Expr),
}

impl IndexExpr {
    pub fn get_loc(&self) -> Loc {
        match self {
            IndexExpr::Wildcard(loc) => *loc,
            IndexExpr::Expr(expr) => expr.get_loc(),
        }
    }
}

// Boxes keep the enum small; ASTs are walked and rewritten several times
// before lowering.
#[derive(PartialEq, Clone, Debug)]
pub enum Expr {
    Const(String, f64, Loc),
    Var(Ident, Loc),
    App(Ident, Vec<Expr>, Loc),
    Subscript(Ident, Vec<IndexExpr>, Loc),
    Op1(UnaryOp, Box<Expr>, Loc),
    Op2(BinaryOp, Box<Expr>, Box<Expr>, Loc),
    If(Box<Expr>, Box<Expr>, Box<Expr>, Loc),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Const("0.0".to_string(), 0.0, Loc::default())
    }
}

impl Expr {
    pub fn get_loc(&self) -> Loc {
        match self {
            Expr::Const(_, _, loc)
            | Expr::Var(_, loc)
            | Expr::App(_, _, loc)
            | Expr::Subscript(_, _, loc)
            | Expr::Op1(_, _, loc)
            | Expr::Op2(_, _, _, loc)
            | Expr::If(_, _, _, loc) => *loc,
        }
    }

    pub(crate) fn get_var_loc(&self, ident: &str) -> Option<Loc> {
        match self {
            Expr::Const(_s, _n, _loc) => None,
            Expr::Var(v, loc) if v == ident => Some(*loc),
            Expr::Var(_v, _loc) => None,
            Expr::App(_func, args, _loc) => {
                args.iter().find_map(|arg| arg.get_var_loc(ident))
            }
            Expr::Subscript(id, subscripts, loc) => {
                if id == ident {
                    let start = loc.start as usize;
                    return Some(Loc::new(start, start + id.len()));
                }
                subscripts.iter().find_map(|arg| match arg {
                    IndexExpr::Wildcard(_) => None,
                    IndexExpr::Expr(expr) => expr.get_var_loc(ident),
                })
            }
            Expr::Op1(_op, r, _loc) => r.get_var_loc(ident),
            Expr::Op2(_op, l, r, _loc) => l.get_var_loc(ident).or_else(|| r.get_var_loc(ident)),
            Expr::If(cond, t, f, _loc) => cond
                .get_var_loc(ident)
                .or_else(|| t.get_var_loc(ident))
                .or_else(|| f.get_var_loc(ident)),
        }
    }

    #[cfg(test)]
    pub(crate) fn strip_loc(self) -> Self {
        let loc = Loc::default();
        match self {
            Expr::Const(s, n, _loc) => Expr::Const(s, n, loc),
            Expr::Var(v, _loc) => Expr::Var(v, loc),
            Expr::App(func, args, _loc) => Expr::App(
                func,
                args.into_iter().map(|arg| arg.strip_loc()).collect(),
                loc,
            ),
            Expr::Subscript(id, subscripts, _) => {
                let subscripts = subscripts
                    .into_iter()
                    .map(|index| match index {
                        IndexExpr::Wildcard(_) => IndexExpr::Wildcard(loc),
                        IndexExpr::Expr(expr) => IndexExpr::Expr(expr.strip_loc()),
                    })
                    .collect();
                Expr::Subscript(id, subscripts, loc)
            }
            Expr::Op1(op, r, _loc) => Expr::Op1(op, Box::new(r.strip_loc()), loc),
            Expr::Op2(op, l, r, _loc) => {
                Expr::Op2(op, Box::new(l.strip_loc()), Box::new(r.strip_loc()), loc)
            }
            Expr::If(cond, t, f, _loc) => Expr::If(
                Box::new(cond.strip_loc()),
                Box::new(t.strip_loc()),
                Box::new(f.strip_loc()),
                loc,
            ),
        }
    }
}

/// A variable's parsed equation: either a single expression, one expression
/// evaluated across the cartesian product of dimensions, or an explicit
/// per-element map.  Dimensions are resolved (not just names) by this point.
#[derive(Clone, PartialEq, Debug)]
pub enum Ast {
    Scalar(Expr),
    ApplyToAll(Vec<Dimension>, Expr),
    Arrayed(Vec<Dimension>, HashMap<ElementName, Expr>),
}

impl Ast {
    pub(crate) fn get_var_loc(&self, ident: &str) -> Option<Loc> {
        match self {
            Ast::Scalar(expr) => expr.get_var_loc(ident),
            Ast::ApplyToAll(_, expr) => expr.get_var_loc(ident),
            Ast::Arrayed(_, subscripts) => {
                subscripts.values().find_map(|expr| expr.get_var_loc(ident))
            }
        }
    }
}

fn child_needs_parens(parent: &Expr, child: &Expr) -> bool {
    match parent {
        Expr::Const(_, _, _) | Expr::Var(_, _) => false,
        // children are comma separated, so no ambiguity possible
        Expr::App(_, _, _) | Expr::Subscript(_, _, _) => false,
        Expr::Op1(_, _, _) => matches!(child, Expr::Op2(_, _, _, _)),
        Expr::Op2(parent_op, _, _, _) => match child {
            Expr::Op2(child_op, _, _, _) => parent_op.precedence() > child_op.precedence(),
            _ => false,
        },
        Expr::If(_, _, _, _) => false,
    }
}

fn paren_if_necessary(parent: &Expr, child: &Expr, eqn: String) -> String {
    if child_needs_parens(parent, child) {
        format!("({})", eqn)
    } else {
        eqn
    }
}

pub fn print_eqn(expr: &Expr) -> String {
    match expr {
        Expr::Const(s, _, _) => s.clone(),
        Expr::Var(id, _) => id.clone(),
        Expr::App(func, args, _) => {
            let args: Vec<String> = args.iter().map(print_eqn).collect();
            format!("{}({})", func, args.join(", "))
        }
        Expr::Subscript(id, args, _) => {
            let args: Vec<String> = args
                .iter()
                .map(|arg| match arg {
                    IndexExpr::Wildcard(_) => "*".to_string(),
                    IndexExpr::Expr(expr) => print_eqn(expr),
                })
                .collect();
            format!("{}[{}]", id, args.join(", "))
        }
        Expr::Op1(op, l, _) => {
            let l = paren_if_necessary(expr, l, print_eqn(l));
            let op: &str = match op {
                UnaryOp::Positive => "+",
                UnaryOp::Negative => "-",
                UnaryOp::Not => "!",
            };
            format!("{}{}", op, l)
        }
        Expr::Op2(op, l, r, _) => {
            let l = paren_if_necessary(expr, l, print_eqn(l));
            let r = paren_if_necessary(expr, r, print_eqn(r));
            let op: &str = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Exp => "^",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                BinaryOp::Mod => "mod",
                BinaryOp::Gt => ">",
                BinaryOp::Lt => "<",
                BinaryOp::Gte => ">=",
                BinaryOp::Lte => "<=",
                BinaryOp::Eq => "=",
                BinaryOp::Neq => "<>",
                BinaryOp::And => "and",
                BinaryOp::Or => "or",
            };
            format!("({} {} {})", l, op, r)
        }
        Expr::If(cond, t, f, _) => {
            format!(
                "if ({}) then ({}) else ({})",
                print_eqn(cond),
                print_eqn(t),
                print_eqn(f)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_eqn() {
        assert_eq!(
            "(a + b)",
            print_eqn(&Expr::Op2(
                BinaryOp::Add,
                Box::new(Expr::Var("a".to_string(), Loc::new(0, 1))),
                Box::new(Expr::Var("b".to_string(), Loc::new(4, 5))),
                Loc::new(0, 5),
            ))
        );
        assert_eq!(
            "-a",
            print_eqn(&Expr::Op1(
                UnaryOp::Negative,
                Box::new(Expr::Var("a".to_string(), Loc::new(1, 2))),
                Loc::new(0, 2),
            ))
        );
        assert_eq!(
            "4.7",
            print_eqn(&Expr::Const("4.7".to_string(), 4.7, Loc::new(0, 3)))
        );
        assert_eq!(
            "lookup(a, 1.0)",
            print_eqn(&Expr::App(
                "lookup".to_string(),
                vec![
                    Expr::Var("a".to_string(), Loc::new(7, 8)),
                    Expr::Const("1.0".to_string(), 1.0, Loc::new(10, 13))
                ],
                Loc::new(0, 14),
            ))
        );
        assert_eq!(
            "x[*]",
            print_eqn(&Expr::Subscript(
                "x".to_string(),
                vec![IndexExpr::Wildcard(Loc::new(2, 3))],
                Loc::new(0, 4),
            ))
        );
    }

    #[test]
    fn test_print_parens_only_when_needed() {
        // 3 * (2 + 1) must keep its parens
        let eqn = print_eqn(&Expr::Op2(
            BinaryOp::Mul,
            Box::new(Expr::Const("3".to_string(), 3.0, Loc::default())),
            Box::new(Expr::Op2(
                BinaryOp::Add,
                Box::new(Expr::Const("2".to_string(), 2.0, Loc::default())),
                Box::new(Expr::Const("1".to_string(), 1.0, Loc::default())),
                Loc::default(),
            )),
            Loc::default(),
        ));
        assert_eq!("(3 * (2 + 1))", eqn);
    }

    #[test]
    fn test_get_var_loc() {
        let expr = Expr::Op2(
            BinaryOp::Mul,
            Box::new(Expr::Var("a".to_string(), Loc::new(0, 1))),
            Box::new(Expr::Var("b".to_string(), Loc::new(4, 5))),
            Loc::new(0, 5),
        );
        assert_eq!(Some(Loc::new(4, 5)), expr.get_var_loc("b"));
        assert_eq!(None, expr.get_var_loc("c"));
    }
}
