// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Turns per-step link scores plus discovered loops into the LTM report:
//! per-step loop scores, relative loop scores normalized within each
//! cycle partition, collapsed macro pathways, and per-link polarity
//! confidence.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::ast::{BinaryOp, UnaryOp};
use crate::common::{canonicalize, Ident};
use crate::compiler::{CompiledProject, Expr};
use crate::ltm::loops::{
    canonical_rotation, enumerate_loops, strongest_path_loops, structural_graph,
};
use crate::ltm::{LinkPolarity, LoopPolarity, LtmError};
use crate::results::Results;

#[derive(Clone, Debug)]
pub struct LtmOptions {
    /// above this many elementary circuits, discovery falls back to the
    /// strongest-path heuristic
    pub loop_ceiling: usize,
}

impl Default for LtmOptions {
    fn default() -> Self {
        LtmOptions { loop_ceiling: 1000 }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportLoop {
    pub id: String,
    /// public variables in loop order (macro internals collapsed away)
    pub path: Vec<Ident>,
    pub stocks: Vec<Ident>,
    pub flows: Vec<Ident>,
    pub polarity: LoopPolarity,
    pub partition: usize,
    /// signed loop score per saved step
    pub scores: Vec<f64>,
    /// loop score / Σ|loop scores in partition|, in [-1, 1]
    pub relative_scores: Vec<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportLink {
    pub from: Ident,
    pub to: Ident,
    pub scores: Vec<f64>,
    pub relative_scores: Vec<f64>,
    pub polarity: LinkPolarity,
    pub confidence: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportPath {
    pub idents: Vec<Ident>,
    pub scores: Vec<f64>,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct LtmReport {
    pub times: Vec<f64>,
    pub loops: Vec<ReportLoop>,
    pub links: Vec<ReportLink>,
    pub paths: Vec<ReportPath>,
    pub diagnostics: Vec<LtmError>,
    pub used_heuristic: bool,
}

struct UnionFind {
    parent: HashMap<usize, usize>,
}

impl UnionFind {
    fn new() -> Self {
        UnionFind {
            parent: HashMap::new(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let p = *self.parent.entry(x).or_insert(x);
        if p == x {
            return x;
        }
        let root = self.find(p);
        self.parent.insert(x, root);
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

/// structural polarity of one edge, when statically derivable
fn static_edge_polarity(cp: &CompiledProject, from: usize, to: usize) -> Option<f64> {
    if cp.is_stock_slot(to) {
        let su = cp.stocks.iter().find(|su| su.slot == to)?;
        if su.inflows.contains(&from) {
            return Some(1.0);
        }
        if su.outflows.contains(&from) {
            return Some(-1.0);
        }
        return None;
    }
    let v = cp.var_for_slot(to)?;
    analyze_expr_polarity(v.expr.as_ref()?, from)
}

fn expr_const(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Const(n) => Some(*n),
        Expr::Op1(UnaryOp::Negative, r) => expr_const(r).map(|n| -n),
        _ => None,
    }
}

fn contains_slot(expr: &Expr, x: usize) -> bool {
    use crate::builtins::BuiltinFn::*;
    match expr {
        Expr::Const(_) => false,
        Expr::Var(off) | Expr::Prev(off) => *off == x,
        Expr::Subscript(off, indices, sizes) => {
            let size: usize = sizes.iter().product();
            (*off..*off + size).contains(&x) || indices.iter().any(|i| contains_slot(i, x))
        }
        Expr::SumRange(off, len) => (*off..*off + *len).contains(&x),
        Expr::App(builtin) => match builtin {
            Lookup(_, a) | Abs(a) | Arccos(a) | Arcsin(a) | Arctan(a) | Cos(a) | Exp(a)
            | Int(a) | Ln(a) | Log10(a) | Sin(a) | Sqrt(a) | Tan(a) => contains_slot(a, x),
            Max(a, b) | Min(a, b) | Step(a, b) => contains_slot(a, x) || contains_slot(b, x),
            Mean(args) => args.iter().any(|a| contains_slot(a, x)),
            Pulse(a, b, c) | Ramp(a, b, c) | SafeDiv(a, b, c) => {
                contains_slot(a, x)
                    || contains_slot(b, x)
                    || c.as_ref().map(|c| contains_slot(c, x)).unwrap_or(false)
            }
            Inf | Pi | Time | TimeStep | StartTime | FinalTime => false,
        },
        Expr::Op1(_, r) => contains_slot(r, x),
        Expr::Op2(_, l, r) => contains_slot(l, x) || contains_slot(r, x),
        Expr::If(c, t, f) => {
            contains_slot(c, x) || contains_slot(t, x) || contains_slot(f, x)
        }
    }
}

/// Static polarity of `x`'s appearance in an expression, following
/// constant-sign propagation through +, -, *, / and unary negation.
/// Returns None when the sign can't be decided without running.
fn analyze_expr_polarity(expr: &Expr, x: usize) -> Option<f64> {
    match expr {
        Expr::Var(off) | Expr::Prev(off) => {
            if *off == x {
                Some(1.0)
            } else {
                None
            }
        }
        Expr::Subscript(off, _, sizes) => {
            let size: usize = sizes.iter().product();
            if (*off..*off + size).contains(&x) {
                Some(1.0)
            } else {
                None
            }
        }
        Expr::SumRange(off, len) => {
            if (*off..*off + *len).contains(&x) {
                Some(1.0)
            } else {
                None
            }
        }
        Expr::Op1(UnaryOp::Negative, r) => analyze_expr_polarity(r, x).map(|p| -p),
        Expr::Op1(_, _) => None,
        Expr::Op2(op, l, r) => {
            let lp = analyze_expr_polarity(l, x);
            let rp = analyze_expr_polarity(r, x);
            match op {
                BinaryOp::Add => match (lp, rp) {
                    (Some(a), Some(b)) if a == b => Some(a),
                    (Some(a), None) if !contains_slot(r, x) => Some(a),
                    (None, Some(b)) if !contains_slot(l, x) => Some(b),
                    _ => None,
                },
                BinaryOp::Sub => match (lp, rp) {
                    (Some(a), None) if !contains_slot(r, x) => Some(a),
                    (None, Some(b)) if !contains_slot(l, x) => Some(-b),
                    (Some(a), Some(b)) if a == -b => Some(a),
                    _ => None,
                },
                BinaryOp::Mul => {
                    if let (Some(a), None) = (lp, rp) {
                        expr_const(r).map(|c| if c >= 0.0 { a } else { -a })
                    } else if let (None, Some(b)) = (lp, rp) {
                        expr_const(l).map(|c| if c >= 0.0 { b } else { -b })
                    } else {
                        None
                    }
                }
                BinaryOp::Div => match (lp, rp) {
                    (Some(a), None) => match expr_const(r) {
                        Some(c) if c > 0.0 => Some(a),
                        Some(c) if c < 0.0 => Some(-a),
                        _ => None,
                    },
                    // x in the denominator flips polarity
                    (None, Some(b)) if !contains_slot(l, x) => Some(-b),
                    _ => None,
                },
                _ => None,
            }
        }
        Expr::If(_, t, f) => {
            let tp = analyze_expr_polarity(t, x);
            let fp = analyze_expr_polarity(f, x);
            match (tp, fp) {
                (Some(a), Some(b)) if a == b => Some(a),
                _ => None,
            }
        }
        _ => None,
    }
}

fn loop_edges(cycle: &[usize]) -> Vec<(usize, usize)> {
    (0..cycle.len())
        .map(|i| (cycle[i], cycle[(i + 1) % cycle.len()]))
        .collect()
}

fn is_public(cp: &CompiledProject, slot: usize) -> bool {
    cp.var_for_slot(slot)
        .map(|v| !v.is_synthetic)
        .unwrap_or(false)
}

/// sign consistency of a link over the run: |r - b| / (r + b), where r and
/// b accumulate the positive and negative score mass
fn polarity_confidence(series: &[f64]) -> (LinkPolarity, f64) {
    let r: f64 = series.iter().map(|s| s.max(0.0)).sum();
    let b: f64 = series.iter().map(|s| (-s).max(0.0)).sum();
    if r + b == 0.0 {
        return (LinkPolarity::Positive, 1.0);
    }
    let confidence = (r - b).abs() / (r + b);
    let polarity = if r > b {
        LinkPolarity::Positive
    } else if b > r {
        LinkPolarity::Negative
    } else {
        LinkPolarity::Mixed
    };
    (polarity, confidence)
}

pub fn analyze_ltm(results: &Results, cp: &CompiledProject, options: LtmOptions) -> LtmReport {
    let n_frames = results.step_count;
    let empty = Vec::new();
    let frames: Vec<&crate::ltm::LinkScoreFrame> = match &results.link_frames {
        Some(frames) => frames.iter().take(n_frames).collect(),
        None => (0..n_frames).map(|_| &empty).collect(),
    };

    let score_maps: Vec<HashMap<(usize, usize), f64>> = frames
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|ls| ((ls.from as usize, ls.to as usize), ls.score))
                .collect()
        })
        .collect();

    let graph = structural_graph(cp);

    // discovery: exhaustive for small graphs, strongest-path otherwise
    let mut used_heuristic = false;
    let mut discovered: Vec<Vec<usize>> = match enumerate_loops(&graph, options.loop_ceiling) {
        Some(loops) => loops,
        None => {
            used_heuristic = true;
            tracing::debug!(
                ceiling = options.loop_ceiling,
                "loop count over ceiling; using strongest-path discovery"
            );
            let mut seen: HashSet<Vec<usize>> = HashSet::new();
            let mut loops = Vec::new();
            for scores in score_maps.iter() {
                for cycle in strongest_path_loops(&graph, scores) {
                    let canonical = canonical_rotation(cycle);
                    if seen.insert(canonical.clone()) {
                        loops.push(canonical);
                    }
                }
            }
            loops
        }
    };

    let mut diagnostics: Vec<LtmError> = Vec::new();

    // explicitly registered loops are scored regardless of discovery
    let mut known: HashSet<Vec<usize>> = discovered
        .iter()
        .map(|c| canonical_rotation(c.clone()))
        .collect();
    let mut registered_ids: HashMap<Vec<usize>, String> = HashMap::new();
    for spec in results.registered_loops.iter() {
        let slots: Option<Vec<usize>> = spec
            .idents
            .iter()
            .map(|ident| cp.offsets.get(&canonicalize(ident)).copied())
            .collect();
        let Some(slots) = slots else {
            diagnostics.push(LtmError::LoopNotDiscovered {
                loop_spec: spec.idents.clone(),
            });
            continue;
        };
        let structural = !slots.is_empty()
            && slots.iter().any(|slot| graph.stocks.contains(slot))
            && loop_edges(&slots)
                .iter()
                .all(|(a, b)| graph.has_edge(*a, *b));
        if !structural {
            diagnostics.push(LtmError::LoopNotDiscovered {
                loop_spec: spec.idents.clone(),
            });
            continue;
        }
        let canonical = canonical_rotation(slots);
        if let Some(id) = &spec.id {
            registered_ids.insert(canonical.clone(), id.clone());
        }
        if known.insert(canonical.clone()) {
            discovered.push(canonical);
        }
    }

    // collapse macro internals: group full loops by their public
    // projection, dropping loops that never leave a macro
    let mut groups: BTreeMap<Vec<usize>, Vec<Vec<usize>>> = BTreeMap::new();
    for cycle in discovered.into_iter() {
        let public: Vec<usize> = cycle
            .iter()
            .copied()
            .filter(|slot| is_public(cp, *slot))
            .collect();
        if public.is_empty() {
            continue;
        }
        groups.entry(canonical_rotation(public)).or_default().push(cycle);
    }

    // per-frame loop scores: product of link scores around each member
    // pathway; a group reports its strongest member pathway each step
    let member_score = |cycle: &[usize], scores: &HashMap<(usize, usize), f64>| -> f64 {
        loop_edges(cycle)
            .iter()
            .map(|edge| scores.get(edge).copied().unwrap_or(0.0))
            .product()
    };

    let group_sigs: Vec<Vec<usize>> = groups.keys().cloned().collect();
    let group_scores: Vec<Vec<f64>> = group_sigs
        .iter()
        .map(|sig| {
            let members = &groups[sig];
            score_maps
                .iter()
                .map(|scores| {
                    members
                        .iter()
                        .map(|cycle| member_score(cycle, scores))
                        .max_by(|a, b| {
                            a.abs()
                                .partial_cmp(&b.abs())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    // cycle partitions: maximal sets of stocks mutually reachable via
    // feedback loops.  Two loops sharing any variable (a stock OR a flow,
    // as in bass diffusion's shared adoption flow) make their stocks
    // mutually reachable, so union every node along each member pathway.
    let mut uf = UnionFind::new();
    for sig in group_sigs.iter() {
        for cycle in groups[sig].iter() {
            for pair in cycle.windows(2) {
                uf.union(pair[0], pair[1]);
            }
            if cycle.len() == 1 {
                uf.union(cycle[0], cycle[0]);
            }
            // close the cycle: last node joins the first
            if let (Some(first), Some(last)) = (cycle.first(), cycle.last()) {
                uf.union(*first, *last);
            }
        }
    }
    let group_partition_root: Vec<usize> = group_sigs
        .iter()
        .map(|sig| uf.find(sig[0]))
        .collect();
    // densely renumber partitions in group order
    let mut partition_ids: HashMap<usize, usize> = HashMap::new();
    let group_partition: Vec<usize> = group_partition_root
        .iter()
        .map(|root| {
            let next = partition_ids.len();
            *partition_ids.entry(*root).or_insert(next)
        })
        .collect();

    // relative loop scores
    let mut group_relative: Vec<Vec<f64>> = vec![vec![0.0; score_maps.len()]; group_sigs.len()];
    for frame in 0..score_maps.len() {
        let mut denom: HashMap<usize, f64> = HashMap::new();
        for (g, scores) in group_scores.iter().enumerate() {
            *denom.entry(group_partition[g]).or_insert(0.0) += scores[frame].abs();
        }
        for (g, scores) in group_scores.iter().enumerate() {
            let d = denom[&group_partition[g]];
            group_relative[g][frame] = if d == 0.0 { 0.0 } else { scores[frame] / d };
        }
    }

    // polarity: runtime signs when the loop was ever active, static
    // analysis otherwise
    let polarity_of = |g: usize| -> LoopPolarity {
        let series = &group_scores[g];
        let max_pos = series.iter().copied().fold(0.0f64, |a, s| a.max(s));
        let max_neg = series.iter().copied().fold(0.0f64, |a, s| a.max(-s));
        if max_pos > 0.0 || max_neg > 0.0 {
            if max_pos > 0.0 && max_neg > 0.0 && max_neg > 0.1 * max_pos && max_pos > 0.1 * max_neg
            {
                return LoopPolarity::Mixed;
            }
            return if max_pos >= max_neg {
                LoopPolarity::Reinforcing
            } else {
                LoopPolarity::Balancing
            };
        }
        // never active: derive the sign structurally if we can
        let sig = &groups[&group_sigs[g]][0];
        let mut sign = 1.0;
        for (a, b) in loop_edges(sig) {
            match static_edge_polarity(cp, a, b) {
                Some(p) => sign *= p,
                None => return LoopPolarity::Mixed,
            }
        }
        if sign >= 0.0 {
            LoopPolarity::Reinforcing
        } else {
            LoopPolarity::Balancing
        }
    };

    // deterministic ids: groups ordered by signature, numbered per
    // polarity class
    let mut loops: Vec<ReportLoop> = Vec::new();
    let mut r_count = 0;
    let mut b_count = 0;
    let mut l_count = 0;
    for (g, sig) in group_sigs.iter().enumerate() {
        let polarity = polarity_of(g);
        let registered_id = groups[sig]
            .iter()
            .find_map(|cycle| registered_ids.get(&canonical_rotation(cycle.clone())));
        let id = match registered_id {
            Some(id) => id.clone(),
            None => match polarity {
                LoopPolarity::Reinforcing => {
                    r_count += 1;
                    format!("R{}", r_count)
                }
                LoopPolarity::Balancing => {
                    b_count += 1;
                    format!("B{}", b_count)
                }
                LoopPolarity::Mixed => {
                    l_count += 1;
                    format!("L{}", l_count)
                }
            },
        };

        let path: Vec<Ident> = sig.iter().map(|slot| cp.slot_names[*slot].clone()).collect();
        let stocks: Vec<Ident> = sig
            .iter()
            .filter(|slot| graph.stocks.contains(slot) && is_public(cp, **slot))
            .map(|slot| cp.slot_names[*slot].clone())
            .collect();
        let flows: Vec<Ident> = sig
            .iter()
            .filter(|slot| {
                is_public(cp, **slot)
                    && cp
                        .var_for_slot(**slot)
                        .map(|v| v.kind == crate::compiler::VarKind::Flow)
                        .unwrap_or(false)
            })
            .map(|slot| cp.slot_names[*slot].clone())
            .collect();

        loops.push(ReportLoop {
            id,
            path,
            stocks,
            flows,
            polarity,
            partition: group_partition[g],
            scores: group_scores[g].clone(),
            relative_scores: group_relative[g].clone(),
        });
    }

    // per-target denominators for relative link scores, over every active
    // incoming link (synthetic sources included)
    let mut incoming_abs: Vec<HashMap<usize, f64>> = Vec::with_capacity(frames.len());
    for frame in frames.iter() {
        let mut sums: HashMap<usize, f64> = HashMap::new();
        for ls in frame.iter() {
            *sums.entry(ls.to as usize).or_insert(0.0) += ls.score.abs();
        }
        incoming_abs.push(sums);
    }

    // exported links: every public→public structural edge, plus collapsed
    // macro segments that appear in reported loops
    let mut link_series: BTreeMap<(usize, usize), Vec<f64>> = BTreeMap::new();
    for (from, targets) in graph.edges.iter() {
        if !is_public(cp, *from) {
            continue;
        }
        for to in targets.iter() {
            if !is_public(cp, *to) {
                continue;
            }
            let series: Vec<f64> = score_maps
                .iter()
                .map(|scores| scores.get(&(*from, *to)).copied().unwrap_or(0.0))
                .collect();
            link_series.insert((*from, *to), series);
        }
    }
    for sig in group_sigs.iter() {
        let members = &groups[sig];
        for i in 0..sig.len() {
            let a = sig[i];
            let b = sig[(i + 1) % sig.len()];
            if link_series.contains_key(&(a, b)) {
                continue;
            }
            // the composite score for a macro pathway: the strongest
            // internal pathway between the macro's entry and exit
            let mut series = vec![0.0; score_maps.len()];
            for (frame, scores) in score_maps.iter().enumerate() {
                let mut best = 0.0f64;
                for member in members.iter() {
                    if let Some(product) = segment_product(member, a, b, scores) {
                        if product.abs() > best.abs() {
                            best = product;
                        }
                    }
                }
                series[frame] = best;
            }
            link_series.insert((a, b), series);
        }
    }

    let links: Vec<ReportLink> = link_series
        .into_iter()
        .map(|((from, to), series)| {
            let relative: Vec<f64> = series
                .iter()
                .enumerate()
                .map(|(frame, score)| {
                    let denom = incoming_abs[frame].get(&to).copied().unwrap_or(0.0);
                    if denom == 0.0 { 0.0 } else { score / denom }
                })
                .collect();
            let (polarity, confidence) = polarity_confidence(&series);
            ReportLink {
                from: cp.slot_names[from].clone(),
                to: cp.slot_names[to].clone(),
                scores: series,
                relative_scores: relative,
                polarity,
                confidence,
            }
        })
        .collect();

    // registered open paths
    let mut paths: Vec<ReportPath> = Vec::new();
    for spec in results.registered_paths.iter() {
        let slots: Option<Vec<usize>> = spec
            .idents
            .iter()
            .map(|ident| cp.offsets.get(&canonicalize(ident)).copied())
            .collect();
        let well_formed = match &slots {
            Some(slots) if slots.len() >= 2 => slots
                .windows(2)
                .all(|pair| graph.has_edge(pair[0], pair[1])),
            _ => false,
        };
        if !well_formed {
            diagnostics.push(LtmError::PathNotWellFormed {
                path: spec.idents.clone(),
            });
            continue;
        }
        let slots = slots.unwrap();
        let scores: Vec<f64> = score_maps
            .iter()
            .map(|scores| {
                slots
                    .windows(2)
                    .map(|pair| scores.get(&(pair[0], pair[1])).copied().unwrap_or(0.0))
                    .product()
            })
            .collect();
        paths.push(ReportPath {
            idents: spec.idents.clone(),
            scores,
        });
    }

    LtmReport {
        times: results.times(),
        loops,
        links,
        paths,
        diagnostics,
        used_heuristic,
    }
}

/// product of link scores along the member cycle from public node `a` to
/// public node `b` (exclusive of any other public nodes in between)
fn segment_product(
    cycle: &[usize],
    a: usize,
    b: usize,
    scores: &HashMap<(usize, usize), f64>,
) -> Option<f64> {
    let start = cycle.iter().position(|slot| *slot == a)?;
    let n = cycle.len();
    let mut product = 1.0;
    let mut i = start;
    loop {
        let from = cycle[i];
        let to = cycle[(i + 1) % n];
        product *= scores.get(&(from, to)).copied().unwrap_or(0.0);
        i = (i + 1) % n;
        if cycle[i] == b {
            return Some(product);
        }
        if i == start {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::ltm::LoopSpec;
    use crate::model::testutils::*;
    use crate::project::Project;
    use crate::vm::{run, RunOptions};

    fn analyze(
        project: crate::datamodel::Project,
        run_options: RunOptions,
    ) -> LtmReport {
        let project = Project::from(project);
        let cp = compile(&project).unwrap();
        let results = run(&cp, run_options);
        analyze_ltm(&results, &cp, LtmOptions::default())
    }

    fn ltm_options() -> RunOptions {
        RunOptions {
            enable_ltm: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_isolated_loop_identity() {
        // a single active loop has |relative score| = 1 whenever anything
        // is changing (after the step-1 flow-to-stock boundary)
        let report = analyze(
            x_project(vec![x_model(
                "main",
                vec![
                    x_stock("pop", "100", &["births"], &[]),
                    x_flow("births", "pop * 0.05"),
                ],
            )]),
            ltm_options(),
        );

        assert_eq!(1, report.loops.len());
        let l = &report.loops[0];
        assert_eq!(LoopPolarity::Reinforcing, l.polarity);
        assert_eq!("R1", l.id);
        for (i, rel) in l.relative_scores.iter().enumerate() {
            if i < 2 {
                continue;
            }
            assert!((rel.abs() - 1.0).abs() < 1e-9, "t={}: {}", i, rel);
        }
    }

    #[test]
    fn test_equilibrium_loops_listed_with_zero_scores() {
        let report = analyze(
            x_project(vec![x_model(
                "main",
                vec![
                    x_stock("pop", "100", &["births"], &["deaths"]),
                    x_flow("births", "pop / 20"),
                    x_flow("deaths", "pop / 20"),
                ],
            )]),
            ltm_options(),
        );

        assert_eq!(2, report.loops.len());
        for l in report.loops.iter() {
            assert!(l.scores.iter().all(|s| *s == 0.0));
            assert!(l.relative_scores.iter().all(|s| *s == 0.0));
        }
        // polarity still falls out of the equations
        let polarities: HashSet<LoopPolarity> =
            report.loops.iter().map(|l| l.polarity).collect();
        assert!(polarities.contains(&LoopPolarity::Reinforcing));
        assert!(polarities.contains(&LoopPolarity::Balancing));
    }

    #[test]
    fn test_partition_sum_identity() {
        // in every partition, |relative scores| sum to 0 or 1
        let report = analyze(
            x_project(vec![x_model(
                "main",
                vec![
                    x_stock("potential_adopters", "999999", &[], &["adopting"]),
                    x_stock("adopters", "1", &["adopting"], &[]),
                    x_flow(
                        "adopting",
                        "potential_adopters * (0.015 * 100 * adopters / 1000000)",
                    ),
                ],
            )]),
            ltm_options(),
        );

        assert_eq!(2, report.loops.len());
        let n = report.times.len();
        for frame in 0..n {
            let mut sums: HashMap<usize, f64> = HashMap::new();
            for l in report.loops.iter() {
                *sums.entry(l.partition).or_insert(0.0) += l.relative_scores[frame].abs();
            }
            for (_, sum) in sums {
                assert!(
                    sum.abs() < 1e-9 || (sum - 1.0).abs() < 1e-9,
                    "frame {}: partition sum {}",
                    frame,
                    sum
                );
            }
        }
    }

    #[test]
    fn test_registered_loop_scored() {
        let mut options = ltm_options();
        options.registered_loops = vec![LoopSpec {
            id: Some("MYLOOP".to_string()),
            idents: vec!["pop".to_string(), "births".to_string()],
        }];
        let report = analyze(
            x_project(vec![x_model(
                "main",
                vec![
                    x_stock("pop", "100", &["births"], &[]),
                    x_flow("births", "pop * 0.05"),
                ],
            )]),
            options,
        );

        assert!(report.diagnostics.is_empty());
        assert_eq!(1, report.loops.len());
        assert_eq!("MYLOOP", report.loops[0].id);
    }

    #[test]
    fn test_unknown_registered_loop_diagnosed() {
        let mut options = ltm_options();
        options.registered_loops = vec![LoopSpec {
            id: None,
            idents: vec!["pop".to_string(), "nothing".to_string()],
        }];
        let report = analyze(
            x_project(vec![x_model(
                "main",
                vec![
                    x_stock("pop", "100", &["births"], &[]),
                    x_flow("births", "pop * 0.05"),
                ],
            )]),
            options,
        );
        assert_eq!(1, report.diagnostics.len());
        assert!(matches!(
            report.diagnostics[0],
            LtmError::LoopNotDiscovered { .. }
        ));
    }

    #[test]
    fn test_macro_internal_loops_suppressed() {
        // the smooth's internal stock forms a loop that never leaves the
        // macro; it must not appear in the public loop list
        let mut project = x_project(vec![x_model(
            "main",
            vec![
                x_aux("input", "step(1, 2)"),
                x_aux("smoothed", "smth1(input, 4)"),
            ],
        )]);
        project.sim_specs.stop = 10.0;
        let report = analyze(project, ltm_options());
        assert!(report.loops.is_empty());
    }

    #[test]
    fn test_link_polarity_confidence() {
        let report = analyze(
            x_project(vec![x_model(
                "main",
                vec![
                    x_stock("pop", "100", &["births"], &[]),
                    x_flow("births", "pop * 0.05"),
                ],
            )]),
            ltm_options(),
        );

        let link = report
            .links
            .iter()
            .find(|l| l.from == "pop" && l.to == "births")
            .unwrap();
        assert_eq!(LinkPolarity::Positive, link.polarity);
        assert!((link.confidence - 1.0).abs() < 1e-12);
    }
}
