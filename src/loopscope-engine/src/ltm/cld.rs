// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Threshold-based projection of an LTM report down to a simplified
//! causal-loop diagram: keep the variables whose incoming links move the
//! most, keep the loops that matter, and collapse everything in between
//! into composite links with polarity confidence.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::common::Ident;
use crate::ltm::{LinkPolarity, LtmReport, ReportLoop};

#[derive(Clone, Debug)]
pub struct SimplifyOptions {
    /// keep a variable iff an incoming link's relative-score variance
    /// reaches this
    pub link_inclusion_threshold: f64,
    /// keep a loop iff its mean |relative score| over its active range
    /// reaches this
    pub loop_inclusion_threshold: f64,
    /// when a loop is kept, also keep its flows (stocks always stay)
    pub include_loop_flows: bool,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        SimplifyOptions {
            link_inclusion_threshold: 0.1,
            loop_inclusion_threshold: 0.1,
            include_loop_flows: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CldLink {
    pub from: Ident,
    pub to: Ident,
    /// the collapsed intermediate variables, from the strongest loop this
    /// link belongs to
    pub via: Vec<Ident>,
    pub polarity: LinkPolarity,
    pub confidence: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CldLoop {
    pub id: String,
    pub member_ids: Vec<String>,
    /// Σ of the member loops' relative scores, per saved step
    pub composite_relative_scores: Vec<f64>,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct SimplifiedCld {
    pub variables: Vec<Ident>,
    pub links: Vec<CldLink>,
    pub loops: Vec<CldLoop>,
}

/// max_t |rel| - min_t |rel|
fn relative_variance(series: &[f64]) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for s in series {
        let a = s.abs();
        min = min.min(a);
        max = max.max(a);
    }
    if max.is_finite() { max - min } else { 0.0 }
}

/// mean |relative score| starting at the loop's first active step
fn active_mean(l: &ReportLoop) -> f64 {
    let Some(first) = l.scores.iter().position(|s| *s != 0.0) else {
        return 0.0;
    };
    let active = &l.relative_scores[first..];
    if active.is_empty() {
        return 0.0;
    }
    active.iter().map(|s| s.abs()).sum::<f64>() / active.len() as f64
}

fn rotate_to_min(mut idents: Vec<Ident>) -> Vec<Ident> {
    if idents.is_empty() {
        return idents;
    }
    let min_pos = idents
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap();
    idents.rotate_left(min_pos);
    idents
}

pub fn project_simplified_cld(report: &LtmReport, options: SimplifyOptions) -> SimplifiedCld {
    let n_frames = report.times.len();

    let link_series: HashMap<(&str, &str), &Vec<f64>> = report
        .links
        .iter()
        .map(|l| ((l.from.as_str(), l.to.as_str()), &l.scores))
        .collect();

    // variables that pass the link-variance threshold
    let mut kept: BTreeSet<Ident> = BTreeSet::new();
    for link in report.links.iter() {
        if relative_variance(&link.relative_scores) >= options.link_inclusion_threshold {
            kept.insert(link.to.clone());
        }
    }

    // loops that pass the loop threshold, strongest first
    let mut kept_loops: Vec<&ReportLoop> = report
        .loops
        .iter()
        .filter(|l| active_mean(l) >= options.loop_inclusion_threshold)
        .collect();
    kept_loops.sort_by(|a, b| {
        active_mean(b)
            .partial_cmp(&active_mean(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for l in kept_loops.iter() {
        for stock in l.stocks.iter() {
            kept.insert(stock.clone());
        }
        if options.include_loop_flows {
            for flow in l.flows.iter() {
                kept.insert(flow.clone());
            }
        }
    }

    // simplified links: walk each kept loop's pathway, collapsing dropped
    // variables; the strongest loop a pair belongs to provides its `via`,
    // every loop's pathway contributes to polarity confidence
    struct Pathway {
        rank: usize,
        via: Vec<Ident>,
        series: Vec<f64>,
    }
    let mut pair_paths: BTreeMap<(Ident, Ident), Vec<Pathway>> = BTreeMap::new();

    for (rank, l) in kept_loops.iter().enumerate() {
        let path = &l.path;
        let n = path.len();
        let kept_positions: Vec<usize> = (0..n).filter(|i| kept.contains(&path[*i])).collect();
        // one kept variable still yields a (self) link around the loop
        if kept_positions.is_empty() {
            continue;
        }
        for (ki, &start) in kept_positions.iter().enumerate() {
            let end = kept_positions[(ki + 1) % kept_positions.len()];
            // the underlying segment from `start` around to `end`
            let mut segment = vec![start];
            let mut i = start;
            loop {
                i = (i + 1) % n;
                segment.push(i);
                if i == end {
                    break;
                }
            }
            let via: Vec<Ident> = segment[1..segment.len() - 1]
                .iter()
                .map(|i| path[*i].clone())
                .collect();
            let series: Vec<f64> = (0..n_frames)
                .map(|frame| {
                    segment
                        .windows(2)
                        .map(|pair| {
                            let from = path[pair[0]].as_str();
                            let to = path[pair[1]].as_str();
                            link_series
                                .get(&(from, to))
                                .map(|s| s[frame])
                                .unwrap_or(0.0)
                        })
                        .product()
                })
                .collect();
            pair_paths
                .entry((path[start].clone(), path[end].clone()))
                .or_default()
                .push(Pathway { rank, via, series });
        }
    }

    let links: Vec<CldLink> = pair_paths
        .into_iter()
        .map(|((from, to), mut pathways)| {
            pathways.sort_by_key(|p| p.rank);
            let via = pathways[0].via.clone();

            // r and b take the strongest pathway per step
            let mut r = 0.0;
            let mut b = 0.0;
            for frame in 0..n_frames {
                let pos = pathways
                    .iter()
                    .map(|p| p.series[frame].max(0.0))
                    .fold(0.0f64, f64::max);
                let neg = pathways
                    .iter()
                    .map(|p| (-p.series[frame]).max(0.0))
                    .fold(0.0f64, f64::max);
                r += pos;
                b += neg;
            }
            let confidence = if r + b == 0.0 {
                1.0
            } else {
                (r - b).abs() / (r + b)
            };
            let polarity = if confidence < 0.99 {
                LinkPolarity::Mixed
            } else if r >= b {
                LinkPolarity::Positive
            } else {
                LinkPolarity::Negative
            };

            CldLink {
                from,
                to,
                via,
                polarity,
                confidence,
            }
        })
        .collect();

    // simplified loops: kept loops projected onto the kept variables;
    // loops that project to the same signature merge, and their relative
    // scores add
    let mut merged: BTreeMap<Vec<Ident>, Vec<&ReportLoop>> = BTreeMap::new();
    for l in kept_loops.iter() {
        let projected: Vec<Ident> = l
            .path
            .iter()
            .filter(|ident| kept.contains(*ident))
            .cloned()
            .collect();
        if projected.is_empty() {
            continue;
        }
        merged.entry(rotate_to_min(projected)).or_default().push(l);
    }

    let loops: Vec<CldLoop> = merged
        .into_iter()
        .enumerate()
        .map(|(i, (_sig, members))| {
            let mut composite = vec![0.0; n_frames];
            for member in members.iter() {
                for (frame, rel) in member.relative_scores.iter().enumerate() {
                    composite[frame] += rel;
                }
            }
            CldLoop {
                id: format!("S{}", i + 1),
                member_ids: members.iter().map(|m| m.id.clone()).collect(),
                composite_relative_scores: composite,
            }
        })
        .collect();

    SimplifiedCld {
        variables: kept.into_iter().collect(),
        links,
        loops,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::ltm::{analyze_ltm, LtmOptions};
    use crate::model::testutils::*;
    use crate::project::Project;
    use crate::vm::{run, RunOptions};

    fn bass_report() -> LtmReport {
        let mut project = x_project(vec![x_model(
            "main",
            vec![
                x_stock("potential_adopters", "999999", &[], &["adopting"]),
                x_stock("adopters", "1", &["adopting"], &[]),
                x_flow(
                    "adopting",
                    "potential_adopters * (0.015 * 100 * adopters / 1000000)",
                ),
            ],
        )]);
        project.sim_specs.stop = 15.0;
        project.sim_specs.dt = crate::datamodel::Dt::Dt(0.125);
        let project = Project::from(project);
        let cp = compile(&project).unwrap();
        let results = run(
            &cp,
            RunOptions {
                enable_ltm: true,
                ..Default::default()
            },
        );
        analyze_ltm(&results, &cp, LtmOptions::default())
    }

    #[test]
    fn test_loops_survive_projection() {
        let cld = project_simplified_cld(&bass_report(), SimplifyOptions::default());

        // both the reinforcing and balancing loops matter in bass
        // diffusion, and all three variables stay
        assert_eq!(2, cld.loops.len());
        assert!(cld.variables.contains(&"adopters".to_string()));
        assert!(cld.variables.contains(&"potential_adopters".to_string()));
        assert!(cld.variables.contains(&"adopting".to_string()));
        assert!(!cld.links.is_empty());
    }

    #[test]
    fn test_everything_dropped_at_max_threshold() {
        let cld = project_simplified_cld(
            &bass_report(),
            SimplifyOptions {
                link_inclusion_threshold: 10.0,
                loop_inclusion_threshold: 1.1,
                include_loop_flows: true,
            },
        );
        assert!(cld.variables.is_empty());
        assert!(cld.links.is_empty());
        assert!(cld.loops.is_empty());
    }

    #[test]
    fn test_dropping_flows_collapses_links() {
        let cld = project_simplified_cld(
            &bass_report(),
            SimplifyOptions {
                // high link threshold so only loop membership keeps vars
                link_inclusion_threshold: 10.0,
                loop_inclusion_threshold: 0.01,
                include_loop_flows: false,
            },
        );

        // only the stocks remain; the flow is collapsed into the links
        assert_eq!(
            vec!["adopters".to_string(), "potential_adopters".to_string()],
            cld.variables
        );
        assert!(cld
            .links
            .iter()
            .all(|l| l.via.contains(&"adopting".to_string())));
    }

    #[test]
    fn test_polarity_confidence_annotation() {
        let cld = project_simplified_cld(&bass_report(), SimplifyOptions::default());
        for link in cld.links.iter() {
            if link.confidence < 0.99 {
                assert_eq!(LinkPolarity::Mixed, link.polarity);
            }
        }
    }
}
