// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Per-step link-score computation.
//!
//! For a non-stock `z = f(x1, …, xk)` the score of `xi → z` comes from a
//! ceteris-paribus re-evaluation of `f` with `xi` at its current value and
//! every other input held at its previous value.  Flow-to-stock scores use
//! the aggregation-invariant second-difference form, which needs one extra
//! retained frame and is zero on the first step by definition.

use crate::compiler::CompiledProject;
use crate::ltm::{LinkScore, LinkScoreFrame};
use crate::vm::{eval, EvalCtx};

pub(crate) fn link_scores_for_step(
    cp: &CompiledProject,
    prev_prev: &[f64],
    prev: &[f64],
    curr: &[f64],
    first_step: bool,
) -> LinkScoreFrame {
    let mut frame = LinkScoreFrame::new();

    for v in cp.vars.iter() {
        if v.is_stock() {
            continue;
        }
        let Some(expr) = &v.expr else {
            continue;
        };
        let z = v.slot;
        let dz = curr[z] - prev[z];
        if dz == 0.0 || dz.is_nan() {
            continue;
        }

        for &x in v.deps.iter().chain(v.prev_deps.iter()) {
            let dx = curr[x] - prev[x];
            if dx == 0.0 || dx.is_nan() {
                continue;
            }

            // one full re-evaluation with exactly one input "current"
            let z_sub = eval(
                expr,
                &EvalCtx {
                    curr: prev,
                    prev,
                    tables: &cp.tables,
                    override_slot: Some((x, curr[x])),
                },
            );
            let partial = z_sub - prev[z];
            if partial == 0.0 || partial.is_nan() {
                continue;
            }

            let magnitude = (partial / dz).abs();
            let polarity = if partial / dx > 0.0 { 1.0 } else { -1.0 };
            frame.push(LinkScore {
                from: x as u32,
                to: z as u32,
                score: magnitude * polarity,
            });
        }
    }

    // flow → stock scores need Δstock at the previous step, which doesn't
    // exist on step 1: those scores are defined to be zero there
    if !first_step {
        for su in cp.stocks.iter() {
            let s = su.slot;
            let ds_curr = curr[s] - prev[s];
            let ds_prev = prev[s] - prev_prev[s];
            let d = ds_curr - ds_prev;
            if d == 0.0 || d.is_nan() {
                continue;
            }

            for &f in su.inflows.iter() {
                let df = curr[f] - prev[f];
                if df == 0.0 || df.is_nan() {
                    continue;
                }
                frame.push(LinkScore {
                    from: f as u32,
                    to: s as u32,
                    score: (df / d).abs(),
                });
            }
            for &f in su.outflows.iter() {
                let df = curr[f] - prev[f];
                if df == 0.0 || df.is_nan() {
                    continue;
                }
                frame.push(LinkScore {
                    from: f as u32,
                    to: s as u32,
                    score: -(df / d).abs(),
                });
            }
        }
    }

    frame
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::model::testutils::*;
    use crate::project::Project;
    use crate::vm::{run, RunOptions};

    fn frames_for(
        project: crate::datamodel::Project,
    ) -> (crate::compiler::CompiledProject, crate::results::Results) {
        let project = Project::from(project);
        let cp = compile(&project).unwrap();
        let results = run(
            &cp,
            RunOptions {
                enable_ltm: true,
                ..Default::default()
            },
        );
        (cp, results)
    }

    #[test]
    fn test_first_frame_empty() {
        let (_cp, results) = frames_for(x_project(vec![x_model(
            "main",
            vec![
                x_stock("pop", "100", &["births"], &[]),
                x_flow("births", "pop * 0.05"),
            ],
        )]));
        let frames = results.link_frames.unwrap();
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_step_one_has_no_flow_to_stock_score() {
        let (cp, results) = frames_for(x_project(vec![x_model(
            "main",
            vec![
                x_stock("pop", "100", &["births"], &[]),
                x_flow("births", "pop * 0.05"),
            ],
        )]));
        let frames = results.link_frames.unwrap();
        let pop = cp.offsets["pop"] as u32;

        // frame 1 covers (t0, t1): the stock-to-flow link is active but
        // the flow-to-stock score needs a second difference
        assert!(frames[1].iter().all(|ls| ls.to != pop));
        assert!(frames[2].iter().any(|ls| ls.to == pop));
    }

    #[test]
    fn test_stock_to_flow_score() {
        let (cp, results) = frames_for(x_project(vec![x_model(
            "main",
            vec![
                x_stock("pop", "100", &["births"], &[]),
                x_flow("births", "pop * 0.05"),
            ],
        )]));
        let frames = results.link_frames.unwrap();
        let pop = cp.offsets["pop"] as u32;
        let births = cp.offsets["births"] as u32;

        // births is a one-input function of pop: the link score is
        // exactly ±1 whenever pop is changing
        for frame in frames.iter().skip(1) {
            let ls = frame
                .iter()
                .find(|ls| ls.from == pop && ls.to == births)
                .expect("pop→births active");
            assert!((ls.score - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_flow_to_stock_score_value() {
        // pop grows at rate 0.05: Δbirths/D = 1.05 with positive polarity
        let (cp, results) = frames_for(x_project(vec![x_model(
            "main",
            vec![
                x_stock("pop", "100", &["births"], &[]),
                x_flow("births", "pop * 0.05"),
            ],
        )]));
        let frames = results.link_frames.unwrap();
        let pop = cp.offsets["pop"] as u32;
        let births = cp.offsets["births"] as u32;

        for frame in frames.iter().skip(2) {
            let ls = frame
                .iter()
                .find(|ls| ls.from == births && ls.to == pop)
                .expect("births→pop active");
            assert!((ls.score - 1.05).abs() < 1e-9, "score {}", ls.score);
        }
    }

    #[test]
    fn test_equilibrium_zeroing() {
        // births and deaths balance: nothing changes, every score is zero
        let (_cp, results) = frames_for(x_project(vec![x_model(
            "main",
            vec![
                x_stock("pop", "100", &["births"], &["deaths"]),
                x_flow("births", "pop / 20"),
                x_flow("deaths", "pop / 20"),
            ],
        )]));
        let frames = results.link_frames.unwrap();
        for frame in frames.iter() {
            assert!(frame.is_empty(), "expected no active links: {:?}", frame);
        }
    }

    #[test]
    fn test_two_input_partial_scores() {
        // z = x + y with x and y both changing: each input's score is its
        // share of Δz
        let mut project = x_project(vec![x_model(
            "main",
            vec![
                x_aux("x", "time * 2"),
                x_aux("y", "time"),
                x_aux("z", "x + y"),
            ],
        )]);
        project.sim_specs.stop = 3.0;
        let (cp, results) = frames_for(project);
        let frames = results.link_frames.unwrap();
        let x = cp.offsets["x"] as u32;
        let y = cp.offsets["y"] as u32;
        let z = cp.offsets["z"] as u32;

        for frame in frames.iter().skip(1) {
            let sx = frame
                .iter()
                .find(|ls| ls.from == x && ls.to == z)
                .unwrap()
                .score;
            let sy = frame
                .iter()
                .find(|ls| ls.from == y && ls.to == z)
                .unwrap()
                .score;
            assert!((sx - 2.0 / 3.0).abs() < 1e-12);
            assert!((sy - 1.0 / 3.0).abs() < 1e-12);
        }
    }
}
