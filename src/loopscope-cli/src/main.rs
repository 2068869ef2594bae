// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use loopscope_engine::{
    analyze_ltm, compile, deserialize, project_simplified_cld, run, LtmOptions, RunOptions,
    SimplifyOptions, StopReason,
};

const EXIT_COMPILE_ERROR: u8 = 1;
const EXIT_RUN_FAILURE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "sim", about = "Simulate system dynamics models", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate a binary project file and write results as CSV
    Run {
        /// path to a serialized project (.bin)
        project: PathBuf,
        /// where to write the results CSV
        #[arg(long, default_value = "results.csv")]
        out: PathBuf,
        /// also compute Loops That Matter scores; the report and the
        /// simplified CLD are written as JSON next to the CSV
        #[arg(long)]
        ltm: bool,
    },
}

fn init_logging() {
    // SIM_LOG_LEVEL in {error, warn, info, debug}
    let filter = EnvFilter::try_from_env("SIM_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_project(path: &Path) -> Result<loopscope_engine::datamodel::Project, String> {
    let mut file = File::open(path).map_err(|err| format!("open {}: {}", path.display(), err))?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .map_err(|err| format!("read {}: {}", path.display(), err))?;
    deserialize(&contents).map_err(|err| format!("decode {}: {}", path.display(), err))
}

fn run_command(project_path: &Path, out: &Path, ltm: bool) -> ExitCode {
    let project = match load_project(project_path) {
        Ok(project) => project,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(EXIT_COMPILE_ERROR);
        }
    };

    let compiled = match compile(&project) {
        Ok(compiled) => compiled,
        Err(errors) => {
            for err in errors.iter() {
                eprintln!("error: {}", err);
            }
            return ExitCode::from(EXIT_COMPILE_ERROR);
        }
    };

    let results = run(
        &compiled,
        RunOptions {
            enable_ltm: ltm,
            ..Default::default()
        },
    );

    let csv_file = match File::create(out) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("error: create {}: {}", out.display(), err);
            return ExitCode::from(EXIT_RUN_FAILURE);
        }
    };
    if let Err(err) = results.write_csv(BufWriter::new(csv_file)) {
        eprintln!("error: write {}: {}", out.display(), err);
        return ExitCode::from(EXIT_RUN_FAILURE);
    }
    tracing::info!("wrote {}", out.display());

    if ltm {
        let report = analyze_ltm(&results, &compiled, LtmOptions::default());
        for diagnostic in report.diagnostics.iter() {
            eprintln!("ltm: {:?}", diagnostic);
        }
        let cld = project_simplified_cld(&report, SimplifyOptions::default());

        let report_path = out.with_extension("ltm.json");
        let cld_path = out.with_extension("cld.json");
        if let Err(err) = write_json(&report_path, &report) {
            eprintln!("error: write {}: {}", report_path.display(), err);
            return ExitCode::from(EXIT_RUN_FAILURE);
        }
        if let Err(err) = write_json(&cld_path, &cld) {
            eprintln!("error: write {}: {}", cld_path.display(), err);
            return ExitCode::from(EXIT_RUN_FAILURE);
        }
        tracing::info!("wrote {} and {}", report_path.display(), cld_path.display());
    }

    match results.stop {
        None => ExitCode::SUCCESS,
        Some(StopReason::NumericFailure { step, ident }) => {
            eprintln!("error: {} became NaN at step {}", ident, step);
            ExitCode::from(EXIT_RUN_FAILURE)
        }
        Some(StopReason::Cancelled { step }) => {
            eprintln!("cancelled at step {}", step);
            ExitCode::from(EXIT_CANCELLED)
        }
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
}

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { project, out, ltm } => run_command(&project, &out, ltm),
    }
}
