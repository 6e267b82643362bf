//! Demo driver: symbolically executes a small three-way classifier over a
//! symbolic int argument and prints every finished path. An optional
//! argument names a CBOR file the run report is written to.

use std::env;
use std::fs::File;

use log::info;
use serde::Serialize;

use sym_vm::algo::opcodes::*;
use sym_vm::apps::{StateFormatter, TextFormatter};
use sym_vm::bc::{ClassFileBuilder, ClassHierarchy};
use sym_vm::dec::{DecisionProcedureAlwSat, DecisionProcedureTracing};
use sym_vm::jvm::{Actions, RunOutcome, RunStats, RunnerBuilder, RunnerParameters};
use sym_vm::mem::State;
use sym_vm::types::Signature;

struct PrintPaths {
    formatter: TextFormatter,
}

impl Actions for PrintPaths {
    fn at_stuck(&mut self, state: &State) -> bool {
        println!("{}", self.formatter.format(state));
        false
    }
}

#[derive(Serialize)]
struct Report {
    outcome: RunOutcome,
    stats: RunStats,
}

/// classify(x) = -1 if x < 0, 0 if x == 0, 1 otherwise.
fn classify_bytecode() -> Vec<u8> {
    vec![
        ILOAD_0, // 0
        IFLT, 0x00, 0x09, // 1: x < 0 -> 10
        ILOAD_0, // 4
        IFEQ, 0x00, 0x07, // 5: x == 0 -> 12
        ICONST_1, // 8
        IRETURN, // 9
        ICONST_M1, // 10
        IRETURN, // 11
        ICONST_0, // 12
        IRETURN, // 13
    ]
}

fn main() {
    env_logger::init();

    let mut hier = ClassHierarchy::new();
    hier.add_class(ClassFileBuilder::new("java/lang/Object").no_superclass().build());
    hier.add_class(
        ClassFileBuilder::new("demo/Classify")
            .method("classify", "(I)I", true, 1, classify_bytecode())
            .build(),
    );

    let params = RunnerParameters::new()
        .root_method(Signature::new("demo/Classify", "(I)I", "classify"))
        .depth_scope(16)
        .count_scope(1000)
        .timeout_millis(10_000);

    let dec = Box::new(DecisionProcedureTracing::new(DecisionProcedureAlwSat::new()));
    let actions = Box::new(PrintPaths { formatter: TextFormatter });

    let mut runner = RunnerBuilder::build(params, hier, dec, actions)
        .expect("runner configuration is valid");
    let outcome = match runner.run() {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("run failed: {}", e);
            if let Some(state) = runner.offending_state() {
                eprintln!("{}", TextFormatter.format(state));
            }
            std::process::exit(1);
        }
    };

    let stats = runner.stats().clone();
    info!(
        "outcome {:?}: {} states, {} steps, {} returns, {} exceptions",
        outcome, stats.states_explored, stats.steps, stats.stuck_returns, stats.stuck_exceptions
    );
    println!(
        "explored {} states in {} steps ({} finished paths)",
        stats.states_explored,
        stats.steps,
        stats.stuck_returns + stats.stuck_exceptions
    );

    if let Some(path) = env::args().nth(1) {
        let report = Report { outcome, stats };
        let file = File::create(&path).expect("report file is writable");
        serde_cbor::to_writer(file, &report).expect("report serializes");
        println!("report written to {}", path);
    }
}
