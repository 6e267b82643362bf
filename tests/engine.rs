//! End-to-end tests driving whole bytecode methods through the engine and
//! the runner.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use sym_vm::algo::opcodes::*;
use sym_vm::algo::{ARITHMETIC_EXCEPTION, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION};
use sym_vm::bc::{ClassFileBuilder, ClassHierarchy, ConstPoolEntry, ExceptionHandler};
use sym_vm::calc::Calculator;
use sym_vm::dec::{DecisionError, DecisionProcedure, DecisionProcedureAlwSat};
use sym_vm::jvm::{Actions, Engine, RunOutcome, RunnerBuilder, RunnerParameters, StepOutcome};
use sym_vm::mem::frame::Frame;
use sym_vm::mem::path::Clause;
use sym_vm::mem::state::{RefState, State, Stuck};
use sym_vm::rules::{LicsRule, LicsRules};
use sym_vm::types::Signature;
use sym_vm::value::{Lit, Value};

fn base_hierarchy() -> ClassHierarchy {
    let mut hier = ClassHierarchy::new();
    hier.add_class(ClassFileBuilder::new("java/lang/Object").no_superclass().build());
    hier
}

fn engine_for(hier: ClassHierarchy) -> Engine {
    Engine::new(
        Calculator::default(),
        hier,
        LicsRules::default(),
        HashMap::new(),
        Box::new(DecisionProcedureAlwSat::new()),
    )
}

/// A fresh state whose only frame runs the given static method.
fn state_on(hier: &ClassHierarchy, class: &str, name: &str, descriptor: &str) -> State {
    let method = Signature::new(class, descriptor, name);
    let code = hier
        .class_file(class)
        .unwrap()
        .find_method(&method)
        .unwrap()
        .code
        .clone()
        .unwrap();
    let mut state = State::new();
    state.push_frame(Frame::new(method, code, 0));
    state
}

fn int_on_top(state: &State) -> i32 {
    match state.top().unwrap() {
        Value::Primitive(p) => match p.as_simplex().unwrap() {
            Lit::Int(x) => x,
            other => panic!("expected an int, got {:?}", other),
        },
        other => panic!("expected a primitive, got {:?}", other),
    }
}

fn thrown_class(state: &State, hier_state: &State) -> String {
    match state.stuck() {
        Some(Stuck::Exception(r)) => match hier_state.ref_state(r) {
            RefState::Object(pos) => hier_state
                .heap()
                .get(pos)
                .unwrap()
                .class_name()
                .to_owned(),
            other => panic!("exception reference is {:?}", other),
        },
        other => panic!("expected a stuck exception, got {:?}", other),
    }
}

#[derive(Clone, Default)]
struct Collect {
    stuck: Rc<RefCell<Vec<State>>>,
}

impl Actions for Collect {
    fn at_stuck(&mut self, state: &State) -> bool {
        self.stuck.borrow_mut().push(state.clone());
        false
    }
}

// Scenario: a getstatic of a compile-time-constant field reads the
// constant pool directly; no <clinit> runs and no Klass appears.
#[test]
fn constant_getstatic_skips_initialization() {
    let mut hier = base_hierarchy();
    let mut b = ClassFileBuilder::new("demo/K")
        .constant_static_field("C", "I", ConstPoolEntry::Int(42))
        .static_field("F", "I");
    let c_ref = b.cp(ConstPoolEntry::FieldRef(Signature::new("demo/K", "I", "C")));
    let f_ref = b.cp(ConstPoolEntry::FieldRef(Signature::new("demo/K", "I", "F")));
    let b = b
        .method(
            "main",
            "()I",
            true,
            0,
            vec![GETSTATIC, 0, c_ref as u8, IRETURN],
        )
        .method(
            "<clinit>",
            "()V",
            true,
            0,
            vec![ICONST_1, PUTSTATIC, 0, f_ref as u8, RETURN],
        );
    hier.add_class(b.build());

    let state = state_on(&hier, "demo/K", "main", "()I");
    let mut engine = engine_for(hier);
    engine.set_current_state(state);

    assert_eq!(engine.step().unwrap(), StepOutcome::Stepped);
    let state = engine.current_state().unwrap();
    assert_eq!(int_on_top(state), 42);
    assert_eq!(state.pc().unwrap(), 3);
    // The carve-out: the class was never initialized.
    assert!(state.klass("demo/K").is_none());
    assert!(state.path_condition().is_empty());
}

// Scenario: a getstatic of a non-constant field pushes the <clinit>
// frame, leaves the pc alone, and re-executes after initialization.
#[test]
fn getstatic_runs_clinit_and_reexecutes() {
    let mut hier = base_hierarchy();
    let mut b = ClassFileBuilder::new("demo/K2").static_field("F", "I");
    let f_ref = b.cp(ConstPoolEntry::FieldRef(Signature::new("demo/K2", "I", "F")));
    let b = b
        .method(
            "main",
            "()I",
            true,
            0,
            vec![GETSTATIC, 0, f_ref as u8, IRETURN],
        )
        .method(
            "<clinit>",
            "()V",
            true,
            0,
            vec![ICONST_5, PUTSTATIC, 0, f_ref as u8, RETURN],
        );
    hier.add_class(b.build());

    let state = state_on(&hier, "demo/K2", "main", "()I");
    let mut engine = engine_for(hier);
    engine.set_current_state(state);

    assert_eq!(engine.step().unwrap(), StepOutcome::Stepped);
    {
        let state = engine.current_state().unwrap();
        assert_eq!(state.frames().len(), 2, "a <clinit> frame was pushed");
        assert_eq!(state.frames()[0].pc(), 0, "the getstatic pc did not advance");
        assert!(state
            .path_condition()
            .clauses()
            .iter()
            .any(|c| matches!(c, Clause::AssumeClassNotInitialized(n) if n == "demo/K2")));
    }

    // <clinit> runs to completion, then the getstatic re-executes.
    for _ in 0..10 {
        if engine.current_state().unwrap().frames().len() == 1
            && engine.current_state().unwrap().pc().unwrap() == 3
        {
            break;
        }
        assert_eq!(engine.step().unwrap(), StepOutcome::Stepped);
    }
    let state = engine.current_state().unwrap();
    assert_eq!(state.frames().len(), 1);
    assert_eq!(state.pc().unwrap(), 3);
    assert_eq!(int_on_top(state), 5);
}

// Scenario: an array load with symbolic index and length forks into the
// in-bounds successor `L` and the out-of-bounds successor `R`.
#[test]
fn symbolic_array_index_forks_on_bounds() {
    let mut hier = base_hierarchy();
    hier.add_class(
        ClassFileBuilder::new("demo/A")
            .method(
                "get",
                "([II)I",
                true,
                2,
                vec![ALOAD_0, ILOAD_1, IALOAD, IRETURN],
            )
            .build(),
    );

    let rules = LicsRules::new(vec![LicsRule::never_null("ROOT:p0")]);
    let params = RunnerParameters::new()
        .root_method(Signature::new("demo/A", "([II)I", "get"))
        .lics_rules(rules);
    let collect = Collect::default();
    let stuck = collect.stuck.clone();
    let mut runner = RunnerBuilder::build(
        params,
        hier,
        Box::new(DecisionProcedureAlwSat::new()),
        Box::new(collect),
    )
    .unwrap();
    assert_eq!(runner.run().unwrap(), RunOutcome::Completed);

    let stuck = stuck.borrow();
    assert_eq!(stuck.len(), 2);

    let in_bounds = &stuck[0];
    assert_eq!(in_bounds.identifier(), "L");
    assert_eq!(in_bounds.depth(), 1);
    assert!(matches!(in_bounds.stuck(), Some(Stuck::Return(Some(_)))));
    assert!(in_bounds
        .path_condition()
        .clauses()
        .iter()
        .any(|c| matches!(c, Clause::Assume(_))));

    let out_of_bounds = &stuck[1];
    assert_eq!(out_of_bounds.identifier(), "R");
    assert_eq!(
        thrown_class(out_of_bounds, out_of_bounds),
        ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION
    );
}

/// Counts `isSatNull` queries, delegating everything to the terminal.
struct CountingDp {
    next: DecisionProcedureAlwSat,
    null_queries: Rc<RefCell<usize>>,
}

impl DecisionProcedure for CountingDp {
    fn push_assumption(&mut self, clause: &Clause) -> Result<(), DecisionError> {
        self.next.push_assumption(clause)
    }

    fn clear_assumptions(&mut self) -> Result<(), DecisionError> {
        self.next.clear_assumptions()
    }

    fn is_sat(&mut self, expr: &sym_vm::Primitive) -> Result<bool, DecisionError> {
        self.next.is_sat(expr)
    }

    fn is_sat_null(&mut self, r: &sym_vm::value::SymbolicRef) -> Result<bool, DecisionError> {
        *self.null_queries.borrow_mut() += 1;
        self.next.is_sat_null(r)
    }

    fn is_sat_aliases(
        &mut self,
        r: &sym_vm::value::SymbolicRef,
        pos: sym_vm::value::HeapPos,
        objekt: &sym_vm::mem::Objekt,
    ) -> Result<bool, DecisionError> {
        self.next.is_sat_aliases(r, pos, objekt)
    }

    fn is_sat_expands(
        &mut self,
        r: &sym_vm::value::SymbolicRef,
        class_name: &str,
    ) -> Result<bool, DecisionError> {
        self.next.is_sat_expands(r, class_name)
    }

    fn is_sat_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError> {
        self.next.is_sat_initialized(class_name)
    }

    fn is_sat_not_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError> {
        self.next.is_sat_not_initialized(class_name)
    }
}

// Scenario: resolution rules pin `ROOT.next` non-null and to one class:
// exactly one expansion successor, and the null alternative is pruned
// before the decision procedure is consulted.
#[test]
fn lics_rules_pin_resolution_to_a_single_expansion() {
    let mut hier = base_hierarchy();
    let mut b = ClassFileBuilder::new("pkg/Node").field("next", "Lpkg/Node;");
    let next_ref = b.cp(ConstPoolEntry::FieldRef(Signature::new(
        "pkg/Node",
        "Lpkg/Node;",
        "next",
    )));
    let b = b.method(
        "step",
        "()Lpkg/Node;",
        false,
        1,
        vec![ALOAD_0, GETFIELD, 0, next_ref as u8, ARETURN],
    );
    hier.add_class(b.build());

    let rules = LicsRules::new(vec![
        LicsRule::never_null("ROOT"),
        LicsRule::expands_to("ROOT", "pkg/Node"),
        LicsRule::never_null("ROOT.next"),
        LicsRule::expands_to("ROOT.next", "pkg/Node"),
        LicsRule::aliases_to("ROOT.next", "NOTHING"),
    ]);
    let params = RunnerParameters::new()
        .root_method(Signature::new("pkg/Node", "()Lpkg/Node;", "step"))
        .lics_rules(rules);

    let null_queries = Rc::new(RefCell::new(0));
    let dp = CountingDp {
        next: DecisionProcedureAlwSat::new(),
        null_queries: null_queries.clone(),
    };
    let collect = Collect::default();
    let stuck = collect.stuck.clone();
    let mut runner =
        RunnerBuilder::build(params, hier, Box::new(dp), Box::new(collect)).unwrap();
    assert_eq!(runner.run().unwrap(), RunOutcome::Completed);

    let stuck = stuck.borrow();
    assert_eq!(stuck.len(), 1, "every resolution had a single alternative");
    let state = &stuck[0];
    // Single-alternative decisions fork no siblings and add no letters.
    assert_eq!(state.identifier(), "");
    assert_eq!(state.depth(), 0);
    assert_eq!(state.heap().len(), 2, "receiver and its next were expanded");
    let expansions = state
        .path_condition()
        .clauses()
        .iter()
        .filter(|c| matches!(c, Clause::AssumeExpands(_, class) if class == "pkg/Node"))
        .count();
    assert_eq!(expansions, 2);
    assert_eq!(*null_queries.borrow(), 0, "null was pruned without a query");
}

// Scenario: idiv by a concrete zero throws without forking; the handler
// sees the pc of the faulting instruction's frame.
#[test]
fn idiv_by_concrete_zero_throws_arithmetic_exception() {
    let mut hier = base_hierarchy();
    hier.add_class(
        ClassFileBuilder::new("demo/D")
            .method_with_handlers(
                "div",
                "(I)I",
                true,
                1,
                vec![ILOAD_0, ICONST_0, IDIV, IRETURN, ICONST_M1, IRETURN],
                vec![ExceptionHandler {
                    start_pc: 0,
                    end_pc: 4,
                    handler_pc: 4,
                    catch_type: Some(ARITHMETIC_EXCEPTION.to_owned()),
                }],
            )
            .build(),
    );

    let mut state = state_on(&hier, "demo/D", "div", "(I)I");
    let x = state.fresh_term(sym_vm::types::PrimitiveType::Int);
    state
        .current_frame_mut()
        .unwrap()
        .set_local(0, Value::Primitive(x));
    let mut engine = engine_for(hier);
    engine.set_current_state(state);

    assert_eq!(engine.step().unwrap(), StepOutcome::Stepped); // iload_0
    assert_eq!(engine.step().unwrap(), StepOutcome::Stepped); // iconst_0
    assert_eq!(engine.step().unwrap(), StepOutcome::Stepped); // idiv: no fork
    let state = engine.current_state().unwrap();
    assert!(!state.is_stuck(), "the handler caught the exception");
    assert_eq!(state.pc().unwrap(), 4);
    assert_eq!(state.current_frame().unwrap().stack_len(), 1);
    assert!(state.path_condition().is_empty(), "no clause was pushed");
}

// Scenario: wide followed by iload consumes a two-byte index; the pc
// advances by four in total and the flag clears.
#[test]
fn wide_iload_consumes_two_byte_index() {
    let mut hier = base_hierarchy();
    hier.add_class(
        ClassFileBuilder::new("demo/W")
            .method("w", "()I", true, 6, vec![WIDE, ILOAD, 0x00, 0x05, IRETURN])
            .build(),
    );

    let mut state = state_on(&hier, "demo/W", "w", "()I");
    state
        .current_frame_mut()
        .unwrap()
        .set_local(5, Value::Primitive(Calculator::default().val_int(7)));
    let mut engine = engine_for(hier);
    engine.set_current_state(state);

    assert_eq!(engine.step().unwrap(), StepOutcome::Stepped); // wide
    assert_eq!(engine.current_state().unwrap().pc().unwrap(), 1);
    assert_eq!(engine.step().unwrap(), StepOutcome::Stepped); // widened iload
    let state = engine.current_state().unwrap();
    assert_eq!(state.pc().unwrap(), 4);
    assert_eq!(int_on_top(state), 7);
    assert!(!state.clone().take_wide(), "the wide flag is one-shot");
}

fn classify_class() -> ClassFileBuilder {
    ClassFileBuilder::new("demo/C").method(
        "classify",
        "(I)I",
        true,
        1,
        vec![
            ILOAD_0,
            IFLT,
            0x00,
            0x09,
            ILOAD_0,
            IFEQ,
            0x00,
            0x07,
            ICONST_1,
            IRETURN,
            ICONST_M1,
            IRETURN,
            ICONST_0,
            IRETURN,
        ],
    )
}

fn run_classify(params: RunnerParameters) -> (RunOutcome, Vec<String>, sym_vm::jvm::RunStats) {
    let mut hier = base_hierarchy();
    hier.add_class(classify_class().build());
    let collect = Collect::default();
    let stuck = collect.stuck.clone();
    let mut runner = RunnerBuilder::build(
        params.root_method(Signature::new("demo/C", "(I)I", "classify")),
        hier,
        Box::new(DecisionProcedureAlwSat::new()),
        Box::new(collect),
    )
    .unwrap();
    let outcome = runner.run().unwrap();
    let ids = stuck.borrow().iter().map(|s| s.identifier().to_owned()).collect();
    (outcome, ids, runner.stats().clone())
}

// Law: two runs with the same inputs yield the same identifiers in the
// same order.
#[test]
fn exploration_is_deterministic() {
    let (outcome1, ids1, _) = run_classify(RunnerParameters::new());
    let (outcome2, ids2, _) = run_classify(RunnerParameters::new());
    assert_eq!(outcome1, RunOutcome::Completed);
    assert_eq!(outcome1, outcome2);
    assert_eq!(ids1, vec!["L", "RL", "RR"]);
    assert_eq!(ids1, ids2);
}

// Law: identifiers encode exactly the fork choices, so their length is
// the depth.
#[test]
fn identifier_length_equals_depth() {
    let mut hier = base_hierarchy();
    hier.add_class(classify_class().build());
    let collect = Collect::default();
    let stuck = collect.stuck.clone();
    let mut runner = RunnerBuilder::build(
        RunnerParameters::new().root_method(Signature::new("demo/C", "(I)I", "classify")),
        hier,
        Box::new(DecisionProcedureAlwSat::new()),
        Box::new(collect),
    )
    .unwrap();
    runner.run().unwrap();
    for state in stuck.borrow().iter() {
        assert_eq!(state.identifier().len(), state.depth());
    }
}

#[test]
fn depth_scope_prunes_children() {
    let (outcome, ids, stats) = run_classify(RunnerParameters::new().depth_scope(1));
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(ids.is_empty(), "every depth-1 state was pruned before stepping");
    assert_eq!(stats.pruned_by_depth, 2);
}

#[test]
fn identifier_subregion_shards_the_tree() {
    let (outcome, ids, stats) = run_classify(RunnerParameters::new().identifier_subregion("R"));
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ids, vec!["RL", "RR"]);
    assert_eq!(stats.pruned_by_subregion, 1);
}

#[test]
fn timeout_reports_unfinished_states() {
    // A zero-millisecond budget expires before the first step.
    let (outcome, ids, stats) = run_classify(RunnerParameters::new().timeout_millis(1).count_scope(0));
    // Either the deadline fired immediately or the tiny tree finished
    // first; both are legal, but a timeout must report unfinished work.
    if outcome == RunOutcome::TimedOut {
        assert!(stats.unfinished > 0);
    } else {
        assert_eq!(ids.len(), 3);
    }
}
