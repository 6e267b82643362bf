use std::collections::HashMap;

use thiserror::Error;

use crate::bc::ClassHierarchy;
use crate::calc::Calculator;
use crate::dec::DecisionProcedure;
use crate::jvm::engine::Engine;
use crate::jvm::runner::{Actions, Runner};
use crate::mem::frame::Frame;
use crate::mem::state::State;
use crate::rules::LicsRules;
use crate::types::{parse_method_descriptor, Signature, TypeDesc};
use crate::value::Value;

/// Configuration of one symbolic execution run. Scope limits of zero mean
/// unbounded.
#[derive(Default)]
pub struct RunnerParameters {
    pub root_method: Option<Signature>,
    pub depth_scope: usize,
    pub count_scope: u64,
    pub heap_scope: HashMap<String, usize>,
    pub timeout_millis: u64,
    pub identifier_subregion: Option<String>,
    pub lics_rules: LicsRules,
    pub observed_variables: Vec<(String, Signature)>,
}

impl RunnerParameters {
    pub fn new() -> RunnerParameters {
        RunnerParameters::default()
    }

    pub fn root_method(mut self, sig: Signature) -> Self {
        self.root_method = Some(sig);
        self
    }

    pub fn depth_scope(mut self, limit: usize) -> Self {
        self.depth_scope = limit;
        self
    }

    pub fn count_scope(mut self, limit: u64) -> Self {
        self.count_scope = limit;
        self
    }

    pub fn heap_scope(mut self, class_name: &str, limit: usize) -> Self {
        self.heap_scope.insert(class_name.to_owned(), limit);
        self
    }

    pub fn timeout_millis(mut self, millis: u64) -> Self {
        self.timeout_millis = millis;
        self
    }

    pub fn identifier_subregion(mut self, prefix: &str) -> Self {
        self.identifier_subregion = Some(prefix.to_owned());
        self
    }

    pub fn lics_rules(mut self, rules: LicsRules) -> Self {
        self.lics_rules = rules;
        self
    }

    pub fn observe(mut self, class_name: &str, field: Signature) -> Self {
        self.observed_variables.push((class_name.to_owned(), field));
        self
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot build engine: {0}")]
    CannotBuildEngine(String),
    #[error("root method cannot be executed: {0}")]
    Initialization(String),
}

/// Builds a runner: validates the root method, creates the initial state
/// with symbolic arguments, and wires engine, decision procedure and
/// hooks together.
pub struct RunnerBuilder;

impl RunnerBuilder {
    pub fn build(
        params: RunnerParameters,
        hier: ClassHierarchy,
        dec: Box<dyn DecisionProcedure>,
        actions: Box<dyn Actions>,
    ) -> Result<Runner, BuildError> {
        let root_method = params
            .root_method
            .clone()
            .ok_or_else(|| BuildError::CannotBuildEngine("no root method given".to_owned()))?;

        let calc = Calculator::default();
        let root_state = Self::initial_state(&hier, &calc, &root_method)?;

        let engine = Engine::new(
            calc,
            hier,
            params.lics_rules.clone(),
            params.heap_scope.clone(),
            dec,
        );
        Ok(Runner::new(engine, root_state, actions, &params))
    }

    fn initial_state(
        hier: &ClassHierarchy,
        calc: &Calculator,
        root_method: &Signature,
    ) -> Result<State, BuildError> {
        let cf = hier
            .class_file(&root_method.class_name)
            .map_err(|e| BuildError::Initialization(e.to_string()))?;
        let method = cf
            .find_method(root_method)
            .ok_or_else(|| BuildError::Initialization(format!("no method {}", root_method)))?;
        if method.is_abstract || method.is_native {
            return Err(BuildError::Initialization(format!(
                "method {} is abstract or native",
                root_method
            )));
        }
        let code = method
            .code
            .clone()
            .ok_or_else(|| BuildError::Initialization(format!("method {} has no code", root_method)))?;

        let (param_types, _) = parse_method_descriptor(&root_method.descriptor)
            .ok_or_else(|| {
                BuildError::Initialization(format!("bad descriptor {}", root_method.descriptor))
            })?;

        let mut state = State::new();
        let mut frame = Frame::new(root_method.clone(), code, 0);
        let mut slot = 0;

        if !method.is_static {
            let this = state.fresh_symbolic_ref("ROOT", &root_method.class_name);
            if !frame.set_local(slot, Value::Reference(this)) {
                return Err(BuildError::Initialization("locals too small".to_owned()));
            }
            slot += 1;
        }
        for (i, t) in param_types.iter().enumerate() {
            let origin = format!("ROOT:p{}", i);
            let value = match t {
                TypeDesc::Primitive(p) => {
                    let term = state.fresh_term(*p);
                    // Small integral arguments live as ints on stack and in
                    // locals, like everywhere else in the hosted VM.
                    let term = if p.promotes_to_int() {
                        calc.widen(crate::types::PrimitiveType::Int, &term)
                            .map_err(|e| BuildError::Initialization(e.to_string()))?
                    } else {
                        term
                    };
                    Value::Primitive(term)
                }
                other => {
                    let static_type = other
                        .class_name()
                        .unwrap_or_else(|| "java/lang/Object".to_owned());
                    Value::Reference(state.fresh_symbolic_ref(&origin, &static_type))
                }
            };
            let cat2 = value.is_category2();
            if !frame.set_local(slot, value) {
                return Err(BuildError::Initialization("locals too small".to_owned()));
            }
            slot += if cat2 { 2 } else { 1 };
        }

        state.push_frame(frame);
        Ok(state)
    }
}
