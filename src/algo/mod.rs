use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::bc::{ClassHierarchy, ConstPoolEntry, HierError};
use crate::calc::{CalcError, Calculator};
use crate::dec::{DecisionError, DecisionProcedure};
use crate::mem::objekt::{Array, Klass, Objekt};
use crate::mem::path::Clause;
use crate::mem::state::{State, StateError};
use crate::rules::LicsRules;
use crate::tree::{branch_letter, sort_ref_alternatives, DecisionAlternative, RefAlternative};
use crate::types::PrimitiveType;
use crate::value::{Reference, SymbolicRef, Value};

mod arith_ops;
mod array_ops;
mod branch_ops;
mod const_ops;
mod field_ops;
mod invoke_ops;
mod local_ops;
mod object_ops;
mod stack_ops;

pub mod opcodes;

// Modeled error and exception classes of the hosted VM.
pub const VERIFY_ERROR: &str = "java/lang/VerifyError";
pub const NO_CLASS_DEFINITION_FOUND_ERROR: &str = "java/lang/NoClassDefFoundError";
pub const NO_SUCH_FIELD_ERROR: &str = "java/lang/NoSuchFieldError";
pub const NO_SUCH_METHOD_ERROR: &str = "java/lang/NoSuchMethodError";
pub const ILLEGAL_ACCESS_ERROR: &str = "java/lang/IllegalAccessError";
pub const INCOMPATIBLE_CLASS_CHANGE_ERROR: &str = "java/lang/IncompatibleClassChangeError";
pub const NULL_POINTER_EXCEPTION: &str = "java/lang/NullPointerException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION: &str =
    "java/lang/ArrayIndexOutOfBoundsException";
pub const ARITHMETIC_EXCEPTION: &str = "java/lang/ArithmeticException";
pub const CLASS_CAST_EXCEPTION: &str = "java/lang/ClassCastException";
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "java/lang/NegativeArraySizeException";

/// Errors an algorithm reports to the engine. Hosted-VM exceptions are not
/// here: they are modeled data, raised into the state itself.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The decision procedure rejected every alternative: the state is
    /// infeasible and must be pruned.
    #[error("every alternative of the decision is infeasible")]
    Contradiction,
    #[error("cannot invoke native method {0}")]
    CannotInvokeNative(String),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error("unexpected internal error: {0}")]
    Unexpected(String),
}

impl From<StateError> for ExecError {
    fn from(e: StateError) -> ExecError {
        ExecError::Unexpected(e.to_string())
    }
}

impl From<CalcError> for ExecError {
    fn from(e: CalcError) -> ExecError {
        ExecError::Unexpected(e.to_string())
    }
}

impl From<HierError> for ExecError {
    fn from(e: HierError) -> ExecError {
        ExecError::Unexpected(e.to_string())
    }
}

/// The services an algorithm borrows while executing one bytecode.
pub struct ExecutionContext<'a> {
    pub calc: &'a Calculator,
    pub hier: &'a ClassHierarchy,
    pub rules: &'a LicsRules,
    /// Per-class caps on heap objects, bounding reference expansion.
    pub heap_scope: &'a HashMap<String, usize>,
    pub dec: &'a mut dyn DecisionProcedure,
}

/// The result of one algorithm execution: an empty vector means the state
/// was mutated in place, a non-empty one holds the forked successors (the
/// original state is dead).
pub type Outcome = Result<Vec<State>, ExecError>;

/// Dispatches one decoded bytecode to its algorithm.
pub fn execute(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    use opcodes::*;
    match op {
        NOP => {
            advance(state, ctx, 1)?;
            Ok(vec![])
        }
        ACONST_NULL | ICONST_M1..=DCONST_1 | BIPUSH | SIPUSH | LDC | LDC_W | LDC2_W => {
            const_ops::exec(op, state, ctx)
        }
        ILOAD..=ALOAD_3 | ISTORE..=ASTORE_3 | IINC | WIDE => local_ops::exec(op, state, ctx),
        POP..=SWAP => stack_ops::exec(op, state, ctx),
        IADD..=LXOR | I2L..=I2S | LCMP..=DCMPG => arith_ops::exec(op, state, ctx),
        IFEQ..=IF_ACMPNE | GOTO | IFNULL | IFNONNULL | GOTO_W | TABLESWITCH | LOOKUPSWITCH => {
            branch_ops::exec(op, state, ctx)
        }
        IALOAD..=SALOAD | IASTORE..=SASTORE | ARRAYLENGTH | NEWARRAY | ANEWARRAY => {
            array_ops::exec(op, state, ctx)
        }
        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => field_ops::exec(op, state, ctx),
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | IRETURN..=RETURN
        | ATHROW => invoke_ops::exec(op, state, ctx),
        NEW | CHECKCAST | INSTANCEOF | MONITORENTER | MONITOREXIT => {
            object_ops::exec(op, state, ctx)
        }
        _ => {
            debug!("unsupported bytecode 0x{:02x}", op);
            state.set_stuck(crate::mem::state::Stuck::Unsupported(op));
            Ok(vec![])
        }
    }
}

// Operand readers. Out-of-bounds reads surface as `InvalidProgramCounter`,
// which callers turn into a modeled verification error.

pub(crate) fn read_u8(state: &State, offset: usize) -> Result<u8, StateError> {
    state.instruction(offset)
}

pub(crate) fn read_u16(state: &State, offset: usize) -> Result<u16, StateError> {
    let hi = state.instruction(offset)?;
    let lo = state.instruction(offset + 1)?;
    Ok(byte_cat(hi, lo))
}

pub(crate) fn read_i16(state: &State, offset: usize) -> Result<i16, StateError> {
    Ok(read_u16(state, offset)? as i16)
}

pub(crate) fn read_i32(state: &State, offset: usize) -> Result<i32, StateError> {
    let b0 = state.instruction(offset)? as u32;
    let b1 = state.instruction(offset + 1)? as u32;
    let b2 = state.instruction(offset + 2)? as u32;
    let b3 = state.instruction(offset + 3)? as u32;
    Ok(((b0 << 24) | (b1 << 16) | (b2 << 8) | b3) as i32)
}

pub fn byte_cat(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | lo as u16
}

/// Throws the modeled verification error and reports an in-place outcome.
pub(crate) fn throw_verify_error(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    state.create_throwable_and_throw(ctx.hier, VERIFY_ERROR);
    Ok(vec![])
}

/// Advances the pc past the current bytecode, modeling a verification
/// error when the target is out of bounds.
pub(crate) fn advance(
    state: &mut State,
    ctx: &mut ExecutionContext,
    len: usize,
) -> Result<(), ExecError> {
    if state.inc_pc(len).is_err() {
        state.create_throwable_and_throw(ctx.hier, VERIFY_ERROR);
    }
    Ok(())
}

/// Jump to an absolute pc, modeling a verification error on bad targets.
pub(crate) fn jump(
    state: &mut State,
    ctx: &mut ExecutionContext,
    target: i64,
) -> Result<(), ExecError> {
    if target < 0 || state.jump_pc(target as usize).is_err() {
        state.create_throwable_and_throw(ctx.hier, VERIFY_ERROR);
    }
    Ok(())
}

/// The generic fork protocol: one deep clone per feasible alternative, a
/// branch letter appended when the fork is real (two or more successors).
pub fn fork<K>(
    parent: &State,
    alts: Vec<DecisionAlternative<K>>,
    mut apply: impl FnMut(&mut State, &DecisionAlternative<K>) -> Result<(), ExecError>,
) -> Outcome {
    if alts.is_empty() {
        return Err(ExecError::Contradiction);
    }
    let total = alts.len();
    let mut out = Vec::with_capacity(total);
    for (i, alt) in alts.iter().enumerate() {
        let mut child = parent.clone();
        if total > 1 {
            child.append_branch(branch_letter(i, total));
        }
        apply(&mut child, alt)?;
        out.push(child);
    }
    Ok(out)
}

/// Lazy class initialization. Returns `true` ("must exit") when `<clinit>`
/// frames were pushed: the triggering bytecode must not advance its pc, so
/// it re-executes after initialization completes.
pub fn ensure_klass(
    state: &mut State,
    ctx: &mut ExecutionContext,
    class_name: &str,
) -> Result<bool, ExecError> {
    if state.klass(class_name).is_some() {
        return Ok(false);
    }

    let mut order: Vec<String> = Vec::new();
    collect_init_order(ctx.hier, state, class_name, &mut order)?;

    let mut clinits: Vec<String> = Vec::new();
    for name in &order {
        let cf = ctx.hier.class_file(name)?;

        // Preparation: default-valued statics, compile-time constants
        // applied up front.
        let mut fields = BTreeMap::new();
        let static_fields: Vec<_> = cf
            .fields()
            .iter()
            .filter(|f| f.is_static)
            .cloned()
            .collect();
        for f in &static_fields {
            let value = match &f.constant_value {
                Some(entry) => cp_value(state, ctx, entry)
                    .unwrap_or(Value::Reference(Reference::Null)),
                None => crate::types::parse_type(&f.signature.descriptor)
                    .map(|t| crate::value::default_value(&t))
                    .unwrap_or(Value::Reference(Reference::Null)),
            };
            fields.insert(f.signature.clone(), value);
        }
        state.add_klass(Klass::new(name, fields));

        if ctx.dec.is_sat_not_initialized(name)? {
            state.push_clause(Clause::AssumeClassNotInitialized(name.clone()));
            if cf.clinit().is_some() {
                clinits.push(name.clone());
            }
        } else {
            // The class was initialized before symbolic execution began:
            // its non-constant statics hold unknown values.
            state.push_clause(Clause::AssumeClassInitialized(name.clone()));
            for f in &static_fields {
                if f.constant_value.is_some() {
                    continue;
                }
                let origin = format!("{}.{}", name, f.signature.name);
                let value = state.fresh_value_for(&f.signature.descriptor, &origin);
                if let Some(klass) = state.klass_mut(name) {
                    klass.set_field(&f.signature, value);
                }
            }
        }
    }

    // Push initializer frames innermost-last, so supertype initializers
    // run first; each frame returns to the pc of the frame below it, which
    // re-executes the triggering bytecode at the end of the chain.
    let must_exit = !clinits.is_empty();
    for name in clinits.iter().rev() {
        let cf = ctx.hier.class_file(name)?;
        let clinit = cf
            .clinit()
            .ok_or_else(|| ExecError::Unexpected(format!("lost <clinit> of {}", name)))?;
        let code = clinit
            .code
            .clone()
            .ok_or_else(|| ExecError::Unexpected(format!("<clinit> of {} has no code", name)))?;
        let return_pc = state.pc()?;
        debug!("pushing <clinit> frame of {}", name);
        state.push_frame(crate::mem::frame::Frame::new(
            clinit.signature.clone(),
            code,
            return_pc,
        ));
    }
    Ok(must_exit)
}

fn collect_init_order(
    hier: &ClassHierarchy,
    state: &State,
    name: &str,
    out: &mut Vec<String>,
) -> Result<(), ExecError> {
    if state.klass(name).is_some() || out.iter().any(|n| n == name) {
        return Ok(());
    }
    let cf = hier.class_file(name)?;
    if let Some(superclass) = cf.superclass.clone() {
        collect_init_order(hier, state, &superclass, out)?;
    }
    for iface in cf.interfaces.clone() {
        if hier.class_file(&iface)?.has_nonabstract_methods() {
            collect_init_order(hier, state, &iface, out)?;
        }
    }
    out.push(name.to_owned());
    Ok(())
}

/// Widens small integral primitives to int, the form every load-like
/// bytecode leaves on the operand stack.
pub(crate) fn widen_small_value(calc: &Calculator, value: Value) -> Result<Value, ExecError> {
    match value {
        Value::Primitive(p) if p.ty().promotes_to_int() => {
            Ok(Value::Primitive(calc.widen(PrimitiveType::Int, &p)?))
        }
        other => Ok(other),
    }
}

/// Narrows an int back to the declared small integral type of a field or
/// array member before it is stored.
pub(crate) fn narrow_for_store(
    calc: &Calculator,
    descriptor: &str,
    value: Value,
) -> Result<Value, ExecError> {
    match (&value, crate::types::parse_type(descriptor)) {
        (Value::Primitive(p), Some(crate::types::TypeDesc::Primitive(m)))
            if m != p.ty() && m.promotes_to_int() =>
        {
            Ok(Value::Primitive(calc.narrow(m, p)?))
        }
        _ => Ok(value),
    }
}

/// Lifts a constant pool entry to a value; `None` for entry kinds that do
/// not denote a loadable constant.
pub(crate) fn cp_value(
    state: &mut State,
    ctx: &mut ExecutionContext,
    entry: &ConstPoolEntry,
) -> Option<Value> {
    match entry {
        ConstPoolEntry::Int(x) => Some(Value::Primitive(ctx.calc.val_int(*x))),
        ConstPoolEntry::Long(x) => Some(Value::Primitive(ctx.calc.val_long(*x))),
        ConstPoolEntry::Float(x) => Some(Value::Primitive(ctx.calc.val_float(*x))),
        ConstPoolEntry::Double(x) => Some(Value::Primitive(ctx.calc.val_double(*x))),
        ConstPoolEntry::Str(s) => Some(Value::Reference(
            state.reference_to_string_literal(ctx.hier, s),
        )),
        _ => None,
    }
}

/// What happens in each successor once a symbolic reference is resolved.
pub(crate) enum AfterResolution {
    /// Push the (now resolved) reference and advance past the bytecode.
    PushAndAdvance(usize),
    /// Leave pc and stack alone so the bytecode re-executes and observes
    /// the resolution.
    Reexecute,
}

/// Resolves a fresh symbolic reference by forking: one successor per
/// feasible alternative in the stable `{NULL, ALIASES, EXPANDS}` order.
/// Resolution rules and the heap scope prune candidates before the
/// decision procedure is consulted.
pub(crate) fn resolve_reference(
    state: &State,
    ctx: &mut ExecutionContext,
    sym: &Rc<SymbolicRef>,
    after: AfterResolution,
) -> Outcome {
    let mut alts: Vec<DecisionAlternative<RefAlternative>> = Vec::new();

    if ctx.rules.allows_null(&sym.origin) && ctx.dec.is_sat_null(sym)? {
        alts.push(DecisionAlternative::new(RefAlternative::Null, 0));
    }

    for (pos, obj) in state.heap().iter() {
        let target_origin = match obj.origin() {
            Some(o) => o,
            None => continue,
        };
        if !ctx.hier.is_assignable(obj.class_name(), &sym.static_type) {
            continue;
        }
        if !ctx.rules.allows_alias(&sym.origin, target_origin) {
            continue;
        }
        if ctx.dec.is_sat_aliases(sym, pos, obj)? {
            alts.push(DecisionAlternative::new(RefAlternative::Aliases(pos), 0));
        }
    }

    let expansion_classes: Vec<String> = if sym.static_type.starts_with('[') {
        vec![sym.static_type.clone()]
    } else {
        ctx.hier.compatible_expansions(&sym.static_type)
    };
    for class in expansion_classes {
        if !ctx.rules.allows_expansion(&sym.origin, &class) {
            continue;
        }
        let within_scope = ctx
            .heap_scope
            .get(&class)
            .map_or(true, |&cap| state.heap().count_of_class(&class) < cap);
        if !within_scope {
            continue;
        }
        if ctx.dec.is_sat_expands(sym, &class)? {
            alts.push(DecisionAlternative::new(RefAlternative::Expands(class), 0));
        }
    }

    sort_ref_alternatives(&mut alts);
    for (i, alt) in alts.iter_mut().enumerate() {
        alt.branch_number = i;
    }

    let hier = ctx.hier;
    let calc = ctx.calc;
    fork(state, alts, |child, alt| {
        match &alt.kind {
            RefAlternative::Null => {
                child.set_resolution(sym, None);
                child.push_clause(Clause::AssumeNull(sym.clone()));
            }
            RefAlternative::Aliases(pos) => {
                child.set_resolution(sym, Some(*pos));
                child.push_clause(Clause::AssumeAliases(sym.clone(), *pos));
            }
            RefAlternative::Expands(class) => {
                let pos = if let Some(member) = class.strip_prefix('[') {
                    let length = child.fresh_term(PrimitiveType::Int);
                    let nonneg = calc
                        .le(&calc.val_int(0), &length)
                        .map_err(ExecError::from)?;
                    child.push_clause(Clause::Assume(nonneg));
                    child
                        .heap_mut()
                        .alloc(Objekt::Array(Array::new_symbolic(member, length, &sym.origin)))
                } else {
                    child.allocate_symbolic_instance(hier, class, &sym.origin)
                };
                child.set_resolution(sym, Some(pos));
                child.push_clause(Clause::AssumeExpands(sym.clone(), class.clone()));
            }
        }
        match after {
            AfterResolution::PushAndAdvance(len) => {
                child.push(Value::Reference(Reference::Symbolic(sym.clone())))?;
                if child.inc_pc(len).is_err() {
                    child.create_throwable_and_throw(hier, VERIFY_ERROR);
                }
            }
            AfterResolution::Reexecute => {}
        }
        Ok(())
    })
}

/// Loads a value onto the operand stack, forking on the resolution of a
/// fresh symbolic reference and lifting constant-pool strings to interned
/// references.
pub(crate) fn load_value(
    state: &mut State,
    ctx: &mut ExecutionContext,
    value: Value,
    pc_offset: usize,
) -> Outcome {
    let value = match value {
        Value::ConstantPoolString(s) => {
            Value::Reference(state.reference_to_string_literal(ctx.hier, &s))
        }
        other => other,
    };
    if let Value::Reference(r) = &value {
        if let crate::mem::state::RefState::Unresolved(sym) = state.ref_state(r) {
            return resolve_reference(state, ctx, &sym, AfterResolution::PushAndAdvance(pc_offset));
        }
    }
    state.push(value)?;
    advance(state, ctx, pc_offset)?;
    Ok(vec![])
}
