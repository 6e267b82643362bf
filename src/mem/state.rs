use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::bc::ClassHierarchy;
use crate::mem::frame::Frame;
use crate::mem::heap::Heap;
use crate::mem::objekt::{Instance, Klass, Objekt};
use crate::mem::path::{Clause, PathCondition};
use crate::types::{parse_type, PrimitiveType, Signature, TypeDesc};
use crate::value::{
    default_value, HeapPos, Primitive, Reference, SymbolId, SymbolicRef, Value,
};

pub const STRING_CLASS: &str = "java/lang/String";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid program counter")]
    InvalidProgramCounter,
    #[error("thread stack is empty")]
    ThreadStackEmpty,
    #[error("operand stack is empty")]
    OperandStackEmpty,
    #[error("invalid local variable slot {0}")]
    InvalidSlot(usize),
    #[error("no object at heap position {0}")]
    InvalidHeapPosition(HeapPos),
    #[error("no static area entry for {0}")]
    NoKlass(String),
}

/// The terminal status of a state.
#[derive(Clone, Debug)]
pub enum Stuck {
    /// Normal completion of the root frame, with the returned value if any.
    Return(Option<Value>),
    /// An exception propagated out of the root frame.
    Exception(Reference),
    /// An instruction the engine does not model.
    Unsupported(u8),
}

/// The view of a reference after consulting the state's resolutions.
#[derive(Clone, Debug)]
pub enum RefState {
    Null,
    Object(HeapPos),
    Unresolved(std::rc::Rc<SymbolicRef>),
}

/// A symbolic execution state: heap, static area, thread stack, path
/// condition and flags. Forks deep-clone the whole aggregate; primitive
/// values inside are shared by reference count since they are immutable.
#[derive(Clone, Debug)]
pub struct State {
    identifier: String,
    sequence_number: u64,
    depth: usize,
    wide: bool,
    stuck: Option<Stuck>,
    heap: Heap,
    static_area: BTreeMap<String, Klass>,
    frames: Vec<Frame>,
    path: PathCondition,
    /// Decided resolutions of symbolic references: `None` is null.
    resolutions: HashMap<SymbolId, Option<HeapPos>>,
    string_literals: HashMap<String, HeapPos>,
    next_symbol: SymbolId,
}

impl State {
    pub fn new() -> State {
        State {
            identifier: String::new(),
            sequence_number: 0,
            depth: 0,
            wide: false,
            stuck: None,
            heap: Heap::new(),
            static_area: BTreeMap::new(),
            frames: Vec::new(),
            path: PathCondition::new(),
            resolutions: HashMap::new(),
            string_literals: HashMap::new(),
            next_symbol: 0,
        }
    }

    // Flags, identifier, counters.

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn bump_sequence_number(&mut self) {
        self.sequence_number += 1;
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Records a fork choice: one letter on the identifier, one more level
    /// of depth.
    pub fn append_branch(&mut self, letter: char) {
        self.identifier.push(letter);
        self.depth += 1;
    }

    pub fn set_wide(&mut self) {
        self.wide = true;
    }

    /// Reads and clears the one-shot wide flag.
    pub fn take_wide(&mut self) -> bool {
        std::mem::replace(&mut self.wide, false)
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck.is_some()
    }

    pub fn stuck(&self) -> Option<&Stuck> {
        self.stuck.as_ref()
    }

    pub fn set_stuck(&mut self, stuck: Stuck) {
        self.stuck = Some(stuck);
    }

    // Thread stack.

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn current_frame(&self) -> Result<&Frame, StateError> {
        self.frames.last().ok_or(StateError::ThreadStackEmpty)
    }

    pub fn current_frame_mut(&mut self) -> Result<&mut Frame, StateError> {
        self.frames.last_mut().ok_or(StateError::ThreadStackEmpty)
    }

    pub fn current_method(&self) -> Result<&Signature, StateError> {
        Ok(self.current_frame()?.method())
    }

    /// The bytecode at `pc + offset` in the current frame.
    pub fn instruction(&self, offset: usize) -> Result<u8, StateError> {
        let frame = self.current_frame()?;
        frame
            .code()
            .bytecode
            .get(frame.pc() + offset)
            .copied()
            .ok_or(StateError::InvalidProgramCounter)
    }

    pub fn pc(&self) -> Result<usize, StateError> {
        Ok(self.current_frame()?.pc())
    }

    /// Advances the current frame's pc past the current instruction.
    pub fn inc_pc(&mut self, delta: usize) -> Result<(), StateError> {
        let frame = self.current_frame_mut()?;
        let new_pc = frame.pc() + delta;
        if new_pc >= frame.code().bytecode.len() {
            return Err(StateError::InvalidProgramCounter);
        }
        frame.set_pc(new_pc);
        Ok(())
    }

    /// Jumps the current frame's pc to an absolute target.
    pub fn jump_pc(&mut self, target: usize) -> Result<(), StateError> {
        let frame = self.current_frame_mut()?;
        if target >= frame.code().bytecode.len() {
            return Err(StateError::InvalidProgramCounter);
        }
        frame.set_pc(target);
        Ok(())
    }

    // Operand stack of the current frame.

    pub fn push(&mut self, value: Value) -> Result<(), StateError> {
        self.current_frame_mut()?.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, StateError> {
        self.current_frame_mut()?
            .pop()
            .ok_or(StateError::OperandStackEmpty)
    }

    pub fn top(&self) -> Result<&Value, StateError> {
        self.current_frame()?
            .top_n(0)
            .ok_or(StateError::OperandStackEmpty)
    }

    pub fn top_n(&self, n: usize) -> Result<&Value, StateError> {
        self.current_frame()?
            .top_n(n)
            .ok_or(StateError::OperandStackEmpty)
    }

    // Heap and static area.

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn klass(&self, class_name: &str) -> Option<&Klass> {
        self.static_area.get(class_name)
    }

    pub fn klass_mut(&mut self, class_name: &str) -> Option<&mut Klass> {
        self.static_area.get_mut(class_name)
    }

    pub fn add_klass(&mut self, klass: Klass) {
        self.static_area.insert(klass.class_name.clone(), klass);
    }

    pub fn static_area(&self) -> impl Iterator<Item = (&String, &Klass)> {
        self.static_area.iter()
    }

    // Path condition.

    pub fn path_condition(&self) -> &PathCondition {
        &self.path
    }

    pub fn push_clause(&mut self, clause: Clause) {
        self.path.push(clause);
    }

    // Symbol allocation.

    pub fn fresh_symbol(&mut self) -> SymbolId {
        let id = self.next_symbol;
        self.next_symbol += 1;
        id
    }

    pub fn fresh_term(&mut self, ty: PrimitiveType) -> Primitive {
        Primitive::term(ty, self.fresh_symbol())
    }

    pub fn fresh_symbolic_ref(&mut self, origin: &str, static_type: &str) -> Reference {
        let id = self.fresh_symbol();
        Reference::symbolic(id, origin, static_type)
    }

    /// A fresh symbolic value fitting the given field descriptor.
    pub fn fresh_value_for(&mut self, descriptor: &str, origin: &str) -> Value {
        match parse_type(descriptor) {
            Some(TypeDesc::Primitive(p)) => Value::Primitive(self.fresh_term(p)),
            Some(t) => {
                let static_type = t.class_name().unwrap_or_default();
                Value::Reference(self.fresh_symbolic_ref(origin, &static_type))
            }
            None => Value::Reference(self.fresh_symbolic_ref(origin, "java/lang/Object")),
        }
    }

    // Symbolic reference resolution.

    pub fn is_resolved(&self, r: &SymbolicRef) -> bool {
        self.resolutions.contains_key(&r.id)
    }

    pub fn resolution(&self, r: &SymbolicRef) -> Option<Option<HeapPos>> {
        self.resolutions.get(&r.id).copied()
    }

    pub fn set_resolution(&mut self, r: &SymbolicRef, target: Option<HeapPos>) {
        self.resolutions.insert(r.id, target);
    }

    /// The effective state of a reference under the current resolutions.
    pub fn ref_state(&self, r: &Reference) -> RefState {
        match r {
            Reference::Null => RefState::Null,
            Reference::Concrete(pos) => RefState::Object(*pos),
            Reference::Symbolic(sym) => match self.resolution(sym) {
                Some(Some(pos)) => RefState::Object(pos),
                Some(None) => RefState::Null,
                None => RefState::Unresolved(sym.clone()),
            },
        }
    }

    // Object allocation.

    /// Allocates an instance of `class_name` with default-valued fields.
    /// Classes the hierarchy does not know get an empty field list; this
    /// keeps modeled throwables usable without a full library model.
    pub fn allocate_instance(&mut self, hier: &ClassHierarchy, class_name: &str) -> HeapPos {
        let fields = self.default_fields(hier, class_name);
        self.heap
            .alloc(Objekt::Instance(Instance::new(class_name, fields)))
    }

    /// Allocates the expansion of a symbolic reference: an instance whose
    /// every field holds a fresh symbolic value with a derived origin.
    pub fn allocate_symbolic_instance(
        &mut self,
        hier: &ClassHierarchy,
        class_name: &str,
        origin: &str,
    ) -> HeapPos {
        let sigs = hier
            .instance_field_signatures(class_name)
            .unwrap_or_default();
        let mut fields = BTreeMap::new();
        for sig in sigs {
            let field_origin = format!("{}.{}", origin, sig.name);
            let value = self.fresh_value_for(&sig.descriptor, &field_origin);
            fields.insert(sig, value);
        }
        let mut inst = Instance::new(class_name, fields);
        inst.origin = Some(origin.to_owned());
        self.heap.alloc(Objekt::Instance(inst))
    }

    fn default_fields(
        &self,
        hier: &ClassHierarchy,
        class_name: &str,
    ) -> BTreeMap<Signature, Value> {
        let mut fields = BTreeMap::new();
        if let Ok(sigs) = hier.instance_field_signatures(class_name) {
            for sig in sigs {
                let value = parse_type(&sig.descriptor)
                    .map(|t| default_value(&t))
                    .unwrap_or(Value::Reference(Reference::Null));
                fields.insert(sig, value);
            }
        }
        fields
    }

    /// Interns a string literal: returns the existing reference for an
    /// equal literal or allocates a fresh immutable string instance.
    pub fn reference_to_string_literal(
        &mut self,
        hier: &ClassHierarchy,
        literal: &str,
    ) -> Reference {
        if let Some(&pos) = self.string_literals.get(literal) {
            return Reference::Concrete(pos);
        }
        let fields = self.default_fields(hier, STRING_CLASS);
        let mut inst = Instance::new(STRING_CLASS, fields);
        inst.string_literal = Some(literal.to_owned());
        let pos = self.heap.alloc(Objekt::Instance(inst));
        self.string_literals.insert(literal.to_owned(), pos);
        Reference::Concrete(pos)
    }

    // Modeled exceptions.

    /// Allocates a throwable of `class_name` and throws it.
    pub fn create_throwable_and_throw(&mut self, hier: &ClassHierarchy, class_name: &str) {
        let pos = self.allocate_instance(hier, class_name);
        self.throw_reference(hier, Reference::Concrete(pos));
    }

    /// Walks the frame stack for a matching handler, unwinding frames while
    /// none matches; with the stack empty the state goes stuck with an
    /// uncaught exception.
    pub fn throw_reference(&mut self, hier: &ClassHierarchy, exception: Reference) {
        let thrown_class = match self.ref_state(&exception) {
            RefState::Object(pos) => self
                .heap
                .get(pos)
                .map(|o| o.class_name().to_owned())
                .unwrap_or_default(),
            _ => String::new(),
        };
        loop {
            let handler_pc = match self.frames.last() {
                None => {
                    self.stuck = Some(Stuck::Exception(exception));
                    return;
                }
                Some(frame) => {
                    let pc = frame.pc();
                    frame
                        .code()
                        .handlers
                        .iter()
                        .find(|h| {
                            h.start_pc <= pc
                                && pc < h.end_pc
                                && match &h.catch_type {
                                    None => true,
                                    Some(ct) => hier.is_subclass(&thrown_class, ct),
                                }
                        })
                        .map(|h| h.handler_pc)
                }
            };
            match handler_pc {
                Some(target) => {
                    let frame = self.frames.last_mut().expect("frame checked above");
                    frame.clear_stack();
                    frame.push(Value::Reference(exception));
                    frame.set_pc(target);
                    return;
                }
                None => {
                    self.frames.pop();
                }
            }
        }
    }
}

impl Default for State {
    fn default() -> State {
        State::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bc::{ClassFileBuilder, ExceptionHandler};
    use crate::value::Lit;
    use std::rc::Rc;

    fn hier() -> ClassHierarchy {
        let mut h = ClassHierarchy::new();
        h.add_class(ClassFileBuilder::new("java/lang/Object").no_superclass().build());
        h.add_class(ClassFileBuilder::new("java/lang/Exception").build());
        h.add_class(
            ClassFileBuilder::new("java/lang/ArithmeticException")
                .superclass("java/lang/Exception")
                .build(),
        );
        h
    }

    fn frame_with(bytecode: Vec<u8>, handlers: Vec<ExceptionHandler>) -> Frame {
        let code = Rc::new(crate::bc::Code {
            max_locals: 2,
            bytecode: bytecode.into(),
            handlers,
        });
        Frame::new(Signature::new("a/A", "()V", "m"), code, 0)
    }

    #[test]
    fn pc_bounds_are_checked() {
        let mut s = State::new();
        s.push_frame(frame_with(vec![0x00, 0x00, 0x00], Vec::new()));
        assert!(s.inc_pc(2).is_ok());
        assert!(matches!(s.inc_pc(1), Err(StateError::InvalidProgramCounter)));
        assert!(matches!(s.instruction(4), Err(StateError::InvalidProgramCounter)));
    }

    #[test]
    fn throw_finds_matching_handler() {
        let h = hier();
        let mut s = State::new();
        let handlers = vec![ExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 3,
            catch_type: Some("java/lang/Exception".to_owned()),
        }];
        s.push_frame(frame_with(vec![0x00; 5], handlers));
        s.push(Value::Primitive(Primitive::simplex(Lit::Int(9)))).unwrap();
        s.create_throwable_and_throw(&h, "java/lang/ArithmeticException");
        assert!(!s.is_stuck());
        let f = s.current_frame().unwrap();
        assert_eq!(f.pc(), 3);
        // The operand stack holds only the thrown reference.
        assert_eq!(f.stack_len(), 1);
        assert!(matches!(
            f.top_n(0),
            Some(Value::Reference(Reference::Concrete(_)))
        ));
    }

    #[test]
    fn uncaught_exception_unwinds_to_stuck() {
        let h = hier();
        let mut s = State::new();
        s.push_frame(frame_with(vec![0x00; 4], Vec::new()));
        s.push_frame(frame_with(vec![0x00; 4], Vec::new()));
        s.create_throwable_and_throw(&h, "java/lang/ArithmeticException");
        assert!(matches!(s.stuck(), Some(Stuck::Exception(_))));
        assert!(s.frames().is_empty());
    }

    #[test]
    fn string_literals_are_interned() {
        let h = hier();
        let mut s = State::new();
        let a = s.reference_to_string_literal(&h, "hello");
        let b = s.reference_to_string_literal(&h, "hello");
        let c = s.reference_to_string_literal(&h, "world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(s.heap().len(), 2);
    }

    #[test]
    fn clones_are_independent() {
        let h = hier();
        let mut parent = State::new();
        parent.push_frame(frame_with(vec![0x00; 4], Vec::new()));
        let pos = parent.allocate_instance(&h, "java/lang/Exception");
        let mut child = parent.clone();

        child.push(Value::Primitive(Primitive::simplex(Lit::Int(1)))).unwrap();
        child.push_clause(Clause::AssumeClassInitialized("x/Y".to_owned()));
        child.heap_mut().alloc(Objekt::Instance(Instance::new("a/B", BTreeMap::new())));

        assert_eq!(parent.current_frame().unwrap().stack_len(), 0);
        assert!(parent.path_condition().is_empty());
        assert!(parent.heap().get(pos).is_some());
        assert_eq!(parent.heap().len(), 1);
        assert_eq!(child.heap().len(), 2);
    }

    #[test]
    fn wide_flag_is_one_shot() {
        let mut s = State::new();
        s.set_wide();
        assert!(s.take_wide());
        assert!(!s.take_wide());
    }
}
