use std::rc::Rc;

use crate::bc::Code;
use crate::types::Signature;
use crate::value::Value;

/// The activation record of one method: operand stack, local variables,
/// shared bytecode, program counter and the pc execution resumes at in the
/// caller when this frame returns.
#[derive(Clone, Debug)]
pub struct Frame {
    method: Signature,
    code: Rc<Code>,
    pc: usize,
    return_pc: usize,
    locals: Vec<Option<Value>>,
    stack: Vec<Value>,
}

impl Frame {
    pub fn new(method: Signature, code: Rc<Code>, return_pc: usize) -> Frame {
        let locals = vec![None; code.max_locals];
        Frame {
            method,
            code,
            pc: 0,
            return_pc,
            locals,
            stack: Vec::new(),
        }
    }

    pub fn method(&self) -> &Signature {
        &self.method
    }

    pub fn code(&self) -> &Rc<Code> {
        &self.code
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    pub fn return_pc(&self) -> usize {
        self.return_pc
    }

    pub fn local(&self, slot: usize) -> Option<&Value> {
        self.locals.get(slot).and_then(|v| v.as_ref())
    }

    /// Writes a local slot. A category-2 value invalidates the following
    /// slot, matching the two-slot layout of the hosted VM.
    pub fn set_local(&mut self, slot: usize, value: Value) -> bool {
        if slot >= self.locals.len() {
            return false;
        }
        let cat2 = value.is_category2();
        self.locals[slot] = Some(value);
        if cat2 {
            if slot + 1 >= self.locals.len() {
                return false;
            }
            self.locals[slot + 1] = None;
        }
        true
    }

    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    /// The `n`-th value from the top of the operand stack, 0 being the top.
    pub fn top_n(&self, n: usize) -> Option<&Value> {
        let len = self.stack.len();
        if n < len {
            self.stack.get(len - 1 - n)
        } else {
            None
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Lit, Primitive};

    fn frame() -> Frame {
        let code = Rc::new(Code {
            max_locals: 4,
            bytecode: vec![0x00].into(),
            handlers: Vec::new(),
        });
        Frame::new(Signature::new("a/A", "()V", "m"), code, 0)
    }

    #[test]
    fn category2_locals_take_two_slots() {
        let mut f = frame();
        assert!(f.set_local(0, Value::Primitive(Primitive::simplex(Lit::Long(1)))));
        assert!(f.set_local(2, Value::Primitive(Primitive::simplex(Lit::Int(2)))));
        assert!(f.local(0).is_some());
        assert!(f.local(1).is_none());
        // A category-2 value in the last slot has no room for its pair.
        assert!(!f.set_local(3, Value::Primitive(Primitive::simplex(Lit::Double(0.0)))));
    }

    #[test]
    fn operand_stack_order() {
        let mut f = frame();
        f.push(Value::Primitive(Primitive::simplex(Lit::Int(1))));
        f.push(Value::Primitive(Primitive::simplex(Lit::Int(2))));
        assert_eq!(
            f.top_n(0),
            Some(&Value::Primitive(Primitive::simplex(Lit::Int(2))))
        );
        assert_eq!(
            f.top_n(1),
            Some(&Value::Primitive(Primitive::simplex(Lit::Int(1))))
        );
        assert!(f.top_n(2).is_none());
        assert_eq!(f.pop(), Some(Value::Primitive(Primitive::simplex(Lit::Int(2)))));
    }
}
