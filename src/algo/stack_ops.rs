use crate::algo::{advance, opcodes::*, throw_verify_error, ExecutionContext, Outcome};
use crate::mem::state::State;
use crate::value::Value;

/// Operand-stack shuffling bytecodes: schema (a). The dup/pop family obeys
/// the category rules: a `long` or `double` counts as one category-2 value
/// where narrower values come in pairs.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let ok = shuffle(op, state);
    if !ok {
        return throw_verify_error(state, ctx);
    }
    advance(state, ctx, 1)?;
    Ok(vec![])
}

fn shuffle(op: u8, state: &mut State) -> bool {
    match op {
        POP => pop_cat1(state).is_some(),
        POP2 => pop_group(state).is_some(),
        DUP => match top_cat1(state) {
            Some(v) => {
                push(state, v);
                true
            }
            None => false,
        },
        DUP_X1 => {
            let (v1, v2) = match (pop_cat1(state), pop_cat1(state)) {
                (Some(v1), Some(v2)) => (v1, v2),
                _ => return false,
            };
            push(state, v1.clone());
            push(state, v2);
            push(state, v1);
            true
        }
        DUP_X2 => {
            let v1 = match pop_cat1(state) {
                Some(v) => v,
                None => return false,
            };
            let below = match pop_group(state) {
                Some(g) => g,
                None => return false,
            };
            push(state, v1.clone());
            push_group(state, below);
            push(state, v1);
            true
        }
        DUP2 => {
            let group = match pop_group(state) {
                Some(g) => g,
                None => return false,
            };
            push_group(state, group.clone());
            push_group(state, group);
            true
        }
        DUP2_X1 => {
            let group = match pop_group(state) {
                Some(g) => g,
                None => return false,
            };
            let w = match pop_cat1(state) {
                Some(w) => w,
                None => return false,
            };
            push_group(state, group.clone());
            push(state, w);
            push_group(state, group);
            true
        }
        DUP2_X2 => {
            let group = match pop_group(state) {
                Some(g) => g,
                None => return false,
            };
            let below = match pop_group(state) {
                Some(g) => g,
                None => return false,
            };
            push_group(state, group.clone());
            push_group(state, below);
            push_group(state, group);
            true
        }
        SWAP => {
            let (v1, v2) = match (pop_cat1(state), pop_cat1(state)) {
                (Some(v1), Some(v2)) => (v1, v2),
                _ => return false,
            };
            push(state, v1);
            push(state, v2);
            true
        }
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

fn push(state: &mut State, v: Value) {
    // The current frame exists: every caller just popped from it.
    let _ = state.push(v);
}

fn top_cat1(state: &State) -> Option<Value> {
    let v = state.top().ok()?;
    if v.is_category2() {
        None
    } else {
        Some(v.clone())
    }
}

fn pop_cat1(state: &mut State) -> Option<Value> {
    if top_cat1(state).is_none() {
        return None;
    }
    state.pop().ok()
}

/// Pops one category-2 value or a pair of category-1 values; the returned
/// group pushes back in original order.
fn pop_group(state: &mut State) -> Option<Vec<Value>> {
    let top = state.top().ok()?.clone();
    if top.is_category2() {
        state.pop().ok()?;
        Some(vec![top])
    } else {
        let v1 = state.pop().ok()?;
        let v2 = match pop_cat1(state) {
            Some(v) => v,
            None => {
                // Restore and fail: the pair is malformed.
                let _ = state.push(v1);
                return None;
            }
        };
        Some(vec![v2, v1])
    }
}

fn push_group(state: &mut State, group: Vec<Value>) {
    for v in group {
        push(state, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Lit, Primitive};
    use std::rc::Rc;

    fn state_with(values: Vec<Value>) -> State {
        let mut s = State::new();
        let code = Rc::new(crate::bc::Code {
            max_locals: 0,
            bytecode: vec![0x00, 0x00].into(),
            handlers: Vec::new(),
        });
        s.push_frame(crate::mem::frame::Frame::new(
            crate::types::Signature::new("a/A", "()V", "m"),
            code,
            0,
        ));
        for v in values {
            s.push(v).unwrap();
        }
        s
    }

    fn int(x: i32) -> Value {
        Value::Primitive(Primitive::simplex(Lit::Int(x)))
    }

    fn long(x: i64) -> Value {
        Value::Primitive(Primitive::simplex(Lit::Long(x)))
    }

    #[test]
    fn dup_x1_reorders() {
        let mut s = state_with(vec![int(2), int(1)]);
        assert!(shuffle(DUP_X1, &mut s));
        let f = s.current_frame().unwrap();
        assert_eq!(f.stack(), &[int(1), int(2), int(1)]);
    }

    #[test]
    fn dup2_duplicates_a_long_or_a_pair() {
        let mut s = state_with(vec![long(7)]);
        assert!(shuffle(DUP2, &mut s));
        assert_eq!(s.current_frame().unwrap().stack(), &[long(7), long(7)]);

        let mut s = state_with(vec![int(1), int(2)]);
        assert!(shuffle(DUP2, &mut s));
        assert_eq!(
            s.current_frame().unwrap().stack(),
            &[int(1), int(2), int(1), int(2)]
        );
    }

    #[test]
    fn pop2_removes_one_long() {
        let mut s = state_with(vec![int(5), long(7)]);
        assert!(shuffle(POP2, &mut s));
        assert_eq!(s.current_frame().unwrap().stack(), &[int(5)]);
    }

    #[test]
    fn dup_rejects_category2() {
        let mut s = state_with(vec![long(7)]);
        assert!(!shuffle(DUP, &mut s));
    }

    #[test]
    fn swap_swaps() {
        let mut s = state_with(vec![int(1), int(2)]);
        assert!(shuffle(SWAP, &mut s));
        assert_eq!(s.current_frame().unwrap().stack(), &[int(2), int(1)]);
    }
}
