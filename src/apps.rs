//! State formatters: a human-readable text rendering and a Graphviz DOT
//! rendering of the heap, with objects as nodes, fields as labeled edges
//! and `null` as a shared sink node.

use std::fmt::Write as _;

use crate::mem::objekt::Objekt;
use crate::mem::state::{RefState, State};
use crate::value::{Reference, Value};

pub trait StateFormatter {
    fn format(&mut self, state: &State) -> String;
}

/// Renders the frames, the path condition, the heap and the static area
/// of a state as indented text.
#[derive(Default)]
pub struct TextFormatter;

impl StateFormatter for TextFormatter {
    fn format(&mut self, state: &State) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "state {}[{}] depth={}{}",
            state.identifier(),
            state.sequence_number(),
            state.depth(),
            match state.stuck() {
                None => String::new(),
                Some(s) => format!(" stuck={:?}", s),
            }
        );
        let _ = writeln!(out, "  path condition: {}", state.path_condition());
        for (i, frame) in state.frames().iter().enumerate().rev() {
            let _ = writeln!(
                out,
                "  frame {}: {} pc={}",
                i,
                frame.method(),
                frame.pc()
            );
            let stack: Vec<String> = frame.stack().iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "    stack: [{}]", stack.join(", "));
        }
        let _ = writeln!(out, "  heap:");
        for (pos, obj) in state.heap().iter() {
            match obj {
                Objekt::Instance(inst) => {
                    let fields: Vec<String> = inst
                        .field_signatures()
                        .filter_map(|sig| {
                            inst.field_value(sig).map(|v| format!("{}={}", sig.name, v))
                        })
                        .collect();
                    let _ = writeln!(
                        out,
                        "    @{}: {} {{{}}}",
                        pos,
                        inst.class_name,
                        fields.join(", ")
                    );
                }
                Objekt::Array(arr) => {
                    let entries: Vec<String> = arr
                        .entries()
                        .map(|(i, v)| format!("[{}]={}", i, v))
                        .collect();
                    let _ = writeln!(
                        out,
                        "    @{}: {} length={} {{{}}}",
                        pos,
                        arr.class_name,
                        arr.length(),
                        entries.join(", ")
                    );
                }
            }
        }
        for (name, klass) in state.static_area() {
            let fields: Vec<String> = klass
                .field_signatures()
                .filter_map(|sig| klass.field_value(sig).map(|v| format!("{}={}", sig.name, v)))
                .collect();
            let _ = writeln!(out, "  static {}: {{{}}}", name, fields.join(", "));
        }
        out
    }
}

/// Renders the heap of a state as a directed graph.
#[derive(Default)]
pub struct GraphvizFormatter {
    next_fresh: usize,
}

impl GraphvizFormatter {
    fn fresh(&mut self) -> usize {
        let n = self.next_fresh;
        self.next_fresh += 1;
        n
    }
}

impl StateFormatter for GraphvizFormatter {
    fn format(&mut self, state: &State) -> String {
        self.next_fresh = 0;
        let mut nodes = String::new();
        let mut edges = String::new();
        let mut has_null = false;

        for (pos, obj) in state.heap().iter() {
            let node_name = format!("H{}", pos);
            let mut label = format!("{}:{}", pos, obj.class_name());
            match obj {
                Objekt::Instance(inst) => {
                    for sig in inst.field_signatures() {
                        let value = match inst.field_value(sig) {
                            Some(v) => v,
                            None => continue,
                        };
                        match value {
                            Value::Reference(r) => {
                                let (target, decoration) =
                                    self.edge_target(state, r, &mut nodes, &mut has_null);
                                let _ = write!(
                                    edges,
                                    "{}->{}[label=\"{}{}\"];",
                                    node_name, target, sig.name, decoration
                                );
                            }
                            other => {
                                label.push_str(&format!("\\n{} = {}", sig.name, other));
                            }
                        }
                    }
                }
                Objekt::Array(arr) => {
                    label.push_str(&format!("\\nlength = {}", arr.length()));
                    for (index, value) in arr.entries() {
                        match value {
                            Value::Reference(r) => {
                                let (target, decoration) =
                                    self.edge_target(state, r, &mut nodes, &mut has_null);
                                let _ = write!(
                                    edges,
                                    "{}->{}[label=\"[{}]{}\"];",
                                    node_name, target, index, decoration
                                );
                            }
                            other => {
                                label.push_str(&format!("\\n[{}] = {}", index, other));
                            }
                        }
                    }
                }
            }
            let _ = write!(nodes, "{}[shape=box,label=\"{}\"];", node_name, label);
        }

        let mut out = format!(
            "digraph \"{}[{}]\" {{ ",
            state.identifier(),
            state.sequence_number()
        );
        if has_null {
            out.push_str("NULL[shape=invtriangle,label=\"null\",regular=true];");
        }
        out.push_str(&nodes);
        out.push_str(&edges);
        out.push_str(" }");
        out
    }
}

impl GraphvizFormatter {
    /// The node an edge for `r` points at; unresolved references get a
    /// fresh invisible `?` node, null edges share the single sink.
    fn edge_target(
        &mut self,
        state: &State,
        r: &Reference,
        nodes: &mut String,
        has_null: &mut bool,
    ) -> (String, String) {
        match state.ref_state(r) {
            RefState::Null => {
                *has_null = true;
                ("NULL".to_owned(), String::new())
            }
            RefState::Object(pos) => {
                let decoration = match r {
                    Reference::Symbolic(sym) => format!(" {}", sym.origin),
                    _ => String::new(),
                };
                (format!("H{}", pos), decoration)
            }
            RefState::Unresolved(sym) => {
                let name = format!("I{}", self.fresh());
                let _ = write!(nodes, "{}[label=\"?\",style=invis];", name);
                (name, format!(" {}", sym.origin))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bc::{ClassFileBuilder, ClassHierarchy};

    fn state_with_objects() -> (ClassHierarchy, State) {
        let mut hier = ClassHierarchy::new();
        hier.add_class(ClassFileBuilder::new("java/lang/Object").no_superclass().build());
        hier.add_class(
            ClassFileBuilder::new("pkg/Node")
                .field("next", "Lpkg/Node;")
                .field("value", "I")
                .build(),
        );
        let mut state = State::new();
        let a = state.allocate_instance(&hier, "pkg/Node");
        let b = state.allocate_instance(&hier, "pkg/Node");
        let next = crate::types::Signature::new("pkg/Node", "Lpkg/Node;", "next");
        if let Some(inst) = state.heap_mut().get_mut(a).and_then(Objekt::as_instance_mut) {
            inst.set_field(&next, Value::Reference(Reference::Concrete(b)));
        }
        (hier, state)
    }

    #[test]
    fn graphviz_links_objects_and_null() {
        let (_, state) = state_with_objects();
        let dot = GraphvizFormatter::default().format(&state);
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("H0->H1[label=\"next\"]"));
        // The unlinked next field of the second node points at null.
        assert!(dot.contains("NULL[shape=invtriangle"));
        assert!(dot.contains("H1->NULL"));
    }

    #[test]
    fn text_formatter_mentions_every_object() {
        let (_, state) = state_with_objects();
        let text = TextFormatter.format(&state);
        assert!(text.contains("@0: pkg/Node"));
        assert!(text.contains("@1: pkg/Node"));
        assert!(text.contains("path condition:"));
    }
}
