use std::fmt;
use std::rc::Rc;

use crate::value::{HeapPos, Primitive, SymbolicRef};

/// One clause of a path condition.
#[derive(Clone, Debug)]
pub enum Clause {
    /// A boolean primitive assumed to hold.
    Assume(Primitive),
    /// A symbolic reference assumed to resolve to null.
    AssumeNull(Rc<SymbolicRef>),
    /// A symbolic reference assumed to alias the object at a heap position.
    AssumeAliases(Rc<SymbolicRef>, HeapPos),
    /// A symbolic reference assumed to expand to a fresh object of a class.
    AssumeExpands(Rc<SymbolicRef>, String),
    AssumeClassInitialized(String),
    AssumeClassNotInitialized(String),
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Clause::Assume(p) => write!(f, "{}", p),
            Clause::AssumeNull(r) => write!(f, "{} == null", r.origin),
            Clause::AssumeAliases(r, pos) => write!(f, "{} aliases @{}", r.origin, pos),
            Clause::AssumeExpands(r, class) => write!(f, "{} expands to {}", r.origin, class),
            Clause::AssumeClassInitialized(c) => write!(f, "pre_init({})", c),
            Clause::AssumeClassNotInitialized(c) => write!(f, "!pre_init({})", c),
        }
    }
}

/// The accumulated assumptions along one path, append-only. Clones
/// duplicate the list eagerly.
#[derive(Clone, Debug, Default)]
pub struct PathCondition {
    clauses: Vec<Clause>,
}

impl PathCondition {
    pub fn new() -> PathCondition {
        PathCondition::default()
    }

    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl fmt::Display for PathCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, c) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " && ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
