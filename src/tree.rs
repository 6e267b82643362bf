use crate::value::HeapPos;

/// The two outcomes of a branch decision, in stable order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BranchAlternative {
    Taken,
    NotTaken,
}

/// One outcome of a switch selector decision: a case or the default,
/// cases in ascending branch order, default last.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SwitchAlternative {
    Case { value: i32, target: usize },
    Default { target: usize },
}

/// The two outcomes of an array index bounds decision.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArrayAccessAlternative {
    In,
    Out,
}

/// One outcome of resolving a symbolic reference.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RefAlternative {
    Null,
    Aliases(HeapPos),
    Expands(String),
}

impl RefAlternative {
    /// Stable emission order: null, then aliases by ascending heap
    /// position, then expansions in lexicographic class-name order. The
    /// order is observable through state identifiers.
    fn order_key(&self) -> (u8, HeapPos, &str) {
        match self {
            RefAlternative::Null => (0, 0, ""),
            RefAlternative::Aliases(pos) => (1, *pos, ""),
            RefAlternative::Expands(class) => (2, 0, class.as_str()),
        }
    }
}

pub fn sort_ref_alternatives(alts: &mut [DecisionAlternative<RefAlternative>]) {
    alts.sort_by(|a, b| {
        let (ka, pa, ca) = a.kind.order_key();
        let (kb, pb, cb) = b.kind.order_key();
        (ka, pa, ca).cmp(&(kb, pb, cb))
    });
}

/// One feasible outcome of a decision point. At most one alternative per
/// fork is the concrete-execution outcome, and it is tagged as such so the
/// runner can tell concrete from symbolic forks.
#[derive(Clone, Debug)]
pub struct DecisionAlternative<K> {
    pub kind: K,
    pub branch_number: usize,
    pub is_concrete: bool,
}

impl<K> DecisionAlternative<K> {
    pub fn new(kind: K, branch_number: usize) -> DecisionAlternative<K> {
        DecisionAlternative {
            kind,
            branch_number,
            is_concrete: false,
        }
    }

    pub fn concrete(mut self) -> Self {
        self.is_concrete = true;
        self
    }
}

/// The identifier letter of the `index`-th of `total` successors: a
/// two-way fork appends `L`/`R`, wider forks append `A`, `B`, ...
pub fn branch_letter(index: usize, total: usize) -> char {
    if total == 2 {
        ['L', 'R'][index]
    } else {
        (b'A' + index.min(25) as u8) as char
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_alternatives_sort_stably() {
        let mut alts = vec![
            DecisionAlternative::new(RefAlternative::Expands("b/B".to_owned()), 0),
            DecisionAlternative::new(RefAlternative::Aliases(9), 0),
            DecisionAlternative::new(RefAlternative::Expands("a/A".to_owned()), 0),
            DecisionAlternative::new(RefAlternative::Null, 0),
            DecisionAlternative::new(RefAlternative::Aliases(2), 0),
        ];
        sort_ref_alternatives(&mut alts);
        let kinds: Vec<_> = alts.into_iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RefAlternative::Null,
                RefAlternative::Aliases(2),
                RefAlternative::Aliases(9),
                RefAlternative::Expands("a/A".to_owned()),
                RefAlternative::Expands("b/B".to_owned()),
            ]
        );
    }

    #[test]
    fn two_way_forks_use_left_right() {
        assert_eq!(branch_letter(0, 2), 'L');
        assert_eq!(branch_letter(1, 2), 'R');
        assert_eq!(branch_letter(0, 3), 'A');
        assert_eq!(branch_letter(2, 3), 'C');
    }
}
