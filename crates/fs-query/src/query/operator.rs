//! Inner terms combining two subterms with `&&` or `||`.

use std::fmt;

use super::term::TermId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub fn complement(self) -> Self {
        match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A binary `&&`/`||` node. Children live in the same term arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operator {
    combinator: Combinator,
    left: TermId,
    right: TermId,
}

impl Operator {
    pub(crate) fn new(left: TermId, combinator: Combinator, right: TermId) -> Self {
        Self {
            combinator,
            left,
            right,
        }
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn left(&self) -> TermId {
        self.left
    }

    pub fn right(&self) -> TermId {
        self.right
    }

    /// Flips `&&` and `||`; the children are complemented by the caller.
    pub(crate) fn complement(&mut self) {
        self.combinator = self.combinator.complement();
    }

    /// The sibling of `child`, or `None` if `child` is not a child of this node.
    pub(crate) fn other_child(&self, child: TermId) -> Option<TermId> {
        if child == self.right {
            Some(self.left)
        } else if child == self.left {
            Some(self.right)
        } else {
            None
        }
    }

    /// `&&` is as selective as its best child, `||` only as its worst.
    pub fn combine_scores(&self, left: i32, right: i32) -> i32 {
        match self.combinator {
            Combinator::And => left.max(right),
            Combinator::Or => left.min(right),
        }
    }

    /// Evaluation order of an `||`: the lower-scored child goes first, the
    /// right child on a tie.
    pub(crate) fn or_order(&self, left_score: i32, right_score: i32) -> (TermId, TermId) {
        if right_score > left_score {
            (self.left, self.right)
        } else {
            (self.right, self.left)
        }
    }

    /// The child an `&&` scan follows: the higher-scored one, the left on a tie.
    pub(crate) fn preferred_child(&self, left_score: i32, right_score: i32) -> TermId {
        if right_score > left_score {
            self.right
        } else {
            self.left
        }
    }
}
