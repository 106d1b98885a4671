//! Term arena and the walks shared by evaluation, planning, and printing.
//!
//! Terms are stored in a flat arena and refer to each other by [`TermId`].
//! Every term except the root records its parent so an equation can climb to
//! the root and re-check its `&&` siblings.

use std::fmt;

use crate::error::{QueryError, Result};
use crate::policy::{Entry, Index, Node};
use crate::types::{MatchResult, TypeCode};

use super::equation::Equation;
use super::operator::{Combinator, Operator};

/// Position of a term inside a [`TermTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TermId(u32);

impl TermId {
    #[inline]
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index < u32::MAX as usize, "term index out of range");
        Self(index as u32)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// An attribute value supplied by a live update instead of being read from
/// the node. `key` is `None` when the attribute does not exist (any more).
#[derive(Debug, Clone, Copy)]
pub struct LiveAttribute<'a> {
    pub name: &'a str,
    pub type_code: TypeCode,
    pub key: Option<&'a [u8]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Equation(Equation),
    Operator(Operator),
}

#[derive(Debug, Clone, PartialEq)]
struct TermSlot {
    term: Term,
    parent: Option<TermId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermTree {
    slots: Vec<TermSlot>,
}

impl TermTree {
    pub(crate) fn push_equation(&mut self, equation: Equation) -> TermId {
        let id = TermId::new(self.slots.len());
        self.slots.push(TermSlot {
            term: Term::Equation(equation),
            parent: None,
        });
        id
    }

    /// Adds `left combinator right` and adopts both children.
    pub(crate) fn push_operator(
        &mut self,
        left: TermId,
        combinator: Combinator,
        right: TermId,
    ) -> Result<TermId> {
        let id = TermId::new(self.slots.len());
        for child in [left, right] {
            let slot = self
                .slots
                .get_mut(child.get())
                .ok_or_else(|| QueryError::CorruptTree(format!("no term {}", child.get())))?;
            if slot.parent.is_some() {
                return Err(QueryError::CorruptTree(format!(
                    "term {} already has a parent",
                    child.get()
                )));
            }
            slot.parent = Some(id);
        }
        self.slots.push(TermSlot {
            term: Term::Operator(Operator::new(left, combinator, right)),
            parent: None,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: TermId) -> Option<&Term> {
        self.slots.get(id.get()).map(|slot| &slot.term)
    }

    pub fn parent(&self, id: TermId) -> Option<TermId> {
        self.slots.get(id.get()).and_then(|slot| slot.parent)
    }

    pub fn equation(&self, id: TermId) -> Option<&Equation> {
        match self.get(id) {
            Some(Term::Equation(equation)) => Some(equation),
            _ => None,
        }
    }

    pub(crate) fn equation_mut(&mut self, id: TermId) -> Option<&mut Equation> {
        match self.slots.get_mut(id.get()).map(|slot| &mut slot.term) {
            Some(Term::Equation(equation)) => Some(equation),
            _ => None,
        }
    }

    pub fn operator(&self, id: TermId) -> Option<Operator> {
        match self.get(id) {
            Some(Term::Operator(operator)) => Some(*operator),
            _ => None,
        }
    }

    fn term(&self, id: TermId) -> Result<&Term> {
        self.get(id)
            .ok_or_else(|| QueryError::CorruptTree(format!("no term {}", id.get())))
    }

    /// All terms below and including `root`, parents before children.
    pub fn subtree(&self, root: TermId) -> Vec<TermId> {
        let mut order = Vec::new();
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            match self.get(id) {
                Some(Term::Operator(operator)) => {
                    pending.push(operator.right());
                    pending.push(operator.left());
                }
                Some(Term::Equation(_)) => {}
                None => continue,
            }
            order.push(id);
        }
        order
    }

    /// Score of a term; operators derive theirs from their children.
    pub fn score(&self, id: TermId) -> i32 {
        match self.get(id) {
            Some(Term::Equation(equation)) => equation.score(),
            Some(Term::Operator(operator)) => {
                operator.combine_scores(self.score(operator.left()), self.score(operator.right()))
            }
            None => 0,
        }
    }

    pub(crate) fn calculate_score<I: Index + ?Sized>(&mut self, root: TermId, index: &mut I) {
        for id in self.subtree(root) {
            if let Some(equation) = self.equation_mut(id) {
                equation.calculate_score(index);
            }
        }
    }

    /// Negates the subtree at `root` in place using De Morgan's laws.
    pub(crate) fn complement(&mut self, root: TermId) {
        for id in self.subtree(root) {
            match self.slots.get_mut(id.get()).map(|slot| &mut slot.term) {
                Some(Term::Equation(equation)) => equation.complement(),
                Some(Term::Operator(operator)) => operator.complement(),
                None => {}
            }
        }
    }

    pub(crate) fn init_check(&self, root: TermId) -> Result<()> {
        self.term(root)?;
        for id in self.subtree(root) {
            match self.term(id)? {
                Term::Equation(equation) => equation.init_check()?,
                Term::Operator(operator) => {
                    for child in [operator.left(), operator.right()] {
                        if self.parent(child) != Some(id) {
                            return Err(QueryError::CorruptTree(format!(
                                "term {} is not a child of {}",
                                child.get(),
                                id.get()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether evaluating `root` reads the entry name.
    pub fn needs_entry(&self, root: TermId) -> bool {
        self.subtree(root)
            .into_iter()
            .any(|id| self.equation(id).is_some_and(Equation::needs_entry))
    }

    /// Evaluates the subtree at `id` against a node and optional entry.
    ///
    /// `&&` stops at the first non-match. `||` stops at the first match or
    /// error and tries its lower-scored child first.
    pub(crate) fn match_term<E, N>(
        &mut self,
        id: TermId,
        entry: Option<&E>,
        node: &N,
        live: Option<&LiveAttribute<'_>>,
    ) -> Result<MatchResult>
    where
        E: Entry + ?Sized,
        N: Node + ?Sized,
    {
        let operator = match self.term(id)? {
            Term::Operator(operator) => *operator,
            Term::Equation(_) => {
                return match self.equation_mut(id) {
                    Some(equation) => equation.evaluate(entry, node, live),
                    None => Err(QueryError::CorruptTree(format!("no term {}", id.get()))),
                };
            }
        };

        match operator.combinator() {
            Combinator::And => {
                let left = self.match_term(operator.left(), entry, node, live)?;
                if !left.is_match() {
                    return Ok(left);
                }
                self.match_term(operator.right(), entry, node, live)
            }
            Combinator::Or => {
                let (first, second) = operator
                    .or_order(self.score(operator.left()), self.score(operator.right()));
                let result = self.match_term(first, entry, node, live)?;
                if result.is_match() {
                    return Ok(result);
                }
                self.match_term(second, entry, node, live)
            }
        }
    }

    pub(crate) fn fmt_term(&self, id: TermId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get(id) {
            Some(Term::Equation(equation)) => write!(f, "{equation}"),
            Some(Term::Operator(operator)) => {
                f.write_str("( ")?;
                self.fmt_term(operator.left(), f)?;
                write!(f, " {} ", operator.combinator())?;
                self.fmt_term(operator.right(), f)?;
                f.write_str(" )")
            }
            None => f.write_str("?"),
        }
    }
}
