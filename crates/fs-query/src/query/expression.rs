//! A parsed query: the term arena plus its root.

use std::fmt;

use crate::config::QueryLimits;
use crate::error::Result;

use super::parser::ExpressionParser;
use super::term::{TermId, TermTree};

#[derive(Debug, Clone)]
pub struct Expression {
    text: String,
    tree: TermTree,
    root: TermId,
}

impl Expression {
    /// Parses `text` with the default [`QueryLimits`].
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_limits(text, QueryLimits::default())
    }

    pub fn parse_with_limits(text: &str, limits: QueryLimits) -> Result<Self> {
        let (tree, root) = ExpressionParser::parse(text, limits).inspect_err(|err| {
            log::info!("could not parse query {text:?}: {err}");
        })?;

        let expression = Self {
            text: text.to_string(),
            tree,
            root,
        };
        expression.init_check().inspect_err(|err| {
            log::error!("corrupt tree in expression {text:?}: {err}");
        })?;
        log::debug!("parsed query {expression}");
        Ok(expression)
    }

    /// Verifies the tree shape and every equation.
    pub fn init_check(&self) -> Result<()> {
        self.tree.init_check(self.root)
    }

    pub fn root(&self) -> TermId {
        self.root
    }

    pub fn tree(&self) -> &TermTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut TermTree {
        &mut self.tree
    }

    /// The query text this expression was parsed from.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.tree.fmt_term(self.root, f)
    }
}
