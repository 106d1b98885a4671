//! Query language and execution.
//!
//! This module provides:
//! - The expression parser (`attribute op value` equations joined by `&&`/`||`)
//! - The term arena with scoring, negation, and matching
//! - [`Query`], which plans an index scan and enumerates matches
//! - Live updates that keep an open query's listener informed

mod engine;
mod equation;
mod expression;
mod live;
mod operator;
mod parser;
mod term;

pub use engine::Query;
pub use equation::{ComparisonOp, Equation, EXACT_MATCH_SCORE, RANGE_SCORE};
pub use expression::Expression;
pub use operator::{Combinator, Operator};
pub use term::{LiveAttribute, Term, TermId, TermTree};
