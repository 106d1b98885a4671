//! Query string parser.
//!
//! Grammar, whitespace allowed between tokens:
//!
//! ```text
//! or       := and ( "||" and )*
//! and      := primary ( "&&" primary )*
//! primary  := "!"? "(" or ")" | equation
//! equation := token op token
//! op       := "=" | "==" | "!=" | "<" | "<=" | ">" | ">="
//! ```
//!
//! Both operators fold left to right, `&&` binding tighter than `||`.
//! Tokens are either quoted with `"` or `'`, or bare. A `\` escapes the next
//! character in both forms. A negated group is complemented in place, so the
//! resulting tree never contains a negation.

use crate::config::QueryLimits;
use crate::error::{QueryError, Result};
use crate::pattern::{
    is_pattern, skip_whitespace, skip_whitespace_reverse, unescape, validate_pattern,
};

use super::equation::{ComparisonOp, Equation};
use super::operator::Combinator;
use super::term::{TermId, TermTree};

/// Bytes that end a bare attribute token.
const ATTRIBUTE_STOP: &[u8] = b"=<>!&|";

/// Bytes that end a bare value token.
const VALUE_STOP: &[u8] = b"&|)";

pub(crate) struct ExpressionParser<'a> {
    input: &'a str,
    cursor: usize,
    limits: QueryLimits,
    tree: TermTree,
    equations: usize,
    depth: usize,
}

impl<'a> ExpressionParser<'a> {
    /// Parses all of `input` into a term tree and returns it with its root.
    pub(crate) fn parse(input: &'a str, limits: QueryLimits) -> Result<(TermTree, TermId)> {
        let mut parser = Self {
            input,
            cursor: 0,
            limits,
            tree: TermTree::default(),
            equations: 0,
            depth: 0,
        };

        let root = parser.parse_or()?;
        parser.skip_blanks();
        if !parser.is_end() {
            log::info!(
                "query parse stopped near byte {}: {:?}",
                parser.cursor,
                parser.input
            );
            return Err(QueryError::parse(parser.cursor, "unexpected trailing input"));
        }
        Ok((parser.tree, root))
    }

    fn parse_or(&mut self) -> Result<TermId> {
        let mut left = self.parse_and()?;
        while self.consume_operator(b'|') {
            let right = self.parse_and()?;
            left = self.tree.push_operator(left, Combinator::Or, right)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<TermId> {
        let mut left = self.parse_primary()?;
        while self.consume_operator(b'&') {
            let right = self.parse_primary()?;
            left = self.tree.push_operator(left, Combinator::And, right)?;
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<TermId> {
        self.skip_blanks();

        let negate = self.peek() == Some(b'!');
        if negate {
            self.cursor += 1;
            if self.peek() != Some(b'(') {
                return Err(QueryError::parse(self.cursor, "'!' must be followed by '('"));
            }
        }

        match self.peek() {
            Some(b'(') => self.parse_group(negate),
            Some(b')') => Err(QueryError::parse(self.cursor, "unexpected ')'")),
            None => Err(QueryError::parse(
                self.cursor,
                "expected equation but reached end of query",
            )),
            Some(_) => self.parse_equation(),
        }
    }

    fn parse_group(&mut self, negate: bool) -> Result<TermId> {
        let open = self.cursor;
        self.depth += 1;
        if self.depth > self.limits.max_nesting {
            return Err(QueryError::parse(
                open,
                format!("more than {} nested groups", self.limits.max_nesting),
            ));
        }
        self.cursor += 1;

        let term = self.parse_or()?;
        self.skip_blanks();
        if self.peek() != Some(b')') {
            return Err(QueryError::parse(
                self.cursor,
                format!("missing closing ')' for group at byte {open}"),
            ));
        }
        self.cursor += 1;
        self.depth -= 1;

        if negate {
            self.tree.complement(term);
        }
        Ok(term)
    }

    fn parse_equation(&mut self) -> Result<TermId> {
        if self.equations >= self.limits.max_equations {
            return Err(QueryError::TooBig {
                limit: self.limits.max_equations,
            });
        }

        let input = self.input;
        let bytes = input.as_bytes();
        let start = self.cursor;

        let (attribute_start, attribute_end) = if is_quote(bytes[start]) {
            let range = self.consume_quoted()?;
            self.skip_blanks();
            if !matches!(self.peek(), Some(b'=' | b'<' | b'>' | b'!')) {
                return Err(QueryError::parse(self.cursor, "expected comparison operator"));
            }
            range
        } else {
            self.scan_bare(ATTRIBUTE_STOP);
            (start, skip_whitespace_reverse(bytes, self.cursor, start))
        };
        if attribute_start >= attribute_end {
            return Err(QueryError::parse(start, "missing attribute name"));
        }

        let op = self.consume_comparison()?;
        self.skip_blanks();

        let value_position = self.cursor;
        let (value_start, value_end) = if self.peek().is_some_and(is_quote) {
            let range = self.consume_quoted()?;
            self.skip_blanks();
            range
        } else {
            self.scan_bare(VALUE_STOP);
            let end = skip_whitespace_reverse(bytes, self.cursor, value_position);
            if end == value_position {
                return Err(QueryError::parse(value_position, "missing value"));
            }
            (value_position, end)
        };

        let attribute = &input[attribute_start..attribute_end];
        let value = &input[value_start..value_end];
        self.check_length(attribute, attribute_start)?;
        self.check_length(value, value_start)?;

        let pattern =
            matches!(op, ComparisonOp::Equal | ComparisonOp::NotEqual) && is_pattern(value);
        if pattern {
            validate_pattern(value).map_err(|err| {
                QueryError::parse(value_start, format!("invalid pattern: {err}"))
            })?;
        }
        let value = if pattern {
            value.to_string()
        } else {
            unescape(value)
        };

        self.equations += 1;
        Ok(self.tree.push_equation(Equation::new(
            unescape(attribute),
            op,
            value,
            pattern,
            self.limits.max_name_length,
        )))
    }

    fn consume_comparison(&mut self) -> Result<ComparisonOp> {
        let position = self.cursor;
        let next_is_equal = self.input.as_bytes().get(position + 1) == Some(&b'=');
        let op = match self.peek() {
            Some(b'=') => ComparisonOp::Equal,
            Some(b'!') if next_is_equal => ComparisonOp::NotEqual,
            Some(b'>') if next_is_equal => ComparisonOp::GreaterThanOrEqual,
            Some(b'>') => ComparisonOp::GreaterThan,
            Some(b'<') if next_is_equal => ComparisonOp::LessThanOrEqual,
            Some(b'<') => ComparisonOp::LessThan,
            _ => return Err(QueryError::parse(position, "expected comparison operator")),
        };
        self.cursor += if next_is_equal { 2 } else { 1 };
        Ok(op)
    }

    /// Consumes a quoted token and returns the byte range of its contents.
    fn consume_quoted(&mut self) -> Result<(usize, usize)> {
        let bytes = self.input.as_bytes();
        let open = self.cursor;
        let quote = bytes[open];
        let mut cursor = open + 1;
        while cursor < bytes.len() && bytes[cursor] != quote {
            if bytes[cursor] == b'\\' {
                cursor += 1;
            }
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err(QueryError::parse(open, "missing closing quote"));
        }
        self.cursor = cursor + 1;
        Ok((open + 1, cursor))
    }

    /// Advances over a bare token up to the first unescaped `stop` byte.
    fn scan_bare(&mut self, stop: &[u8]) {
        let bytes = self.input.as_bytes();
        while self.cursor < bytes.len() && !stop.contains(&bytes[self.cursor]) {
            self.cursor += if bytes[self.cursor] == b'\\' { 2 } else { 1 };
        }
        self.cursor = self.cursor.min(bytes.len());
    }

    fn check_length(&self, token: &str, position: usize) -> Result<()> {
        if token.len() >= self.limits.max_name_length {
            return Err(QueryError::parse(
                position,
                format!(
                    "token longer than {} bytes",
                    self.limits.max_name_length.saturating_sub(1)
                ),
            ));
        }
        Ok(())
    }

    fn consume_operator(&mut self, symbol: u8) -> bool {
        self.skip_blanks();
        let bytes = self.input.as_bytes();
        if bytes.get(self.cursor) == Some(&symbol) && bytes.get(self.cursor + 1) == Some(&symbol) {
            self.cursor += 2;
            true
        } else {
            false
        }
    }

    fn skip_blanks(&mut self) {
        self.cursor = skip_whitespace(self.input.as_bytes(), self.cursor);
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.cursor).copied()
    }

    fn is_end(&self) -> bool {
        self.cursor >= self.input.len()
    }
}

fn is_quote(byte: u8) -> bool {
    byte == b'"' || byte == b'\''
}
