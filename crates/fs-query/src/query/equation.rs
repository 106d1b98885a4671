//! Leaf terms: `attribute OP value`.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{QueryError, Result};
use crate::pattern::{literal_prefix, match_pattern};
use crate::policy::{Entry, Index, IndexIterator, Node};
use crate::types::{MatchResult, TypeCode};
use crate::value::{compare_keys, convert_literal, trim_nul};

use super::term::LiveAttribute;

/// Base score of an exact (non-pattern) equality.
pub const EXACT_MATCH_SCORE: i32 = 2048;

/// Base score of a range comparison on an indexed attribute.
pub const RANGE_SCORE: i32 = 5;

/// Comparison operator of an [`Equation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl ComparisonOp {
    const COMPLEMENTS: [ComparisonOp; 6] = [
        ComparisonOp::NotEqual,
        ComparisonOp::Equal,
        ComparisonOp::LessThanOrEqual,
        ComparisonOp::GreaterThanOrEqual,
        ComparisonOp::LessThan,
        ComparisonOp::GreaterThan,
    ];

    /// The operator matching exactly the values this one rejects.
    pub fn complement(self) -> Self {
        Self::COMPLEMENTS[self as usize]
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
        }
    }

    /// Whether a comparison result satisfies this operator.
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::LessThan => ordering == Ordering::Less,
            Self::GreaterThanOrEqual => ordering != Ordering::Less,
            Self::LessThanOrEqual => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ConvertedValue {
    type_code: TypeCode,
    key: Vec<u8>,
}

/// A single comparison of one attribute against a literal.
///
/// The literal stays text until the first time a concrete attribute type is
/// seen; it is then converted once and cached for that type.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    attribute: String,
    op: ComparisonOp,
    value: String,
    is_pattern: bool,
    max_length: usize,
    converted: Option<ConvertedValue>,
    score: i32,
    has_index: bool,
}

impl Equation {
    /// `value` is the unescaped literal, or the raw pattern text when
    /// `is_pattern` is set.
    pub(crate) fn new(
        attribute: String,
        op: ComparisonOp,
        value: String,
        is_pattern: bool,
        max_length: usize,
    ) -> Self {
        Self {
            attribute,
            op,
            value,
            is_pattern,
            max_length,
            converted: None,
            score: 0,
            has_index: false,
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn op(&self) -> ComparisonOp {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_pattern(&self) -> bool {
        self.is_pattern
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    /// Whether the last prepared scan runs over this equation's own index.
    pub fn has_index(&self) -> bool {
        self.has_index
    }

    pub(crate) fn init_check(&self) -> Result<()> {
        if self.attribute.is_empty() {
            return Err(QueryError::BadValue("equation without attribute".into()));
        }
        Ok(())
    }

    pub(crate) fn complement(&mut self) {
        self.op = self.op.complement();
    }

    pub(crate) fn needs_entry(&self) -> bool {
        self.attribute == "name"
    }

    /// Converts the literal to `type_code`, reusing the cached key when the
    /// type has not changed.
    fn convert_value(&mut self, type_code: TypeCode) -> Result<()> {
        let type_code = match type_code {
            TypeCode::MimeString => TypeCode::String,
            other => other,
        };
        if self
            .converted
            .as_ref()
            .is_some_and(|converted| converted.type_code == type_code)
        {
            return Ok(());
        }

        let key = convert_literal(type_code, &self.value, self.max_length).inspect_err(|err| {
            log::error!("cannot convert {:?} for {}: {err}", self.value, self.attribute);
        })?;
        self.converted = Some(ConvertedValue { type_code, key });
        Ok(())
    }

    /// Patterns only apply to string values.
    fn pattern_active(&self) -> bool {
        self.is_pattern
            && self
                .converted
                .as_ref()
                .is_some_and(|converted| converted.type_code == TypeCode::String)
    }

    fn compare_to(&self, value: &[u8]) -> bool {
        let Some(converted) = &self.converted else {
            return false;
        };

        let ordering = if self.pattern_active() {
            match match_pattern(&converted.key, trim_nul(value)) {
                Ok(true) => Ordering::Equal,
                Ok(false) => Ordering::Greater,
                Err(err) => {
                    log::warn!("pattern {:?} failed: {err}", self.value);
                    Ordering::Greater
                }
            }
        } else {
            compare_keys(converted.type_code, value, &converted.key)
        };
        self.op.accepts(ordering)
    }

    /// Matches the attribute's current value against this equation.
    ///
    /// A `live` attribute with the same name replaces whatever the node
    /// currently stores.
    pub(crate) fn evaluate<E, N>(
        &mut self,
        entry: Option<&E>,
        node: &N,
        live: Option<&LiveAttribute<'_>>,
    ) -> Result<MatchResult>
    where
        E: Entry + ?Sized,
        N: Node + ?Sized,
    {
        let (type_code, value): (TypeCode, Cow<'_, [u8]>) =
            match live.filter(|live| live.name == self.attribute) {
                Some(live) => match live.key {
                    Some(key) => (live.type_code, Cow::Borrowed(key)),
                    None => return Ok(MatchResult::NotMatched),
                },
                None => match self.attribute.as_str() {
                    "name" => {
                        let entry = entry.ok_or(QueryError::EntryRequired)?;
                        let name = entry
                            .name()
                            .ok_or_else(|| QueryError::BadValue("unreadable entry name".into()))?;
                        let bytes = match name {
                            Cow::Borrowed(name) => Cow::Borrowed(name.as_bytes()),
                            Cow::Owned(name) => Cow::Owned(name.into_bytes()),
                        };
                        (TypeCode::String, bytes)
                    }
                    "size" => (TypeCode::Int64, Cow::Owned(node.size().to_le_bytes().to_vec())),
                    "last_modified" => (
                        TypeCode::Int64,
                        Cow::Owned(node.last_modified().to_le_bytes().to_vec()),
                    ),
                    attribute => match node.attribute(attribute) {
                        Some(found) => found,
                        None => return Ok(MatchResult::NotMatched),
                    },
                },
            };

        self.convert_value(type_code)?;
        Ok(MatchResult::from_bool(self.compare_to(&value)))
    }

    /// Scores how useful the attribute's index is for this equation.
    ///
    /// Leaves `index` pointing at the attribute's index when one exists.
    pub(crate) fn calculate_score<I: Index + ?Sized>(&mut self, index: &mut I) {
        if self.op == ComparisonOp::NotEqual || index.set_to(&self.attribute).is_err() {
            self.score = 0;
            return;
        }

        let base = if self.is_pattern {
            let prefix = literal_prefix(&self.value).len();
            i32::try_from(prefix << 3).unwrap_or(i32::MAX).max(1)
        } else if self.op == ComparisonOp::Equal {
            EXACT_MATCH_SCORE
        } else {
            RANGE_SCORE
        };
        self.score = index.weighted_score(base);
    }

    /// Points `index` at the index to scan and opens an iterator positioned
    /// at the first candidate.
    ///
    /// Equations that cannot use their own index scan the `name` index, which
    /// holds every entry, and re-check each candidate. Fails with
    /// `EntryNotFound` when there is nothing to scan.
    pub(crate) fn prepare_query<I: Index + ?Sized>(
        &mut self,
        index: &mut I,
        query_non_indexed: bool,
    ) -> Result<I::Iterator> {
        let own_index = index.set_to(&self.attribute);
        if own_index.is_err() && !query_non_indexed {
            return Err(QueryError::EntryNotFound);
        }

        let type_code = if own_index.is_err() || self.op == ComparisonOp::NotEqual {
            let type_code = match own_index {
                Ok(()) => index.type_code(),
                Err(_) => TypeCode::String,
            };
            index.set_to("name").map_err(|_| QueryError::EntryNotFound)?;
            self.has_index = false;
            type_code
        } else {
            self.has_index = true;
            index.type_code()
        };

        self.convert_value(type_code)
            .map_err(|err| QueryError::BadValue(err.to_string()))?;

        let mut iterator = index.create_iterator()?;
        let seeks = matches!(
            self.op,
            ComparisonOp::Equal | ComparisonOp::GreaterThan | ComparisonOp::GreaterThanOrEqual
        ) || self.pattern_active();
        if !seeks || !self.has_index {
            return Ok(iterator);
        }

        let seek_key = if self.pattern_active() {
            let prefix = literal_prefix(&self.value);
            if prefix.is_empty() {
                return Ok(iterator);
            }
            prefix.into_bytes()
        } else {
            let Some(converted) = &self.converted else {
                return Err(QueryError::EntryNotFound);
            };
            if index.key_size() == 0 && !converted.type_code.is_string() {
                return Err(QueryError::EntryNotFound);
            }
            converted.key.clone()
        };

        match iterator.find(&seek_key) {
            Ok(()) => Ok(iterator),
            Err(err) if err.is_not_found() && self.tolerates_missing_seek_key() => Ok(iterator),
            Err(err) => Err(err),
        }
    }

    /// Patterns and lower bounds keep scanning from the insertion point.
    fn tolerates_missing_seek_key(&self) -> bool {
        self.pattern_active()
            || matches!(
                self.op,
                ComparisonOp::GreaterThan | ComparisonOp::GreaterThanOrEqual
            )
    }

    /// Checks a key fetched from this equation's own index.
    ///
    /// Returns `None` when the scan can stop: the index is ordered, so once
    /// an upper bound or an exact key is passed nothing later can match.
    pub(crate) fn check_index_key(&self, key: &[u8]) -> Option<bool> {
        if self.compare_to(key) {
            return Some(true);
        }
        let stops = matches!(
            self.op,
            ComparisonOp::LessThan | ComparisonOp::LessThanOrEqual
        ) || (self.op == ComparisonOp::Equal && !self.pattern_active());
        if stops {
            None
        } else {
            Some(false)
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[\"{}\" {} \"{}\"]", self.attribute, self.op, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn equation(attribute: &str, op: ComparisonOp, value: &str) -> Equation {
        let is_pattern = crate::pattern::is_pattern(value)
            && matches!(op, ComparisonOp::Equal | ComparisonOp::NotEqual);
        Equation::new(attribute.into(), op, value.into(), is_pattern, 256)
    }

    #[test]
    fn complement_table_is_an_involution() {
        for op in [
            ComparisonOp::Equal,
            ComparisonOp::NotEqual,
            ComparisonOp::GreaterThan,
            ComparisonOp::LessThan,
            ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::LessThanOrEqual,
        ] {
            assert_ne!(op.complement(), op);
            assert_eq!(op.complement().complement(), op);
        }
        assert_eq!(ComparisonOp::GreaterThan.complement(), ComparisonOp::LessThanOrEqual);
        assert_eq!(ComparisonOp::LessThan.complement(), ComparisonOp::GreaterThanOrEqual);
    }

    #[test]
    fn numeric_comparison_uses_converted_type() {
        let mut eq = equation("size", ComparisonOp::GreaterThan, "1000");
        eq.convert_value(TypeCode::Int64).unwrap();
        assert!(eq.compare_to(&2000i64.to_le_bytes()));
        assert!(!eq.compare_to(&1000i64.to_le_bytes()));
        assert!(!eq.compare_to(&(-5i64).to_le_bytes()));
    }

    #[test]
    fn conversion_is_cached_per_type() {
        let mut eq = equation("count", ComparisonOp::Equal, "0x10");
        eq.convert_value(TypeCode::Int32).unwrap();
        assert!(eq.compare_to(&16i32.to_le_bytes()));
        eq.convert_value(TypeCode::String).unwrap();
        assert!(eq.compare_to(b"0x10"));
        assert!(!eq.compare_to(&16i32.to_le_bytes()));
    }

    #[test]
    fn mime_strings_compare_as_strings() {
        let mut eq = equation("mime", ComparisonOp::Equal, "text/plain");
        eq.convert_value(TypeCode::MimeString).unwrap();
        assert!(eq.compare_to(b"text/plain\0"));
    }

    #[test]
    fn pattern_only_applies_to_strings() {
        let mut eq = equation("name", ComparisonOp::Equal, "*.txt");
        eq.convert_value(TypeCode::String).unwrap();
        assert!(eq.compare_to(b"notes.txt"));
        assert!(!eq.compare_to(b"notes.md"));

        let mut numeric = equation("count", ComparisonOp::Equal, "1*");
        numeric.convert_value(TypeCode::Int32).unwrap();
        assert!(!numeric.pattern_active());
        assert!(numeric.compare_to(&1i32.to_le_bytes()));
    }

    #[test]
    fn negated_pattern_rejects_matches() {
        let mut eq = equation("name", ComparisonOp::NotEqual, "*.txt");
        eq.convert_value(TypeCode::String).unwrap();
        assert!(!eq.compare_to(b"a.txt"));
        assert!(eq.compare_to(b"a.md"));
    }

    #[test]
    fn unsupported_type_is_an_error() {
        let mut eq = equation("blob", ComparisonOp::Equal, "x");
        assert!(matches!(
            eq.convert_value(TypeCode::Other(42)),
            Err(QueryError::UnsupportedType(TypeCode::Other(42)))
        ));
    }

    #[test]
    fn index_key_check_stops_past_upper_bounds() {
        let mut less = equation("size", ComparisonOp::LessThan, "10");
        less.convert_value(TypeCode::Int64).unwrap();
        assert_eq!(less.check_index_key(&5i64.to_le_bytes()), Some(true));
        assert_eq!(less.check_index_key(&10i64.to_le_bytes()), None);

        let mut greater = equation("size", ComparisonOp::GreaterThan, "10");
        greater.convert_value(TypeCode::Int64).unwrap();
        assert_eq!(greater.check_index_key(&10i64.to_le_bytes()), Some(false));

        let mut pattern = equation("name", ComparisonOp::Equal, "ab*");
        pattern.convert_value(TypeCode::String).unwrap();
        assert_eq!(pattern.check_index_key(b"ac"), Some(false));
    }

    #[test]
    fn display_quotes_both_sides() {
        let eq = equation("size", ComparisonOp::GreaterThanOrEqual, "12");
        assert_eq!(eq.to_string(), r#"["size" >= "12"]"#);
    }
}
