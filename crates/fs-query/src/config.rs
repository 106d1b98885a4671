//! Query parser and value limits.

use serde::Deserialize;

/// Maximum number of equations in a single query.
pub const MAX_EQUATIONS: usize = 32;

/// Maximum length of an attribute name or string value, including the NUL.
pub const MAX_FILE_NAME_LENGTH: usize = 256;

/// Limits applied while parsing and evaluating a query.
///
/// Deserializable so hosts can embed it in their own configuration; missing
/// fields fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Equations allowed before parsing fails with `TooBig`.
    pub max_equations: usize,
    /// Parenthesis nesting allowed before parsing fails.
    pub max_nesting: usize,
    /// Longest attribute name or value, counting the terminating NUL.
    pub max_name_length: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_equations: MAX_EQUATIONS,
            max_nesting: MAX_EQUATIONS,
            max_name_length: MAX_FILE_NAME_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let limits = QueryLimits::default();
        assert_eq!(limits.max_equations, 32);
        assert_eq!(limits.max_name_length, 256);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let limits: QueryLimits = serde_json::from_str(r#"{ "max_equations": 4 }"#).unwrap();
        assert_eq!(limits.max_equations, 4);
        assert_eq!(limits.max_nesting, MAX_EQUATIONS);
        assert_eq!(limits.max_name_length, MAX_FILE_NAME_LENGTH);
    }
}
