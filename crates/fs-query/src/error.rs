use crate::types::TypeCode;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query parse error near byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("query has more than {limit} equations")]
    TooBig { limit: usize },

    #[error("entry not found")]
    EntryNotFound,

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("cannot convert query value to type {0}")]
    UnsupportedType(TypeCode),

    #[error("the `name` attribute cannot be evaluated without a directory entry")]
    EntryRequired,

    #[error("dirent buffer too small: need {needed} bytes, have {available}")]
    BufferOverflow { needed: usize, available: usize },

    #[error("index error: {0}")]
    Index(String),

    #[error("corrupt query tree: {0}")]
    CorruptTree(String),
}

impl QueryError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Returns true for the "nothing (more) to find" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntryNotFound)
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
