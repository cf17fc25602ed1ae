//! Error types for EntGraph operations.

use std::fmt;

/// The primary error type for all EntGraph operations.
#[derive(Debug)]
pub enum Error {
    /// Mapping-configuration errors (unknown node, empty tree, duplicate
    /// alias). Always fatal: they indicate a mapping mistake, are raised at
    /// tree-construction or compile time and are never retried.
    Mapping(MappingError),
    /// Row-to-entity inflation errors (unreadable column, bad discriminator).
    Inflate(InflateError),
    /// Errors raised while cascading writes across persisters.
    Cascade(CascadeError),
    /// Type conversion errors.
    Type(TypeError),
    /// Query execution errors reported by the connection layer.
    Query(QueryError),
    /// I/O errors.
    Io(std::io::Error),
    /// Custom error with message.
    Custom(String),
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// A relation referenced a parent node name that is not in the tree.
    UnknownNode,
    /// A node name was declared twice in one tree.
    DuplicateNode,
    /// The tree has no root node.
    EmptyTree,
    /// Two distinct node paths produced the same SQL alias.
    AmbiguousAlias,
    /// A polymorphic root was declared without variants, or a variant tag
    /// was declared twice.
    InvalidPolymorphic,
}

#[derive(Debug)]
pub struct InflateError {
    /// Node at which inflation failed.
    pub node: String,
    /// Column alias involved, when known.
    pub column: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct CascadeError {
    /// Name of the relation whose cascade failed.
    pub relation: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL.
    Syntax,
    /// Constraint violation (unique, foreign key).
    Constraint,
    /// Table or column not found.
    NotFound,
    /// Other database error.
    Database,
}

impl Error {
    /// Build an unknown-node mapping error.
    pub fn unknown_node(name: &str) -> Self {
        Error::Mapping(MappingError {
            kind: MappingErrorKind::UnknownNode,
            message: format!("no node named '{name}' in this tree"),
        })
    }

    /// Build a duplicate-node mapping error.
    pub fn duplicate_node(name: &str) -> Self {
        Error::Mapping(MappingError {
            kind: MappingErrorKind::DuplicateNode,
            message: format!("node name '{name}' is already taken"),
        })
    }

    /// Build an empty-tree mapping error.
    pub fn empty_tree() -> Self {
        Error::Mapping(MappingError {
            kind: MappingErrorKind::EmptyTree,
            message: "join tree has no root node".to_string(),
        })
    }

    /// Build an ambiguous-alias mapping error.
    pub fn ambiguous_alias(alias: &str) -> Self {
        Error::Mapping(MappingError {
            kind: MappingErrorKind::AmbiguousAlias,
            message: format!("two node paths produce the alias '{alias}'"),
        })
    }

    /// Build an invalid-polymorphic mapping error.
    pub fn invalid_polymorphic(message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            kind: MappingErrorKind::InvalidPolymorphic,
            message: message.into(),
        })
    }

    /// Build an inflation error at a named node.
    pub fn inflate(node: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Inflate(InflateError {
            node: node.into(),
            column: None,
            message: message.into(),
        })
    }

    /// Build a cascade error wrapping a cause.
    pub fn cascade(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Cascade(CascadeError {
            relation: relation.into(),
            message: message.into(),
            source: None,
        })
    }

    /// The mapping error kind, when this is a mapping error.
    #[must_use]
    pub fn mapping_kind(&self) -> Option<MappingErrorKind> {
        match self {
            Error::Mapping(m) => Some(m.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "mapping error: {}", e.message),
            Error::Inflate(e) => match &e.column {
                Some(col) => {
                    write!(f, "inflation error at node '{}' column '{col}': {}", e.node, e.message)
                }
                None => write!(f, "inflation error at node '{}': {}", e.node, e.message),
            },
            Error::Cascade(e) => write!(f, "cascade error on relation '{}': {}", e.relation, e.message),
            Error::Type(e) => match &e.column {
                Some(col) => {
                    write!(f, "type error in column '{col}': expected {}, got {}", e.expected, e.actual)
                }
                None => write!(f, "type error: expected {}, got {}", e.expected, e.actual),
            },
            Error::Query(e) => match &e.sql {
                Some(sql) => write!(f, "query error ({:?}): {} in `{sql}`", e.kind, e.message),
                None => write!(f, "query error ({:?}): {}", e.kind, e.message),
            },
            Error::Io(e) => write!(f, "i/o error: {e}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Cascade(e) => e.source.as_deref().map(|s| s as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e.source.as_deref().map(|s| s as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenience result alias used across all EntGraph crates.
pub type Result<T> = std::result::Result<T, Error>;
