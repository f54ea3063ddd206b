use thiserror::Error;

pub type CompilateResult<T> = std::result::Result<T, CompilateError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ParseErrorKind {
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected EOF{expected_what}")]
    UnexpectedEOF {
        /// Describes what was expected, e.g., "(expected '%}')"
        expected_what: String,
    },
    #[error("Invalid identifier starting with '{at_char}'")]
    InvalidIdentifier { at_char: String },
    #[error("Unknown tag '{tag}'")]
    UnknownTag { tag: String },
    #[error("Unknown filter '{filter}'")]
    UnknownFilter { filter: String },
    #[error("Expected {description}")]
    Expected { description: String },
    #[error("Blocks nested more than {limit} deep")]
    NestingTooDeep { limit: usize },
    #[error("Parser error: {0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<String>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

/// A construct the compiler recognises but cannot translate.
///
/// These are never deferred to the fallback path: the compiler has already
/// committed to translating the surrounding node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum UnsupportedFeature {
    #[error("filters are not supported by the compiler ({count} on '{token}')")]
    Filters { token: String, count: usize },
    #[error("conditions joined with 'and'/'or' are not supported ({count} tests)")]
    MultipleConditions { count: usize },
    #[error("negated conditions are not supported ('not {token}')")]
    NegatedCondition { token: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ToolchainErrorKind {
    #[error("Syntax error: expected {expected}, found {found}")]
    Syntax { expected: String, found: String },
    #[error("Unsupported format version {found} (expected {expected})")]
    FormatVersion { expected: u32, found: i64 },
    #[error("Unresolved external function '{name}'")]
    UnresolvedExternal { name: String },
    #[error("Call to undeclared function '{name}'")]
    UndeclaredFunction { name: String },
    #[error("Unknown binding '{name}'")]
    UnknownBinding { name: String },
    #[error("Fallback nodes referenced but never loaded")]
    MissingNodes,
    #[error("Invalid fallback node blob: {0}")]
    InvalidNodes(String),
    #[error("Fallback node index {index} out of range ({len} nodes loaded)")]
    NodeIndexOutOfRange { index: i64, len: usize },
    #[error("I/O error reading generated source: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Toolchain error at line {line}, column {column}: {kind}")]
pub struct ToolchainError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ToolchainErrorKind,
}

impl ToolchainError {
    /// An error that is not tied to a position in the generated source.
    pub const fn unpositioned(kind: ToolchainErrorKind) -> Self {
        Self {
            line: 0,
            column: 0,
            kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompilateError {
    #[error("Template already exists: {template_name}")]
    TemplateExists { template_name: String },
    #[error("Template not found: {template_name}")]
    MissingTemplate { template_name: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(#[from] UnsupportedFeature),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error("Failed to serialize fallback nodes: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to stage generated source: {0}")]
    Io(#[from] std::io::Error),
}
