//! Error types for persistence operations.

use std::fmt;

/// The primary error type for all lazyorm operations.
#[derive(Debug)]
pub enum Error {
    /// Type conversion errors
    Type(TypeError),
    /// Backing store errors (constraints, missing tables)
    Store(StoreError),
    /// Session lifecycle errors
    Session(SessionError),
    /// Transaction misuse
    Transaction(TransactionError),
    /// Invalid entity mapping
    Schema(SchemaError),
    /// Configuration errors
    Config(ConfigError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub table: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Row with the same primary key already present
    DuplicateKey,
    /// Referenced row missing, or row still referenced on delete
    ForeignKey,
    /// Other constraint violation (NOT NULL, column count)
    Constraint,
    /// Update or delete targeted a missing row
    NotFound,
    /// Table was never created
    TableNotFound,
}

#[derive(Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub entity: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// Uninitialized reference accessed with no session to load from
    LazyInitialization,
    /// Reference initialization found no row
    EntityNotFound,
    /// Identity already managed by the session
    EntityExists,
    /// Optimistic version check failed
    StaleState,
    /// Operation on an instance already scheduled for removal
    EntityRemoved,
    /// Instance is not managed by this session
    NotManaged,
    /// Session already closed
    Closed,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub entity: Option<&'static str>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Entity type was never registered with the factory
    UnknownEntity,
    /// Table registered twice
    TableExists,
    /// Primary key column not declared or not flagged
    InvalidKey,
    /// Relationship metadata inconsistent with the fields
    InvalidRelationship,
    /// Identifier not usable as a table or column name
    InvalidName,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a session error.
    pub fn session(
        kind: SessionErrorKind,
        entity: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Error::Session(SessionError {
            kind,
            entity,
            message: message.into(),
        })
    }

    /// Build a store error.
    pub fn store(kind: StoreErrorKind, table: &str, message: impl Into<String>) -> Self {
        Error::Store(StoreError {
            kind,
            table: Some(table.to_string()),
            message: message.into(),
        })
    }

    /// Build a schema error.
    pub fn schema(
        kind: SchemaErrorKind,
        entity: Option<&'static str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Schema(SchemaError {
            kind,
            entity,
            message: message.into(),
        })
    }

    /// The session error kind, if this is a session error.
    pub fn session_kind(&self) -> Option<SessionErrorKind> {
        match self {
            Error::Session(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The store error kind, if this is a store error.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Error::Store(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Is this a lazy-initialization failure?
    pub fn is_lazy_initialization(&self) -> bool {
        self.session_kind() == Some(SessionErrorKind::LazyInitialization)
    }

    /// Is this a constraint violation raised by the store?
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.store_kind(),
            Some(StoreErrorKind::DuplicateKey | StoreErrorKind::ForeignKey | StoreErrorKind::Constraint)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Store(e) => match &e.table {
                Some(table) => write!(f, "Store error on '{}': {}", table, e.message),
                None => write!(f, "Store error: {}", e.message),
            },
            Error::Session(e) => write!(f, "Session error ({}): {}", e.entity, e.message),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for lazyorm operations.
pub type Result<T> = std::result::Result<T, Error>;
