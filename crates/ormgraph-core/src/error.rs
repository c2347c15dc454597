//! Error types for ormgraph operations.

use std::fmt;

/// Result type alias for ormgraph operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The primary error type for all ormgraph operations.
#[derive(Debug)]
pub enum Error {
    /// A relation property could not be classified during discovery
    UnknownRelationship(RelationshipError),
    /// One or more declared constraints failed before a save
    Validation(ValidationError),
    /// Delete requested on an entity that was never persisted
    DeleteNonexistent { model: &'static str },
    /// The storage collaborator rejected a statement
    Storage(StorageError),
    /// A column value could not be converted into a field type
    Type(TypeError),
    /// Type-erased entity access failed
    Graph(GraphError),
    /// JSON encoding or decoding failed
    Serde(String),
    Custom(String),
}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Debug, Clone)]
pub struct RelationshipError {
    pub kind: RelationshipErrorKind,
    pub model: String,
    pub property: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipErrorKind {
    /// The property points at a model that was never registered
    UnknownModel,
    /// The foreign model has no counterpart property of a usable shape
    Unclassified,
    /// Disambiguation matched zero or several counterparts
    Ambiguous,
    /// Two properties claim the same counterpart
    Conflict,
    /// Every candidate storage name is already in use
    NameCollision,
}

impl RelationshipError {
    pub fn new(
        kind: RelationshipErrorKind,
        model: &str,
        property: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            model: model.to_string(),
            property: property.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RelationshipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.model, self.property, self.message)
    }
}

// ============================================================================
// Storage and conversion
// ============================================================================

#[derive(Debug, Clone)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// A unique column already holds the value
    Constraint,
    /// The addressed row does not exist
    NotFound,
    Other,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, table: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        self.kind == StorageErrorKind::Constraint
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (table '{}')", self.message, self.table)
    }
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}", self.expected)?;
        if let Some(column) = &self.column {
            write!(f, " for column '{column}'")?;
        }
        write!(f, ", found {}", self.actual)
    }
}

// ============================================================================
// Graph access
// ============================================================================

#[derive(Debug, Clone)]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub model: &'static str,
    pub property: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// The model has no mapped property with that name
    UnknownProperty,
    /// The entity is already borrowed elsewhere in the graph
    Borrowed,
    /// A link of the wrong shape or target type was assigned to a slot
    LinkMismatch,
    /// The model is not registered with the schema
    UnregisteredModel,
}

impl GraphError {
    fn new(
        kind: GraphErrorKind,
        model: &'static str,
        property: Option<&str>,
        message: String,
    ) -> Self {
        Self {
            kind,
            model,
            property: property.map(str::to_string),
            message,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Every constraint failure found on one entity.
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    /// The failures in the order they were found
    pub errors: Vec<FieldValidationError>,
}

#[derive(Debug, Clone)]
pub struct FieldValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// Which declared constraint failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    Min,
    Max,
    MinLength,
    MaxLength,
    Pattern,
    /// A required value is missing, null or empty
    Required,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, field: impl Into<String>, kind: ValidationErrorKind, message: String) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message,
        });
    }

    pub fn add_min(
        &mut self,
        field: impl Into<String>,
        min: impl fmt::Display,
        actual: impl fmt::Display,
    ) {
        let message = format!("must be at least {min}, got {actual}");
        self.push(field, ValidationErrorKind::Min, message);
    }

    pub fn add_max(
        &mut self,
        field: impl Into<String>,
        max: impl fmt::Display,
        actual: impl fmt::Display,
    ) {
        let message = format!("must be at most {max}, got {actual}");
        self.push(field, ValidationErrorKind::Max, message);
    }

    pub fn add_min_length(&mut self, field: impl Into<String>, min: usize, actual: usize) {
        self.push(
            field,
            ValidationErrorKind::MinLength,
            format!("must be at least {min} characters, got {actual}"),
        );
    }

    pub fn add_max_length(&mut self, field: impl Into<String>, max: usize, actual: usize) {
        self.push(
            field,
            ValidationErrorKind::MaxLength,
            format!("must be at most {max} characters, got {actual}"),
        );
    }

    pub fn add_pattern(&mut self, field: impl Into<String>, pattern: &str) {
        let message = format!("must match pattern '{pattern}'");
        self.push(field, ValidationErrorKind::Pattern, message);
    }

    pub fn add_required(&mut self, field: impl Into<String>) {
        self.push(field, ValidationErrorKind::Required, "is required".to_string());
    }

    /// `(property, reason)` pairs in the order they were recorded.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors
            .iter()
            .map(|e| (e.field.as_str(), e.message.as_str()))
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failures = self.errors.iter();
        match (failures.next(), self.errors.len()) {
            (None, _) => f.write_str("no constraint failed"),
            (Some(only), 1) => write!(f, "'{}' {}", only.field, only.message),
            (Some(first), n) => {
                write!(f, "{n} constraints failed: '{}' {}", first.field, first.message)?;
                failures.try_for_each(|e| write!(f, "; '{}' {}", e.field, e.message))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// Error
// ============================================================================

impl Error {
    /// A property name that the model does not map.
    pub fn unknown_property(model: &'static str, property: &str) -> Self {
        Error::Graph(GraphError::new(
            GraphErrorKind::UnknownProperty,
            model,
            Some(property),
            format!("{model} has no mapped property '{property}'"),
        ))
    }

    /// The entity cell is already borrowed.
    pub fn borrowed(model: &'static str) -> Self {
        Error::Graph(GraphError::new(
            GraphErrorKind::Borrowed,
            model,
            None,
            format!("{model} entity is already borrowed"),
        ))
    }

    /// A link that does not fit the slot it was assigned to.
    pub fn link_mismatch(model: &'static str, property: &str, message: impl Into<String>) -> Self {
        Error::Graph(GraphError::new(
            GraphErrorKind::LinkMismatch,
            model,
            Some(property),
            message.into(),
        ))
    }

    pub fn unregistered(model: &'static str) -> Self {
        Error::Graph(GraphError::new(
            GraphErrorKind::UnregisteredModel,
            model,
            None,
            format!("{model} is not registered with the schema"),
        ))
    }

    /// The property a discovery or graph error is about.
    pub fn offending_property(&self) -> Option<&str> {
        match self {
            Error::UnknownRelationship(e) => Some(&e.property),
            Error::Graph(e) => e.property.as_deref(),
            _ => None,
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Storage(e) if e.is_constraint_violation())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownRelationship(e) => write!(f, "Unknown relationship: {e}"),
            Error::Validation(e) => write!(f, "Validation failed: {e}"),
            Error::DeleteNonexistent { model } => {
                write!(f, "Cannot delete {model} that was never persisted")
            }
            Error::Storage(e) => write!(f, "Storage error: {e}"),
            Error::Type(e) => write!(f, "Type error: {e}"),
            Error::Graph(e) => write!(f, "Graph error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {msg}"),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

macro_rules! error_from {
    ($($source:ty => $variant:ident),* $(,)?) => {$(
        impl From<$source> for Error {
            fn from(err: $source) -> Self {
                Error::$variant(err)
            }
        }
    )*};
}

error_from! {
    RelationshipError => UnknownRelationship,
    ValidationError => Validation,
    StorageError => Storage,
    TypeError => Type,
    GraphError => Graph,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}
