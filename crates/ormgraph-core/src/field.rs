//! Mapped property definitions.

use crate::types::SqlType;

/// What a mapped property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// A plain column value.
    Scalar(SqlType),
    /// A single related entity of the named model.
    Entity { target: &'static str },
    /// A list of related entities of the named model.
    EntityList { target: &'static str },
}

/// Which automatic timestamp a property carries, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampRole {
    Created,
    Updated,
}

/// Metadata about one mapped property of a model.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Rust field name; also the column name for scalars
    pub name: &'static str,
    pub kind: PropertyKind,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Whether a unique constraint applies
    pub unique: bool,
    /// Explicit counterpart property on the related model
    pub inverse: Option<&'static str>,
    pub timestamp: Option<TimestampRole>,
    /// Value must be present (non-NULL, non-empty text, relation set)
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Regex the text value must match
    pub pattern: Option<&'static str>,
}

impl PropertyDescriptor {
    const fn with_kind(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            unique: false,
            inverse: None,
            timestamp: None,
            required: false,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
        }
    }

    /// A scalar column.
    pub const fn scalar(name: &'static str, sql_type: SqlType) -> Self {
        Self::with_kind(name, PropertyKind::Scalar(sql_type))
    }

    /// A single related entity.
    pub const fn entity(name: &'static str, target: &'static str) -> Self {
        Self::with_kind(name, PropertyKind::Entity { target })
    }

    /// A list of related entities.
    pub const fn entity_list(name: &'static str, target: &'static str) -> Self {
        Self::with_kind(name, PropertyKind::EntityList { target })
    }

    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub const fn inverse(mut self, property: &'static str) -> Self {
        self.inverse = Some(property);
        self
    }

    pub const fn inverse_opt(mut self, property: Option<&'static str>) -> Self {
        self.inverse = property;
        self
    }

    pub const fn timestamp(mut self, role: TimestampRole) -> Self {
        self.timestamp = Some(role);
        self
    }

    pub const fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    pub const fn min_length(mut self, value: usize) -> Self {
        self.min_length = Some(value);
        self
    }

    pub const fn max_length(mut self, value: usize) -> Self {
        self.max_length = Some(value);
        self
    }

    pub const fn min(mut self, value: f64) -> Self {
        self.min = Some(value);
        self
    }

    pub const fn max(mut self, value: f64) -> Self {
        self.max = Some(value);
        self
    }

    pub const fn pattern(mut self, regex: &'static str) -> Self {
        self.pattern = Some(regex);
        self
    }

    /// Is this a plain column?
    pub const fn is_scalar(&self) -> bool {
        matches!(self.kind, PropertyKind::Scalar(_))
    }

    /// Is this a single-entity or list-of-entity property?
    pub const fn is_relation(&self) -> bool {
        !self.is_scalar()
    }

    /// Is this a list-of-entity property?
    pub const fn is_list(&self) -> bool {
        matches!(self.kind, PropertyKind::EntityList { .. })
    }

    /// The related model name for relation properties.
    pub const fn target(&self) -> Option<&'static str> {
        match self.kind {
            PropertyKind::Entity { target } | PropertyKind::EntityList { target } => Some(target),
            PropertyKind::Scalar(_) => None,
        }
    }

    /// Does this property declare any value constraint?
    pub const fn has_constraints(&self) -> bool {
        self.required
            || self.min_length.is_some()
            || self.max_length.is_some()
            || self.min.is_some()
            || self.max.is_some()
            || self.pattern.is_some()
    }
}
