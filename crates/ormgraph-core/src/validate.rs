//! Declared-constraint checks run before a save writes anything.
//!
//! Constraints come from the property descriptors (`required`,
//! `min_length`, `max_length`, `min`, `max`, `pattern`). Every violation
//! is collected, so the caller sees the full list of `(property, reason)`
//! pairs rather than the first failure only.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

use crate::error::ValidationError;
use crate::field::{PropertyDescriptor, PropertyKind};
use crate::handle::{DynEntity, Link};
use crate::value::Value;

/// Thread-safe regex cache for compiled patterns.
///
/// Patterns are compiled lazily on first use and cached for the lifetime
/// of the program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// An invalid pattern is logged and treated as a non-match.
///
/// # Example
///
/// ```ignore
/// use ormgraph_core::validate::matches_pattern;
///
/// assert!(matches_pattern("abc", "^[a-z]+$"));
/// assert!(!matches_pattern("ABC", "^[a-z]+$"));
/// ```
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.is_empty(),
        _ => false,
    }
}

fn check_scalar(property: &PropertyDescriptor, value: &Value, errors: &mut ValidationError) {
    let name = property.name;
    if is_blank(value) {
        if property.required {
            errors.add_required(name);
        }
        // Nothing else to check on an absent value.
        if value.is_null() {
            return;
        }
    }

    if let Some(text) = value.as_str() {
        let len = text.chars().count();
        if let Some(min) = property.min_length {
            if len < min {
                errors.add_min_length(name, min, len);
            }
        }
        if let Some(max) = property.max_length {
            if len > max {
                errors.add_max_length(name, max, len);
            }
        }
        if let Some(pattern) = property.pattern {
            if !matches_pattern(text, pattern) {
                errors.add_pattern(name, pattern);
            }
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = property.min {
            if number < min {
                errors.add_min(name, min, number);
            }
        }
        if let Some(max) = property.max {
            if number > max {
                errors.add_max(name, max, number);
            }
        }
    }
}

/// Check every declared constraint of `entity`.
///
/// A required singular relation fails when it is loaded as empty, or when
/// it was never assigned on an entity that is not yet persisted.
pub fn validate_entity(entity: &dyn DynEntity) -> Result<(), ValidationError> {
    let model = entity.model();
    let is_new = entity.entity_id() == 0 && !entity.entity_state().is_hydrated();
    let mut errors = ValidationError::new();

    for property in model.properties() {
        if !property.has_constraints() || property.name == model.primary_key {
            continue;
        }
        match property.kind {
            PropertyKind::Scalar(_) => {
                if let Some(value) = entity.read_column(property.name) {
                    check_scalar(property, &value, &mut errors);
                }
            }
            PropertyKind::Entity { .. } if property.required => {
                let missing = match entity.read_link(property.name) {
                    Some(Link::One(None)) => true,
                    Some(Link::Unloaded) => is_new,
                    _ => false,
                };
                if missing {
                    errors.add_required(property.name);
                }
            }
            _ => {}
        }
    }

    if !errors.is_empty() {
        tracing::debug!(
            model = model.name,
            errors = errors.errors.len(),
            "Entity failed validation"
        );
    }
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationErrorKind;
    use crate::handle::share;
    use crate::related::Related;
    use crate::test_support::{Node, node};

    #[test]
    fn pattern_cache_reuses_compiled() {
        assert!(matches_pattern("abc", "^[a-z]+$"));
        assert!(matches_pattern("xyz", "^[a-z]+$"));
        assert!(!matches_pattern("ABC", "^[a-z]+$"));
    }

    #[test]
    fn invalid_pattern_is_non_match() {
        assert!(!matches_pattern("abc", "(unclosed"));
        assert!(matches_pattern("(ok)", r"^\(ok\)$"));
    }

    #[test]
    fn valid_entity_passes() {
        let mut n = node(0, "leaf");
        n.parent = Related::empty();
        assert!(validate_entity(&n).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let n = node(0, "TooLongAndUpper");
        let err = validate_entity(&n).unwrap_err();
        let kinds: Vec<_> = err.errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ValidationErrorKind::MaxLength, ValidationErrorKind::Pattern]
        );
    }

    #[test]
    fn empty_text_is_missing() {
        let n = node(0, "");
        let err = validate_entity(&n).unwrap_err();
        assert_eq!(err.pairs().next(), Some(("label", "is required")));
    }

    #[test]
    fn numeric_bounds() {
        let p = PropertyDescriptor::scalar("age", crate::types::SqlType::Integer)
            .min(0.0)
            .max(150.0);
        let mut errors = ValidationError::new();
        check_scalar(&p, &Value::Int(-1), &mut errors);
        check_scalar(&p, &Value::Int(200), &mut errors);
        check_scalar(&p, &Value::Int(30), &mut errors);
        check_scalar(&p, &Value::Null, &mut errors);
        let kinds: Vec<_> = errors.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ValidationErrorKind::Min, ValidationErrorKind::Max]);
    }

    #[test]
    fn shared_entities_validate_through_handles() {
        let n: crate::handle::Shared<Node> = share(node(0, "ok"));
        let handle = crate::handle::EntityHandle::new(&n);
        let entity = handle.borrow().unwrap();
        assert!(validate_entity(&*entity).is_ok());
    }
}
