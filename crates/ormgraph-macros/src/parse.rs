//! Attribute parsing for `#[derive(Entity)]`.
//!
//! Parses the struct and its `#[entity(...)]` attributes into an
//! [`EntityDef`], then checks the combinations the generator relies on.

use proc_macro2::Span;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Ident, Lit, Result, Type};

use crate::infer::{FieldRole, field_role, is_i64, is_option_type};

/// Which automatic timestamp a field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampAttr {
    Created,
    Updated,
}

/// Parsed entity definition.
#[derive(Debug)]
pub struct EntityDef {
    /// The struct name (e.g., `User`).
    pub name: Ident,
    /// Explicit `#[entity(table = "...")]` override.
    pub table_name: Option<String>,
    /// `#[entity(hooks)]`: the user implements `EntityHooks` by hand.
    pub hooks: bool,
    pub fields: Vec<FieldDef>,
}

/// Parsed field definition.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    pub ty: Type,
    pub role: FieldRole,
    pub nullable: bool,
    pub primary_key: bool,
    pub skip: bool,
    pub unique: bool,
    pub required: bool,
    pub inverse: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<String>,
    pub timestamp: Option<TimestampAttr>,
}

impl FieldDef {
    pub fn is_scalar(&self) -> bool {
        matches!(self.role, FieldRole::Scalar)
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.role, FieldRole::One(_) | FieldRole::Many(_))
    }
}

impl EntityDef {
    /// The primary key field: the one marked `primary_key`, else `id`.
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .or_else(|| self.fields.iter().find(|f| f.name == "id" && !f.skip))
    }

    /// The `EntityState` field.
    pub fn state_field(&self) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| matches!(f.role, FieldRole::State))
    }

    /// Mapped fields in declaration order (scalars and relations).
    pub fn mapped_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| !f.skip && !matches!(f.role, FieldRole::State))
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.mapped_fields().filter(|f| f.is_scalar())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.mapped_fields().filter(|f| f.is_relation())
    }
}

/// Parse a struct deriving `Entity`.
///
/// Returns an error if:
/// - The input is not a struct with named fields, or is generic
/// - Unknown attributes are present or values have the wrong type
/// - There is no `EntityState` field or no `i64` primary key
/// - Attributes are combined in ways the field type cannot honor
pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    let name = input.ident.clone();

    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Entity cannot be derived for generic structs",
        ));
    }

    let (table_name, hooks) = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not unions",
            ));
        }
    };

    let def = EntityDef {
        name,
        table_name,
        hooks,
        fields,
    };
    validate_entity(&def)?;
    Ok(def)
}

/// Parse struct-level `#[entity(...)]` attributes.
///
/// Supported keys:
/// - `table = "name"` (overrides derived table name)
/// - `hooks` (suppresses the generated empty `EntityHooks` impl)
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<(Option<String>, bool)> {
    let mut table_name: Option<String> = None;
    let mut hooks = false;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table_name.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate entity attribute: table",
                    ));
                }
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    table_name = Some(lit_str.value());
                    Ok(())
                } else {
                    Err(Error::new_spanned(
                        value,
                        "expected string literal for table name",
                    ))
                }
            } else if meta.path.is_ident("hooks") {
                hooks = true;
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown entity struct attribute (supported: table, hooks)",
                ))
            }
        })?;
    }

    Ok((table_name, hooks))
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with fields, not a unit struct",
        )),
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let ty = field.ty.clone();
    let role = field_role(&ty);
    let nullable = is_option_type(&ty);

    let mut def = FieldDef {
        name,
        ty,
        role,
        nullable,
        primary_key: false,
        skip: false,
        unique: false,
        required: false,
        inverse: None,
        min_length: None,
        max_length: None,
        min: None,
        max: None,
        pattern: None,
        timestamp: None,
    };
    parse_field_attrs(&field.attrs, &mut def)?;
    Ok(def)
}

fn parse_str(meta: &syn::meta::ParseNestedMeta<'_>, what: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(s) => Ok(s.value()),
        other => Err(Error::new_spanned(
            other,
            format!("expected string literal for {what}"),
        )),
    }
}

fn parse_usize(meta: &syn::meta::ParseNestedMeta<'_>, what: &str) -> Result<usize> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Int(i) => i.base10_parse(),
        other => Err(Error::new_spanned(
            other,
            format!("expected integer literal for {what}"),
        )),
    }
}

fn parse_number(meta: &syn::meta::ParseNestedMeta<'_>, what: &str) -> Result<f64> {
    let input = meta.value()?;
    let negative = input.peek(syn::Token![-]);
    if negative {
        let _: syn::Token![-] = input.parse()?;
    }
    let value: Lit = input.parse()?;
    let number = match value {
        Lit::Int(i) => i.base10_parse::<f64>()?,
        Lit::Float(f) => f.base10_parse::<f64>()?,
        other => {
            return Err(Error::new_spanned(
                other,
                format!("expected numeric literal for {what}"),
            ));
        }
    };
    Ok(if negative { -number } else { number })
}

/// Parse all `#[entity(...)]` attributes on a field.
fn parse_field_attrs(attrs: &[Attribute], def: &mut FieldDef) -> Result<()> {
    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("primary_key") {
                def.primary_key = true;
            } else if path.is_ident("skip") {
                def.skip = true;
            } else if path.is_ident("unique") {
                def.unique = true;
            } else if path.is_ident("required") {
                def.required = true;
            } else if path.is_ident("created_at") {
                def.timestamp = Some(TimestampAttr::Created);
            } else if path.is_ident("updated_at") {
                def.timestamp = Some(TimestampAttr::Updated);
            } else if path.is_ident("inverse") {
                def.inverse = Some(parse_str(&meta, "inverse")?);
            } else if path.is_ident("pattern") {
                def.pattern = Some(parse_str(&meta, "pattern")?);
            } else if path.is_ident("min_length") {
                def.min_length = Some(parse_usize(&meta, "min_length")?);
            } else if path.is_ident("max_length") {
                def.max_length = Some(parse_usize(&meta, "max_length")?);
            } else if path.is_ident("min") {
                def.min = Some(parse_number(&meta, "min")?);
            } else if path.is_ident("max") {
                def.max = Some(parse_number(&meta, "max")?);
            } else {
                return Err(Error::new_spanned(
                    path,
                    "unknown entity field attribute (supported: primary_key, skip, unique, \
                     required, inverse, min_length, max_length, min, max, pattern, \
                     created_at, updated_at)",
                ));
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Check attribute combinations against field roles.
fn validate_entity(def: &EntityDef) -> Result<()> {
    let states: Vec<&FieldDef> = def
        .fields
        .iter()
        .filter(|f| matches!(f.role, FieldRole::State))
        .collect();
    match states.as_slice() {
        [] => {
            return Err(Error::new_spanned(
                &def.name,
                "Entity requires an `EntityState` field",
            ));
        }
        [_] => {}
        [_, extra, ..] => {
            return Err(Error::new_spanned(
                &extra.name,
                "Entity allows only one `EntityState` field",
            ));
        }
    }

    if def.fields.iter().filter(|f| f.primary_key).count() > 1 {
        return Err(Error::new_spanned(
            &def.name,
            "Entity supports a single primary key field",
        ));
    }
    let Some(pk) = def.primary_key() else {
        return Err(Error::new_spanned(
            &def.name,
            "Entity requires an `id: i64` field or a field marked #[entity(primary_key)]",
        ));
    };
    if !pk.is_scalar() || !is_i64(&pk.ty) || pk.skip {
        return Err(Error::new_spanned(
            &pk.ty,
            "the primary key must be a mapped `i64` field (0 = not persisted)",
        ));
    }

    for field in &def.fields {
        let scalar_only = field.min_length.is_some()
            || field.max_length.is_some()
            || field.min.is_some()
            || field.max.is_some()
            || field.pattern.is_some()
            || field.unique
            || field.timestamp.is_some();
        if field.is_relation() && scalar_only {
            return Err(Error::new_spanned(
                &field.name,
                "relation fields only accept `inverse`, `required` and `skip`",
            ));
        }
        if field.inverse.is_some() && !field.is_relation() {
            return Err(Error::new_spanned(
                &field.name,
                "`inverse` applies to `Related<T>` and `RelatedMany<T>` fields only",
            ));
        }
        if matches!(field.role, FieldRole::State) && field.skip {
            return Err(Error::new_spanned(
                &field.name,
                "the `EntityState` field cannot be skipped",
            ));
        }
        if matches!(field.role, FieldRole::Many(_)) && field.required {
            return Err(Error::new_spanned(
                &field.name,
                "`required` applies to scalar and `Related<T>` fields only",
            ));
        }
        if let (Some(min), Some(max)) = (field.min_length, field.max_length) {
            if min > max {
                return Err(Error::new_spanned(
                    &field.name,
                    "min_length must not exceed max_length",
                ));
            }
        }
    }

    for role in [TimestampAttr::Created, TimestampAttr::Updated] {
        if def.fields.iter().filter(|f| f.timestamp == Some(role)).count() > 1 {
            return Err(Error::new_spanned(
                &def.name,
                "at most one field per timestamp role",
            ));
        }
    }

    Ok(())
}
