//! Procedural macros for ormgraph.
//!
//! `ormgraph-macros` is the **compile-time codegen layer**. It turns plain
//! Rust structs into mapped entities by generating a cached model
//! descriptor, the `Entity` trait implementation and change-tracking
//! setters.
//!
//! # Role In The Architecture
//!
//! - **Model metadata**: the descriptor feeds relationship discovery, so
//!   relation fields only declare their target type (and optionally the
//!   inverse property); key columns and pivot tables are derived.
//! - **Change tracking**: every generated `set_<field>` records the first
//!   original value into the entity's `EntityState`.
//!
//! These macros are used by application crates via the `ormgraph` facade.

use proc_macro::TokenStream;
use syn::ext::IdentExt;

mod infer;
mod parse;

use infer::FieldRole;
use parse::{EntityDef, FieldDef, TimestampAttr, parse_entity};

/// Derive macro for the `Entity` trait.
///
/// This macro generates:
/// - `MODEL_NAME` and a descriptor cached for the process lifetime
/// - column and relation-slot accessors used by the save and merge engines
/// - `set_<field>` setters that record changes, and `<list>_mut()` for
///   in-place edits of list relations
/// - an empty `EntityHooks` implementation unless `#[entity(hooks)]`
///
/// # Attributes
///
/// - `#[entity(table = "name")]` - Override the table name (defaults to the pluralized snake_case struct name)
/// - `#[entity(hooks)]` - The struct implements `EntityHooks` by hand
/// - `#[entity(primary_key)]` - Mark the `i64` key field (defaults to `id`)
/// - `#[entity(skip)]` - Not mapped
/// - `#[entity(unique)]` - Unique column
/// - `#[entity(required)]` - Must be present on save
/// - `#[entity(min_length = N, max_length = N, min = X, max = X, pattern = "re")]` - Value constraints
/// - `#[entity(created_at)]`, `#[entity(updated_at)]` - Managed timestamps
/// - `#[entity(inverse = "field")]` - Counterpart property on the related model
///
/// # Example
///
/// ```ignore
/// use ormgraph::prelude::*;
///
/// #[derive(Entity, Default)]
/// struct Car {
///     id: i64,
///
///     #[entity(required, max_length = 40)]
///     model: String,
///
///     #[entity(inverse = "cars")]
///     owner: Related<User>,
///
///     state: EntityState,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let entity = match parse_entity(&input) {
        Ok(e) => e,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_entity_impl(&entity).into()
}

fn property_name(field: &FieldDef) -> String {
    field.name.unraw().to_string()
}

/// Generate the Entity trait implementation from the parsed definition.
fn generate_entity_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let model_name = name.unraw().to_string();

    // parse_entity guarantees both exist
    let (Some(pk), Some(state)) = (entity.primary_key(), entity.state_field()) else {
        return syn::Error::new_spanned(name, "Entity requires a primary key and an EntityState")
            .to_compile_error();
    };
    let pk_ident = &pk.name;
    let pk_name = property_name(pk);
    let state_ident = &state.name;

    let descriptor = generate_descriptor(entity, &model_name, &pk_name);
    let blank = generate_blank(entity);
    let (column_body, set_column_body) = generate_columns(entity);
    let (link_body, set_link_body) = generate_links(entity);
    let setters = generate_setters(entity, pk, state_ident);

    let hooks_impl = if entity.hooks {
        quote::quote! {}
    } else {
        quote::quote! {
            impl ormgraph_core::EntityHooks for #name {}
        }
    };

    quote::quote! {
        impl ormgraph_core::Entity for #name {
            const MODEL_NAME: &'static str = #model_name;

            fn descriptor() -> &'static ormgraph_core::ModelDescriptor {
                static DESCRIPTOR: ::std::sync::OnceLock<ormgraph_core::ModelDescriptor> =
                    ::std::sync::OnceLock::new();
                DESCRIPTOR.get_or_init(|| { #descriptor })
            }

            fn blank() -> Self {
                #blank
            }

            fn state(&self) -> &ormgraph_core::EntityState {
                &self.#state_ident
            }

            fn state_mut(&mut self) -> &mut ormgraph_core::EntityState {
                &mut self.#state_ident
            }

            fn id(&self) -> i64 {
                self.#pk_ident
            }

            fn set_id(&mut self, id: i64) {
                self.#pk_ident = id;
            }

            fn column(&self, property: &str) -> Option<ormgraph_core::Value> {
                #column_body
            }

            fn set_column(
                &mut self,
                property: &str,
                value: &ormgraph_core::Value,
            ) -> ormgraph_core::Result<()> {
                #set_column_body
            }

            fn link(&self, property: &str) -> Option<ormgraph_core::Link> {
                #link_body
            }

            fn set_link(
                &mut self,
                property: &str,
                link: ormgraph_core::Link,
            ) -> ormgraph_core::Result<()> {
                #set_link_body
            }
        }

        #hooks_impl

        #setters
    }
}

/// Builder chain producing the `ModelDescriptor`.
fn generate_descriptor(
    entity: &EntityDef,
    model_name: &str,
    pk_name: &str,
) -> proc_macro2::TokenStream {
    let table = entity
        .table_name
        .as_ref()
        .map(|t| quote::quote! { .table(#t) });

    let properties = entity.mapped_fields().map(|field| {
        let prop = property_name(field);
        match &field.role {
            FieldRole::One(target) | FieldRole::Many(target) => {
                let ctor = if matches!(field.role, FieldRole::One(_)) {
                    quote::quote! { entity }
                } else {
                    quote::quote! { entity_list }
                };
                let inverse = field.inverse.as_ref().map(|i| quote::quote! { .inverse(#i) });
                let required = field.required.then(|| quote::quote! { .required(true) });
                quote::quote! {
                    .property(
                        ormgraph_core::PropertyDescriptor::#ctor(
                            #prop,
                            <#target as ormgraph_core::Entity>::MODEL_NAME,
                        )
                        #inverse
                        #required
                    )
                }
            }
            FieldRole::Scalar | FieldRole::State => {
                let sql_type = infer::infer_sql_type(&field.ty);
                let nullable = field.nullable && field.name != pk_name;
                let unique = field.unique.then(|| quote::quote! { .unique(true) });
                let required = field.required.then(|| quote::quote! { .required(true) });
                let min_length = field.min_length.map(|v| quote::quote! { .min_length(#v) });
                let max_length = field.max_length.map(|v| quote::quote! { .max_length(#v) });
                let min = field.min.map(|v| quote::quote! { .min(#v) });
                let max = field.max.map(|v| quote::quote! { .max(#v) });
                let pattern = field.pattern.as_ref().map(|p| quote::quote! { .pattern(#p) });
                let timestamp = field.timestamp.map(|role| match role {
                    TimestampAttr::Created => {
                        quote::quote! { .timestamp(ormgraph_core::TimestampRole::Created) }
                    }
                    TimestampAttr::Updated => {
                        quote::quote! { .timestamp(ormgraph_core::TimestampRole::Updated) }
                    }
                });
                quote::quote! {
                    .property(
                        ormgraph_core::PropertyDescriptor::scalar(#prop, #sql_type)
                            .nullable(#nullable)
                            #unique #required #min_length #max_length #min #max #pattern #timestamp
                    )
                }
            }
        }
    });

    quote::quote! {
        ormgraph_core::ModelDescriptor::new(#model_name, #pk_name)
            #table
            #(#properties)*
    }
}

/// Struct literal with every field at its default.
fn generate_blank(entity: &EntityDef) -> proc_macro2::TokenStream {
    let fields = entity.fields.iter().map(|f| {
        let ident = &f.name;
        quote::quote! { #ident: ::core::default::Default::default() }
    });
    quote::quote! {
        Self { #(#fields),* }
    }
}

fn generate_columns(entity: &EntityDef) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    let scalars: Vec<&FieldDef> = entity.scalar_fields().collect();

    let read_arms = scalars.iter().map(|f| {
        let ident = &f.name;
        let prop = property_name(f);
        quote::quote! {
            #prop => Some(ormgraph_core::Value::from(::core::clone::Clone::clone(&self.#ident))),
        }
    });

    let write_arms = scalars.iter().map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        let prop = property_name(f);
        quote::quote! {
            #prop => self.#ident = <#ty as ormgraph_core::FromValue>::from_value(value)?,
        }
    });

    let read = quote::quote! {
        match property {
            #(#read_arms)*
            _ => None,
        }
    };
    let write = quote::quote! {
        match property {
            #(#write_arms)*
            _ => {
                return Err(ormgraph_core::Error::unknown_property(
                    <Self as ormgraph_core::Entity>::MODEL_NAME,
                    property,
                ));
            }
        }
        Ok(())
    };
    (read, write)
}

fn generate_links(entity: &EntityDef) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    let relations: Vec<&FieldDef> = entity.relation_fields().collect();

    let read_arms = relations.iter().map(|f| {
        let ident = &f.name;
        let prop = property_name(f);
        quote::quote! {
            #prop => Some(ormgraph_core::RelationSlot::to_link(&self.#ident)),
        }
    });

    let write_arms = relations.iter().map(|f| {
        let ident = &f.name;
        let prop = property_name(f);
        quote::quote! {
            #prop => ormgraph_core::RelationSlot::assign(
                &mut self.#ident,
                <Self as ormgraph_core::Entity>::MODEL_NAME,
                property,
                link,
            ),
        }
    });

    let read = quote::quote! {
        match property {
            #(#read_arms)*
            _ => None,
        }
    };
    let write = quote::quote! {
        match property {
            #(#write_arms)*
            _ => Err(ormgraph_core::Error::unknown_property(
                <Self as ormgraph_core::Entity>::MODEL_NAME,
                property,
            )),
        }
    };
    (read, write)
}

/// Inherent setters that record changes in the state field.
fn generate_setters(
    entity: &EntityDef,
    pk: &FieldDef,
    state: &syn::Ident,
) -> proc_macro2::TokenStream {
    let name = &entity.name;

    let methods = entity
        .mapped_fields()
        .filter(|f| f.name != pk.name)
        .map(|field| {
            let ident = &field.name;
            let prop = property_name(field);
            let setter = quote::format_ident!("set_{}", field.name.unraw());
            let ty = &field.ty;
            match &field.role {
                FieldRole::One(target) => quote::quote! {
                    pub fn #setter(&mut self, value: Option<ormgraph_core::Shared<#target>>) {
                        let old = ormgraph_core::RelationSlot::to_link(&self.#ident);
                        self.#ident.set(value);
                        let new = ormgraph_core::RelationSlot::to_link(&self.#ident);
                        self.#state.record_link_assignment(#prop, &old, &new);
                    }
                },
                FieldRole::Many(target) => {
                    let accessor = quote::format_ident!("{}_mut", field.name.unraw());
                    quote::quote! {
                        pub fn #setter(&mut self, items: Vec<ormgraph_core::Shared<#target>>) {
                            let old = ormgraph_core::RelationSlot::to_link(&self.#ident);
                            self.#ident.set(items);
                            let new = ormgraph_core::RelationSlot::to_link(&self.#ident);
                            self.#state.record_link_assignment(#prop, &old, &new);
                        }

                        /// Edit the list in place. Pushing onto an unloaded list
                        /// records additions; the stored members are kept on save.
                        pub fn #accessor(&mut self) -> &mut #ty {
                            let current = ormgraph_core::RelationSlot::to_link(&self.#ident);
                            self.#state.record_list_edit(#prop, &current);
                            &mut self.#ident
                        }
                    }
                }
                FieldRole::Scalar | FieldRole::State => quote::quote! {
                    pub fn #setter(&mut self, value: #ty) {
                        let old = ::std::mem::replace(&mut self.#ident, value);
                        self.#state.record_assignment(#prop, ormgraph_core::Value::from(old));
                    }
                },
            }
        });

    quote::quote! {
        impl #name {
            #(#methods)*
        }
    }
}
