//! Storage type and field role inference from Rust types.

use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::{GenericArgument, PathArguments, Type};

/// What a struct field is, judged by its type.
#[derive(Debug, Clone)]
pub enum FieldRole {
    /// A plain column.
    Scalar,
    /// `Related<T>`: a single related entity of type `T`.
    One(Type),
    /// `RelatedMany<T>`: a list of related entities of type `T`.
    Many(Type),
    /// The `EntityState` slot.
    State,
}

/// Classify a field by the last segment of its type path.
pub fn field_role(ty: &Type) -> FieldRole {
    let Type::Path(type_path) = ty else {
        return FieldRole::Scalar;
    };
    let Some(segment) = type_path.path.segments.last() else {
        return FieldRole::Scalar;
    };
    let ident = segment.ident.to_string();
    match ident.as_str() {
        "EntityState" => FieldRole::State,
        "Related" | "RelatedMany" => match first_type_argument(&segment.arguments) {
            Some(inner) if ident == "Related" => FieldRole::One(inner.clone()),
            Some(inner) => FieldRole::Many(inner.clone()),
            None => FieldRole::Scalar,
        },
        _ => FieldRole::Scalar,
    }
}

fn first_type_argument(arguments: &PathArguments) -> Option<&Type> {
    if let PathArguments::AngleBracketed(args) = arguments {
        if let Some(GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

/// Infer the storage type of a scalar field, returning a TokenStream that
/// constructs the appropriate `SqlType` variant.
///
/// `Option<T>` unwraps to `T`; unknown types fall back to text.
pub fn infer_sql_type(ty: &Type) -> TokenStream {
    let inner_ty = unwrap_option_type(ty);
    let type_str = type_to_string(inner_ty);

    match type_str.as_str() {
        "bool" => quote! { ormgraph_core::SqlType::Boolean },

        "i8" | "i16" | "i32" | "u8" | "u16" => quote! { ormgraph_core::SqlType::Integer },
        "i64" | "u32" | "u64" | "isize" | "usize" => quote! { ormgraph_core::SqlType::BigInt },

        "f32" | "f64" => quote! { ormgraph_core::SqlType::Double },

        "String" | "&str" | "str" | "char" => quote! { ormgraph_core::SqlType::Text },

        "Vec<u8>" | "&[u8]" | "[u8]" => quote! { ormgraph_core::SqlType::Blob },

        "serde_json::Value" | "Value" => quote! { ormgraph_core::SqlType::Json },

        _ => quote! { ormgraph_core::SqlType::Text },
    }
}

/// Is the type `Option<T>`?
pub fn is_option_type(ty: &Type) -> bool {
    !std::ptr::eq(unwrap_option_type(ty), ty)
}

/// Is the type exactly `i64`?
pub fn is_i64(ty: &Type) -> bool {
    type_to_string(ty) == "i64"
}

fn unwrap_option_type(ty: &Type) -> &Type {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let Some(inner) = first_type_argument(&segment.arguments) {
                    return inner;
                }
            }
        }
    }
    ty
}

fn type_to_string(ty: &Type) -> String {
    ty.to_token_stream().to_string().replace(' ', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_infer_primitives() {
        let ty: Type = parse_quote!(i32);
        assert!(infer_sql_type(&ty).to_string().contains("Integer"));

        let ty: Type = parse_quote!(i64);
        assert!(infer_sql_type(&ty).to_string().contains("BigInt"));

        let ty: Type = parse_quote!(bool);
        assert!(infer_sql_type(&ty).to_string().contains("Boolean"));

        let ty: Type = parse_quote!(Vec<u8>);
        assert!(infer_sql_type(&ty).to_string().contains("Blob"));
    }

    #[test]
    fn test_infer_option() {
        let ty: Type = parse_quote!(Option<f64>);
        assert!(infer_sql_type(&ty).to_string().contains("Double"));
        assert!(is_option_type(&ty));
        assert!(!is_option_type(&parse_quote!(f64)));
    }

    #[test]
    fn test_field_roles() {
        assert!(matches!(field_role(&parse_quote!(Related<User>)), FieldRole::One(_)));
        assert!(matches!(
            field_role(&parse_quote!(ormgraph::RelatedMany<Car>)),
            FieldRole::Many(_)
        ));
        assert!(matches!(field_role(&parse_quote!(EntityState)), FieldRole::State));
        assert!(matches!(field_role(&parse_quote!(String)), FieldRole::Scalar));
        assert!(matches!(field_role(&parse_quote!(Related)), FieldRole::Scalar));
    }

    #[test]
    fn test_is_i64() {
        assert!(is_i64(&parse_quote!(i64)));
        assert!(!is_i64(&parse_quote!(Option<i64>)));
    }
}
