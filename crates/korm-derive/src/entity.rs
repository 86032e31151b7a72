//! Entity derive macro implementation
//!
//! Generates the `Entity` impl, an `<Name>Relations` accessor trait for
//! `Record<Name>` when relations are declared, and the inventory
//! registration.

use crate::attrs::{RelationAttr, RelationKind, column_name, entity_attrs, field_attrs, named_fields};
use heck::ToSnakeCase;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{DeriveInput, Result};

struct Column {
    ident: syn::Ident,
    name: String,
    field_type: Option<TokenStream>,
}

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let attrs = entity_attrs(&input)?;
    let fields = named_fields(&input, "Entity")?;

    let table = attrs
        .table
        .clone()
        .unwrap_or_else(|| name.to_string().to_snake_case());

    let mut columns = Vec::with_capacity(fields.len());
    for field in fields {
        let field_attrs = field_attrs(field)?;
        if field_attrs.skip {
            continue;
        }
        let column = column_name(field, &field_attrs)?;
        let field_type = match &field_attrs.sql_type {
            Some(sql) => Some(quote! { ::korm::FieldType::Raw(#sql.to_string()) }),
            None if column == "id" => None,
            None => rust_field_type(&field.ty),
        };
        columns.push(Column {
            ident: field.ident.clone().ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?,
            name: column,
            field_type,
        });
    }

    let primary_keys = if attrs.primary_keys.is_empty() {
        vec!["id".to_string()]
    } else {
        attrs.primary_keys.clone()
    };
    for key in &primary_keys {
        if !columns.iter().any(|c| &c.name == key) {
            return Err(syn::Error::new_spanned(
                &input.ident,
                format!("primary key column `{key}` is not a field of `{name}`"),
            ));
        }
    }

    let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let field_types: Vec<TokenStream> = columns
        .iter()
        .filter_map(|c| {
            let column = &c.name;
            c.field_type.as_ref().map(|ty| quote! { (#column, #ty) })
        })
        .collect();
    let getters = columns.iter().map(|c| {
        let (ident, column) = (&c.ident, &c.name);
        quote! {
            #column => ::core::option::Option::Some(::korm::Value::from(::core::clone::Clone::clone(&self.#ident)))
        }
    });
    let setters = columns.iter().map(|c| {
        let (ident, column) = (&c.ident, &c.name);
        quote! {
            #column => self.#ident = ::korm::decode(field, value)?
        }
    });

    let behaviors = attrs.behaviors.as_ref().map(|path| {
        quote! {
            fn behaviors() -> ::korm::BehaviorStack {
                #path()
            }
        }
    });
    let validate = attrs.validate.as_ref().map(|path| {
        quote! {
            fn validate(&self) -> ::core::result::Result<(), ::korm::ValidationErrors> {
                #path(self)
            }
        }
    });
    let relation_entries = attrs.relations.iter().map(|rel| {
        let rel_name = &rel.name;
        let model = &rel.model;
        let kind = match rel.kind {
            RelationKind::HasOne => quote! { ::korm::RelationKind::HasOne },
            RelationKind::HasMany => quote! { ::korm::RelationKind::HasMany },
            RelationKind::ManyToMany => quote! { ::korm::RelationKind::ManyToMany },
        };
        quote! {
            ::korm::Relation {
                name: #rel_name,
                kind: #kind,
                table: <#model as ::korm::Entity>::TABLE,
            }
        }
    });
    let relations_trait = relations_trait(&input, &attrs.relations);

    Ok(quote! {
        impl ::korm::Entity for #name {
            const TABLE: &'static str = #table;

            fn fields() -> &'static [&'static str] {
                &[#(#column_names),*]
            }

            fn primary_keys() -> &'static [&'static str] {
                &[#(#primary_keys),*]
            }

            fn field_types() -> ::std::vec::Vec<(&'static str, ::korm::FieldType)> {
                ::std::vec![#(#field_types),*]
            }

            fn relations() -> &'static [::korm::Relation] {
                const RELATIONS: &[::korm::Relation] = &[#(#relation_entries),*];
                RELATIONS
            }

            #behaviors

            fn get_value(&self, field: &str) -> ::core::option::Option<::korm::Value> {
                match field {
                    #(#getters,)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_value(&mut self, field: &str, value: ::korm::Value) -> ::korm::OrmResult<()> {
                match field {
                    #(#setters,)*
                    _ => return ::core::result::Result::Err(::korm::unknown_field(#table, field)),
                }
                ::core::result::Result::Ok(())
            }

            #validate
        }

        #relations_trait

        ::korm::inventory::submit! {
            ::korm::EntityRegistration {
                type_name: ::core::stringify!(#name),
                table: #table,
                fields: &[#(#column_names),*],
                primary_keys: &[#(#primary_keys),*],
            }
        }
    })
}

/// `<Name>Relations`: one accessor per declared relation on `Record<Name>`.
fn relations_trait(input: &DeriveInput, relations: &[RelationAttr]) -> TokenStream {
    if relations.is_empty() {
        return TokenStream::new();
    }
    let name = &input.ident;
    let vis = &input.vis;
    let trait_name = format_ident!("{}Relations", name);

    let mut signatures = Vec::with_capacity(relations.len());
    let mut bodies = Vec::with_capacity(relations.len());
    for rel in relations {
        let method = format_ident!("{}", rel.name);
        let model = &rel.model;
        let (signature, body) = match rel.kind {
            RelationKind::HasOne => (
                quote! {
                    async fn #method(&mut self, conn: &::korm::Connection)
                        -> ::korm::OrmResult<::core::option::Option<&mut ::korm::Record<#model>>>
                },
                quote! { self.has_one::<#model>(conn).await },
            ),
            RelationKind::HasMany => (
                quote! {
                    async fn #method(&mut self, conn: &::korm::Connection)
                        -> ::korm::OrmResult<&mut ::std::vec::Vec<::korm::Record<#model>>>
                },
                quote! { self.has_many::<#model>(conn).await },
            ),
            RelationKind::ManyToMany => (
                quote! {
                    async fn #method(&self, conn: &::korm::Connection)
                        -> ::korm::OrmResult<::std::vec::Vec<::korm::Record<#model>>>
                },
                quote! { self.get_related::<#model>(conn).await },
            ),
        };
        bodies.push(quote! { #signature { #body } });
        signatures.push(quote! { #signature; });
    }

    quote! {
        #[::korm::async_trait]
        #vis trait #trait_name {
            #(#signatures)*
        }

        #[::korm::async_trait]
        impl #trait_name for ::korm::Record<#name> {
            #(#bodies)*
        }
    }
}

/// Column type implied by the Rust type, for the types the name heuristic
/// would get wrong. `None` leaves the column to the heuristic.
fn rust_field_type(ty: &syn::Type) -> Option<TokenStream> {
    let syn::Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident == "Option" {
        if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
            if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                return rust_field_type(inner);
            }
        }
        return None;
    }
    let ty = match segment.ident.to_string().as_str() {
        "bool" => quote! { ::korm::FieldType::Boolean },
        "i8" | "i16" | "i32" | "u8" | "u16" | "u32" => quote! { ::korm::FieldType::Integer },
        "i64" => quote! { ::korm::FieldType::BigInt },
        "f32" | "f64" => quote! { ::korm::FieldType::Float },
        "NaiveDateTime" | "DateTime" => quote! { ::korm::FieldType::DateTime },
        "NaiveDate" => quote! { ::korm::FieldType::Date },
        _ => return None,
    };
    Some(ty)
}
