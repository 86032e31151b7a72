//! FromRow derive macro implementation

use crate::attrs::{column_name, field_attrs, named_fields};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let fields = named_fields(&input, "FromRow")?;

    let mut extracts = Vec::with_capacity(fields.len());
    for field in fields {
        let ident = &field.ident;
        let attrs = field_attrs(field)?;
        if attrs.skip {
            extracts.push(quote! { #ident: ::core::default::Default::default() });
        } else {
            let column = column_name(field, &attrs)?;
            extracts.push(quote! { #ident: row.try_get(#column)? });
        }
    }

    Ok(quote! {
        impl ::korm::FromRow for #name {
            fn from_row(row: &::korm::Row) -> ::korm::OrmResult<Self> {
                Ok(Self {
                    #(#extracts),*
                })
            }
        }
    })
}
