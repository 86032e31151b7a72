//! `#[korm(...)]` attribute parsing.

use heck::ToSnakeCase;
use syn::ext::IdentExt;
use syn::{DeriveInput, Field, LitStr, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelationKind {
    HasOne,
    HasMany,
    ManyToMany,
}

impl RelationKind {
    fn from_path(path: &syn::Path) -> Option<Self> {
        if path.is_ident("has_one") {
            Some(Self::HasOne)
        } else if path.is_ident("has_many") {
            Some(Self::HasMany)
        } else if path.is_ident("many_to_many") {
            Some(Self::ManyToMany)
        } else {
            None
        }
    }
}

/// `has_one(Company)`, `has_many(Post, name = "articles")`, ...
pub(crate) struct RelationAttr {
    pub kind: RelationKind,
    pub model: syn::Path,
    pub name: String,
}

/// Struct-level attributes.
#[derive(Default)]
pub(crate) struct EntityAttrs {
    pub table: Option<String>,
    pub primary_keys: Vec<String>,
    pub behaviors: Option<syn::Path>,
    pub validate: Option<syn::Path>,
    pub relations: Vec<RelationAttr>,
}

/// Field-level attributes.
#[derive(Default)]
pub(crate) struct FieldAttrs {
    pub column: Option<String>,
    pub skip: bool,
    pub sql_type: Option<String>,
}

fn default_relation_name(kind: RelationKind, model: &syn::Path) -> String {
    let base = model
        .segments
        .last()
        .map(|s| s.ident.unraw().to_string().to_snake_case())
        .unwrap_or_default();
    match kind {
        RelationKind::HasOne => base,
        RelationKind::HasMany | RelationKind::ManyToMany => format!("{base}s"),
    }
}

pub(crate) fn entity_attrs(input: &DeriveInput) -> Result<EntityAttrs> {
    let mut attrs = EntityAttrs::default();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("korm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let lit: LitStr = meta.value()?.parse()?;
                attrs.table = Some(lit.value());
            } else if meta.path.is_ident("primary_key") {
                meta.parse_nested_meta(|key| {
                    let ident = key
                        .path
                        .get_ident()
                        .ok_or_else(|| key.error("expected a column name"))?;
                    attrs.primary_keys.push(ident.unraw().to_string());
                    Ok(())
                })?;
            } else if meta.path.is_ident("behaviors") {
                attrs.behaviors = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("validate") {
                attrs.validate = Some(meta.value()?.parse()?);
            } else if let Some(kind) = RelationKind::from_path(&meta.path) {
                let mut model: Option<syn::Path> = None;
                let mut name: Option<String> = None;
                meta.parse_nested_meta(|inner| {
                    if inner.path.is_ident("name") {
                        let lit: LitStr = inner.value()?.parse()?;
                        name = Some(lit.value());
                    } else if model.is_none() {
                        model = Some(inner.path.clone());
                    } else {
                        return Err(inner.error("expected `name = \"...\"`"));
                    }
                    Ok(())
                })?;
                let model = model.ok_or_else(|| meta.error("expected the related entity type"))?;
                let name = name.unwrap_or_else(|| default_relation_name(kind, &model));
                attrs.relations.push(RelationAttr { kind, model, name });
            } else {
                return Err(meta.error("unsupported korm attribute"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

pub(crate) fn field_attrs(field: &Field) -> Result<FieldAttrs> {
    let mut attrs = FieldAttrs::default();
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("korm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("column") {
                let lit: LitStr = meta.value()?.parse()?;
                attrs.column = Some(lit.value());
            } else if meta.path.is_ident("skip") {
                attrs.skip = true;
            } else if meta.path.is_ident("sql_type") {
                let lit: LitStr = meta.value()?.parse()?;
                attrs.sql_type = Some(lit.value());
            } else {
                return Err(meta.error("unsupported korm field attribute"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

/// Column name of a field: `#[korm(column = "...")]` or the field name.
pub(crate) fn column_name(field: &Field, attrs: &FieldAttrs) -> Result<String> {
    if let Some(column) = &attrs.column {
        return Ok(column.clone());
    }
    field
        .ident
        .as_ref()
        .map(|ident| ident.unraw().to_string())
        .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))
}

/// Named fields of a plain struct.
pub(crate) fn named_fields<'a>(
    input: &'a DeriveInput,
    derive: &str,
) -> Result<&'a syn::punctuated::Punctuated<Field, syn::Token![,]>> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            format!("{derive} cannot be derived for generic structs"),
        ));
    }
    match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(fields) => Ok(&fields.named),
            _ => Err(syn::Error::new_spanned(
                input,
                format!("{derive} can only be derived for structs with named fields"),
            )),
        },
        _ => Err(syn::Error::new_spanned(
            input,
            format!("{derive} can only be derived for structs"),
        )),
    }
}
