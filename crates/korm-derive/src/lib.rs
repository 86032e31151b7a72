//! Derive macros for korm
//!
//! Provides `#[derive(Entity)]` and `#[derive(FromRow)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod attrs;
mod entity;
mod from_row;

/// Derive `FromRow` for a struct.
///
/// # Example
///
/// ```ignore
/// use korm::FromRow;
///
/// #[derive(FromRow)]
/// struct User {
///     id: i64,
///     name: String,
///     #[korm(column = "email_address")]
///     email: Option<String>,
///     #[korm(skip)]
///     cached_rank: u32,
/// }
/// ```
///
/// # Attributes
///
/// - `#[korm(column = "name")]` - Read the field from a differently named column
/// - `#[korm(skip)]` - Not a column; filled with `Default::default()`
#[proc_macro_derive(FromRow, attributes(korm))]
pub fn derive_from_row(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    from_row::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derive `Entity` for a struct. The struct must also implement `FromRow`.
///
/// # Example
///
/// ```ignore
/// use korm::{BehaviorStack, Entity, FromRow, SoftDelete};
///
/// #[derive(Entity, FromRow)]
/// #[korm(table = "user", behaviors = user_behaviors)]
/// #[korm(has_one(Company), has_many(Post), many_to_many(Tag))]
/// struct User {
///     id: i64,
///     name: String,
///     company_id: Option<i64>,
/// }
///
/// fn user_behaviors() -> BehaviorStack {
///     BehaviorStack::new().add(SoftDelete)
/// }
///
/// // generated: trait UserRelations for Record<User>
/// let company = user.company(&conn).await?;
/// let posts = user.posts(&conn).await?;
/// let tags = user.tags(&conn).await?;
/// ```
///
/// # Attributes
///
/// - `#[korm(table = "name")]` - Table name (default: the struct name in snake case)
/// - `#[korm(primary_key(a, b))]` - Primary key columns (default: `id`)
/// - `#[korm(behaviors = path)]` - `fn() -> BehaviorStack` supplying the behaviours
/// - `#[korm(validate = path)]` - `fn(&Self) -> Result<(), ValidationErrors>` run before save
/// - `#[korm(has_one(Type))]`, `#[korm(has_many(Type))]`, `#[korm(many_to_many(Type))]` -
///   relation accessors; add `name = "..."` to rename the accessor
/// - `#[korm(column = "name")]` on a field - Map to a different column
/// - `#[korm(skip)]` on a field - Not a column
/// - `#[korm(sql_type = "TEXT")]` on a field - Literal column type for DDL
#[proc_macro_derive(Entity, attributes(korm))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    entity::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
