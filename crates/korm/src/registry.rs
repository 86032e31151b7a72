//! Process-wide list of derived entities.
//!
//! `#[derive(Entity)]` submits one [`EntityRegistration`] per type through
//! `inventory`, so tooling can enumerate the mapped tables without naming
//! every type.

/// Static metadata of one derived entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityRegistration {
    pub type_name: &'static str,
    pub table: &'static str,
    pub fields: &'static [&'static str],
    pub primary_keys: &'static [&'static str],
}

inventory::collect!(EntityRegistration);

/// Every registered entity, sorted by table name.
pub fn entities() -> Vec<&'static EntityRegistration> {
    let mut all: Vec<_> = inventory::iter::<EntityRegistration>.into_iter().collect();
    all.sort_by_key(|reg| (reg.table, reg.type_name));
    all
}

/// The entity mapped to `table`, if one is registered.
pub fn by_table(table: &str) -> Option<&'static EntityRegistration> {
    inventory::iter::<EntityRegistration>
        .into_iter()
        .find(|reg| reg.table == table)
}
