use super::{Behavior, HookContext, HookOutcome};
use crate::context::CurrentUser;
use crate::error::{OrmError, OrmResult};
use crate::schema::{FieldDef, FieldType};
use crate::value::Value;
use async_trait::async_trait;

/// Permission bits, unix style: three bits each for owner, group and other.
///
/// The low bit of each triple grants deletion where unix grants execute.
pub mod perm {
    pub const READ: i64 = 0b100;
    pub const WRITE: i64 = 0b010;
    pub const DELETE: i64 = 0b001;

    pub const OWNER_SHIFT: u32 = 6;
    pub const GROUP_SHIFT: u32 = 3;
    pub const OTHER_SHIFT: u32 = 0;

    /// `rwd` for the owner, `r` for group and others.
    pub const DEFAULT_MODE: i64 = 0o744;
}

/// Row-level ownership and permission bits.
///
/// Adds `owner_id`, `group_id` and `permissions`. New rows are owned by the
/// connection's current user. Updates need the write bit and removal the
/// delete bit for whichever class (owner, group, other) the user falls in;
/// superusers pass every check.
#[derive(Debug, Clone, Copy)]
pub struct Permissions {
    default_mode: i64,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            default_mode: perm::DEFAULT_MODE,
        }
    }
}

impl Permissions {
    pub fn new(default_mode: i64) -> Self {
        Self { default_mode }
    }

    /// Whether `user` holds `bit` on a row with the given ownership.
    pub fn allows(
        user: Option<&dyn CurrentUser>,
        owner_id: Option<i64>,
        group_id: Option<i64>,
        mode: i64,
        bit: i64,
    ) -> bool {
        let shift = match user {
            Some(u) if u.is_superuser() => return true,
            Some(u) if owner_id == Some(u.user_id()) => perm::OWNER_SHIFT,
            Some(u) if group_id.is_some() && u.group_id() == group_id => perm::GROUP_SHIFT,
            _ => perm::OTHER_SHIFT,
        };
        (mode >> shift) & bit == bit
    }

    fn check(&self, ctx: &HookContext<'_>, bit: i64, action: &str) -> OrmResult<()> {
        let stored = |field: &str| ctx.original(field).and_then(Value::as_i64);
        let mode = stored("permissions").unwrap_or(self.default_mode);
        if Self::allows(
            ctx.conn.current_user(),
            stored("owner_id"),
            stored("group_id"),
            mode,
            bit,
        ) {
            Ok(())
        } else {
            Err(OrmError::PermissionDenied {
                table: ctx.table.to_string(),
                action: action.to_string(),
            })
        }
    }
}

#[async_trait]
impl Behavior for Permissions {
    fn name(&self) -> &'static str {
        "permissions"
    }

    fn extra_fields(&self) -> Vec<FieldDef> {
        vec![
            FieldDef::new("owner_id", FieldType::Integer),
            FieldDef::new("group_id", FieldType::Integer),
            FieldDef::new("permissions", FieldType::Integer),
        ]
    }

    async fn on_pre_save(&self, ctx: &mut HookContext<'_>) -> OrmResult<()> {
        if !ctx.is_new {
            return self.check(ctx, perm::WRITE, "update");
        }
        let unset = |ctx: &HookContext<'_>, field: &str| ctx.get(field).is_none_or(Value::is_null);
        if let Some(user) = ctx.conn.current_user() {
            let (user_id, group_id) = (user.user_id(), user.group_id());
            if unset(ctx, "owner_id") {
                ctx.set("owner_id", user_id);
            }
            if unset(ctx, "group_id") {
                ctx.set("group_id", group_id);
            }
        }
        if unset(ctx, "permissions") {
            ctx.set("permissions", self.default_mode);
        }
        Ok(())
    }

    async fn on_pre_remove(&self, ctx: &mut HookContext<'_>) -> OrmResult<HookOutcome> {
        self.check(ctx, perm::DELETE, "delete")?;
        Ok(HookOutcome::Continue)
    }
}
