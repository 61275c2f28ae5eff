mod acl;
mod default_privileges;
mod grant;
mod owner;
mod projection;
mod resource;
mod role;
mod sweep;

pub use acl::{
    DefaultPrivilegeEntry, database_acl, list_database_acls, list_default_privileges,
    list_schema_acls, list_table_acls, schema_acl, table_acl,
};
pub use default_privileges::RevokeDefaultPrivileges;
pub use grant::{
    DatabasePrivileges, GrantDatabase, GrantEngine, GrantSchema, GrantSchemasInDatabase,
    GrantTable, GrantTablesInDatabase, GrantTablesInSchema, PrivilegeFlags, SchemaPrivileges,
    TablePrivileges,
};
pub use owner::{OwnerEntity, OwnerEntityUpdate, transfer_owner};
pub use projection::{ObjectSelector, effective_permissions, project_permissions};
pub use resource::{
    MemberDiff, ResourceGroupReconciler, ResourceGroupSpec, ResourceGroupUpdate, diff_members,
};
pub use role::{RoleService, RoleSpec};
pub use sweep::StepOutcome;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub deep_revoke: bool,
    pub install_dblink: bool,
    pub grant_with_admin_option: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deep_revoke: true,
            install_dblink: true,
            grant_with_admin_option: false,
        }
    }
}
