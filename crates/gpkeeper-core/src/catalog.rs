use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::acl::{AclError, PermissionRule, Privilege};

pub type Oid = u32;

pub const INFORMATION_SCHEMA: &str = "information_schema";
const SYSTEM_SCHEMA_PREFIXES: [&str; 2] = ["pg_", "gp_"];

pub fn is_system_schema(name: &str) -> bool {
    name == INFORMATION_SCHEMA
        || SYSTEM_SCHEMA_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Database,
    Schema,
    Table,
}

impl ObjectClass {
    /// The privilege set a superuser implicitly holds on an object of this class.
    pub fn full_privileges(self) -> BTreeSet<Privilege> {
        let privileges: &[Privilege] = match self {
            ObjectClass::Database => &[
                Privilege::Create,
                Privilege::Temporary,
                Privilege::Connect,
            ],
            ObjectClass::Schema => &[Privilege::Usage, Privilege::Create],
            ObjectClass::Table => &[
                Privilege::Select,
                Privilege::Insert,
                Privilege::Update,
                Privilege::Delete,
                Privilege::Truncate,
                Privilege::References,
                Privilege::Trigger,
            ],
        };
        privileges.iter().copied().collect()
    }

    /// What the server assumes when the catalog ACL column is NULL.
    pub fn default_acl(self, owner: &str) -> Vec<String> {
        let owner_rule = PermissionRule::new(owner, owner, self.full_privileges(), []);
        let mut acl = vec![owner_rule.to_string()];
        if self == ObjectClass::Database {
            let public = PermissionRule::new(
                "",
                owner,
                [Privilege::Temporary, Privilege::Connect],
                [],
            );
            acl.push(public.to_string());
        }
        acl
    }
}

/// Name, owner and raw ACL items of one database, schema or table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectAcl {
    pub oid: Oid,
    pub name: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub acl: Vec<String>,
}

impl ObjectAcl {
    pub fn new(
        class: ObjectClass,
        oid: Oid,
        name: impl Into<String>,
        owner: impl Into<String>,
        acl: Option<Vec<String>>,
    ) -> Self {
        let owner = owner.into();
        let acl = acl.unwrap_or_else(|| class.default_acl(&owner));
        Self {
            oid,
            name: name.into(),
            owner,
            schema: None,
            acl,
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn rules(&self) -> Result<Vec<PermissionRule>, AclError> {
        crate::acl::decode_many(&self.acl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleNode {
    pub oid: Oid,
    pub rolname: String,
    pub rolsuper: bool,
    pub rolcreaterole: bool,
    pub rolcreatedb: bool,
    pub rolinherit: bool,
    pub rolcanlogin: bool,
}

impl RoleNode {
    pub fn named(oid: Oid, rolname: impl Into<String>) -> Self {
        Self {
            oid,
            rolname: rolname.into(),
            rolsuper: false,
            rolcreaterole: false,
            rolcreatedb: false,
            rolinherit: true,
            rolcanlogin: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleRef {
    pub oid: Oid,
    pub rolname: String,
}

/// `from_oid` is the granted role, `to_oid` the role that is a member of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MembershipEdge {
    pub from_oid: Oid,
    pub to_oid: Oid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipGraph {
    pub nodes: Vec<RoleRef>,
    pub edges: Vec<MembershipEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceGroup {
    pub oid: Oid,
    pub name: String,
    pub concurrency: i32,
    pub cpu_rate_limit: i32,
    pub memory_limit: i32,
    pub group_members: Vec<String>,
}

/// Collapses the outer-join aggregate of a group without members (`{NULL}`)
/// into an empty list.
pub fn normalize_members(members: Vec<Option<String>>) -> Vec<String> {
    members.into_iter().flatten().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceGroupLimits {
    pub cpu_rate_limit: LimitRange,
    pub memory_limit: LimitRange,
    pub concurrency: LimitRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefaultObjectKind {
    Relation,
    Sequence,
    Function,
    Type,
    Schema,
}

impl DefaultObjectKind {
    pub fn from_catalog(code: char) -> Option<Self> {
        match code {
            'r' => Some(Self::Relation),
            'S' => Some(Self::Sequence),
            'f' => Some(Self::Function),
            'T' => Some(Self::Type),
            'n' => Some(Self::Schema),
            _ => None,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Relation" => Some(Self::Relation),
            "Sequence" => Some(Self::Sequence),
            "Function" => Some(Self::Function),
            "Type" => Some(Self::Type),
            "Schema" => Some(Self::Schema),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Relation => "TABLES",
            Self::Sequence => "SEQUENCES",
            Self::Function => "FUNCTIONS",
            Self::Type => "TYPES",
            Self::Schema => "SCHEMAS",
        }
    }
}

/// One `pg_default_acl` row as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultAclRow {
    pub oid: Oid,
    pub role: String,
    pub schema: Option<String>,
    pub object_type: char,
    pub acl: Vec<String>,
}
