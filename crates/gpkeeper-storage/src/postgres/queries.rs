use sqlx::postgres::types::Oid;

use gpkeeper_core::SessionError;
use gpkeeper_core::catalog::{
    DefaultAclRow, LimitRange, MembershipEdge, ObjectAcl, ObjectClass, ResourceGroup,
    ResourceGroupLimits, RoleNode, RoleRef, normalize_members,
};

pub(crate) fn to_session_error(e: sqlx::Error) -> SessionError {
    SessionError::Execution(e.to_string())
}

#[derive(sqlx::FromRow)]
struct AclRow {
    oid: Oid,
    name: String,
    owner: String,
    schema: Option<String>,
    acl: Option<Vec<String>>,
}

impl AclRow {
    fn into_object(self, class: ObjectClass) -> ObjectAcl {
        let object = ObjectAcl::new(class, self.oid.0, self.name, self.owner, self.acl);
        match self.schema {
            Some(schema) => object.in_schema(schema),
            None => object,
        }
    }
}

const DATABASE_ACLS: &str = r#"
    SELECT d.oid, d.datname::text AS name, pg_get_userbyid(d.datdba)::text AS owner,
           NULL::text AS schema, d.datacl::text[] AS acl
    FROM pg_database d
    WHERE NOT d.datistemplate
"#;

const SCHEMA_ACLS: &str = r#"
    SELECT n.oid, n.nspname::text AS name, pg_get_userbyid(n.nspowner)::text AS owner,
           NULL::text AS schema, n.nspacl::text[] AS acl
    FROM pg_namespace n
"#;

// Tables, views, materialized views, partitioned and foreign tables.
const TABLE_ACLS: &str = r#"
    SELECT c.oid, c.relname::text AS name, pg_get_userbyid(c.relowner)::text AS owner,
           n.nspname::text AS schema, c.relacl::text[] AS acl
    FROM pg_class c
    JOIN pg_namespace n ON c.relnamespace = n.oid
    WHERE c.relkind IN ('r', 'v', 'm', 'p', 'f') AND n.nspname = $1
"#;

pub async fn database_acls<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<ObjectAcl>, SessionError> {
    let query = format!("{DATABASE_ACLS} ORDER BY d.datname");
    let rows: Vec<AclRow> = sqlx::query_as(&query)
        .fetch_all(executor)
        .await
        .map_err(to_session_error)?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_object(ObjectClass::Database))
        .collect())
}

pub async fn database_acl<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    database: &str,
) -> Result<Option<ObjectAcl>, SessionError> {
    let query = format!("{DATABASE_ACLS} AND d.datname = $1");
    let row: Option<AclRow> = sqlx::query_as(&query)
        .bind(database)
        .fetch_optional(executor)
        .await
        .map_err(to_session_error)?;
    Ok(row.map(|row| row.into_object(ObjectClass::Database)))
}

pub async fn schema_acls<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<ObjectAcl>, SessionError> {
    let query = format!("{SCHEMA_ACLS} ORDER BY n.nspname");
    let rows: Vec<AclRow> = sqlx::query_as(&query)
        .fetch_all(executor)
        .await
        .map_err(to_session_error)?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_object(ObjectClass::Schema))
        .collect())
}

pub async fn schema_acl<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
) -> Result<Option<ObjectAcl>, SessionError> {
    let query = format!("{SCHEMA_ACLS} WHERE n.nspname = $1");
    let row: Option<AclRow> = sqlx::query_as(&query)
        .bind(schema)
        .fetch_optional(executor)
        .await
        .map_err(to_session_error)?;
    Ok(row.map(|row| row.into_object(ObjectClass::Schema)))
}

pub async fn table_acls<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
) -> Result<Vec<ObjectAcl>, SessionError> {
    let query = format!("{TABLE_ACLS} ORDER BY c.relname");
    let rows: Vec<AclRow> = sqlx::query_as(&query)
        .bind(schema)
        .fetch_all(executor)
        .await
        .map_err(to_session_error)?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_object(ObjectClass::Table))
        .collect())
}

pub async fn table_acl<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    table: &str,
) -> Result<Option<ObjectAcl>, SessionError> {
    let query = format!("{TABLE_ACLS} AND c.relname = $2");
    let row: Option<AclRow> = sqlx::query_as(&query)
        .bind(schema)
        .bind(table)
        .fetch_optional(executor)
        .await
        .map_err(to_session_error)?;
    Ok(row.map(|row| row.into_object(ObjectClass::Table)))
}

pub async fn namespaces<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<String>, SessionError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT nspname::text FROM pg_namespace ORDER BY nspname")
            .fetch_all(executor)
            .await
            .map_err(to_session_error)?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    oid: Oid,
    rolname: String,
    rolsuper: bool,
    rolcreaterole: bool,
    rolcreatedb: bool,
    rolinherit: bool,
    rolcanlogin: bool,
}

impl From<RoleRow> for RoleNode {
    fn from(row: RoleRow) -> Self {
        RoleNode {
            oid: row.oid.0,
            rolname: row.rolname,
            rolsuper: row.rolsuper,
            rolcreaterole: row.rolcreaterole,
            rolcreatedb: row.rolcreatedb,
            rolinherit: row.rolinherit,
            rolcanlogin: row.rolcanlogin,
        }
    }
}

const ROLES: &str = r#"
    SELECT oid, rolname::text AS rolname, rolsuper, rolcreaterole, rolcreatedb,
           rolinherit, rolcanlogin
    FROM pg_roles
"#;

pub async fn roles<'e>(executor: impl sqlx::PgExecutor<'e>) -> Result<Vec<RoleNode>, SessionError> {
    let query = format!("{ROLES} ORDER BY rolname");
    let rows: Vec<RoleRow> = sqlx::query_as(&query)
        .fetch_all(executor)
        .await
        .map_err(to_session_error)?;
    Ok(rows.into_iter().map(RoleNode::from).collect())
}

pub async fn role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    name: &str,
) -> Result<Option<RoleNode>, SessionError> {
    let query = format!("{ROLES} WHERE rolname = $1");
    let row: Option<RoleRow> = sqlx::query_as(&query)
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(to_session_error)?;
    Ok(row.map(RoleNode::from))
}

pub async fn membership_edges<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<MembershipEdge>, SessionError> {
    let rows: Vec<(Oid, Oid)> = sqlx::query_as("SELECT roleid, member FROM pg_auth_members")
        .fetch_all(executor)
        .await
        .map_err(to_session_error)?;
    Ok(rows
        .into_iter()
        .map(|(role, member)| MembershipEdge {
            from_oid: role.0,
            to_oid: member.0,
        })
        .collect())
}

pub async fn role_members<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    role: &str,
) -> Result<Vec<RoleRef>, SessionError> {
    let rows: Vec<(Oid, String)> = sqlx::query_as(
        r#"
        SELECT m.oid, m.rolname::text
        FROM pg_auth_members am
        JOIN pg_roles g ON am.roleid = g.oid
        JOIN pg_roles m ON am.member = m.oid
        WHERE g.rolname = $1
        ORDER BY m.rolname
        "#,
    )
    .bind(role)
    .fetch_all(executor)
    .await
    .map_err(to_session_error)?;
    Ok(rows
        .into_iter()
        .map(|(oid, rolname)| RoleRef {
            oid: oid.0,
            rolname,
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct ResourceGroupRow {
    oid: Oid,
    name: String,
    concurrency: i32,
    cpu_rate_limit: i32,
    memory_limit: i32,
    group_members: Vec<Option<String>>,
}

impl From<ResourceGroupRow> for ResourceGroup {
    fn from(row: ResourceGroupRow) -> Self {
        ResourceGroup {
            oid: row.oid.0,
            name: row.name,
            concurrency: row.concurrency,
            cpu_rate_limit: row.cpu_rate_limit,
            memory_limit: row.memory_limit,
            group_members: normalize_members(row.group_members),
        }
    }
}

// The outer join yields `{NULL}` for a group without members.
const RESOURCE_GROUPS: &str = r#"
    SELECT c.groupid AS oid, c.groupname::text AS name,
           c.concurrency::int4 AS concurrency,
           c.cpu_rate_limit::int4 AS cpu_rate_limit,
           c.memory_limit::int4 AS memory_limit,
           array_agg(r.rolname::text ORDER BY r.rolname) AS group_members
    FROM gp_toolkit.gp_resgroup_config c
    LEFT JOIN pg_roles r ON r.rolresgroup = c.groupid
"#;

const RESOURCE_GROUP_COLUMNS: &str =
    "GROUP BY c.groupid, c.groupname, c.concurrency, c.cpu_rate_limit, c.memory_limit";

pub async fn resource_groups<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<ResourceGroup>, SessionError> {
    let query = format!("{RESOURCE_GROUPS} {RESOURCE_GROUP_COLUMNS} ORDER BY c.groupname");
    let rows: Vec<ResourceGroupRow> = sqlx::query_as(&query)
        .fetch_all(executor)
        .await
        .map_err(to_session_error)?;
    Ok(rows.into_iter().map(ResourceGroup::from).collect())
}

pub async fn resource_group<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    name: &str,
) -> Result<Option<ResourceGroup>, SessionError> {
    let query = format!("{RESOURCE_GROUPS} WHERE c.groupname = $1 {RESOURCE_GROUP_COLUMNS}");
    let row: Option<ResourceGroupRow> = sqlx::query_as(&query)
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(to_session_error)?;
    Ok(row.map(ResourceGroup::from))
}

#[derive(sqlx::FromRow)]
struct LimitsRow {
    cpu_rate_limit_min: i32,
    cpu_rate_limit_max: i32,
    memory_limit_min: i32,
    memory_limit_max: i32,
    concurrency_min: i32,
    concurrency_max: i32,
}

/// Percentages left over after every existing group's share, and the
/// connection ceiling for concurrency.
pub async fn resource_group_limits<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<ResourceGroupLimits, SessionError> {
    let row: LimitsRow = sqlx::query_as(
        r#"
        SELECT
            1 AS cpu_rate_limit_min,
            (100 - COALESCE(sum(cpu_rate_limit::int4), 0))::int4 AS cpu_rate_limit_max,
            0 AS memory_limit_min,
            (100 - COALESCE(sum(memory_limit::int4), 0))::int4 AS memory_limit_max,
            0 AS concurrency_min,
            current_setting('max_connections')::int4 AS concurrency_max
        FROM gp_toolkit.gp_resgroup_config
        "#,
    )
    .fetch_one(executor)
    .await
    .map_err(to_session_error)?;

    Ok(ResourceGroupLimits {
        cpu_rate_limit: LimitRange {
            min: row.cpu_rate_limit_min,
            max: row.cpu_rate_limit_max,
        },
        memory_limit: LimitRange {
            min: row.memory_limit_min,
            max: row.memory_limit_max,
        },
        concurrency: LimitRange {
            min: row.concurrency_min,
            max: row.concurrency_max,
        },
    })
}

#[derive(sqlx::FromRow)]
struct DefaultAclQueryRow {
    oid: Oid,
    role: String,
    schema: Option<String>,
    object_type: String,
    acl: Vec<String>,
}

pub async fn default_acls<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<DefaultAclRow>, SessionError> {
    let rows: Vec<DefaultAclQueryRow> = sqlx::query_as(
        r#"
        SELECT d.oid, pg_get_userbyid(d.defaclrole)::text AS role,
               n.nspname::text AS schema, d.defaclobjtype::text AS object_type,
               d.defaclacl::text[] AS acl
        FROM pg_default_acl d
        LEFT JOIN pg_namespace n ON d.defaclnamespace = n.oid
        ORDER BY d.oid
        "#,
    )
    .fetch_all(executor)
    .await
    .map_err(to_session_error)?;

    Ok(rows
        .into_iter()
        .map(|row| DefaultAclRow {
            oid: row.oid.0,
            role: row.role,
            schema: row.schema,
            object_type: row.object_type.chars().next().unwrap_or('?'),
            acl: row.acl,
        })
        .collect())
}
