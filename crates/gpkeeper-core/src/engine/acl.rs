use serde::Serialize;

use crate::acl::{PermissionRule, decode_many};
use crate::catalog::{DefaultObjectKind, ObjectAcl, is_system_schema};
use crate::error::AdminError;
use crate::session::Catalog;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultPrivilegeEntry {
    pub role: String,
    pub schema: Option<String>,
    pub object_type: Option<DefaultObjectKind>,
    pub rules: Vec<PermissionRule>,
}

pub async fn list_database_acls<S: Catalog>(session: &mut S) -> Result<Vec<ObjectAcl>, AdminError> {
    Ok(session.database_acls().await?)
}

pub async fn database_acl<S: Catalog>(
    session: &mut S,
    database: &str,
) -> Result<ObjectAcl, AdminError> {
    session
        .database_acl(database)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("database {database}")))
}

pub async fn list_schema_acls<S: Catalog>(session: &mut S) -> Result<Vec<ObjectAcl>, AdminError> {
    let mut schemas = session.schema_acls().await?;
    schemas.retain(|schema| !is_system_schema(&schema.name));
    Ok(schemas)
}

pub async fn schema_acl<S: Catalog>(
    session: &mut S,
    schema: &str,
) -> Result<ObjectAcl, AdminError> {
    session
        .schema_acl(schema)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("schema {schema}")))
}

pub async fn list_table_acls<S: Catalog>(
    session: &mut S,
    schema: &str,
) -> Result<Vec<ObjectAcl>, AdminError> {
    Ok(session.table_acls(schema).await?)
}

pub async fn table_acl<S: Catalog>(
    session: &mut S,
    schema: &str,
    table: &str,
) -> Result<ObjectAcl, AdminError> {
    session
        .table_acl(schema, table)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("table {schema}.{table}")))
}

pub async fn list_default_privileges<S: Catalog>(
    session: &mut S,
) -> Result<Vec<DefaultPrivilegeEntry>, AdminError> {
    let rows = session.default_acls().await?;
    rows.into_iter()
        .map(|row| -> Result<DefaultPrivilegeEntry, AdminError> {
            Ok(DefaultPrivilegeEntry {
                rules: decode_many(&row.acl)?,
                object_type: DefaultObjectKind::from_catalog(row.object_type),
                role: row.role,
                schema: row.schema,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Privilege;
    use crate::catalog::DefaultAclRow;
    use crate::testing::{Cluster, RecordingSession};

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let mut session = RecordingSession::new(Cluster::default());

        assert!(matches!(
            database_acl(&mut session, "nope").await,
            Err(AdminError::NotFound(_))
        ));
        assert!(matches!(
            schema_acl(&mut session, "nope").await,
            Err(AdminError::NotFound(_))
        ));
        let err = table_acl(&mut session, "sales", "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "table sales.nope not found");
    }

    #[tokio::test]
    async fn schema_listing_hides_system_namespaces() {
        let mut cluster = Cluster::default();
        cluster.add_schema("pg_catalog", "gpadmin", None);
        cluster.add_schema("public", "gpadmin", None);
        cluster.add_schema("gp_toolkit", "gpadmin", None);
        let mut session = RecordingSession::new(cluster);

        let schemas = list_schema_acls(&mut session).await.unwrap();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["public"]);
        assert_eq!(schemas[0].acl, vec![r#""gpadmin"=UC/"gpadmin""#]);
    }

    #[tokio::test]
    async fn table_listing_is_scoped_to_schema() {
        let mut cluster = Cluster::default();
        cluster.add_table("sales", "orders", "dba", None);
        cluster.add_table("hr", "people", "dba", None);
        let mut session = RecordingSession::new(cluster);

        let tables = list_table_acls(&mut session, "sales").await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "orders");
    }

    #[tokio::test]
    async fn default_privileges_are_decoded() {
        let mut cluster = Cluster::default();
        cluster.default_acls.push(DefaultAclRow {
            oid: 1,
            role: "etl_owner".to_string(),
            schema: Some("sales".to_string()),
            object_type: 'r',
            acl: vec!["analyst=r/etl_owner".to_string()],
        });
        cluster.default_acls.push(DefaultAclRow {
            oid: 2,
            role: "etl_owner".to_string(),
            schema: None,
            object_type: 'f',
            acl: vec!["=X/etl_owner".to_string()],
        });
        let mut session = RecordingSession::new(cluster);

        let entries = list_default_privileges(&mut session).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].object_type, Some(DefaultObjectKind::Relation));
        assert_eq!(entries[0].rules[0].grantee, "analyst");
        assert_eq!(entries[1].schema, None);
        assert!(entries[1].rules[0].privileges.contains(&Privilege::Execute));
    }
}
