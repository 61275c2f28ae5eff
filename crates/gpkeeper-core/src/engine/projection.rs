use std::collections::HashMap;

use serde::Deserialize;

use crate::acl::{PermissionRule, decode_many};
use crate::catalog::{MembershipEdge, ObjectClass, Oid, RoleNode};
use crate::error::AdminError;
use crate::graph::RoleGraph;
use crate::session::Catalog;

/// Names exactly one database, schema or table by which fields are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectSelector {
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

impl ObjectSelector {
    pub fn class(&self) -> Option<ObjectClass> {
        match (self.schema.is_some(), self.table.is_some()) {
            (false, false) => Some(ObjectClass::Database),
            (true, false) => Some(ObjectClass::Schema),
            (true, true) => Some(ObjectClass::Table),
            (false, true) => None,
        }
    }
}

/// Expands raw ACL items into everything each role effectively holds.
///
/// Output keeps the source items, adds full control for superusers, fans PUBLIC
/// items out to every role, and pushes each item down to all transitive members
/// of its grantee with the grantee recorded as grantor.
pub fn project_permissions(
    class: ObjectClass,
    acl: &[String],
    roles: &[RoleNode],
    edges: &[MembershipEdge],
) -> Result<Vec<PermissionRule>, AdminError> {
    let graph = RoleGraph::new(roles.iter().map(|r| r.oid), edges);
    let members = graph.transitive_members()?;

    let oid_by_name: HashMap<&str, Oid> =
        roles.iter().map(|r| (r.rolname.as_str(), r.oid)).collect();
    let name_by_oid: HashMap<Oid, &str> =
        roles.iter().map(|r| (r.oid, r.rolname.as_str())).collect();

    let mut projected: Vec<PermissionRule> = roles
        .iter()
        .filter(|r| r.rolsuper)
        .map(|r| PermissionRule::new(&r.rolname, &r.rolname, class.full_privileges(), []))
        .collect();

    for rule in decode_many(acl)? {
        match oid_by_name.get(rule.grantee.as_str()) {
            None => {
                for role in roles {
                    projected.push(rule.reassigned(&role.rolname, &rule.grantor));
                }
            }
            Some(oid) => {
                for member in members.get(oid).into_iter().flatten() {
                    if let Some(name) = name_by_oid.get(member) {
                        projected.push(rule.reassigned(*name, &rule.grantee));
                    }
                }
            }
        }
        projected.push(rule);
    }

    projected.sort_by(|a, b| a.grantee.cmp(&b.grantee));
    Ok(projected)
}

pub async fn effective_permissions<S: Catalog>(
    session: &mut S,
    selector: &ObjectSelector,
) -> Result<Vec<PermissionRule>, AdminError> {
    let Some(class) = selector.class() else {
        return Ok(Vec::new());
    };

    let object = match (class, &selector.schema, &selector.table) {
        (ObjectClass::Table, Some(schema), Some(table)) => session
            .table_acl(schema, table)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("table {schema}.{table}")))?,
        (ObjectClass::Schema, Some(schema), _) => session
            .schema_acl(schema)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("schema {schema}")))?,
        _ => session
            .database_acl(&selector.database)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("database {}", selector.database)))?,
    };

    let roles = session.roles().await?;
    let edges = session.membership_edges().await?;

    project_permissions(class, &object.acl, &roles, &edges)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::acl::Privilege;
    use crate::testing::{Cluster, RecordingSession};

    fn roles(names: &[(Oid, &str)]) -> Vec<RoleNode> {
        names
            .iter()
            .map(|(oid, name)| RoleNode::named(*oid, *name))
            .collect()
    }

    fn edge(from_oid: Oid, to_oid: Oid) -> MembershipEdge {
        MembershipEdge { from_oid, to_oid }
    }

    fn for_grantee<'a>(rules: &'a [PermissionRule], grantee: &str) -> Vec<&'a PermissionRule> {
        rules.iter().filter(|r| r.grantee == grantee).collect()
    }

    #[test]
    fn selector_picks_class_from_present_fields() {
        let mut selector = ObjectSelector {
            database: "warehouse".to_string(),
            ..Default::default()
        };
        assert_eq!(selector.class(), Some(ObjectClass::Database));

        selector.schema = Some("sales".to_string());
        assert_eq!(selector.class(), Some(ObjectClass::Schema));

        selector.table = Some("orders".to_string());
        assert_eq!(selector.class(), Some(ObjectClass::Table));

        selector.schema = None;
        assert_eq!(selector.class(), None);
    }

    #[test]
    fn grants_propagate_to_transitive_members_with_grantee_as_grantor() {
        let roles = roles(&[(1, "reporting"), (2, "analysts"), (3, "mia"), (4, "dba")]);
        let edges = [edge(1, 2), edge(2, 3)];
        let acl = vec!["reporting=r/dba".to_string()];

        let projected = project_permissions(ObjectClass::Table, &acl, &roles, &edges).unwrap();

        let mia = for_grantee(&projected, "mia");
        assert_eq!(mia.len(), 1);
        assert_eq!(mia[0].grantor, "reporting");
        assert_eq!(mia[0].privileges, BTreeSet::from([Privilege::Select]));

        let analysts = for_grantee(&projected, "analysts");
        assert_eq!(analysts[0].grantor, "reporting");

        let reporting = for_grantee(&projected, "reporting");
        assert_eq!(reporting.len(), 1);
        assert_eq!(reporting[0].grantor, "dba");

        assert!(for_grantee(&projected, "dba").is_empty());
    }

    #[test]
    fn public_items_fan_out_to_every_role() {
        let roles = roles(&[(1, "alice"), (2, "bob")]);
        let acl = vec!["=c/dba".to_string()];

        let projected = project_permissions(ObjectClass::Database, &acl, &roles, &[]).unwrap();

        assert_eq!(projected.len(), 3);
        assert_eq!(for_grantee(&projected, "").len(), 1);
        for name in ["alice", "bob"] {
            let rules = for_grantee(&projected, name);
            assert_eq!(rules.len(), 1);
            assert_eq!(rules[0].grantor, "dba");
            assert_eq!(rules[0].privileges, BTreeSet::from([Privilege::Connect]));
        }
    }

    #[test]
    fn superusers_get_full_control_of_the_class() {
        let mut roles = roles(&[(1, "gpadmin"), (2, "alice")]);
        roles[0].rolsuper = true;

        let projected = project_permissions(ObjectClass::Schema, &[], &roles, &[]).unwrap();

        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].grantee, "gpadmin");
        assert_eq!(projected[0].grantor, "gpadmin");
        assert_eq!(
            projected[0].privileges,
            BTreeSet::from([Privilege::Usage, Privilege::Create])
        );
    }

    #[test]
    fn duplicate_grantees_are_kept_and_grouped() {
        let roles = roles(&[(1, "alice"), (2, "bob")]);
        let acl = vec![
            "alice=r/dba".to_string(),
            "bob=a/dba".to_string(),
            "alice=w*/bob".to_string(),
        ];

        let projected = project_permissions(ObjectClass::Table, &acl, &roles, &[]).unwrap();

        let grantees: Vec<&str> = projected.iter().map(|r| r.grantee.as_str()).collect();
        assert_eq!(grantees, vec!["alice", "alice", "bob"]);
    }

    #[test]
    fn membership_cycle_is_an_error() {
        let roles = roles(&[(1, "a"), (2, "b")]);
        let edges = [edge(1, 2), edge(2, 1)];

        let err = project_permissions(ObjectClass::Table, &[], &roles, &edges).unwrap_err();
        assert!(matches!(err, AdminError::MembershipCycle(_)));
    }

    #[tokio::test]
    async fn effective_permissions_read_table_acl_and_graph() {
        let mut cluster = Cluster::default();
        let reporting = cluster.add_role("reporting");
        let mia = cluster.add_role("mia");
        cluster.add_member(reporting, mia);
        cluster.add_superuser("gpadmin");
        cluster.add_table(
            "sales",
            "orders",
            "gpadmin",
            Some(vec!["reporting=r/gpadmin".to_string()]),
        );
        let mut session = RecordingSession::new(cluster);

        let selector = ObjectSelector {
            database: "warehouse".to_string(),
            schema: Some("sales".to_string()),
            table: Some("orders".to_string()),
        };
        let projected = effective_permissions(&mut session, &selector).await.unwrap();

        assert_eq!(for_grantee(&projected, "mia")[0].grantor, "reporting");
        assert_eq!(
            for_grantee(&projected, "gpadmin")[0].effective(),
            ObjectClass::Table.full_privileges()
        );
    }

    #[tokio::test]
    async fn unsupported_selector_yields_nothing() {
        let mut session = RecordingSession::new(Cluster::default());
        let selector = ObjectSelector {
            database: "warehouse".to_string(),
            schema: None,
            table: Some("orders".to_string()),
        };

        let projected = effective_permissions(&mut session, &selector).await.unwrap();
        assert!(projected.is_empty());
    }
}
