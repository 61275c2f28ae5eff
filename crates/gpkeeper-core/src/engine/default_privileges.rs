use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::DefaultObjectKind;
use crate::error::AdminError;
use crate::session::{AtomicSection, Executor};
use crate::statement::{DefaultScope, Statement};

use super::GrantEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeDefaultPrivileges {
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// One of `Relation`, `Sequence`, `Function`, `Type`, `Schema`.
    pub object_type: String,
    pub target_role: String,
    pub role_specification: String,
}

impl GrantEngine {
    /// Drops every default privilege `target_role` hands out on new objects of
    /// the given kind to `role_specification`.
    pub async fn revoke_default_privileges<S: Executor>(
        &self,
        session: &mut S,
        payload: &RevokeDefaultPrivileges,
    ) -> Result<(), AdminError> {
        let kind = DefaultObjectKind::from_tag(&payload.object_type)
            .ok_or_else(|| AdminError::UnsupportedEntityType(payload.object_type.clone()))?;

        let statement = Statement::RevokeDefault {
            scope: DefaultScope {
                for_role: Some(payload.target_role.clone()),
                schema: payload.schema.clone(),
            },
            kind,
            privileges: BTreeSet::new(),
            role: payload.role_specification.clone(),
        };
        session
            .execute_atomic(&AtomicSection::new(vec![statement]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::testing::{Cluster, RecordingSession};

    fn payload(object_type: &str, schema: Option<&str>) -> RevokeDefaultPrivileges {
        RevokeDefaultPrivileges {
            database: "warehouse".to_string(),
            schema: schema.map(str::to_string),
            object_type: object_type.to_string(),
            target_role: "etl_owner".to_string(),
            role_specification: "analyst".to_string(),
        }
    }

    #[tokio::test]
    async fn revoke_defaults_in_schema() {
        let mut session = RecordingSession::new(Cluster::default());
        let engine = GrantEngine::new(EngineConfig::default());

        engine
            .revoke_default_privileges(&mut session, &payload("Function", Some("sales")))
            .await
            .unwrap();

        assert_eq!(
            session.committed_sql(),
            vec![
                r#"ALTER DEFAULT PRIVILEGES FOR ROLE "etl_owner" IN SCHEMA "sales" REVOKE ALL ON FUNCTIONS FROM "analyst" CASCADE"#
            ]
        );
    }

    #[tokio::test]
    async fn revoke_global_defaults_omits_schema() {
        let mut session = RecordingSession::new(Cluster::default());
        let engine = GrantEngine::new(EngineConfig::default());

        engine
            .revoke_default_privileges(&mut session, &payload("Relation", None))
            .await
            .unwrap();

        assert_eq!(
            session.committed_sql(),
            vec![
                r#"ALTER DEFAULT PRIVILEGES FOR ROLE "etl_owner" REVOKE ALL ON TABLES FROM "analyst" CASCADE"#
            ]
        );
    }

    #[tokio::test]
    async fn unmapped_object_type_is_rejected() {
        let mut session = RecordingSession::new(Cluster::default());
        let engine = GrantEngine::new(EngineConfig::default());

        let err = engine
            .revoke_default_privileges(&mut session, &payload("View", None))
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::UnsupportedEntityType(ref tag) if tag == "View"));
        assert!(session.log().is_empty());
    }
}
