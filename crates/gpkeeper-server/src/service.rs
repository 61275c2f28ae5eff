use std::sync::Arc;

use serde::de::DeserializeOwned;

use gpkeeper_core::acl::PermissionRule;
use gpkeeper_core::catalog::{
    MembershipGraph, ObjectAcl, ResourceGroup, ResourceGroupLimits, RoleNode, RoleRef,
};
use gpkeeper_core::engine::{
    self, DefaultPrivilegeEntry, EngineConfig, GrantDatabase, GrantEngine, GrantSchema,
    GrantSchemasInDatabase, GrantTable, GrantTablesInDatabase, GrantTablesInSchema,
    ObjectSelector, OwnerEntityUpdate, ResourceGroupReconciler, ResourceGroupSpec,
    ResourceGroupUpdate, RevokeDefaultPrivileges, RoleService, RoleSpec,
};
use gpkeeper_core::session::{AdminSession, SessionProvider, SessionTarget};

use crate::audit::audit_change;
use crate::error::ApiError;

/// One grant request, tagged by the kind of object it targets.
#[derive(Debug, Clone)]
pub enum GrantRequest {
    Database(GrantDatabase),
    Schema(GrantSchema),
    SchemasInDatabase(GrantSchemasInDatabase),
    Table(GrantTable),
    TablesInSchema(GrantTablesInSchema),
    TablesInDatabase(GrantTablesInDatabase),
}

fn payload<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

impl GrantRequest {
    pub fn parse(kind: &str, body: serde_json::Value) -> Result<Self, ApiError> {
        Ok(match kind {
            "database" => GrantRequest::Database(payload(body)?),
            "schema" => GrantRequest::Schema(payload(body)?),
            "schemas-in-database" => GrantRequest::SchemasInDatabase(payload(body)?),
            "table" => GrantRequest::Table(payload(body)?),
            "tables-in-schema" => GrantRequest::TablesInSchema(payload(body)?),
            "tables-in-database" => GrantRequest::TablesInDatabase(payload(body)?),
            other => return Err(ApiError::UnknownGrantTarget(other.to_string())),
        })
    }

    /// Database the session has to be connected to.
    fn database(&self) -> Option<&str> {
        match self {
            GrantRequest::Database(_) => None,
            GrantRequest::Schema(p) => Some(&p.database),
            GrantRequest::SchemasInDatabase(p) => Some(&p.database),
            GrantRequest::Table(p) => Some(&p.database),
            GrantRequest::TablesInSchema(p) => Some(&p.database),
            GrantRequest::TablesInDatabase(p) => Some(&p.database),
        }
    }

    fn event(&self) -> &'static str {
        match self {
            GrantRequest::Database(_) => "grant_database",
            GrantRequest::Schema(_) => "grant_schema",
            GrantRequest::SchemasInDatabase(_) => "grant_schemas_in_database",
            GrantRequest::Table(_) => "grant_table",
            GrantRequest::TablesInSchema(_) => "grant_tables_in_schema",
            GrantRequest::TablesInDatabase(_) => "grant_tables_in_database",
        }
    }

    fn object(&self) -> String {
        match self {
            GrantRequest::Database(p) => p.name.clone(),
            GrantRequest::Schema(p) => p.name.clone(),
            GrantRequest::SchemasInDatabase(p) => p.database.clone(),
            GrantRequest::Table(p) => format!("{}.{}", p.schema, p.name),
            GrantRequest::TablesInSchema(p) => p.schema.clone(),
            GrantRequest::TablesInDatabase(p) => p.database.clone(),
        }
    }
}

/// Opens one session per request, runs a single engine operation on it and
/// closes it again whatever the outcome.
pub struct AdminService<P: SessionProvider> {
    provider: Arc<P>,
    grants: GrantEngine,
    roles: RoleService,
    resource_groups: ResourceGroupReconciler,
}

impl<P: SessionProvider> AdminService<P> {
    pub fn new(provider: Arc<P>, engine_config: EngineConfig) -> Self {
        Self {
            provider,
            grants: GrantEngine::new(engine_config.clone()),
            roles: RoleService::new(engine_config),
            resource_groups: ResourceGroupReconciler::new(),
        }
    }

    async fn open(&self, context: &str, database: Option<&str>) -> Result<P::Session, ApiError> {
        let mut target = SessionTarget::new(context);
        if let Some(database) = database {
            target = target.with_database(database);
        }
        Ok(self.provider.open(&target).await?)
    }

    async fn release(session: P::Session) {
        if let Err(err) = session.close().await {
            tracing::warn!(error = %err, "failed to close session");
        }
    }

    pub async fn list_databases(&self, context: &str) -> Result<Vec<ObjectAcl>, ApiError> {
        let mut session = self.open(context, None).await?;
        let result = engine::list_database_acls(&mut session).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn list_schemas(
        &self,
        context: &str,
        database: &str,
    ) -> Result<Vec<ObjectAcl>, ApiError> {
        let mut session = self.open(context, Some(database)).await?;
        let result = engine::list_schema_acls(&mut session).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn list_tables(
        &self,
        context: &str,
        database: &str,
        schema: &str,
    ) -> Result<Vec<ObjectAcl>, ApiError> {
        let mut session = self.open(context, Some(database)).await?;
        let result = async {
            engine::schema_acl(&mut session, schema).await?;
            engine::list_table_acls(&mut session, schema).await
        }
        .await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn grant(&self, context: &str, request: &GrantRequest) -> Result<(), ApiError> {
        let mut session = self.open(context, request.database()).await?;
        let result = match request {
            GrantRequest::Database(p) => self.grants.grant_database(&mut session, p).await,
            GrantRequest::Schema(p) => self.grants.grant_schema(&mut session, p).await,
            GrantRequest::SchemasInDatabase(p) => {
                self.grants.grant_schemas_in_database(&mut session, p).await
            }
            GrantRequest::Table(p) => self.grants.grant_table(&mut session, p).await,
            GrantRequest::TablesInSchema(p) => {
                self.grants.grant_tables_in_schema(&mut session, p).await
            }
            GrantRequest::TablesInDatabase(p) => {
                self.grants.grant_tables_in_database(&mut session, p).await
            }
        }
        .map_err(ApiError::from);
        Self::release(session).await;

        audit_change(request.event(), context, &request.object(), &result);
        result
    }

    pub async fn effective_permissions(
        &self,
        context: &str,
        selector: &ObjectSelector,
    ) -> Result<Vec<PermissionRule>, ApiError> {
        let mut session = self.open(context, Some(&selector.database)).await?;
        let result = engine::effective_permissions(&mut session, selector).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn list_default_privileges(
        &self,
        context: &str,
        database: &str,
    ) -> Result<Vec<DefaultPrivilegeEntry>, ApiError> {
        let mut session = self.open(context, Some(database)).await?;
        let result = engine::list_default_privileges(&mut session).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn revoke_default_privileges(
        &self,
        context: &str,
        payload: &RevokeDefaultPrivileges,
    ) -> Result<(), ApiError> {
        let mut session = self.open(context, Some(&payload.database)).await?;
        let result = self
            .grants
            .revoke_default_privileges(&mut session, payload)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        let object = payload.schema.as_deref().unwrap_or(&payload.database);
        audit_change("revoke_default_privileges", context, object, &result);
        result
    }

    pub async fn list_roles(&self, context: &str) -> Result<Vec<RoleNode>, ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self.roles.list_roles(&mut session).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn get_role(&self, context: &str, name: &str) -> Result<RoleNode, ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self.roles.get_role(&mut session, name).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn create_role(&self, context: &str, spec: &RoleSpec) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .roles
            .create_role(&mut session, spec)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("create_role", context, &spec.rolname, &result);
        result
    }

    pub async fn update_role(
        &self,
        context: &str,
        current_name: &str,
        spec: &RoleSpec,
    ) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .roles
            .rename_and_alter(&mut session, current_name, spec)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("update_role", context, current_name, &result);
        result
    }

    pub async fn drop_role(&self, context: &str, name: &str) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .roles
            .drop_role(&mut session, name)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("drop_role", context, name, &result);
        result
    }

    pub async fn list_members(&self, context: &str, role: &str) -> Result<Vec<RoleRef>, ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self.roles.list_members(&mut session, role).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn add_member(
        &self,
        context: &str,
        role: &str,
        member: &str,
        with_admin_option: Option<bool>,
    ) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .roles
            .add_member(&mut session, role, member, with_admin_option)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("add_member", context, &format!("{role}/{member}"), &result);
        result
    }

    pub async fn remove_member(
        &self,
        context: &str,
        role: &str,
        member: &str,
    ) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .roles
            .remove_member(&mut session, role, member)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("remove_member", context, &format!("{role}/{member}"), &result);
        result
    }

    pub async fn role_graph(&self, context: &str) -> Result<MembershipGraph, ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self.roles.membership_graph(&mut session).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn list_resource_groups(
        &self,
        context: &str,
    ) -> Result<Vec<ResourceGroup>, ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self.resource_groups.list_all(&mut session).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn resource_group_limits(
        &self,
        context: &str,
    ) -> Result<ResourceGroupLimits, ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self.resource_groups.available_limits(&mut session).await;
        Self::release(session).await;
        Ok(result?)
    }

    pub async fn create_resource_group(
        &self,
        context: &str,
        spec: &ResourceGroupSpec,
    ) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .resource_groups
            .create(&mut session, spec)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("create_resource_group", context, &spec.name, &result);
        result
    }

    pub async fn update_resource_group(
        &self,
        context: &str,
        name: &str,
        update: &ResourceGroupUpdate,
    ) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .resource_groups
            .update(&mut session, name, update)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("update_resource_group", context, name, &result);
        result
    }

    pub async fn delete_resource_group(&self, context: &str, name: &str) -> Result<(), ApiError> {
        let mut session = self.open(context, None).await?;
        let result = self
            .resource_groups
            .delete(&mut session, name)
            .await
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("delete_resource_group", context, name, &result);
        result
    }

    pub async fn transfer_owner(
        &self,
        context: &str,
        update: &OwnerEntityUpdate,
    ) -> Result<(), ApiError> {
        let object = update.object()?.label();

        let mut session = self.open(context, Some(&update.database)).await?;
        let result = engine::transfer_owner(&mut session, update)
            .await
            .map(|_| ())
            .map_err(ApiError::from);
        Self::release(session).await;

        audit_change("transfer_owner", context, &object, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpkeeper_core::AdminError;
    use gpkeeper_core::engine::TablePrivileges;
    use gpkeeper_core::session::SessionError;
    use gpkeeper_core::testing::{Cluster, RecordingProvider};
    use serde_json::json;

    fn service(cluster: Cluster) -> (AdminService<RecordingProvider>, RecordingProvider) {
        let provider = RecordingProvider::new(cluster, &["prod"]);
        let service = AdminService::new(Arc::new(provider.clone()), EngineConfig::default());
        (service, provider)
    }

    #[test]
    fn grant_request_parses_by_kind() {
        let request = GrantRequest::parse(
            "tables-in-schema",
            json!({
                "database": "warehouse",
                "schema": "sales",
                "role_specification": "analyst",
                "privileges": {"select": true}
            }),
        )
        .unwrap();

        assert!(matches!(request, GrantRequest::TablesInSchema(_)));
        assert_eq!(request.database(), Some("warehouse"));
        assert_eq!(request.event(), "grant_tables_in_schema");
        assert_eq!(request.object(), "sales");
    }

    #[test]
    fn grant_request_rejects_unknown_kind_and_bad_body() {
        assert!(matches!(
            GrantRequest::parse("views", json!({})),
            Err(ApiError::UnknownGrantTarget(_))
        ));
        assert!(matches!(
            GrantRequest::parse("table", json!({"database": "warehouse"})),
            Err(ApiError::InvalidBody(_))
        ));
    }

    #[tokio::test]
    async fn grant_closes_session_after_success() {
        let mut cluster = Cluster::default();
        cluster.add_table("sales", "orders", "gpadmin", None);
        let (service, provider) = service(cluster);

        let request = GrantRequest::Table(GrantTable {
            database: "warehouse".to_string(),
            schema: "sales".to_string(),
            name: "orders".to_string(),
            role_specification: "analyst".to_string(),
            with_grant_option: false,
            privileges: TablePrivileges {
                select: true,
                ..Default::default()
            },
        });
        service.grant("prod", &request).await.unwrap();

        assert_eq!(provider.session().closed_sessions(), 1);
        assert!(
            provider
                .session()
                .table_rules("sales", "orders")
                .iter()
                .any(|rule| rule.grantee == "analyst")
        );
    }

    #[tokio::test]
    async fn failed_operation_still_closes_session() {
        let (service, provider) = service(Cluster::default());

        let err = service.get_role("prod", "ghost").await.unwrap_err();

        assert!(matches!(err, ApiError::Admin(AdminError::NotFound(_))));
        assert_eq!(provider.session().closed_sessions(), 1);
    }

    #[tokio::test]
    async fn unknown_context_never_opens_a_session() {
        let (service, provider) = service(Cluster::default());

        let err = service.list_roles("staging").await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::Admin(AdminError::Session(SessionError::UnknownContext(_)))
        ));
        assert_eq!(provider.session().closed_sessions(), 0);
    }

    #[tokio::test]
    async fn listing_tables_of_missing_schema_is_not_found() {
        let (service, _provider) = service(Cluster::default());

        let err = service
            .list_tables("prod", "warehouse", "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Admin(AdminError::NotFound(_))));
    }

    #[tokio::test]
    async fn owner_transfer_rejects_unknown_entity_before_connecting() {
        let (service, provider) = service(Cluster::default());
        provider.fail_connect();

        let update = OwnerEntityUpdate {
            type_of_entity: "view".to_string(),
            owner: "analyst".to_string(),
            database: "warehouse".to_string(),
            schema: None,
            table: None,
        };
        let err = service.transfer_owner("prod", &update).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::Admin(AdminError::UnsupportedEntityType(_))
        ));
        assert_eq!(provider.session().closed_sessions(), 0);
    }
}
