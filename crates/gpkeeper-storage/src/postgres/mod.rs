mod queries;

use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;

use gpkeeper_core::catalog::{
    DefaultAclRow, MembershipEdge, ObjectAcl, ResourceGroup, ResourceGroupLimits, RoleNode,
    RoleRef,
};
use gpkeeper_core::session::{
    AdminSession, AtomicSection, Catalog, Executor, Impersonation, SessionError, SessionProvider,
    SessionTarget,
};
use gpkeeper_core::statement::{Statement, quote_ident};

use crate::traits::CredentialStore;
use queries::to_session_error;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and as whom to connect for one context alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub alias: String,
    pub host: String,
    pub port: u16,
    pub role: String,
    pub database: String,
}

/// One physical connection, used for a single request.
#[derive(Debug)]
pub struct PgSession {
    conn: PgConnection,
}

impl PgSession {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }
}

impl Catalog for PgSession {
    async fn database_acl(&mut self, database: &str) -> Result<Option<ObjectAcl>, SessionError> {
        queries::database_acl(&mut self.conn, database).await
    }

    async fn database_acls(&mut self) -> Result<Vec<ObjectAcl>, SessionError> {
        queries::database_acls(&mut self.conn).await
    }

    async fn schema_acl(&mut self, schema: &str) -> Result<Option<ObjectAcl>, SessionError> {
        queries::schema_acl(&mut self.conn, schema).await
    }

    async fn schema_acls(&mut self) -> Result<Vec<ObjectAcl>, SessionError> {
        queries::schema_acls(&mut self.conn).await
    }

    async fn table_acl(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Option<ObjectAcl>, SessionError> {
        queries::table_acl(&mut self.conn, schema, table).await
    }

    async fn table_acls(&mut self, schema: &str) -> Result<Vec<ObjectAcl>, SessionError> {
        queries::table_acls(&mut self.conn, schema).await
    }

    async fn namespaces(&mut self) -> Result<Vec<String>, SessionError> {
        queries::namespaces(&mut self.conn).await
    }

    async fn roles(&mut self) -> Result<Vec<RoleNode>, SessionError> {
        queries::roles(&mut self.conn).await
    }

    async fn role(&mut self, name: &str) -> Result<Option<RoleNode>, SessionError> {
        queries::role(&mut self.conn, name).await
    }

    async fn membership_edges(&mut self) -> Result<Vec<MembershipEdge>, SessionError> {
        queries::membership_edges(&mut self.conn).await
    }

    async fn role_members(&mut self, role: &str) -> Result<Vec<RoleRef>, SessionError> {
        queries::role_members(&mut self.conn, role).await
    }

    async fn resource_groups(&mut self) -> Result<Vec<ResourceGroup>, SessionError> {
        queries::resource_groups(&mut self.conn).await
    }

    async fn resource_group(&mut self, name: &str) -> Result<Option<ResourceGroup>, SessionError> {
        queries::resource_group(&mut self.conn, name).await
    }

    async fn resource_group_limits(&mut self) -> Result<ResourceGroupLimits, SessionError> {
        queries::resource_group_limits(&mut self.conn).await
    }

    async fn default_acls(&mut self) -> Result<Vec<DefaultAclRow>, SessionError> {
        queries::default_acls(&mut self.conn).await
    }
}

impl Executor for PgSession {
    /// `SET LOCAL ROLE` ends with the transaction, so a failed statement or an
    /// early return leaves the session role untouched.
    async fn execute_atomic(&mut self, section: &AtomicSection) -> Result<(), SessionError> {
        let mut tx = self.conn.begin().await.map_err(to_session_error)?;

        if let Impersonation::Role(role) = &section.impersonation {
            let set_role = format!("SET LOCAL ROLE {}", quote_ident(role));
            sqlx::Executor::execute(&mut *tx, set_role.as_str())
                .await
                .map_err(to_session_error)?;
        }

        for statement in &section.statements {
            let sql = statement.to_string();
            tracing::debug!(sql = %sql, "executing");
            sqlx::Executor::execute(&mut *tx, sql.as_str())
                .await
                .map_err(to_session_error)?;
        }

        tx.commit().await.map_err(to_session_error)
    }

    async fn execute_autocommit(&mut self, statement: &Statement) -> Result<(), SessionError> {
        let sql = statement.to_string();
        tracing::debug!(sql = %sql, "executing outside transaction");
        sqlx::Executor::execute(&mut self.conn, sql.as_str())
            .await
            .map_err(to_session_error)?;
        Ok(())
    }
}

impl AdminSession for PgSession {
    async fn close(self) -> Result<(), SessionError> {
        self.conn.close().await.map_err(to_session_error)
    }
}

/// Opens a fresh connection per request from the configured contexts.
pub struct PgSessionProvider<C> {
    contexts: HashMap<String, ConnectionContext>,
    credentials: C,
    connect_timeout: Duration,
}

impl<C: CredentialStore> PgSessionProvider<C> {
    pub fn new(contexts: Vec<ConnectionContext>, credentials: C) -> Self {
        Self {
            contexts: contexts
                .into_iter()
                .map(|context| (context.alias.clone(), context))
                .collect(),
            credentials,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn options(&self, target: &SessionTarget) -> Result<PgConnectOptions, SessionError> {
        let context = self
            .contexts
            .get(&target.context)
            .ok_or_else(|| SessionError::UnknownContext(target.context.clone()))?;
        let password = self
            .credentials
            .password(&context.alias)
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let database = target.database.as_deref().unwrap_or(&context.database);

        Ok(PgConnectOptions::new()
            .host(&context.host)
            .port(context.port)
            .username(&context.role)
            .password(&password)
            .database(database)
            .application_name("gpkeeper"))
    }
}

impl<C: CredentialStore> SessionProvider for PgSessionProvider<C> {
    type Session = PgSession;

    async fn open(&self, target: &SessionTarget) -> Result<PgSession, SessionError> {
        let options = self.options(target)?;
        tracing::debug!(
            context = %target.context,
            database = target.database.as_deref().unwrap_or("<default>"),
            "opening session"
        );

        let conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                SessionError::Connect(format!(
                    "timed out after {}s connecting to {}",
                    self.connect_timeout.as_secs(),
                    target.context
                ))
            })?
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        Ok(PgSession::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> PgSessionProvider<HashMap<String, String>> {
        PgSessionProvider::new(
            vec![ConnectionContext {
                alias: "dev".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                role: "gpadmin".to_string(),
                database: "postgres".to_string(),
            }],
            HashMap::from([("dev".to_string(), "secret".to_string())]),
        )
    }

    #[test]
    fn options_use_target_database_over_default() {
        let options = provider()
            .options(&SessionTarget::new("dev").with_database("warehouse"))
            .unwrap();
        assert_eq!(options.get_database(), Some("warehouse"));
        assert_eq!(options.get_username(), "gpadmin");
        assert_eq!(options.get_port(), 5432);

        let options = provider().options(&SessionTarget::new("dev")).unwrap();
        assert_eq!(options.get_database(), Some("postgres"));
    }

    #[tokio::test]
    async fn unknown_context_is_rejected_before_connecting() {
        let err = provider()
            .open(&SessionTarget::new("prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownContext(ref alias) if alias == "prod"));
    }

    #[test]
    fn missing_password_is_a_connect_error() {
        let provider = PgSessionProvider::new(
            vec![ConnectionContext {
                alias: "dev".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                role: "gpadmin".to_string(),
                database: "postgres".to_string(),
            }],
            HashMap::<String, String>::new(),
        );
        let err = provider.options(&SessionTarget::new("dev")).unwrap_err();
        assert!(matches!(err, SessionError::Connect(_)));
    }
}
