use std::future::Future;

use crate::catalog::{
    DefaultAclRow, MembershipEdge, ObjectAcl, ResourceGroup, ResourceGroupLimits, RoleNode,
    RoleRef,
};
use crate::statement::Statement;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unknown connection context: {0}")]
    UnknownContext(String),

    #[error("statement failed: {0}")]
    Execution(String),
}

/// Which connection context to open, optionally against a non-default database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub context: String,
    pub database: Option<String>,
}

impl SessionTarget {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Impersonation {
    SessionUser,
    Role(String),
}

/// Statements that commit or roll back together. The impersonated role only
/// lives for the duration of the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicSection {
    pub impersonation: Impersonation,
    pub statements: Vec<Statement>,
}

impl AtomicSection {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            impersonation: Impersonation::SessionUser,
            statements,
        }
    }

    pub fn impersonating(grantor: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            impersonation: Impersonation::Role(grantor.into()),
            statements,
        }
    }
}

pub trait Catalog: Send {
    fn database_acl(
        &mut self,
        database: &str,
    ) -> impl Future<Output = Result<Option<ObjectAcl>, SessionError>> + Send;

    fn database_acls(&mut self)
    -> impl Future<Output = Result<Vec<ObjectAcl>, SessionError>> + Send;

    fn schema_acl(
        &mut self,
        schema: &str,
    ) -> impl Future<Output = Result<Option<ObjectAcl>, SessionError>> + Send;

    fn schema_acls(&mut self) -> impl Future<Output = Result<Vec<ObjectAcl>, SessionError>> + Send;

    fn table_acl(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<Option<ObjectAcl>, SessionError>> + Send;

    fn table_acls(
        &mut self,
        schema: &str,
    ) -> impl Future<Output = Result<Vec<ObjectAcl>, SessionError>> + Send;

    /// Every namespace name of the connected database, system ones included.
    fn namespaces(&mut self) -> impl Future<Output = Result<Vec<String>, SessionError>> + Send;

    fn roles(&mut self) -> impl Future<Output = Result<Vec<RoleNode>, SessionError>> + Send;

    fn role(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Option<RoleNode>, SessionError>> + Send;

    fn membership_edges(
        &mut self,
    ) -> impl Future<Output = Result<Vec<MembershipEdge>, SessionError>> + Send;

    fn role_members(
        &mut self,
        role: &str,
    ) -> impl Future<Output = Result<Vec<RoleRef>, SessionError>> + Send;

    fn resource_groups(
        &mut self,
    ) -> impl Future<Output = Result<Vec<ResourceGroup>, SessionError>> + Send;

    fn resource_group(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Option<ResourceGroup>, SessionError>> + Send;

    fn resource_group_limits(
        &mut self,
    ) -> impl Future<Output = Result<ResourceGroupLimits, SessionError>> + Send;

    fn default_acls(
        &mut self,
    ) -> impl Future<Output = Result<Vec<DefaultAclRow>, SessionError>> + Send;
}

pub trait Executor: Send {
    fn execute_atomic(
        &mut self,
        section: &AtomicSection,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Runs outside any transaction block.
    fn execute_autocommit(
        &mut self,
        statement: &Statement,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

pub trait AdminSession: Catalog + Executor {
    fn close(self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

pub trait SessionProvider: Send + Sync {
    type Session: AdminSession;

    fn open(
        &self,
        target: &SessionTarget,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}
