use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::acl::{PermissionRule, Privilege};
use crate::catalog::{DefaultObjectKind, ObjectAcl, ObjectClass, is_system_schema};
use crate::error::AdminError;
use crate::session::{AtomicSection, Catalog, Executor};
use crate::statement::{DefaultScope, GrantTarget, ObjectName, Statement, is_public};

use super::EngineConfig;
use super::sweep::StepOutcome;

/// Per-privilege switches of a grant request. Anything switched off is revoked.
pub trait PrivilegeFlags {
    const CLASS: ObjectClass;

    fn granted(&self) -> BTreeSet<Privilege>;
}

fn collect(flags: &[(bool, Privilege)]) -> BTreeSet<Privilege> {
    flags
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, privilege)| *privilege)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabasePrivileges {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub connect: bool,
    #[serde(default)]
    pub temporary: bool,
}

impl PrivilegeFlags for DatabasePrivileges {
    const CLASS: ObjectClass = ObjectClass::Database;

    fn granted(&self) -> BTreeSet<Privilege> {
        collect(&[
            (self.create, Privilege::Create),
            (self.connect, Privilege::Connect),
            (self.temporary, Privilege::Temporary),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaPrivileges {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub usage: bool,
}

impl PrivilegeFlags for SchemaPrivileges {
    const CLASS: ObjectClass = ObjectClass::Schema;

    fn granted(&self) -> BTreeSet<Privilege> {
        collect(&[
            (self.create, Privilege::Create),
            (self.usage, Privilege::Usage),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePrivileges {
    #[serde(default)]
    pub select: bool,
    #[serde(default)]
    pub insert: bool,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub truncate: bool,
    #[serde(default)]
    pub references: bool,
    #[serde(default)]
    pub trigger: bool,
}

impl PrivilegeFlags for TablePrivileges {
    const CLASS: ObjectClass = ObjectClass::Table;

    fn granted(&self) -> BTreeSet<Privilege> {
        collect(&[
            (self.select, Privilege::Select),
            (self.insert, Privilege::Insert),
            (self.update, Privilege::Update),
            (self.delete, Privilege::Delete),
            (self.truncate, Privilege::Truncate),
            (self.references, Privilege::References),
            (self.trigger, Privilege::Trigger),
        ])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantDatabase {
    pub name: String,
    pub role_specification: String,
    #[serde(default)]
    pub with_grant_option: bool,
    pub privileges: DatabasePrivileges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSchema {
    pub database: String,
    pub name: String,
    pub role_specification: String,
    #[serde(default)]
    pub with_grant_option: bool,
    pub privileges: SchemaPrivileges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSchemasInDatabase {
    pub database: String,
    pub role_specification: String,
    #[serde(default)]
    pub with_grant_option: bool,
    pub privileges: SchemaPrivileges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantTable {
    pub database: String,
    pub schema: String,
    pub name: String,
    pub role_specification: String,
    #[serde(default)]
    pub with_grant_option: bool,
    pub privileges: TablePrivileges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantTablesInSchema {
    pub database: String,
    pub schema: String,
    pub role_specification: String,
    #[serde(default)]
    pub with_grant_option: bool,
    pub privileges: TablePrivileges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantTablesInDatabase {
    pub database: String,
    pub role_specification: String,
    #[serde(default)]
    pub with_grant_option: bool,
    pub privileges: TablePrivileges,
}

/// Revoke-everything-then-grant statements for one target.
fn delta<F: PrivilegeFlags>(
    target: GrantTarget,
    flags: &F,
    role: &str,
    with_grant_option: bool,
) -> Vec<Statement> {
    let mut statements = vec![Statement::Revoke {
        target: target.clone(),
        privileges: F::CLASS.full_privileges(),
        role: role.to_string(),
    }];

    let granted = flags.granted();
    if !granted.is_empty() {
        statements.push(Statement::Grant {
            target,
            privileges: granted,
            role: role.to_string(),
            with_grant_option,
        });
    }
    statements
}

/// Distinct grantors that ever granted anything to `role`, in ACL order.
fn grantors_of(rules: &[PermissionRule], role: &str) -> Vec<String> {
    let mut grantors: Vec<String> = Vec::new();
    for rule in rules {
        let matches = if is_public(role) {
            rule.is_public()
        } else {
            rule.grantee == role
        };
        if matches && !grantors.contains(&rule.grantor) {
            grantors.push(rule.grantor.clone());
        }
    }
    grantors
}

fn user_schemas(namespaces: Vec<String>) -> Vec<String> {
    namespaces
        .into_iter()
        .filter(|name| !is_system_schema(name))
        .collect()
}

pub struct GrantEngine {
    config: EngineConfig,
}

impl GrantEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn grant_database<S: Catalog + Executor>(
        &self,
        session: &mut S,
        payload: &GrantDatabase,
    ) -> Result<(), AdminError> {
        let object = ObjectName::Database(payload.name.clone());
        let acl = if self.config.deep_revoke {
            Some(
                session
                    .database_acl(&payload.name)
                    .await?
                    .ok_or_else(|| AdminError::NotFound(format!("database {}", payload.name)))?,
            )
        } else {
            None
        };

        self.apply_single(
            session,
            acl,
            object,
            &payload.privileges,
            &payload.role_specification,
            payload.with_grant_option,
        )
        .await
    }

    pub async fn grant_schema<S: Catalog + Executor>(
        &self,
        session: &mut S,
        payload: &GrantSchema,
    ) -> Result<(), AdminError> {
        let object = ObjectName::Schema(payload.name.clone());
        let acl = if self.config.deep_revoke {
            Some(
                session
                    .schema_acl(&payload.name)
                    .await?
                    .ok_or_else(|| AdminError::NotFound(format!("schema {}", payload.name)))?,
            )
        } else {
            None
        };

        self.apply_single(
            session,
            acl,
            object,
            &payload.privileges,
            &payload.role_specification,
            payload.with_grant_option,
        )
        .await
    }

    pub async fn grant_table<S: Catalog + Executor>(
        &self,
        session: &mut S,
        payload: &GrantTable,
    ) -> Result<(), AdminError> {
        let object = ObjectName::Table {
            schema: payload.schema.clone(),
            table: payload.name.clone(),
        };
        let acl = if self.config.deep_revoke {
            Some(
                session
                    .table_acl(&payload.schema, &payload.name)
                    .await?
                    .ok_or_else(|| {
                        AdminError::NotFound(format!("table {}.{}", payload.schema, payload.name))
                    })?,
            )
        } else {
            None
        };

        self.apply_single(
            session,
            acl,
            object,
            &payload.privileges,
            &payload.role_specification,
            payload.with_grant_option,
        )
        .await
    }

    pub async fn grant_schemas_in_database<S: Catalog + Executor>(
        &self,
        session: &mut S,
        payload: &GrantSchemasInDatabase,
    ) -> Result<(), AdminError> {
        let schemas = user_schemas(session.namespaces().await?);
        let statements: Vec<Statement> = schemas
            .into_iter()
            .flat_map(|schema| {
                delta(
                    GrantTarget::Object(ObjectName::Schema(schema)),
                    &payload.privileges,
                    &payload.role_specification,
                    payload.with_grant_option,
                )
            })
            .collect();

        tracing::debug!(
            database = %payload.database,
            statements = statements.len(),
            "granting on every schema"
        );
        if !statements.is_empty() {
            session
                .execute_atomic(&AtomicSection::new(statements))
                .await?;
        }
        Ok(())
    }

    pub async fn grant_tables_in_schema<S: Catalog + Executor>(
        &self,
        session: &mut S,
        payload: &GrantTablesInSchema,
    ) -> Result<(), AdminError> {
        let role = &payload.role_specification;
        let existing = delta(
            GrantTarget::AllTablesInSchema(payload.schema.clone()),
            &payload.privileges,
            role,
            payload.with_grant_option,
        );
        session
            .execute_atomic(&AtomicSection::new(existing))
            .await?;

        let scope = DefaultScope {
            for_role: None,
            schema: Some(payload.schema.clone()),
        };
        let mut future_tables = vec![Statement::RevokeDefault {
            scope: scope.clone(),
            kind: DefaultObjectKind::Relation,
            privileges: ObjectClass::Table.full_privileges(),
            role: role.clone(),
        }];
        let granted = payload.privileges.granted();
        if !granted.is_empty() {
            future_tables.push(Statement::GrantDefault {
                scope,
                kind: DefaultObjectKind::Relation,
                privileges: granted,
                role: role.clone(),
                with_grant_option: payload.with_grant_option,
            });
        }
        session
            .execute_atomic(&AtomicSection::new(future_tables))
            .await?;
        Ok(())
    }

    pub async fn grant_tables_in_database<S: Catalog + Executor>(
        &self,
        session: &mut S,
        payload: &GrantTablesInDatabase,
    ) -> Result<(), AdminError> {
        let schemas = user_schemas(session.namespaces().await?);
        let statements: Vec<Statement> = schemas
            .into_iter()
            .flat_map(|schema| {
                delta(
                    GrantTarget::AllTablesInSchema(schema),
                    &payload.privileges,
                    &payload.role_specification,
                    payload.with_grant_option,
                )
            })
            .collect();

        if !statements.is_empty() {
            session
                .execute_atomic(&AtomicSection::new(statements))
                .await?;
        }
        Ok(())
    }

    async fn apply_single<S: Catalog + Executor, F: PrivilegeFlags>(
        &self,
        session: &mut S,
        acl: Option<ObjectAcl>,
        object: ObjectName,
        flags: &F,
        role: &str,
        with_grant_option: bool,
    ) -> Result<(), AdminError> {
        let label = object.label();
        let target = GrantTarget::Object(object);

        let mut sweep = StepOutcome::default();
        if let Some(acl) = acl {
            for grantor in grantors_of(&acl.rules()?, role) {
                let section = AtomicSection::impersonating(
                    grantor.clone(),
                    vec![Statement::Revoke {
                        target: target.clone(),
                        privileges: F::CLASS.full_privileges(),
                        role: role.to_string(),
                    }],
                );
                let result = session.execute_atomic(&section).await;
                sweep.record(format!("revoke as {grantor}"), result);
            }
        }

        session
            .execute_atomic(&AtomicSection::new(delta(
                target,
                flags,
                role,
                with_grant_option,
            )))
            .await?;

        tracing::debug!(
            object = %label,
            role,
            grantors = sweep.applied + sweep.failures.len(),
            "privileges reconciled"
        );
        sweep.finish(&label).map(|_| ())
    }
}
