use serde::{Deserialize, Serialize};

use crate::catalog::{MembershipGraph, RoleNode, RoleRef};
use crate::error::AdminError;
use crate::session::{AtomicSection, Catalog, Executor};
use crate::statement::{RemoteLogin, RoleOptions, Statement};

use super::EngineConfig;

/// Desired role state for create and alter. A missing password on alter keeps
/// the current one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    pub rolname: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub rolsuper: bool,
    #[serde(default)]
    pub rolcreaterole: bool,
    #[serde(default)]
    pub rolcreatedb: bool,
    #[serde(default = "default_inherit")]
    pub rolinherit: bool,
    #[serde(default)]
    pub rolcanlogin: bool,
}

fn default_inherit() -> bool {
    true
}

impl RoleSpec {
    fn options(&self) -> RoleOptions {
        RoleOptions {
            superuser: self.rolsuper,
            create_role: self.rolcreaterole,
            create_db: self.rolcreatedb,
            inherit: self.rolinherit,
            login: self.rolcanlogin,
            password: self.password.clone(),
        }
    }
}

pub struct RoleService {
    config: EngineConfig,
}

impl RoleService {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn list_roles<S: Catalog>(
        &self,
        session: &mut S,
    ) -> Result<Vec<RoleNode>, AdminError> {
        Ok(session.roles().await?)
    }

    pub async fn get_role<S: Catalog>(
        &self,
        session: &mut S,
        name: &str,
    ) -> Result<RoleNode, AdminError> {
        session
            .role(name)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("role {name}")))
    }

    pub async fn create_role<S: Executor>(
        &self,
        session: &mut S,
        spec: &RoleSpec,
    ) -> Result<(), AdminError> {
        let statement = Statement::CreateRole {
            name: spec.rolname.clone(),
            options: spec.options(),
        };
        session
            .execute_atomic(&AtomicSection::new(vec![statement]))
            .await?;
        Ok(())
    }

    pub async fn rename_and_alter<S: Executor>(
        &self,
        session: &mut S,
        current_name: &str,
        spec: &RoleSpec,
    ) -> Result<(), AdminError> {
        let mut statements = Vec::with_capacity(2);
        if current_name != spec.rolname {
            statements.push(Statement::RenameRole {
                from: current_name.to_string(),
                to: spec.rolname.clone(),
            });
        }
        statements.push(Statement::AlterRole {
            name: spec.rolname.clone(),
            options: spec.options(),
        });

        session
            .execute_atomic(&AtomicSection::new(statements))
            .await?;
        Ok(())
    }

    /// Tries progressively heavier ways of removing a role and stops at the
    /// first that works.
    pub async fn drop_role<S: Executor>(
        &self,
        session: &mut S,
        name: &str,
    ) -> Result<(), AdminError> {
        let drop = Statement::DropRole {
            name: name.to_string(),
        };

        match session
            .execute_atomic(&AtomicSection::new(vec![drop.clone()]))
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) => tracing::info!(role = name, error = %err, "plain drop failed"),
        }

        if self.config.install_dblink
            && let Err(err) = session
                .execute_autocommit(&Statement::CreateDblinkExtension)
                .await
        {
            tracing::warn!(error = %err, "could not install dblink");
        }

        for login in [RemoteLogin::Implicit, RemoteLogin::AsSessionUser] {
            let section = AtomicSection::new(vec![
                Statement::ReassignOwnedEverywhere {
                    role: name.to_string(),
                    login,
                },
                drop.clone(),
            ]);
            match session.execute_atomic(&section).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::info!(role = name, ?login, error = %err, "reassign and drop failed")
                }
            }
        }

        Err(AdminError::DropFailed(name.to_string()))
    }

    pub async fn list_members<S: Catalog>(
        &self,
        session: &mut S,
        role: &str,
    ) -> Result<Vec<RoleRef>, AdminError> {
        Ok(session.role_members(role).await?)
    }

    pub async fn add_member<S: Executor>(
        &self,
        session: &mut S,
        role: &str,
        member: &str,
        with_admin_option: Option<bool>,
    ) -> Result<(), AdminError> {
        let statement = Statement::GrantMembership {
            role: role.to_string(),
            member: member.to_string(),
            with_admin_option: with_admin_option.unwrap_or(self.config.grant_with_admin_option),
        };
        session
            .execute_atomic(&AtomicSection::new(vec![statement]))
            .await?;
        Ok(())
    }

    pub async fn remove_member<S: Executor>(
        &self,
        session: &mut S,
        role: &str,
        member: &str,
    ) -> Result<(), AdminError> {
        let statement = Statement::RevokeMembership {
            role: role.to_string(),
            member: member.to_string(),
        };
        session
            .execute_atomic(&AtomicSection::new(vec![statement]))
            .await?;
        Ok(())
    }

    pub async fn membership_graph<S: Catalog>(
        &self,
        session: &mut S,
    ) -> Result<MembershipGraph, AdminError> {
        let nodes = session
            .roles()
            .await?
            .into_iter()
            .map(|role| RoleRef {
                oid: role.oid,
                rolname: role.rolname,
            })
            .collect();
        let edges = session.membership_edges().await?;
        Ok(MembershipGraph { nodes, edges })
    }
}
