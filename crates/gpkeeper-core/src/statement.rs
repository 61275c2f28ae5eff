use std::collections::BTreeSet;
use std::fmt;

use crate::acl::Privilege;
use crate::catalog::DefaultObjectKind;

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn is_public(role: &str) -> bool {
    role.is_empty() || role.eq_ignore_ascii_case("public")
}

/// A role specification: the bare `PUBLIC` keyword or a quoted role name.
pub fn quote_role(role: &str) -> String {
    if is_public(role) {
        "PUBLIC".to_string()
    } else {
        quote_ident(role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectName {
    Database(String),
    Schema(String),
    Table { schema: String, table: String },
}

impl ObjectName {
    /// Unquoted, schema-qualified name for messages.
    pub fn label(&self) -> String {
        match self {
            ObjectName::Database(name) | ObjectName::Schema(name) => name.clone(),
            ObjectName::Table { schema, table } => format!("{schema}.{table}"),
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectName::Database(name) => write!(f, "DATABASE {}", quote_ident(name)),
            ObjectName::Schema(name) => write!(f, "SCHEMA {}", quote_ident(name)),
            ObjectName::Table { schema, table } => {
                write!(f, "TABLE {}.{}", quote_ident(schema), quote_ident(table))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTarget {
    Object(ObjectName),
    AllTablesInSchema(String),
}

impl fmt::Display for GrantTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantTarget::Object(object) => object.fmt(f),
            GrantTarget::AllTablesInSchema(schema) => {
                write!(f, "ALL TABLES IN SCHEMA {}", quote_ident(schema))
            }
        }
    }
}

/// `FOR ROLE` / `IN SCHEMA` qualifiers of ALTER DEFAULT PRIVILEGES.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultScope {
    pub for_role: Option<String>,
    pub schema: Option<String>,
}

impl fmt::Display for DefaultScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ALTER DEFAULT PRIVILEGES")?;
        if let Some(role) = &self.for_role {
            write!(f, " FOR ROLE {}", quote_ident(role))?;
        }
        if let Some(schema) = &self.schema {
            write!(f, " IN SCHEMA {}", quote_ident(schema))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleOptions {
    pub superuser: bool,
    pub create_role: bool,
    pub create_db: bool,
    pub inherit: bool,
    pub login: bool,
    pub password: Option<String>,
}

impl fmt::Display for RoleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |on: bool, keyword: &'static str| -> String {
            if on {
                keyword.to_string()
            } else {
                format!("NO{keyword}")
            }
        };
        write!(
            f,
            "{} {} {} {} {}",
            flag(self.superuser, "SUPERUSER"),
            flag(self.create_role, "CREATEROLE"),
            flag(self.create_db, "CREATEDB"),
            flag(self.inherit, "INHERIT"),
            flag(self.login, "LOGIN"),
        )?;
        if let Some(password) = &self.password {
            write!(f, " PASSWORD {}", quote_literal(password))?;
        }
        Ok(())
    }
}

/// How the remote reassign call authenticates against each database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLogin {
    Implicit,
    AsSessionUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceGroupOption {
    CpuRateLimit(i32),
    MemoryLimit(i32),
    Concurrency(i32),
}

impl ResourceGroupOption {
    pub fn keyword(self) -> &'static str {
        match self {
            ResourceGroupOption::CpuRateLimit(_) => "CPU_RATE_LIMIT",
            ResourceGroupOption::MemoryLimit(_) => "MEMORY_LIMIT",
            ResourceGroupOption::Concurrency(_) => "CONCURRENCY",
        }
    }

    pub fn value(self) -> i32 {
        match self {
            ResourceGroupOption::CpuRateLimit(v)
            | ResourceGroupOption::MemoryLimit(v)
            | ResourceGroupOption::Concurrency(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Grant {
        target: GrantTarget,
        privileges: BTreeSet<Privilege>,
        role: String,
        with_grant_option: bool,
    },
    Revoke {
        target: GrantTarget,
        privileges: BTreeSet<Privilege>,
        role: String,
    },
    GrantDefault {
        scope: DefaultScope,
        kind: DefaultObjectKind,
        privileges: BTreeSet<Privilege>,
        role: String,
        with_grant_option: bool,
    },
    /// An empty privilege set revokes ALL.
    RevokeDefault {
        scope: DefaultScope,
        kind: DefaultObjectKind,
        privileges: BTreeSet<Privilege>,
        role: String,
    },
    CreateRole {
        name: String,
        options: RoleOptions,
    },
    AlterRole {
        name: String,
        options: RoleOptions,
    },
    RenameRole {
        from: String,
        to: String,
    },
    DropRole {
        name: String,
    },
    GrantMembership {
        role: String,
        member: String,
        with_admin_option: bool,
    },
    RevokeMembership {
        role: String,
        member: String,
    },
    CreateDblinkExtension,
    ReassignOwnedEverywhere {
        role: String,
        login: RemoteLogin,
    },
    CreateResourceGroup {
        name: String,
        options: Vec<ResourceGroupOption>,
    },
    AlterResourceGroup {
        name: String,
        option: ResourceGroupOption,
    },
    DropResourceGroup {
        name: String,
    },
    AssignResourceGroup {
        role: String,
        group: Option<String>,
    },
    TerminateResourceGroupSessions {
        group: String,
    },
    AlterOwner {
        object: ObjectName,
        owner: String,
    },
}

fn join_privileges(privileges: &BTreeSet<Privilege>) -> String {
    privileges
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Grant {
                target,
                privileges,
                role,
                with_grant_option,
            } => {
                write!(
                    f,
                    "GRANT {} ON {} TO {}",
                    join_privileges(privileges),
                    target,
                    quote_role(role)
                )?;
                if *with_grant_option {
                    f.write_str(" WITH GRANT OPTION")?;
                }
                Ok(())
            }
            Statement::Revoke {
                target,
                privileges,
                role,
            } => write!(
                f,
                "REVOKE {} ON {} FROM {} CASCADE",
                join_privileges(privileges),
                target,
                quote_role(role)
            ),
            Statement::GrantDefault {
                scope,
                kind,
                privileges,
                role,
                with_grant_option,
            } => {
                write!(
                    f,
                    "{} GRANT {} ON {} TO {}",
                    scope,
                    join_privileges(privileges),
                    kind.keyword(),
                    quote_role(role)
                )?;
                if *with_grant_option {
                    f.write_str(" WITH GRANT OPTION")?;
                }
                Ok(())
            }
            Statement::RevokeDefault {
                scope,
                kind,
                privileges,
                role,
            } => {
                let what = if privileges.is_empty() {
                    "ALL".to_string()
                } else {
                    join_privileges(privileges)
                };
                write!(
                    f,
                    "{} REVOKE {} ON {} FROM {} CASCADE",
                    scope,
                    what,
                    kind.keyword(),
                    quote_role(role)
                )
            }
            Statement::CreateRole { name, options } => {
                write!(f, "CREATE ROLE {} WITH {}", quote_ident(name), options)
            }
            Statement::AlterRole { name, options } => {
                write!(f, "ALTER ROLE {} WITH {}", quote_ident(name), options)
            }
            Statement::RenameRole { from, to } => write!(
                f,
                "ALTER ROLE {} RENAME TO {}",
                quote_ident(from),
                quote_ident(to)
            ),
            Statement::DropRole { name } => write!(f, "DROP ROLE {}", quote_ident(name)),
            Statement::GrantMembership {
                role,
                member,
                with_admin_option,
            } => {
                write!(f, "GRANT {} TO {}", quote_ident(role), quote_role(member))?;
                if *with_admin_option {
                    f.write_str(" WITH ADMIN OPTION")?;
                }
                Ok(())
            }
            Statement::RevokeMembership { role, member } => write!(
                f,
                "REVOKE {} FROM {} CASCADE",
                quote_ident(role),
                quote_role(member)
            ),
            Statement::CreateDblinkExtension => {
                f.write_str("CREATE EXTENSION IF NOT EXISTS dblink")
            }
            Statement::ReassignOwnedEverywhere { role, login } => {
                let connection = match login {
                    RemoteLogin::Implicit => "FORMAT('dbname=%L', db)",
                    RemoteLogin::AsSessionUser => "FORMAT('dbname=%L user=%L', db, owner_name)",
                };
                let role = quote_literal(role);
                write!(
                    f,
                    "DO $reassign$\n\
                     DECLARE\n    db VARCHAR;\n    owner_name VARCHAR := session_user;\n\
                     BEGIN\n    \
                     FOR db IN SELECT datname FROM pg_database WHERE datallowconn LOOP\n        \
                     PERFORM dblink_exec(\n            {connection},\n            \
                     FORMAT('REASSIGN OWNED BY %I TO %I; DROP OWNED BY %I', {role}, owner_name, {role})\n        \
                     );\n    END LOOP;\n\
                     END $reassign$"
                )
            }
            Statement::CreateResourceGroup { name, options } => {
                let options = options
                    .iter()
                    .map(|o| format!("{}={}", o.keyword(), o.value()))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "CREATE RESOURCE GROUP {} WITH ({})",
                    quote_ident(name),
                    options
                )
            }
            Statement::AlterResourceGroup { name, option } => write!(
                f,
                "ALTER RESOURCE GROUP {} SET {} {}",
                quote_ident(name),
                option.keyword(),
                option.value()
            ),
            Statement::DropResourceGroup { name } => {
                write!(f, "DROP RESOURCE GROUP {}", quote_ident(name))
            }
            Statement::AssignResourceGroup { role, group } => match group {
                Some(group) => write!(
                    f,
                    "ALTER ROLE {} RESOURCE GROUP {}",
                    quote_ident(role),
                    quote_ident(group)
                ),
                None => write!(f, "ALTER ROLE {} RESOURCE GROUP NONE", quote_ident(role)),
            },
            Statement::TerminateResourceGroupSessions { group } => write!(
                f,
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE pid <> pg_backend_pid() AND rsgid IN \
                 (SELECT groupid FROM gp_toolkit.gp_resgroup_config WHERE groupname = {})",
                quote_literal(group)
            ),
            Statement::AlterOwner { object, owner } => {
                write!(f, "ALTER {} OWNER TO {}", object, quote_ident(owner))
            }
        }
    }
}
