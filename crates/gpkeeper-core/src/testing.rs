//! In-memory stand-in for a cluster session.
//!
//! `RecordingSession` answers catalog reads from a [`Cluster`] fixture, logs every
//! section it is asked to execute, and applies committed statements back onto the
//! fixture so repeated operations can be compared. Failures are injected by
//! statement text or by impersonated role.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::acl::{PermissionRule, decode_many};
use crate::catalog::{
    DefaultAclRow, LimitRange, MembershipEdge, ObjectAcl, ObjectClass, Oid, ResourceGroup,
    ResourceGroupLimits, RoleNode, RoleRef,
};
use crate::session::{
    AdminSession, AtomicSection, Catalog, Executor, Impersonation, SessionError, SessionProvider,
    SessionTarget,
};
use crate::statement::{GrantTarget, ObjectName, ResourceGroupOption, Statement, is_public};

#[derive(Debug, Clone)]
pub struct Cluster {
    pub session_user: String,
    pub databases: Vec<ObjectAcl>,
    pub schemas: Vec<ObjectAcl>,
    pub tables: Vec<ObjectAcl>,
    pub namespaces: Vec<String>,
    pub roles: Vec<RoleNode>,
    pub edges: Vec<MembershipEdge>,
    pub resource_groups: Vec<ResourceGroup>,
    pub limits: ResourceGroupLimits,
    pub default_acls: Vec<DefaultAclRow>,
    next_oid: Oid,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            session_user: "gpadmin".to_string(),
            databases: Vec::new(),
            schemas: Vec::new(),
            tables: Vec::new(),
            namespaces: Vec::new(),
            roles: Vec::new(),
            edges: Vec::new(),
            resource_groups: Vec::new(),
            limits: ResourceGroupLimits {
                cpu_rate_limit: LimitRange { min: 1, max: 100 },
                memory_limit: LimitRange { min: 0, max: 100 },
                concurrency: LimitRange { min: 0, max: 250 },
            },
            default_acls: Vec::new(),
            next_oid: 16384,
        }
    }
}

impl Cluster {
    fn allocate_oid(&mut self) -> Oid {
        self.next_oid += 1;
        self.next_oid
    }

    pub fn add_database(&mut self, name: &str, owner: &str, acl: Option<Vec<String>>) {
        let oid = self.allocate_oid();
        self.databases
            .push(ObjectAcl::new(ObjectClass::Database, oid, name, owner, acl));
    }

    pub fn add_schema(&mut self, name: &str, owner: &str, acl: Option<Vec<String>>) {
        let oid = self.allocate_oid();
        self.schemas
            .push(ObjectAcl::new(ObjectClass::Schema, oid, name, owner, acl));
        if !self.namespaces.iter().any(|n| n == name) {
            self.namespaces.push(name.to_string());
        }
    }

    pub fn add_table(&mut self, schema: &str, name: &str, owner: &str, acl: Option<Vec<String>>) {
        let oid = self.allocate_oid();
        self.tables
            .push(ObjectAcl::new(ObjectClass::Table, oid, name, owner, acl).in_schema(schema));
    }

    pub fn add_role(&mut self, name: &str) -> Oid {
        let oid = self.allocate_oid();
        self.roles.push(RoleNode::named(oid, name));
        oid
    }

    pub fn add_superuser(&mut self, name: &str) -> Oid {
        let oid = self.allocate_oid();
        self.roles.push(RoleNode {
            rolsuper: true,
            ..RoleNode::named(oid, name)
        });
        oid
    }

    /// `member` becomes a member of `role`.
    pub fn add_member(&mut self, role: Oid, member: Oid) {
        self.edges.push(MembershipEdge {
            from_oid: role,
            to_oid: member,
        });
    }

    pub fn add_resource_group(&mut self, name: &str, limits: [i32; 3], members: &[&str]) {
        let oid = self.allocate_oid();
        self.resource_groups.push(ResourceGroup {
            oid,
            name: name.to_string(),
            concurrency: limits[0],
            cpu_rate_limit: limits[1],
            memory_limit: limits[2],
            group_members: members.iter().map(|m| m.to_string()).collect(),
        });
    }

    fn role_oid(&self, name: &str) -> Option<Oid> {
        self.roles.iter().find(|r| r.rolname == name).map(|r| r.oid)
    }

    fn acl_targets(&mut self, target: &GrantTarget) -> Vec<&mut ObjectAcl> {
        match target {
            GrantTarget::Object(ObjectName::Database(name)) => self
                .databases
                .iter_mut()
                .filter(|o| &o.name == name)
                .collect(),
            GrantTarget::Object(ObjectName::Schema(name)) => self
                .schemas
                .iter_mut()
                .filter(|o| &o.name == name)
                .collect(),
            GrantTarget::Object(ObjectName::Table { schema, table }) => self
                .tables
                .iter_mut()
                .filter(|o| &o.name == table && o.schema.as_deref() == Some(schema))
                .collect(),
            GrantTarget::AllTablesInSchema(schema) => self
                .tables
                .iter_mut()
                .filter(|o| o.schema.as_deref() == Some(schema))
                .collect(),
        }
    }

    fn apply(&mut self, acting: &str, statement: &Statement) {
        match statement {
            Statement::Grant {
                target,
                privileges,
                role,
                with_grant_option,
            } => {
                let grantee = acl_grantee(role);
                for object in self.acl_targets(target) {
                    edit_acl(object, |rules| {
                        let slot = rules
                            .iter()
                            .position(|r| r.grantee == grantee && r.grantor == acting);
                        let rule = match slot {
                            Some(index) => &mut rules[index],
                            None => {
                                rules.push(PermissionRule::new(grantee.clone(), acting, [], []));
                                let last = rules.len() - 1;
                                &mut rules[last]
                            }
                        };
                        if *with_grant_option {
                            rule.privileges_with_grant_option.extend(privileges);
                            rule.privileges.retain(|p| !privileges.contains(p));
                        } else {
                            for privilege in privileges {
                                if !rule.privileges_with_grant_option.contains(privilege) {
                                    rule.privileges.insert(*privilege);
                                }
                            }
                        }
                    });
                }
            }
            Statement::Revoke {
                target,
                privileges,
                role,
            } => {
                let grantee = acl_grantee(role);
                for object in self.acl_targets(target) {
                    edit_acl(object, |rules| {
                        for rule in rules.iter_mut() {
                            if rule.grantee == grantee && rule.grantor == acting {
                                rule.privileges.retain(|p| !privileges.contains(p));
                                rule.privileges_with_grant_option
                                    .retain(|p| !privileges.contains(p));
                            }
                        }
                        rules.retain(|r| !r.effective().is_empty());
                    });
                }
            }
            Statement::CreateRole { name, options } => {
                let oid = self.allocate_oid();
                self.roles.push(RoleNode {
                    oid,
                    rolname: name.clone(),
                    rolsuper: options.superuser,
                    rolcreaterole: options.create_role,
                    rolcreatedb: options.create_db,
                    rolinherit: options.inherit,
                    rolcanlogin: options.login,
                });
            }
            Statement::AlterRole { name, options } => {
                if let Some(role) = self.roles.iter_mut().find(|r| &r.rolname == name) {
                    role.rolsuper = options.superuser;
                    role.rolcreaterole = options.create_role;
                    role.rolcreatedb = options.create_db;
                    role.rolinherit = options.inherit;
                    role.rolcanlogin = options.login;
                }
            }
            Statement::RenameRole { from, to } => {
                if let Some(role) = self.roles.iter_mut().find(|r| &r.rolname == from) {
                    role.rolname = to.clone();
                }
            }
            Statement::DropRole { name } => {
                if let Some(oid) = self.role_oid(name) {
                    self.roles.retain(|r| r.oid != oid);
                    self.edges.retain(|e| e.from_oid != oid && e.to_oid != oid);
                }
            }
            Statement::GrantMembership { role, member, .. } => {
                if let (Some(role), Some(member)) = (self.role_oid(role), self.role_oid(member)) {
                    let edge = MembershipEdge {
                        from_oid: role,
                        to_oid: member,
                    };
                    if !self.edges.contains(&edge) {
                        self.edges.push(edge);
                    }
                }
            }
            Statement::RevokeMembership { role, member } => {
                if let (Some(role), Some(member)) = (self.role_oid(role), self.role_oid(member)) {
                    self.edges
                        .retain(|e| !(e.from_oid == role && e.to_oid == member));
                }
            }
            Statement::CreateResourceGroup { name, options } => {
                let oid = self.allocate_oid();
                let mut group = ResourceGroup {
                    oid,
                    name: name.clone(),
                    concurrency: 0,
                    cpu_rate_limit: 0,
                    memory_limit: 0,
                    group_members: Vec::new(),
                };
                for option in options {
                    set_option(&mut group, *option);
                }
                self.resource_groups.push(group);
            }
            Statement::AlterResourceGroup { name, option } => {
                if let Some(group) = self.resource_groups.iter_mut().find(|g| &g.name == name) {
                    set_option(group, *option);
                }
            }
            Statement::DropResourceGroup { name } => {
                self.resource_groups.retain(|g| &g.name != name);
            }
            Statement::AssignResourceGroup { role, group } => {
                for existing in &mut self.resource_groups {
                    existing.group_members.retain(|m| m != role);
                }
                if let Some(group) = group
                    && let Some(target) = self.resource_groups.iter_mut().find(|g| &g.name == group)
                {
                    target.group_members.push(role.clone());
                }
            }
            Statement::AlterOwner { object, owner } => {
                let found = match object {
                    ObjectName::Database(name) => {
                        self.databases.iter_mut().find(|o| &o.name == name)
                    }
                    ObjectName::Schema(name) => self.schemas.iter_mut().find(|o| &o.name == name),
                    ObjectName::Table { schema, table } => self
                        .tables
                        .iter_mut()
                        .find(|o| &o.name == table && o.schema.as_deref() == Some(schema)),
                };
                if let Some(found) = found {
                    found.owner = owner.clone();
                }
            }
            Statement::GrantDefault { .. }
            | Statement::RevokeDefault { .. }
            | Statement::CreateDblinkExtension
            | Statement::ReassignOwnedEverywhere { .. }
            | Statement::TerminateResourceGroupSessions { .. } => {}
        }
    }
}

fn acl_grantee(role: &str) -> String {
    if is_public(role) {
        String::new()
    } else {
        role.to_string()
    }
}

fn edit_acl(object: &mut ObjectAcl, edit: impl FnOnce(&mut Vec<PermissionRule>)) {
    let mut rules = decode_many(&object.acl).unwrap_or_default();
    edit(&mut rules);
    object.acl = rules.iter().map(PermissionRule::to_string).collect();
}

fn set_option(group: &mut ResourceGroup, option: ResourceGroupOption) {
    match option {
        ResourceGroupOption::CpuRateLimit(v) => group.cpu_rate_limit = v,
        ResourceGroupOption::MemoryLimit(v) => group.memory_limit = v,
        ResourceGroupOption::Concurrency(v) => group.concurrency = v,
    }
}

/// One execution request as the session saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub impersonated: Option<String>,
    pub statements: Vec<Statement>,
    pub atomic: bool,
    pub committed: bool,
}

impl Execution {
    pub fn sql(&self) -> Vec<String> {
        self.statements.iter().map(Statement::to_string).collect()
    }
}

type SectionPredicate = Box<dyn Fn(&[Statement]) -> bool + Send + Sync>;

#[derive(Default)]
struct Faults {
    statement_fragments: Vec<String>,
    impersonated_roles: Vec<String>,
    predicates: Vec<SectionPredicate>,
    connect: bool,
}

impl fmt::Debug for Faults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Faults")
            .field("statement_fragments", &self.statement_fragments)
            .field("impersonated_roles", &self.impersonated_roles)
            .field("predicates", &self.predicates.len())
            .field("connect", &self.connect)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Shared {
    cluster: Cluster,
    log: Vec<Execution>,
    faults: Faults,
    closed_sessions: usize,
}

#[derive(Debug, Clone)]
pub struct RecordingSession {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingSession {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                cluster,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Any statement whose SQL contains `fragment` fails.
    pub fn fail_statements_containing(&self, fragment: &str) {
        self.lock()
            .faults
            .statement_fragments
            .push(fragment.to_string());
    }

    /// Any section whose statements satisfy `predicate` fails.
    pub fn fail_sections_where(
        &self,
        predicate: impl Fn(&[Statement]) -> bool + Send + Sync + 'static,
    ) {
        self.lock().faults.predicates.push(Box::new(predicate));
    }

    /// Every atomic section run as `role` fails.
    pub fn fail_impersonating(&self, role: &str) {
        self.lock()
            .faults
            .impersonated_roles
            .push(role.to_string());
    }

    pub fn log(&self) -> Vec<Execution> {
        self.lock().log.clone()
    }

    pub fn committed_sql(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|e| e.committed)
            .flat_map(Execution::sql)
            .collect()
    }

    pub fn cluster(&self) -> Cluster {
        self.lock().cluster.clone()
    }

    pub fn table_rules(&self, schema: &str, table: &str) -> Vec<PermissionRule> {
        self.lock()
            .cluster
            .tables
            .iter()
            .find(|t| t.name == table && t.schema.as_deref() == Some(schema))
            .map(|t| decode_many(&t.acl).unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn closed_sessions(&self) -> usize {
        self.lock().closed_sessions
    }

    fn run(
        &self,
        impersonated: Option<String>,
        statements: Vec<Statement>,
        atomic: bool,
    ) -> Result<(), SessionError> {
        let mut shared = self.lock();

        let failing_statement = statements.iter().map(Statement::to_string).find(|sql| {
            shared
                .faults
                .statement_fragments
                .iter()
                .any(|fragment| sql.contains(fragment.as_str()))
        });
        let failing_role = impersonated
            .as_ref()
            .filter(|role| shared.faults.impersonated_roles.contains(*role));

        let rejected = shared
            .faults
            .predicates
            .iter()
            .any(|predicate| predicate(&statements));

        let error = match (failing_statement, failing_role) {
            (Some(sql), _) => Some(SessionError::Execution(format!("injected failure: {sql}"))),
            (None, Some(role)) => Some(SessionError::Execution(format!(
                "permission denied to set role \"{role}\""
            ))),
            (None, None) if rejected => {
                Some(SessionError::Execution("injected failure".to_string()))
            }
            (None, None) => None,
        };

        if error.is_none() {
            let acting = impersonated
                .clone()
                .unwrap_or_else(|| shared.cluster.session_user.clone());
            for statement in &statements {
                shared.cluster.apply(&acting, statement);
            }
        }

        shared.log.push(Execution {
            impersonated,
            statements,
            atomic,
            committed: error.is_none(),
        });

        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Catalog for RecordingSession {
    async fn database_acl(&mut self, database: &str) -> Result<Option<ObjectAcl>, SessionError> {
        Ok(self
            .lock()
            .cluster
            .databases
            .iter()
            .find(|d| d.name == database)
            .cloned())
    }

    async fn database_acls(&mut self) -> Result<Vec<ObjectAcl>, SessionError> {
        Ok(self.lock().cluster.databases.clone())
    }

    async fn schema_acl(&mut self, schema: &str) -> Result<Option<ObjectAcl>, SessionError> {
        Ok(self
            .lock()
            .cluster
            .schemas
            .iter()
            .find(|s| s.name == schema)
            .cloned())
    }

    async fn schema_acls(&mut self) -> Result<Vec<ObjectAcl>, SessionError> {
        Ok(self.lock().cluster.schemas.clone())
    }

    async fn table_acl(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Option<ObjectAcl>, SessionError> {
        Ok(self
            .lock()
            .cluster
            .tables
            .iter()
            .find(|t| t.name == table && t.schema.as_deref() == Some(schema))
            .cloned())
    }

    async fn table_acls(&mut self, schema: &str) -> Result<Vec<ObjectAcl>, SessionError> {
        Ok(self
            .lock()
            .cluster
            .tables
            .iter()
            .filter(|t| t.schema.as_deref() == Some(schema))
            .cloned()
            .collect())
    }

    async fn namespaces(&mut self) -> Result<Vec<String>, SessionError> {
        Ok(self.lock().cluster.namespaces.clone())
    }

    async fn roles(&mut self) -> Result<Vec<RoleNode>, SessionError> {
        Ok(self.lock().cluster.roles.clone())
    }

    async fn role(&mut self, name: &str) -> Result<Option<RoleNode>, SessionError> {
        Ok(self
            .lock()
            .cluster
            .roles
            .iter()
            .find(|r| r.rolname == name)
            .cloned())
    }

    async fn membership_edges(&mut self) -> Result<Vec<MembershipEdge>, SessionError> {
        Ok(self.lock().cluster.edges.clone())
    }

    async fn role_members(&mut self, role: &str) -> Result<Vec<RoleRef>, SessionError> {
        let shared = self.lock();
        let cluster = &shared.cluster;
        let Some(oid) = cluster.role_oid(role) else {
            return Ok(Vec::new());
        };
        Ok(cluster
            .edges
            .iter()
            .filter(|e| e.from_oid == oid)
            .filter_map(|e| cluster.roles.iter().find(|r| r.oid == e.to_oid))
            .map(|r| RoleRef {
                oid: r.oid,
                rolname: r.rolname.clone(),
            })
            .collect())
    }

    async fn resource_groups(&mut self) -> Result<Vec<ResourceGroup>, SessionError> {
        Ok(self.lock().cluster.resource_groups.clone())
    }

    async fn resource_group(&mut self, name: &str) -> Result<Option<ResourceGroup>, SessionError> {
        Ok(self
            .lock()
            .cluster
            .resource_groups
            .iter()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn resource_group_limits(&mut self) -> Result<ResourceGroupLimits, SessionError> {
        Ok(self.lock().cluster.limits)
    }

    async fn default_acls(&mut self) -> Result<Vec<DefaultAclRow>, SessionError> {
        Ok(self.lock().cluster.default_acls.clone())
    }
}

impl Executor for RecordingSession {
    async fn execute_atomic(&mut self, section: &AtomicSection) -> Result<(), SessionError> {
        let impersonated = match &section.impersonation {
            Impersonation::SessionUser => None,
            Impersonation::Role(role) => Some(role.clone()),
        };
        self.run(impersonated, section.statements.clone(), true)
    }

    async fn execute_autocommit(&mut self, statement: &Statement) -> Result<(), SessionError> {
        self.run(None, vec![statement.clone()], false)
    }
}

impl AdminSession for RecordingSession {
    async fn close(self) -> Result<(), SessionError> {
        self.lock().closed_sessions += 1;
        Ok(())
    }
}

/// Hands out sessions that all share one recorded cluster.
#[derive(Debug, Clone)]
pub struct RecordingProvider {
    session: RecordingSession,
    contexts: Vec<String>,
}

impl RecordingProvider {
    pub fn new(cluster: Cluster, contexts: &[&str]) -> Self {
        Self {
            session: RecordingSession::new(cluster),
            contexts: contexts.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// The session every `open` call hands out, for inspection.
    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn fail_connect(&self) {
        self.session.lock().faults.connect = true;
    }
}

impl SessionProvider for RecordingProvider {
    type Session = RecordingSession;

    async fn open(&self, target: &SessionTarget) -> Result<RecordingSession, SessionError> {
        if !self.contexts.contains(&target.context) {
            return Err(SessionError::UnknownContext(target.context.clone()));
        }
        if self.session.lock().faults.connect {
            return Err(SessionError::Connect("connection refused".to_string()));
        }
        Ok(self.session.clone())
    }
}
