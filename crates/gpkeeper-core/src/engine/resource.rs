use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{ResourceGroup, ResourceGroupLimits};
use crate::error::AdminError;
use crate::session::{Catalog, Executor};
use crate::statement::{ResourceGroupOption, Statement};

use super::sweep::StepOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupSpec {
    pub name: String,
    pub concurrency: i32,
    pub cpu_rate_limit: i32,
    pub memory_limit: i32,
    #[serde(default)]
    pub group_members: Vec<String>,
}

/// Desired state of an existing group. The name comes from the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupUpdate {
    pub concurrency: i32,
    pub cpu_rate_limit: i32,
    pub memory_limit: i32,
    #[serde(default)]
    pub group_members: Vec<String>,
}

fn options(cpu_rate_limit: i32, memory_limit: i32, concurrency: i32) -> [ResourceGroupOption; 3] {
    [
        ResourceGroupOption::CpuRateLimit(cpu_rate_limit),
        ResourceGroupOption::MemoryLimit(memory_limit),
        ResourceGroupOption::Concurrency(concurrency),
    ]
}

fn current_value(group: &ResourceGroup, option: ResourceGroupOption) -> i32 {
    match option {
        ResourceGroupOption::CpuRateLimit(_) => group.cpu_rate_limit,
        ResourceGroupOption::MemoryLimit(_) => group.memory_limit,
        ResourceGroupOption::Concurrency(_) => group.concurrency,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDiff {
    pub removed: Vec<String>,
    pub appended: Vec<String>,
}

impl MemberDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.appended.is_empty()
    }
}

/// Set difference in both directions. Output keeps the input order and drops
/// duplicates.
pub fn diff_members(current: &[String], desired: &[String]) -> MemberDiff {
    let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
    let desired_set: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let removed = current
        .iter()
        .filter(|m| !desired_set.contains(m.as_str()) && seen.insert(m.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let appended = desired
        .iter()
        .filter(|m| !current_set.contains(m.as_str()) && seen.insert(m.as_str()))
        .cloned()
        .collect();

    MemberDiff { removed, appended }
}

/// Resource group DDL cannot run inside a transaction block, so every statement
/// here goes through `execute_autocommit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGroupReconciler;

impl ResourceGroupReconciler {
    pub fn new() -> Self {
        Self
    }

    pub async fn list_all<S: Catalog>(
        &self,
        session: &mut S,
    ) -> Result<Vec<ResourceGroup>, AdminError> {
        Ok(session.resource_groups().await?)
    }

    pub async fn available_limits<S: Catalog>(
        &self,
        session: &mut S,
    ) -> Result<ResourceGroupLimits, AdminError> {
        Ok(session.resource_group_limits().await?)
    }

    pub async fn create<S: Executor>(
        &self,
        session: &mut S,
        spec: &ResourceGroupSpec,
    ) -> Result<(), AdminError> {
        let statement = Statement::CreateResourceGroup {
            name: spec.name.clone(),
            options: options(spec.cpu_rate_limit, spec.memory_limit, spec.concurrency).to_vec(),
        };
        session.execute_autocommit(&statement).await?;

        let mut outcome = StepOutcome::default();
        assign(session, &mut outcome, &spec.group_members, Some(&spec.name)).await;
        outcome.finish(&spec.name)?;
        Ok(())
    }

    /// Alters only the options whose value changed, then moves members.
    pub async fn update<S: Catalog + Executor>(
        &self,
        session: &mut S,
        name: &str,
        desired: &ResourceGroupUpdate,
    ) -> Result<(), AdminError> {
        let current = session
            .resource_group(name)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("resource group {name}")))?;
        let diff = diff_members(&current.group_members, &desired.group_members);

        let mut outcome = StepOutcome::default();
        for option in options(desired.cpu_rate_limit, desired.memory_limit, desired.concurrency) {
            if current_value(&current, option) == option.value() {
                continue;
            }
            let statement = Statement::AlterResourceGroup {
                name: name.to_string(),
                option,
            };
            let result = session.execute_autocommit(&statement).await;
            outcome.record(option.keyword(), result);
        }

        assign(session, &mut outcome, &diff.removed, None).await;
        assign(session, &mut outcome, &diff.appended, Some(name)).await;

        tracing::debug!(
            group = name,
            removed = diff.removed.len(),
            appended = diff.appended.len(),
            "reconciled resource group members"
        );
        outcome.finish(name)?;
        Ok(())
    }

    /// Members are detached and running sessions terminated before the drop,
    /// otherwise the server refuses it.
    pub async fn delete<S: Catalog + Executor>(
        &self,
        session: &mut S,
        name: &str,
    ) -> Result<(), AdminError> {
        let current = session
            .resource_group(name)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("resource group {name}")))?;

        let mut outcome = StepOutcome::default();
        assign(session, &mut outcome, &current.group_members, None).await;

        session
            .execute_autocommit(&Statement::TerminateResourceGroupSessions {
                group: name.to_string(),
            })
            .await?;
        session
            .execute_autocommit(&Statement::DropResourceGroup {
                name: name.to_string(),
            })
            .await?;

        outcome.finish(name)?;
        Ok(())
    }
}

async fn assign<S: Executor>(
    session: &mut S,
    outcome: &mut StepOutcome,
    roles: &[String],
    group: Option<&str>,
) {
    for role in roles {
        let statement = Statement::AssignResourceGroup {
            role: role.clone(),
            group: group.map(str::to_string),
        };
        let result = session.execute_autocommit(&statement).await;
        outcome.record(role.as_str(), result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LimitRange, normalize_members};
    use crate::testing::{Cluster, RecordingSession};

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn etl_spec() -> ResourceGroupSpec {
        ResourceGroupSpec {
            name: "etl".to_string(),
            concurrency: 5,
            cpu_rate_limit: 20,
            memory_limit: 30,
            group_members: names(&["svc1"]),
        }
    }

    #[test]
    fn diff_reports_both_directions() {
        let diff = diff_members(&names(&["a", "b", "c"]), &names(&["b", "c", "d"]));
        assert_eq!(diff.removed, names(&["a"]));
        assert_eq!(diff.appended, names(&["d"]));
    }

    #[test]
    fn diff_of_equal_lists_is_empty() {
        let diff = diff_members(&names(&["a", "b"]), &names(&["b", "a", "a"]));
        assert!(diff.is_empty());
    }

    #[test]
    fn diff_against_empty_group_appends_everything_once() {
        let current = normalize_members(vec![None]);
        let diff = diff_members(&current, &names(&["x", "y", "x"]));
        assert!(diff.removed.is_empty());
        assert_eq!(diff.appended, names(&["x", "y"]));
    }

    #[tokio::test]
    async fn create_then_update_touches_only_changes() {
        let mut cluster = Cluster::default();
        cluster.add_role("svc1");
        cluster.add_role("svc2");
        let mut session = RecordingSession::new(cluster);
        let reconciler = ResourceGroupReconciler::new();

        reconciler.create(&mut session, &etl_spec()).await.unwrap();
        assert_eq!(
            session.committed_sql(),
            vec![
                r#"CREATE RESOURCE GROUP "etl" WITH (CPU_RATE_LIMIT=20, MEMORY_LIMIT=30, CONCURRENCY=5)"#,
                r#"ALTER ROLE "svc1" RESOURCE GROUP "etl""#,
            ]
        );

        let update = ResourceGroupUpdate {
            concurrency: 10,
            cpu_rate_limit: 20,
            memory_limit: 30,
            group_members: names(&["svc1", "svc2"]),
        };
        reconciler.update(&mut session, "etl", &update).await.unwrap();

        let log = session.log();
        let update_sql: Vec<String> = log[2..].iter().flat_map(|e| e.sql()).collect();
        assert_eq!(
            update_sql,
            vec![
                r#"ALTER RESOURCE GROUP "etl" SET CONCURRENCY 10"#,
                r#"ALTER ROLE "svc2" RESOURCE GROUP "etl""#,
            ]
        );
        assert!(log.iter().all(|e| !e.atomic));
        assert!(!update_sql.iter().any(|sql| sql.ends_with("RESOURCE GROUP NONE")));

        let groups = reconciler.list_all(&mut session).await.unwrap();
        assert_eq!(groups[0].concurrency, 10);
        assert_eq!(groups[0].group_members, names(&["svc1", "svc2"]));
    }

    #[tokio::test]
    async fn create_tolerates_member_failures() {
        let mut session = RecordingSession::new(Cluster::default());
        session.fail_statements_containing(r#"ALTER ROLE "svc1""#);

        let mut spec = etl_spec();
        spec.group_members = names(&["svc1", "svc2"]);
        let err = ResourceGroupReconciler::new()
            .create(&mut session, &spec)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AdminError::PartiallyFailed { ref object, failures: 1 } if object == "etl"
        ));
        assert_eq!(session.log().len(), 3);
        assert_eq!(session.cluster().resource_groups[0].group_members, names(&["svc2"]));
    }

    #[tokio::test]
    async fn create_failure_is_not_partial() {
        let mut session = RecordingSession::new(Cluster::default());
        session.fail_statements_containing("CREATE RESOURCE GROUP");

        let err = ResourceGroupReconciler::new()
            .create(&mut session, &etl_spec())
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::Session(_)));
        assert_eq!(session.log().len(), 1);
    }

    #[tokio::test]
    async fn update_keeps_going_after_failed_option() {
        let mut cluster = Cluster::default();
        cluster.add_resource_group("etl", [5, 20, 30], &["old"]);
        let mut session = RecordingSession::new(cluster);
        session.fail_statements_containing("SET CPU_RATE_LIMIT");

        let update = ResourceGroupUpdate {
            concurrency: 8,
            cpu_rate_limit: 25,
            memory_limit: 35,
            group_members: names(&["new"]),
        };
        let err = ResourceGroupReconciler::new()
            .update(&mut session, "etl", &update)
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::PartiallyFailed { failures: 1, .. }));
        let committed = session.committed_sql();
        assert_eq!(
            committed,
            vec![
                r#"ALTER RESOURCE GROUP "etl" SET MEMORY_LIMIT 35"#,
                r#"ALTER RESOURCE GROUP "etl" SET CONCURRENCY 8"#,
                r#"ALTER ROLE "old" RESOURCE GROUP NONE"#,
                r#"ALTER ROLE "new" RESOURCE GROUP "etl""#,
            ]
        );
    }

    #[tokio::test]
    async fn update_of_missing_group_is_not_found() {
        let mut session = RecordingSession::new(Cluster::default());
        let update = ResourceGroupUpdate {
            concurrency: 1,
            cpu_rate_limit: 1,
            memory_limit: 1,
            group_members: Vec::new(),
        };

        let err = ResourceGroupReconciler::new()
            .update(&mut session, "ghost", &update)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::NotFound(_)));
        assert!(session.log().is_empty());
    }

    #[tokio::test]
    async fn delete_detaches_terminates_then_drops() {
        let mut cluster = Cluster::default();
        cluster.add_resource_group("etl", [5, 20, 30], &["svc1", "svc2"]);
        let mut session = RecordingSession::new(cluster);

        ResourceGroupReconciler::new()
            .delete(&mut session, "etl")
            .await
            .unwrap();

        let sql = session.committed_sql();
        assert_eq!(sql.len(), 4);
        assert_eq!(sql[0], r#"ALTER ROLE "svc1" RESOURCE GROUP NONE"#);
        assert_eq!(sql[1], r#"ALTER ROLE "svc2" RESOURCE GROUP NONE"#);
        assert!(sql[2].starts_with("SELECT pg_terminate_backend(pid)"));
        assert_eq!(sql[3], r#"DROP RESOURCE GROUP "etl""#);
        assert!(session.cluster().resource_groups.is_empty());
    }

    #[tokio::test]
    async fn limits_come_from_catalog() {
        let mut session = RecordingSession::new(Cluster::default());
        let limits = ResourceGroupReconciler::new()
            .available_limits(&mut session)
            .await
            .unwrap();
        assert_eq!(limits.concurrency, LimitRange { min: 0, max: 250 });
    }
}
