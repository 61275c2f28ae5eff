use crate::error::AdminError;
use crate::session::SessionError;

/// Result of a best-effort loop: how many steps went through and which failed.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub applied: usize,
    pub failures: Vec<(String, SessionError)>,
}

impl StepOutcome {
    pub fn record(&mut self, step: impl Into<String>, result: Result<(), SessionError>) {
        match result {
            Ok(()) => self.applied += 1,
            Err(err) => {
                let step = step.into();
                tracing::warn!(step = %step, error = %err, "step failed, continuing");
                self.failures.push((step, err));
            }
        }
    }

    pub fn finish(self, object: &str) -> Result<usize, AdminError> {
        if self.failures.is_empty() {
            Ok(self.applied)
        } else {
            Err(AdminError::PartiallyFailed {
                object: object.to_string(),
                failures: self.failures.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_outcome_reports_applied_count() {
        let mut outcome = StepOutcome::default();
        outcome.record("a", Ok(()));
        outcome.record("b", Ok(()));

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.finish("obj").unwrap(), 2);
    }

    #[test]
    fn failures_fold_into_one_partial_failure() {
        let mut outcome = StepOutcome::default();
        outcome.record("a", Err(SessionError::Execution("boom".to_string())));
        outcome.record("b", Ok(()));
        outcome.record("c", Err(SessionError::Execution("boom".to_string())));

        match outcome.finish("etl") {
            Err(AdminError::PartiallyFailed { object, failures }) => {
                assert_eq!(object, "etl");
                assert_eq!(failures, 2);
            }
            other => panic!("expected PartiallyFailed, got {other:?}"),
        }
    }
}
