use crate::error::ApiError;

/// Records one mutating request against a connection context.
pub fn audit_change<T>(event: &str, context: &str, object: &str, result: &Result<T, ApiError>) {
    match result {
        Ok(_) => tracing::info!(
            target: "audit",
            event = event,
            context = context,
            object = object,
            outcome = "applied",
            "change applied"
        ),
        Err(err) => tracing::warn!(
            target: "audit",
            event = event,
            context = context,
            object = object,
            outcome = err.outcome(),
            error = %err,
            "change not fully applied"
        ),
    }
}
