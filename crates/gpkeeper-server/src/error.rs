use gpkeeper_core::AdminError;
use gpkeeper_core::acl::AclError;
use gpkeeper_core::session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error("unknown grant target '{0}'")]
    UnknownGrantTarget(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Admin(AdminError::Session(err))
    }
}

impl From<AclError> for ApiError {
    fn from(err: AclError) -> Self {
        ApiError::Admin(AdminError::Acl(err))
    }
}

impl ApiError {
    /// Short outcome label used by audit events.
    pub fn outcome(&self) -> &'static str {
        match self {
            ApiError::Admin(AdminError::PartiallyFailed { .. }) => "partial",
            _ => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_from_session_error_keeps_message() {
        let api_err: ApiError = SessionError::Connect("refused".to_string()).into();

        assert!(
            api_err.to_string().contains("refused"),
            "expected 'refused' in error message, got: {api_err}"
        );
        assert!(matches!(api_err, ApiError::Admin(AdminError::Session(_))));
    }

    #[test]
    fn api_error_from_acl_error() {
        let api_err: ApiError = AclError::MalformedPermissionSymbol('q').into();

        assert!(
            api_err.to_string().contains("'q'"),
            "expected symbol in error message, got: {api_err}"
        );
    }

    #[test]
    fn partial_failure_names_object() {
        let api_err = ApiError::Admin(AdminError::PartiallyFailed {
            object: "etl".to_string(),
            failures: 2,
        });
        assert!(api_err.to_string().starts_with("etl:"));
        assert_eq!(api_err.outcome(), "partial");
    }

    #[test]
    fn other_errors_are_failures() {
        let api_err = ApiError::UnknownGrantTarget("views".to_string());
        assert_eq!(api_err.outcome(), "failed");
        assert!(api_err.to_string().contains("views"));
    }
}
