use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("no password configured for context {0}")]
    MissingCredential(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Supplies the decrypted password of a connection context.
pub trait CredentialStore: Send + Sync {
    fn password(&self, alias: &str) -> Result<String, StorageError>;
}

/// Reads each context's password from the environment variable configured for it.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore {
    variables: HashMap<String, String>,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, alias: impl Into<String>, variable: impl Into<String>) -> Self {
        self.variables.insert(alias.into(), variable.into());
        self
    }
}

impl CredentialStore for EnvCredentialStore {
    fn password(&self, alias: &str) -> Result<String, StorageError> {
        let variable = self
            .variables
            .get(alias)
            .ok_or_else(|| StorageError::MissingCredential(alias.to_string()))?;
        std::env::var(variable).map_err(|e| match e {
            std::env::VarError::NotPresent => StorageError::MissingCredential(alias.to_string()),
            other => StorageError::Internal(format!("{variable}: {other}")),
        })
    }
}

/// Alias to plain-text password, for tests and embedded setups.
impl CredentialStore for HashMap<String, String> {
    fn password(&self, alias: &str) -> Result<String, StorageError> {
        self.get(alias)
            .cloned()
            .ok_or_else(|| StorageError::MissingCredential(alias.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_store_reads_configured_variable() {
        let store = EnvCredentialStore::new().with_variable("prod", "PATH");
        assert!(store.password("prod").is_ok());
    }

    #[test]
    fn env_store_reports_unknown_alias() {
        let store = EnvCredentialStore::new();
        assert_eq!(
            store.password("prod"),
            Err(StorageError::MissingCredential("prod".to_string()))
        );
    }

    #[test]
    fn env_store_reports_unset_variable() {
        let store =
            EnvCredentialStore::new().with_variable("prod", "GPKEEPER_TEST_SURELY_UNSET_VARIABLE");
        assert!(matches!(
            store.password("prod"),
            Err(StorageError::MissingCredential(_))
        ));
    }

    #[test]
    fn map_store_returns_password() {
        let store = HashMap::from([("dev".to_string(), "secret".to_string())]);
        assert_eq!(store.password("dev").unwrap(), "secret");
        assert!(store.password("prod").is_err());
    }
}
