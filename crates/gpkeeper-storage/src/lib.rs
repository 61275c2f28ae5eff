pub mod postgres;
pub mod traits;

pub use postgres::{ConnectionContext, PgSession, PgSessionProvider};
pub use traits::{CredentialStore, EnvCredentialStore, StorageError};
