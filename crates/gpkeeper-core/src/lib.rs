pub mod acl;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod graph;
pub mod session;
pub mod statement;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::AdminError;
pub use session::{AdminSession, Catalog, Executor, SessionError, SessionProvider, SessionTarget};
