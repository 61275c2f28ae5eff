use crate::acl::AclError;
use crate::graph::GraphError;
use crate::session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{object}: {failures} step(s) failed, the requested state was applied")]
    PartiallyFailed { object: String, failures: usize },

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("unsupported entity type: {0}")]
    UnsupportedEntityType(String),

    #[error("could not drop role {0}")]
    DropFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("membership graph is not acyclic: {0}")]
    MembershipCycle(#[from] GraphError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
