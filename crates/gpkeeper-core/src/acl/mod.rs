mod parser;
pub mod types;

pub use parser::{aggregate, decode, decode_many, encode};
pub use types::{AggregatedRule, PermissionRule, Privilege};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AclError {
    #[error("malformed permission symbol '{0}'")]
    MalformedPermissionSymbol(char),
    #[error("unknown privilege name '{0}'")]
    UnknownPrivilegeName(String),
    #[error("invalid ACL item: {0}")]
    Syntax(String),
}
