use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::AclError;

/// Variants are declared in the order the server prints ACL letters
/// (`arwdDxtXUCTc`), so iterating a `BTreeSet<Privilege>` yields canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Privilege {
    Insert,
    Select,
    Update,
    Delete,
    Truncate,
    References,
    Trigger,
    Execute,
    Usage,
    Create,
    Temporary,
    Connect,
}

impl Privilege {
    pub const ALL: [Privilege; 12] = [
        Privilege::Insert,
        Privilege::Select,
        Privilege::Update,
        Privilege::Delete,
        Privilege::Truncate,
        Privilege::References,
        Privilege::Trigger,
        Privilege::Execute,
        Privilege::Usage,
        Privilege::Create,
        Privilege::Temporary,
        Privilege::Connect,
    ];

    pub fn symbol(self) -> char {
        match self {
            Privilege::Select => 'r',
            Privilege::Update => 'w',
            Privilege::Insert => 'a',
            Privilege::Delete => 'd',
            Privilege::Truncate => 'D',
            Privilege::References => 'x',
            Privilege::Trigger => 't',
            Privilege::Execute => 'X',
            Privilege::Usage => 'U',
            Privilege::Create => 'C',
            Privilege::Connect => 'c',
            Privilege::Temporary => 'T',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Privilege::Select => "SELECT",
            Privilege::Update => "UPDATE",
            Privilege::Insert => "INSERT",
            Privilege::Delete => "DELETE",
            Privilege::Truncate => "TRUNCATE",
            Privilege::References => "REFERENCES",
            Privilege::Trigger => "TRIGGER",
            Privilege::Execute => "EXECUTE",
            Privilege::Usage => "USAGE",
            Privilege::Create => "CREATE",
            Privilege::Connect => "CONNECT",
            Privilege::Temporary => "TEMPORARY",
        }
    }

    pub fn from_symbol(symbol: char) -> Result<Self, AclError> {
        Privilege::ALL
            .into_iter()
            .find(|p| p.symbol() == symbol)
            .ok_or(AclError::MalformedPermissionSymbol(symbol))
    }
}

impl FromStr for Privilege {
    type Err = AclError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Privilege::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| AclError::UnknownPrivilegeName(name.to_string()))
    }
}

impl TryFrom<String> for Privilege {
    type Error = AclError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<Privilege> for String {
    fn from(privilege: Privilege) -> Self {
        privilege.name().to_string()
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `grantee=privileges/grantor` item. An empty grantee is PUBLIC.
///
/// A privilege present in `privileges_with_grant_option` never also appears in
/// `privileges`; the set a grantee effectively holds is their union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub grantee: String,
    pub grantor: String,
    pub privileges: BTreeSet<Privilege>,
    pub privileges_with_grant_option: BTreeSet<Privilege>,
}

impl PermissionRule {
    pub fn new(
        grantee: impl Into<String>,
        grantor: impl Into<String>,
        privileges: impl IntoIterator<Item = Privilege>,
        privileges_with_grant_option: impl IntoIterator<Item = Privilege>,
    ) -> Self {
        let privileges_with_grant_option: BTreeSet<Privilege> =
            privileges_with_grant_option.into_iter().collect();
        let privileges = privileges
            .into_iter()
            .filter(|p| !privileges_with_grant_option.contains(p))
            .collect();
        Self {
            grantee: grantee.into(),
            grantor: grantor.into(),
            privileges,
            privileges_with_grant_option,
        }
    }

    pub fn is_public(&self) -> bool {
        self.grantee.is_empty()
    }

    pub fn effective(&self) -> BTreeSet<Privilege> {
        self.privileges
            .union(&self.privileges_with_grant_option)
            .copied()
            .collect()
    }

    /// Same privileges, re-attributed to another grantee/grantor pair.
    pub fn reassigned(&self, grantee: impl Into<String>, grantor: impl Into<String>) -> Self {
        Self {
            grantee: grantee.into(),
            grantor: grantor.into(),
            privileges: self.privileges.clone(),
            privileges_with_grant_option: self.privileges_with_grant_option.clone(),
        }
    }
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_public() {
            write_quoted(f, &self.grantee)?;
        }
        f.write_str("=")?;
        for privilege in Privilege::ALL {
            if self.privileges_with_grant_option.contains(&privilege) {
                write!(f, "{}*", privilege.symbol())?;
            } else if self.privileges.contains(&privilege) {
                write!(f, "{}", privilege.symbol())?;
            }
        }
        f.write_str("/")?;
        write_quoted(f, &self.grantor)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    write!(f, "\"{}\"", name.replace('"', "\"\""))
}

/// All rules of one grantee merged together.
///
/// `merged_rules` counts how many source items were folded into this entry;
/// it stands where a non-aggregated rule carries its grantor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedRule {
    pub grantee: String,
    pub merged_rules: usize,
    pub privileges: BTreeSet<Privilege>,
    pub privileges_with_grant_option: BTreeSet<Privilege>,
}
