use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;
use crate::session::{AtomicSection, Executor};
use crate::statement::{ObjectName, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerEntity {
    Database,
    Schema,
    Table,
}

impl FromStr for OwnerEntity {
    type Err = AdminError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "database" => Ok(OwnerEntity::Database),
            "schema" => Ok(OwnerEntity::Schema),
            "table" => Ok(OwnerEntity::Table),
            other => Err(AdminError::UnsupportedEntityType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerEntityUpdate {
    pub type_of_entity: String,
    pub owner: String,
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

impl OwnerEntityUpdate {
    pub fn object(&self) -> Result<ObjectName, AdminError> {
        let entity: OwnerEntity = self.type_of_entity.parse()?;
        match entity {
            OwnerEntity::Database => Ok(ObjectName::Database(self.database.clone())),
            OwnerEntity::Schema => {
                let schema = self.schema.clone().ok_or_else(|| {
                    AdminError::InvalidRequest("schema owner change needs a schema".to_string())
                })?;
                Ok(ObjectName::Schema(schema))
            }
            OwnerEntity::Table => match (&self.schema, &self.table) {
                (Some(schema), Some(table)) => Ok(ObjectName::Table {
                    schema: schema.clone(),
                    table: table.clone(),
                }),
                _ => Err(AdminError::InvalidRequest(
                    "table owner change needs a schema and a table".to_string(),
                )),
            },
        }
    }
}

pub async fn transfer_owner<S: Executor>(
    session: &mut S,
    update: &OwnerEntityUpdate,
) -> Result<ObjectName, AdminError> {
    let object = update.object()?;
    let statement = Statement::AlterOwner {
        object: object.clone(),
        owner: update.owner.clone(),
    };
    session
        .execute_atomic(&AtomicSection::new(vec![statement]))
        .await?;
    Ok(object)
}
