//! Database and schema browsing for picking the upload target.

use crate::error::CrowdError;
use crate::gateway::{QueryGateway, Statement};
use crate::ident::Identifier;
use diagnostics::*;

const EXCLUDED_SCHEMA: &str = "INFORMATION_SCHEMA";

/// Database names matching `%_%`
pub async fn list_databases(gateway: &dyn QueryGateway) -> Result<Vec<String>, CrowdError> {
    let result = gateway
        .execute(&Statement::new("SHOW DATABASES LIKE '%_%'"))
        .await?;
    let names = result.strings("name")?;
    let count = names.len();
    debug!("Listed {count} databases", count: count);
    Ok(names)
}

/// Schema names in `database`, without `INFORMATION_SCHEMA`
pub async fn list_schemas(
    gateway: &dyn QueryGateway,
    database: &Identifier,
) -> Result<Vec<String>, CrowdError> {
    let result = gateway
        .execute(&Statement::new(format!("SHOW SCHEMAS IN DATABASE {database}")))
        .await?;
    Ok(result
        .strings("name")?
        .into_iter()
        .filter(|name| !name.eq_ignore_ascii_case(EXCLUDED_SCHEMA))
        .collect())
}

fn present(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|s| !s.is_empty())
}

/// Target schema for the stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChoice {
    /// Picked from the listed schemas
    Existing(Identifier),
    /// Typed by the user; created on setup
    New(Identifier),
}

impl SchemaChoice {
    /// A selected schema wins over a typed name; neither is an error
    pub fn resolve(selected: Option<&str>, new_name: Option<&str>) -> Result<Self, CrowdError> {
        match (present(selected), present(new_name)) {
            (Some(existing), _) => Ok(SchemaChoice::Existing(Identifier::parse(existing)?)),
            (None, Some(name)) => Ok(SchemaChoice::New(Identifier::parse(name)?)),
            (None, None) => Err(CrowdError::SchemaRequired),
        }
    }

    pub fn name(&self) -> &Identifier {
        match self {
            SchemaChoice::Existing(name) | SchemaChoice::New(name) => name,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SchemaChoice::New(_))
    }
}
