use anyhow::Result;
use crowdcount::catalog::{list_databases, list_schemas};
use crowdcount::SqlApiGateway;

use crate::common::Target;

pub async fn databases_command(target: &Target) -> Result<()> {
    let config = target.load_config()?;
    let selected = target.database(&config)?;
    let gateway = SqlApiGateway::new(&config)?;
    for name in list_databases(&gateway).await? {
        let marker = if selected.matches(&name) { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

/// List schemas of the selected database
pub async fn schemas_command(target: &Target) -> Result<()> {
    let config = target.load_config()?;
    let database = target.database(&config)?;
    let gateway = SqlApiGateway::new(&config)?;

    let schemas = list_schemas(&gateway, &database).await?;
    if schemas.is_empty() {
        println!("No schemas in {database}; use --new-schema to create one");
    }
    for name in schemas {
        let marker = if name.eq_ignore_ascii_case(&config.schema) { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}
