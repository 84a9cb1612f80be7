use anyhow::{Context, Result};

use crate::common::Target;

/// Create the schema and the stage if missing
pub async fn setup_command(target: &Target) -> Result<()> {
    let controller = target.controller()?;
    let stage = controller.location().at_fqn();
    controller
        .ensure_stage()
        .await
        .with_context(|| format!("Failed to create stage {stage}"))?;
    println!("Stage {stage} is ready");
    Ok(())
}
