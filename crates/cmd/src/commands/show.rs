use anyhow::Result;

use crate::common::{Target, print_snapshot};

pub async fn show_command(target: &Target) -> Result<()> {
    let mut controller = target.controller()?;
    controller.load().await?;
    print_snapshot(controller.state().snapshot())
}
