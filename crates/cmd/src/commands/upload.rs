use anyhow::{Result, anyhow};
use std::path::PathBuf;

use crate::common::{Target, print_refresh_report, print_snapshot, print_upload_report, read_files};

/// Upload image files, refresh the stage, and show the reloaded table
pub async fn upload_command(target: &Target, paths: &[PathBuf]) -> Result<()> {
    let mut controller = target.controller()?;
    controller.ensure_stage().await?;

    let files = read_files(paths).await;
    if files.is_empty() {
        return Err(anyhow!("No readable files to upload"));
    }

    match controller.submit_files(&files).await {
        Some(report) => {
            print_upload_report(&report);
            print_snapshot(controller.state().snapshot())?;
            if report.is_success() {
                Ok(())
            } else {
                Err(anyhow!("Upload finished with errors"))
            }
        }
        None => {
            println!("No new files to upload");
            Ok(())
        }
    }
}

/// Refresh the stage and reload without uploading
pub async fn refresh_command(target: &Target) -> Result<()> {
    let mut controller = target.controller()?;
    let report = controller.manual_refresh().await;
    print_refresh_report(&report);
    print_snapshot(controller.state().snapshot())?;
    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow!("Refresh failed"))
    }
}
