use anyhow::{Result, anyhow};
use crowdcount::analytics;

use crate::common::Target;

pub async fn detail_command(target: &Target, row: usize) -> Result<()> {
    let mut controller = target.controller()?;
    controller.load().await?;
    controller.select(Some(row))?;
    let panel = controller
        .detail()
        .await?
        .ok_or_else(|| anyhow!("No row selected"))?;
    print!("{panel}");
    Ok(())
}

/// Print the ratio chart of one row, as bars or as a Vega-Lite spec
pub async fn chart_command(target: &Target, row: usize, vega: bool) -> Result<()> {
    let mut controller = target.controller()?;
    controller.load().await?;
    let snapshot = controller
        .state()
        .snapshot()
        .ok_or_else(|| anyhow!("No data loaded"))?;
    let analytics = analytics::render(&snapshot.record(row)?)?;

    if vega {
        println!("{}", serde_json::to_string_pretty(&analytics.chart.to_vega_lite())?);
    } else {
        print!("{}", analytics.chart.to_text(72));
        for metric in analytics.metrics() {
            println!("{metric}");
        }
    }
    Ok(())
}
