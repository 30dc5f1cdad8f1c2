use anyhow::Result;

use RamFerry::metrics;

pub fn exec() -> Result<()> {
    let snap = metrics::snapshot();
    println!("{}", serde_json::to_string_pretty(&snap)?);
    Ok(())
}
