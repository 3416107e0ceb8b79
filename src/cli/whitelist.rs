use anyhow::Result;

use crate::config::Config;

pub fn run(config: &Config) -> Result<()> {
    let store = config.whitelist_store()?;

    println!("Firewall whitelist ({} entries):", store.firewall.len());
    for entry in &store.firewall {
        println!("  {}", entry);
    }

    println!("Bucket whitelist ({} entries):", store.buckets.len());
    for bucket in &store.buckets {
        println!("  {}", bucket);
    }

    Ok(())
}
