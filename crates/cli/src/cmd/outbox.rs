//! Report messages still waiting for broker acknowledgement

use anyhow::Result;
use journal::Outbox;
use owo_colors::OwoColorize;
use std::path::Path;

/// Number of oldest pending messages listed
const SHOW_OLDEST: usize = 10;

pub async fn run(data_dir: &Path) -> Result<()> {
    let outbox = Outbox::open(data_dir)?;
    let pending = outbox.len();

    if pending == 0 {
        println!("{} Outbox is empty", "✓".green());
        return Ok(());
    }

    println!("{} {} messages pending", "•".yellow(), pending);
    for (seq, message) in outbox.pending_after(None, SHOW_OLDEST)? {
        println!(
            "  #{} {} {}",
            seq,
            message.topic.cyan(),
            format!("({} bytes)", message.payload.len()).dimmed()
        );
    }
    if pending > SHOW_OLDEST {
        println!("  {}", format!("... and {} more", pending - SHOW_OLDEST).dimmed());
    }

    Ok(())
}
