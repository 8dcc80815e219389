// One-shot administration commands

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use tracing::info;

use clusterlock_common::{LockRecord, current_timestamp};
use clusterlock_core::LockJanitor;
use clusterlock_persistence::LockStore;

use super::{open_manager, open_store};
use crate::model::Configuration;

pub async fn init(configuration: &Configuration) -> anyhow::Result<()> {
    let store = open_store(configuration).await?;
    store.create_table_if_not_exists().await?;
    println!("cluster_lock table ready");
    Ok(())
}

pub async fn locks(configuration: &Configuration, json: bool) -> anyhow::Result<()> {
    let store = open_store(configuration).await?;
    let mut records = store.find_held().await?;
    records.sort_by(|a, b| a.key.cmp(&b.key));

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", render_table(&records, current_timestamp()));
    }
    Ok(())
}

pub async fn status(configuration: &Configuration, key: &str) -> anyhow::Result<()> {
    let store = open_store(configuration).await?;
    match store.find(key).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("{}: no such lock", key),
    }
    Ok(())
}

pub async fn abort(configuration: &Configuration, key: &str) -> anyhow::Result<()> {
    let manager = open_manager(configuration).await?;
    let result = manager.abort(key).await;
    manager.destroy().await?;
    result?;
    println!("{}: abort requested", key);
    Ok(())
}

pub async fn sweep(configuration: &Configuration) -> anyhow::Result<()> {
    let store = open_store(configuration).await?;
    let janitor = LockJanitor::new(store, configuration.lock_config()?.stale_threshold());
    let swept = janitor.run_once().await?;
    info!(swept = swept.len(), "Sweep finished");
    println!("freed {} stale lock(s)", swept.len());
    Ok(())
}

pub async fn clear(configuration: &Configuration) -> anyhow::Result<()> {
    let manager = open_manager(configuration).await?;
    let result = manager.clear().await;
    manager.destroy().await?;
    result?;
    println!("freed every lock owned by {}", manager.node_id());
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn render_table(records: &[LockRecord], now: i64) -> String {
    if records.is_empty() {
        return "no locks held\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<32} {:<8} {:<24} {:<16} {:<23} {}",
        "KEY", "STATUS", "OWNER", "THREAD", "LOCKED AT", "EXPIRES IN"
    );
    for record in records {
        let expires_in = if record.is_expired_at(now) {
            "expired".to_string()
        } else {
            format!("{}ms", record.expiration_time - now)
        };
        let _ = writeln!(
            out,
            "{:<32} {:<8} {:<24} {:<16} {:<23} {}",
            record.key,
            record.status.as_str(),
            record.owner.as_deref().unwrap_or("-"),
            record.thread.as_deref().unwrap_or("-"),
            format_timestamp(record.lock_time),
            expires_in
        );
    }
    out
}
