// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reactive Streams Tour
//!
//! Runs a handful of small pipelines end to end and prints a JSON summary
//! of what each produced:
//! - cold operators on synchronous sources
//! - time operators on virtual time
//! - a hot source shared between subscribers
//! - a flowable consumed as an async stream
//! - a demand channel with a slow async consumer
//!
//! Run with: cargo run --bin rx-tour
//!
//! Configuration comes from `CIM_RX_*` environment variables, see
//! `RuntimeConfig::from_env`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use cim_reactive::prelude::*;
use futures::TryStreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Slow consumer for the demand channel demo
struct SlowSummer {
    total: AtomicU64,
}

#[async_trait]
impl DemandHandler<u64> for SlowSummer {
    async fn handle(&self, item: u64) -> StreamResult<()> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.total.fetch_add(item, Ordering::Relaxed);
        debug!(item, "handled");
        Ok(())
    }
}

fn cold_operators() -> Result<serde_json::Value> {
    let squares = Observable::range(1, 10)
        .filter(|n| n % 2 == 1)
        .map(|n| n * n)
        .blocking_collect()
        .context("square pipeline failed")?;

    let groups = Observable::range(1, 7)
        .buffer(3)
        .blocking_collect()
        .context("buffer pipeline failed")?;

    let zipped = Observable::range(1, 3)
        .zip_with(Observable::from_iter(vec!["a", "b", "c", "d"]), |n, s| {
            format!("{n}{s}")
        })
        .blocking_collect()
        .context("zip pipeline failed")?;

    Ok(json!({
        "odd_squares": squares,
        "groups_of_three": groups,
        "zipped": zipped,
    }))
}

fn virtual_time() -> Result<serde_json::Value> {
    let scheduler = VirtualTimeScheduler::new();
    let ticks = Observable::interval(Duration::from_secs(10), scheduler.shared())
        .map(|tick| tick * 10)
        .take(5)
        .test();
    let debounced = Subject::publish();
    let quiet = debounced
        .as_observable()
        .debounce(Duration::from_secs(1), scheduler.shared())
        .test();

    for burst in 0..3u64 {
        for n in 0..4 {
            debounced.on_next(burst * 10 + n);
        }
        scheduler.advance_time_by(Duration::from_secs(2));
    }
    debounced.on_complete();
    scheduler.advance_time_by(Duration::from_secs(60));

    info!(now = ?scheduler.now(), "virtual clock advanced");
    Ok(json!({
        "interval_values": ticks.values(),
        "debounced_bursts": quiet.values(),
    }))
}

fn hot_sharing() -> Result<serde_json::Value> {
    let scheduler = VirtualTimeScheduler::new();
    let shared = Observable::interval(Duration::from_secs(1), scheduler.shared())
        .take(6)
        .share();

    let early = shared.test();
    scheduler.advance_time_by(Duration::from_secs(3));
    let late = shared.test();
    scheduler.advance_time_by(Duration::from_secs(3));

    let cached = Observable::range(1, 3).cache();
    let first = cached.blocking_collect()?;
    let second = cached.blocking_collect()?;

    Ok(json!({
        "early_subscriber": early.values(),
        "late_subscriber": late.values(),
        "cache_replays": first == second,
    }))
}

async fn flowable_stream(config: &RuntimeConfig) -> Result<serde_json::Value> {
    let batch = u64::try_from(config.prefetch).context("prefetch does not fit u64")?;
    let values: Vec<i64> = Flowable::range(0, 100)
        .map(|n| n * 2)
        .into_stream(batch)
        .try_collect()
        .await
        .context("flowable stream failed")?;
    Ok(json!({
        "batch": batch,
        "received": values.len(),
        "last": values.last(),
    }))
}

async fn demand_driven() -> Result<serde_json::Value> {
    let (sender, mut receiver) = demand_channel::<u64>();
    let producer = tokio::spawn(async move {
        for n in 1..=50u64 {
            sender.send(n).await?;
        }
        Ok::<_, StreamError>(())
    });

    let handler = SlowSummer {
        total: AtomicU64::new(0),
    };
    let handled = receiver.drive(&handler, 8).await?;
    producer.await.context("producer task panicked")??;

    Ok(json!({
        "handled": handled,
        "total": handler.total.load(Ordering::Relaxed),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("🚀 Starting reactive streams tour");

    let config = RuntimeConfig::from_env().context("invalid CIM_RX_* configuration")?;
    info!("📋 Configuration loaded:");
    info!("  - Buffer size: {}", config.buffer_size);
    info!("  - Prefetch: {}", config.prefetch);
    info!("  - Backpressure: {}", config.backpressure);

    let summary = json!({
        "cold_operators": cold_operators()?,
        "virtual_time": virtual_time()?,
        "hot_sharing": hot_sharing()?,
        "flowable_stream": flowable_stream(&config).await?,
        "demand_channel": demand_driven().await?,
    });

    info!("✅ Tour complete");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
