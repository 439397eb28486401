use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sensor_views::{
    BatchDispatcher, DeviceView, FeedConfig, GlobalView, InMemoryChangeFeed,
    InMemoryDocumentStore, ProcessorConfig, SensorRange, SensorSimulator, StoreConfig,
    ViewMaintenanceWorker, ViewsExt, GLOBAL_VIEW_ID,
};

const DRAIN_POLLS: usize = 30;

/// Simulate sensors and maintain device and global views in memory.
#[derive(Parser, Debug)]
#[command(name = "sensor-views", version)]
struct Cli {
    /// Sensors to simulate: "M" for 1..=M, or "N-M".
    sensors: SensorRange,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Override the feed poll delay (milliseconds).
    #[arg(long)]
    poll_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store_config = StoreConfig::from_env().context("loading store config")?;
    let mut feed_config = FeedConfig::from_env().context("loading feed config")?;
    let processor_config = ProcessorConfig::from_env().context("loading processor config")?;
    if let Some(ms) = cli.poll_delay_ms {
        feed_config.poll_delay = Duration::from_millis(ms.max(1));
    }

    info!(
        database = %store_config.database,
        views = %store_config.view_collection,
        source = %feed_config.raw_collection,
        sensors = cli.sensors.len(),
        "starting"
    );

    let store = InMemoryDocumentStore::with_config(store_config);
    let feed = InMemoryChangeFeed::new();

    let dispatcher = BatchDispatcher::from_config(store.clone(), &processor_config);
    let worker = ViewMaintenanceWorker::new(feed.clone(), dispatcher, feed_config.max_batch_size)
        .spawn(feed_config.poll_delay);

    let (stop_tx, stop_rx) = watch::channel(false);
    let simulator = SensorSimulator::new(feed.clone());
    let sensors = cli.sensors;
    let producer = tokio::spawn(async move { simulator.run_range(sensors, stop_rx).await });

    match cli.duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?,
    }

    info!("stopping simulator");
    stop_tx.send(true).ok();
    let produced = producer.await.context("simulator task")??;

    let drained = feed
        .wait_until_drained(feed_config.poll_delay, DRAIN_POLLS)
        .await;
    let stats = worker.stop().await;
    if !drained {
        warn!(pending = feed.pending(), "stopped before the feed was drained");
    }

    info!(
        written = produced.written,
        dropped = produced.dropped,
        batches = stats.batches_acknowledged,
        failed_batches = stats.batches_failed,
        readings = stats.readings_processed,
        "stopped"
    );

    for sensor in sensors.sensors() {
        let device_id = sensor_views::simulator::device_id(sensor);
        if let Some(view) = store.views::<DeviceView>().get(&device_id, &device_id).await?.value {
            info!(
                device_id = %device_id,
                aggregation_sum = view.data.aggregation_sum,
                last_value = view.data.last_value,
                "device view"
            );
        }
    }
    if let Some(global) = store
        .views::<GlobalView>()
        .get(GLOBAL_VIEW_ID, GLOBAL_VIEW_ID)
        .await?
        .value
    {
        info!(devices = global.data.device_summary.len(), summary = ?global.data.device_summary, "global view");
    }

    Ok(())
}
