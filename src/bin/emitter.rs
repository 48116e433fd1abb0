use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use telemetry_emitter::{
    aggregator::{JsonSerializer, MetricAggregator},
    config::{ConfigurationManager, EmitterConfig, read_config_file},
    dispatcher::PublishDispatcher,
    emitter::TelemetryEmitter,
    monitors::{RuntimeMetricsSource, SystemMetricsSource},
    publishers::{
        BroadcastBus, BrokerClient, LocalMessage, MqttPublisher, OfflineBroker, PubSubPublisher,
        RumqttBroker,
    },
    util::get_core_device_name,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (re-read on SIGHUP)
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_target("telemetry_emitter", LevelFilter::DEBUG);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let bus = Arc::new(BroadcastBus::new(config.local_channel_capacity));
    tokio::spawn(log_local_messages(bus.subscribe()));

    // broker settings are only read at startup
    let rumqtt = config
        .mqtt
        .as_ref()
        .map(|mqtt| RumqttBroker::connect(mqtt, get_core_device_name().as_deref()));
    let broker: Arc<dyn BrokerClient> = match &rumqtt {
        Some((broker, _)) => Arc::new(broker.clone()),
        None => {
            info!("no broker configured, broker publishing disabled");
            Arc::new(OfflineBroker)
        }
    };

    let emitter = TelemetryEmitter::with_pipeline(
        Arc::new(ConfigurationManager::default()),
        MetricAggregator::new(
            Arc::new(SystemMetricsSource::new()),
            Arc::new(RuntimeMetricsSource::new()),
        ),
        Arc::new(JsonSerializer),
        PublishDispatcher::new(
            Arc::new(PubSubPublisher::new(bus)),
            Arc::new(MqttPublisher::new(broker)),
        ),
    );

    apply(&emitter, &config);
    emitter.start().await;
    info!("telemetry emitter started");

    let mut reload = ReloadSignal::new()?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            _ = reload.recv() => {
                debug!("reloading {}", args.file);
                match read_config_file(&args.file) {
                    Ok(config) => apply(&emitter, &config),
                    Err(e) => error!("failed to reload configuration: {e:#}"),
                }
            }
        }
    }

    emitter.stop().await;
    if let Some((broker, driver)) = rumqtt {
        broker.disconnect().await;
        driver.abort();
    }

    info!("telemetry emitter stopped");
    Ok(())
}

fn apply(emitter: &TelemetryEmitter, config: &EmitterConfig) {
    let outcome = emitter.apply_update(&config.configuration);
    if !outcome.rejected.is_empty() {
        warn!("{} configuration option(s) rejected", outcome.rejected.len());
    }
    info!("active configuration: {:?}", outcome.snapshot);
}

async fn log_local_messages(mut rx: broadcast::Receiver<LocalMessage>) {
    loop {
        match rx.recv().await {
            Ok(message) => debug!(
                "local telemetry on {} ({} bytes)",
                message.topic,
                message.payload.len()
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("local subscriber lagged, skipped {skipped} messages");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(unix)]
struct ReloadSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ReloadSignal {
    fn new() -> anyhow::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
        Ok(Self(hangup))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    fn new() -> anyhow::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
