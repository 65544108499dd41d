use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use tokio::time::sleep;

use crate::{
    cli::{device::DeviceArgs, mqtt::MqttArgs},
    client::Client,
    decoder::{Decoder, SchemaBook},
    heartbeat,
    prelude::*,
    protocol::{Command, Query},
    scheduler::{Bucket, Job, Pipeline, Scheduler},
    sink::render_topic,
    transport::Connector,
};

#[derive(Parser)]
pub struct MonitorArgs {
    #[clap(flatten)]
    pub device: DeviceArgs,

    #[clap(flatten)]
    pub mqtt: MqttArgs,

    #[clap(flatten)]
    pub intervals: IntervalArgs,

    #[clap(flatten)]
    pub topics: TopicArgs,

    /// Parallel unit numbers to poll with `QPGSn`.
    #[clap(long, env = "PARALLEL_UNITS", value_delimiter = ',', default_value = "0")]
    pub parallel_units: Vec<u8>,

    /// Identifier to use in the topics when the inverter does not report its serial number.
    ///
    /// Without it, the monitor keeps asking the inverter until it answers.
    #[clap(long, env = "DEVICE_ID")]
    pub device_id: Option<String>,

    /// URL to POST to after every fully successful health check.
    #[clap(long, env = "HEARTBEAT_URL")]
    pub heartbeat_url: Option<Url>,
}

#[derive(Parser)]
pub struct IntervalArgs {
    /// Live telemetry polling interval.
    #[clap(
        id = "fast_interval",
        long = "fast-interval",
        env = "FAST_INTERVAL",
        default_value = "2s"
    )]
    pub fast: humantime::Duration,

    /// Identity and firmware polling interval.
    #[clap(
        id = "health_interval",
        long = "health-interval",
        env = "HEALTH_INTERVAL",
        default_value = "20s"
    )]
    pub health: humantime::Duration,

    /// Rated information and settings polling interval.
    #[clap(
        id = "settings_interval",
        long = "settings-interval",
        env = "SETTINGS_INTERVAL",
        default_value = "600s"
    )]
    pub settings: humantime::Duration,

    /// Scheduler resolution.
    #[clap(long, env = "TICK", default_value = "100ms")]
    pub tick: humantime::Duration,
}

/// Topic templates.
///
/// `{sn}` is replaced with the device identifier, `{unit}` with the parallel unit number,
/// and `{command}` with the command name.
#[derive(Parser)]
pub struct TopicArgs {
    #[clap(
        id = "topic_telemetry",
        long = "topic-telemetry",
        env = "TOPIC_TELEMETRY",
        default_value = "axpert/{sn}"
    )]
    pub telemetry: String,

    #[clap(
        id = "topic_expanded",
        long = "topic-expanded",
        env = "TOPIC_EXPANDED",
        default_value = "axpert/{sn}_100"
    )]
    pub expanded: String,

    #[clap(
        id = "topic_parallel",
        long = "topic-parallel",
        env = "TOPIC_PARALLEL",
        default_value = "axpert/{sn}/parallel/{unit}"
    )]
    pub parallel: String,

    #[clap(
        id = "topic_settings",
        long = "topic-settings",
        env = "TOPIC_SETTINGS",
        default_value = "axpert/{sn}/settings"
    )]
    pub settings: String,

    /// Every health query publishes a record of its own, so the template should contain `{command}`.
    #[clap(
        id = "topic_health",
        long = "topic-health",
        env = "TOPIC_HEALTH",
        default_value = "axpert/{sn}/health/{command}"
    )]
    pub health: String,
}

impl MonitorArgs {
    const IDENTIFY_RETRY_DELAY: Duration = Duration::from_secs(10);

    pub async fn run(self) -> Result {
        let book = self.device.schema_book()?;
        let mut client = self.device.client();
        let fallback = self.device_id.as_deref();
        let retry_delay = Self::IDENTIFY_RETRY_DELAY;
        let device_id = tokio::select! {
            device_id = identify(&mut client, &book, fallback, retry_delay) => device_id,
            () = crate::shutdown_signal() => {
                info!("shutting down before the inverter got identified…");
                return Ok(());
            },
        };
        info!(%device_id, "identified");

        let buckets = self.buckets(&book, &device_id);
        let sink = self.mqtt.connect();
        let scheduler = Scheduler::builder()
            .pipeline(Pipeline::new(client, Decoder::default(), sink))
            .buckets(buckets)
            .tick(self.intervals.tick.into())
            .build();

        tokio::select! {
            () = scheduler.run() => {},
            () = crate::shutdown_signal() => {
                info!("shutting down…");
            },
        }
        Ok(())
    }

    fn buckets(&self, book: &SchemaBook, device_id: &str) -> Vec<Bucket> {
        let topics = &self.topics;
        let job = |command: Command, template: &str, unit: Option<u8>| {
            let topic = render_topic(template, device_id, &command.name, unit);
            Job { command, topic }
        };

        let mut fast_jobs = self
            .parallel_units
            .iter()
            .map(|&unit| job(book.parallel(unit), &topics.parallel, Some(unit)))
            .collect::<Vec<_>>();
        fast_jobs.push(job(book.command(Query::Telemetry), &topics.telemetry, None));
        fast_jobs.push(job(book.command(Query::ExpandedTelemetry), &topics.expanded, None));

        let health_jobs = [Query::Identity, Query::ProtocolId, Query::Firmware]
            .into_iter()
            .map(|query| job(book.command(query), &topics.health, None))
            .collect();

        vec![
            Bucket::builder()
                .name("fast")
                .interval(self.intervals.fast.into())
                .jobs(fast_jobs)
                .build(),
            Bucket::builder()
                .name("health")
                .interval(self.intervals.health.into())
                .jobs(health_jobs)
                .heartbeat(heartbeat::Client::new(self.heartbeat_url.clone()))
                .build(),
            Bucket::builder()
                .name("settings")
                .interval(self.intervals.settings.into())
                .jobs(vec![job(book.command(Query::Settings), &topics.settings, None)])
                .build(),
        ]
    }
}

/// Ask the inverter for its serial number.
///
/// Falls back to the configured identifier on the first failure, or keeps asking if there is none.
async fn identify<C: Connector>(
    client: &mut Client<C>,
    book: &SchemaBook,
    fallback: Option<&str>,
    retry_delay: Duration,
) -> String {
    let command = book.command(Query::Identity);
    loop {
        let error = match client.execute(&command).await {
            Ok(payload) if !payload.trim().is_empty() => return payload.trim().to_owned(),
            Ok(_) => anyhow::anyhow!("the inverter reported an empty serial number"),
            Err(error) => Error::new(error).context("failed to identify the inverter"),
        };
        if let Some(fallback) = fallback {
            warn!(fallback, "{error:#}");
            return fallback.to_owned();
        }
        warn!(?retry_delay, "{error:#}, retrying…");
        sleep(retry_delay).await;
    }
}
