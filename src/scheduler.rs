//! Independent polling cadences.

use std::time::Duration;

use bon::Builder;
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::{
    client::Client,
    decoder::Decoder,
    heartbeat,
    prelude::*,
    protocol::Command,
    sink::Sink,
    transport::Connector,
};

/// Command and the topic its record goes to.
pub struct Job {
    pub command: Command,
    pub topic: String,
}

/// Commands polled together at one interval.
#[derive(Builder)]
pub struct Bucket {
    #[builder(into)]
    name: String,

    interval: Duration,
    jobs: Vec<Job>,

    /// Sent after a run in which every job succeeded.
    #[builder(default)]
    heartbeat: heartbeat::Client,

    #[builder(skip)]
    last_run_at: Option<Instant>,
}

impl Bucket {
    fn is_due(&self, now: Instant) -> bool {
        self.last_run_at.is_none_or(|last_run_at| now.duration_since(last_run_at) >= self.interval)
    }
}

/// Execute, decode, and publish.
pub struct Pipeline<C, S> {
    client: Client<C>,
    decoder: Decoder,
    sink: S,
}

impl<C: Connector, S: Sink> Pipeline<C, S> {
    pub const fn new(client: Client<C>, decoder: Decoder, sink: S) -> Self {
        Self { client, decoder, sink }
    }

    #[instrument(skip_all, fields(command = %job.command.name))]
    async fn run(&mut self, job: &Job) -> Result {
        let payload = self.client.execute(&job.command).await?;
        let record = self.decoder.decode(&job.command, &payload)?;
        let payload = serde_json::to_string(&record)?;
        self.sink
            .publish(&job.topic, payload, true)
            .await
            .with_context(|| format!("failed to publish to `{}`", job.topic))?;
        Ok(())
    }
}

#[derive(Builder)]
pub struct Scheduler<C, S> {
    pipeline: Pipeline<C, S>,
    buckets: Vec<Bucket>,

    #[builder(default = Duration::from_millis(100))]
    tick: Duration,
}

impl<C: Connector, S: Sink> Scheduler<C, S> {
    /// Poll forever.
    pub async fn run(mut self) {
        info!(n_buckets = self.buckets.len(), tick = ?self.tick, "running…");
        let mut interval = interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.run_due(Instant::now()).await;
        }
    }

    /// Run every bucket whose interval has elapsed, returns the number of buckets run.
    pub async fn run_due(&mut self, now: Instant) -> usize {
        let mut n_run = 0;
        for bucket in &mut self.buckets {
            if bucket.is_due(now) {
                bucket.last_run_at = Some(now);
                run_bucket(&mut self.pipeline, bucket).await;
                n_run += 1;
            }
        }
        n_run
    }
}

/// Run the jobs one by one, a failed job does not affect the others.
#[instrument(skip_all, fields(bucket = %bucket.name))]
async fn run_bucket<C: Connector, S: Sink>(pipeline: &mut Pipeline<C, S>, bucket: &Bucket) {
    let mut n_failed = 0_usize;
    for job in &bucket.jobs {
        if let Err(error) = pipeline.run(job).await {
            warn!(command = %job.command.name, "job failed: {error:#}");
            n_failed += 1;
        }
    }
    debug!(n_jobs = bucket.jobs.len(), n_failed, "done");
    if n_failed == 0 {
        bucket.heartbeat.send().await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        decoder::SchemaBook,
        protocol::Query,
        sink::{render_topic, testing::RecordingSink},
        transport::testing::Simulator,
    };

    const QPIGS: &[u8] = b"(230.0 49.9 230.0 49.9 0322 0254 006 365 52.40 005 062 0041 02.1 305.3 00.00 00000 00010110 00 00 00640 010\r";

    fn scheduler(
        simulator: &Simulator,
        sink: &RecordingSink,
        buckets: Vec<Bucket>,
    ) -> Scheduler<Simulator, RecordingSink> {
        let client = Client::builder()
            .connector(simulator.clone())
            .read_timeout(Duration::from_millis(30))
            .backoff(Duration::from_millis(1))
            .build();
        Scheduler::builder()
            .pipeline(Pipeline::new(client, Decoder::default(), sink.clone()))
            .buckets(buckets)
            .build()
    }

    fn job(book: &SchemaBook, query: Query, topic: &str) -> Job {
        Job { command: book.command(query), topic: topic.to_owned() }
    }

    #[tokio::test]
    async fn failed_job_does_not_stop_siblings() {
        let book = SchemaBook::default();
        let simulator = Simulator::new()
            .respond("QPIGS", b"(230.0 49.9 230.0\r")
            .respond("QPIGS2", b"(03.1 250.0 0775\r");
        let sink = RecordingSink::default();
        let bucket = Bucket::builder()
            .name("fast")
            .interval(Duration::from_secs(2))
            .jobs(vec![
                job(&book, Query::Telemetry, "telemetry"),
                job(&book, Query::ExpandedTelemetry, "expanded"),
            ])
            .build();
        let mut scheduler = scheduler(&simulator, &sink, vec![bucket]);

        assert_eq!(scheduler.run_due(Instant::now()).await, 1);

        let publications = sink.publications();
        assert_eq!(publications.len(), 1);
        assert_eq!(publications[0].topic, "expanded");
        assert_eq!(
            publications[0].payload,
            r#"{"Pv2InputCurrent":3.1,"Pv2InputVoltage":250.0,"Pv2InputPower":775}"#,
        );
        assert!(publications[0].retain);
    }

    #[tokio::test]
    async fn silent_command_does_not_stop_other_buckets() {
        let book = SchemaBook::default();
        let simulator = Simulator::new().respond("QPI", b"(PI30\r");
        let sink = RecordingSink::default();
        let buckets = vec![
            Bucket::builder()
                .name("settings")
                .interval(Duration::from_secs(600))
                .jobs(vec![job(&book, Query::Settings, "settings")])
                .build(),
            Bucket::builder()
                .name("health")
                .interval(Duration::from_secs(20))
                .jobs(vec![job(&book, Query::ProtocolId, "health")])
                .build(),
        ];
        let mut scheduler = scheduler(&simulator, &sink, buckets);

        assert_eq!(scheduler.run_due(Instant::now()).await, 2);

        // Three attempts, each going through all the write strategies.
        assert_eq!(simulator.requests().iter().filter(|command| *command == "QPIRI").count(), 9);
        let publications = sink.publications();
        assert_eq!(publications.len(), 1);
        assert_eq!(publications[0].payload, r#"{"ProtocolId":"PI30"}"#);
    }

    #[tokio::test]
    async fn buckets_run_on_their_own_intervals() {
        let book = SchemaBook::default();
        let simulator =
            Simulator::new().respond("QPI", b"(PI30\r").respond("QVFW", b"(VERFW:00072.70\r");
        let sink = RecordingSink::default();
        let buckets = vec![
            Bucket::builder()
                .name("fast")
                .interval(Duration::from_secs(2))
                .jobs(vec![job(&book, Query::ProtocolId, "fast")])
                .build(),
            Bucket::builder()
                .name("health")
                .interval(Duration::from_secs(20))
                .jobs(vec![job(&book, Query::Firmware, "health")])
                .build(),
        ];
        let mut scheduler = scheduler(&simulator, &sink, buckets);
        let start = Instant::now();

        assert_eq!(scheduler.run_due(start).await, 2);
        assert_eq!(scheduler.run_due(start + Duration::from_secs(1)).await, 0);
        assert_eq!(scheduler.run_due(start + Duration::from_secs(2)).await, 1);
        assert_eq!(scheduler.run_due(start + Duration::from_secs(21)).await, 2);

        let topics = sink.publications().into_iter().map(|publication| publication.topic);
        assert_eq!(topics.collect::<Vec<_>>(), ["fast", "health", "fast", "fast", "health"]);
    }

    #[tokio::test]
    async fn telemetry_end_to_end() -> Result {
        let book = SchemaBook::default();
        let simulator = Simulator::new().respond("QPIGS", QPIGS);
        let sink = RecordingSink::default();
        let bucket = Bucket::builder()
            .name("fast")
            .interval(Duration::from_secs(2))
            .jobs(vec![Job {
                command: book.command(Query::Telemetry),
                topic: render_topic("axpert/{sn}", "92932004102443", "QPIGS", None),
            }])
            .build();
        let mut scheduler = scheduler(&simulator, &sink, vec![bucket]);

        scheduler.run_due(Instant::now()).await;

        let publications = sink.publications();
        assert_eq!(publications.len(), 1);
        assert_eq!(publications[0].topic, "axpert/92932004102443");
        let record: Value = serde_json::from_str(&publications[0].payload)?;
        assert_eq!(
            record,
            json!({
                "GridVoltage": 230.0,
                "GridFrequency": 49.9,
                "AcOutputVoltage": 230.0,
                "AcOutputFrequency": 49.9,
                "AcOutputApparentPower": 322,
                "AcOutputActivePower": 254,
                "OutputLoadPercent": 6,
                "BusVoltage": 365,
                "BatteryVoltage": 52.4,
                "BatteryChargingCurrent": 5,
                "BatteryCapacity": 62,
                "InverterHeatsinkTemperature": 41,
                "PvInputCurrent": 2.1,
                "PvInputVoltage": 305.3,
                "BatteryVoltageFromScc": 0.0,
                "BatteryDischargeCurrent": 0,
                "DeviceStatus": "00010110",
                "PvInputPower": 640,
            }),
        );
        Ok(())
    }
}
