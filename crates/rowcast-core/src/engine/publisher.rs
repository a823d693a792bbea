//! Main publish loop.
//!
//! Pulls one row at a time from the source and hands it to the dispatcher.
//! The shutdown signal races only the query open and each pull; a row that
//! has been pulled is always dispatched to a terminal outcome.

use crate::config::Config;
use crate::dispatch::{DeliveryOutcome, Dispatcher};
use crate::health::{HealthCheck, SINK_COMPONENT, SOURCE_COMPONENT};
use crate::metrics::{ErrorType, PublishMetrics};
use crate::sink::{EventSink, HttpSink};
use crate::source::{PostgresSource, Query, RowSource};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, trace, warn, Level};

/// Counts for one publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_read: u64,
    /// Rows skipped because they could not be read
    pub row_errors: u64,
    pub delivered: u64,
    pub undelivered: u64,
    pub rejected: u64,
    /// The run stopped on a shutdown signal before the end of the stream
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Envelopes that reached a terminal outcome.
    pub fn envelopes(&self) -> u64 {
        self.delivered + self.undelivered + self.rejected
    }
}

/// Query-to-event publisher.
pub struct Publisher {
    query: Query,
    source: Arc<dyn RowSource>,
    dispatcher: Dispatcher,
    metrics: Arc<PublishMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: broadcast::Sender<()>,
    // Subscribed at construction so a signal sent before `run` is not lost.
    shutdown_rx: broadcast::Receiver<()>,
}

impl Publisher {
    /// Validate the configuration, connect to PostgreSQL and build the HTTP sink.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let sink: Arc<dyn EventSink> = Arc::new(HttpSink::new(&config.sink)?);
        let source = PostgresSource::connect(&config.source).await?;

        let publisher = Self::from_parts(&config, Arc::new(source), sink);
        publisher.health.mark_healthy(SOURCE_COMPONENT);
        Ok(publisher)
    }

    /// Assemble a publisher from an existing source and sink.
    ///
    /// The configuration is not validated; only the source query, event,
    /// retry and sink timeout settings are read.
    pub fn from_parts(
        config: &Config,
        source: Arc<dyn RowSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let metrics = Arc::new(PublishMetrics::new());
        let dispatcher = Dispatcher::from_config(config, sink, Arc::clone(&metrics));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        Self {
            query: Query::new(config.source.query.clone()).with_params(config.source.params.clone()),
            source,
            dispatcher,
            metrics,
            health: Arc::new(HealthCheck::for_publisher()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Run the query to the end of its stream, or until shutdown.
    ///
    /// Returns an error only for faults that end the run: the query failing,
    /// the connection closing mid-stream, or a row that cannot be encoded.
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.health.job_started();
        self.metrics.set_run_active(true);

        let started = Instant::now();
        let result = self.run_inner().await;

        self.health.job_completed();
        self.metrics.set_run_active(false);

        let mut summary = result?;
        summary.elapsed = started.elapsed();

        info!(
            rows_read = summary.rows_read,
            row_errors = summary.row_errors,
            delivered = summary.delivered,
            undelivered = summary.undelivered,
            rejected = summary.rejected,
            interrupted = summary.interrupted,
            duration_ms = summary.elapsed.as_millis() as u64,
            "Publish run finished"
        );
        Ok(summary)
    }

    async fn run_inner(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        info!(
            source = self.source.name(),
            params = self.query.params.len(),
            event_type = %self.dispatcher.identity().event_type,
            "Publish run started"
        );

        let opened = tokio::select! {
            biased;
            _ = self.shutdown_rx.recv() => {
                info!("Shutdown signal received before the query was opened");
                summary.interrupted = true;
                return Ok(summary);
            }
            opened = self.source.open(&self.query) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => {
                self.health.mark_healthy(SOURCE_COMPONENT);
                stream
            }
            Err(e) => {
                error!(error = %e, "Query could not be executed");
                self.health
                    .mark_unhealthy(SOURCE_COMPONENT, &format!("Query failed: {}", e));
                self.metrics.record_error(ErrorType::Source);
                return Err(e);
            }
        };

        let mut row_index: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!(rows_read = summary.rows_read, "Shutdown signal received, no further rows pulled");
                    summary.interrupted = true;
                    break;
                }
                next = stream.next_row() => next,
            };

            match next {
                Ok(Some(row)) => {
                    row_index += 1;
                    summary.rows_read += 1;
                    self.metrics.record_row();

                    let span = info_span!(
                        "row",
                        index = row_index,
                        event_type = %self.dispatcher.identity().event_type
                    );
                    debug!(parent: &span, columns = row.len(), "Row pulled");
                    if tracing::enabled!(Level::TRACE) {
                        if let Ok(json) = row.to_json_value() {
                            trace!(parent: &span, row = %json, "Row contents");
                        }
                    }

                    let report = match self.dispatcher.dispatch(&row, &span).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(parent: &span, error = %e, "Row could not be encoded, stopping run");
                            self.metrics.record_error(ErrorType::Serialization);
                            return Err(e);
                        }
                    };

                    match &report.outcome {
                        DeliveryOutcome::Delivered => {
                            summary.delivered += 1;
                            self.health.mark_healthy(SINK_COMPONENT);
                        }
                        DeliveryOutcome::Rejected { .. } => {
                            summary.rejected += 1;
                            self.health.mark_healthy(SINK_COMPONENT);
                        }
                        DeliveryOutcome::Undelivered { reason } => {
                            summary.undelivered += 1;
                            self.health.mark_degraded(
                                SINK_COMPONENT,
                                &format!("Event {} undelivered: {}", report.event_id, reason),
                            );
                        }
                    }
                }
                Ok(None) => {
                    debug!(rows_read = summary.rows_read, "End of stream");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    summary.row_errors += 1;
                    self.metrics.record_error(ErrorType::RowRead);
                    error!(position = row_index + 1, error = %e, "Row read failed, skipping row");
                }
                Err(e) => {
                    error!(error = %e, "Row stream failed");
                    self.health
                        .mark_unhealthy(SOURCE_COMPONENT, &format!("Stream failed: {}", e));
                    self.metrics.record_error(ErrorType::Source);
                    return Err(e);
                }
            }
        }

        if summary.undelivered > 0 {
            warn!(
                undelivered = summary.undelivered,
                "Some events were not acknowledged by the sink"
            );
        }

        Ok(summary)
    }

    /// Get metrics.
    pub fn metrics(&self) -> Arc<PublishMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Get health check.
    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.health)
    }

    /// Get shutdown signal sender.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// The query this publisher runs.
    pub fn query(&self) -> &Query {
        &self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventEnvelope;
    use crate::row::Row;
    use crate::sink::Acknowledgement;
    use crate::source::{MemorySource, ScriptedRow};
    use crate::{Error, SinkError, SourceError};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Accept,
        Refuse,
        Unreachable,
    }

    struct RecordingSink {
        behaviour: Behaviour,
        latency: Duration,
        received: Mutex<Vec<EventEnvelope>>,
    }

    impl RecordingSink {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Self::slow(behaviour, Duration::ZERO)
        }

        fn slow(behaviour: Behaviour, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                latency,
                received: Mutex::new(Vec::new()),
            })
        }

        fn payloads(&self) -> Vec<serde_json::Value> {
            self.received
                .lock()
                .iter()
                .map(|e| e.decode_data().unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(
            &self,
            envelope: &EventEnvelope,
        ) -> std::result::Result<Acknowledgement, SinkError> {
            self.received.lock().push(envelope.clone());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match self.behaviour {
                Behaviour::Accept => Ok(Acknowledgement::Accepted { status: 200 }),
                Behaviour::Refuse => Ok(Acknowledgement::Rejected {
                    status: 422,
                    reason: "unprocessable".into(),
                }),
                Behaviour::Unreachable => Err(SinkError::Transport {
                    endpoint: "recording".into(),
                    message: "connection refused".into(),
                }),
            }
        }

        fn endpoint(&self) -> &str {
            "recording"
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.source.query = "SELECT a FROM t".into();
        config.event.event_type = "dev.rowcast.row".into();
        config.event.event_source = "rowcast/tests".into();
        config.retry.initial_delay_ms = 1;
        config
    }

    fn rows(n: i64) -> Vec<Row> {
        (1..=n).map(|a| Row::new().with("a", a)).collect()
    }

    #[tokio::test]
    async fn test_every_row_is_delivered_in_order() {
        let source = Arc::new(MemorySource::new(rows(3)));
        let sink = RecordingSink::new(Behaviour::Accept);
        let mut publisher = Publisher::from_parts(&config(), source.clone(), sink.clone());

        let summary = publisher.run().await.unwrap();

        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.delivered, 3);
        assert_eq!(summary.envelopes(), 3);
        assert!(!summary.interrupted);
        assert_eq!(
            sink.payloads(),
            vec![
                serde_json::json!({"a": 1}),
                serde_json::json!({"a": 2}),
                serde_json::json!({"a": 3}),
            ]
        );
        assert_eq!(source.last_query(), Some(Query::new("SELECT a FROM t")));

        let metrics = publisher.metrics();
        assert_eq!(metrics.rows_read_total(), 3);
        assert_eq!(metrics.delivered_total(), 3);
        assert!(!metrics.run_active());
    }

    #[tokio::test]
    async fn test_unreachable_sink_does_not_fail_run() {
        let source = Arc::new(MemorySource::new(rows(1)));
        let sink = RecordingSink::new(Behaviour::Unreachable);
        let mut publisher = Publisher::from_parts(&config(), source, sink.clone());

        let summary = publisher.run().await.unwrap();

        assert_eq!(summary.undelivered, 1);
        assert_eq!(summary.delivered, 0);
        assert_eq!(sink.received.lock().len(), 3);
        assert!(matches!(
            publisher.health().get_component_status(SINK_COMPONENT),
            Some(crate::health::ComponentStatus::Degraded(_))
        ));
    }

    #[tokio::test]
    async fn test_rejections_are_counted_and_run_continues() {
        let source = Arc::new(MemorySource::new(rows(2)));
        let sink = RecordingSink::new(Behaviour::Refuse);
        let mut publisher = Publisher::from_parts(&config(), source, sink.clone());

        let summary = publisher.run().await.unwrap();

        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.undelivered, 0);
        assert_eq!(sink.received.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_query_failure_fails_run_without_envelopes() {
        let source = Arc::new(MemorySource::failing("relation \"t\" does not exist"));
        let sink = RecordingSink::new(Behaviour::Accept);
        let mut publisher = Publisher::from_parts(&config(), source.clone(), sink.clone());

        let result = publisher.run().await;

        assert!(matches!(
            result,
            Err(Error::Source(SourceError::QueryExecution(_)))
        ));
        assert_eq!(sink.received.lock().len(), 0);
        assert_eq!(source.pulls(), 0);
        assert_eq!(publisher.metrics().envelopes_built_total(), 0);
        assert!(!publisher.health().is_operational());
    }

    #[tokio::test]
    async fn test_no_pulls_after_end_of_stream() {
        let source = Arc::new(MemorySource::new(rows(3)));
        let sink = RecordingSink::new(Behaviour::Accept);
        let mut publisher = Publisher::from_parts(&config(), source.clone(), sink);

        publisher.run().await.unwrap();

        // Three rows plus the pull that returned end of stream.
        assert_eq!(source.pulls(), 4);
        assert_eq!(source.opens(), 1);
    }

    #[tokio::test]
    async fn test_row_read_errors_are_skipped() {
        let source = Arc::new(MemorySource::scripted(vec![
            Row::new().with("a", 1).into(),
            ScriptedRow::ReadError("column b: invalid byte sequence".into()),
            Row::new().with("a", 3).into(),
        ]));
        let sink = RecordingSink::new(Behaviour::Accept);
        let mut publisher = Publisher::from_parts(&config(), source, sink.clone());

        let summary = publisher.run().await.unwrap();

        assert_eq!(summary.rows_read, 2);
        assert_eq!(summary.row_errors, 1);
        assert_eq!(summary.delivered, 2);
        assert_eq!(
            sink.payloads(),
            vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 3})]
        );
        assert_eq!(publisher.metrics().errors_by_type(ErrorType::RowRead), 1);
    }

    #[tokio::test]
    async fn test_query_aborted_mid_stream_fails_run() {
        let source = Arc::new(MemorySource::scripted(vec![
            Row::new().with("v", 5).into(),
            Row::new().with("v", 10).into(),
            ScriptedRow::QueryError("division by zero (22012)".into()),
            Row::new().with("v", -10).into(),
        ]));
        let sink = RecordingSink::new(Behaviour::Accept);
        let mut publisher = Publisher::from_parts(&config(), source.clone(), sink.clone());

        let result = publisher.run().await;

        assert!(matches!(
            result,
            Err(Error::Source(SourceError::QueryExecution(_)))
        ));
        assert_eq!(sink.received.lock().len(), 2);
        assert_eq!(source.pulls(), 3);
        assert_eq!(publisher.metrics().errors_by_type(ErrorType::Source), 1);
        assert_eq!(publisher.metrics().errors_by_type(ErrorType::RowRead), 0);
        assert!(!publisher.health().is_operational());
    }

    #[tokio::test]
    async fn test_unencodable_row_stops_run() {
        let source = Arc::new(MemorySource::new(vec![
            Row::new().with("a", 1),
            Row::new().with("ratio", f64::NAN),
            Row::new().with("a", 3),
        ]));
        let sink = RecordingSink::new(Behaviour::Accept);
        let mut publisher = Publisher::from_parts(&config(), source.clone(), sink.clone());

        let result = publisher.run().await;

        assert!(matches!(result, Err(Error::Serialization(_))));
        assert_eq!(sink.received.lock().len(), 1);
        assert_eq!(source.pulls(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_skips_query() {
        let source = Arc::new(MemorySource::new(rows(3)));
        let sink = RecordingSink::new(Behaviour::Accept);
        let mut publisher = Publisher::from_parts(&config(), source.clone(), sink);

        publisher.shutdown_signal().send(()).unwrap();
        let summary = publisher.run().await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(source.opens(), 0);
        assert_eq!(summary.rows_read, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_pulls_but_finishes_delivery() {
        let source = Arc::new(MemorySource::new(rows(10)));
        let sink = RecordingSink::slow(Behaviour::Accept, Duration::from_millis(50));
        let mut publisher = Publisher::from_parts(&config(), source.clone(), sink.clone());

        let shutdown = publisher.shutdown_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = shutdown.send(());
        });

        let summary = publisher.run().await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.rows_read, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(source.pulls(), 1);
    }
}
