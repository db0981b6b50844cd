use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde_json::Value;
use shared_event_bus::{EventKind, EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::{runtime::Runtime, task::JoinHandle};

/// Telemetry builder for the behavior layer.
pub struct BehaviorTelemetryBuilder {
    component: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl BehaviorTelemetryBuilder {
    /// Creates a new builder scoped to a component label.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            log_path: None,
            min_level: LogLevel::Info,
            event_publisher: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<BehaviorTelemetry> {
        BehaviorTelemetry::new(
            self.component,
            self.log_path,
            self.min_level,
            self.event_publisher,
        )
    }
}

/// Telemetry handle shared by the controller and the tick driver.
#[derive(Clone)]
pub struct BehaviorTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for BehaviorTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorTelemetry")
            .field("component", &self.inner.component)
            .field("logs", &self.inner.logger.is_some())
            .field("events", &self.inner.event.is_some())
            .finish()
    }
}

struct TelemetryInner {
    component: String,
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    publisher: Arc<dyn EventPublisher>,
    // Most recent publish task; each task waits for its predecessor.
    last: Mutex<Option<JoinHandle<()>>>,
}

impl EventHandle {
    fn publish(&self, record: EventRecord) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            let publisher = Arc::clone(&self.publisher);
            let mut last = self.last.lock();
            let previous = last.take();
            *last = Some(tokio::spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                let _ = publisher.publish(record).await;
            }));
            Ok(())
        } else {
            Runtime::new()?.block_on(self.publisher.publish(record))
        }
    }

    async fn flush(&self) {
        let last = self.last.lock().take();
        if let Some(task) = last {
            let _ = task.await;
        }
    }
}

impl BehaviorTelemetry {
    fn new(
        component: impl Into<String>,
        log_path: Option<PathBuf>,
        min_level: LogLevel,
        event_publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Result<Self> {
        let logger = if let Some(path) = log_path {
            Some(JsonLogger::with_min_level(path, min_level)?)
        } else {
            None
        };
        let event = event_publisher.map(|publisher| EventHandle {
            publisher,
            last: Mutex::new(None),
        });
        Ok(Self {
            inner: Arc::new(TelemetryInner {
                component: component.into(),
                logger,
                event,
            }),
        })
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> BehaviorTelemetryBuilder {
        BehaviorTelemetryBuilder::new(component)
    }

    /// Telemetry that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                component: "turret".into(),
                logger: None,
                event: None,
            }),
        }
    }

    /// Logs a record tagged with the control-loop tick.
    pub fn log(&self, level: LogLevel, tick: u64, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let mut record = LogRecord::new(&self.inner.component, level, message).at_tick(tick);
            match metadata {
                Value::Object(map) => record.metadata = map,
                Value::Null => {}
                other => record = record.with_field("value", other),
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event.
    pub fn event(&self, kind: EventKind, tick: u64, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord::new(
                self.inner.component.clone(),
                kind,
                tick,
                payload,
            ))?;
        }
        Ok(())
    }

    /// Waits until every event emitted so far has been handed to the
    /// publisher, in emission order.
    pub async fn flush(&self) {
        if let Some(handle) = &self.inner.event {
            handle.flush().await;
        }
    }
}

/// Generates a random seed for runs without a configured one.
#[must_use]
pub fn random_seed() -> u64 {
    rand::thread_rng().gen()
}

/// Returns a reproducible RNG.
#[must_use]
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::{FileEventPublisher, MemoryEventBus};
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(4));
        let log_path = tmp.path().join("behavior.log");
        let telemetry = BehaviorTelemetry::builder("behavior")
            .log_path(&log_path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, 12, "behavior.outer", json!({ "to": "wobbly" }))
            .unwrap();
        telemetry
            .event(EventKind::StateChanged, 12, json!({ "to": "wobbly" }))
            .unwrap();
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("behavior.outer"));
        assert!(contents.contains("\"tick\":12"));
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::StateChanged);
        assert_eq!(events[0].tick, 12);
    }

    #[test]
    fn records_below_the_minimum_are_dropped() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("behavior.log");
        let telemetry = BehaviorTelemetry::builder("behavior")
            .log_path(&log_path)
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, 1, "behavior.engagement", json!({}))
            .unwrap();
        telemetry
            .log(LogLevel::Error, 2, "turret.fault", json!({}))
            .unwrap();
        let contents = std::fs::read_to_string(&log_path).unwrap_or_default();
        assert!(!contents.contains("behavior.engagement"));
        assert!(contents.contains("turret.fault"));
    }

    #[test]
    fn scalar_metadata_is_kept_under_value() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("behavior.log");
        let telemetry = BehaviorTelemetry::builder("behavior")
            .log_path(&log_path)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, 3, "turret.run.seed", json!(42))
            .unwrap();
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("\"value\":42"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn flushed_events_land_in_emission_order() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("events.jsonl");
        let publisher: Arc<dyn EventPublisher> =
            Arc::new(FileEventPublisher::new(&path).unwrap());
        let telemetry = BehaviorTelemetry::builder("behavior")
            .event_publisher(publisher)
            .build()
            .unwrap();
        for tick in 0..64 {
            telemetry
                .event(EventKind::EngagementChanged, tick, json!({}))
                .unwrap();
        }
        telemetry.flush().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let ticks: Vec<u64> = contents
            .lines()
            .map(|line| {
                let record: Value = serde_json::from_str(line).unwrap();
                record["tick"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(ticks, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let a: u64 = seeded_rng(9).gen();
        let b: u64 = seeded_rng(9).gen();
        assert_eq!(a, b);
    }
}
