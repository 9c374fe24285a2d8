// Base monitor loop with feedback watchdog
//
// Asks the base for status periodically, drains whatever feedback the reader
// thread forwards, and flags the link stale when the base goes quiet. Hazards
// (bumper, cliff, wheel drop, overcurrent) are logged when they rise and can
// stop the base.

use std::io::Read;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::kobuki::{self, BaseError, BaseReader, Feedback, Hazards, SensorSnapshot};
use crate::messages::{FeedbackHealth, MonitorEvent};

/// Feedback buffered between the reader thread and the loop
const FEEDBACK_CHANNEL: usize = 64;

pub struct Monitor {
    feedback_timeout: Duration,
    feedback_at: Option<Instant>,
    health: FeedbackHealth,
    hazards: Hazards,
    latest: Option<SensorSnapshot>,
}

impl Monitor {
    pub fn new(feedback_timeout: Duration) -> Self {
        Self {
            feedback_timeout,
            feedback_at: None,
            health: FeedbackHealth::Stale, // Stale until the base first answers
            hazards: Hazards::default(),
            latest: None,
        }
    }

    pub fn health(&self) -> FeedbackHealth {
        self.health
    }

    /// Most recent sensor frame
    pub fn latest(&self) -> Option<&SensorSnapshot> {
        self.latest.as_ref()
    }

    /// Record a feedback payload. Returns the hazards if new ones were raised.
    pub fn on_feedback(&mut self, feedback: &Feedback, now: Instant) -> Option<Hazards> {
        self.feedback_at = Some(now);

        let Feedback::Sensors(snapshot) = feedback else {
            return None;
        };
        self.latest = Some(*snapshot);

        let hazards = snapshot.hazards();
        let previous = std::mem::replace(&mut self.hazards, hazards);
        if hazards.any() && hazards != previous {
            warn!("Hazard detected: {}", hazards.describe());
            Some(hazards)
        } else {
            if previous.any() && !hazards.any() {
                info!("Hazards cleared");
            }
            None
        }
    }

    /// Re-evaluate the watchdog. Returns the new health on a transition.
    pub fn check(&mut self, now: Instant) -> Option<FeedbackHealth> {
        let health = match self.feedback_at {
            Some(at) if now.saturating_duration_since(at) <= self.feedback_timeout => FeedbackHealth::Ok,
            _ => FeedbackHealth::Stale,
        };
        if health == self.health {
            return None;
        }

        match health {
            FeedbackHealth::Stale => warn!(
                "No feedback from base for over {}ms",
                self.feedback_timeout.as_millis()
            ),
            FeedbackHealth::Ok => info!("Base feedback is live"),
        }
        self.health = health;
        Some(health)
    }
}

/// Forward feedback until the receiving side goes away
fn read_loop<R: Read>(mut reader: BaseReader<R>, tx: mpsc::Sender<Feedback>) -> Result<(), BaseError> {
    while !tx.is_closed() {
        for feedback in reader.poll()? {
            if tx.blocking_send(feedback).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn emit(json: bool, event: &MonitorEvent) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

/// Monitor the base until Ctrl-C
pub async fn run(config: &RuntimeConfig, json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let base_config = config.base.clone();
    let (mut base, reader) = tokio::task::spawn_blocking(move || kobuki::open(&base_config)).await??;

    let (tx, mut rx) = mpsc::channel(FEEDBACK_CHANNEL);
    let reader_task = tokio::task::spawn_blocking(move || read_loop(reader, tx));

    let settings = &config.monitor;
    let mut monitor = Monitor::new(settings.feedback_timeout());
    let mut tick = interval(Duration::from_millis(1000 / settings.loop_hz));
    let mut status_at: Option<Instant> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        "Monitor started: {}Hz loop, {}ms watchdog timeout",
        settings.loop_hz, settings.feedback_timeout_ms
    );

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutting down monitor");
                break;
            }
            _ = tick.tick() => {}
        }
        let now = Instant::now();

        // 1. Ask for a status frame every status period
        if status_at.is_none_or(|at| now.duration_since(at) >= settings.status_period()) {
            base.request_status()?;
            status_at = Some(now);
        }

        // 2. Drain all pending feedback (non-blocking)
        loop {
            let feedback = match rx.try_recv() {
                Ok(feedback) => feedback,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    reader_task.await??;
                    return Err("feedback reader stopped".into());
                }
            };
            debug!("Feedback: {:?}", feedback);

            if let Some(hazards) = monitor.on_feedback(&feedback, now) {
                let stopped = settings.stop_on_hazard;
                if stopped {
                    base.stop()?;
                    warn!("Base stopped because of hazard");
                }
                emit(json, &MonitorEvent::Hazard { hazards, stopped })?;
            }
            emit(json, &MonitorEvent::Feedback { feedback })?;
        }

        // 3. Watchdog
        if let Some(health) = monitor.check(now) {
            emit(json, &MonitorEvent::Health { health })?;
        }
    }

    base.stop()?;
    drop(rx);
    reader_task.await??;
    Ok(())
}
