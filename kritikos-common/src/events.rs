//! Event types and broadcast bus
//!
//! Events are emitted by the analysis pipeline and the IDP aggregator and
//! forwarded to SSE clients. Emission is lossy: nobody listening is normal
//! for batch runs started from the command line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kritikos event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum KritikosEvent {
    /// Batch analysis run accepted and started
    AnalysisRunStarted {
        run_id: Uuid,
        lot_size: usize,
        continuous: bool,
        timestamp: DateTime<Utc>,
    },

    /// One proposal finished the pipeline (persisted or skipped)
    AnalysisItemCompleted {
        run_id: Option<Uuid>,
        proposal_id: i64,
        /// Final stage name (PERSISTED or SKIPPED)
        stage: String,
        is_trivial: Option<bool>,
        par_final: Option<f64>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// One proposal failed; the run continues
    AnalysisItemFailed {
        run_id: Option<Uuid>,
        proposal_id: i64,
        /// Stage that was executing when the failure happened
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A lot of the run finished
    AnalysisLotCompleted {
        run_id: Uuid,
        lot_number: usize,
        processed: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// The run reached a terminal state
    AnalysisRunCompleted {
        run_id: Uuid,
        state: String,
        processed: usize,
        errors: usize,
        duration_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Legislator indices were recomputed
    IdpRecomputed {
        methodology_version: String,
        legislators: usize,
        failures: usize,
        timestamp: DateTime<Utc>,
    },
}

impl KritikosEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            KritikosEvent::AnalysisRunStarted { .. } => "AnalysisRunStarted",
            KritikosEvent::AnalysisItemCompleted { .. } => "AnalysisItemCompleted",
            KritikosEvent::AnalysisItemFailed { .. } => "AnalysisItemFailed",
            KritikosEvent::AnalysisLotCompleted { .. } => "AnalysisLotCompleted",
            KritikosEvent::AnalysisRunCompleted { .. } => "AnalysisRunCompleted",
            KritikosEvent::IdpRecomputed { .. } => "IdpRecomputed",
        }
    }
}

/// Broadcast bus shared by producers and SSE subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KritikosEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus
    ///
    /// `capacity` is the number of events buffered per slow subscriber before
    /// the oldest are dropped for it.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<KritikosEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: KritikosEvent,
    ) -> Result<usize, broadcast::error::SendError<KritikosEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KritikosEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot_event(lot_number: usize) -> KritikosEvent {
        KritikosEvent::AnalysisLotCompleted {
            run_id: Uuid::new_v4(),
            lot_number,
            processed: 10,
            errors: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_fails_but_lossy_does_not_panic() {
        let bus = EventBus::new(8);
        assert!(bus.emit(lot_event(1)).is_err());
        bus.emit_lossy(lot_event(2));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 8);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(lot_event(1)).unwrap();
        bus.emit(lot_event(2)).unwrap();

        match rx.recv().await.unwrap() {
            KritikosEvent::AnalysisLotCompleted { lot_number, .. } => assert_eq!(lot_number, 1),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            KritikosEvent::AnalysisLotCompleted { lot_number, .. } => assert_eq!(lot_number, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = KritikosEvent::IdpRecomputed {
            methodology_version: "1.0".to_string(),
            legislators: 513,
            failures: 0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "IdpRecomputed");
        assert_eq!(json["legislators"], 513);
        assert_eq!(event.event_type(), "IdpRecomputed");
    }
}
