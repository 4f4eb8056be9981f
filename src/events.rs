use crate::error::VeristoreError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the storefront core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreEvent {
    /// The capture engine acquired a camera/microphone stream
    CameraAcquired {
        stream_generation: u64,
        has_audio: bool,
        timestamp: SystemTime,
    },
    /// The capture engine released the active stream
    CameraReleased { timestamp: SystemTime },
    /// Countdown before recording ticked down
    CountdownTick {
        remaining_seconds: u64,
        timestamp: SystemTime,
    },
    /// Recording started for a verification attempt
    RecordingStarted {
        order_id: String,
        timestamp: SystemTime,
    },
    /// Recording reached its fixed length and auto-stopped
    RecordingCompleted {
        order_id: String,
        artifact_bytes: usize,
        mime_type: String,
    },
    /// A verification artifact was accepted by the upload sink
    VerificationSubmitted {
        order_id: String,
        verification_id: String,
    },
    /// Verification was deferred by the user
    VerificationSkipped { order_id: String },
    /// A payment attempt resolved
    PaymentProcessed {
        order_id: String,
        success: bool,
        payment_id: Option<String>,
    },
    /// An order moved to a new lifecycle status
    OrderStatusChanged {
        order_id: String,
        status: String,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl StoreEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            StoreEvent::CameraAcquired { timestamp, .. } => *timestamp,
            StoreEvent::CameraReleased { timestamp } => *timestamp,
            StoreEvent::CountdownTick { timestamp, .. } => *timestamp,
            StoreEvent::RecordingStarted { timestamp, .. } => *timestamp,
            StoreEvent::OrderStatusChanged { timestamp, .. } => *timestamp,
            _ => SystemTime::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            StoreEvent::CameraAcquired {
                stream_generation,
                has_audio,
                ..
            } => format!(
                "Camera acquired (generation {}, audio: {})",
                stream_generation, has_audio
            ),
            StoreEvent::CameraReleased { .. } => "Camera released".to_string(),
            StoreEvent::CountdownTick {
                remaining_seconds, ..
            } => format!("Countdown: {}", remaining_seconds),
            StoreEvent::RecordingStarted { order_id, .. } => {
                format!("Recording started for order {}", order_id)
            }
            StoreEvent::RecordingCompleted {
                order_id,
                artifact_bytes,
                mime_type,
            } => format!(
                "Recording completed for order {} ({} bytes, {})",
                order_id, artifact_bytes, mime_type
            ),
            StoreEvent::VerificationSubmitted {
                order_id,
                verification_id,
            } => format!(
                "Verification {} submitted for order {}",
                verification_id, order_id
            ),
            StoreEvent::VerificationSkipped { order_id } => {
                format!("Verification skipped for order {}", order_id)
            }
            StoreEvent::PaymentProcessed {
                order_id, success, ..
            } => format!(
                "Payment for order {} {}",
                order_id,
                if *success { "succeeded" } else { "failed" }
            ),
            StoreEvent::OrderStatusChanged {
                order_id, status, ..
            } => format!("Order {} moved to {}", order_id, status),
            StoreEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            StoreEvent::CameraAcquired { .. } => "camera_acquired",
            StoreEvent::CameraReleased { .. } => "camera_released",
            StoreEvent::CountdownTick { .. } => "countdown_tick",
            StoreEvent::RecordingStarted { .. } => "recording_started",
            StoreEvent::RecordingCompleted { .. } => "recording_completed",
            StoreEvent::VerificationSubmitted { .. } => "verification_submitted",
            StoreEvent::VerificationSkipped { .. } => "verification_skipped",
            StoreEvent::PaymentProcessed { .. } => "payment_processed",
            StoreEvent::OrderStatusChanged { .. } => "order_status_changed",
            StoreEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Returns the subscriber count.
    /// Publishing with no subscribers is not an error for fire-and-forget
    /// notification events.
    pub fn publish(&self, event: StoreEvent) -> usize {
        match &event {
            StoreEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            StoreEvent::PaymentProcessed {
                order_id, success, ..
            } => {
                if *success {
                    info!("Payment succeeded for order {}", order_id);
                } else {
                    warn!("Payment failed for order {}", order_id);
                }
            }
            StoreEvent::OrderStatusChanged {
                order_id, status, ..
            } => {
                info!("Order {} -> {}", order_id, status);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Spawn a fire-and-forget notification task that logs user-facing status
/// pushes keyed by order id. The state machines never await it.
pub fn spawn_notifier(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match &event {
                    StoreEvent::OrderStatusChanged { order_id, .. }
                    | StoreEvent::VerificationSubmitted { order_id, .. }
                    | StoreEvent::VerificationSkipped { order_id } => {
                        info!("notify[{}]: {}", order_id, event.description());
                    }
                    _ => {}
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Notifier lagged by {} events; continuing", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed; stopping notifier");
                    break;
                }
            }
        }
    })
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// Kept so callers can surface bus problems through the shared taxonomy.
impl From<broadcast::error::RecvError> for VeristoreError {
    fn from(e: broadcast::error::RecvError) -> Self {
        VeristoreError::component("event_bus", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = StoreEvent::OrderStatusChanged {
            order_id: "ORD-000001".to_string(),
            status: "payment_confirmed".to_string(),
            timestamp: SystemTime::now(),
        };

        let subscriber_count = event_bus.publish(event);
        assert_eq!(subscriber_count, 1);

        let received = receiver.recv().await.unwrap();
        match received {
            StoreEvent::OrderStatusChanged { order_id, .. } => {
                assert_eq!(order_id, "ORD-000001");
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_fatal() {
        let event_bus = EventBus::new(10);
        let delivered = event_bus.publish(StoreEvent::CameraReleased {
            timestamp: SystemTime::now(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(StoreEvent::VerificationSkipped {
            order_id: "ORD-000002".to_string(),
        });

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_event_properties() {
        let event = StoreEvent::RecordingCompleted {
            order_id: "ORD-000003".to_string(),
            artifact_bytes: 4096,
            mime_type: "video/webm".to_string(),
        };

        assert_eq!(event.event_type(), "recording_completed");
        assert!(event.description().contains("4096"));
        assert!(event.description().contains("ORD-000003"));
    }
}
