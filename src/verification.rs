use crate::error::{ValidationError, VeristoreError};
use crate::events::{EventBus, StoreEvent};
use crate::media::RecordedArtifact;
use crate::order::{OrderCoordinator, VerificationStatus};
use crate::services::UploadSink;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Steps of the identity-verification flow for one order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStep {
    Info,
    Record,
    Uploading,
    Complete,
}

impl std::fmt::Display for VerificationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerificationStep::Info => "info",
            VerificationStep::Record => "record",
            VerificationStep::Uploading => "uploading",
            VerificationStep::Complete => "complete",
        };
        write!(f, "{}", s)
    }
}

/// Multi-step verification flow wrapping the recording state machine.
///
/// One attempt exists per order: entering with a different order id resets
/// step, consent, and artifact state unconditionally so nothing leaks
/// across orders.
pub struct VerificationFlow {
    order_id: Option<String>,
    step: VerificationStep,
    consent_given: bool,
    verification_id: Option<String>,
    sink: Arc<dyn UploadSink>,
    coordinator: Arc<OrderCoordinator>,
    event_bus: EventBus,
}

impl VerificationFlow {
    pub fn new(
        sink: Arc<dyn UploadSink>,
        coordinator: Arc<OrderCoordinator>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            order_id: None,
            step: VerificationStep::Info,
            consent_given: false,
            verification_id: None,
            sink,
            coordinator,
            event_bus,
        }
    }

    /// Bind the flow to an order. A changed order id wipes every piece of
    /// attempt state, even mid-flow.
    pub fn enter(&mut self, order_id: &str) {
        if self.order_id.as_deref() != Some(order_id) {
            debug!("Verification flow reset for order {}", order_id);
            self.order_id = Some(order_id.to_string());
            self.step = VerificationStep::Info;
            self.consent_given = false;
            self.verification_id = None;
        }
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn step(&self) -> VerificationStep {
        self.step
    }

    pub fn consent_given(&self) -> bool {
        self.consent_given
    }

    pub fn verification_id(&self) -> Option<&str> {
        self.verification_id.as_deref()
    }

    /// The phrase the user must speak into the camera
    pub fn instruction_phrase(&self) -> Option<String> {
        self.order_id
            .as_deref()
            .map(|id| format!("I confirm order number {}", id))
    }

    /// Record the explicit consent acknowledgment
    pub fn give_consent(&mut self) {
        self.consent_given = true;
    }

    /// info -> record. Rejected in the state machine itself when consent is
    /// missing, not merely hidden in the UI.
    pub fn begin_recording(&mut self) -> Result<(), ValidationError> {
        if self.step != VerificationStep::Info {
            return Err(ValidationError::InvalidField {
                field: "step".to_string(),
                details: format!("cannot start recording from step {}", self.step),
            });
        }
        if !self.consent_given {
            return Err(ValidationError::ConsentRequired);
        }
        self.step = VerificationStep::Record;
        Ok(())
    }

    /// record -> info, keeping consent. Mirrors the back button on the
    /// recording step.
    pub fn return_to_info(&mut self) {
        if self.step == VerificationStep::Record {
            self.step = VerificationStep::Info;
        }
    }

    /// record -> uploading -> complete | record. Takes the confirmed
    /// artifact from the recording state machine and hands it to the upload
    /// sink. On failure the artifact is discarded and the user is returned
    /// to the record step; the flow never re-submits a stale artifact or
    /// retries silently.
    pub async fn submit_artifact(
        &mut self,
        artifact: RecordedArtifact,
    ) -> Result<String, VeristoreError> {
        if self.step != VerificationStep::Record {
            return Err(ValidationError::InvalidField {
                field: "step".to_string(),
                details: format!("cannot upload from step {}", self.step),
            }
            .into());
        }
        let order_id = self
            .order_id
            .clone()
            .ok_or_else(|| VeristoreError::component("verification_flow", "no order bound"))?;

        self.step = VerificationStep::Uploading;

        match self.sink.upload_artifact(&order_id, &artifact).await {
            Ok(verification_id) => {
                self.verification_id = Some(verification_id.clone());
                self.step = VerificationStep::Complete;

                info!(
                    "Verification {} complete for order {}",
                    verification_id, order_id
                );
                self.event_bus.publish(StoreEvent::VerificationSubmitted {
                    order_id: order_id.clone(),
                    verification_id: verification_id.clone(),
                });

                // The upload already succeeded; a failure to mirror the
                // status onto the order is a defensive error, not a reason
                // to make the user re-record.
                if let Err(e) = self
                    .coordinator
                    .update_verification(&order_id, VerificationStatus::Submitted)
                    .await
                {
                    warn!(
                        "Defensive: could not mark order {} as submitted: {}",
                        order_id, e
                    );
                }

                Ok(verification_id)
            }
            Err(e) => {
                warn!("Upload failed for order {}: {}", order_id, e);
                self.step = VerificationStep::Record;
                Err(e.into())
            }
        }
    }

    /// Defer verification from the info step. The order's verification
    /// status stays pending: skipping never marks verification complete or
    /// failed, it only returns control to the order-status display.
    pub fn skip(&mut self) -> Result<(), ValidationError> {
        if self.step != VerificationStep::Info {
            return Err(ValidationError::InvalidField {
                field: "step".to_string(),
                details: format!("cannot skip from step {}", self.step),
            });
        }
        if let Some(order_id) = &self.order_id {
            info!("Verification skipped for order {}", order_id);
            self.event_bus.publish(StoreEvent::VerificationSkipped {
                order_id: order_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckoutConfig, VerificationConfig};
    use crate::error::UploadError;
    use crate::order::{
        Customer, DeliveryDetails, DeliveryMethod, OrderItem, PaymentMethod,
    };
    use crate::services::{
        InMemoryOrderBackend, MemoryUploadSink, MockPaymentGateway, PaymentDetails,
    };
    use bytes::Bytes;
    use std::time::Duration;

    struct Fixture {
        flow: VerificationFlow,
        sink: Arc<MemoryUploadSink>,
        coordinator: Arc<OrderCoordinator>,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new(64);
        let backend = Arc::new(InMemoryOrderBackend::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let coordinator = Arc::new(OrderCoordinator::new(
            backend,
            gateway,
            CheckoutConfig::default(),
            bus.clone(),
        ));
        let sink = Arc::new(MemoryUploadSink::new(VerificationConfig::default()));
        let flow = VerificationFlow::new(
            Arc::clone(&sink) as Arc<dyn UploadSink>,
            Arc::clone(&coordinator),
            bus,
        );
        Fixture {
            flow,
            sink,
            coordinator,
        }
    }

    async fn verified_order(coordinator: &OrderCoordinator) -> String {
        let outcome = coordinator
            .checkout(
                Customer {
                    name: "Jan Kowalski".to_string(),
                    email: "jan@example.com".to_string(),
                    phone: "+48 123 456 789".to_string(),
                    messenger_handle: None,
                },
                vec![OrderItem {
                    product_id: "prod-1".to_string(),
                    name: "Collector edition".to_string(),
                    variant: "standard".to_string(),
                    quantity: 1,
                    unit_price: 299.99,
                    requires_verification: true,
                }],
                DeliveryDetails {
                    method: DeliveryMethod::PersonalHandoff,
                    locker_code: None,
                    pickup_location: Some("Main Square".to_string()),
                    cost: 0.0,
                },
                PaymentMethod::Card,
                PaymentDetails::Card {
                    masked_number: "**** 4242".to_string(),
                },
            )
            .await
            .unwrap();
        outcome.order.id
    }

    fn artifact() -> RecordedArtifact {
        RecordedArtifact {
            data: Bytes::from(vec![1u8; 2048]),
            mime_type: "video/webm".to_string(),
            duration: Duration::from_secs(8),
        }
    }

    #[tokio::test]
    async fn test_consent_gates_recording() {
        let mut f = fixture();
        f.flow.enter("ORD-111111");

        let err = f.flow.begin_recording().unwrap_err();
        assert_eq!(err, ValidationError::ConsentRequired);
        assert_eq!(f.flow.step(), VerificationStep::Info);

        f.flow.give_consent();
        f.flow.begin_recording().unwrap();
        assert_eq!(f.flow.step(), VerificationStep::Record);
    }

    #[tokio::test]
    async fn test_new_order_resets_everything() {
        let mut f = fixture();
        f.flow.enter("ORD-AAAAAA");
        f.flow.give_consent();
        f.flow.begin_recording().unwrap();
        assert_eq!(f.flow.step(), VerificationStep::Record);

        // Re-entering for another order must reset step and consent even
        // though the first attempt is still in memory.
        f.flow.enter("ORD-BBBBBB");
        assert_eq!(f.flow.step(), VerificationStep::Info);
        assert!(!f.flow.consent_given());
        assert!(f.flow.verification_id().is_none());
    }

    #[tokio::test]
    async fn test_reentering_same_order_keeps_state() {
        let mut f = fixture();
        f.flow.enter("ORD-AAAAAA");
        f.flow.give_consent();
        f.flow.enter("ORD-AAAAAA");
        assert!(f.flow.consent_given());
    }

    #[tokio::test]
    async fn test_successful_upload_completes_and_notifies_coordinator() {
        let mut f = fixture();
        let order_id = verified_order(&f.coordinator).await;

        f.flow.enter(&order_id);
        f.flow.give_consent();
        f.flow.begin_recording().unwrap();

        let verification_id = f.flow.submit_artifact(artifact()).await.unwrap();
        assert!(verification_id.starts_with("VER-"));
        assert_eq!(f.flow.step(), VerificationStep::Complete);

        let order = f.coordinator.get_order(&order_id).await.unwrap();
        assert_eq!(order.verification_status, Some(VerificationStatus::Submitted));

        let uploads = f.sink.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].order_id, order_id);
    }

    #[tokio::test]
    async fn test_upload_failure_returns_to_record_without_retry() {
        let mut f = fixture();
        let order_id = verified_order(&f.coordinator).await;

        f.flow.enter(&order_id);
        f.flow.give_consent();
        f.flow.begin_recording().unwrap();

        f.sink.fail_next(UploadError::Transport {
            details: "connection reset".to_string(),
        });
        let err = f.flow.submit_artifact(artifact()).await.unwrap_err();
        assert!(matches!(err, VeristoreError::Upload(_)));

        // Back at the record step, artifact discarded, nothing stored and
        // no silent retry happened.
        assert_eq!(f.flow.step(), VerificationStep::Record);
        assert!(f.sink.uploads().is_empty());

        let order = f.coordinator.get_order(&order_id).await.unwrap();
        assert_eq!(order.verification_status, Some(VerificationStatus::Pending));
    }

    #[tokio::test]
    async fn test_skip_only_from_info_and_leaves_pending() {
        let mut f = fixture();
        let order_id = verified_order(&f.coordinator).await;

        f.flow.enter(&order_id);
        f.flow.skip().unwrap();

        let order = f.coordinator.get_order(&order_id).await.unwrap();
        assert_eq!(order.verification_status, Some(VerificationStatus::Pending));

        f.flow.give_consent();
        f.flow.begin_recording().unwrap();
        assert!(f.flow.skip().is_err());
    }

    #[tokio::test]
    async fn test_upload_rejected_outside_record_step() {
        let mut f = fixture();
        f.flow.enter("ORD-111111");

        let err = f.flow.submit_artifact(artifact()).await.unwrap_err();
        assert!(matches!(err, VeristoreError::Validation(_)));
        assert_eq!(f.flow.step(), VerificationStep::Info);
    }

    #[tokio::test]
    async fn test_instruction_phrase_names_order() {
        let mut f = fixture();
        f.flow.enter("ORD-424242");
        assert_eq!(
            f.flow.instruction_phrase().unwrap(),
            "I confirm order number ORD-424242"
        );
    }

    #[tokio::test]
    async fn test_return_to_info_keeps_consent() {
        let mut f = fixture();
        f.flow.enter("ORD-111111");
        f.flow.give_consent();
        f.flow.begin_recording().unwrap();

        f.flow.return_to_info();
        assert_eq!(f.flow.step(), VerificationStep::Info);
        assert!(f.flow.consent_given());
    }
}
