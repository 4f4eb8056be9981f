use crate::config::CheckoutConfig;
use crate::error::{
    BackendError, InvalidTransitionError, PaymentError, ValidationError, VeristoreError,
};
use crate::events::{EventBus, StoreEvent};
use crate::services::{OrderBackend, PaymentDetails, PaymentGateway, PaymentReceiptStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Order lifecycle states. Not strictly linear: the path branches on the
/// verification requirement after payment is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    PaymentPending,
    PaymentConfirmed,
    VerificationPending,
    VerificationApproved,
    VerificationRejected,
    Processing,
    Shipped,
    ReadyForPickup,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::PaymentPending => "payment_pending",
            OrderStatus::PaymentConfirmed => "payment_confirmed",
            OrderStatus::VerificationPending => "verification_pending",
            OrderStatus::VerificationApproved => "verification_approved",
            OrderStatus::VerificationRejected => "verification_rejected",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if next == Cancelled {
            return self.is_pre_fulfillment();
        }
        matches!(
            (self, next),
            (Created, PaymentPending)
                | (PaymentPending, PaymentConfirmed)
                | (PaymentConfirmed, VerificationPending)
                | (PaymentConfirmed, Processing)
                | (VerificationPending, VerificationApproved)
                | (VerificationPending, VerificationRejected)
                | (VerificationApproved, Processing)
                | (Processing, Shipped)
                | (Processing, ReadyForPickup)
                | (Shipped, Delivered)
                | (ReadyForPickup, Delivered)
        )
    }

    /// Cancellation is reachable from any state before fulfillment starts
    /// shipping the goods.
    pub fn is_pre_fulfillment(&self) -> bool {
        use OrderStatus::*;
        matches!(
            self,
            Created
                | PaymentPending
                | PaymentConfirmed
                | VerificationPending
                | VerificationApproved
                | VerificationRejected
                | Processing
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verification progression. Only ever moves pending -> submitted ->
/// approved | rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Submitted,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn can_transition_to(&self, next: VerificationStatus) -> bool {
        use VerificationStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted) | (Submitted, Approved) | (Submitted, Rejected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Submitted => "submitted",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// In-person exchange; always triggers identity verification
    PersonalHandoff,
    ParcelLocker,
    DropPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankRedirect,
    MobileCode,
    CashOnDelivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub variant: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub requires_verification: bool,
}

impl OrderItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub messenger_handle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryDetails {
    pub method: DeliveryMethod,
    pub locker_code: Option<String>,
    pub pickup_location: Option<String>,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub method: PaymentMethod,
    pub payment_id: Option<String>,
    pub currency: String,
    pub subtotal: f64,
    pub delivery_cost: f64,
    pub total: f64,
}

/// Central order aggregate. Mutated only through the coordinator's
/// transition operations, never directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer: Customer,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    /// Derived once at creation from item flags and delivery method,
    /// then frozen even if the cart is later mutated.
    pub requires_verification: bool,
    /// Some iff `requires_verification`
    pub verification_status: Option<VerificationStatus>,
    pub delivery: DeliveryDetails,
    pub payment: PaymentSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(|i| i.line_total()).sum()
    }
}

/// Mint a client-side order id: a placeholder until the backend confirms it
pub fn mint_order_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        .to_string();
    let suffix = &millis[millis.len().saturating_sub(6)..];
    format!("ORD-{}", suffix)
}

/// Where to send the user once a payment resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Verification { order_id: String },
    OrderStatus { order_id: String },
}

/// Result of a full checkout: the persisted order and the route to show next
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub route: Route,
}

/// The cart/checkout/payment/verification/fulfillment state machine.
/// Decides whether an order requires verification and routes the user
/// between checkout, verification, and status display.
pub struct OrderCoordinator {
    backend: Arc<dyn OrderBackend>,
    gateway: Arc<dyn PaymentGateway>,
    config: CheckoutConfig,
    event_bus: EventBus,
}

impl OrderCoordinator {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        gateway: Arc<dyn PaymentGateway>,
        config: CheckoutConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            backend,
            gateway,
            config,
            event_bus,
        }
    }

    /// Validate required customer fields and delivery details. Surfaced
    /// inline; mutates nothing.
    pub fn validate_checkout(
        customer: &Customer,
        items: &[OrderItem],
        delivery: &DeliveryDetails,
    ) -> Result<(), ValidationError> {
        if items.is_empty() {
            return Err(ValidationError::EmptyCart);
        }
        for (field, value) in [
            ("name", &customer.name),
            ("email", &customer.email),
            ("phone", &customer.phone),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        match delivery.method {
            DeliveryMethod::ParcelLocker => {
                if delivery.locker_code.as_deref().unwrap_or("").is_empty() {
                    return Err(ValidationError::MissingField {
                        field: "locker_code".to_string(),
                    });
                }
            }
            DeliveryMethod::PersonalHandoff => {
                if delivery.pickup_location.as_deref().unwrap_or("").is_empty() {
                    return Err(ValidationError::MissingField {
                        field: "pickup_location".to_string(),
                    });
                }
            }
            DeliveryMethod::DropPoint => {}
        }
        Ok(())
    }

    /// Compute the frozen verification requirement for an order about to be
    /// created.
    pub fn requires_verification(items: &[OrderItem], delivery: &DeliveryDetails) -> bool {
        items.iter().any(|i| i.requires_verification)
            || delivery.method == DeliveryMethod::PersonalHandoff
    }

    /// Validate, compute the verification requirement, assign an id, and
    /// persist the record. Backend failures surface as retryable errors; no
    /// local order state is fabricated in their place.
    pub async fn create_order(
        &self,
        customer: Customer,
        items: Vec<OrderItem>,
        delivery: DeliveryDetails,
        payment: PaymentSummary,
    ) -> Result<Order, VeristoreError> {
        Self::validate_checkout(&customer, &items, &delivery)?;

        let requires_verification = Self::requires_verification(&items, &delivery);
        let now = Utc::now();

        let order = Order {
            id: mint_order_id(),
            customer,
            items,
            status: OrderStatus::Created,
            requires_verification,
            verification_status: requires_verification.then_some(VerificationStatus::Pending),
            delivery,
            payment,
            created_at: now,
            updated_at: now,
        };

        let stored = self.backend.create_order(order).await?;
        info!(
            "Order {} created (requires_verification: {})",
            stored.id, stored.requires_verification
        );
        self.publish_status(&stored);
        Ok(stored)
    }

    /// Apply a payment result. Success advances the order toward the
    /// verification branch; failure leaves the order unmodified and hands
    /// the gateway reason back for a user-facing retry. Payment is never
    /// silently retried here.
    pub async fn record_payment_result(
        &self,
        order_id: &str,
        result: Result<PaymentReceiptStatus, PaymentError>,
    ) -> Result<Order, VeristoreError> {
        let status = match result {
            Ok(s) => s,
            Err(e) => {
                warn!("Payment failed for order {}: {}", order_id, e);
                self.event_bus.publish(StoreEvent::PaymentProcessed {
                    order_id: order_id.to_string(),
                    success: false,
                    payment_id: None,
                });
                return Err(e.into());
            }
        };

        let order = self.transition_status(order_id, OrderStatus::PaymentPending).await?;
        self.event_bus.publish(StoreEvent::PaymentProcessed {
            order_id: order_id.to_string(),
            success: true,
            payment_id: order.payment.payment_id.clone(),
        });

        let mut order = order;
        if status == PaymentReceiptStatus::Completed {
            order = self
                .transition_status(order_id, OrderStatus::PaymentConfirmed)
                .await?;
            if order.requires_verification {
                order = self
                    .transition_status(order_id, OrderStatus::VerificationPending)
                    .await?;
            }
        }
        Ok(order)
    }

    /// Validate and apply a status transition, bumping `updated_at`.
    /// Illegal jumps fail with `InvalidTransitionError` and are logged as
    /// defensive errors.
    pub async fn transition_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<Order, VeristoreError> {
        let mut order = self.backend.get_order(order_id).await?;

        if !order.status.can_transition_to(new_status) {
            let err = InvalidTransitionError {
                from: order.status.to_string(),
                to: new_status.to_string(),
            };
            error!("Defensive: {} on order {}", err, order_id);
            return Err(err.into());
        }

        order.status = new_status;
        order.updated_at = Utc::now();
        let stored = self.backend.update_order(order).await?;
        self.publish_status(&stored);
        Ok(stored)
    }

    /// Advance the verification progression and mirror it onto the order
    /// status where the lifecycle branches.
    pub async fn update_verification(
        &self,
        order_id: &str,
        new_status: VerificationStatus,
    ) -> Result<Order, VeristoreError> {
        let mut order = self.backend.get_order(order_id).await?;

        let current = order.verification_status.ok_or_else(|| {
            VeristoreError::component(
                "order_coordinator",
                "verification update on an order that does not require it",
            )
        })?;

        if !current.can_transition_to(new_status) {
            let err = InvalidTransitionError {
                from: current.to_string(),
                to: new_status.to_string(),
            };
            error!("Defensive: verification {} on order {}", err, order_id);
            return Err(err.into());
        }

        order.verification_status = Some(new_status);
        order.updated_at = Utc::now();
        let order = self.backend.update_order(order).await?;
        debug!("Order {} verification -> {}", order_id, new_status);

        // Mirror terminal verification outcomes onto the order status where
        // the lifecycle allows it. A cash-on-delivery order still awaiting
        // settlement can be approved without its status moving; that is a
        // recorded outcome, not an error.
        let mirrored = match new_status {
            VerificationStatus::Approved => Some(OrderStatus::VerificationApproved),
            VerificationStatus::Rejected => Some(OrderStatus::VerificationRejected),
            _ => None,
        };
        match mirrored {
            Some(target) if order.status.can_transition_to(target) => {
                self.transition_status(order_id, target).await
            }
            Some(target) => {
                debug!(
                    "Order {} verification {} recorded; status {} does not mirror to {}",
                    order_id, new_status, order.status, target
                );
                Ok(order)
            }
            None => Ok(order),
        }
    }

    /// Pure routing decision, re-evaluated every time a payment completes:
    /// while verification is required and not approved, the user goes to
    /// the verification flow, never to the success view.
    pub fn route_after_payment(order: &Order) -> Route {
        if order.requires_verification
            && order.verification_status != Some(VerificationStatus::Approved)
        {
            Route::Verification {
                order_id: order.id.clone(),
            }
        } else {
            Route::OrderStatus {
                order_id: order.id.clone(),
            }
        }
    }

    /// Full checkout sequence for one order: charge the gateway first, then
    /// persist. Payment must resolve (success or failure) before order
    /// persistence is attempted, so a successful charge can never reference
    /// a nonexistent order record on the failure path.
    pub async fn checkout(
        &self,
        customer: Customer,
        items: Vec<OrderItem>,
        delivery: DeliveryDetails,
        method: PaymentMethod,
        details: PaymentDetails,
    ) -> Result<CheckoutOutcome, VeristoreError> {
        Self::validate_checkout(&customer, &items, &delivery)?;

        let subtotal: f64 = items.iter().map(|i| i.line_total()).sum();
        let total = subtotal + delivery.cost;

        let receipt = match self.gateway.charge(total, method, &details).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Gateway declined checkout: {}", e);
                return Err(e.into());
            }
        };

        let payment = PaymentSummary {
            method,
            payment_id: Some(receipt.payment_id.clone()),
            currency: self.config.currency.clone(),
            subtotal,
            delivery_cost: delivery.cost,
            total,
        };

        let order = self
            .create_order(customer, items, delivery, payment)
            .await?;
        let order = self
            .record_payment_result(&order.id, Ok(receipt.status))
            .await?;

        let route = Self::route_after_payment(&order);
        Ok(CheckoutOutcome { order, route })
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order, BackendError> {
        self.backend.get_order(order_id).await
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>, BackendError> {
        self.backend.list_my_orders().await
    }

    fn publish_status(&self, order: &Order) {
        self.event_bus.publish(StoreEvent::OrderStatusChanged {
            order_id: order.id.clone(),
            status: order.status.to_string(),
            timestamp: SystemTime::now(),
        });
    }
}
