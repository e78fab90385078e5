use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, info};

use super::coordinator::{ConfirmationOutcome, OrderCommitCoordinator};
use super::session::CheckoutSession;
use crate::clients::OrderBackend;
use crate::errors::ServiceError;
use crate::models::PaymentConfirmation;

/// Live checkouts indexed by their pending order id, so server-side payment
/// confirmations reach the session that owns the order.
///
/// Sessions are held weakly: an abandoned checkout simply stops being found and its
/// confirmations go straight to the backend.
pub struct CheckoutRegistry {
    sessions: DashMap<String, Weak<CheckoutSession>>,
    orders: Arc<dyn OrderBackend>,
}

impl CheckoutRegistry {
    pub fn new(orders: Arc<dyn OrderBackend>) -> Self {
        Self {
            sessions: DashMap::new(),
            orders,
        }
    }

    /// Also sweeps entries whose session is gone.
    pub fn register(&self, order_id: &str, session: &Arc<CheckoutSession>) {
        debug!("Registering checkout {} for order {}", session.id(), order_id);
        self.sessions.retain(|_, weak| weak.strong_count() > 0);
        self.sessions
            .insert(order_id.to_string(), Arc::downgrade(session));
    }

    pub fn remove(&self, order_id: &str) {
        self.sessions.remove(order_id);
    }

    /// Drops the entry for `order_id` only if its session no longer exists.
    pub fn release(&self, order_id: &str) {
        if self
            .sessions
            .remove_if(order_id, |_, weak| weak.strong_count() == 0)
            .is_some()
        {
            debug!("Released order {} from a dropped checkout", order_id);
        }
    }

    pub fn get(&self, order_id: &str) -> Option<Arc<CheckoutSession>> {
        let session = self.sessions.get(order_id)?.upgrade();
        if session.is_none() {
            self.sessions.remove(order_id);
        }
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Routes a confirmation to the owning session, or confirms against the backend
    /// when no session holds the order any more.
    pub async fn dispatch_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        match self.get(&confirmation.order_id) {
            Some(session) => session.confirm_payment(confirmation).await,
            None => {
                info!(
                    "No live checkout for order {}, confirming directly",
                    confirmation.order_id
                );
                OrderCommitCoordinator::confirm_detached(self.orders.as_ref(), confirmation).await
            }
        }
    }
}
