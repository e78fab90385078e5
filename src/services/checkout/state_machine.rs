use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::{Address, PersonalData, ShippingMethod};

/// Steps of the checkout flow. `Completed`, `Cancelled` and `Failed` are terminal for
/// the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStep {
    CollectingPersonalData,
    CollectingShippingAddress,
    SelectingPaymentMethod,
    AwaitingPaymentCompletion,
    Completed,
    Cancelled,
    Failed,
}

impl CheckoutStep {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutStep::Completed | CheckoutStep::Cancelled | CheckoutStep::Failed
        )
    }
}

impl Default for CheckoutStep {
    fn default() -> Self {
        CheckoutStep::CollectingPersonalData
    }
}

/// Guards every step change. Gates only look at the data handed in; the machine
/// itself stores nothing but the current step.
#[derive(Debug, Clone, Default)]
pub struct CheckoutStateMachine {
    step: CheckoutStep,
}

impl CheckoutStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> CheckoutStep {
        self.step
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }

    /// Personal data gate. Re-submitting from a later editable step keeps that step.
    pub fn advance_to_shipping(&mut self, data: &PersonalData) -> Result<CheckoutStep, ServiceError> {
        match self.step {
            CheckoutStep::CollectingPersonalData => {
                data.validate()?;
                self.transition(CheckoutStep::CollectingShippingAddress)
            }
            CheckoutStep::CollectingShippingAddress | CheckoutStep::SelectingPaymentMethod => {
                data.validate()?;
                Ok(self.step)
            }
            from => Err(ServiceError::InvalidTransition {
                from,
                to: CheckoutStep::CollectingShippingAddress,
            }),
        }
    }

    /// Shipping gate: complete address, and a selected method that is part of the
    /// currently resolved set.
    pub fn advance_to_payment(
        &mut self,
        address: &Address,
        selected_method: Option<&str>,
        resolved: &[ShippingMethod],
    ) -> Result<CheckoutStep, ServiceError> {
        self.expect(
            CheckoutStep::CollectingShippingAddress,
            CheckoutStep::SelectingPaymentMethod,
        )?;
        address.validate_complete()?;

        let selected = selected_method.ok_or_else(|| {
            ServiceError::StaleShippingSelection("no shipping method selected".to_string())
        })?;
        if !resolved.iter().any(|m| m.id == selected) {
            return Err(ServiceError::StaleShippingSelection(format!(
                "shipping method '{}' is not available for this address",
                selected
            )));
        }

        self.transition(CheckoutStep::SelectingPaymentMethod)
    }

    /// Back to the shipping step. The shipping gate has to be passed again.
    pub fn back_to_shipping(&mut self) -> Result<CheckoutStep, ServiceError> {
        self.expect(
            CheckoutStep::SelectingPaymentMethod,
            CheckoutStep::CollectingShippingAddress,
        )?;
        self.transition(CheckoutStep::CollectingShippingAddress)
    }

    /// Order submission starts: a payment method must be chosen.
    pub fn begin_payment(&mut self, payment_method: Option<&str>) -> Result<CheckoutStep, ServiceError> {
        self.expect(
            CheckoutStep::SelectingPaymentMethod,
            CheckoutStep::AwaitingPaymentCompletion,
        )?;
        if payment_method.map_or(true, |m| m.trim().is_empty()) {
            return Err(ServiceError::ValidationError(
                "payment_method is required".to_string(),
            ));
        }
        self.transition(CheckoutStep::AwaitingPaymentCompletion)
    }

    pub fn complete(&mut self) -> Result<CheckoutStep, ServiceError> {
        self.expect(CheckoutStep::AwaitingPaymentCompletion, CheckoutStep::Completed)?;
        self.transition(CheckoutStep::Completed)
    }

    pub fn cancel(&mut self) -> Result<CheckoutStep, ServiceError> {
        self.expect(CheckoutStep::AwaitingPaymentCompletion, CheckoutStep::Cancelled)?;
        self.transition(CheckoutStep::Cancelled)
    }

    pub fn fail(&mut self) -> Result<CheckoutStep, ServiceError> {
        self.expect(CheckoutStep::AwaitingPaymentCompletion, CheckoutStep::Failed)?;
        self.transition(CheckoutStep::Failed)
    }

    /// Re-enters payment method selection after a cancelled or failed attempt.
    pub fn restart_payment(&mut self) -> Result<CheckoutStep, ServiceError> {
        match self.step {
            CheckoutStep::Cancelled | CheckoutStep::Failed => {
                self.transition(CheckoutStep::SelectingPaymentMethod)
            }
            from => Err(ServiceError::InvalidTransition {
                from,
                to: CheckoutStep::SelectingPaymentMethod,
            }),
        }
    }

    fn expect(&self, from: CheckoutStep, to: CheckoutStep) -> Result<(), ServiceError> {
        if self.step != from {
            return Err(ServiceError::InvalidTransition {
                from: self.step,
                to,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: CheckoutStep) -> Result<CheckoutStep, ServiceError> {
        info!(from = %self.step, to = %to, "Checkout step changed");
        self.step = to;
        Ok(to)
    }
}

/// Address fields the shipping step must show as required for the chosen region.
pub fn required_shipping_fields(address: &Address) -> Vec<&'static str> {
    let mut fields = vec!["region"];
    if address.has_region() {
        fields.push("district");
        if address.is_metropolitan_zone {
            fields.push("postal_code");
        }
    }
    fields
}
