use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Entry, exit or return of physical stock.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MovementRequest {
    pub stock_record_id: Uuid,
    /// Checked by the transition, not here, so it reports `InvalidQuantity`
    pub quantity: i32,
    #[validate(length(max = 500), custom = "validate_reason")]
    pub reason: String,
    pub user_id: Option<Uuid>,
    #[validate(custom = "validate_unit_price")]
    pub unit_price: Option<Decimal>,
}

impl MovementRequest {
    pub fn new(stock_record_id: Uuid, quantity: i32, reason: impl Into<String>) -> Self {
        Self {
            stock_record_id,
            quantity,
            reason: reason.into(),
            user_id: None,
            unit_price: None,
        }
    }

    pub fn by(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn priced_at(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

/// Sets on-hand to a counted value.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdjustmentRequest {
    pub stock_record_id: Uuid,
    pub new_quantity: i32,
    #[validate(length(max = 500), custom = "validate_reason")]
    pub reason: String,
    pub user_id: Option<Uuid>,
}

impl AdjustmentRequest {
    pub fn new(stock_record_id: Uuid, new_quantity: i32, reason: impl Into<String>) -> Self {
        Self {
            stock_record_id,
            new_quantity,
            reason: reason.into(),
            user_id: None,
        }
    }

    pub fn by(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocationUpdate {
    pub stock_record_id: Uuid,
    #[validate(length(max = 100))]
    pub location: String,
    #[validate(length(max = 100))]
    pub lot: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductRequest {
    pub company_id: Option<Uuid>,
    #[validate(length(min = 1, max = 50), custom = "validate_not_blank")]
    pub code: String,
    #[validate(length(min = 1, max = 200), custom = "validate_not_blank")]
    pub name: String,
    #[validate(range(min = 0))]
    pub stock_minimum: i32,
    /// Falls back to the configured default location
    #[validate(length(max = 100))]
    pub location: Option<String>,
}

pub fn validate_reason(reason: &str) -> Result<(), ValidationError> {
    if reason.trim().is_empty() {
        let mut err = ValidationError::new("reason");
        err.message = Some("A reason is required for every stock movement".into());
        return Err(err);
    }
    Ok(())
}

pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

pub fn validate_unit_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() && !price.is_zero() {
        let mut err = ValidationError::new("unit_price");
        err.message = Some("Unit price cannot be negative".into());
        return Err(err);
    }
    Ok(())
}
