//! Stock quantity transitions.
//!
//! [`StockLevels::apply`] is the single place where the stock invariants are
//! checked. It is pure: the ledger service loads a record, asks for the
//! transition, and only then writes anything.

use serde::{Deserialize, Serialize};

use crate::entities::MovementType;
use crate::errors::ServiceError;

/// On-hand and reserved quantities of one stock record.
///
/// Invariant: `0 <= reserved <= on_hand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockLevels {
    on_hand: i32,
    reserved: i32,
}

/// A requested change to a stock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockMutation {
    Entry { quantity: i32 },
    Exit { quantity: i32, check_availability: bool },
    Return { quantity: i32 },
    Adjust { new_quantity: i32 },
    Reserve { quantity: i32 },
    Release { quantity: i32 },
}

impl StockMutation {
    /// Short name used for log fields and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Entry { .. } => "entry",
            Self::Exit { .. } => "exit",
            Self::Return { .. } => "return",
            Self::Adjust { .. } => "adjust",
            Self::Reserve { .. } => "reserve",
            Self::Release { .. } => "release",
        }
    }
}

/// The movement a transition must append to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementDraft {
    pub movement_type: MovementType,
    pub quantity: i32,
}

/// Result of applying a [`StockMutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockTransition {
    pub before: StockLevels,
    pub after: StockLevels,
    /// `None` for reservation changes and no-op adjustments
    pub movement: Option<MovementDraft>,
    /// Reserved units dropped because on-hand fell below the reservation
    pub reservation_trimmed: i32,
}

impl StockTransition {
    /// True when nothing changes and nothing needs to be written.
    pub fn is_noop(&self) -> bool {
        self.before == self.after && self.movement.is_none()
    }
}

impl StockLevels {
    pub fn new(on_hand: i32, reserved: i32) -> Result<Self, ServiceError> {
        let levels = Self { on_hand, reserved };
        levels.check_invariants()?;
        Ok(levels)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn on_hand(&self) -> i32 {
        self.on_hand
    }

    pub fn reserved(&self) -> i32 {
        self.reserved
    }

    pub fn available(&self) -> i32 {
        self.on_hand - self.reserved
    }

    fn check_invariants(&self) -> Result<(), ServiceError> {
        if self.on_hand < 0 {
            return Err(ServiceError::InvalidState(format!(
                "on-hand quantity cannot be negative (got {})",
                self.on_hand
            )));
        }
        if self.reserved < 0 {
            return Err(ServiceError::InvalidState(format!(
                "reserved quantity cannot be negative (got {})",
                self.reserved
            )));
        }
        if self.reserved > self.on_hand {
            return Err(ServiceError::InvalidState(format!(
                "reserved quantity {} exceeds on-hand quantity {}",
                self.reserved, self.on_hand
            )));
        }
        Ok(())
    }

    /// Computes the levels after `mutation` without touching `self`.
    ///
    /// Every precondition is checked before the new levels are built, and the
    /// resulting levels are re-checked against the invariants.
    pub fn apply(&self, mutation: StockMutation) -> Result<StockTransition, ServiceError> {
        let before = *self;
        let (after, movement) = match mutation {
            StockMutation::Entry { quantity } => {
                let on_hand = self.checked_add_on_hand(quantity)?;
                (
                    Self { on_hand, ..before },
                    Some(draft(MovementType::Entry, quantity)),
                )
            }
            StockMutation::Return { quantity } => {
                let on_hand = self.checked_add_on_hand(quantity)?;
                (
                    Self { on_hand, ..before },
                    Some(draft(MovementType::Return, quantity)),
                )
            }
            StockMutation::Exit {
                quantity,
                check_availability,
            } => {
                require_positive(quantity)?;
                if check_availability && quantity > self.available() {
                    return Err(ServiceError::InsufficientStock {
                        available: self.available(),
                        requested: quantity,
                    });
                }
                if quantity > self.on_hand {
                    return Err(ServiceError::InvalidState(format!(
                        "forced exit of {} would leave on-hand quantity {} below zero",
                        quantity, self.on_hand
                    )));
                }
                let on_hand = self.on_hand - quantity;
                (
                    Self {
                        on_hand,
                        reserved: self.reserved.min(on_hand),
                    },
                    Some(draft(MovementType::Exit, quantity)),
                )
            }
            StockMutation::Adjust { new_quantity } => {
                if new_quantity < 0 {
                    return Err(ServiceError::InvalidQuantity(format!(
                        "adjusted quantity cannot be negative (got {})",
                        new_quantity
                    )));
                }
                let delta = i64::from(new_quantity) - i64::from(self.on_hand);
                let movement = if delta == 0 {
                    None
                } else {
                    let quantity = i32::try_from(delta.abs()).map_err(|_| {
                        ServiceError::InvalidQuantity(format!(
                            "adjustment delta {} is out of range",
                            delta
                        ))
                    })?;
                    Some(draft(MovementType::Adjustment, quantity))
                };
                (
                    Self {
                        on_hand: new_quantity,
                        reserved: self.reserved.min(new_quantity),
                    },
                    movement,
                )
            }
            StockMutation::Reserve { quantity } => {
                require_positive(quantity)?;
                if quantity > self.available() {
                    return Err(ServiceError::InsufficientStock {
                        available: self.available(),
                        requested: quantity,
                    });
                }
                (
                    Self {
                        reserved: self.reserved + quantity,
                        ..before
                    },
                    None,
                )
            }
            StockMutation::Release { quantity } => {
                require_positive(quantity)?;
                if quantity > self.reserved {
                    return Err(ServiceError::InsufficientReservation {
                        reserved: self.reserved,
                        requested: quantity,
                    });
                }
                (
                    Self {
                        reserved: self.reserved - quantity,
                        ..before
                    },
                    None,
                )
            }
        };

        after.check_invariants()?;

        // only on-hand changes can shrink the reservation
        let reservation_trimmed = if movement.is_some() {
            before.reserved - after.reserved
        } else {
            0
        };

        Ok(StockTransition {
            before,
            after,
            movement,
            reservation_trimmed,
        })
    }

    fn checked_add_on_hand(&self, quantity: i32) -> Result<i32, ServiceError> {
        require_positive(quantity)?;
        self.on_hand.checked_add(quantity).ok_or_else(|| {
            ServiceError::InvalidQuantity(format!(
                "adding {} to on-hand quantity {} overflows",
                quantity, self.on_hand
            ))
        })
    }
}

fn draft(movement_type: MovementType, quantity: i32) -> MovementDraft {
    MovementDraft {
        movement_type,
        quantity,
    }
}

fn require_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::InvalidQuantity(format!(
            "quantity must be greater than zero (got {})",
            quantity
        )));
    }
    Ok(())
}
