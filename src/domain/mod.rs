//! Framework-free stock rules and request shapes.

pub mod requests;
pub mod stock_levels;

pub use requests::{AdjustmentRequest, CreateProductRequest, LocationUpdate, MovementRequest};
pub use stock_levels::{MovementDraft, StockLevels, StockMutation, StockTransition};
