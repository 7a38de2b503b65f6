//! Template & Expression Evaluator.

pub mod cache;
pub mod expression;
pub mod template;

pub use expression::{Evaluator, DEFAULT_COST_CEILING};
