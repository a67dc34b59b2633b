pub mod classifier;
pub mod clv;
pub mod evaluator;

pub use classifier::{classify, MarketCategory};
pub use evaluator::{evaluate, BetOutcome, Evaluation, ExpansionType};
