pub mod engine;
pub mod state;
pub mod threshold;

pub use engine::{ScoreAdjustment, WeightDecision, WeightEngine};
pub use state::{CellState, WeightPolicy};
pub use threshold::{DynamicThresholdCalculator, ThresholdDecision};
