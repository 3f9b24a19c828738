mod adaptive;
mod algorithm;
mod fixed;
mod state;
mod target_sparsity;

pub use adaptive::AdaptiveThreshold;
pub use algorithm::ThresholdAlgorithm;
pub use fixed::FixedThreshold;
pub use state::ThresholdState;
pub use target_sparsity::TargetSparsityThreshold;
