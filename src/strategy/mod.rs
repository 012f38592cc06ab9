//! Strategy: probability modeling, value scoring and stake sizing.

pub mod kelly;
pub mod probability;
pub mod value;

pub use kelly::{KellyCalculator, KellyConfig, StakeRecommendation};
pub use probability::{ProbabilityConfig, ProbabilityModel};
pub use value::{value_score, ScanSummary, ScannerConfig, ValueScanner};
