pub mod complexity;
pub mod evaluator;

pub use complexity::{ComplexityBands, ComplexityLabel, SpaceBands, TimeBands};
pub use evaluator::{classify, compare_output, overall_verdict};
