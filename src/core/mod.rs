//! Core domain types: verdicts, languages, submission records

pub mod input_size;
pub mod languages;
pub mod models;
pub mod verdict;

pub use input_size::{InputSizeEstimator, PayloadSizeHeuristic};
pub use languages::{Language, LanguageConfig, LanguageTable};
pub use models::{Problem, Submission, SubmissionKind, TestCase, TestCaseResult};
pub use verdict::{Phase, Verdict};
