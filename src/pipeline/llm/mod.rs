//! Model-backed collaborators: the four classifiers and the answer
//! generator, all driven through `LlmClient`.

pub mod prompt;
pub mod sanitize;
pub mod classify;
pub mod generation;

pub use classify::{
    LlmFactualityGrader, LlmGroundednessGrader, LlmRelevanceGrader, LlmRouteClassifier,
};
pub use generation::LlmAnswerGenerator;

pub(crate) use classify::verdict_token;
