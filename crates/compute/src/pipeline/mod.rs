//! Training and scoring pipeline.
//!
//! - **Training**: intervals → mutual-information matrix → partition search →
//!   filtering → [`Model`](crate::model::Model).
//! - **Scoring**: label the messages of new intervals against a trained model.

pub mod scorer;
pub mod trainer;
