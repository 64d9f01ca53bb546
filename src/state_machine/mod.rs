//! Hierarchical state machines (statig).

pub mod console_sm;
