//! Core types: the error taxonomy and the classifiers that produce it.

pub mod classify;
pub mod error;
