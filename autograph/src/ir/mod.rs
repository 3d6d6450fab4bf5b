//! Intermediate representation consumed by the conversion engine

pub mod build;
pub mod core;
pub mod render;

pub use self::core::*;
