//! Iterative, validated transformation of Python source text driven by an
//! external text-generation service.

pub mod contexts;
pub mod data;
pub mod framework;
pub mod registries;
pub mod report;

pub use framework::{BatchItem, Reforge};
