//! Resource graph module.
//!
//! This module turns a parsed configuration into a validated dependency graph:
//! - Resource identities (`type.name`)
//! - `${...}` reference parsing and variable binding
//! - Cycle detection and topological ordering

mod address;
mod builder;
mod desired;
mod reference;

pub use address::ResourceId;
pub use builder::GraphBuilder;
pub use desired::{DesiredGraph, DesiredOutput, DesiredResource};
pub use reference::{Expr, Reference, Resolved, Segment};
