// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halyard
//!
//! A minimal declarative infrastructure-provisioning engine.
//!
//! ## Overview
//!
//! Halyard reads a YAML configuration of typed, named resources, builds a
//! dependency graph from their references, diffs it against the last-applied
//! state and reconciles the provider side by executing an ordered plan.
//!
//! ## Architecture
//!
//! 1. **Graph**: resources, variables and outputs from `halyard.deploy.yaml`,
//!    with edges from `depends_on` and `${type.name.attribute}` references
//! 2. **Planner**: a pure diff of the graph against recorded state, ordered
//!    so dependencies come first and dependents are deleted first
//! 3. **Executor**: applies the plan through a [`provider::Provider`],
//!    running independent actions concurrently and retrying transient errors
//! 4. **State**: the last-applied record of every resource, local or in S3
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`graph`]: Resource identities, references and the desired graph
//! - [`planner`]: Diff computation and action ordering
//! - [`executor`]: Concurrent plan execution with retries
//! - [`provider`]: Provider boundary, simulated cloud and HTTP gateway
//! - [`state`]: State storage backends (local, S3)
//! - [`reconciler`]: Runs plan, apply, destroy and drift checks
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: web-cluster
//!   environment: dev
//!
//! resources:
//!   - type: aws_security_group
//!     name: elb
//!     attributes:
//!       name: web-elb-sg
//!   - type: aws_elb
//!     name: example
//!     attributes:
//!       name: web-elb
//!       security_groups: ["${aws_security_group.elb.id}"]
//!
//! outputs:
//!   clb_dns_name:
//!     value: "${aws_elb.example.dns_name}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{HalyardError, Result};
pub use executor::{ApplyReport, CancellationHandle, Executor, ExecutorOptions, RetryPolicy};
pub use graph::{DesiredGraph, GraphBuilder, ResourceId};
pub use planner::{ActionKind, Plan, PlannedAction, Planner};
pub use provider::{HttpProvider, MemoryProvider, Provider, SchemaCatalog};
pub use reconciler::{ApplyOutcome, DriftReport, Reconciler};
pub use state::{LocalStateStore, RemoteState, S3StateStore, StateHandle, StateStore};
