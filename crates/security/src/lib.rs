//! Security boundary for codeloop: workspace confinement and command policy.
//!
//! Provides:
//! - **Workspace**: resolves tool path arguments and rejects anything that
//!   escapes the workspace root or touches a forbidden prefix
//! - **CommandPolicy**: blocklist for shell commands

pub mod command;
pub mod path;

pub use command::{CommandPolicy, CommandPolicyError};
pub use path::{PathValidationError, Workspace};
