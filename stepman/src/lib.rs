//! Step resolution, activation and toolkit-build engine.
//!
//! Given a step reference (a library step, a git repository or a local path)
//! the engine materialises the step on disk, caches library steps for offline
//! reuse and prepares the command line that runs it.
//!
//! - **[`core`]**: Pure logic (semver, constraints, step ids, the library
//!   index model, preload retention). No I/O.
//! - **[`io`]**: Side effects (filesystem, git, HTTP, subprocesses, the
//!   library store and its content cache).
//!
//! Orchestration modules ([`activator`], [`toolkit`], [`prepare`],
//! [`preload`]) combine the two to implement the `stepman` commands.

pub mod activator;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod preload;
pub mod prepare;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod toolkit;
