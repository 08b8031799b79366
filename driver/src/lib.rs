//! Generate–execute–repair driver for LLM-written programs.
//!
//! Given a task description and a project directory, the driver asks a model
//! for a single-file program, writes it as the project's entry point, runs it,
//! and feeds any stderr back into the next prompt until a run is clean or the
//! attempt budget is spent. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic bookkeeping (attempt types, run log,
//!   classification, invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (model client, program executor,
//!   artifact store, prompt rendering, config, transcripts). Isolated behind
//!   traits to enable scripted doubles in tests.
//!
//! [`repair`] coordinates core logic with I/O; [`report`] renders its events
//! and verdict for the CLI.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod repair;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
