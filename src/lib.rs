//! Local build-and-analysis environment for C/C++ memory debugging.
//!
//! `membox` compiles and memory-checks a C/C++ source file inside a container
//! that replicates a fixed remote toolchain (a pinned compiler plus Valgrind),
//! so findings reproduce what the remote grader reports without a network
//! round trip. The orchestrator owns the environment lifecycle, stages the
//! source into the container, drives the compile and analysis steps as
//! sequential processes, and classifies their text output into structured
//! diagnostics.
//!
//! # Architecture
//!
//! Engine access goes through narrow trait seams over the Bollard client so
//! every container interaction is unit-testable without a daemon. Harness
//! failures (socket missing, image unavailable, staging rejected) are
//! semantic errors and are never presented as findings about the user's
//! code; findings only ever come out of the output classifier.
//!
//! # Modules
//!
//! - [`config`]: Configuration system with layered precedence (CLI > env > file > defaults)
//! - [`engine`]: Engine connection, environment lifecycle, file bridge, and process runner
//! - [`classify`]: Compiler and memory-analyzer output classification
//! - [`session`]: Interactive compile-then-analyze session loop
//! - [`error`]: Semantic error types for the application

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
