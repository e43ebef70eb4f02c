//! `pmprof`: a non-cooperative sampling profiler for a running Linux
//! process. Attaches to every thread of a target with PTRACE, captures a
//! backtrace per thread via one of two interchangeable unwind strategies,
//! detaches, and repeats at a configurable frequency, aggregating into a
//! top-stacks histogram.

pub mod config;
pub mod error;
pub mod freezer;
pub mod histogram;
pub mod memory;
pub mod modules;
pub mod output;
pub mod proc_maps;
pub mod registers;
pub mod sampler;
pub mod symbols;
pub mod unwind;

pub use error::{ProfilerError, Result};
pub use sampler::Sampler;
