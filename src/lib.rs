//! Local-first assistant runtime.
//!
//! This crate implements the hard core of a local-first assistant platform:
//! a context builder that assembles LLM prompts under a hard budget, a
//! layered cognitive pipeline (tool-selection, planning, control, output)
//! driven by an orchestrator, a single control authority for skill
//! creation and package policy, a file-locked digest scheduler, and a
//! graph hygiene reconciliation pass between the relational store and the
//! graph index.
//!
//! LLM inference, the browser UI, the container runtime, and transport
//! adapters sit outside this crate's boundary and are modeled as traits.

pub mod config;
pub mod context;
pub mod credentials;
pub mod digest;
pub mod embedding;
pub mod graph;
pub mod health;
pub mod logging;
pub mod memory;
pub mod pipeline;
pub mod server;
pub mod skills;
pub mod telemetry;
pub mod tools;
pub mod types;
