//! Concrete tool adapters bound to the `ToolProtocol` trait.
//!
//! `fallback` bridges the Sandbox Gateway / Browser Gateway external
//! collaborators into the Tool Registry (spec.md §4.8's `sandbox_browser`
//! and `sandbox_code_interpreter`). `calculator` is a self-contained native
//! tool kept from the inherited tree (trimmed from `cloudllm::tools::calculator`)
//! to demonstrate a purely local `CustomToolProtocol` registration.

pub mod calculator;
pub mod fallback;
