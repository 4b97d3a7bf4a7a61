//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate document store calls into journal use-cases.
//! - Keep front ends decoupled from storage details.

pub mod journal_service;
