//! Common utilities shared across Gatekeeper crates.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (size limits, header inspection, algorithm family)
pub mod jwt;
