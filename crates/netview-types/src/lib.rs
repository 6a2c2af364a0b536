//! Core types for the NetView RPC relay.
//!
//! This crate defines the identifiers, delivery policies, argument payloads,
//! configuration and error taxonomy shared by the wire protocol and the
//! kernel. It contains no business logic.

pub mod args;
pub mod config;
pub mod error;
pub mod ids;
pub mod policy;
