//! Shared test utilities for the envkit workspace.
//!
//! This crate provides standardised fixtures so crate test suites do not
//! each hand-roll catalogs and workspaces. It is a dev-dependency only and
//! never published.
//!
//! # Modules
//!
//! - [`extension`]: [`ExtensionBuilder`] for in-memory definitions
//! - [`workspace`]: [`TestWorkspace`] with an on-disk catalog and workspace

pub mod extension;
pub mod workspace;

pub use extension::ExtensionBuilder;
pub use workspace::TestWorkspace;
