//! `billfetch`: poll a mailbox for payment statements and turn them into
//! plain bill files.
//!
//! Unread notification mail is routed to a [`provider::Provider`] chosen by
//! the [`registry::Registry`]; each provider stages an artifact (attachment,
//! HTML body, or downloaded archive) which a second pass extracts,
//! guessing archive passwords from a configured list.

pub mod config;
pub mod error;
pub mod extract;
pub mod mailbox;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod provider;
pub mod registry;
