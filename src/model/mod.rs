//! Core data model types: fetched messages, their parts, and extraction results.

pub mod attachment;
pub mod message;
pub mod outcome;

pub use attachment::Attachment;
pub use message::{BodyPart, Message};
pub use outcome::{ExtractOptions, ExtractOutcome};
