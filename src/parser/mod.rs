//! Email decoding: raw MIME into [`Message`](crate::model::Message), plus
//! the header and filename helpers providers share.

pub mod header;
pub mod mime;
