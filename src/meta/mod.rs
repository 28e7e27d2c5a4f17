//! The decoded metadata tree attached to every dataset.
//!
//! Vendor files store their metadata as a nested, self-describing tree of
//! named tags. The readers decode that tree into [`TagGroup`]/[`TagNode`]
//! values up front, while bulk array payloads are deferred behind
//! [`LazyBlob`] references until the consumer knows which tag it actually
//! needs.

mod tags;

pub use tags::{LazyBlob, TagGroup, TagNode, TagValue};
