//! The DNS wire format (RFC 1035 section 4) and the presentation
//! format used when writing records out for humans.

pub mod deserialise;
pub mod presentation;
pub mod serialise;
pub mod types;
