//! Types shared by the CDRS routing core and whatever protocol transport sits beneath it.
//!
//! The routing core never looks inside requests or responses. What it does need to agree on
//! with the transport layer is how consistency levels are named, how partition keys map to
//! ring tokens, and how failures are reported. Those live here.

pub mod consistency;
pub mod error;
pub mod token;

pub type Error = error::Error;
pub type Result<T> = error::Result<T>;
