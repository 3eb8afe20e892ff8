//! Wiremux bridge
//!
//! Multiplexes many independent TCP byte-streams over one
//! already-established, authenticated tunnel. The bridge turns accepted
//! local connections into Open frames, turns peer Open frames into real
//! outbound TCP dials, forwards bytes both ways as Data frames, and
//! propagates close and error signals exactly once per connection.
//!
//! Failure model in one line: a proxied stream dying affects only its
//! connection id; the tunnel dying tears down everything.

mod bridge;
mod registry;
mod reply;

pub use bridge::Bridge;
pub use registry::StreamDuplex;
pub use reply::{DialOutcome, DialReplySender};
