mod context;
mod envelope;

pub use context::{Identity, RequestContext};
pub use envelope::{ApiReply, Envelope};
