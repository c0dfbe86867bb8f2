mod protocol;

pub use protocol::{EventPayload, GraphEvent, SkipReason};
