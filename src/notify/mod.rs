pub mod status;

pub use status::{StatusError, StatusPayload, StatusReporter, StatusState};
