pub mod command;
pub mod validate_json;

pub use command::{CommandSpec, CommandStep, WorkingDir};
pub use validate_json::ValidateJsonStep;
