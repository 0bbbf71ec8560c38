pub mod signature;

pub use signature::{AuthError, Authenticator};
