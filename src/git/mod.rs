pub mod repo;

pub use repo::{BaseRef, Repository, RepositoryError};
