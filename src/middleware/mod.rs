pub mod auth;

pub use auth::{authenticated_user, optional_user, AuthLayer, AuthenticatedUser};
