#[allow(clippy::module_inception)]
pub mod models;

pub use models::{PasswordResetToken, Post, PostView, SessionRecord, User};
