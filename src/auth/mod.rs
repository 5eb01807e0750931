//! User accounts and the JWT access/refresh token lifecycle.

pub mod guard;
pub mod password;
pub mod service;
pub mod store;
pub mod token;

pub use guard::require_user;
pub use service::{AuthService, TokenPair};
pub use store::{User, UserStore};
pub use token::{Claims, TokenCodec, TokenKind};
