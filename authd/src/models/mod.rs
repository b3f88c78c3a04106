pub mod oauth;
pub mod session;
pub mod token;
pub mod user;

pub use oauth::{OAuthClient, OAuthIdentity, OAuthProviderConfig, OAuthState};
pub use session::{RevocationReason, Session};
pub use token::TokenOutput;
pub use user::{NewUser, User, UserIdentity};
