pub mod auth;
pub mod error;

pub use auth::{
    AuthService, AuthSettings, OAuthCallbackInput, OAuthCallbackOutput, OAuthStartInput,
    Principal, RefreshInput, Repositories, SignInInput, SignInOutput, SignUpInput, SignUpOutput,
    ACCESS_SCOPE,
};
pub use error::AuthError;
