use std::fmt;
use std::str::FromStr;

/// Upstream identity providers the federation client can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Google,
    GitHub,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported provider: {0}")]
pub struct UnknownProvider(pub String);

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
        }
    }

    pub fn default_scope(&self) -> &'static str {
        match self {
            Provider::Google => "openid email profile",
            Provider::GitHub => "user:email",
        }
    }

    pub fn default_endpoints(&self) -> ProviderEndpoints {
        match self {
            Provider::Google => ProviderEndpoints {
                authorize: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token: "https://oauth2.googleapis.com/token".to_string(),
                userinfo: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            },
            Provider::GitHub => ProviderEndpoints {
                authorize: "https://github.com/login/oauth/authorize".to_string(),
                token: "https://github.com/login/oauth/access_token".to_string(),
                userinfo: "https://api.github.com/user".to_string(),
            },
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "github" => Ok(Provider::GitHub),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// The three URLs an authorization-code flow touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize: String,
    pub token: String,
    pub userinfo: String,
}

impl ProviderEndpoints {
    /// Conventional endpoint paths under `base`, for self-hosted gateways and
    /// mock servers.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize: format!("{base}/authorize"),
            token: format!("{base}/token"),
            userinfo: format!("{base}/userinfo"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse() {
        assert_eq!("google".parse::<Provider>(), Ok(Provider::Google));
        assert_eq!("github".parse::<Provider>(), Ok(Provider::GitHub));
        assert!("Google".parse::<Provider>().is_err());
        assert!("gitlab".parse::<Provider>().is_err());
    }

    #[test]
    fn rooted_endpoints_strip_trailing_slash() {
        let endpoints = ProviderEndpoints::rooted_at("http://127.0.0.1:9000/");
        assert_eq!(endpoints.token, "http://127.0.0.1:9000/token");
    }
}
