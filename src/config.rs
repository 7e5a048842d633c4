use crate::authz::AuthzMode;
use crate::errors::AuthzError;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub mode: AuthzMode,
    pub role_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            mode: AuthzMode::Strict,
            role_cache: true,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AuthzError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthzError> {
        let mode = lookup("AUTHZ_MODE")
            .map(|value| value.parse::<AuthzMode>())
            .transpose()?
            .unwrap_or_default();

        let role_cache = lookup("AUTHZ_ROLE_CACHE")
            .map(|value| match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(AuthzError::configuration(format!(
                    "AUTHZ_ROLE_CACHE must be a boolean, got '{other}'"
                ))),
            })
            .transpose()?
            .unwrap_or(true);

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            mode,
            role_cache,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, AuthzError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| AuthzError::configuration("DATABASE_URL not set"))
    }
}
