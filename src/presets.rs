use std::fmt;
use std::time::Duration;

use thiserror::Error;

const HOUR: Duration = Duration::from_secs(60 * 60);
const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rate limit must allow at least one request")]
    ZeroLimit,
    #[error("rate limit window must be longer than zero")]
    ZeroWindow,
}

/// A `(limit, window)` pair: at most `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    limit: u32,
    window: Duration,
}

impl Policy {
    pub fn new(limit: u32, window: Duration) -> Result<Self, PolicyError> {
        if limit == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self { limit, window })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} requests / {}s", self.limit, self.window.as_secs())
    }
}

// Logical endpoints guarded by the limiter, grouped by sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    /// Account mutation: delete, export.
    Strict,
    /// General API traffic.
    Api,
    Signup,
    PasswordReset,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Strict,
        Preset::Api,
        Preset::Signup,
        Preset::PasswordReset,
    ];

    // Also used as the endpoint half of the counter key
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Strict => "strict",
            Preset::Api => "api",
            Preset::Signup => "signup",
            Preset::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Policy bound to each preset. Only `api` is tunable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetTable {
    strict: Policy,
    api: Policy,
    signup: Policy,
    password_reset: Policy,
}

impl Default for PresetTable {
    fn default() -> Self {
        Self {
            strict: Policy { limit: 10, window: HOUR },
            api: Policy { limit: 100, window: MINUTE },
            signup: Policy { limit: 3, window: HOUR },
            password_reset: Policy { limit: 5, window: HOUR },
        }
    }
}

impl PresetTable {
    pub fn with_api(mut self, api: Policy) -> Self {
        self.api = api;
        self
    }

    pub fn policy(&self, preset: Preset) -> Policy {
        match preset {
            Preset::Strict => self.strict,
            Preset::Api => self.api,
            Preset::Signup => self.signup,
            Preset::PasswordReset => self.password_reset,
        }
    }
}
