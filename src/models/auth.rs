// SPDX-License-Identifier: MIT

//! Authorization status and third-party credentials.

use serde::{Deserialize, Serialize};

/// Third-party providers a user can link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Gradescope,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Gradescope => "gradescope",
        }
    }
}

/// Per-provider link flags, stored in `auth_status/{uid}`.
///
/// A `true` flag means a token is believed to be held server-side. The flag
/// is treated optimistically until a refresh operation proves otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthStatus {
    #[serde(default)]
    pub google: bool,
    #[serde(default)]
    pub gradescope: bool,
}

impl AuthStatus {
    pub fn get(&self, provider: Provider) -> bool {
        match provider {
            Provider::Google => self.google,
            Provider::Gradescope => self.gradescope,
        }
    }

    pub fn set(&mut self, provider: Provider, linked: bool) {
        match provider {
            Provider::Google => self.google = linked,
            Provider::Gradescope => self.gradescope = linked,
        }
    }
}

/// Google credentials stored in `credentials/{uid}/google`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleCredentials {
    /// OAuth refresh token obtained during linking.
    pub token: String,
}

/// Gradescope credentials stored in `credentials/{uid}/gradescope`.
///
/// `email` and `password` are present only when the user opted in to storing
/// them; they are used to mint a fresh token when the stored one goes stale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradescopeCredentials {
    pub token: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Full credentials document for a user, `credentials/{uid}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserCredentials {
    pub google: Option<GoogleCredentials>,
    pub gradescope: Option<GradescopeCredentials>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_flags_are_independent() {
        let mut status = AuthStatus::default();
        assert!(!status.get(Provider::Google));

        status.set(Provider::Gradescope, true);
        assert!(status.get(Provider::Gradescope));
        assert!(!status.get(Provider::Google));
    }
}
