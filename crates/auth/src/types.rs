//! Types shared by the session layer

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Last-known identity metadata.
///
/// Every field is optional: renewals and raw-credential logins often carry
/// only part of the picture, and [`UserInfo::merge`] folds partial updates
/// into what is already known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(
        default,
        rename = "theme_color",
        alias = "themeColor",
        skip_serializing_if = "Option::is_none"
    )]
    pub theme_color: Option<String>,

    /// Anything else the backend sends about the user
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UserInfo {
    /// Overwrite the fields present in `update`, keep the rest
    pub fn merge(&mut self, update: UserInfo) {
        let UserInfo {
            id,
            username,
            email,
            role,
            theme_color,
            extra,
        } = update;

        if id.is_some() {
            self.id = id;
        }
        if username.is_some() {
            self.username = username;
        }
        if email.is_some() {
            self.email = email;
        }
        if role.is_some() {
            self.role = role;
        }
        if theme_color.is_some() {
            self.theme_color = theme_color;
        }
        self.extra.extend(extra);
    }

    pub fn is_empty(&self) -> bool {
        self == &UserInfo::default()
    }
}

/// Body returned by the login and renewal endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,

    /// Lifetime of `access_token` in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub user: Option<UserInfo>,
}

impl AuthResponse {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in: None,
            token_type: None,
            user: None,
        }
    }

    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = Some(user);
        self
    }
}

/// Read-only view of the session handed to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub is_authenticated: bool,
    pub user: UserInfo,
    /// Absolute expiry in epoch milliseconds, `None` without a session
    pub expires_at: Option<u64>,
}
