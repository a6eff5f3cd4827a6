//! Client configuration
//!
//! A [`ClientConfig`] can be built in code or deserialized from the camelCase
//! option object used by other tether clients:
//!
//! ```json
//! {
//!   "serverUrl": "https://example.com/__bs__/live",
//!   "connectPolicy": "auto",
//!   "failFast": false,
//!   "sessionRequest": {"token": "abc"}
//! }
//! ```
//!
//! `http://` and `https://` URLs are accepted and rewritten to `ws://` and
//! `wss://` when the transport is opened.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tether_core::{Error, Result};

/// When the client opens its first connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectPolicy {
    /// Connect on the first `run()`
    #[default]
    Auto,
    /// Connect only when `connect()` is called
    Manual,
    /// Connect as soon as the client is built
    Immediate,
}

impl ConnectPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectPolicy::Auto => "auto",
            ConnectPolicy::Manual => "manual",
            ConnectPolicy::Immediate => "immediate",
        }
    }
}

impl fmt::Display for ConnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(ConnectPolicy::Auto),
            "manual" => Ok(ConnectPolicy::Manual),
            "immediate" => Ok(ConnectPolicy::Immediate),
            other => Err(Error::InvalidConfig(format!(
                "invalid connectPolicy \"{}\", expected auto, manual or immediate",
                other
            ))),
        }
    }
}

/// Client options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Server endpoint; `http(s)://` or `ws(s)://`
    pub server_url: String,

    /// When to open the first connection
    #[serde(default)]
    pub connect_policy: ConnectPolicy,

    /// Go to the error state on the first transport failure instead of
    /// retrying
    #[serde(default)]
    pub fail_fast: bool,

    /// Session context sent in every `session_request`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_request: Option<Value>,
}

impl ClientConfig {
    /// Configuration with default options for `server_url`
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            connect_policy: ConnectPolicy::default(),
            fail_fast: false,
            session_request: None,
        }
    }

    /// Parse and validate a camelCase option object
    pub fn from_value(value: Value) -> Result<Self> {
        let config: ClientConfig =
            serde_json::from_value(value).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_session_request(mut self, session_request: Value) -> Self {
        self.session_request = Some(session_request).filter(|v| !v.is_null());
        self
    }

    /// Check the options without touching the network
    pub fn validate(&self) -> Result<()> {
        validate_server_url(&self.server_url)
    }

    /// URL handed to the transport
    pub fn transport_url(&self) -> String {
        rewrite_url(&self.server_url)
    }

    /// Apply a runtime parameter change
    pub fn apply(&mut self, parameter: ConfigParameter) -> Result<()> {
        match parameter {
            ConfigParameter::FailFast(value) => self.fail_fast = value,
            ConfigParameter::ServerUrl(url) => {
                validate_server_url(&url)?;
                self.server_url = url;
            }
            ConfigParameter::SessionRequest(value) => self.session_request = value,
            ConfigParameter::ConnectPolicy(policy) => self.connect_policy = policy,
        }
        Ok(())
    }
}

fn has_scheme(url: &str, scheme: &str) -> bool {
    url.len() > scheme.len()
        && url
            .get(..scheme.len())
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case(scheme))
}

fn validate_server_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::InvalidConfig("serverUrl must be specified".to_string()));
    }
    let supported = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| has_scheme(url, scheme));
    if !supported {
        return Err(Error::InvalidConfig(format!("invalid serverUrl \"{}\"", url)));
    }
    Ok(())
}

/// Rewrite `http(s)://` to `ws(s)://`, case-insensitively
pub fn rewrite_url(url: &str) -> String {
    if has_scheme(url, "http") {
        format!("ws{}", &url[4..])
    } else {
        url.to_string()
    }
}

/// A single option that can be changed on a live client
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigParameter {
    FailFast(bool),
    ServerUrl(String),
    /// `None` clears the session context
    SessionRequest(Option<Value>),
    ConnectPolicy(ConnectPolicy),
}

impl ConfigParameter {
    /// Build a parameter from its option name and a JSON value
    pub fn from_name_value(name: &str, value: Value) -> Result<Self> {
        let type_error = |expected: &str| {
            Error::InvalidConfig(format!("{} must be {}", name, expected))
        };

        match name {
            "failFast" => value
                .as_bool()
                .map(ConfigParameter::FailFast)
                .ok_or_else(|| type_error("a boolean")),
            "serverUrl" => match value {
                Value::String(url) => Ok(ConfigParameter::ServerUrl(url)),
                _ => Err(type_error("a string")),
            },
            "sessionRequest" => Ok(ConfigParameter::SessionRequest(
                Some(value).filter(|v| !v.is_null()),
            )),
            "connectPolicy" => match value {
                Value::String(policy) => policy.parse().map(ConfigParameter::ConnectPolicy),
                _ => Err(type_error("a string")),
            },
            other => Err(Error::InvalidConfig(format!(
                "unknown configuration parameter \"{}\"",
                other
            ))),
        }
    }

    /// Option name of this parameter
    pub fn name(&self) -> &'static str {
        match self {
            ConfigParameter::FailFast(_) => "failFast",
            ConfigParameter::ServerUrl(_) => "serverUrl",
            ConfigParameter::SessionRequest(_) => "sessionRequest",
            ConfigParameter::ConnectPolicy(_) => "connectPolicy",
        }
    }
}
