// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection URL classification and transport-security normalization.
//!
//! The security parameter is the PostgreSQL `sslmode` query parameter.
//! [`add_security`] and [`remove_security`] rewrite only that parameter and
//! keep every other query parameter in its original position. A URL that
//! cannot be parsed is returned unchanged with a warning logged.

use std::fmt;

use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};

/// Query parameter carrying the transport-security setting.
pub const SECURITY_PARAM: &str = "sslmode";

/// Value written by [`add_security`].
pub const SECURITY_REQUIRED: &str = "require";

/// `sslmode` values that demand an encrypted transport.
const REQUIRED_VALUES: &[&str] = &["require", "verify-ca", "verify-full"];

/// Storage family recognized from a URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemeKind {
    /// `postgres://` or `postgresql://`.
    NetworkRelational,
    /// `sqlite:` file-backed storage.
    EmbeddedFile,
    /// Anything else.
    Unknown,
}

/// Role a target plays in backend resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// The main networked database.
    PrimaryRelational,
    /// A secondary or test database used as an escalation target.
    SecondaryRelational,
    /// Local file-backed store used when no relational store answers.
    FallbackEmbedded,
}

impl BackendKind {
    /// Whether schema migrations may ever be applied to this kind of backend.
    pub fn is_migratable(self) -> bool {
        !matches!(self, Self::FallbackEmbedded)
    }

    fn expected_scheme(self) -> SchemeKind {
        match self {
            Self::PrimaryRelational | Self::SecondaryRelational => SchemeKind::NetworkRelational,
            Self::FallbackEmbedded => SchemeKind::EmbeddedFile,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryRelational => write!(f, "primary-relational"),
            Self::SecondaryRelational => write!(f, "secondary-relational"),
            Self::FallbackEmbedded => write!(f, "fallback-embedded"),
        }
    }
}

/// Transport-security state of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    /// `sslmode` demands encryption.
    Required,
    /// No `sslmode` parameter at all.
    Absent,
    /// `sslmode` present with a permissive value, or not applicable.
    Unspecified,
}

/// Classify a URL by its scheme prefix.
pub fn classify(url: &str) -> SchemeKind {
    let Some((scheme, _)) = url.split_once(':') else {
        return SchemeKind::Unknown;
    };
    match scheme.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => SchemeKind::NetworkRelational,
        "sqlite" | "embedded" => SchemeKind::EmbeddedFile,
        _ => SchemeKind::Unknown,
    }
}

/// Ensure `sslmode=require` is present, preserving all other parameters.
///
/// An existing `sslmode` keeps its position and has its value replaced;
/// duplicates after the first are dropped.
pub fn add_security(url: &str) -> String {
    rewrite_query(url, |pairs| {
        let mut seen = false;
        pairs.retain_mut(|(key, value)| {
            if key != SECURITY_PARAM {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            *value = SECURITY_REQUIRED.to_string();
            true
        });
        if !seen {
            pairs.push((SECURITY_PARAM.to_string(), SECURITY_REQUIRED.to_string()));
        }
    })
}

/// Ensure no `sslmode` parameter is present, preserving all other parameters.
pub fn remove_security(url: &str) -> String {
    rewrite_query(url, |pairs| pairs.retain(|(key, _)| key != SECURITY_PARAM))
}

/// Read the transport-security state of a URL.
pub fn security_mode(url: &str) -> SecurityMode {
    let Ok(parsed) = Url::parse(url) else {
        return SecurityMode::Unspecified;
    };
    let value = parsed
        .query_pairs()
        .find(|(key, _)| key == SECURITY_PARAM)
        .map(|(_, value)| value.into_owned());
    match value {
        None => SecurityMode::Absent,
        Some(v) if REQUIRED_VALUES.contains(&v.as_str()) => SecurityMode::Required,
        Some(_) => SecurityMode::Unspecified,
    }
}

/// Render a URL with its password replaced by `***`.
pub fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            // Only fails for cannot-be-a-base URLs, which carry no password.
            let _ = parsed.set_password(Some("***"));
            parsed.into()
        }
        _ => url.to_string(),
    }
}

fn rewrite_query(url: &str, edit: impl FnOnce(&mut Vec<(String, String)>)) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(url = %redact(url), error = %e, "Malformed connection URL left unchanged");
            return url.to_string();
        }
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    edit(&mut pairs);

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }
    parsed.into()
}

/// A classified connection URL bound to the role it plays in resolution.
///
/// Targets are immutable. [`with_security`](Self::with_security) and
/// [`without_security`](Self::without_security) return new values.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    url: String,
    kind: BackendKind,
    security: SecurityMode,
}

impl ConnectionTarget {
    /// Create a target, rejecting URLs whose scheme does not fit `kind`.
    pub fn new(url: impl Into<String>, kind: BackendKind) -> Result<Self> {
        let url = url.into();
        let scheme = classify(&url);

        if scheme == SchemeKind::Unknown {
            return Err(Error::UnsupportedScheme {
                url: redact(&url),
                reason: "expected postgres://, postgresql://, sqlite: or embedded:".to_string(),
            });
        }
        if scheme != kind.expected_scheme() {
            return Err(Error::UnsupportedScheme {
                url: redact(&url),
                reason: format!("{} targets cannot use a {:?} URL", kind, scheme),
            });
        }

        let security = match scheme {
            SchemeKind::NetworkRelational => security_mode(&url),
            _ => SecurityMode::Unspecified,
        };

        Ok(Self {
            url,
            kind,
            security,
        })
    }

    /// The raw connection URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The role of this target.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// The transport-security state of this target.
    pub fn security(&self) -> SecurityMode {
        self.security
    }

    /// Whether this is the embedded fallback store.
    pub fn is_embedded(&self) -> bool {
        self.kind == BackendKind::FallbackEmbedded
    }

    /// URL handed to the database driver. `embedded:` is an alias for `sqlite:`.
    pub fn driver_url(&self) -> String {
        match self.url.split_once(':') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("embedded") => {
                format!("sqlite:{}", rest)
            }
            _ => self.url.clone(),
        }
    }

    /// URL with the password masked, for logs and probe messages.
    pub fn redacted(&self) -> String {
        redact(&self.url)
    }

    /// Derived target with `sslmode=require`.
    pub fn with_security(&self) -> Self {
        if self.is_embedded() {
            return self.clone();
        }
        let url = add_security(&self.url);
        let security = security_mode(&url);
        Self {
            url,
            kind: self.kind,
            security,
        }
    }

    /// Derived target with the `sslmode` parameter removed.
    pub fn without_security(&self) -> Self {
        if self.is_embedded() {
            return self.clone();
        }
        let url = remove_security(&self.url);
        let security = security_mode(&url);
        Self {
            url,
            kind: self.kind,
            security,
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("url", &self.redacted())
            .field("kind", &self.kind)
            .field("security", &self.security)
            .finish()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.redacted(), self.kind)
    }
}
