use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use thiserror::Error;

use crate::clock::{Clock, System, UnixTime};
use crate::AccessTokenRef;

/// The validity window of an access token, as declared by its own claims
///
/// Decoding does not verify the token's signature. The result is only ever used
/// to decide when to ask the authority for a fresh token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLifetime {
    issued: UnixTime,
    expiry: UnixTime,
}

/// Reasons an access token's lifetime could not be determined
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// The token does not have the three dot-separated segments of a JWT
    #[error("access token is not a JWT")]
    NotAJwt,
    /// The payload segment is not valid base64url
    #[error("access token payload is not valid base64url")]
    Encoding(#[from] base64::DecodeError),
    /// The payload is not a JSON object with numeric dates
    #[error("access token payload is not valid JSON")]
    Json(#[from] serde_json::Error),
    /// A claim required to compute the lifetime is absent
    #[error("access token is missing the `{0}` claim")]
    MissingClaim(&'static str),
}

#[derive(Deserialize)]
struct LifetimeClaims {
    #[serde(default)]
    iat: Option<f64>,
    #[serde(default)]
    exp: Option<f64>,
}

// Fractional seconds are dropped; negative dates clamp to the epoch.
fn numeric_date(secs: f64) -> UnixTime {
    UnixTime(secs.max(0.0) as u64)
}

impl TokenLifetime {
    /// Constructs a lifetime from explicit bounds
    pub const fn new(issued: UnixTime, expiry: UnixTime) -> Self {
        Self { issued, expiry }
    }

    /// Reads the `iat` and `exp` claims from an access token
    pub fn decode(token: &AccessTokenRef) -> Result<Self, ClaimsError> {
        let mut segments = token.as_str().split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
            _ => return Err(ClaimsError::NotAJwt),
        };

        let raw = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        let claims: LifetimeClaims = serde_json::from_slice(&raw)?;

        let issued = claims.iat.ok_or(ClaimsError::MissingClaim("iat"))?;
        let expiry = claims.exp.ok_or(ClaimsError::MissingClaim("exp"))?;

        Ok(Self {
            issued: numeric_date(issued),
            expiry: numeric_date(expiry),
        })
    }

    /// Gets the time that the token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Whether the token is no longer valid at `now`
    #[inline]
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        now >= self.expiry
    }

    /// The share of the token's total validity window still ahead of `now`
    ///
    /// Negative once the token has expired. A token whose expiry is not after
    /// its issue time has no remaining lifetime.
    pub fn remaining_ratio_at(&self, now: UnixTime) -> f64 {
        let total = self.expiry.0 as f64 - self.issued.0 as f64;
        if total <= 0.0 {
            return 0.0;
        }

        (self.expiry.0 as f64 - now.0 as f64) / total
    }
}

/// Decides when a cached access token should be exchanged for a new one
#[derive(Clone, Debug)]
pub struct RefreshPolicy<C = System> {
    threshold: f64,
    clock: C,
}

impl Default for RefreshPolicy {
    /// Refreshes once half of the token's lifetime has elapsed, using the
    /// system clock.
    fn default() -> Self {
        Self {
            threshold: 0.5,
            clock: System,
        }
    }
}

impl RefreshPolicy {
    /// Constructs a policy that refreshes once the remaining share of a token's
    /// lifetime drops below `threshold`
    ///
    /// Expired tokens are refreshed whatever the threshold.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            clock: System,
        }
    }
}

impl<C> RefreshPolicy<C> {
    /// Replaces the clock used to judge freshness
    pub fn with_clock<D>(self, clock: D) -> RefreshPolicy<D> {
        RefreshPolicy {
            threshold: self.threshold,
            clock,
        }
    }

    /// The remaining-lifetime ratio below which a token is refreshed
    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl<C: Clock> RefreshPolicy<C> {
    /// Whether `token` should be replaced
    ///
    /// Tokens whose lifetime cannot be read are always due for replacement.
    pub fn needs_refresh(&self, token: &AccessTokenRef) -> bool {
        match TokenLifetime::decode(token) {
            Ok(lifetime) => {
                let now = self.clock.now();
                let remaining = lifetime.remaining_ratio_at(now);

                tracing::trace!(
                    token.issued = lifetime.issued().0,
                    token.expiry = lifetime.expiry().0,
                    token.remaining = remaining,
                    threshold = self.threshold,
                    "evaluated access token freshness"
                );

                lifetime.is_expired_at(now) || remaining < self.threshold
            }
            Err(error) => {
                tracing::trace!(
                    error = (&error as &dyn std::error::Error),
                    "unable to read access token lifetime"
                );
                true
            }
        }
    }
}
