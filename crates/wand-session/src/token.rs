//! Random identifiers: link tokens and session ids.
//!
//! Both are 32 bytes from the OS random source, URL-safe base64 encoded
//! (with padding). The encoded length is fixed, and the proxy relies on
//! that: a request path `/<segment>` is treated as a redemption attempt
//! only when `segment` is exactly [`TOKEN_LEN`] characters of the token
//! alphabet.
//!
//! Tokens are bearer secrets. Their `Display` and `Debug` impls print a
//! short prefix only, so logging one with `%token` or `?token` never
//! leaks a redeemable value.

use std::borrow::Borrow;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::SessionError;

/// Number of random bytes behind every token and session id.
pub const TOKEN_BYTES: usize = 32;

/// Length of an encoded token: padded base64 of [`TOKEN_BYTES`] bytes.
pub const TOKEN_LEN: usize = encoded_len(TOKEN_BYTES);

/// How many leading characters `Display`/`Debug` reveal.
const SHOWN_PREFIX: usize = 6;

const fn encoded_len(bytes: usize) -> usize {
    bytes.div_ceil(3) * 4
}

/// Returns `true` if `segment` looks like a token: the exact encoded
/// length and only URL-safe base64 characters.
pub fn is_token_shaped(segment: &str) -> bool {
    segment.len() == TOKEN_LEN
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'='))
}

// ---------------------------------------------------------------------------
// RandomSource
// ---------------------------------------------------------------------------

/// Supplies cryptographically secure random bytes.
pub trait RandomSource: Send + Sync + 'static {
    /// Fills `buf` entirely, or fails with [`SessionError::Entropy`].
    fn fill(&self, buf: &mut [u8]) -> Result<(), SessionError>;
}

/// The operating system's random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), SessionError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| SessionError::Entropy(e.to_string()))
    }
}

fn generate(random: &dyn RandomSource) -> Result<String, SessionError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    random.fill(&mut bytes)?;
    Ok(URL_SAFE.encode(bytes))
}

// ---------------------------------------------------------------------------
// Identifier newtypes
// ---------------------------------------------------------------------------

macro_rules! secret_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh identifier from `random`.
            pub fn generate(random: &dyn RandomSource) -> Result<Self, SessionError> {
                generate(random).map(Self)
            }

            /// The full encoded value. This is the secret; don't log it.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let shown = self.0.get(..SHOWN_PREFIX).unwrap_or(&self.0);
                write!(f, "{shown}…")
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }
    };
}

secret_id! {
    /// The public, single-purpose secret embedded in an issued link URL.
    LinkToken
}

secret_id! {
    /// Identifies a live session. Travels in the session cookie.
    SessionId
}
