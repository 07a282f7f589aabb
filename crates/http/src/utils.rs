//! Utility macros and functions for the HTTP crate.
//!
//! This module provides helper macros used internally by the decoders, and the
//! small token/hash helpers shared by the multipart codec and the session layer.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Default length of tokens produced by [`random_token`]
pub const DEFAULT_TOKEN_LEN: usize = 64;

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
///
/// # Example
///
/// ```ignore
/// ensure!(headers.len() < MAX_HEADERS, ParseError::TooManyHeaders);
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Generates a random token of `len` characters drawn from `[0-9A-Za-z]`.
///
/// Used for session identifiers and for the `%r` placeholder of multipart path templates.
pub fn random_token(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// Lowercase hex encoded SHA-256 digest of `data`.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(data.as_ref()))
}
