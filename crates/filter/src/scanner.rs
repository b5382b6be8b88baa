//! Announcement scanning.
//!
//! Decides from the final response headers whether a dedup lookup is
//! worth issuing. Both preconditions are checked before any cache I/O:
//!
//! 1. the canonical-location header holds an absolute http(s) URL
//! 2. some `Digest` value is `SHA-256=` followed by base64 of 32 bytes

use metalink_core::digest::{DIGEST_LEN, ENCODED_DIGEST_LEN};
use metalink_core::location::parse_absolute;
use metalink_core::{DedupConfig, Digest, Ledger};
use url::Url;

use crate::host::{FieldLoc, ResponseHeaders, SkipReason};

/// Algorithm token of an RFC 3230 instance digest, compared case-insensitively.
pub const SHA256_PREFIX: &str = "SHA-256=";

/// Shortest value that can carry a SHA-256 instance digest.
pub const MIN_DIGEST_VALUE_LEN: usize = SHA256_PREFIX.len() + ENCODED_DIGEST_LEN;

/// A response that announced a canonical location and its content digest.
#[derive(Debug)]
pub struct Announcement {
    /// Held reference to the canonical-location field.
    pub location: FieldLoc,
    /// Parsed canonical URL.
    pub location_url: Url,
    /// Held reference to the matching digest value.
    pub digest_field: FieldLoc,
    /// Declared digest of the canonical resource.
    pub digest: Digest,
}

/// Decode one `Digest` field value, if it is a SHA-256 instance digest.
///
/// The length check runs before the prefix comparison.
pub fn parse_digest_value(value: &str) -> Option<Digest> {
    if value.len() < MIN_DIGEST_VALUE_LEN {
        return None;
    }
    let (algorithm, encoded) = value.split_at_checked(SHA256_PREFIX.len())?;
    if !algorithm.eq_ignore_ascii_case(SHA256_PREFIX) {
        return None;
    }

    let digest = Digest::from_base64(encoded).ok()?;
    debug_assert_eq!(digest.as_bytes().len(), DIGEST_LEN);
    Some(digest)
}

/// Scan response headers for a Metalink announcement.
///
/// Header references taken while scanning are released on every skip.
/// Among several SHA-256 values, the first that decodes wins.
pub fn scan<H>(headers: &H, config: &DedupConfig, ledger: &Ledger) -> Result<Announcement, SkipReason>
where
    H: ResponseHeaders + ?Sized,
{
    let Some(value) = headers.field_value(&config.location_header) else {
        return Err(SkipReason::NoLocation);
    };
    let location = FieldLoc::acquire(&config.location_header, 0, ledger);

    let location_url = match parse_absolute(&value) {
        Ok(url) => url,
        Err(err) => {
            tracing::debug!(location = %value, %err, "unusable location header");
            return Err(SkipReason::InvalidLocation);
        }
    };

    for (index, candidate) in headers.field_values(&config.digest_header).iter().enumerate() {
        let digest_field = FieldLoc::acquire(&config.digest_header, index, ledger);
        match parse_digest_value(candidate) {
            Some(digest) => {
                tracing::debug!(location = %location_url, %digest, index, "metalink announcement found");
                return Ok(Announcement { location, location_url, digest_field, digest });
            }
            None => drop(digest_field),
        }
    }

    Err(SkipReason::NoDigest)
}
