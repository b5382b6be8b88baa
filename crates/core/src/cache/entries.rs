//! Entry operations on the persistent store.
//!
//! Provides the read/write protocol used by the dedup pipeline plus the
//! lookup and purge queries used by operators.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use super::{BufferedReader, CacheKey, CacheReader, CacheWriter, ContentAddressableCache, KeyKind};
use crate::Error;
use crate::digest::Digest;

/// A stored entry, as shown to operators.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DedupRecord {
    /// Base64 SHA-256 the entry is keyed by.
    pub digest: String,
    /// `content` for dedup records, `url` for URL-keyed entries.
    pub kind: String,
    /// The stored value, decoded as UTF-8 (lossy).
    pub value: String,
    /// RFC 3339 time the entry was committed.
    pub created_at: String,
}

impl CacheDb {
    /// Insert or replace an entry.
    pub async fn put_entry(&self, digest: Digest, kind: KeyKind, value: Vec<u8>) -> Result<(), Error> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO entries (key, kind, value, created_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(kind, key) DO UPDATE SET
                        value = excluded.value,
                        created_at = excluded.created_at",
                    params![digest.as_bytes().to_vec(), kind.as_str(), value, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get the raw value stored under a digest of the given kind.
    ///
    /// Returns None if no such entry exists.
    pub async fn get_value(&self, kind: KeyKind, digest: &Digest) -> Result<Option<Vec<u8>>, Error> {
        let key = digest.as_bytes().to_vec();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let result = conn.query_row(
                    "SELECT value FROM entries WHERE kind = ?1 AND key = ?2",
                    params![kind.as_str(), key],
                    |row| row.get(0),
                );

                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Get an entry with its metadata.
    pub async fn get_record(&self, kind: KeyKind, digest: &Digest) -> Result<Option<DedupRecord>, Error> {
        let key = digest.as_bytes().to_vec();
        let encoded = digest.to_base64();
        self.conn
            .call(move |conn| -> Result<Option<DedupRecord>, Error> {
                let result = conn.query_row(
                    "SELECT kind, value, created_at FROM entries WHERE kind = ?1 AND key = ?2",
                    params![kind.as_str(), key],
                    |row| {
                        let value: Vec<u8> = row.get(1)?;
                        Ok(DedupRecord {
                            digest: encoded.clone(),
                            kind: row.get(0)?,
                            value: String::from_utf8_lossy(&value).into_owned(),
                            created_at: row.get(2)?,
                        })
                    },
                );

                match result {
                    Ok(record) => Ok(Some(record)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Count entries of one kind.
    pub async fn count_entries(&self, kind: KeyKind) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE kind = ?1",
                    params![kind.as_str()],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete dedup records committed more than `days` days ago.
    ///
    /// Returns the number of deleted entries. Fails with `InvalidInput` when
    /// the cutoff falls outside the representable date range.
    pub async fn purge_records_older_than(&self, days: i64) -> Result<u64, Error> {
        let Some(cutoff) = purge_cutoff(Utc::now(), days)? else {
            return Ok(0);
        };
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE kind = 'content' AND created_at < ?1",
                    params![cutoff],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete dedup records whose recorded URL matches a domain pattern.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_records_by_domain(&self, domain: &str) -> Result<u64, Error> {
        let pattern = format!("%{domain}%");
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE kind = 'content' AND CAST(value AS TEXT) LIKE ?1",
                    params![pattern],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

/// RFC 3339 cutoff for an age-based purge, or None when it predates every
/// possible record.
fn purge_cutoff(now: DateTime<Utc>, days: i64) -> Result<Option<String>, Error> {
    let cutoff = TimeDelta::try_days(days)
        .and_then(|age| now.checked_sub_signed(age))
        .filter(|cutoff| cutoff.year() <= 9999)
        .ok_or_else(|| Error::InvalidInput(format!("purge age of {days} days is out of range")))?;

    if cutoff < DateTime::<Utc>::UNIX_EPOCH {
        return Ok(None);
    }
    Ok(Some(cutoff.to_rfc3339()))
}

#[async_trait]
impl ContentAddressableCache for CacheDb {
    async fn open_write(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, Error> {
        Ok(Box::new(DbWriter {
            db: self.clone(),
            digest: *key.digest(),
            kind: key.kind(),
            buf: Vec::new(),
            closed: false,
        }))
    }

    async fn open_read(&self, key: &CacheKey) -> Result<Box<dyn CacheReader>, Error> {
        let value = self
            .get_value(key.kind(), key.digest())
            .await?
            .ok_or_else(|| Error::CacheMiss(key.digest().to_hex()))?;
        Ok(Box::new(BufferedReader::new(Bytes::from(value))))
    }
}

struct DbWriter {
    db: CacheDb,
    digest: Digest,
    kind: KeyKind,
    buf: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl CacheWriter for DbWriter {
    async fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        if self.closed {
            return Err(Error::CacheUnavailable(format!("write handle for {} already closed", self.digest)));
        }
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::CacheUnavailable(format!("write handle for {} already closed", self.digest)));
        }
        self.closed = true;
        self.db.put_entry(self.digest, self.kind, std::mem::take(&mut self.buf)).await
    }
}
