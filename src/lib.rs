//! Unattended PostgreSQL backup pipeline.
//!
//! One run dumps a database with `pg_dump` (directory format), packs the
//! dump into a timestamped `.tar.gz`, removes the uncompressed dump, and
//! optionally ships the archive to an S3-compatible object store. The
//! binary exits 0 on full success and 1 on any stage failure; the failed
//! stage is reported through logs.

pub mod backup;
pub mod config;
pub mod errors;
