//! Core data model for the vault service.
//!
//! A vault item is either an inline text snippet or a reference to an
//! uploaded file in the blob store. Items map to the `items` table via
//! `sqlx::FromRow` and serialize as the JSON returned to readers.

pub mod vault_record;
