//! HTTP handlers. Each takes `State<VaultService>` and returns
//! `Result<_, AppError>` where it can fail.

pub mod health_handlers;
pub mod vault_handlers;
