use anyhow::Result;
use async_trait::async_trait;
use bson::Document;

/// Database that SASL commands for externally verified users are sent to.
pub const EXTERNAL_SOURCE: &str = "$external";

/// Runs database commands on an established connection.
///
/// Each call sends one command and resolves once the server's reply is in.
/// Timeouts and reconnects are the implementation's business.
#[async_trait]
pub trait Transport: Send {
    async fn command(&mut self, db: &str, command: Document) -> Result<Document>;
}

