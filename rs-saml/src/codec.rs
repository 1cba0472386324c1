use anyhow::Result;
use bson::Document;

/// Turns a server payload into a document.
pub trait DocumentCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Document>;
}

/// Reads payloads as BSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonCodec;

impl DocumentCodec for BsonCodec {
    fn decode(&self, mut bytes: &[u8]) -> Result<Document> {
        Ok(Document::from_reader(&mut bytes)?)
    }
}
