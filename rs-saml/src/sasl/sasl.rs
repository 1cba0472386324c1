use crate::error::Result;

/// SASL client interface to perform challenge-response authentication.
pub trait Client {
    /// Name sent to the server in `saslStart`.
    fn mechanism(&self) -> &str;

    /// Produces the next client payload. The first call receives `None`;
    /// later calls receive the payload of the server's latest reply.
    ///
    /// An error aborts the conversation.
    fn step(&mut self, server_payload: Option<&[u8]>) -> Result<Vec<u8>>;
}
