use bson::{doc, spec::BinarySubtype, Binary, Bson, Document};
use log::{debug, trace};

use crate::browser::UrlOpener;
use crate::codec::DocumentCodec;
use crate::error::{Error, Result};
use crate::sasl::{self, SamlClient};
use crate::transport::{Transport, EXTERNAL_SOURCE};

/// Continue rounds allowed before a conversation is given up on.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Drives a SASL conversation over a [`Transport`].
pub struct Driver {
    /// Upper bound on `saslContinue` round trips after `saslStart`.
    pub max_rounds: usize,
    /// Database the SASL commands are run against.
    pub source: String,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver {
    pub fn new() -> Self {
        Driver {
            max_rounds: DEFAULT_MAX_ROUNDS,
            source: EXTERNAL_SOURCE.to_string(),
        }
    }

    /// Runs `client` to completion. Errors from the client or the
    /// transport end the conversation as they are.
    pub async fn run<C, T>(&self, client: &mut C, transport: &mut T) -> Result<()>
    where
        C: sasl::Client + ?Sized,
        T: Transport + ?Sized,
    {
        let payload = client.step(None)?;
        let start = doc! {
            "saslStart": 1,
            "mechanism": client.mechanism(),
            "payload": binary(payload),
        };
        debug!("sasl: starting {} conversation", client.mechanism());
        let mut res = transport.command(&self.source, start).await?;

        let conversation_id = res
            .get("conversationId")
            .cloned()
            .ok_or(Error::MalformedResponse("conversationId"))?;

        for round in 1..=self.max_rounds {
            let payload = client.step(Some(server_payload(&res).as_slice()))?;
            let cont = doc! {
                "saslContinue": 1,
                "conversationId": conversation_id.clone(),
                "payload": binary(payload),
            };
            res = transport.command(&self.source, cont).await?;

            let done = res
                .get_bool("done")
                .map_err(|_| Error::MalformedResponse("done"))?;
            trace!("sasl: round {} done={}", round, done);

            if done {
                debug!("sasl: {} conversation complete", client.mechanism());
                return Ok(());
            }
        }

        Err(Error::ProtocolExhausted {
            rounds: self.max_rounds,
        })
    }
}

/// Authenticates as `username` with SAML20, handing the identity
/// provider's sign-in page to `opener`.
pub async fn authenticate<T, O>(username: &str, transport: &mut T, opener: O) -> Result<()>
where
    T: Transport + ?Sized,
    O: UrlOpener,
{
    let mut client = SamlClient::new(username, opener);
    Driver::new().run(&mut client, transport).await
}

pub async fn authenticate_with_codec<T, O, D>(
    username: &str,
    transport: &mut T,
    opener: O,
    codec: D,
) -> Result<()>
where
    T: Transport + ?Sized,
    O: UrlOpener,
    D: DocumentCodec,
{
    let mut client = SamlClient::with_codec(username, opener, codec);
    Driver::new().run(&mut client, transport).await
}

fn binary(bytes: Vec<u8>) -> Binary {
    Binary {
        subtype: BinarySubtype::Generic,
        bytes,
    }
}

fn server_payload(res: &Document) -> Vec<u8> {
    match res.get("payload") {
        Some(Bson::Binary(payload)) => payload.bytes.clone(),
        _ => Vec::new(),
    }
}
