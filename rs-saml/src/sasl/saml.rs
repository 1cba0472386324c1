use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use bson::Bson;
use log::{debug, trace};

use crate::browser::UrlOpener;
use crate::codec::{BsonCodec, DocumentCodec};
use crate::error::{Error, Result};
use crate::sasl;

/// The SAML20 mechanism name.
pub const SAML20: &str = "SAML20";

/// Body of the final client message, sent base64 encoded once the sign-in
/// URL has been handed off.
const ACK: &str = "=";

/// Servers are not consistent about padding the redirect URL.
const URL_SAFE_ANY_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotStarted,
    AwaitingServerReply,
    Completed,
    Failed,
}

/// Client side of a SAML20 conversation.
///
/// The first step announces the domain the identity provider is bound to.
/// The second step reads the redirect URL out of the server's challenge and
/// opens it for the user; the server later reports `done` once the identity
/// provider has vouched for them. A conversation is good for one attempt:
/// any further step fails with [`Error::TooManySteps`].
pub struct SamlClient<O: UrlOpener, D: DocumentCodec = BsonCodec> {
    domain: String,
    step: u32,
    state: State,
    opener: O,
    codec: D,
}

impl<O: UrlOpener> SamlClient<O> {
    pub fn new(domain: impl Into<String>, opener: O) -> Self {
        Self::with_codec(domain, opener, BsonCodec)
    }
}

impl<O: UrlOpener, D: DocumentCodec> SamlClient<O, D> {
    pub fn with_codec(domain: impl Into<String>, opener: O, codec: D) -> Self {
        Self {
            domain: domain.into(),
            step: 0,
            state: State::NotStarted,
            opener,
            codec,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of times `step` has been called, failed calls included.
    pub fn steps_taken(&self) -> u32 {
        self.step
    }

    fn first_payload(&self) -> Vec<u8> {
        format!("n,,{}", self.domain).into_bytes()
    }

    fn second_payload(&self, server_payload: Option<&[u8]>) -> Result<Vec<u8>> {
        let server_payload = match server_payload {
            Some(payload) if !payload.is_empty() => payload,
            _ => return Err(Error::MissingPayload),
        };

        let url = self.redirect_url(server_payload)?;
        debug!("saml: handing sign-in for {} to the identity provider", self.domain);
        self.opener.open(&url);

        Ok(general_purpose::STANDARD.encode(ACK).into_bytes())
    }

    fn redirect_url(&self, server_payload: &[u8]) -> Result<String> {
        let doc = self
            .codec
            .decode(server_payload)
            .map_err(|err| Error::MalformedPayload(err.to_string()))?;

        let encoded = match doc.get("url") {
            Some(Bson::String(url)) => url.as_bytes(),
            Some(Bson::Binary(url)) => url.bytes.as_slice(),
            Some(other) => {
                return Err(Error::MalformedPayload(format!(
                    "`url` has unexpected type {:?}",
                    other.element_type()
                )))
            }
            None => return Err(Error::MalformedPayload("missing `url`".to_string())),
        };

        let url = URL_SAFE_ANY_PAD
            .decode(encoded)
            .map_err(|err| Error::MalformedPayload(format!("`url` is not base64url: {}", err)))?;
        String::from_utf8(url).map_err(|_| Error::MalformedPayload("`url` is not UTF-8".to_string()))
    }
}

impl<O: UrlOpener, D: DocumentCodec> sasl::Client for SamlClient<O, D> {
    fn mechanism(&self) -> &str {
        SAML20
    }

    fn step(&mut self, server_payload: Option<&[u8]>) -> Result<Vec<u8>> {
        self.step += 1;
        trace!("saml: step {} ({:?})", self.step, self.state);

        let res = match self.state {
            State::NotStarted => Ok((self.first_payload(), State::AwaitingServerReply)),
            State::AwaitingServerReply => self
                .second_payload(server_payload)
                .map(|payload| (payload, State::Completed)),
            State::Completed | State::Failed => Err(Error::TooManySteps),
        };

        match res {
            Ok((payload, next)) => {
                self.state = next;
                Ok(payload)
            }
            Err(err) => {
                self.state = State::Failed;
                Err(err)
            }
        }
    }
}
