use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::anyhow;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bson::{doc, spec::BinarySubtype, Binary, Document};

use rs_saml::sasl::{self, SamlClient};
use rs_saml::transport::Transport;
use rs_saml::{authenticate, Driver, Error};

/// Replies to commands from a fixed script and keeps what was sent.
struct ScriptedTransport {
    sent: Vec<(String, Document)>,
    replies: VecDeque<anyhow::Result<Document>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<anyhow::Result<Document>>) -> Self {
        Self {
            sent: Vec::new(),
            replies: replies.into(),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn command(&mut self, db: &str, command: Document) -> anyhow::Result<Document> {
        self.sent.push((db.to_string(), command));
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no reply scripted")))
    }
}

/// A mechanism that never runs out of things to say.
struct Chatty {
    steps: usize,
}

impl sasl::Client for Chatty {
    fn mechanism(&self) -> &str {
        "CHATTY"
    }

    fn step(&mut self, _server_payload: Option<&[u8]>) -> rs_saml::Result<Vec<u8>> {
        self.steps += 1;
        Ok(format!("step {}", self.steps).into_bytes())
    }
}

fn bin(bytes: impl Into<Vec<u8>>) -> Binary {
    Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.into(),
    }
}

fn url_challenge(url: &str) -> Binary {
    let mut bytes = Vec::new();
    doc! { "url": general_purpose::URL_SAFE.encode(url) }
        .to_writer(&mut bytes)
        .unwrap();
    bin(bytes)
}

fn reply(done: bool) -> anyhow::Result<Document> {
    Ok(doc! { "conversationId": 1, "payload": bin(b"challenge".to_vec()), "done": done, "ok": 1.0 })
}

#[tokio::test]
async fn signs_in_through_identity_provider() {
    let opened = RefCell::new(Vec::<String>::new());
    let mut transport = ScriptedTransport::new(vec![
        Ok(doc! { "conversationId": 7, "payload": url_challenge("https://idp/x"), "done": false, "ok": 1.0 }),
        Ok(doc! { "conversationId": 7, "payload": bin(Vec::new()), "done": true, "ok": 1.0 }),
    ]);

    authenticate("example.com", &mut transport, |url: &str| {
        opened.borrow_mut().push(url.to_string())
    })
    .await
    .unwrap();

    assert_eq!(transport.sent.len(), 2);

    let (db, start) = &transport.sent[0];
    assert_eq!(db, "$external");
    assert_eq!(
        *start,
        doc! { "saslStart": 1, "mechanism": "SAML20", "payload": bin(b"n,,example.com".to_vec()) }
    );

    let (db, cont) = &transport.sent[1];
    assert_eq!(db, "$external");
    assert_eq!(
        *cont,
        doc! { "saslContinue": 1, "conversationId": 7, "payload": bin(b"PQ==".to_vec()) }
    );

    assert_eq!(*opened.borrow(), vec!["https://idp/x".to_string()]);
}

#[tokio::test]
async fn gives_up_after_ten_rounds() {
    let mut replies: Vec<_> = (0..11).map(|_| reply(false)).collect();
    replies.push(reply(true));
    let mut transport = ScriptedTransport::new(replies);
    let mut client = Chatty { steps: 0 };

    let err = Driver::new().run(&mut client, &mut transport).await.unwrap_err();

    assert!(matches!(err, Error::ProtocolExhausted { rounds: 10 }));
    assert_eq!(transport.sent.len(), 11);
    assert_eq!(client.steps, 11);
}

#[tokio::test]
async fn stops_once_done() {
    let mut transport = ScriptedTransport::new(vec![
        reply(false),
        reply(false),
        reply(false),
        reply(true),
        reply(false),
    ]);
    let mut client = Chatty { steps: 0 };

    Driver::new().run(&mut client, &mut transport).await.unwrap();

    assert_eq!(transport.sent.len(), 4);
    assert_eq!(transport.replies.len(), 1);
    for (_, cont) in &transport.sent[1..] {
        assert_eq!(cont.get_i32("saslContinue").unwrap(), 1);
        assert_eq!(cont.get_i32("conversationId").unwrap(), 1);
    }
}

#[tokio::test]
async fn round_limit_and_source_are_configurable() {
    let mut transport = ScriptedTransport::new((0..10).map(|_| reply(false)).collect());
    let mut client = Chatty { steps: 0 };
    let driver = Driver {
        max_rounds: 3,
        source: "admin".to_string(),
    };

    let err = driver.run(&mut client, &mut transport).await.unwrap_err();

    assert!(matches!(err, Error::ProtocolExhausted { rounds: 3 }));
    assert_eq!(transport.sent.len(), 4);
    assert!(transport.sent.iter().all(|(db, _)| db == "admin"));
}

#[tokio::test]
async fn saml_refuses_a_third_step() {
    let mut transport = ScriptedTransport::new(vec![
        Ok(doc! { "conversationId": 7, "payload": url_challenge("https://idp/x"), "done": false }),
        reply(false),
        reply(true),
    ]);

    let err = authenticate("example.com", &mut transport, |_: &str| {})
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TooManySteps));
    assert_eq!(transport.sent.len(), 2);
}

#[tokio::test]
async fn empty_challenge_fails_without_browser() {
    let opened = RefCell::new(0);
    let mut transport = ScriptedTransport::new(vec![
        Ok(doc! { "conversationId": 7, "done": false }),
        reply(true),
    ]);

    let err = authenticate("example.com", &mut transport, |_: &str| *opened.borrow_mut() += 1)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingPayload));
    assert_eq!(transport.sent.len(), 1);
    assert_eq!(*opened.borrow(), 0);
}

#[tokio::test]
async fn transport_errors_pass_through() {
    let mut transport = ScriptedTransport::new(vec![Err(anyhow!("Authentication failed."))]);
    let err = authenticate("example.com", &mut transport, |_: &str| {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(err.to_string(), "Authentication failed.");
    assert_eq!(transport.sent.len(), 1);

    let opened = RefCell::new(Vec::<String>::new());
    let mut transport = ScriptedTransport::new(vec![
        Ok(doc! { "conversationId": 7, "payload": url_challenge("https://idp/x"), "done": false }),
        Err(anyhow!("connection reset")),
        reply(true),
    ]);
    let err = authenticate("example.com", &mut transport, |url: &str| {
        opened.borrow_mut().push(url.to_string())
    })
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "connection reset");
    assert_eq!(transport.sent.len(), 2);
    assert_eq!(opened.borrow().len(), 1);
}

#[tokio::test]
async fn start_reply_needs_conversation_id() {
    let mut transport = ScriptedTransport::new(vec![
        Ok(doc! { "payload": url_challenge("https://idp/x"), "done": false }),
        reply(true),
    ]);

    let err = authenticate("example.com", &mut transport, |_: &str| {})
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MalformedResponse("conversationId")));
    assert_eq!(transport.sent.len(), 1);
}

#[tokio::test]
async fn continue_reply_needs_done_flag() {
    let mut transport = ScriptedTransport::new(vec![
        Ok(doc! { "conversationId": 7, "payload": url_challenge("https://idp/x"), "done": false }),
        Ok(doc! { "conversationId": 7, "ok": 1.0 }),
    ]);
    let mut client = SamlClient::new("example.com", |_: &str| {});

    let err = Driver::new().run(&mut client, &mut transport).await.unwrap_err();

    assert!(matches!(err, Error::MalformedResponse("done")));
}
