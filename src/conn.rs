use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bson::{Bson, Document};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use rs_saml::transport::Transport;

use crate::options::ClientOptions;
use crate::stream::{tls_connector, MyStream};

const OP_MSG: i32 = 2013;
const HEADER_LEN: usize = 16;
const CHECKSUM_PRESENT: u32 = 1;

/// Largest reply the client is willing to buffer.
pub const MAX_MESSAGE_BYTES: usize = 48 * 1024 * 1024;

/// A single server connection speaking `OP_MSG`.
pub struct Conn<S = MyStream> {
    stream: S,
    next_request_id: i32,
}

impl Conn<MyStream> {
    pub async fn connect(opts: &ClientOptions) -> Result<Self> {
        let addr = (opts.host.as_str(), opts.port);
        let tcp = timeout(opts.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}:{}", opts.host, opts.port))??;

        let mut stream = MyStream::new(tcp);
        if opts.tls {
            let ca_file = opts
                .tls_ca_file
                .as_deref()
                .ok_or_else(|| anyhow!("tls requires tlsCAFile"))?;
            stream = stream.starttls(tls_connector(ca_file)?, &opts.host).await?;
        }

        Ok(Conn::new(stream))
    }

    pub fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Conn<S> {
    pub fn new(stream: S) -> Self {
        Conn {
            stream,
            next_request_id: 1,
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn round_trip(&mut self, body: &Document) -> Result<Document> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        let msg = encode_msg(request_id, body)?;
        self.stream.write_all(&msg).await?;
        self.stream.flush().await?;

        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let header = Header::parse(&header);

        if header.op_code != OP_MSG {
            bail!("Unexpected reply opcode {}", header.op_code);
        }
        if header.response_to != request_id {
            bail!("Reply to request {} while waiting for {}", header.response_to, request_id);
        }
        let len = usize::try_from(header.length).unwrap_or(0);
        if len <= HEADER_LEN || len > MAX_MESSAGE_BYTES {
            bail!("Invalid reply length {}", header.length);
        }

        let mut rest = vec![0u8; len - HEADER_LEN];
        self.stream.read_exact(&mut rest).await?;
        decode_msg(&rest)
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport for Conn<S> {
    async fn command(&mut self, db: &str, mut command: Document) -> Result<Document> {
        command.insert("$db", db);
        trace!("conn: sending {} to {}", command.keys().next().map(String::as_str).unwrap_or(""), db);

        let reply = self.round_trip(&command).await?;
        if !is_ok(&reply) {
            let errmsg = reply.get_str("errmsg").unwrap_or("command failed");
            return match reply.get("code") {
                Some(code) => Err(anyhow!("{} (code {})", errmsg, code)),
                None => Err(anyhow!("{}", errmsg)),
            };
        }
        Ok(reply)
    }
}

struct Header {
    length: i32,
    response_to: i32,
    op_code: i32,
}

impl Header {
    fn parse(buf: &[u8; HEADER_LEN]) -> Self {
        let field = |at: usize| i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Header {
            length: field(0),
            response_to: field(8),
            op_code: field(12),
        }
    }
}

fn encode_msg(request_id: i32, body: &Document) -> Result<Vec<u8>> {
    let mut msg = vec![0u8; HEADER_LEN];
    msg.extend_from_slice(&0u32.to_le_bytes());
    msg.push(0);
    body.to_writer(&mut msg)?;

    let len = i32::try_from(msg.len())?;
    msg[0..4].copy_from_slice(&len.to_le_bytes());
    msg[4..8].copy_from_slice(&request_id.to_le_bytes());
    msg[12..16].copy_from_slice(&OP_MSG.to_le_bytes());
    Ok(msg)
}

/// Returns the body section of an `OP_MSG` (everything after the header).
fn decode_msg(msg: &[u8]) -> Result<Document> {
    if msg.len() < 5 {
        bail!("Truncated reply");
    }
    let flags = u32::from_le_bytes([msg[0], msg[1], msg[2], msg[3]]);
    let mut sections = &msg[4..];
    if flags & CHECKSUM_PRESENT != 0 {
        if sections.len() < 4 {
            bail!("Truncated reply");
        }
        sections = &sections[..sections.len() - 4];
    }

    while let Some((&kind, rest)) = sections.split_first() {
        match kind {
            0 => {
                let mut body = rest;
                return Ok(Document::from_reader(&mut body)?);
            }
            1 => {
                if rest.len() < 4 {
                    bail!("Truncated document sequence");
                }
                let size = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
                let size = usize::try_from(size).map_err(|_| anyhow!("Invalid section size"))?;
                if size < 4 || size > rest.len() {
                    bail!("Invalid section size {}", size);
                }
                sections = &rest[size..];
            }
            _ => bail!("Unknown section kind {}", kind),
        }
    }

    bail!("Reply has no body")
}

fn is_ok(reply: &Document) -> bool {
    match reply.get("ok") {
        Some(Bson::Double(ok)) => *ok == 1.0,
        Some(Bson::Int32(ok)) => *ok == 1,
        Some(Bson::Int64(ok)) => *ok == 1,
        Some(Bson::Boolean(ok)) => *ok,
        _ => false,
    }
}
