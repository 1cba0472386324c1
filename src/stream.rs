use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{anyhow, Result};

use rustls_pemfile::certs;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;

/// A connection to the server, encrypted or not.
pub enum MyStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MyStream {
    pub fn new(stream: TcpStream) -> Self {
        MyStream::Plain(stream)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, MyStream::Tls(_))
    }

    /// Upgrades a plain connection to TLS, verifying the server as `host`.
    pub async fn starttls(self, connector: TlsConnector, host: &str) -> Result<Self> {
        let stream = match self {
            MyStream::Plain(stream) => stream,
            MyStream::Tls(_) => return Ok(self),
        };

        let name = ServerName::try_from(host).map_err(|_| anyhow!("Invalid server name: {}", host))?;
        let stream = connector.connect(name, stream).await?;
        Ok(MyStream::Tls(Box::new(stream)))
    }
}

/// Builds a TLS connector trusting the certificates in a PEM bundle.
pub fn tls_connector(ca_file: &Path) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        roots
            .add(&cert)
            .map_err(|err| anyhow!("Invalid CA certificate in {}: {:?}", ca_file.display(), err))?;
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let certs = certs(&mut BufReader::new(File::open(path)?))
        .map_err(|_| anyhow!("Invalid certificate file: {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates in {}", path.display()));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

impl AsyncRead for MyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MyStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MyStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MyStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MyStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MyStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MyStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MyStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MyStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
