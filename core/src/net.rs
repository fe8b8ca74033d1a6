/*
 * net.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Mailgate, a stateless mail retrieval gateway.
 *
 * Mailgate is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Mailgate is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Mailgate.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Transport plumbing: plain TCP, implicit TLS and STARTTLS upgrade over tokio-rustls.
//!
//! Sessions never open sockets themselves. They go through a [`Connector`], which
//! keeps the protocol code independent of the transport and lets tests substitute
//! an in-memory stream.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;

/// Opens connections for a session and upgrades them to TLS on request.
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Connect to `host:port`. With `implicit_tls` the TLS handshake runs before
    /// anything is read from the server.
    fn connect(
        &self,
        host: &str,
        port: u16,
        implicit_tls: bool,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// Upgrade a plain stream after the server accepted STLS / STARTTLS.
    fn upgrade(
        &self,
        stream: Self::Stream,
        host: &str,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Platform native certs first, then webpki-roots when the platform store is empty.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

static DEFAULT_CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();

fn tls_connector() -> &'static TlsConnector {
    DEFAULT_CONNECTOR.get_or_init(|| {
        let config = ClientConfig::builder()
            .with_root_certificates(build_root_store())
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    })
}

fn server_name(host: &str) -> io::Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))
}

async fn handshake(tcp: TcpStream, host: &str) -> io::Result<TlsStream<TcpStream>> {
    let name = server_name(host)?;
    tls_connector().connect(name, tcp).await
}

/// Plain TCP or TLS stream to a mail server.
pub enum MailStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MailStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, MailStream::Tls(_))
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Real network connector (tokio TCP + rustls).
#[derive(Debug, Default, Clone, Copy)]
pub struct NetConnector;

impl Connector for NetConnector {
    type Stream = MailStream;

    async fn connect(&self, host: &str, port: u16, implicit_tls: bool) -> io::Result<MailStream> {
        let tcp = TcpStream::connect((host, port)).await?;
        if implicit_tls {
            let tls = handshake(tcp, host).await?;
            Ok(MailStream::Tls(Box::new(tls)))
        } else {
            Ok(MailStream::Plain(tcp))
        }
    }

    async fn upgrade(&self, stream: MailStream, host: &str) -> io::Result<MailStream> {
        match stream {
            MailStream::Plain(tcp) => {
                let tls = handshake(tcp, host).await?;
                Ok(MailStream::Tls(Box::new(tls)))
            }
            tls @ MailStream::Tls(_) => Ok(tls),
        }
    }
}
