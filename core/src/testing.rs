/*
 * testing.rs
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

//! In-memory test doubles: a [`Connector`] over `tokio::io::duplex` that counts
//! connections, upgrades and shutdowns, and scripted POP3 / IMAP servers serving a
//! shared fixture mailbox.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use base64::Engine;
use tokio::io::{
    duplex, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream, DuplexStream, ReadBuf,
};

use crate::net::Connector;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

/// One message as stored by both fake servers.
#[derive(Debug, Clone)]
pub struct FixtureMessage {
    pub uidl: String,
    pub uid: u32,
    pub raw: Vec<u8>,
}

impl FixtureMessage {
    /// Header block including the blank line that ends it.
    pub fn header_block(&self) -> &[u8] {
        match self.raw.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(i) => &self.raw[..i + 4],
            None => &self.raw,
        }
    }
}

/// `n` plain-text messages, oldest first. Message `i` has UIDL `uidl-i` and UID `100 + i`.
pub fn fixture_mailbox(n: u32) -> Vec<FixtureMessage> {
    (1..=n)
        .map(|i| {
            let raw = format!(
                "From: \"Sender {i}\" <sender{i}@example.com>\r\n\
To: alice@example.com\r\n\
Subject: Message {i}\r\n\
Date: Mon, 1 Sep 2025 09:{min:02}:00 +0000\r\n\
Message-ID: <{i}@example.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Body of message {i}\r\n",
                i = i,
                min = i % 60,
            );
            FixtureMessage {
                uidl: format!("uidl-{}", i),
                uid: 100 + i,
                raw: raw.into_bytes(),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Pop3Behavior {
    pub offer_stls: bool,
    /// Answer `-ERR` to TOP for this message number.
    pub fail_top_for: Option<u32>,
}

impl Default for Pop3Behavior {
    fn default() -> Self {
        Self {
            offer_stls: true,
            fail_top_for: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImapBehavior {
    pub offer_starttls: bool,
    pub login_disabled: bool,
    /// End header FETCH with a tagged NO after this many responses.
    pub fail_fetch_after: Option<usize>,
    /// Greet with `* PREAUTH` and answer BAD to any login attempt.
    pub preauth: bool,
    /// Announce a header literal larger than any client should accept.
    pub oversized_literal: bool,
}

impl Default for ImapBehavior {
    fn default() -> Self {
        Self {
            offer_starttls: true,
            login_disabled: false,
            fail_fetch_after: None,
            preauth: false,
            oversized_literal: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Protocol {
    Pop3,
    Imap,
}

/// Scripted server for one protocol. Each connection gets a fresh task.
#[derive(Debug, Clone)]
pub struct FakeServer {
    protocol: Protocol,
    mailbox: Arc<Vec<FixtureMessage>>,
    pop3: Pop3Behavior,
    imap: ImapBehavior,
}

impl FakeServer {
    pub fn pop3(mailbox: Vec<FixtureMessage>) -> Self {
        Self::with_protocol(Protocol::Pop3, mailbox)
    }

    pub fn imap(mailbox: Vec<FixtureMessage>) -> Self {
        Self::with_protocol(Protocol::Imap, mailbox)
    }

    fn with_protocol(protocol: Protocol, mailbox: Vec<FixtureMessage>) -> Self {
        Self {
            protocol,
            mailbox: Arc::new(mailbox),
            pop3: Pop3Behavior::default(),
            imap: ImapBehavior::default(),
        }
    }

    pub fn with_pop3_behavior(mut self, behavior: Pop3Behavior) -> Self {
        self.pop3 = behavior;
        self
    }

    pub fn with_imap_behavior(mut self, behavior: ImapBehavior) -> Self {
        self.imap = behavior;
        self
    }

    async fn serve(self, stream: DuplexStream, state: Arc<ConnState>) {
        let mut s = BufStream::new(stream);
        let _ = match self.protocol {
            Protocol::Pop3 => self.serve_pop3(&mut s, &state).await,
            Protocol::Imap => self.serve_imap(&mut s, &state).await,
        };
    }

    async fn serve_pop3(&self, s: &mut BufStream<DuplexStream>, state: &ConnState) -> io::Result<()> {
        send(s, b"+OK fake POP3 ready\r\n").await?;
        let mut user_ok = false;
        loop {
            let Some(cmd) = recv(s).await? else {
                return Ok(());
            };
            state.record(&cmd);
            let (verb, arg) = cmd.split_once(' ').unwrap_or((cmd.as_str(), ""));
            let find = |n: &str| {
                n.parse::<usize>()
                    .ok()
                    .filter(|&n| n >= 1)
                    .and_then(|n| self.mailbox.get(n - 1).map(|m| (n, m)))
            };
            match verb.to_ascii_uppercase().as_str() {
                "CAPA" => {
                    let mut caps = String::from("USER\r\nUIDL\r\nTOP\r\n");
                    if self.pop3.offer_stls {
                        caps.push_str("STLS\r\n");
                    }
                    send_multiline(s, caps.as_bytes()).await?;
                }
                "STLS" => send(s, b"+OK begin TLS\r\n").await?,
                "USER" => {
                    user_ok = arg == USER;
                    send(s, b"+OK\r\n").await?;
                }
                "PASS" if user_ok && arg == PASSWORD => send(s, b"+OK logged in\r\n").await?,
                "PASS" => send(s, b"-ERR [AUTH] invalid credentials\r\n").await?,
                "STAT" => {
                    let size: usize = self.mailbox.iter().map(|m| m.raw.len()).sum();
                    send(s, format!("+OK {} {}\r\n", self.mailbox.len(), size).as_bytes()).await?;
                }
                "UIDL" if arg.is_empty() => {
                    let listing: String = self
                        .mailbox
                        .iter()
                        .enumerate()
                        .map(|(i, m)| format!("{} {}\r\n", i + 1, m.uidl))
                        .collect();
                    send_multiline(s, listing.as_bytes()).await?;
                }
                "UIDL" => match find(arg) {
                    Some((n, m)) => send(s, format!("+OK {} {}\r\n", n, m.uidl).as_bytes()).await?,
                    None => send(s, b"-ERR no such message\r\n").await?,
                },
                "TOP" => {
                    let msg_no = arg.split_whitespace().next().unwrap_or("");
                    match find(msg_no) {
                        Some((n, _)) if self.pop3.fail_top_for == Some(n as u32) => {
                            send(s, b"-ERR cannot read message\r\n").await?
                        }
                        Some((_, m)) => send_multiline(s, m.header_block()).await?,
                        None => send(s, b"-ERR no such message\r\n").await?,
                    }
                }
                "RETR" => match find(arg) {
                    Some((_, m)) => send_multiline(s, &m.raw).await?,
                    None => send(s, b"-ERR no such message\r\n").await?,
                },
                "RSET" => send(s, b"+OK\r\n").await?,
                "QUIT" => {
                    send(s, b"+OK bye\r\n").await?;
                    return Ok(());
                }
                _ => send(s, b"-ERR unknown command\r\n").await?,
            }
        }
    }

    async fn serve_imap(&self, s: &mut BufStream<DuplexStream>, state: &ConnState) -> io::Result<()> {
        if self.imap.preauth {
            send(s, b"* PREAUTH fake IMAP ready\r\n").await?;
        } else {
            send(s, b"* OK fake IMAP ready\r\n").await?;
        }
        loop {
            let Some(line) = recv(s).await? else {
                return Ok(());
            };
            let (tag, cmd) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            state.record(cmd);
            let mut words = cmd.split_whitespace();
            let verb = words.next().unwrap_or("").to_ascii_uppercase();
            match verb.as_str() {
                "CAPABILITY" => {
                    let mut caps = String::from("* CAPABILITY IMAP4rev1 AUTH=PLAIN");
                    if self.imap.offer_starttls {
                        caps.push_str(" STARTTLS");
                    }
                    if self.imap.login_disabled {
                        caps.push_str(" LOGINDISABLED");
                    }
                    send(s, format!("{}\r\n{} OK done\r\n", caps, tag).as_bytes()).await?;
                }
                "LOGIN" | "AUTHENTICATE" if self.imap.preauth => {
                    send(s, format!("{} BAD already authenticated\r\n", tag).as_bytes()).await?
                }
                "STARTTLS" => send(s, format!("{} OK begin TLS\r\n", tag).as_bytes()).await?,
                "LOGIN" => {
                    let quoted: Vec<&str> = cmd.split('"').collect();
                    let ok = !self.imap.login_disabled
                        && quoted.get(1) == Some(&USER)
                        && quoted.get(3) == Some(&PASSWORD);
                    self.auth_result(s, tag, ok).await?;
                }
                "AUTHENTICATE" => {
                    send(s, b"+ \r\n").await?;
                    let token = recv(s).await?.unwrap_or_default();
                    let decoded = base64::engine::general_purpose::STANDARD
                        .decode(token.trim())
                        .unwrap_or_default();
                    let parts: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
                    let ok = parts.len() == 3
                        && parts[1] == USER.as_bytes()
                        && parts[2] == PASSWORD.as_bytes();
                    self.auth_result(s, tag, ok).await?;
                }
                "EXAMINE" => {
                    let reply = format!(
                        "* {} EXISTS\r\n* 0 RECENT\r\n* OK [UIDVALIDITY 1] ok\r\n{} OK [READ-ONLY] done\r\n",
                        self.mailbox.len(),
                        tag
                    );
                    send(s, reply.as_bytes()).await?;
                }
                "FETCH" => {
                    let range = words.next().unwrap_or("");
                    self.fetch_headers(s, tag, range).await?;
                }
                "UID" => {
                    let uid: u32 = words.nth(1).and_then(|w| w.parse().ok()).unwrap_or(0);
                    if let Some((i, m)) = self.mailbox.iter().enumerate().find(|(_, m)| m.uid == uid) {
                        let mut out = format!("* {} FETCH (UID {} BODY[] {{{}}}\r\n", i + 1, m.uid, m.raw.len())
                            .into_bytes();
                        out.extend_from_slice(&m.raw);
                        out.extend_from_slice(b")\r\n");
                        send(s, &out).await?;
                    }
                    send(s, format!("{} OK done\r\n", tag).as_bytes()).await?;
                }
                "LOGOUT" => {
                    send(s, format!("* BYE\r\n{} OK done\r\n", tag).as_bytes()).await?;
                    return Ok(());
                }
                _ => send(s, format!("{} BAD unknown command\r\n", tag).as_bytes()).await?,
            }
        }
    }

    async fn auth_result(&self, s: &mut BufStream<DuplexStream>, tag: &str, ok: bool) -> io::Result<()> {
        let reply = if ok {
            format!("{} OK logged in\r\n", tag)
        } else {
            format!("{} NO [AUTHENTICATIONFAILED] invalid credentials\r\n", tag)
        };
        send(s, reply.as_bytes()).await
    }

    /// Header FETCH over `a:b`, ascending. Even sequence numbers put UID after the
    /// literal, as some servers do.
    async fn fetch_headers(&self, s: &mut BufStream<DuplexStream>, tag: &str, range: &str) -> io::Result<()> {
        let (a, b) = range.split_once(':').unwrap_or((range, range));
        let a: usize = a.parse().unwrap_or(1);
        let b: usize = b.parse().unwrap_or(a);
        let (lo, hi) = (a.min(b).max(1), a.max(b).min(self.mailbox.len()));
        for (sent, seq) in (lo..=hi).enumerate() {
            if self.imap.fail_fetch_after == Some(sent) {
                return send(s, format!("{} NO fetch failed\r\n", tag).as_bytes()).await;
            }
            if self.imap.oversized_literal {
                let line = format!("* {} FETCH (UID 1 BODY[HEADER] {{18446744073709551615}}\r\n", seq);
                return send(s, line.as_bytes()).await;
            }
            let m = &self.mailbox[seq - 1];
            let header = m.header_block();
            let section = "BODY[HEADER.FIELDS (FROM TO SUBJECT DATE)]";
            let mut out = if seq % 2 == 0 {
                format!("* {} FETCH ({} {{{}}}\r\n", seq, section, header.len()).into_bytes()
            } else {
                format!("* {} FETCH (UID {} {} {{{}}}\r\n", seq, m.uid, section, header.len()).into_bytes()
            };
            out.extend_from_slice(header);
            if seq % 2 == 0 {
                out.extend_from_slice(format!(" UID {})\r\n", m.uid).as_bytes());
            } else {
                out.extend_from_slice(b")\r\n");
            }
            send(s, &out).await?;
        }
        send(s, format!("{} OK done\r\n", tag).as_bytes()).await
    }
}

async fn send(s: &mut BufStream<DuplexStream>, bytes: &[u8]) -> io::Result<()> {
    s.write_all(bytes).await?;
    s.flush().await
}

/// `+OK`, the dot-stuffed body, then the terminating dot.
async fn send_multiline(s: &mut BufStream<DuplexStream>, body: &[u8]) -> io::Result<()> {
    let mut out = b"+OK\r\n".to_vec();
    for line in String::from_utf8_lossy(body).lines() {
        if line.starts_with('.') {
            out.push(b'.');
        }
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    send(s, &out).await
}

async fn recv(s: &mut BufStream<DuplexStream>) -> io::Result<Option<String>> {
    let mut line = String::new();
    if s.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

#[derive(Debug, Default)]
struct ConnState {
    connects: AtomicUsize,
    implicit_tls: AtomicUsize,
    upgrades: AtomicUsize,
    shutdowns: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl ConnState {
    fn record(&self, cmd: &str) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(cmd.to_string());
        }
    }
}

/// Connector handing out in-memory streams wired to a [`FakeServer`]. Clones share
/// their counters.
#[derive(Debug, Clone)]
pub struct TestConnector {
    server: FakeServer,
    state: Arc<ConnState>,
}

impl TestConnector {
    pub fn new(server: FakeServer) -> Self {
        Self {
            server,
            state: Arc::new(ConnState::default()),
        }
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn implicit_tls_connects(&self) -> usize {
        self.state.implicit_tls.load(Ordering::SeqCst)
    }

    pub fn upgrades(&self) -> usize {
        self.state.upgrades.load(Ordering::SeqCst)
    }

    /// Completed stream shutdowns across every connection.
    pub fn disconnects(&self) -> usize {
        self.state.shutdowns.load(Ordering::SeqCst)
    }

    /// Commands received by the server, IMAP tags stripped.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Connector for TestConnector {
    type Stream = CountingStream;

    async fn connect(&self, _host: &str, _port: u16, implicit_tls: bool) -> io::Result<CountingStream> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if implicit_tls {
            self.state.implicit_tls.fetch_add(1, Ordering::SeqCst);
        }
        let (client_end, server_end) = duplex(64 * 1024);
        tokio::spawn(self.server.clone().serve(server_end, self.state.clone()));
        Ok(CountingStream {
            inner: client_end,
            state: self.state.clone(),
        })
    }

    async fn upgrade(&self, stream: CountingStream, _host: &str) -> io::Result<CountingStream> {
        self.state.upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }
}

/// Client end of a duplex pipe that counts `poll_shutdown` completions.
#[derive(Debug)]
pub struct CountingStream {
    inner: DuplexStream,
    state: Arc<ConnState>,
}

impl AsyncRead for CountingStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountingStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let res = Pin::new(&mut self.inner).poll_shutdown(cx);
        if res.is_ready() {
            self.state.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        res
    }
}
