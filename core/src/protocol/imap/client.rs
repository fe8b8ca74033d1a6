/*
 * client.rs
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

//! IMAP4rev1 wire client: tagged commands, literal-aware response reading, capability
//! parsing, LOGIN / AUTHENTICATE PLAIN, EXAMINE and the two FETCH forms the gateway uses.

use std::io;

use base64::Engine;
use mailparse::MailParseError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use crate::store::ClassifiedError;

/// Header fields requested for list views.
pub const HEADER_FIELDS: &str = "BODY.PEEK[HEADER.FIELDS (FROM TO SUBJECT DATE)]";

/// Longest response line accepted, literals excluded.
pub const MAX_LINE: usize = 1024 * 1024;

/// Largest literal accepted from the server.
pub const MAX_LITERAL: usize = 64 * 1024 * 1024;

/// IMAP client error (network, protocol, auth).
#[derive(Debug, thiserror::Error)]
pub enum ImapClientError {
    #[error("{0}")]
    Io(#[from] io::Error),
    /// Tagged NO or BAD to a command other than LOGIN / AUTHENTICATE.
    #[error("server rejected command: {0}")]
    Rejected(String),
    /// Tagged NO or BAD to LOGIN / AUTHENTICATE.
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("cannot parse message: {0}")]
    Parse(#[from] MailParseError),
    /// Raised by the session with a kind already decided (e.g. unknown UID).
    #[error("{0}")]
    Classified(#[from] ClassifiedError),
}

impl ImapClientError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ImapClientError::Authentication(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapStatus {
    Ok,
    No,
    Bad,
}

/// One complete server response: the text of every line joined, with literal
/// markers left in place, and the literal payloads in order.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

impl Response {
    fn is_untagged(&self) -> bool {
        self.text.starts_with("* ")
    }

    fn is_continuation(&self) -> bool {
        self.text.starts_with('+')
    }

    /// `Some(status)` when this is the tagged completion for `tag`.
    fn completion(&self, tag: &str) -> Option<ImapStatus> {
        let rest = self.text.strip_prefix(tag)?.strip_prefix(' ')?;
        status_of(rest)
    }
}

fn status_of(rest: &str) -> Option<ImapStatus> {
    let word = rest.split_whitespace().next()?;
    match word.to_ascii_uppercase().as_str() {
        "OK" => Some(ImapStatus::Ok),
        "NO" => Some(ImapStatus::No),
        "BAD" => Some(ImapStatus::Bad),
        _ => None,
    }
}

/// `{N}` at the end of a line announces N literal octets.
fn literal_size(line: &str) -> Option<u64> {
    let open = line.rfind('{')?;
    line[open + 1..].strip_suffix('}')?.trim().parse().ok()
}

/// Capability list from "* CAPABILITY ..." or a "[CAPABILITY ...]" response code.
pub fn parse_capabilities(line: &str) -> Vec<String> {
    let s = line
        .strip_prefix("* CAPABILITY ")
        .or_else(|| {
            line.find("[CAPABILITY ")
                .map(|i| &line[i + 12..])
                .and_then(|t| t.split(']').next())
        })
        .unwrap_or("");
    s.split_whitespace().map(|w| w.to_ascii_uppercase()).collect()
}

fn has_capability(caps: &[String], name: &str) -> bool {
    caps.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Reject CR, LF and NUL: any of them would end the command early or split the
/// SASL token.
fn check_argument(s: &str) -> Result<(), ImapClientError> {
    if s.contains(['\r', '\n', '\0']) {
        return Err(ClassifiedError::bad_request("credentials must not contain CR, LF or NUL").into());
    }
    Ok(())
}

/// IMAP quoted string. Fails for text a quoted string cannot carry.
pub fn quote_string(s: &str) -> Result<String, ImapClientError> {
    check_argument(s)?;
    Ok(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
}

/// Number following `name` as an attribute of a FETCH response, e.g. `UID 42`.
fn fetch_attr_number(text: &str, name: &str) -> Option<u32> {
    let mut words = text
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|w| !w.is_empty());
    while let Some(w) = words.next() {
        if w.eq_ignore_ascii_case(name) {
            return words.next()?.parse().ok();
        }
    }
    None
}

/// `* N FETCH (...)` -> N.
fn fetch_seq(text: &str) -> Option<u32> {
    let mut words = text.strip_prefix("* ")?.split_whitespace();
    let seq = words.next()?.parse().ok()?;
    words
        .next()
        .filter(|w| w.eq_ignore_ascii_case("FETCH"))
        .map(|_| seq)
}

/// One message from a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: u32,
    /// First literal of the response: the requested header block or full message.
    pub data: Vec<u8>,
}

/// Message carried by a FETCH response. `None` for other responses and for FETCH
/// responses without message data (flag updates). Message data without a UID is an
/// error rather than a silently shorter page.
fn parse_fetch(resp: Response) -> Result<Option<FetchedMessage>, ImapClientError> {
    let Some(seq) = fetch_seq(&resp.text) else {
        return Ok(None);
    };
    if resp.literals.is_empty() {
        return Ok(None);
    }
    let uid = fetch_attr_number(&resp.text, "UID")
        .ok_or_else(|| ImapClientError::Protocol(format!("FETCH without UID: {}", resp.text)))?;
    let data = resp.literals.into_iter().next().unwrap_or_default();
    Ok(Some(FetchedMessage { seq, uid, data }))
}

/// Server greeting: `* OK` or `* PREAUTH`, with any capabilities it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// The connection is already authenticated; LOGIN must not be sent.
    pub preauth: bool,
    pub capabilities: Vec<String>,
}

/// IMAP connection in any state. Owns the stream until [`ImapClient::into_inner`]
/// (STARTTLS) or [`ImapClient::logout`].
pub struct ImapClient<S> {
    stream: BufStream<S>,
    line_buf: Vec<u8>,
    tag_counter: u32,
}

impl<S> ImapClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            line_buf: Vec::with_capacity(4096),
            tag_counter: 0,
        }
    }

    /// Raw stream for the TLS upgrade after a tagged OK to STARTTLS.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Next tag (A0001, A0002, ...).
    fn next_tag(&mut self) -> String {
        self.tag_counter = self.tag_counter % 9999 + 1;
        format!("A{:04}", self.tag_counter)
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await
    }

    /// One line without CRLF, at most [`MAX_LINE`] octets.
    async fn read_line(&mut self) -> io::Result<String> {
        self.line_buf.clear();
        let n = (&mut self.stream)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut self.line_buf)
            .await?;
        if self.line_buf.last() != Some(&b'\n') {
            if n >= MAX_LINE {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "response line too long"));
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        Ok(String::from_utf8_lossy(&self.line_buf)
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }

    /// Literal of `size` octets. The buffer grows as data arrives, so the announced
    /// size is never allocated up front.
    async fn read_literal(&mut self, size: u64) -> Result<Vec<u8>, ImapClientError> {
        if size > MAX_LITERAL as u64 {
            return Err(ImapClientError::Protocol(format!(
                "literal of {} octets exceeds the {} octet limit",
                size, MAX_LITERAL
            )));
        }
        let mut lit = Vec::with_capacity(size.min(64 * 1024) as usize);
        let n = (&mut self.stream).take(size).read_to_end(&mut lit).await?;
        if (n as u64) < size {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed in literal").into());
        }
        Ok(lit)
    }

    /// One response, following literals until a line that does not announce one.
    async fn read_response(&mut self) -> Result<Response, ImapClientError> {
        let mut resp = Response::default();
        loop {
            let line = self.read_line().await?;
            let size = literal_size(&line);
            resp.text.push_str(&line);
            match size {
                Some(n) => {
                    let lit = self.read_literal(n).await?;
                    resp.literals.push(lit);
                }
                None => return Ok(resp),
            }
        }
    }

    /// Send `TAG command`, then collect untagged responses until the tagged completion.
    /// A NO or BAD completion is returned as [`ImapClientError::Rejected`].
    async fn command(&mut self, command: &str) -> Result<Vec<Response>, ImapClientError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} {}", tag, command)).await?;
        let mut untagged = Vec::new();
        loop {
            let resp = self.read_response().await?;
            match resp.completion(&tag) {
                Some(ImapStatus::Ok) => return Ok(untagged),
                Some(_) => return Err(ImapClientError::Rejected(resp.text)),
                None => untagged.push(resp),
            }
        }
    }

    /// Read the greeting.
    pub async fn read_greeting(&mut self) -> Result<Greeting, ImapClientError> {
        let line = self.read_line().await?;
        let upper = line.to_ascii_uppercase();
        let preauth = upper.starts_with("* PREAUTH");
        if !preauth && !upper.starts_with("* OK") {
            return Err(ImapClientError::Rejected(line));
        }
        Ok(Greeting {
            preauth,
            capabilities: parse_capabilities(&line),
        })
    }

    /// CAPABILITY.
    pub async fn capability(&mut self) -> Result<Vec<String>, ImapClientError> {
        let untagged = self.command("CAPABILITY").await?;
        Ok(untagged
            .iter()
            .find(|r| r.text.to_ascii_uppercase().starts_with("* CAPABILITY "))
            .map(|r| parse_capabilities(&r.text))
            .unwrap_or_default())
    }

    /// STARTTLS. On OK the caller must hand [`ImapClient::into_inner`] to the TLS layer.
    pub async fn starttls(&mut self) -> Result<(), ImapClientError> {
        self.command("STARTTLS").await.map(|_| ())
    }

    /// LOGIN, or AUTHENTICATE PLAIN when the server disables LOGIN and offers PLAIN.
    pub async fn authenticate(
        &mut self,
        caps: &[String],
        user: &str,
        password: &str,
    ) -> Result<(), ImapClientError> {
        check_argument(user)?;
        check_argument(password)?;
        let result = if has_capability(caps, "LOGINDISABLED") && has_capability(caps, "AUTH=PLAIN") {
            self.authenticate_plain(user, password).await
        } else {
            let cmd = format!("LOGIN {} {}", quote_string(user)?, quote_string(password)?);
            self.command(&cmd).await.map(|_| ())
        };
        result.map_err(|e| match e {
            ImapClientError::Rejected(line) => ImapClientError::Authentication(line),
            other => other,
        })
    }

    async fn authenticate_plain(&mut self, user: &str, password: &str) -> Result<(), ImapClientError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} AUTHENTICATE PLAIN", tag)).await?;
        loop {
            let resp = self.read_response().await?;
            if resp.is_continuation() {
                break;
            }
            if resp.completion(&tag).is_some() {
                return Err(ImapClientError::Rejected(resp.text));
            }
        }
        let token = format!("\0{}\0{}", user, password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(token.as_bytes());
        self.write_line(&encoded).await?;
        loop {
            let resp = self.read_response().await?;
            match resp.completion(&tag) {
                Some(ImapStatus::Ok) => return Ok(()),
                Some(_) => return Err(ImapClientError::Rejected(resp.text)),
                None if resp.is_continuation() => {
                    // Server wants more: cancel the exchange.
                    self.write_line("*").await?;
                }
                None => {}
            }
        }
    }

    /// EXAMINE (read-only SELECT). Returns the EXISTS count.
    pub async fn examine(&mut self, mailbox: &str) -> Result<u32, ImapClientError> {
        let untagged = self.command(&format!("EXAMINE {}", quote_string(mailbox)?)).await?;
        untagged
            .iter()
            .filter(|r| r.is_untagged())
            .find_map(|r| {
                let mut words = r.text[2..].split_whitespace();
                let n = words.next()?.parse().ok()?;
                words
                    .next()
                    .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
                    .map(|_| n)
            })
            .ok_or_else(|| ImapClientError::Protocol("EXAMINE without EXISTS".into()))
    }

    /// `FETCH low:high (UID BODY.PEEK[HEADER.FIELDS (FROM TO SUBJECT DATE)])`. Messages
    /// are pulled from the returned stream as they arrive.
    pub async fn fetch_headers(
        &mut self,
        low: u32,
        high: u32,
    ) -> Result<FetchStream<'_, S>, ImapClientError> {
        let tag = self.next_tag();
        let cmd = format!("{} FETCH {}:{} (UID {})", tag, low, high, HEADER_FIELDS);
        self.write_line(&cmd).await?;
        Ok(FetchStream {
            client: self,
            tag,
            done: false,
        })
    }

    /// `UID FETCH uid (BODY.PEEK[])`. `None` when the server returns no message.
    pub async fn uid_fetch_body(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ImapClientError> {
        let untagged = self
            .command(&format!("UID FETCH {} (UID BODY.PEEK[])", uid))
            .await?;
        for resp in untagged {
            if let Some(msg) = parse_fetch(resp)? {
                if msg.uid == uid {
                    return Ok(Some(msg.data));
                }
            }
        }
        Ok(None)
    }

    /// LOGOUT, then close the stream. Failures are ignored: the connection is going away.
    pub async fn logout(mut self) {
        let _ = self.command("LOGOUT").await;
        let _ = self.stream.shutdown().await;
    }

    /// Close without LOGOUT (the greeting never arrived or was refused).
    pub async fn abort(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Pull-based reader over one FETCH command's responses. Yields each message, then
/// `None` once the tagged completion has been read. Not restartable.
pub struct FetchStream<'a, S> {
    client: &'a mut ImapClient<S>,
    tag: String,
    done: bool,
}

impl<S> FetchStream<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn next(&mut self) -> Result<Option<FetchedMessage>, ImapClientError> {
        while !self.done {
            let resp = self.client.read_response().await?;
            match resp.completion(&self.tag) {
                Some(ImapStatus::Ok) => self.done = true,
                Some(_) => {
                    self.done = true;
                    return Err(ImapClientError::Rejected(resp.text));
                }
                None => {
                    if let Some(msg) = parse_fetch(resp)? {
                        return Ok(Some(msg));
                    }
                }
            }
        }
        Ok(None)
    }
}
