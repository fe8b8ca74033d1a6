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

//! POP3 wire client: greeting, CAPA, STLS, USER/PASS, STAT, UIDL, TOP, RETR, RSET, QUIT.
//!
//! One command is in flight at a time; every method writes a command and reads its full
//! response before returning.

use std::io;

use mailparse::MailParseError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use crate::store::ClassifiedError;

/// Longest response line accepted.
pub const MAX_LINE: usize = 1024 * 1024;

/// Largest multi-line response (TOP, RETR, UIDL listing) accepted.
pub const MAX_MULTILINE: usize = 64 * 1024 * 1024;

/// POP3 client error (network, protocol, auth).
#[derive(Debug, thiserror::Error)]
pub enum Pop3ClientError {
    #[error("{0}")]
    Io(#[from] io::Error),
    /// `-ERR` to a command other than USER/PASS.
    #[error("server rejected command: {0}")]
    Rejected(String),
    /// `-ERR` to USER or PASS.
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("cannot parse message: {0}")]
    Parse(#[from] MailParseError),
    /// Raised by the session with a kind already decided (e.g. unknown unique id).
    #[error("{0}")]
    Classified(#[from] ClassifiedError),
}

impl Pop3ClientError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Pop3ClientError::Authentication(_))
    }
}

/// STAT response: message count and total size in octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatResponse {
    pub count: u32,
    pub total_size: u64,
}

/// UIDL entry: message number and unique-id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidlEntry {
    pub msg_no: u32,
    pub uidl: String,
}

fn check_ok(line: &str) -> Result<&str, Pop3ClientError> {
    match line.strip_prefix("+OK") {
        Some(rest) => Ok(rest.trim()),
        None => Err(Pop3ClientError::Rejected(line.to_string())),
    }
}

/// "n uid" as found in UIDL listings and single-message UIDL replies.
fn parse_uidl_entry(s: &str) -> Option<UidlEntry> {
    let mut sp = s.split_whitespace();
    let msg_no = sp.next()?.parse().ok()?;
    let uidl = sp.next()?.to_string();
    Some(UidlEntry { msg_no, uidl })
}

/// POP3 connection. Owns the stream until [`Pop3Client::into_inner`] (STLS) or
/// [`Pop3Client::disconnect`].
pub struct Pop3Client<S> {
    stream: BufStream<S>,
    line_buf: Vec<u8>,
}

impl<S> Pop3Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            line_buf: Vec::with_capacity(512),
        }
    }

    /// Give the raw stream back for a TLS upgrade. Only valid right after `+OK` to STLS,
    /// when the server has nothing more to send in plaintext.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await
    }

    /// One response line without its CRLF, at most [`MAX_LINE`] octets.
    async fn read_line_bytes(&mut self) -> io::Result<&[u8]> {
        self.line_buf.clear();
        let n = (&mut self.stream)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut self.line_buf)
            .await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        if n >= MAX_LINE && self.line_buf.last() != Some(&b'\n') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "response line too long"));
        }
        let mut end = self.line_buf.len();
        while end > 0 && matches!(self.line_buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        Ok(&self.line_buf[..end])
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let line = self.read_line_bytes().await?;
        Ok(String::from_utf8_lossy(line).trim_end().to_string())
    }

    /// Multi-line body up to the lone ".", with dot-stuffing removed.
    async fn read_multiline(&mut self) -> Result<Vec<u8>, Pop3ClientError> {
        let mut out = Vec::new();
        loop {
            let line = self.read_line_bytes().await?;
            if line == b"." {
                break;
            }
            let content = if line.starts_with(b"..") { &line[1..] } else { line };
            if out.len() + content.len() + 2 > MAX_MULTILINE {
                return Err(Pop3ClientError::Protocol(format!(
                    "multi-line response exceeds {} octets",
                    MAX_MULTILINE
                )));
            }
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
        Ok(out)
    }

    async fn command(&mut self, cmd: &str) -> Result<String, Pop3ClientError> {
        self.write_line(cmd).await?;
        let line = self.read_line().await?;
        check_ok(&line)?;
        Ok(line)
    }

    /// Read greeting (+OK ... or -ERR).
    pub async fn read_greeting(&mut self) -> Result<String, Pop3ClientError> {
        let line = self.read_line().await?;
        check_ok(&line)?;
        Ok(line)
    }

    /// CAPA. A server without CAPA support answers -ERR, reported as no capabilities.
    pub async fn capa(&mut self) -> Result<Vec<String>, Pop3ClientError> {
        self.write_line("CAPA").await?;
        let line = self.read_line().await?;
        if check_ok(&line).is_err() {
            return Ok(Vec::new());
        }
        let body = self.read_multiline().await?;
        Ok(String::from_utf8_lossy(&body)
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .map(|c| c.to_ascii_uppercase())
            .collect())
    }

    /// STLS. On `+OK` the caller must hand [`Pop3Client::into_inner`] to the TLS layer.
    pub async fn stls(&mut self) -> Result<(), Pop3ClientError> {
        self.command("STLS").await.map(|_| ())
    }

    /// USER then PASS. Arguments containing CR, LF or NUL are refused before anything
    /// is sent, as they would end the command early.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), Pop3ClientError> {
        if [username, password].iter().any(|s| s.contains(['\r', '\n', '\0'])) {
            return Err(ClassifiedError::bad_request("credentials must not contain CR, LF or NUL").into());
        }
        for cmd in [format!("USER {}", username), format!("PASS {}", password)] {
            self.write_line(&cmd).await?;
            let line = self.read_line().await?;
            if !line.starts_with("+OK") {
                return Err(Pop3ClientError::Authentication(line));
            }
        }
        Ok(())
    }

    /// STAT -> count and total size.
    pub async fn stat(&mut self) -> Result<StatResponse, Pop3ClientError> {
        let line = self.command("STAT").await?;
        let rest = check_ok(&line)?;
        let mut parts = rest.split_whitespace();
        let count = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Pop3ClientError::Protocol(line.clone()))?;
        let total_size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(StatResponse { count, total_size })
    }

    /// UIDL for one message.
    pub async fn uidl_one(&mut self, msg_no: u32) -> Result<String, Pop3ClientError> {
        let line = self.command(&format!("UIDL {}", msg_no)).await?;
        let rest = check_ok(&line)?;
        parse_uidl_entry(rest)
            .filter(|e| e.msg_no == msg_no)
            .map(|e| e.uidl)
            .ok_or_else(|| Pop3ClientError::Protocol(line.clone()))
    }

    /// UIDL listing of the whole mailbox.
    pub async fn uidl_all(&mut self) -> Result<Vec<UidlEntry>, Pop3ClientError> {
        self.command("UIDL").await?;
        let body = self.read_multiline().await?;
        Ok(String::from_utf8_lossy(&body)
            .lines()
            .filter_map(parse_uidl_entry)
            .collect())
    }

    /// TOP msg n: headers plus the first n body lines. n = 0 for headers only.
    pub async fn top(&mut self, msg_no: u32, n: u32) -> Result<Vec<u8>, Pop3ClientError> {
        self.command(&format!("TOP {} {}", msg_no, n)).await?;
        self.read_multiline().await
    }

    /// RETR msg: full message bytes.
    pub async fn retr(&mut self, msg_no: u32) -> Result<Vec<u8>, Pop3ClientError> {
        self.command(&format!("RETR {}", msg_no)).await?;
        self.read_multiline().await
    }

    /// RSET: clear any deletion marks of this session.
    pub async fn rset(&mut self) -> Result<(), Pop3ClientError> {
        self.command("RSET").await.map(|_| ())
    }

    /// QUIT, then close the stream. Failures are ignored: the connection is going away.
    pub async fn disconnect(mut self) {
        let _ = self.write_line("QUIT").await;
        let _ = self.read_line().await;
        let _ = self.stream.shutdown().await;
    }

    /// Close without QUIT (the greeting never arrived or was refused).
    pub async fn abort(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
