/*
 * mod.rs
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

//! POP3 retrieval session: header pages via TOP/UIDL, bodies via UIDL lookup and RETR.

mod client;

pub use client::{Pop3Client, Pop3ClientError, StatResponse, UidlEntry};

use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::mime::{parse_body_record, parse_header_record};
use crate::net::Connector;
use crate::store::{compute_range, BodyRecord, ClassifiedError, HeaderList, MessageId};

/// One POP3 retrieval. Each operation consumes the session: connect, authenticate, run
/// the commands, then disconnect, whatever the outcome.
pub struct Pop3Session<C> {
    connector: C,
    config: ConnectionConfig,
}

impl<C: Connector> Pop3Session<C> {
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self { connector, config }
    }

    /// Connect, read the greeting and, when STARTTLS is configured and the server
    /// advertises STLS, upgrade. Without STLS support the session stays in plaintext.
    async fn open(&self) -> Result<Pop3Client<C::Stream>, Pop3ClientError> {
        let security = self.config.security();
        let host = self.config.host.as_str();
        info!(host = %host, port = self.config.port, tls = security.tls, "connecting to POP3 server");
        let stream = self.connector.connect(host, self.config.port, security.tls).await?;
        let mut client = Pop3Client::new(stream);
        if let Err(e) = client.read_greeting().await {
            client.abort().await;
            return Err(e);
        }
        if !security.starttls {
            return Ok(client);
        }

        let caps = match client.capa().await {
            Ok(caps) => caps,
            Err(e) => {
                client.disconnect().await;
                return Err(e);
            }
        };
        if !caps.iter().any(|c| c == "STLS") {
            warn!(host = %host, "server does not offer STLS, continuing unencrypted");
            return Ok(client);
        }
        if let Err(e) = client.stls().await {
            client.disconnect().await;
            return Err(e);
        }
        let upgraded = self.connector.upgrade(client.into_inner(), host).await?;
        debug!(host = %host, "POP3 connection upgraded to TLS");
        Ok(Pop3Client::new(upgraded))
    }

    /// Headers for `count` messages from `start` (newest when absent), newest first.
    pub async fn list_headers(
        self,
        count: u32,
        start: Option<u32>,
    ) -> Result<HeaderList, Pop3ClientError> {
        let mut client = self.open().await?;
        let result = self.collect_headers(&mut client, count, start).await;
        client.disconnect().await;
        debug!(host = %self.config.host, ok = result.is_ok(), "POP3 session closed");
        result
    }

    async fn collect_headers(
        &self,
        client: &mut Pop3Client<C::Stream>,
        count: u32,
        start: Option<u32>,
    ) -> Result<HeaderList, Pop3ClientError> {
        client.login(&self.config.user, &self.config.password).await?;
        debug!(user = %self.config.user, "POP3 login accepted");
        let stat = client.stat().await?;
        if stat.count == 0 {
            return Ok(HeaderList::empty());
        }
        let range = compute_range(stat.count, count, start);
        debug!(
            total = stat.count,
            start = range.start_range,
            end = range.end_range,
            "retrieving POP3 headers"
        );
        let mut header_list = Vec::with_capacity(range.len() as usize);
        // Message numbers grow with arrival, so walking down yields newest first.
        for msg_no in range.descending() {
            let raw = client.top(msg_no, 0).await?;
            let uidl = client.uidl_one(msg_no).await?;
            header_list.push(parse_header_record(MessageId::Uidl(uidl), &raw)?);
        }
        Ok(HeaderList {
            header_list,
            next_start_range: range.next_start_range,
        })
    }

    /// Full body of the message whose UIDL is `uid`.
    pub async fn get_body(self, uid: &str) -> Result<BodyRecord, Pop3ClientError> {
        let mut client = self.open().await?;
        let result = self.fetch_body(&mut client, uid).await;
        client.disconnect().await;
        debug!(host = %self.config.host, ok = result.is_ok(), "POP3 session closed");
        result
    }

    async fn fetch_body(
        &self,
        client: &mut Pop3Client<C::Stream>,
        uid: &str,
    ) -> Result<BodyRecord, Pop3ClientError> {
        client.login(&self.config.user, &self.config.password).await?;
        debug!(user = %self.config.user, "POP3 login accepted");
        let msg_no = client
            .uidl_all()
            .await?
            .into_iter()
            .find(|e| e.uidl == uid)
            .map(|e| e.msg_no)
            .ok_or_else(|| ClassifiedError::not_found(format!("no message with unique id {}", uid)))?;
        let raw = client.retr(msg_no).await?;
        let body = parse_body_record(&raw)?;
        client.rset().await?;
        Ok(body)
    }
}
