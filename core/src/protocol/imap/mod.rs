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

//! IMAP retrieval session: header pages from INBOX by sequence range, bodies by UID.

mod client;

pub use client::{
    parse_capabilities, quote_string, FetchStream, FetchedMessage, Greeting, ImapClient,
    ImapClientError, ImapStatus, Response, HEADER_FIELDS, MAX_LINE, MAX_LITERAL,
};

use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, INBOX};
use crate::mime::{parse_body_record, parse_header_record};
use crate::net::Connector;
use crate::store::{compute_range, BodyRecord, ClassifiedError, HeaderList, HeaderRecord, MessageId};

/// One IMAP retrieval. Each operation consumes the session and logs out before
/// returning, whatever the outcome.
pub struct ImapSession<C> {
    connector: C,
    config: ConnectionConfig,
}

impl<C: Connector> ImapSession<C> {
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self { connector, config }
    }

    /// Connect, read the greeting, learn capabilities and upgrade with STARTTLS when
    /// configured and advertised. The returned greeting carries the capabilities in
    /// force.
    async fn open(&self) -> Result<(ImapClient<C::Stream>, Greeting), ImapClientError> {
        let security = self.config.security();
        let host = self.config.host.as_str();
        info!(host = %host, port = self.config.port, tls = security.tls, "connecting to IMAP server");
        let stream = self.connector.connect(host, self.config.port, security.tls).await?;
        let mut client = ImapClient::new(stream);
        let mut greeting = match client.read_greeting().await {
            Ok(greeting) => greeting,
            Err(e) => {
                client.abort().await;
                return Err(e);
            }
        };
        if greeting.capabilities.is_empty() {
            match client.capability().await {
                Ok(caps) => greeting.capabilities = caps,
                Err(e) => {
                    client.logout().await;
                    return Err(e);
                }
            }
        }
        if !security.starttls {
            return Ok((client, greeting));
        }
        // STARTTLS is only valid before authentication.
        if greeting.preauth {
            warn!(host = %host, "server pre-authenticated the connection, continuing without STARTTLS");
            return Ok((client, greeting));
        }
        if !greeting.capabilities.iter().any(|c| c == "STARTTLS") {
            warn!(host = %host, "server does not offer STARTTLS, continuing unencrypted");
            return Ok((client, greeting));
        }
        if let Err(e) = client.starttls().await {
            client.logout().await;
            return Err(e);
        }
        let upgraded = self.connector.upgrade(client.into_inner(), host).await?;
        debug!(host = %host, "IMAP connection upgraded to TLS");
        // No second greeting after STARTTLS; capabilities must be asked for again.
        let mut client = ImapClient::new(upgraded);
        match client.capability().await {
            Ok(capabilities) => Ok((client, Greeting { preauth: false, capabilities })),
            Err(e) => {
                client.logout().await;
                Err(e)
            }
        }
    }

    async fn login(
        &self,
        client: &mut ImapClient<C::Stream>,
        greeting: &Greeting,
    ) -> Result<(), ImapClientError> {
        if greeting.preauth {
            debug!(host = %self.config.host, "IMAP connection pre-authenticated, skipping login");
            return Ok(());
        }
        client
            .authenticate(&greeting.capabilities, &self.config.user, &self.config.password)
            .await?;
        debug!(user = %self.config.user, "IMAP login accepted");
        Ok(())
    }

    /// Headers for `count` INBOX messages from sequence number `start` (newest when
    /// absent), newest first.
    pub async fn list_headers(
        self,
        count: u32,
        start: Option<u32>,
    ) -> Result<HeaderList, ImapClientError> {
        let (mut client, greeting) = self.open().await?;
        let result = self.collect_headers(&mut client, &greeting, count, start).await;
        client.logout().await;
        debug!(host = %self.config.host, ok = result.is_ok(), "IMAP session closed");
        result
    }

    async fn collect_headers(
        &self,
        client: &mut ImapClient<C::Stream>,
        greeting: &Greeting,
        count: u32,
        start: Option<u32>,
    ) -> Result<HeaderList, ImapClientError> {
        self.login(client, greeting).await?;
        let exists = client.examine(INBOX).await?;
        if exists == 0 {
            return Ok(HeaderList::empty());
        }
        let range = compute_range(exists, count, start);
        debug!(
            total = exists,
            start = range.start_range,
            end = range.end_range,
            "retrieving IMAP headers"
        );

        let mut fetched: Vec<(u32, HeaderRecord)> = Vec::with_capacity(range.len() as usize);
        let mut stream = client.fetch_headers(range.end_range, range.start_range).await?;
        while let Some(msg) = stream.next().await? {
            let record = parse_header_record(MessageId::Uid(msg.uid), &msg.data)?;
            fetched.push((msg.seq, record));
        }
        // Servers answer in ascending sequence order; the page is newest first.
        fetched.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(HeaderList {
            header_list: fetched.into_iter().map(|(_, r)| r).collect(),
            next_start_range: range.next_start_range,
        })
    }

    /// Full body of the INBOX message with this UID.
    pub async fn get_body(self, uid: u32) -> Result<BodyRecord, ImapClientError> {
        let (mut client, greeting) = self.open().await?;
        let result = self.fetch_body(&mut client, &greeting, uid).await;
        client.logout().await;
        debug!(host = %self.config.host, ok = result.is_ok(), "IMAP session closed");
        result
    }

    async fn fetch_body(
        &self,
        client: &mut ImapClient<C::Stream>,
        greeting: &Greeting,
        uid: u32,
    ) -> Result<BodyRecord, ImapClientError> {
        self.login(client, greeting).await?;
        client.examine(INBOX).await?;
        let raw = client
            .uid_fetch_body(uid)
            .await?
            .ok_or_else(|| ClassifiedError::not_found(format!("no message with UID {}", uid)))?;
        Ok(parse_body_record(&raw)?)
    }
}
