/*
 * retrieval.rs
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

//! Retrieval façade: validates a request, resolves its connection settings, runs one
//! session and hands back either a result or a [`ClassifiedError`].

use std::fmt;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{ConnectionConfig, Encryption, ServerVariant, DEFAULT_HEADER_COUNT};
use crate::net::{Connector, NetConnector};
use crate::store::{parse_uid, BodyRecord, ClassifiedError, HeaderList, MailSession};

/// Connection settings as sent by the caller. Labels stay strings until validated.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub user: String,
    pub password: String,
    pub hostname: String,
    pub port: u16,
    /// `"Unencrypted"`, `"SSL/TLS"` or `"STARTTLS"`.
    pub encryption: String,
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("encryption", &self.encryption)
            .finish()
    }
}

impl ConnectionOptions {
    /// Validate and turn into a [`ConnectionConfig`]. Fails with BadRequest.
    pub fn resolve(&self) -> Result<ConnectionConfig, ClassifiedError> {
        if self.user.trim().is_empty() {
            return Err(ClassifiedError::bad_request("user must not be empty"));
        }
        let host = self.hostname.trim();
        if host.is_empty() {
            return Err(ClassifiedError::bad_request("hostname must not be empty"));
        }
        if self.port == 0 {
            return Err(ClassifiedError::bad_request("port must be between 1 and 65535"));
        }
        // Both travel inside protocol command lines.
        if [&self.user, &self.password].iter().any(|s| s.contains(['\r', '\n', '\0'])) {
            return Err(ClassifiedError::bad_request("user and password must not contain CR, LF or NUL"));
        }
        let encryption: Encryption = self.encryption.parse()?;
        Ok(ConnectionConfig {
            user: self.user.clone(),
            password: self.password.clone(),
            host: host.to_string(),
            port: self.port,
            encryption,
        })
    }
}

/// Request for one page of headers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRequest {
    #[serde(flatten)]
    pub connection: ConnectionOptions,
    /// `"IMAP"` or `"POP3"`.
    pub server_type: String,
    /// Defaults to [`DEFAULT_HEADER_COUNT`].
    #[serde(default)]
    pub count: Option<u32>,
    /// Sequence number of the newest message wanted; newest in the mailbox when absent.
    #[serde(default)]
    pub start: Option<u32>,
}

/// Request for one message body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyRequest {
    #[serde(flatten)]
    pub connection: ConnectionOptions,
    pub server_type: String,
    /// UIDL for POP3, UID for IMAP.
    pub email_id: String,
}

/// Entry point for the request layer. Holds no state besides the connector; every call
/// opens and closes its own connection.
#[derive(Debug, Clone, Default)]
pub struct Retriever<C = NetConnector> {
    connector: C,
}

impl Retriever<NetConnector> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Connector + Clone> Retriever<C> {
    pub fn with_connector(connector: C) -> Self {
        Self { connector }
    }

    /// One page of INBOX headers, newest first.
    pub async fn get_headers(&self, request: &HeaderRequest) -> Result<HeaderList, ClassifiedError> {
        let variant: ServerVariant = request.server_type.parse()?;
        let config = request.connection.resolve()?;
        let count = request.count.unwrap_or(DEFAULT_HEADER_COUNT);
        if count == 0 {
            return Err(ClassifiedError::bad_request("count must be at least 1"));
        }
        info!(
            server_type = %variant,
            host = %config.host,
            port = config.port,
            encryption = %config.encryption,
            count = count,
            start = ?request.start,
            "header request"
        );
        let result = MailSession::new(variant, self.connector.clone(), config)
            .list_headers(count, request.start)
            .await;
        match &result {
            Ok(list) => info!(returned = list.header_list.len(), next = ?list.next_start_range, "header request done"),
            Err(e) => warn!(kind = ?e.kind(), error = %e, "header request failed"),
        }
        result
    }

    /// Body of the message named by `email_id`.
    pub async fn get_body(&self, request: &BodyRequest) -> Result<BodyRecord, ClassifiedError> {
        let variant: ServerVariant = request.server_type.parse()?;
        let config = request.connection.resolve()?;
        let id = request.email_id.trim();
        if id.is_empty() {
            return Err(ClassifiedError::bad_request("emailId must not be empty"));
        }
        if variant == ServerVariant::Imap {
            parse_uid(id)?;
        }
        info!(
            server_type = %variant,
            host = %config.host,
            port = config.port,
            encryption = %config.encryption,
            email_id = %id,
            "body request"
        );
        let result = MailSession::new(variant, self.connector.clone(), config)
            .get_body(id)
            .await;
        if let Err(e) = &result {
            warn!(kind = ?e.kind(), error = %e, "body request failed");
        }
        result
    }
}
