/*
 * session.rs
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

//! Protocol-agnostic session: one value per request, dispatching to POP3 or IMAP.

use crate::config::{ConnectionConfig, ServerVariant};
use crate::net::Connector;
use crate::protocol::imap::ImapSession;
use crate::protocol::pop3::Pop3Session;

use super::error::{classify, ClassifiedError};
use super::message::{BodyRecord, HeaderList};

/// A single retrieval against one server. The set of protocols is closed, so this is
/// an enum rather than a trait object.
pub enum MailSession<C> {
    Pop3(Pop3Session<C>),
    Imap(ImapSession<C>),
}

impl<C: Connector> MailSession<C> {
    pub fn new(variant: ServerVariant, connector: C, config: ConnectionConfig) -> Self {
        match variant {
            ServerVariant::Pop3 => MailSession::Pop3(Pop3Session::new(connector, config)),
            ServerVariant::Imap => MailSession::Imap(ImapSession::new(connector, config)),
        }
    }

    pub fn variant(&self) -> ServerVariant {
        match self {
            MailSession::Pop3(_) => ServerVariant::Pop3,
            MailSession::Imap(_) => ServerVariant::Imap,
        }
    }

    /// One page of headers, newest first.
    pub async fn list_headers(
        self,
        count: u32,
        start: Option<u32>,
    ) -> Result<HeaderList, ClassifiedError> {
        match self {
            MailSession::Pop3(s) => s.list_headers(count, start).await.map_err(classify),
            MailSession::Imap(s) => s.list_headers(count, start).await.map_err(classify),
        }
    }

    /// Body of the message named by `identifier`: a UIDL for POP3, a numeric UID for IMAP.
    pub async fn get_body(self, identifier: &str) -> Result<BodyRecord, ClassifiedError> {
        match self {
            MailSession::Pop3(s) => s.get_body(identifier).await.map_err(classify),
            MailSession::Imap(s) => {
                let uid = parse_uid(identifier)?;
                s.get_body(uid).await.map_err(classify)
            }
        }
    }
}

/// IMAP identifiers are positive UIDs.
pub fn parse_uid(identifier: &str) -> Result<u32, ClassifiedError> {
    match identifier.trim().parse::<u32>() {
        Ok(uid) if uid > 0 => Ok(uid),
        _ => Err(ClassifiedError::bad_request(format!(
            "IMAP message identifier must be a positive number, got {:?}",
            identifier
        ))),
    }
}
