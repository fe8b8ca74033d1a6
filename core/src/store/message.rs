/*
 * message.rs
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

//! Header and body records returned by a retrieval.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Protocol-native message identifier.
///
/// Serialized untagged so the caller sees a number (IMAP UID) or a string (POP3 UIDL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum MessageId {
    Uid(u32),
    Uidl(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Uid(n) => write!(f, "{}", n),
            MessageId::Uidl(s) => f.write_str(s),
        }
    }
}

/// Summary of one message for the list view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRecord {
    pub id: MessageId,
    pub sender_name: String,
    pub sender_address: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
}

/// Displayable body of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BodyRecord {
    pub text: String,
    pub html: Option<String>,
}

/// One page of headers, newest first, plus the cursor for the following page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderList {
    pub header_list: Vec<HeaderRecord>,
    /// `None` once the oldest message has been returned.
    pub next_start_range: Option<u32>,
}

impl HeaderList {
    /// Result for a mailbox with no messages.
    pub fn empty() -> Self {
        Self::default()
    }
}
