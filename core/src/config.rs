/*
 * config.rs
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

//! Connection configuration for one retrieval request.
//!
//! Everything here is resolved by the caller: host, port and credentials arrive with each
//! request and the core never consults the environment.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::ClassifiedError;

/// Number of headers returned when a request does not say.
pub const DEFAULT_HEADER_COUNT: u32 = 20;

/// The only mailbox this gateway reads.
pub const INBOX: &str = "INBOX";

/// Encryption mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encryption {
    #[serde(rename = "Unencrypted")]
    None,
    #[serde(rename = "SSL/TLS")]
    ImplicitTls,
    #[serde(rename = "STARTTLS")]
    OpportunisticTls,
}

impl Encryption {
    pub fn label(self) -> &'static str {
        match self {
            Encryption::None => "Unencrypted",
            Encryption::ImplicitTls => "SSL/TLS",
            Encryption::OpportunisticTls => "STARTTLS",
        }
    }

    /// SSL/TLS => tls, STARTTLS => starttls, unencrypted => neither.
    pub fn transport_security(self) -> TransportSecurity {
        match self {
            Encryption::None => TransportSecurity { tls: false, starttls: false },
            Encryption::ImplicitTls => TransportSecurity { tls: true, starttls: false },
            Encryption::OpportunisticTls => TransportSecurity { tls: false, starttls: true },
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Encryption {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Unencrypted" => Ok(Encryption::None),
            "SSL/TLS" => Ok(Encryption::ImplicitTls),
            "STARTTLS" => Ok(Encryption::OpportunisticTls),
            other => Err(ClassifiedError::bad_request(format!(
                "unsupported encryption mode: {:?}",
                other
            ))),
        }
    }
}

/// Transport flags derived from [`Encryption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSecurity {
    /// TLS handshake immediately after TCP connect.
    pub tls: bool,
    /// Upgrade after the greeting when the server advertises it.
    pub starttls: bool,
}

/// Which protocol session serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerVariant {
    #[serde(rename = "POP3")]
    Pop3,
    #[serde(rename = "IMAP")]
    Imap,
}

impl ServerVariant {
    pub fn label(self) -> &'static str {
        match self {
            ServerVariant::Pop3 => "POP3",
            ServerVariant::Imap => "IMAP",
        }
    }
}

impl fmt::Display for ServerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServerVariant {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "POP3" => Ok(ServerVariant::Pop3),
            "IMAP" => Ok(ServerVariant::Imap),
            other => Err(ClassifiedError::bad_request(format!(
                "invalid server type: {:?}",
                other
            ))),
        }
    }
}

/// Fully resolved parameters for one session. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
}

impl ConnectionConfig {
    pub fn security(&self) -> TransportSecurity {
        self.encryption.transport_security()
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption", &self.encryption)
            .finish()
    }
}
