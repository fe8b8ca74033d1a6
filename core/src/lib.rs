/*
 * lib.rs
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

//! Stateless mail retrieval core: each request connects to a caller-named POP3 or IMAP
//! server, lists a page of INBOX headers or fetches one body, and disconnects.
//!
//! Every failure leaving [`retrieval::Retriever`] is a [`store::ClassifiedError`].

pub mod config;
pub mod mime;
pub mod net;
pub mod protocol;
pub mod retrieval;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{ConnectionConfig, Encryption, ServerVariant, TransportSecurity};
pub use net::{Connector, MailStream, NetConnector};
pub use retrieval::{BodyRequest, ConnectionOptions, HeaderRequest, Retriever};
pub use store::{
    classify, compute_range, BodyRecord, ClassifiedError, ErrorKind, ErrorPayload, HeaderList,
    HeaderRecord, MailSession, MessageId, RetrievalRange,
};
