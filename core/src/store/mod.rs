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

//! Retrieval model: records, pagination, error taxonomy and the per-request session.

mod error;
mod message;
mod pagination;
mod session;

pub use error::{classify, BoxError, ClassifiedError, ErrorKind, ErrorPayload};
pub use message::{BodyRecord, HeaderList, HeaderRecord, MessageId};
pub use pagination::{compute_range, RetrievalRange};
pub use session::{parse_uid, MailSession};
