/*
 * error.rs
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

//! Classified errors: the only error type that leaves the retrieval façade.

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

use serde::Serialize;

use crate::protocol::imap::ImapClientError;
use crate::protocol::pop3::Pop3ClientError;

/// Boxed error accepted by [`classify`].
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Error taxonomy independent of the protocol that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Authentication,
    Timeout,
    NotFound,
    BadRequest,
    Internal,
}

impl ErrorKind {
    /// HTTP status the boundary layer renders for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Authentication => 401,
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "Authentication failed",
            ErrorKind::Timeout => "Mail server did not respond in time",
            ErrorKind::NotFound => "Message not found",
            ErrorKind::BadRequest => "Bad request",
            ErrorKind::Internal => "Internal server error",
        }
    }
}

/// Error carrying its [`ErrorKind`], the default message for that kind and the
/// diagnostic cause.
#[derive(Clone)]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
    cause: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            detail: None,
            cause: None,
        }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(kind)
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::BadRequest, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::NotFound, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Internal, detail)
    }

    fn from_cause(kind: ErrorKind, cause: BoxError) -> Self {
        Self {
            cause: Some(Arc::from(cause)),
            ..Self::new(kind)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Opaque diagnostic text: the explicit detail, else the wrapped cause.
    pub fn data(&self) -> Option<String> {
        self.detail
            .clone()
            .or_else(|| self.cause.as_ref().map(|c| c.to_string()))
    }

    /// Serializable shape for the boundary layer.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.status_code(),
            kind: self.kind,
            message: self.message.clone(),
            data: self.data(),
        }
    }
}

impl PartialEq for ClassifiedError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message && self.data() == other.data()
    }
}

impl fmt::Debug for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifiedError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("data", &self.data())
            .finish()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data() {
            Some(data) => write!(f, "{}: {}", self.message, data),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn Error + 'static))
    }
}

/// Error body sent to the caller: `{code, kind, message, data}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<String>,
}

/// Signal carried by a single link of an error chain.
fn signal_of(err: &(dyn Error + 'static)) -> Option<ErrorKind> {
    if let Some(e) = err.downcast_ref::<Pop3ClientError>() {
        if e.is_auth_failure() {
            return Some(ErrorKind::Authentication);
        }
    }
    if let Some(e) = err.downcast_ref::<ImapClientError>() {
        if e.is_auth_failure() {
            return Some(ErrorKind::Authentication);
        }
    }
    if let Some(e) = err.downcast_ref::<io::Error>() {
        if e.kind() == io::ErrorKind::TimedOut {
            return Some(ErrorKind::Timeout);
        }
    }
    if err.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorKind::Timeout);
    }
    None
}

enum Found {
    Classified(ClassifiedError),
    Kind(ErrorKind),
}

/// Map any failure to a [`ClassifiedError`].
///
/// The source chain is walked outermost first. An already classified link is returned
/// unchanged, so `classify(classify(e)) == classify(e)` and wrapping does not lose the
/// kind. Authentication rejections and transport timeouts are recognized; everything
/// else is `Internal` with the underlying error kept as the cause.
pub fn classify<E>(err: E) -> ClassifiedError
where
    E: Into<BoxError>,
{
    let err: BoxError = err.into();
    let err = match err.downcast::<ClassifiedError>() {
        Ok(classified) => return *classified,
        Err(other) => other,
    };

    let found = {
        let mut link: Option<&(dyn Error + 'static)> = Some(err.as_ref());
        let mut found = None;
        while let Some(e) = link {
            if let Some(c) = e.downcast_ref::<ClassifiedError>() {
                found = Some(Found::Classified(c.clone()));
                break;
            }
            if let Some(kind) = signal_of(e) {
                found = Some(Found::Kind(kind));
                break;
            }
            link = e.source();
        }
        found
    };

    let classified = match found {
        Some(Found::Classified(c)) => c,
        Some(Found::Kind(kind)) => ClassifiedError::from_cause(kind, err),
        None => ClassifiedError::from_cause(ErrorKind::Internal, err),
    };
    tracing::debug!(kind = ?classified.kind(), error = %classified, "classified retrieval error");
    classified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct Wrapper(#[source] BoxError);

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::Authentication.status_code(), 401);
        assert_eq!(ErrorKind::BadRequest.status_code(), 400);
        assert_eq!(ErrorKind::Timeout.status_code(), 504);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
    }

    #[test]
    fn test_auth_rejection_classifies_as_authentication() {
        let raw = Pop3ClientError::Authentication("-ERR invalid password".into());
        assert_eq!(classify(raw).kind(), ErrorKind::Authentication);
        let raw = ImapClientError::Authentication("A0002 NO [AUTHENTICATIONFAILED] nope".into());
        assert_eq!(classify(raw).kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_auth_survives_wrapping() {
        let raw = Pop3ClientError::Authentication("-ERR bad login".into());
        let wrapped = Wrapper(Box::new(raw));
        assert_eq!(classify(wrapped).kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let once = classify(ImapClientError::Authentication("NO".into()));
        let twice = classify(once.clone());
        assert_eq!(once, twice);

        let once = classify(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(once.kind(), ErrorKind::Internal);
        assert_eq!(classify(once.clone()), once);

        let wrapped = Wrapper(Box::new(ClassifiedError::not_found("uid 7")));
        assert_eq!(classify(wrapped), ClassifiedError::not_found("uid 7"));
    }

    #[test]
    fn test_timeouts() {
        let raw = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
        assert_eq!(classify(raw).kind(), ErrorKind::Timeout);
        let raw = Pop3ClientError::Io(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        assert_eq!(classify(raw).kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert_eq!(classify(elapsed).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_other_errors_are_internal_with_cause() {
        let raw = Pop3ClientError::Rejected("-ERR no such message".into());
        let classified = classify(raw);
        assert_eq!(classified.kind(), ErrorKind::Internal);
        assert_eq!(classified.message(), "Internal server error");
        assert!(classified.data().unwrap().contains("no such message"));
        assert!(classified.source().is_some());
    }

    #[test]
    fn test_payload() {
        let payload = ClassifiedError::bad_request("invalid server type").payload();
        assert_eq!(payload.code, 400);
        assert_eq!(payload.kind, ErrorKind::BadRequest);
        assert_eq!(payload.message, "Bad request");
        assert_eq!(payload.data.as_deref(), Some("invalid server type"));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["code"], 400);
        assert_eq!(json["kind"], "BadRequest");
    }
}
