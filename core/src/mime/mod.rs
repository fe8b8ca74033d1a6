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

//! Turn raw RFC 822 bytes into [`HeaderRecord`] and [`BodyRecord`] values.
//!
//! Decoding (MIME structure, transfer encodings, RFC 2047 words, dates) is done by
//! mailparse; this module only picks the fields the gateway returns.

use chrono::{DateTime, TimeZone, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, MailParseError, ParsedMail};

use crate::store::{BodyRecord, HeaderRecord, MessageId};

/// Build a header record from a header block (TOP n 0, BODY[HEADER.FIELDS ...]).
pub fn parse_header_record(id: MessageId, raw: &[u8]) -> Result<HeaderRecord, MailParseError> {
    let (headers, _) = mailparse::parse_headers(raw)?;
    let (sender_name, sender_address) = headers
        .get_first_value("From")
        .map(|from| split_sender(&from))
        .unwrap_or_default();
    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let date = headers
        .get_first_value("Date")
        .and_then(|d| parse_date(&d));
    Ok(HeaderRecord {
        id,
        sender_name,
        sender_address,
        subject: subject.trim().to_string(),
        date,
    })
}

/// Display name and address of the first mailbox in a From value.
fn split_sender(value: &str) -> (String, String) {
    let list = match mailparse::addrparse(value) {
        Ok(list) => list,
        Err(_) => return (String::new(), value.trim().to_string()),
    };
    let first = list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.clone()),
        MailAddr::Group(group) => group.addrs.first().cloned(),
    });
    match first {
        Some(info) => (info.display_name.unwrap_or_default(), info.addr),
        None => (String::new(), value.trim().to_string()),
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let ts = mailparse::dateparse(value).ok()?;
    Utc.timestamp_opt(ts, 0).single()
}

/// Build a body record from a complete message (RETR, BODY[]).
pub fn parse_body_record(raw: &[u8]) -> Result<BodyRecord, MailParseError> {
    let parsed = mailparse::parse_mail(raw)?;
    let mut text = None;
    let mut html = None;
    collect_display_parts(&parsed, &mut text, &mut html)?;

    let text = match (text, &html) {
        (Some(t), _) => t,
        (None, Some(h)) => html_to_text(h),
        (None, None) => String::new(),
    };
    let html = html.or_else(|| Some(text_to_html(&text)));
    Ok(BodyRecord { text, html })
}

/// First inline text/plain and text/html parts, depth first.
fn collect_display_parts(
    part: &ParsedMail<'_>,
    text: &mut Option<String>,
    html: &mut Option<String>,
) -> Result<(), MailParseError> {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return Ok(());
    }
    if part.subparts.is_empty() {
        match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" if text.is_none() => *text = Some(part.get_body()?),
            "text/html" if html.is_none() => *html = Some(part.get_body()?),
            _ => {}
        }
        return Ok(());
    }
    for sub in &part.subparts {
        collect_display_parts(sub, text, html)?;
    }
    Ok(())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Paragraph per blank-line separated block, `<br/>` per line break.
pub fn text_to_html(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let paragraphs: Vec<String> = normalized
        .split("\n\n")
        .map(|p| p.trim_matches('\n'))
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.split('\n').map(escape_html).collect();
            format!("<p>{}</p>", lines.join("<br/>"))
        })
        .collect();
    paragraphs.join("")
}

/// Drop tags and decode the handful of entities mail clients emit.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
