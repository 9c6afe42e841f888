use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use log::trace;
use mailparse::MailHeaderMap;
use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot parse email from raw data")]
    ParseRawEmailError(#[source] mailparse::MailParseError),
    #[error("cannot parse email from raw data: empty data")]
    ParseRawEmailEmptyError,
}

pub type Result<T> = result::Result<T, Error>;

/// Represents a raw email whose headers were successfully parsed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParsedEmail {
    raw: Vec<u8>,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    /// Represents the date of the email: the `Date` header, or the
    /// date the remote store received it.
    pub date: Option<DateTime<FixedOffset>>,
}

impl ParsedEmail {
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::ParseRawEmailEmptyError);
        }

        let (message_id, subject, date) = {
            let parsed = mailparse::parse_mail(&raw).map_err(Error::ParseRawEmailError)?;
            let headers = parsed.get_headers();
            let date: Option<DateTime<FixedOffset>> = headers
                .get_first_value("Date")
                .and_then(|date| mailparse::dateparse(&date).ok())
                .and_then(|timestamp| Utc.timestamp_opt(timestamp, 0).single())
                .map(|date| date.into());
            (
                headers.get_first_value("Message-ID"),
                headers.get_first_value("Subject"),
                date,
            )
        };
        trace!("parsed email {:?} with subject {:?}", message_id, subject);

        Ok(Self {
            raw,
            message_id,
            subject,
            date,
        })
    }

    /// Uses the given date when the email has no valid `Date` header.
    pub fn with_fallback_date(mut self, date: Option<DateTime<FixedOffset>>) -> Self {
        if self.date.is_none() {
            self.date = date;
        }
        self
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}
