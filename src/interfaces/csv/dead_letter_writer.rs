use crate::domain::task::{DeadLetter, DeadLetterCause};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::io::Write;

#[derive(Serialize)]
struct DeadLetterRow<'a> {
    message_id: String,
    payment_id: Option<String>,
    attempts: u32,
    cause: DeadLetterCause,
    last_error: &'a str,
    dead_lettered_at: DateTime<Utc>,
    payload: Cow<'a, str>,
}

/// Dumps dead-letter entries for inspection, one row per entry.
pub struct DeadLetterWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> DeadLetterWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_dead_letters(&mut self, letters: &[DeadLetter]) -> Result<()> {
        if letters.is_empty() {
            self.writer.write_record([
                "message_id",
                "payment_id",
                "attempts",
                "cause",
                "last_error",
                "dead_lettered_at",
                "payload",
            ])?;
        }
        for letter in letters {
            self.writer.serialize(DeadLetterRow {
                message_id: letter.message_id.to_string(),
                payment_id: letter.payment_id.map(|id| id.to_string()),
                attempts: letter.attempts,
                cause: letter.cause,
                last_error: &letter.last_error,
                dead_lettered_at: letter.dead_lettered_at,
                payload: String::from_utf8_lossy(&letter.payload),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
