use crate::error::{BookingError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// Result of replaying one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub booking: String,
    pub command: String,
    /// `ok` or `error`.
    pub outcome: String,
    pub reference: String,
    pub status: String,
    pub payment_status: String,
    pub total: Option<Decimal>,
    pub detail: String,
}

impl Outcome {
    pub fn ok(booking: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            booking: booking.into(),
            command: command.into(),
            outcome: "ok".to_string(),
            reference: String::new(),
            status: String::new(),
            payment_status: String::new(),
            total: None,
            detail: String::new(),
        }
    }

    pub fn error(
        booking: impl Into<String>,
        command: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            outcome: "error".to_string(),
            detail: detail.into(),
            ..Self::ok(booking, command)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == "ok"
    }
}

/// Writes outcomes as CSV with a header row.
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, outcome: &Outcome) -> Result<()> {
        self.writer.serialize(outcome)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| BookingError::Storage(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let mut buffer = Vec::new();
        {
            let mut writer = OutcomeWriter::new(&mut buffer);
            let mut created = Outcome::ok("b1", "create");
            created.reference = "RSV-240801-ABCDEF".to_string();
            created.status = "pending".to_string();
            created.payment_status = "pending".to_string();
            created.total = Some(dec!(9000.00));
            writer.write(&created).unwrap();
            writer
                .write(&Outcome::error("b2", "create", "Dates unavailable"))
                .unwrap();
            writer.flush().unwrap();
        }

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines[0],
            "booking,command,outcome,reference,status,payment_status,total,detail"
        );
        assert_eq!(lines[1], "b1,create,ok,RSV-240801-ABCDEF,pending,pending,9000.00,");
        assert_eq!(lines[2], "b2,create,error,,,,,Dates unavailable");
    }
}
