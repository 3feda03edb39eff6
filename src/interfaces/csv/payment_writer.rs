use crate::domain::payment::{Currency, Payment, PaymentId, PaymentState};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    reference: &'a str,
    state: PaymentState,
    currency: Currency,
    amount: Decimal,
    bank_code: Option<&'a str>,
    id: PaymentId,
}

/// Writes the final payment report as CSV:
/// `reference,state,currency,amount,bank_code,id`.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per payment in the given order, then flushes.
    pub fn write_payments<'a, I>(&mut self, payments: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        let mut wrote_any = false;
        for payment in payments {
            self.writer.serialize(PaymentRow {
                reference: &payment.reference,
                state: payment.state,
                currency: payment.currency,
                amount: payment.amount.value(),
                bank_code: payment.bank_code.as_deref(),
                id: payment.id,
            })?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer
                .write_record(["reference", "state", "currency", "amount", "bank_code", "id"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
