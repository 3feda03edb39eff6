use crate::domain::payment::{Amount, Currency, NewPayment};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of the payment intake file.
///
/// Columns: `reference, amount, currency, bank_code, description, customer_name`.
/// The last three may be empty.
#[derive(Debug, Deserialize, PartialEq)]
pub struct PaymentRecord {
    pub reference: String,
    /// Parsed from the raw text so scale and precision are kept exactly.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub currency: Currency,
    pub bank_code: Option<String>,
    pub description: Option<String>,
    pub customer_name: Option<String>,
}

impl TryFrom<PaymentRecord> for NewPayment {
    type Error = PaymentError;

    fn try_from(record: PaymentRecord) -> Result<Self> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
        Ok(NewPayment {
            amount: Amount::new(record.amount)?,
            currency: record.currency,
            reference: record.reference,
            description: non_empty(record.description),
            customer_name: non_empty(record.customer_name),
            bank_code: non_empty(record.bank_code),
        })
    }
}

/// Reads payment requests from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths, so
/// trailing optional columns may be omitted entirely.
pub struct PaymentReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PaymentReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows into payment requests. A bad row yields an
    /// `Err` and does not stop the stream.
    pub fn payments(self) -> impl Iterator<Item = Result<NewPayment>> {
        self.reader
            .into_deserialize::<PaymentRecord>()
            .map(|result| result.map_err(PaymentError::from).and_then(NewPayment::try_from))
    }
}
