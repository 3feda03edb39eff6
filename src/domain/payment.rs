use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const REFERENCE_MIN_LEN: usize = 5;
const REFERENCE_MAX_LEN: usize = 50;
const DESCRIPTION_MAX_LEN: usize = 200;
const CUSTOMER_NAME_MAX_LEN: usize = 100;
const BANK_CODE_MAX_LEN: usize = 20;
/// ETB payments above this amount must carry a description.
const LARGE_ETB_THRESHOLD: Decimal = dec!(100000);

/// Opaque payment identity, assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for PaymentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PaymentId {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| PaymentError::ValidationError(format!("Invalid payment id '{s}': {e}")))
    }
}

/// A strictly positive monetary amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Ethiopian Birr
    Etb,
    /// US Dollar
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Etb => "ETB",
            Currency::Usd => "USD",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Etb => "Br",
            Currency::Usd => "$",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Settlement state of a payment.
///
/// `SettledSuccess` and `SettledFailed` are terminal: the only legal moves are
/// `Pending -> SettledSuccess` and `Pending -> SettledFailed`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    SettledSuccess,
    SettledFailed,
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::SettledSuccess | PaymentState::SettledFailed)
    }

    /// Returns `true` if moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: PaymentState) -> bool {
        *self == PaymentState::Pending && to.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "PENDING",
            PaymentState::SettledSuccess => "SETTLED_SUCCESS",
            PaymentState::SettledFailed => "SETTLED_FAILED",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to create a payment, before identity and state are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub amount: Amount,
    pub currency: Currency,
    /// Caller-supplied external reference, unique across all payments.
    pub reference: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    /// Processing channel used by the decision provider.
    pub bank_code: Option<String>,
}

impl NewPayment {
    pub fn new(amount: Amount, currency: Currency, reference: impl Into<String>) -> Self {
        Self {
            amount,
            currency,
            reference: reference.into(),
            description: None,
            customer_name: None,
            bank_code: None,
        }
    }

    pub fn with_bank_code(mut self, bank_code: impl Into<String>) -> Self {
        self.bank_code = Some(bank_code.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_customer_name(mut self, customer_name: impl Into<String>) -> Self {
        self.customer_name = Some(customer_name.into());
        self
    }

    pub fn validate(&self) -> Result<(), PaymentError> {
        let reference_len = self.reference.chars().count();
        if reference_len < REFERENCE_MIN_LEN {
            return Err(PaymentError::ValidationError(format!(
                "Reference must be at least {REFERENCE_MIN_LEN} characters"
            )));
        }
        if reference_len > REFERENCE_MAX_LEN {
            return Err(PaymentError::ValidationError(format!(
                "Reference must be at most {REFERENCE_MAX_LEN} characters"
            )));
        }

        check_max_len("Description", self.description.as_deref(), DESCRIPTION_MAX_LEN)?;
        check_max_len(
            "Customer name",
            self.customer_name.as_deref(),
            CUSTOMER_NAME_MAX_LEN,
        )?;
        check_max_len("Bank code", self.bank_code.as_deref(), BANK_CODE_MAX_LEN)?;

        let has_description = self
            .description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
        if self.currency == Currency::Etb
            && self.amount.value() > LARGE_ETB_THRESHOLD
            && !has_description
        {
            return Err(PaymentError::ValidationError(
                "Description is required for large ETB payments".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_max_len(field: &str, value: Option<&str>, max: usize) -> Result<(), PaymentError> {
    match value {
        Some(v) if v.chars().count() > max => Err(PaymentError::ValidationError(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

/// A persisted payment and its settlement state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Amount,
    pub currency: Currency,
    pub reference: String,
    pub state: PaymentState,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub bank_code: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every state change.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Builds a fresh `Pending` payment with a newly generated id.
    pub fn pending(request: NewPayment, now: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::generate(),
            amount: request.amount,
            currency: request.currency,
            reference: request.reference,
            state: PaymentState::Pending,
            description: request.description,
            customer_name: request.customer_name,
            bank_code: request.bank_code,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `to` if the current state equals `from` and the move is legal.
    ///
    /// Returns whether the state was written. An illegal or stale transition
    /// leaves the payment untouched.
    pub fn transition(&mut self, from: PaymentState, to: PaymentState, now: DateTime<Utc>) -> bool {
        if self.state != from || !self.state.can_transition_to(to) {
            return false;
        }
        self.state = to;
        self.updated_at = now;
        true
    }
}
