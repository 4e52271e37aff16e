//! Invoice model: parties, line items, document kinds and the pipeline from
//! raw input to a signed document.
mod builder;
pub mod calc;
mod line;
mod party;
mod qr;
pub mod sign;
#[cfg(test)]
pub(crate) mod test_support;
mod validation;
pub mod xml;

pub use builder::{FinalizedInvoice, InvoiceBuilder, InvoiceView, SignedInvoice};
pub use calc::{InvoiceTotals, LineItemTotals, TaxBreakdown, TaxSubtotal};
pub use line::{
    Discount, LineItem, LineItemInput, OtherTax, VatCategory, VatExemption, VatRate,
};
pub use party::{
    Address, Buyer, Customer, IdScheme, Party, PartyId, Role, Seller, Supplier, VatNumber,
};
pub use qr::{QrCodeError, QrFields, QrPayload, QrResult};
pub use validation::{InvoiceField, ValidationError, ValidationIssue, ValidationKind};

use bitflags::bitflags;
use chrono::{DateTime, NaiveDate, Utc};
use iso_currency::Currency;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Previous-invoice hash embedded in the first invoice a device ever issues.
///
/// It is the base64 of the hex SHA-256 digest of `"0"`.
pub const INITIAL_PREVIOUS_INVOICE_HASH: &str =
    "NWZlY2ViNjZmZmM4NmYzOGQ5NTI3ODZjNmQ2OTZjNzljMmRiYzIzOWRkNGU5MWI0NjcyOWQ3M2EyN2ZiNTdlOQ==";

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("malformed VAT number {0:?}: expected 15 digits starting and ending with 3")]
    VatNumber(String),
    #[error("unknown identification scheme {0:?}")]
    IdScheme(String),
    #[error("buyer needs a VAT number or another identification")]
    UnidentifiedBuyer,
}

/// Simplified invoices (B2C) are reported, standard ones (B2B) cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceSubType {
    Simplified,
    Standard,
}

impl InvoiceSubType {
    /// First two characters of the invoice code name.
    const fn code_prefix(self) -> &'static str {
        match self {
            Self::Standard => "01",
            Self::Simplified => "02",
        }
    }
}

/// Document type, UN/CEFACT 1001 code.
///
/// # Examples
/// ```rust
/// use zatca_egs::invoice::InvoiceType;
///
/// assert_eq!(InvoiceType::CreditNote.code(), "381");
/// assert!(InvoiceType::DebitNote.requires_cancelation());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceType {
    Invoice,
    DebitNote,
    CreditNote,
}

impl InvoiceType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Invoice => "388",
            Self::DebitNote => "383",
            Self::CreditNote => "381",
        }
    }

    /// Notes must point at the invoice they amend.
    pub fn requires_cancelation(self) -> bool {
        self != Self::Invoice
    }
}

/// UNTDID 4461 payment means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMeansCode {
    Cash,
    Credit,
    BankAccount,
    BankCard,
}

impl PaymentMeansCode {
    pub fn code(self) -> &'static str {
        match self {
            Self::Cash => "10",
            Self::Credit => "30",
            Self::BankAccount => "42",
            Self::BankCard => "48",
        }
    }
}

/// Reference from a credit or debit note to the invoice it amends.
///
/// # Examples
/// ```rust
/// use zatca_egs::invoice::{Cancelation, PaymentMeansCode};
///
/// let cancel = Cancelation::new("SME00002", PaymentMeansCode::Cash, "Goods returned");
/// assert_eq!(cancel.canceled_serial_invoice_number(), "SME00002");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancelation {
    canceled_serial_invoice_number: String,
    payment_means: PaymentMeansCode,
    reason: String,
}

impl Cancelation {
    pub fn new(
        canceled_serial_invoice_number: impl Into<String>,
        payment_means: PaymentMeansCode,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            canceled_serial_invoice_number: canceled_serial_invoice_number.into(),
            payment_means,
            reason: reason.into(),
        }
    }

    pub fn canceled_serial_invoice_number(&self) -> &str {
        &self.canceled_serial_invoice_number
    }

    pub fn payment_means(&self) -> PaymentMeansCode {
        self.payment_means
    }

    /// Free text written into `cbc:InstructionNote`.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Supply dates for the delivery block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub actual_delivery_date: NaiveDate,
    pub latest_delivery_date: Option<NaiveDate>,
}

bitflags! {
    /// Transaction flags, written as characters 3-7 of the invoice code name.
    ///
    /// # Examples
    /// ```rust
    /// use zatca_egs::invoice::InvoiceFlags;
    ///
    /// let flags = InvoiceFlags::NOMINAL | InvoiceFlags::SUMMARY;
    /// assert!(!flags.contains(InvoiceFlags::EXPORT));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct InvoiceFlags: u8 {
        const THIRD_PARTY = 1 << 0;
        const NOMINAL = 1 << 1;
        const EXPORT = 1 << 2;
        const SUMMARY = 1 << 3;
        const SELF_BILLED = 1 << 4;
    }
}

/// Everything the caller decided about an invoice, before any tax is
/// computed. Built through [`InvoiceBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    pub(crate) invoice_type: InvoiceType,
    pub(crate) sub_type: InvoiceSubType,
    pub(crate) flags: InvoiceFlags,
    pub(crate) serial_number: String,
    pub(crate) uuid: Uuid,
    pub(crate) issue_datetime: DateTime<Utc>,
    pub(crate) currency: Currency,
    pub(crate) previous_invoice_hash: String,
    pub(crate) invoice_counter: u64,
    pub(crate) seller: Seller,
    pub(crate) buyer: Option<Buyer>,
    pub(crate) delivery: Option<Delivery>,
    pub(crate) payment_means: Option<PaymentMeansCode>,
    pub(crate) cancelation: Option<Cancelation>,
    pub(crate) line_items: Vec<LineItem>,
}

impl InvoiceData {
    pub fn invoice_type(&self) -> InvoiceType {
        self.invoice_type
    }

    pub fn sub_type(&self) -> InvoiceSubType {
        self.sub_type
    }

    pub fn is_simplified(&self) -> bool {
        self.sub_type == InvoiceSubType::Simplified
    }

    pub fn flags(&self) -> InvoiceFlags {
        self.flags
    }

    /// Seven-character `name` attribute of `cbc:InvoiceTypeCode`, e.g. `0200000`.
    pub fn invoice_code(&self) -> String {
        let flags = InvoiceFlags::all()
            .iter()
            .map(|flag| if self.flags.contains(flag) { '1' } else { '0' });
        self.sub_type.code_prefix().chars().chain(flags).collect()
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn issue_datetime(&self) -> &DateTime<Utc> {
        &self.issue_datetime
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn previous_invoice_hash(&self) -> &str {
        &self.previous_invoice_hash
    }

    pub fn invoice_counter(&self) -> u64 {
        self.invoice_counter
    }

    pub fn seller(&self) -> &Seller {
        &self.seller
    }

    pub fn buyer(&self) -> Option<&Buyer> {
        self.buyer.as_ref()
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        self.delivery.as_ref()
    }

    pub fn payment_means(&self) -> Option<PaymentMeansCode> {
        self.payment_means
    }

    pub fn cancelation(&self) -> Option<&Cancelation> {
        self.cancelation.as_ref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    /// Issue instant as written into QR tag 3 and the signing time.
    pub(crate) fn qr_timestamp(&self) -> String {
        self.issue_datetime.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}
