use super::calc::compute_invoice_totals;
use super::{
    Buyer, Cancelation, Delivery, InvoiceData, InvoiceField, InvoiceFlags, InvoiceSubType,
    InvoiceTotals, InvoiceType, LineItem, PaymentMeansCode, Seller, ValidationError,
    ValidationIssue, ValidationKind,
};
use crate::invoice::sign::{InvoiceSigner, SignatureParts, SigningError};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use iso_currency::Currency;
use uuid::Uuid;

/// Validated invoice with its computed totals, ready to be signed.
#[derive(Debug, Clone)]
pub struct FinalizedInvoice {
    data: InvoiceData,
    totals: InvoiceTotals,
}

/// Signed invoice: the document, its hash, QR payload and signature.
///
/// Produced once by [`InvoiceSigner::sign`] and never modified afterwards.
#[derive(Debug, Clone)]
pub struct SignedInvoice {
    finalized: FinalizedInvoice,
    parts: SignatureParts,
    qr_code: String,
    document: String,
}

/// Builder for [`FinalizedInvoice`].
///
/// # Examples
/// ```rust,no_run
/// use zatca_egs::invoice::{
///     InvoiceBuilder, InvoiceSubType, InvoiceType, LineItem, PaymentMeansCode, Seller,
///     INITIAL_PREVIOUS_INVOICE_HASH,
/// };
///
/// # fn demo(seller: Seller, items: Vec<LineItem>) -> Result<(), zatca_egs::invoice::ValidationError> {
/// let invoice = InvoiceBuilder::new(
///     InvoiceType::Invoice,
///     InvoiceSubType::Simplified,
///     "SME00010",
///     uuid::Uuid::new_v4(),
///     chrono::Utc::now(),
///     1,
///     INITIAL_PREVIOUS_INVOICE_HASH,
///     seller,
///     items,
/// )
/// .payment_means(PaymentMeansCode::Cash)
/// .build()?;
/// # let _ = invoice;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InvoiceBuilder {
    invoice: InvoiceData,
}

impl InvoiceBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        invoice_type: InvoiceType,
        sub_type: InvoiceSubType,
        serial_number: impl Into<String>,
        uuid: Uuid,
        issue_datetime: DateTime<Utc>,
        invoice_counter: u64,
        previous_invoice_hash: impl Into<String>,
        seller: Seller,
        line_items: Vec<LineItem>,
    ) -> Self {
        Self {
            invoice: InvoiceData {
                invoice_type,
                sub_type,
                flags: InvoiceFlags::empty(),
                serial_number: serial_number.into(),
                uuid,
                issue_datetime,
                currency: Currency::SAR,
                previous_invoice_hash: previous_invoice_hash.into(),
                invoice_counter,
                seller,
                buyer: None,
                delivery: None,
                payment_means: None,
                cancelation: None,
                line_items,
            },
        }
    }

    pub fn buyer(mut self, buyer: Buyer) -> Self {
        self.invoice.buyer = Some(buyer);
        self
    }

    pub fn delivery(mut self, delivery: Delivery) -> Self {
        self.invoice.delivery = Some(delivery);
        self
    }

    pub fn payment_means(mut self, code: PaymentMeansCode) -> Self {
        self.invoice.payment_means = Some(code);
        self
    }

    pub fn cancelation(mut self, cancelation: Cancelation) -> Self {
        self.invoice.cancelation = Some(cancelation);
        self
    }

    pub fn flags(mut self, flags: InvoiceFlags) -> Self {
        self.invoice.flags = flags;
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.invoice.currency = currency;
        self
    }

    /// Validate the header and compute totals.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for an empty serial number or previous
    /// invoice hash, a cancelation on a plain invoice, a payment means next to
    /// a cancelation (which carries its own), or any failure of
    /// [`compute_invoice_totals`].
    pub fn build(self) -> Result<FinalizedInvoice, ValidationError> {
        let data = &self.invoice;
        let header = [
            (
                data.serial_number.trim().is_empty(),
                InvoiceField::SerialNumber,
                ValidationKind::Empty,
            ),
            (
                data.previous_invoice_hash.trim().is_empty(),
                InvoiceField::PreviousInvoiceHash,
                ValidationKind::Missing,
            ),
            (
                data.cancelation.is_some() && !data.invoice_type.requires_cancelation(),
                InvoiceField::Cancelation,
                ValidationKind::Unexpected,
            ),
            (
                data.cancelation.is_some() && data.payment_means.is_some(),
                InvoiceField::PaymentMeans,
                ValidationKind::Unexpected,
            ),
        ];
        ValidationError::check(
            header
                .into_iter()
                .filter(|(failed, ..)| *failed)
                .map(|(_, field, kind)| ValidationIssue::new(field, kind))
                .collect(),
        )?;

        let totals = compute_invoice_totals(
            &data.line_items,
            data.invoice_type,
            data.cancelation.as_ref(),
        )?;
        Ok(FinalizedInvoice {
            data: self.invoice,
            totals,
        })
    }
}

impl FinalizedInvoice {
    pub fn data(&self) -> &InvoiceData {
        &self.data
    }

    pub fn totals(&self) -> &InvoiceTotals {
        &self.totals
    }

    pub fn sign(self, signer: &InvoiceSigner) -> Result<SignedInvoice, SigningError> {
        signer.sign(self)
    }
}

impl SignedInvoice {
    pub(crate) fn new(
        finalized: FinalizedInvoice,
        parts: SignatureParts,
        qr_code: String,
        document: String,
    ) -> Self {
        Self {
            finalized,
            parts,
            qr_code,
            document,
        }
    }

    pub fn data(&self) -> &InvoiceData {
        self.finalized.data()
    }

    pub fn totals(&self) -> &InvoiceTotals {
        self.finalized.totals()
    }

    pub fn signature_parts(&self) -> &SignatureParts {
        &self.parts
    }

    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    pub fn xml(&self) -> &str {
        &self.document
    }

    pub fn uuid(&self) -> Uuid {
        self.finalized.data().uuid
    }

    /// Hash the next invoice of the same device must carry as its PIH.
    pub fn invoice_hash(&self) -> &str {
        self.parts.invoice_hash()
    }

    pub fn signature(&self) -> &str {
        self.parts.signature()
    }

    /// Signed XML as base64, the `invoice` field of a submission.
    pub fn xml_base64(&self) -> String {
        Base64::encode_string(self.document.as_bytes())
    }
}

/// Read access shared by finalized and signed invoices, used by the XML
/// assembler.
pub trait InvoiceView {
    fn data(&self) -> &InvoiceData;
    fn totals(&self) -> &InvoiceTotals;
    fn qr_code(&self) -> Option<&str>;
}

impl InvoiceView for FinalizedInvoice {
    fn data(&self) -> &InvoiceData {
        self.data()
    }

    fn totals(&self) -> &InvoiceTotals {
        self.totals()
    }

    fn qr_code(&self) -> Option<&str> {
        None
    }
}

impl InvoiceView for SignedInvoice {
    fn data(&self) -> &InvoiceData {
        self.data()
    }

    fn totals(&self) -> &InvoiceTotals {
        self.totals()
    }

    fn qr_code(&self) -> Option<&str> {
        Some(self.qr_code())
    }
}
