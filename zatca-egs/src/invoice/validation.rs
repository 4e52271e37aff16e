//! Structured validation failures for invoice input.
use std::fmt;
use thiserror::Error;

/// Input the invoice pipeline refused.
///
/// Displays as the messages of its issues joined by `"; "`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// `Ok(())` when `issues` is empty.
    pub(crate) fn check(issues: Vec<ValidationIssue>) -> Result<(), Self> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Self::new(issues))
        }
    }

    pub fn missing_exemption(line: usize) -> Self {
        ValidationIssue::new(InvoiceField::VatExemption, ValidationKind::Missing)
            .on_line(line)
            .into()
    }

    pub fn missing_cancelation() -> Self {
        ValidationIssue::new(InvoiceField::Cancelation, ValidationKind::Missing).into()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn contains(&self, field: InvoiceField, kind: ValidationKind) -> bool {
        self.issues.iter().any(|i| i.field == field && i.kind == kind)
    }
}

impl From<ValidationIssue> for ValidationError {
    fn from(issue: ValidationIssue) -> Self {
        Self::new(vec![issue])
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut issues = self.issues.iter();
        match issues.next() {
            None => f.write_str("invoice validation failed"),
            Some(first) => {
                write!(f, "{first}")?;
                issues.try_for_each(|issue| write!(f, "; {issue}"))
            }
        }
    }
}

/// One rejected field, optionally pinned to a line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    /// Zero-based position in the invoice's line items.
    pub line: Option<usize>,
}

impl ValidationIssue {
    pub fn new(field: InvoiceField, kind: ValidationKind) -> Self {
        Self {
            field,
            kind,
            line: None,
        }
    }

    pub fn on_line(self, line: usize) -> Self {
        Self {
            line: Some(line),
            ..self
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use InvoiceField::{Cancelation, PaymentMeans, VatExemption};
        use ValidationKind::{Missing, Unexpected};

        match (self.field, self.kind) {
            (VatExemption, Missing) => f.write_str("missing VAT exemption category"),
            (VatExemption, Unexpected) => f.write_str("VAT exemption category on a non-zero rate"),
            (Cancelation, Missing) => f.write_str("missing cancelation reference"),
            (Cancelation, Unexpected) => f.write_str("cancelation reference on a plain invoice"),
            (PaymentMeans, Unexpected) => {
                f.write_str("payment means set next to a cancelation reference")
            }
            (field, kind) => write!(f, "{} {}", field.label(), kind.label()),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvoiceField {
    SerialNumber,
    PreviousInvoiceHash,
    Cancelation,
    PaymentMeans,
    LineItems,
    LineItemId,
    LineItemName,
    LineItemQuantity,
    LineItemUnitPrice,
    LineItemDiscount,
    LineItemVatRate,
    LineItemOtherTax,
    VatExemption,
}

impl InvoiceField {
    const fn label(self) -> &'static str {
        match self {
            Self::SerialNumber => "serial number",
            Self::PreviousInvoiceHash => "previous invoice hash",
            Self::Cancelation => "cancelation reference",
            Self::PaymentMeans => "payment means",
            Self::LineItems => "line items",
            Self::LineItemId => "line item id",
            Self::LineItemName => "line item name",
            Self::LineItemQuantity => "line item quantity",
            Self::LineItemUnitPrice => "line item unit price",
            Self::LineItemDiscount => "line item discount",
            Self::LineItemVatRate => "line item VAT rate",
            Self::LineItemOtherTax => "line item additional tax",
            Self::VatExemption => "VAT exemption category",
        }
    }
}

/// What is wrong with an [`InvoiceField`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    OutOfRange,
    Unexpected,
    NonFinite,
}

impl ValidationKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Missing => "is missing",
            Self::Empty => "is empty",
            Self::InvalidFormat => "has an invalid format",
            Self::OutOfRange => "is out of range",
            Self::Unexpected => "is not allowed here",
            Self::NonFinite => "is not a finite number",
        }
    }
}
