//! Line items and the VAT vocabulary they carry.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::decimal;

use super::validation::{InvoiceField, ValidationError, ValidationIssue, ValidationKind};

/// VAT rate of a line item. Only the rates the authority accepts exist.
///
/// Serialized as the fractional rate (`0.15`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub enum VatRate {
    Zero,
    Five,
    Fifteen,
}

impl VatRate {
    /// Fraction applied to the taxable amount.
    pub fn fraction(self) -> Decimal {
        match self {
            VatRate::Zero => Decimal::ZERO,
            VatRate::Five => Decimal::new(5, 2),
            VatRate::Fifteen => Decimal::new(15, 2),
        }
    }

    /// Whole percent written into `cbc:Percent`.
    pub fn percent(self) -> Decimal {
        (self.fraction() * Decimal::ONE_HUNDRED).normalize()
    }

    pub fn is_zero(self) -> bool {
        self == VatRate::Zero
    }
}

impl TryFrom<Decimal> for VatRate {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        [VatRate::Zero, VatRate::Five, VatRate::Fifteen]
            .into_iter()
            .find(|rate| rate.fraction() == value)
            .ok_or_else(|| {
                ValidationIssue::new(InvoiceField::LineItemVatRate, ValidationKind::OutOfRange)
                    .into()
            })
    }
}

impl From<VatRate> for Decimal {
    fn from(rate: VatRate) -> Self {
        rate.fraction()
    }
}

/// UN/ECE 5305 tax category.
///
/// # Examples
/// ```rust
/// use zatca_egs::invoice::VatCategory;
///
/// assert_eq!(VatCategory::ZeroRated.code(), "Z");
/// assert_eq!("E".parse::<VatCategory>()?, VatCategory::Exempt);
/// # Ok::<(), zatca_egs::invoice::ValidationError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VatCategory {
    #[serde(rename = "S")]
    Standard,
    #[serde(rename = "Z")]
    ZeroRated,
    #[serde(rename = "E")]
    Exempt,
    #[serde(rename = "O")]
    OutOfScope,
}

impl VatCategory {
    pub fn code(self) -> &'static str {
        match self {
            Self::Standard => "S",
            Self::ZeroRated => "Z",
            Self::Exempt => "E",
            Self::OutOfScope => "O",
        }
    }
}

impl FromStr for VatCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Standard, Self::ZeroRated, Self::Exempt, Self::OutOfScope]
            .into_iter()
            .find(|category| category.code() == s.trim())
            .ok_or_else(|| {
                ValidationIssue::new(InvoiceField::VatExemption, ValidationKind::InvalidFormat)
                    .into()
            })
    }
}

/// Why a zero-rated line carries no VAT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatExemption {
    pub code: VatCategory,
    /// `VATEX-SA-*` code.
    pub reason_code: Option<String>,
    pub reason: Option<String>,
}

impl VatExemption {
    pub fn new(
        code: VatCategory,
        reason_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            code,
            reason_code: Some(reason_code.into()),
            reason: Some(reason.into()),
        }
    }
}

/// Per-unit discount on a line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub amount: Decimal,
    pub reason: String,
}

/// Additional percentage tax levied on a line's extension amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherTax {
    pub rate: VatRate,
}

/// Unchecked line item as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub id: String,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: VatRate,
    #[serde(default)]
    pub exemption: Option<VatExemption>,
    #[serde(default)]
    pub discounts: Vec<Discount>,
    #[serde(default)]
    pub other_taxes: Vec<OtherTax>,
}

impl LineItemInput {
    /// Line with no discounts or additional taxes from float amounts.
    ///
    /// # Errors
    /// NaN and infinite amounts are rejected per field.
    pub fn from_f64(
        id: impl Into<String>,
        name: impl Into<String>,
        quantity: f64,
        unit_price: f64,
        vat_rate: VatRate,
    ) -> Result<Self, ValidationError> {
        let amount = |field, value| {
            decimal::from_f64(value)
                .map_err(|_| ValidationIssue::new(field, ValidationKind::NonFinite))
        };
        match (
            amount(InvoiceField::LineItemQuantity, quantity),
            amount(InvoiceField::LineItemUnitPrice, unit_price),
        ) {
            (Ok(quantity), Ok(unit_price)) => Ok(Self {
                id: id.into(),
                name: name.into(),
                quantity,
                unit_price,
                vat_rate,
                exemption: None,
                discounts: Vec::new(),
                other_taxes: Vec::new(),
            }),
            (quantity, unit_price) => Err(ValidationError::new(
                [quantity.err(), unit_price.err()].into_iter().flatten().collect(),
            )),
        }
    }

    fn issues(&self) -> Vec<ValidationIssue> {
        use InvoiceField as F;
        use ValidationKind as K;

        let discount_total: Decimal = self.discounts.iter().map(|d| d.amount).sum();
        let exemption_issue = match (&self.exemption, self.vat_rate.is_zero()) {
            (None, true) => Some(K::Missing),
            (Some(_), false) => Some(K::Unexpected),
            (Some(ex), true) if ex.code == VatCategory::Standard => Some(K::InvalidFormat),
            _ => None,
        };

        [
            self.id.trim().is_empty().then_some((F::LineItemId, K::Empty)),
            self.name.trim().is_empty().then_some((F::LineItemName, K::Empty)),
            (self.quantity <= Decimal::ZERO).then_some((F::LineItemQuantity, K::OutOfRange)),
            self.unit_price
                .is_sign_negative()
                .then_some((F::LineItemUnitPrice, K::OutOfRange)),
            (self.discounts.iter().any(|d| d.amount.is_sign_negative())
                || discount_total > self.unit_price)
                .then_some((F::LineItemDiscount, K::OutOfRange)),
            self.other_taxes
                .iter()
                .any(|t| t.rate.is_zero())
                .then_some((F::LineItemOtherTax, K::OutOfRange)),
            exemption_issue.map(|kind| (F::VatExemption, kind)),
        ]
        .into_iter()
        .flatten()
        .map(|(field, kind)| ValidationIssue::new(field, kind))
        .collect()
    }
}

/// A line item whose input has passed validation.
///
/// # Examples
/// ```rust
/// use rust_decimal::Decimal;
/// use zatca_egs::invoice::{LineItem, LineItemInput, VatRate};
///
/// let item = LineItem::new(LineItemInput {
///     id: "1".into(),
///     name: "TEST NAME".into(),
///     quantity: Decimal::from(44),
///     unit_price: Decimal::from(22),
///     vat_rate: VatRate::Fifteen,
///     exemption: None,
///     discounts: vec![],
///     other_taxes: vec![],
/// })?;
/// assert_eq!(item.quantity(), Decimal::from(44));
/// # Ok::<(), zatca_egs::invoice::ValidationError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LineItemInput", into = "LineItemInput")]
pub struct LineItem(LineItemInput);

impl LineItem {
    /// # Errors
    /// Reports every problem at once, including a zero-rated line without an
    /// exemption category and an exemption on a taxed line.
    pub fn new(input: LineItemInput) -> Result<Self, ValidationError> {
        ValidationError::check(input.issues())?;
        Ok(Self(input))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn quantity(&self) -> Decimal {
        self.0.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.0.unit_price
    }

    pub fn vat_rate(&self) -> VatRate {
        self.0.vat_rate
    }

    pub fn exemption(&self) -> Option<&VatExemption> {
        self.0.exemption.as_ref()
    }

    pub fn discounts(&self) -> &[Discount] {
        &self.0.discounts
    }

    pub fn other_taxes(&self) -> &[OtherTax] {
        &self.0.other_taxes
    }

    /// Category written into `cac:ClassifiedTaxCategory`.
    pub fn vat_category(&self) -> VatCategory {
        match (&self.0.exemption, self.0.vat_rate) {
            (_, VatRate::Five | VatRate::Fifteen) => VatCategory::Standard,
            (Some(ex), VatRate::Zero) => ex.code,
            (None, VatRate::Zero) => VatCategory::ZeroRated,
        }
    }
}

impl TryFrom<LineItemInput> for LineItem {
    type Error = ValidationError;

    fn try_from(input: LineItemInput) -> Result<Self, Self::Error> {
        Self::new(input)
    }
}

impl From<LineItem> for LineItemInput {
    fn from(item: LineItem) -> Self {
        item.0
    }
}
