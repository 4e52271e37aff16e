//! Tax calculation engine.
//!
//! Every amount is computed in full precision and rounded half-up to two
//! places only at fixed checkpoints:
//!
//! * per line: the discount total, the extension amount and the displayed
//!   VAT amount;
//! * per invoice: each total after summing the unrounded per-line values.
//!
//! Invoice-level tax is therefore `round(sum(exact line taxes))` and never
//! the sum of already-rounded line taxes.
use rust_decimal::Decimal;
use serde::Serialize;

use super::{
    Cancelation, InvoiceField, InvoiceType, LineItem, ValidationError, ValidationIssue,
    ValidationKind, VatCategory, VatRate,
};
use crate::decimal::round_money;

/// Amounts derived from a single line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItemTotals {
    /// Sum of the per-unit discounts.
    pub discount_total: Decimal,
    /// Unit price after per-unit discounts.
    pub net_unit_price: Decimal,
    /// `round(quantity * (unit price - discount total), 2)`.
    pub line_extension: Decimal,
    /// Line VAT as displayed on the line, `round(line_extension * rate, 2)`.
    pub vat_amount: Decimal,
    /// Unrounded VAT feeding the invoice totals.
    pub vat_amount_exact: Decimal,
    /// Unrounded amounts of each additional tax, in input order.
    pub other_tax_amounts: Vec<(VatRate, Decimal)>,
    /// Line extension plus line VAT.
    pub rounding_amount: Decimal,
}

/// One `cac:TaxSubtotal` bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxSubtotal {
    pub category: VatCategory,
    pub rate: VatRate,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
    pub exemption_reason_code: Option<String>,
    pub exemption_reason: Option<String>,
}

/// Tax subtotals ordered 15%, 5%, then zero-rated buckets by first-seen exemption code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaxBreakdown {
    subtotals: Vec<TaxSubtotal>,
}

impl TaxBreakdown {
    pub fn subtotals(&self) -> &[TaxSubtotal] {
        &self.subtotals
    }

    /// Bucket for a non-zero rate.
    pub fn rate(&self, rate: VatRate) -> Option<&TaxSubtotal> {
        self.subtotals
            .iter()
            .find(|s| s.rate == rate && s.category == VatCategory::Standard)
    }

    /// Zero-rated bucket for an exemption code.
    pub fn exemption(&self, category: VatCategory) -> Option<&TaxSubtotal> {
        self.subtotals
            .iter()
            .find(|s| s.rate == VatRate::Zero && s.category == category)
    }
}

/// Invoice-level monetary totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    lines: Vec<LineItemTotals>,
    breakdown: TaxBreakdown,
    line_extension: Decimal,
    tax_amount: Decimal,
}

impl InvoiceTotals {
    pub fn lines(&self) -> &[LineItemTotals] {
        &self.lines
    }

    pub fn breakdown(&self) -> &TaxBreakdown {
        &self.breakdown
    }

    pub fn line_extension(&self) -> Decimal {
        self.line_extension
    }

    pub fn tax_exclusive_amount(&self) -> Decimal {
        self.line_extension
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }

    pub fn tax_inclusive_amount(&self) -> Decimal {
        self.tax_exclusive_amount() + self.tax_amount
    }

    pub fn prepaid_amount(&self) -> Decimal {
        Decimal::ZERO
    }

    pub fn payable_amount(&self) -> Decimal {
        self.tax_inclusive_amount() - self.prepaid_amount()
    }
}

/// Compute the derived amounts of one line item.
pub fn compute_line_totals(item: &LineItem) -> LineItemTotals {
    let discount_total = round_money(item.discounts().iter().map(|d| d.amount).sum());
    let net_unit_price = item.unit_price() - discount_total;
    let line_extension = round_money(item.quantity() * net_unit_price);
    let vat_amount_exact = line_extension * item.vat_rate().fraction();
    let vat_amount = round_money(vat_amount_exact);
    let other_tax_amounts = item
        .other_taxes()
        .iter()
        .map(|tax| (tax.rate, line_extension * tax.rate.fraction()))
        .collect();

    LineItemTotals {
        discount_total,
        net_unit_price,
        line_extension,
        vat_amount,
        vat_amount_exact,
        other_tax_amounts,
        rounding_amount: line_extension + vat_amount,
    }
}

/// Compute every line's totals, the tax breakdown and the invoice totals.
///
/// # Errors
/// Fails before computing anything when a credit or debit note carries no
/// [`Cancelation`], when there are no line items, or when a zero-rated line
/// has no exemption category.
pub fn compute_invoice_totals(
    line_items: &[LineItem],
    invoice_type: InvoiceType,
    cancelation: Option<&Cancelation>,
) -> Result<InvoiceTotals, ValidationError> {
    if invoice_type.requires_cancelation() && cancelation.is_none() {
        return Err(ValidationError::missing_cancelation());
    }
    if line_items.is_empty() {
        return Err(ValidationIssue::new(InvoiceField::LineItems, ValidationKind::Empty).into());
    }

    let lines: Vec<LineItemTotals> = line_items.iter().map(compute_line_totals).collect();
    let breakdown = breakdown(line_items, &lines)?;

    let line_extension = round_money(lines.iter().map(|l| l.line_extension).sum());
    // Each bucket is summed exactly then rounded; the document total must
    // equal the sum of its subtotals.
    let tax_amount = breakdown.subtotals.iter().map(|s| s.tax_amount).sum();

    Ok(InvoiceTotals {
        lines,
        breakdown,
        line_extension,
        tax_amount,
    })
}

#[derive(Default)]
struct Bucket {
    taxable: Decimal,
    tax: Decimal,
    seen: bool,
}

impl Bucket {
    fn add(&mut self, taxable: Decimal, tax: Decimal) {
        self.taxable += taxable;
        self.tax += tax;
        self.seen = true;
    }
}

#[derive(Default)]
struct Buckets {
    fifteen: Bucket,
    five: Bucket,
    zero: Vec<(VatCategory, Option<String>, Option<String>, Bucket)>,
}

impl Buckets {
    fn add_rated(mut self, rate: VatRate, taxable: Decimal, tax: Decimal) -> Self {
        match rate {
            VatRate::Fifteen => self.fifteen.add(taxable, tax),
            VatRate::Five => self.five.add(taxable, tax),
            VatRate::Zero => {}
        }
        self
    }

    fn add_exempt(
        mut self,
        index: usize,
        item: &LineItem,
        totals: &LineItemTotals,
    ) -> Result<Self, ValidationError> {
        let exemption = item
            .exemption()
            .ok_or_else(|| ValidationError::missing_exemption(index))?;
        match self.zero.iter_mut().find(|(code, ..)| *code == exemption.code) {
            Some((.., bucket)) => bucket.add(totals.line_extension, totals.vat_amount_exact),
            None => {
                let mut bucket = Bucket::default();
                bucket.add(totals.line_extension, totals.vat_amount_exact);
                self.zero.push((
                    exemption.code,
                    exemption.reason_code.clone(),
                    exemption.reason.clone(),
                    bucket,
                ));
            }
        }
        Ok(self)
    }
}

fn breakdown(items: &[LineItem], lines: &[LineItemTotals]) -> Result<TaxBreakdown, ValidationError> {
    let buckets = items.iter().zip(lines).enumerate().try_fold(
        Buckets::default(),
        |acc, (index, (item, totals))| -> Result<Buckets, ValidationError> {
            let acc = if item.vat_rate().is_zero() {
                acc.add_exempt(index, item, totals)?
            } else {
                acc.add_rated(item.vat_rate(), totals.line_extension, totals.vat_amount_exact)
            };
            Ok(totals
                .other_tax_amounts
                .iter()
                .fold(acc, |acc, (rate, amount)| {
                    acc.add_rated(*rate, totals.line_extension, *amount)
                }))
        },
    )?;

    let rated = [
        (VatRate::Fifteen, buckets.fifteen),
        (VatRate::Five, buckets.five),
    ]
    .into_iter()
    .filter(|(_, bucket)| bucket.seen)
    .map(|(rate, bucket)| TaxSubtotal {
        category: VatCategory::Standard,
        rate,
        taxable_amount: round_money(bucket.taxable),
        tax_amount: round_money(bucket.tax),
        exemption_reason_code: None,
        exemption_reason: None,
    });
    let zero = buckets
        .zero
        .into_iter()
        .map(|(category, reason_code, reason, bucket)| TaxSubtotal {
            category,
            rate: VatRate::Zero,
            taxable_amount: round_money(bucket.taxable),
            tax_amount: round_money(bucket.tax),
            exemption_reason_code: reason_code,
            exemption_reason: reason,
        });

    Ok(TaxBreakdown {
        subtotals: rated.chain(zero).collect(),
    })
}
