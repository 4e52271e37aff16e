//! UBL 2.1 XML assembly for invoices.
//!
//! The document is first built as a small [`Element`] tree from borrowed
//! invoice data and then handed to quick-xml's serializer. Child order is the
//! order of the builder calls below, which follows the UBL schema sequence.
//! Amounts come pre-computed from [`InvoiceTotals`](super::InvoiceTotals);
//! this module only formats them.
use super::{
    Address, Cancelation, Customer, Delivery, FinalizedInvoice, InvoiceData, InvoiceTotals,
    InvoiceView, LineItem, LineItemTotals, Party, Role, SignedInvoice, TaxSubtotal,
};
use crate::decimal::to_fixed_exact;

use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::borrow::Cow;
use thiserror::Error;

pub(crate) mod namespaces;

#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("could not write invoice XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// Output layout of [`ToXml::to_xml_with_format`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum XmlFormat {
    Compact,
    #[default]
    Pretty,
}

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const PIECE_UNIT: &str = "PCE";
const VAT_SCHEME: &str = "VAT";

/// An XML element with attributes and either text or child elements.
///
/// Attribute names carry quick-xml's `@` prefix.
#[derive(Debug, Clone)]
struct Element<'a> {
    name: &'static str,
    attributes: Vec<(&'static str, Cow<'a, str>)>,
    text: Option<Cow<'a, str>>,
    children: Vec<Element<'a>>,
}

impl<'a> Element<'a> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    fn text_node(name: &'static str, text: impl Into<Cow<'a, str>>) -> Self {
        Self::new(name).with_text(text)
    }

    fn with_text(mut self, text: impl Into<Cow<'a, str>>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn attr(mut self, name: &'static str, value: impl Into<Cow<'a, str>>) -> Self {
        self.attributes.push((name, value.into()));
        self
    }

    fn child(mut self, child: Element<'a>) -> Self {
        self.children.push(child);
        self
    }

    fn child_if(self, child: Option<Element<'a>>) -> Self {
        match child {
            Some(child) => self.child(child),
            None => self,
        }
    }

    fn leaf(self, name: &'static str, text: impl Into<Cow<'a, str>>) -> Self {
        self.child(Element::text_node(name, text))
    }

    fn leaf_if(self, name: &'static str, text: Option<&'a str>) -> Self {
        self.child_if(text.map(|t| Element::text_node(name, t)))
    }

    fn children(mut self, children: impl IntoIterator<Item = Element<'a>>) -> Self {
        self.children.extend(children);
        self
    }
}

impl Serialize for Element<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = self.attributes.len() + self.children.len() + usize::from(self.text.is_some());
        let mut st = serializer.serialize_struct(self.name, len)?;
        for (name, value) in &self.attributes {
            st.serialize_field(name, value.as_ref())?;
        }
        if let Some(text) = &self.text {
            st.serialize_field("$text", text.as_ref())?;
        }
        for child in &self.children {
            st.serialize_field(child.name, child)?;
        }
        st.end()
    }
}

/// Money rendered with exactly two fractional digits.
fn money<'a>(name: &'static str, currency: &'a str, value: Decimal) -> Element<'a> {
    Element::text_node(name, to_fixed_exact(value, 2)).attr("@currencyID", currency)
}

/// Unit prices keep their own precision but never fewer than two places.
fn price<'a>(name: &'static str, currency: &'a str, value: Decimal) -> Element<'a> {
    let places = value.normalize().scale().max(2);
    Element::text_node(name, to_fixed_exact(value, places)).attr("@currencyID", currency)
}

fn percent(value: Decimal) -> Element<'static> {
    Element::text_node("cbc:Percent", to_fixed_exact(value, 2))
}

fn plain_tax_scheme() -> Element<'static> {
    Element::new("cac:TaxScheme").leaf("cbc:ID", VAT_SCHEME)
}

/// Tax scheme of invoice-level categories, qualified by its UN/ECE code list.
fn un_ece_tax_scheme() -> Element<'static> {
    Element::new("cac:TaxScheme").child(
        Element::text_node("cbc:ID", VAT_SCHEME)
            .attr("@schemeID", "UN/ECE 5153")
            .attr("@schemeAgencyID", "6"),
    )
}

fn invoice_type_code(data: &InvoiceData) -> Element<'static> {
    Element::text_node("cbc:InvoiceTypeCode", data.invoice_type.code())
        .attr("@name", data.invoice_code())
}

fn embedded_attachment(value: &str) -> Element<'_> {
    Element::new("cac:Attachment").child(
        Element::text_node("cbc:EmbeddedDocumentBinaryObject", value)
            .attr("@mimeCode", "text/plain"),
    )
}

fn counter_reference(counter: u64) -> Element<'static> {
    Element::new("cac:AdditionalDocumentReference")
        .leaf("cbc:ID", "ICV")
        .leaf("cbc:UUID", counter.to_string())
}

fn attachment_reference<'a>(id: &'static str, value: &'a str) -> Element<'a> {
    Element::new("cac:AdditionalDocumentReference")
        .leaf("cbc:ID", id)
        .child(embedded_attachment(value))
}

fn billing_reference(cancelation: &Cancelation) -> Element<'_> {
    Element::new("cac:BillingReference").child(
        Element::new("cac:InvoiceDocumentReference")
            .leaf("cbc:ID", cancelation.canceled_serial_invoice_number()),
    )
}

fn postal_address(address: &Address) -> Element<'_> {
    Element::new("cac:PostalAddress")
        .leaf("cbc:StreetName", address.street.as_str())
        .leaf_if("cbc:AdditionalStreetName", address.additional_street.as_deref())
        .leaf("cbc:BuildingNumber", address.building_number.as_str())
        .leaf_if("cbc:PlotIdentification", address.plot_identification.as_deref())
        .leaf_if("cbc:CitySubdivisionName", address.city_subdivision.as_deref())
        .leaf("cbc:CityName", address.city.as_str())
        .leaf("cbc:PostalZone", address.postal_zone.as_str())
        .leaf_if("cbc:CountrySubentity", address.country_subentity.as_deref())
        .child(
            Element::new("cac:Country")
                .leaf("cbc:IdentificationCode", address.country_code.alpha2()),
        )
}

/// `cac:AccountingSupplierParty` or `cac:AccountingCustomerParty`.
fn party<R: Role>(party: &Party<R>) -> Element<'_> {
    let identification = party.identification().map(|id| {
        Element::new("cac:PartyIdentification").child(
            Element::text_node("cbc:ID", id.value()).attr("@schemeID", id.scheme().code()),
        )
    });
    let tax_scheme = party.vat_number().map(|vat| {
        Element::new("cac:PartyTaxScheme")
            .leaf("cbc:CompanyID", vat.as_str())
            .child(plain_tax_scheme())
    });

    Element::new(R::ELEMENT).child(
        Element::new("cac:Party")
            .child_if(identification)
            .child(postal_address(party.address()))
            .child_if(tax_scheme)
            .child(
                Element::new("cac:PartyLegalEntity")
                    .leaf("cbc:RegistrationName", party.registration_name()),
            ),
    )
}

fn delivery(delivery: &Delivery) -> Element<'static> {
    Element::new("cac:Delivery")
        .leaf("cbc:ActualDeliveryDate", delivery.actual_delivery_date.to_string())
        .child_if(
            delivery
                .latest_delivery_date
                .map(|date| Element::text_node("cbc:LatestDeliveryDate", date.to_string())),
        )
}

/// `cac:PaymentMeans`, present only for cancelations or an explicit method.
/// The builder never lets both be set.
fn payment_means(data: &InvoiceData) -> Option<Element<'_>> {
    let (code, note) = match (data.cancelation.as_ref(), data.payment_means) {
        (Some(cancelation), _) => (
            cancelation.payment_means().code(),
            Some(cancelation.reason()).filter(|reason| !reason.trim().is_empty()),
        ),
        (None, Some(means)) => (means.code(), None),
        (None, None) => return None,
    };
    Some(
        Element::new("cac:PaymentMeans")
            .leaf("cbc:PaymentMeansCode", code)
            .leaf_if("cbc:InstructionNote", note),
    )
}

fn tax_subtotal<'a>(currency: &'a str, subtotal: &'a TaxSubtotal) -> Element<'a> {
    let category = Element::new("cac:TaxCategory")
        .child(
            Element::text_node("cbc:ID", subtotal.category.code())
                .attr("@schemeID", "UN/ECE 5305")
                .attr("@schemeAgencyID", "6"),
        )
        .child(percent(subtotal.rate.percent()))
        .leaf_if(
            "cbc:TaxExemptionReasonCode",
            subtotal.exemption_reason_code.as_deref(),
        )
        .leaf_if("cbc:TaxExemptionReason", subtotal.exemption_reason.as_deref())
        .child(un_ece_tax_scheme());

    Element::new("cac:TaxSubtotal")
        .child(money("cbc:TaxableAmount", currency, subtotal.taxable_amount))
        .child(money("cbc:TaxAmount", currency, subtotal.tax_amount))
        .child(category)
}

/// Two `cac:TaxTotal` blocks: the one carrying the per-category breakdown,
/// then the bare document-currency total.
fn tax_totals<'a>(currency: &'a str, totals: &'a InvoiceTotals) -> [Element<'a>; 2] {
    let total = || {
        Element::new("cac:TaxTotal").child(money("cbc:TaxAmount", currency, totals.tax_amount()))
    };
    [
        total().children(
            totals
                .breakdown()
                .subtotals()
                .iter()
                .map(|subtotal| tax_subtotal(currency, subtotal)),
        ),
        total(),
    ]
}

fn legal_monetary_total<'a>(currency: &'a str, totals: &InvoiceTotals) -> Element<'a> {
    Element::new("cac:LegalMonetaryTotal")
        .child(money("cbc:LineExtensionAmount", currency, totals.line_extension()))
        .child(money(
            "cbc:TaxExclusiveAmount",
            currency,
            totals.tax_exclusive_amount(),
        ))
        .child(money(
            "cbc:TaxInclusiveAmount",
            currency,
            totals.tax_inclusive_amount(),
        ))
        .child(money("cbc:PrepaidAmount", currency, totals.prepaid_amount()))
        .child(money("cbc:PayableAmount", currency, totals.payable_amount()))
}

fn invoice_line<'a>(currency: &'a str, item: &'a LineItem, totals: &LineItemTotals) -> Element<'a> {
    let tax_total = Element::new("cac:TaxTotal")
        .child(money("cbc:TaxAmount", currency, totals.vat_amount))
        .child(money("cbc:RoundingAmount", currency, totals.rounding_amount));

    let classified = Element::new("cac:ClassifiedTaxCategory")
        .leaf("cbc:ID", item.vat_category().code())
        .child(percent(item.vat_rate().percent()))
        .child(plain_tax_scheme());

    let allowances = item.discounts().iter().map(|discount| {
        Element::new("cac:AllowanceCharge")
            .leaf("cbc:ChargeIndicator", "false")
            .leaf("cbc:AllowanceChargeReason", discount.reason.as_str())
            .child(price("cbc:Amount", currency, discount.amount))
            .child(price("cbc:BaseAmount", currency, item.unit_price()))
    });

    Element::new("cac:InvoiceLine")
        .leaf("cbc:ID", item.id())
        .child(
            Element::text_node("cbc:InvoicedQuantity", item.quantity().normalize().to_string())
                .attr("@unitCode", PIECE_UNIT),
        )
        .child(money("cbc:LineExtensionAmount", currency, totals.line_extension))
        .child(tax_total)
        .child(
            Element::new("cac:Item")
                .leaf("cbc:Name", item.name())
                .child(classified),
        )
        .child(
            Element::new("cac:Price")
                .child(price("cbc:PriceAmount", currency, totals.net_unit_price))
                .children(allowances),
        )
}

/// The complete `Invoice` element of a finalized or signed invoice.
fn document<T: InvoiceView + ?Sized>(view: &T) -> Element<'_> {
    let data = view.data();
    let totals = view.totals();
    let currency = data.currency.code();

    let customer = data
        .buyer
        .as_ref()
        .map_or_else(|| Element::new(Customer::ELEMENT), party);
    let lines = data
        .line_items
        .iter()
        .zip(totals.lines())
        .map(|(item, line_totals)| invoice_line(currency, item, line_totals));

    Element::new("Invoice")
        .attr("@xmlns", namespaces::UBL)
        .attr("@xmlns:cac", namespaces::CAC)
        .attr("@xmlns:cbc", namespaces::CBC)
        .attr("@xmlns:ext", namespaces::EXT)
        .leaf("cbc:ProfileID", "reporting:1.0")
        .leaf("cbc:ID", data.serial_number.as_str())
        .leaf("cbc:UUID", data.uuid.to_string())
        .leaf("cbc:IssueDate", data.issue_datetime.date_naive().to_string())
        .leaf("cbc:IssueTime", data.issue_datetime.format("%H:%M:%S").to_string())
        .child(invoice_type_code(data))
        .leaf("cbc:DocumentCurrencyCode", currency)
        .leaf("cbc:TaxCurrencyCode", currency)
        .child_if(data.cancelation.as_ref().map(billing_reference))
        .child(counter_reference(data.invoice_counter))
        .child(attachment_reference("PIH", &data.previous_invoice_hash))
        .child_if(view.qr_code().map(|qr| attachment_reference("QR", qr)))
        .child(party(&data.seller))
        .child(customer)
        .child_if(data.delivery.as_ref().map(delivery))
        .child_if(payment_means(data))
        .children(tax_totals(currency, totals))
        .child(legal_monetary_total(currency, totals))
        .children(lines)
}

/// Serialize invoices to XML.
///
/// # Examples
/// ```rust,no_run
/// use zatca_egs::invoice::xml::ToXml;
/// use zatca_egs::invoice::FinalizedInvoice;
///
/// # fn demo(invoice: &FinalizedInvoice) -> Result<(), zatca_egs::invoice::xml::InvoiceXmlError> {
/// let xml = invoice.to_xml()?;
/// assert!(xml.starts_with("<?xml"));
/// # Ok(())
/// # }
/// ```
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError>;

    fn to_xml(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::default())
    }
}

impl ToXml for FinalizedInvoice {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        let mut out = String::from(XML_DECLARATION);
        out.push('\n');
        let mut serializer = QuickXmlSerializer::new(&mut out);
        if format == XmlFormat::Pretty {
            serializer.indent(' ', 4);
        }
        document(self).serialize(serializer)?;
        Ok(out)
    }
}

impl ToXml for SignedInvoice {
    /// A signed document is returned byte-for-byte; `format` is ignored.
    fn to_xml_with_format(&self, _format: XmlFormat) -> Result<String, InvoiceXmlError> {
        Ok(self.xml().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::test_support::scenario_builder;
    use crate::invoice::{
        Cancelation, InvoiceType, PaymentMeansCode, INITIAL_PREVIOUS_INVOICE_HASH,
    };

    #[test]
    fn element_serializes_attributes_text_and_children_in_order() {
        let element = Element::new("cac:Outer")
            .attr("@kind", "x")
            .leaf("cbc:B", "2")
            .child(money("cbc:A", "SAR", Decimal::new(15, 1)))
            .leaf_if("cbc:Skipped", None);
        let mut out = String::new();
        element.serialize(QuickXmlSerializer::new(&mut out)).unwrap();
        assert_eq!(
            out,
            r#"<cac:Outer kind="x"><cbc:B>2</cbc:B><cbc:A currencyID="SAR">1.50</cbc:A></cac:Outer>"#
        );
    }

    #[test]
    fn assembles_header_totals_and_lines() {
        let invoice = scenario_builder(InvoiceType::Invoice)
            .payment_means(PaymentMeansCode::Cash)
            .build()
            .unwrap();
        let xml = invoice.to_xml().unwrap();

        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.contains(r#"<cbc:InvoiceTypeCode name="0200000">388</cbc:InvoiceTypeCode>"#));
        assert!(xml.contains("<cbc:IssueDate>2022-03-13</cbc:IssueDate>"));
        assert!(xml.contains("<cbc:IssueTime>14:40:40</cbc:IssueTime>"));
        assert!(xml.contains("<cbc:UUID>1</cbc:UUID>"));
        assert!(xml.contains(INITIAL_PREVIOUS_INVOICE_HASH));
        assert!(xml.contains("<cbc:PaymentMeansCode>10</cbc:PaymentMeansCode>"));
        assert!(xml.contains(r#"<cbc:TaxAmount currencyID="SAR">140.10</cbc:TaxAmount>"#));
        assert!(xml.contains(
            r#"<cbc:TaxInclusiveAmount currencyID="SAR">1144.10</cbc:TaxInclusiveAmount>"#
        ));
        assert!(xml.contains(r#"<cbc:PayableAmount currencyID="SAR">1144.10</cbc:PayableAmount>"#));
        assert!(xml.contains(r#"<cbc:RoundingAmount currencyID="SAR">1062.60</cbc:RoundingAmount>"#));
        assert!(xml.contains(r#"<cbc:PriceAmount currencyID="SAR">21.00</cbc:PriceAmount>"#));
        assert!(xml.contains("<cbc:TaxExemptionReasonCode>VATEX-SA-34-4</cbc:TaxExemptionReasonCode>"));
        assert!(!xml.contains("<cac:BillingReference>"));
        assert!(!xml.contains(">QR<"));
        assert_eq!(xml.matches("<cac:InvoiceLine>").count(), 3);
        assert_eq!(xml.matches("<cac:TaxSubtotal>").count(), 3);
        assert_eq!(xml.matches("<cac:TaxTotal>").count(), 5);
    }

    #[test]
    fn subtotals_follow_fixed_order() {
        let xml = scenario_builder(InvoiceType::Invoice).build().unwrap().to_xml().unwrap();
        let fifteen = xml.find(r#"<cbc:TaxableAmount currencyID="SAR">924.00</cbc:TaxableAmount>"#);
        let five = xml.find(r#"<cbc:TaxableAmount currencyID="SAR">30.00</cbc:TaxableAmount>"#);
        let zero = xml.find(r#"<cbc:TaxableAmount currencyID="SAR">50.00</cbc:TaxableAmount>"#);
        assert!(fifteen.unwrap() < five.unwrap());
        assert!(five.unwrap() < zero.unwrap());
        assert!(!xml.contains("<cac:PaymentMeans>"));
    }

    #[test]
    fn breakdown_tax_total_comes_first() {
        let xml = scenario_builder(InvoiceType::Invoice)
            .build()
            .unwrap()
            .to_xml_with_format(XmlFormat::Compact)
            .unwrap();
        let blocks: Vec<&str> = xml
            .split("<cac:TaxTotal>")
            .skip(1)
            .take(2)
            .collect();
        assert!(blocks[0].starts_with(
            r#"<cbc:TaxAmount currencyID="SAR">140.10</cbc:TaxAmount><cac:TaxSubtotal>"#
        ));
        assert!(blocks[1].starts_with(
            r#"<cbc:TaxAmount currencyID="SAR">140.10</cbc:TaxAmount></cac:TaxTotal>"#
        ));
    }

    #[test]
    fn credit_note_carries_billing_reference_and_cancel_payment_means() {
        let invoice = scenario_builder(InvoiceType::CreditNote)
            .cancelation(Cancelation::new(
                "SME00002",
                PaymentMeansCode::BankCard,
                "Goods returned",
            ))
            .build()
            .unwrap();
        let xml = invoice.to_xml_with_format(XmlFormat::Compact).unwrap();

        assert!(xml.contains(
            "<cac:BillingReference><cac:InvoiceDocumentReference><cbc:ID>SME00002</cbc:ID></cac:InvoiceDocumentReference></cac:BillingReference>"
        ));
        assert!(xml.contains(
            "<cac:PaymentMeans><cbc:PaymentMeansCode>48</cbc:PaymentMeansCode><cbc:InstructionNote>Goods returned</cbc:InstructionNote></cac:PaymentMeans>"
        ));
        assert!(xml.contains(r#"name="0200000">381<"#));
    }
}
