//! Shared fixtures for unit tests.
use super::sign::InvoiceSigner;
use super::{
    Address, Discount, InvoiceBuilder, InvoiceSubType, InvoiceType, LineItem, LineItemInput,
    IdScheme, PartyId, Seller, VatCategory, VatExemption, VatRate, INITIAL_PREVIOUS_INVOICE_HASH,
};
use chrono::TimeZone;
use isocountry::CountryCode;
use k256::ecdsa::{DerSignature, SigningKey};
use rand::rngs::OsRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

pub(crate) fn seller() -> Seller {
    Seller::new(
        "Maximum Speed Tech Supply LTD",
        Address {
            country_code: CountryCode::SAU,
            city: "Riyadh".into(),
            street: "King Abdulaziz Road".into(),
            additional_street: None,
            building_number: "0000".into(),
            plot_identification: Some("0000".into()),
            postal_zone: "31952".into(),
            city_subdivision: Some("West".into()),
            country_subentity: None,
        },
        "311111111101113",
        Some(PartyId::new(IdScheme::CommercialRegistration, "454634645645654")),
    )
    .expect("valid seller")
}

pub(crate) fn line(
    id: &str,
    quantity: Decimal,
    unit_price: Decimal,
    vat_rate: VatRate,
    discount: Option<Decimal>,
) -> LineItem {
    LineItem::new(LineItemInput {
        id: id.into(),
        name: "TEST NAME".into(),
        quantity,
        unit_price,
        vat_rate,
        exemption: vat_rate.is_zero().then(|| {
            VatExemption::new(
                VatCategory::ZeroRated,
                "VATEX-SA-34-4",
                "Supply of a qualifying means of transport",
            )
        }),
        discounts: discount
            .into_iter()
            .map(|amount| Discount {
                amount,
                reason: "A discount".into(),
            })
            .collect(),
        other_taxes: vec![],
    })
    .expect("valid line")
}

/// The three-line scenario: 15% with discount, 5% with discount, zero-rated.
pub(crate) fn scenario_lines() -> Vec<LineItem> {
    vec![
        line("1", dec!(44), dec!(22), VatRate::Fifteen, Some(dec!(1))),
        line("2", dec!(10), dec!(5), VatRate::Five, Some(dec!(2))),
        line("3", dec!(10), dec!(5), VatRate::Zero, None),
    ]
}

pub(crate) fn scenario_builder(invoice_type: InvoiceType) -> InvoiceBuilder {
    scenario_builder_for(invoice_type, InvoiceSubType::Simplified)
}

pub(crate) fn scenario_builder_for(
    invoice_type: InvoiceType,
    sub_type: InvoiceSubType,
) -> InvoiceBuilder {
    InvoiceBuilder::new(
        invoice_type,
        sub_type,
        "SME00010",
        Uuid::nil(),
        chrono::Utc
            .with_ymd_and_hms(2022, 3, 13, 14, 40, 40)
            .single()
            .expect("valid timestamp"),
        1,
        INITIAL_PREVIOUS_INVOICE_HASH,
        seller(),
        scenario_lines(),
    )
}

/// Self-signed secp256k1 certificate plus its key.
pub(crate) fn signer() -> InvoiceSigner {
    let key = SigningKey::random(&mut OsRng);
    let subject =
        Name::from_str("CN=TST-886431145-399999999900003,O=Maximum Speed Tech Supply LTD,C=SA")
            .expect("subject");
    let spki = SubjectPublicKeyInfoOwned::from_key(*key.verifying_key()).expect("spki");
    let cert = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::new(&[0x01, 0x23, 0x45]).expect("serial"),
        Validity::from_now(Duration::from_secs(3600)).expect("validity"),
        subject,
        spki,
        &key,
    )
    .expect("certificate builder")
    .build::<DerSignature>()
    .expect("self-signed certificate");
    InvoiceSigner::new(cert, key).expect("matching key")
}
