use base64ct::{Base64, Encoding};
use chrono::{DateTime, TimeZone, Utc};
use isocountry::CountryCode;
use k256::ecdsa::{DerSignature, SigningKey};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::Encode;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;
use zatca_egs::invoice::sign::InvoiceSigner;
use zatca_egs::invoice::{
    Address, Discount, InvoiceBuilder, InvoiceSubType, InvoiceType, LineItem, LineItemInput,
    IdScheme, PartyId, Seller, VatCategory, VatExemption, VatRate,
};

#[allow(dead_code)]
pub fn seller() -> Seller {
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
        "399999999900003",
        Some(PartyId::new(IdScheme::CommercialRegistration, "454634645645654")),
    )
    .expect("valid seller")
}

#[allow(dead_code)]
pub fn line(
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
    .expect("valid line item")
}

/// (44 x 22, 15%, -1), (10 x 5, 5%, -2), (10 x 5, zero-rated).
#[allow(dead_code)]
pub fn scenario_lines() -> Vec<LineItem> {
    vec![
        line("1", dec!(44), dec!(22), VatRate::Fifteen, Some(dec!(1))),
        line("2", dec!(10), dec!(5), VatRate::Five, Some(dec!(2))),
        line("3", dec!(10), dec!(5), VatRate::Zero, None),
    ]
}

#[allow(dead_code)]
pub fn issue_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 3, 13, 14, 40, 40)
        .single()
        .expect("valid timestamp")
}

#[allow(dead_code)]
pub fn invoice_builder(
    sub_type: InvoiceSubType,
    serial: &str,
    counter: u64,
    previous_invoice_hash: &str,
) -> InvoiceBuilder {
    InvoiceBuilder::new(
        InvoiceType::Invoice,
        sub_type,
        serial,
        Uuid::new_v4(),
        issue_datetime(),
        counter,
        previous_invoice_hash,
        seller(),
        scenario_lines(),
    )
}

/// Self-signed certificate for `key`, standing in for a ZATCA-issued one.
#[allow(dead_code)]
pub fn self_signed_certificate(key: &SigningKey) -> Certificate {
    let subject = Name::from_str("CN=TST-886431145-399999999900003,O=Maximum Speed Tech Supply LTD,C=SA")
        .expect("subject");
    let spki = SubjectPublicKeyInfoOwned::from_key(*key.verifying_key()).expect("spki");
    CertificateBuilder::new(
        Profile::Root,
        SerialNumber::new(&[0x01, 0x23, 0x45]).expect("serial"),
        Validity::from_now(Duration::from_secs(3600)).expect("validity"),
        subject,
        spki,
        key,
    )
    .expect("certificate builder")
    .build::<DerSignature>()
    .expect("self-signed certificate")
}

/// `binarySecurityToken` as ZATCA returns it: base64 of the base64 DER.
#[allow(dead_code)]
pub fn binary_security_token(certificate: &Certificate) -> String {
    let der = certificate.to_der().expect("certificate der");
    Base64::encode_string(Base64::encode_string(&der).as_bytes())
}

#[allow(dead_code)]
pub fn signer() -> InvoiceSigner {
    let key = SigningKey::random(&mut rand::rngs::OsRng);
    let certificate = self_signed_certificate(&key);
    InvoiceSigner::new(certificate, key).expect("matching key")
}
