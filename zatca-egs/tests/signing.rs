mod common;

use base64ct::{Base64, Encoding};
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::pkcs8::EncodePrivateKey;
use libxml::parser::Parser;
use libxml::xpath;
use x509_cert::der::Encode;
use zatca_egs::invoice::sign::{invoice_hash_from_xml, InvoiceSigner};
use zatca_egs::invoice::xml::ToXml;
use zatca_egs::invoice::{InvoiceSubType, INITIAL_PREVIOUS_INVOICE_HASH};

const CBC_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
const CAC_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";

fn embedded_previous_hash(xml: &str) -> String {
    let doc = Parser::default().parse_string(xml).expect("parse signed xml");
    let ctx = xpath::Context::new(&doc).expect("xpath context");
    ctx.register_namespace("cbc", CBC_NS).expect("cbc ns");
    ctx.register_namespace("cac", CAC_NS).expect("cac ns");
    let nodes = ctx
        .evaluate("//cac:AdditionalDocumentReference[cbc:ID='PIH']//cbc:EmbeddedDocumentBinaryObject")
        .expect("evaluate")
        .get_nodes_as_vec();
    nodes.first().expect("PIH node").get_content()
}

#[test]
fn signer_loads_from_der_and_pem() {
    let key = SigningKey::random(&mut rand::rngs::OsRng);
    let certificate = common::self_signed_certificate(&key);
    let cert_der = certificate.to_der().expect("cert der");
    let key_der = key.to_pkcs8_der().expect("key der");
    assert!(InvoiceSigner::from_der(&cert_der, key_der.as_bytes()).is_ok());

    let cert_pem = format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        Base64::encode_string(&cert_der)
            .as_bytes()
            .chunks(64)
            .map(|c| std::str::from_utf8(c).expect("ascii"))
            .collect::<Vec<_>>()
            .join("\n")
    );
    let key_pem = key
        .to_pkcs8_pem(k256::pkcs8::LineEnding::LF)
        .expect("key pem");
    assert!(InvoiceSigner::from_pem(&cert_pem, &key_pem).is_ok());
}

#[test]
fn hash_chain_links_consecutive_invoices() {
    let signer = common::signer();

    let first = common::invoice_builder(
        InvoiceSubType::Simplified,
        "SME00001",
        1,
        INITIAL_PREVIOUS_INVOICE_HASH,
    )
    .build()
    .expect("first invoice")
    .sign(&signer)
    .expect("sign first");
    let first_hash = first.invoice_hash().to_string();

    let second = common::invoice_builder(InvoiceSubType::Simplified, "SME00002", 2, &first_hash)
        .build()
        .expect("second invoice")
        .sign(&signer)
        .expect("sign second");

    assert_eq!(embedded_previous_hash(first.xml()), INITIAL_PREVIOUS_INVOICE_HASH);
    assert_eq!(embedded_previous_hash(second.xml()), first_hash);
    assert_ne!(second.invoice_hash(), first_hash);

    // Re-signing the second invoice leaves the first untouched.
    let resigned = common::invoice_builder(InvoiceSubType::Simplified, "SME00002", 2, &first_hash)
        .build()
        .expect("second invoice again")
        .sign(&signer)
        .expect("re-sign second");
    assert_eq!(first.invoice_hash(), first_hash);
    assert_eq!(embedded_previous_hash(resigned.xml()), first_hash);
}

#[test]
fn stored_hash_matches_recomputed_hash_of_signed_document() {
    let signed = common::invoice_builder(
        InvoiceSubType::Standard,
        "INV-1",
        1,
        INITIAL_PREVIOUS_INVOICE_HASH,
    )
    .build()
    .expect("invoice")
    .sign(&common::signer())
    .expect("signed");

    assert_eq!(
        invoice_hash_from_xml(signed.xml()).expect("recompute"),
        signed.invoice_hash()
    );
    assert_eq!(signed.to_xml().expect("xml"), signed.xml());
    assert_eq!(
        Base64::decode_vec(&signed.xml_base64()).expect("b64"),
        signed.xml().as_bytes()
    );
}

#[test]
fn signature_verifies_with_certificate_public_key() {
    let signer = common::signer();
    let signed = common::invoice_builder(
        InvoiceSubType::Simplified,
        "SME00010",
        10,
        INITIAL_PREVIOUS_INVOICE_HASH,
    )
    .build()
    .expect("invoice")
    .sign(&signer)
    .expect("signed");

    let verifying_key = VerifyingKey::from_sec1_bytes(
        signer
            .certificate()
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes(),
    )
    .expect("verifying key");
    let hash = Base64::decode_vec(signed.invoice_hash()).expect("hash bytes");
    let signature =
        Signature::from_der(&Base64::decode_vec(signed.signature()).expect("sig bytes"))
            .expect("der signature");
    assert!(verifying_key.verify(&hash, &signature).is_ok());
}
