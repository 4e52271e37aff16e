//! Canonicalization, hashing and XAdES enveloped signing of invoices.
use crate::invoice::xml::namespaces::{self, XPATH_PREFIXES};
use crate::invoice::xml::{InvoiceXmlError, ToXml};
use crate::invoice::{FinalizedInvoice, QrCodeError, QrPayload, SignedInvoice};
use base64ct::{Base64, Encoding};
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey};
use k256::pkcs8::DecodePrivateKey;
use k256::SecretKey;
use libxml::{
    parser::Parser,
    tree::{c14n, Document, Node},
    xpath,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use x509_cert::{
    der::{Decode, DecodePem, Encode},
    Certificate,
};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invoice has no previous invoice hash to chain to")]
    MissingPreviousHash,
    #[error("certificate: {0}")]
    Certificate(String),
    #[error("private key: {0}")]
    PrivateKey(String),
    #[error("private key does not belong to the signing certificate")]
    KeyMismatch,
    #[error("invoice document: {0}")]
    Xml(String),
    #[error(transparent)]
    Serialize(#[from] InvoiceXmlError),
    #[error(transparent)]
    Qr(#[from] QrCodeError),
}

const UBL_EXTENSIONS_TEMPLATE: &str = include_str!("../../assets/templates/ubl_extensions.xml");
const CAC_SIGNATURE_TEMPLATE: &str = include_str!("../../assets/templates/cac_signature.xml");
const QR_REFERENCE_TEMPLATE: &str = include_str!("../../assets/templates/qr_reference.xml");

const DS_SIGNATURE: &str = "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature";
const QR_REFERENCE: &str = "/ubl:Invoice/cac:AdditionalDocumentReference[cbc:ID[normalize-space(text())='QR']]";
const PIH_REFERENCE: &str = "/ubl:Invoice/cac:AdditionalDocumentReference[cbc:ID[normalize-space(text())='PIH']]";

/// Subtrees left out of the invoice hash.
const HASH_EXCLUSIONS: [&str; 3] = [
    "/*[local-name()='Invoice']/*[local-name()='UBLExtensions']",
    "/*[local-name()='Invoice']/*[local-name()='Signature']",
    QR_REFERENCE,
];

/// Values produced by signing one invoice with one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParts {
    invoice_hash: String,
    signature: String,
    public_key_der: Vec<u8>,
    certificate_signature: Vec<u8>,
    issuer: String,
    serial: String,
    certificate_hash: String,
    signed_properties_hash: String,
    signing_time: String,
}

impl SignatureParts {
    /// Base64 SHA-256 of the canonical invoice.
    pub fn invoice_hash(&self) -> &str {
        &self.invoice_hash
    }

    /// Base64 DER ECDSA signature over the invoice hash.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// DER `SubjectPublicKeyInfo` of the signing certificate (QR tag 8).
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// The certificate's own signature bits (QR tag 9).
    pub fn certificate_signature(&self) -> &[u8] {
        &self.certificate_signature
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Certificate serial number in decimal.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn certificate_hash(&self) -> &str {
        &self.certificate_hash
    }

    pub fn signed_properties_hash(&self) -> &str {
        &self.signed_properties_hash
    }

    pub fn signing_time(&self) -> &str {
        &self.signing_time
    }
}

/// Signs finalized invoices with a device certificate and its private key.
#[derive(Debug, Clone)]
pub struct InvoiceSigner {
    certificate: Certificate,
    private_key: SigningKey,
}

impl InvoiceSigner {
    /// Pair a certificate with its private key.
    ///
    /// # Errors
    /// Returns [`SigningError::KeyMismatch`] if the key does not belong to the
    /// certificate.
    pub fn new(certificate: Certificate, private_key: SigningKey) -> Result<Self, SigningError> {
        let public_point = private_key.verifying_key().to_encoded_point(false);
        let certified = certificate
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes();
        if certified != public_point.as_bytes() {
            return Err(SigningError::KeyMismatch);
        }
        Ok(Self {
            certificate,
            private_key,
        })
    }

    pub fn from_der(cert_der: &[u8], private_key_der: &[u8]) -> Result<Self, SigningError> {
        let certificate =
            Certificate::from_der(cert_der).map_err(|e| SigningError::Certificate(e.to_string()))?;
        let private_key = SigningKey::from_pkcs8_der(private_key_der)
            .map_err(|e| SigningError::PrivateKey(e.to_string()))?;
        Self::new(certificate, private_key)
    }

    /// Accepts a PKCS#8 or SEC1 (`EC PRIVATE KEY`) PEM private key.
    pub fn from_pem(cert_pem: &str, private_key_pem: &str) -> Result<Self, SigningError> {
        let certificate = Certificate::from_pem(cert_pem.as_bytes())
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        let private_key = SigningKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| SecretKey::from_sec1_pem(private_key_pem).map(SigningKey::from))
            .map_err(|e| SigningError::PrivateKey(e.to_string()))?;
        Self::new(certificate, private_key)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Hash the invoice, sign the hash and embed signature and QR code.
    ///
    /// The invoice is consumed; on error nothing partially signed escapes.
    pub fn sign(&self, invoice: FinalizedInvoice) -> Result<SignedInvoice, SigningError> {
        if invoice.data().previous_invoice_hash().trim().is_empty() {
            return Err(SigningError::MissingPreviousHash);
        }

        let mut document = InvoiceDocument::parse(&invoice.to_xml()?)?;
        let invoice_hash = document.invoice_hash()?;
        let parts = self.signature_parts(invoice_hash, invoice.data().qr_timestamp())?;

        let qr_code = QrPayload::from_invoice(invoice.data(), invoice.totals())?
            .with_signing_parts(
                &parts.invoice_hash,
                &parts.signature,
                &parts.public_key_der,
                Some(parts.certificate_signature.as_slice()),
            )
            .encode()?;

        let certificate_der = self
            .certificate
            .to_der()
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        document.embed_signature(&parts, &Base64::encode_string(&certificate_der))?;
        document.embed_qr_code(&qr_code)?;

        debug!(
            uuid = %invoice.data().uuid(),
            invoice_hash = %parts.invoice_hash,
            "signed invoice"
        );
        let xml = document.doc.to_string();
        Ok(SignedInvoice::new(invoice, parts, qr_code, xml))
    }

    fn signature_parts(
        &self,
        invoice_hash: String,
        signing_time: String,
    ) -> Result<SignatureParts, SigningError> {
        let cert = &self.certificate;
        let hash_bytes = Base64::decode_vec(&invoice_hash)
            .map_err(|e| SigningError::Xml(format!("invoice hash is not base64: {e}")))?;
        let signature: Signature = self.private_key.sign(&hash_bytes);

        let certificate_der = cert
            .to_der()
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        let certificate_hash =
            hex_digest_base64(Base64::encode_string(&certificate_der).as_bytes());
        let issuer = cert
            .tbs_certificate
            .issuer
            .to_string()
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(", ");
        let serial = decimal_serial(cert.tbs_certificate.serial_number.as_bytes());
        let signed_properties_hash = hex_digest_base64(
            signed_properties_digest_input(&signing_time, &certificate_hash, &issuer, &serial)
                .as_bytes(),
        );

        let public_key_der = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        let certificate_signature = cert
            .signature
            .as_bytes()
            .ok_or_else(|| SigningError::Certificate("signature bits are not byte aligned".into()))?
            .to_vec();

        Ok(SignatureParts {
            invoice_hash,
            signature: Base64::encode_string(signature.to_der().as_bytes()),
            public_key_der,
            certificate_signature,
            issuer,
            serial,
            certificate_hash,
            signed_properties_hash,
            signing_time,
        })
    }
}

/// Canonical (C14N 1.1) form of an invoice with the signature parts removed.
///
/// `ext:UBLExtensions`, `cac:Signature` and the QR document reference are
/// excluded so the result is identical before and after signing.
pub fn canonicalize(doc: &Document) -> Result<String, SigningError> {
    let copy = doc
        .dup()
        .map_err(|e| SigningError::Xml(format!("cannot copy document: {e:?}")))?;
    InvoiceDocument::new(copy)?.canonical_form()
}

/// Base64 SHA-256 of [`canonicalize`]'s output.
pub fn invoice_hash_base64(doc: &Document) -> Result<String, SigningError> {
    let hash = Base64::encode_string(&Sha256::digest(canonicalize(doc)?.as_bytes()));
    debug!(invoice_hash = %hash, "computed invoice hash");
    Ok(hash)
}

/// Parse `xml` and compute its invoice hash; signed or unsigned documents
/// give the same result.
pub fn invoice_hash_from_xml(xml: &str) -> Result<String, SigningError> {
    invoice_hash_base64(&InvoiceDocument::parse(xml)?.doc)
}

/// A parsed invoice with an XPath context bound to the UBL prefixes.
struct InvoiceDocument {
    doc: Document,
    ctx: xpath::Context,
}

impl InvoiceDocument {
    fn parse(xml: &str) -> Result<Self, SigningError> {
        let doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| SigningError::Xml(format!("parse error: {e:?}")))?;
        Self::new(doc)
    }

    fn new(doc: Document) -> Result<Self, SigningError> {
        let ctx = xpath::Context::new(&doc)
            .map_err(|e| SigningError::Xml(format!("XPath context: {e:?}")))?;
        for (prefix, uri) in XPATH_PREFIXES {
            ctx.register_namespace(prefix, uri)
                .map_err(|e| SigningError::Xml(format!("XPath prefix {prefix}: {e:?}")))?;
        }
        Ok(Self { doc, ctx })
    }

    fn select(&self, path: &str) -> Result<Vec<Node>, SigningError> {
        self.ctx
            .evaluate(path)
            .map(|found| found.get_nodes_as_vec())
            .map_err(|e| SigningError::Xml(format!("XPath {path}: {e:?}")))
    }

    fn select_last(&self, path: &str) -> Result<Node, SigningError> {
        self.select(path)?
            .pop()
            .ok_or_else(|| SigningError::Xml(format!("no node at {path}")))
    }

    fn set_text(&self, path: &str, value: &str) -> Result<(), SigningError> {
        let mut node = self.select_last(path)?;
        node.set_content(value)
            .map_err(|e| SigningError::Xml(e.to_string()))
    }

    fn import_fragment(&mut self, xml: &str) -> Result<Node, SigningError> {
        let fragment = Parser::default()
            .parse_string(xml)
            .map_err(|e| SigningError::Xml(format!("template parse error: {e:?}")))?;
        let mut root = fragment
            .get_root_element()
            .ok_or_else(|| SigningError::Xml("empty template".into()))?;
        root.unlink();
        self.doc
            .import_node(&mut root)
            .map_err(|_| SigningError::Xml("cannot import template".into()))
    }

    fn insert_after(&mut self, anchor: &str, fragment: &str) -> Result<(), SigningError> {
        let mut node = self.import_fragment(fragment)?;
        self.select_last(anchor)?
            .add_next_sibling(&mut node)
            .map_err(|e| SigningError::Xml(e.to_string()))
    }

    fn canonical_form(self) -> Result<String, SigningError> {
        for path in HASH_EXCLUSIONS {
            for mut node in self.select(path)? {
                node.unlink();
            }
        }
        let options = c14n::CanonicalizationOptions {
            mode: c14n::CanonicalizationMode::Canonical1_1,
            inclusive_ns_prefixes: vec![],
            with_comments: false,
        };
        self.doc
            .canonicalize(options, None)
            .map_err(|e| SigningError::Xml(format!("canonicalization failed: {e:?}")))
    }

    fn invoice_hash(&self) -> Result<String, SigningError> {
        invoice_hash_base64(&self.doc)
    }

    /// Add the signature skeleton if absent and fill in every value.
    fn embed_signature(
        &mut self,
        parts: &SignatureParts,
        certificate_b64: &str,
    ) -> Result<(), SigningError> {
        if self.select("/ubl:Invoice/ext:UBLExtensions")?.is_empty() {
            let mut extensions = self.import_fragment(UBL_EXTENSIONS_TEMPLATE)?;
            let mut root = self
                .doc
                .get_root_element()
                .ok_or_else(|| SigningError::Xml("document has no root".into()))?;
            match root.get_first_element_child() {
                Some(mut first) => first
                    .add_prev_sibling(&mut extensions)
                    .map_err(|e| SigningError::Xml(e.to_string()))?,
                None => root.add_child(&mut extensions).map_err(SigningError::Xml)?,
            }
        }
        if self.select("/ubl:Invoice/cac:Signature")?.is_empty() {
            self.insert_after(
                "/ubl:Invoice/cac:AdditionalDocumentReference",
                CAC_SIGNATURE_TEMPLATE,
            )?;
        }

        let certificate = format!(
            "{DS_SIGNATURE}/ds:Object/xades:QualifyingProperties/xades:SignedProperties/xades:SignedSignatureProperties/xades:SigningCertificate/xades:Cert"
        );
        let values = [
            (
                format!("{DS_SIGNATURE}/ds:SignedInfo/ds:Reference[@Id='invoiceSignedData']/ds:DigestValue"),
                parts.invoice_hash.as_str(),
            ),
            (
                format!("{DS_SIGNATURE}/ds:SignedInfo/ds:Reference[@URI='#xadesSignedProperties']/ds:DigestValue"),
                parts.signed_properties_hash.as_str(),
            ),
            (format!("{DS_SIGNATURE}/ds:SignatureValue"), parts.signature.as_str()),
            (
                format!("{DS_SIGNATURE}/ds:KeyInfo/ds:X509Data/ds:X509Certificate"),
                certificate_b64,
            ),
            (
                format!("{DS_SIGNATURE}/ds:Object/xades:QualifyingProperties/xades:SignedProperties/xades:SignedSignatureProperties/xades:SigningTime"),
                parts.signing_time.as_str(),
            ),
            (
                format!("{certificate}/xades:CertDigest/ds:DigestValue"),
                parts.certificate_hash.as_str(),
            ),
            (
                format!("{certificate}/xades:IssuerSerial/ds:X509IssuerName"),
                parts.issuer.as_str(),
            ),
            (
                format!("{certificate}/xades:IssuerSerial/ds:X509SerialNumber"),
                parts.serial.as_str(),
            ),
        ];
        for (path, value) in &values {
            self.set_text(path, value)?;
        }
        Ok(())
    }

    /// The QR reference goes right after PIH, ahead of `cac:Signature`.
    fn embed_qr_code(&mut self, qr_code: &str) -> Result<(), SigningError> {
        if self.select(QR_REFERENCE)?.is_empty() {
            self.insert_after(PIH_REFERENCE, QR_REFERENCE_TEMPLATE)?;
        }
        self.set_text(
            &format!("{QR_REFERENCE}/cac:Attachment/cbc:EmbeddedDocumentBinaryObject"),
            qr_code,
        )
    }
}

/// Base64 of the lowercase hex SHA-256 of `bytes`.
fn hex_digest_base64(bytes: &[u8]) -> String {
    let hex: String = Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    Base64::encode_string(hex.as_bytes())
}

/// Big-endian unsigned integer bytes to a decimal string, by long division.
fn decimal_serial(bytes: &[u8]) -> String {
    let mut number: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if number.is_empty() {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while !number.is_empty() {
        let mut remainder = 0u32;
        let mut quotient = Vec::with_capacity(number.len());
        for byte in &number {
            let acc = (remainder << 8) | u32::from(*byte);
            let q = (acc / 10) as u8;
            remainder = acc % 10;
            if !quotient.is_empty() || q != 0 {
                quotient.push(q);
            }
        }
        digits.push(char::from(b'0' + remainder as u8));
        number = quotient;
    }
    digits.iter().rev().collect()
}

/// The `xades:SignedProperties` element exactly as it is digested.
///
/// Indentation is significant and mirrors the skeleton in
/// `assets/templates/ubl_extensions.xml`.
fn signed_properties_digest_input(
    signing_time: &str,
    certificate_hash: &str,
    issuer: &str,
    serial: &str,
) -> String {
    const BASE_INDENT: usize = 32;
    let ds = format!(r#"xmlns:ds="{}""#, namespaces::DS);
    let lines = [
        (1, "<xades:SignedSignatureProperties>".to_string()),
        (2, format!("<xades:SigningTime>{signing_time}</xades:SigningTime>")),
        (2, "<xades:SigningCertificate>".to_string()),
        (3, "<xades:Cert>".to_string()),
        (4, "<xades:CertDigest>".to_string()),
        (
            5,
            format!(r#"<ds:DigestMethod {ds} Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>"#),
        ),
        (5, format!("<ds:DigestValue {ds}>{certificate_hash}</ds:DigestValue>")),
        (4, "</xades:CertDigest>".to_string()),
        (4, "<xades:IssuerSerial>".to_string()),
        (5, format!("<ds:X509IssuerName {ds}>{issuer}</ds:X509IssuerName>")),
        (5, format!("<ds:X509SerialNumber {ds}>{serial}</ds:X509SerialNumber>")),
        (4, "</xades:IssuerSerial>".to_string()),
        (3, "</xades:Cert>".to_string()),
        (2, "</xades:SigningCertificate>".to_string()),
        (1, "</xades:SignedSignatureProperties>".to_string()),
        (0, "</xades:SignedProperties>".to_string()),
    ];

    let mut out = format!(
        r#"<xades:SignedProperties xmlns:xades="{}" Id="xadesSignedProperties">"#,
        namespaces::XADES
    );
    for (depth, line) in lines {
        out.push('\n');
        out.push_str(&" ".repeat(BASE_INDENT + 4 * depth));
        out.push_str(&line);
    }
    out
}
