//! Tag-length-value QR payload (ZATCA phase 2 tags 1-9).
use super::{InvoiceData, InvoiceTotals};
use crate::decimal::to_fixed_exact;
use base64ct::{Base64, Encoding};
use thiserror::Error;

/// Largest base64 payload accepted by the authority's QR validator.
pub const MAX_ENCODED_LEN: usize = 700;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrCodeError {
    #[error("seller registration name is empty")]
    MissingSellerName,
    #[error("seller VAT number is missing")]
    MissingSellerVat,
    #[error("QR payload needs the invoice hash (tag 6)")]
    MissingInvoiceHash,
    #[error("QR tag {tag} value is {len} bytes, over the 255 byte limit")]
    ValueTooLong { tag: u8, len: usize },
    #[error("QR payload is {len} base64 characters, over the 700 character limit")]
    EncodedTooLong { len: usize },
    #[error("QR payload is not valid base64")]
    InvalidBase64,
    #[error("TLV field at offset {offset} is truncated")]
    Truncated { offset: usize },
    #[error("TLV field {tag} is not valid UTF-8")]
    InvalidUtf8 { tag: u8 },
    #[error("unknown TLV tag {tag}")]
    UnknownTag { tag: u8 },
    #[error("TLV tag {tag} is missing")]
    MissingTag { tag: u8 },
}

pub type QrResult<T> = Result<T, QrCodeError>;

/// Fields recovered from an encoded QR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrFields {
    pub seller_name: String,
    pub vat_number: String,
    pub timestamp: String,
    pub total_with_vat: String,
    pub total_vat: String,
    pub invoice_hash: Option<String>,
    pub signature: Option<String>,
    pub public_key: Option<Vec<u8>>,
    pub certificate_signature: Option<Vec<u8>>,
}

/// QR payload under construction.
///
/// Tags 1-5 come from the invoice, tags 6-9 from the signing step.
#[derive(Debug, Clone)]
pub struct QrPayload {
    seller_name: String,
    seller_vat: String,
    timestamp: String,
    total_with_vat: String,
    total_vat: String,
    invoice_hash: Option<String>,
    signature: Option<String>,
    public_key: Option<Vec<u8>>,
    certificate_signature: Option<Vec<u8>>,
}

impl QrPayload {
    pub(crate) fn from_invoice(invoice: &InvoiceData, totals: &InvoiceTotals) -> QrResult<Self> {
        let seller = invoice.seller();
        let seller_name = seller.registration_name().trim();
        if seller_name.is_empty() {
            return Err(QrCodeError::MissingSellerName);
        }
        let seller_vat = seller
            .vat_number()
            .map(|vat| vat.as_str())
            .ok_or(QrCodeError::MissingSellerVat)?;
        Ok(Self {
            seller_name: seller_name.to_string(),
            seller_vat: seller_vat.to_string(),
            timestamp: invoice.qr_timestamp(),
            total_with_vat: to_fixed_exact(totals.tax_inclusive_amount(), 2),
            total_vat: to_fixed_exact(totals.tax_amount(), 2),
            invoice_hash: None,
            signature: None,
            public_key: None,
            certificate_signature: None,
        })
    }

    pub(crate) fn with_signing_parts(
        mut self,
        invoice_hash: &str,
        signature: &str,
        public_key: &[u8],
        certificate_signature: Option<&[u8]>,
    ) -> Self {
        self.invoice_hash = Some(invoice_hash.to_string());
        self.signature = Some(signature.to_string());
        self.public_key = Some(public_key.to_vec());
        self.certificate_signature = certificate_signature.map(<[u8]>::to_vec);
        self
    }

    /// Encode as base64 TLV.
    ///
    /// # Errors
    /// Fails without an invoice hash, or when a value or the encoded result
    /// is over its length limit.
    pub fn encode(&self) -> QrResult<String> {
        let hash = self
            .invoice_hash
            .as_deref()
            .ok_or(QrCodeError::MissingInvoiceHash)?;

        let tags: [(u8, Option<&[u8]>); 9] = [
            (1, Some(self.seller_name.as_bytes())),
            (2, Some(self.seller_vat.as_bytes())),
            (3, Some(self.timestamp.as_bytes())),
            (4, Some(self.total_with_vat.as_bytes())),
            (5, Some(self.total_vat.as_bytes())),
            (6, Some(hash.as_bytes())),
            (7, self.signature.as_deref().map(str::as_bytes)),
            (8, self.public_key.as_deref()),
            (9, self.certificate_signature.as_deref()),
        ];

        let mut tlv = Vec::with_capacity(512);
        for (tag, value) in tags
            .into_iter()
            .filter_map(|(tag, value)| value.map(|v| (tag, v)))
        {
            let len = u8::try_from(value.len()).map_err(|_| QrCodeError::ValueTooLong {
                tag,
                len: value.len(),
            })?;
            tlv.extend([tag, len]);
            tlv.extend_from_slice(value);
        }

        let encoded = Base64::encode_string(&tlv);
        if encoded.len() > MAX_ENCODED_LEN {
            return Err(QrCodeError::EncodedTooLong { len: encoded.len() });
        }
        Ok(encoded)
    }

    /// Decode a base64 TLV payload produced by [`QrPayload::encode`] or by
    /// any other phase 2 compliant generator.
    ///
    /// # Examples
    /// ```rust
    /// use zatca_egs::invoice::QrPayload;
    ///
    /// // Tag 1 "A", tag 2 "3", tag 3 "T", tag 4 "1", tag 5 "0".
    /// let fields = QrPayload::decode("AQFBAgEzAwFUBAExBQEw")?;
    /// assert_eq!(fields.seller_name, "A");
    /// assert!(fields.invoice_hash.is_none());
    /// # Ok::<(), zatca_egs::invoice::QrCodeError>(())
    /// ```
    pub fn decode(encoded: &str) -> QrResult<QrFields> {
        let bytes = Base64::decode_vec(encoded.trim()).map_err(|_| QrCodeError::InvalidBase64)?;

        let mut slots: [Option<Vec<u8>>; 9] = Default::default();
        let mut offset = 0;
        while offset < bytes.len() {
            let tag = bytes[offset];
            let len = *bytes
                .get(offset + 1)
                .ok_or(QrCodeError::Truncated { offset })? as usize;
            let start = offset + 2;
            let value = bytes
                .get(start..start + len)
                .ok_or(QrCodeError::Truncated { offset })?;
            let slot = (tag as usize)
                .checked_sub(1)
                .and_then(|idx| slots.get_mut(idx))
                .ok_or(QrCodeError::UnknownTag { tag })?;
            *slot = Some(value.to_vec());
            offset = start + len;
        }

        let text = |slots: &mut [Option<Vec<u8>>; 9], tag: u8| -> QrResult<Option<String>> {
            slots[tag as usize - 1]
                .take()
                .map(|raw| String::from_utf8(raw).map_err(|_| QrCodeError::InvalidUtf8 { tag }))
                .transpose()
        };
        let required = |slots: &mut [Option<Vec<u8>>; 9], tag: u8| -> QrResult<String> {
            text(slots, tag)?.ok_or(QrCodeError::MissingTag { tag })
        };

        Ok(QrFields {
            seller_name: required(&mut slots, 1)?,
            vat_number: required(&mut slots, 2)?,
            timestamp: required(&mut slots, 3)?,
            total_with_vat: required(&mut slots, 4)?,
            total_vat: required(&mut slots, 5)?,
            invoice_hash: text(&mut slots, 6)?,
            signature: text(&mut slots, 7)?,
            public_key: slots[7].take(),
            certificate_signature: slots[8].take(),
        })
    }
}
