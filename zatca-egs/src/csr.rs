//! Certificate signing requests for onboarding an EGS unit.
//!
//! Field values follow the SDK's `csr.*` properties files: the subject carries
//! country, branch, organization and common name, and the device details go
//! into a directory name inside the SubjectAltName extension.
use crate::config::EnvironmentType;
use crate::egs::EgsUnitInfo;
use crate::invoice::VatNumber;
use base64ct::{Base64, Encoding};
use isocountry::CountryCode;
use k256::ecdsa::{DerSignature, SigningKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use x509_cert::builder::{Builder, RequestBuilder};
use x509_cert::der::asn1::PrintableString;
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{Encode, EncodePem, Error as DerError, Length, Writer};
use x509_cert::ext::pkix::{name::GeneralName, SubjectAltName};
use x509_cert::ext::{AsExtension, Extension};
use x509_cert::name::Name;
use x509_cert::request::CertReq;

#[derive(Debug, Error)]
pub enum CsrError {
    #[error("cannot read CSR properties file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSR properties file {path:?}")]
    Properties {
        path: PathBuf,
        #[source]
        source: java_properties::PropertiesError,
    },
    #[error("missing CSR property '{key}'")]
    MissingProperty { key: &'static str },
    #[error("CSR field {field} {reason}")]
    InvalidField { field: CsrField, reason: String },
    #[error("cannot parse the {part} distinguished name")]
    DistinguishedName {
        part: &'static str,
        #[source]
        source: DerError,
    },
    #[error("CSR assembly failed at {step}: {message}")]
    Build { step: &'static str, message: String },
    #[error("cannot encode certificate request")]
    Encode(#[source] DerError),
}

/// Functionality code for a device issuing both standard and simplified invoices.
pub const DEFAULT_INVOICE_TYPE: &str = "1100";

const DN_SPECIAL: &[char] = &[',', '+', '=', '"', '\\', '<', '>', ';'];

/// One value of a [`CsrProperties`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsrField {
    CommonName,
    SerialNumber,
    OrganizationIdentifier,
    OrganizationUnitName,
    OrganizationName,
    CountryName,
    InvoiceType,
    LocationAddress,
    IndustryBusinessCategory,
}

impl CsrField {
    pub const ALL: [CsrField; 9] = [
        CsrField::CommonName,
        CsrField::SerialNumber,
        CsrField::OrganizationIdentifier,
        CsrField::OrganizationUnitName,
        CsrField::OrganizationName,
        CsrField::CountryName,
        CsrField::InvoiceType,
        CsrField::LocationAddress,
        CsrField::IndustryBusinessCategory,
    ];

    /// Key of this field in an SDK properties file.
    pub const fn property_key(self) -> &'static str {
        match self {
            CsrField::CommonName => "csr.common.name",
            CsrField::SerialNumber => "csr.serial.number",
            CsrField::OrganizationIdentifier => "csr.organization.identifier",
            CsrField::OrganizationUnitName => "csr.organization.unit.name",
            CsrField::OrganizationName => "csr.organization.name",
            CsrField::CountryName => "csr.country.name",
            CsrField::InvoiceType => "csr.invoice.type",
            CsrField::LocationAddress => "csr.location.address",
            CsrField::IndustryBusinessCategory => "csr.industry.business.category",
        }
    }
}

impl fmt::Display for CsrField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.property_key())
    }
}

/// Validated CSR field values.
///
/// # Examples
/// ```rust,no_run
/// use zatca_egs::config::EnvironmentType;
/// use zatca_egs::csr::CsrProperties;
///
/// let props = CsrProperties::parse_csr_config("csr.properties".as_ref())?;
/// let (csr, _key) = props.build_with_rng(EnvironmentType::NonProduction)?;
/// # let _ = csr;
/// # Ok::<(), zatca_egs::csr::CsrError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrProperties {
    values: [String; 9],
}

impl CsrProperties {
    /// Collect one value per [`CsrField`]. Later duplicates win.
    ///
    /// # Errors
    /// A field is missing or empty, or contains a distinguished-name special
    /// character. The country must be an ISO 3166 alpha-2 code, the
    /// organization identifier a [`VatNumber`] and the invoice type four
    /// `0`/`1` digits.
    pub fn from_pairs<V: Into<String>>(
        pairs: impl IntoIterator<Item = (CsrField, V)>,
    ) -> Result<Self, CsrError> {
        let mut given: HashMap<CsrField, String> = pairs
            .into_iter()
            .map(|(field, value)| (field, value.into().trim().to_string()))
            .collect();
        let mut values: [String; 9] = Default::default();
        for field in CsrField::ALL {
            values[field as usize] =
                given.remove(&field).ok_or(CsrError::MissingProperty {
                    key: field.property_key(),
                })?;
        }
        let props = Self { values };
        props.validate()?;
        Ok(props)
    }

    /// Derive the CSR fields for a device.
    pub fn from_egs_unit(info: &EgsUnitInfo, solution_name: &str) -> Result<Self, CsrError> {
        let location = &info.location;
        Self::from_pairs([
            (
                CsrField::CommonName,
                format!("{solution_name}-{}-{}", info.model, info.uuid),
            ),
            (
                CsrField::SerialNumber,
                format!("1-{solution_name}|2-{}|3-{}", info.model, info.uuid),
            ),
            (CsrField::OrganizationIdentifier, info.vat_number.clone()),
            (CsrField::OrganizationUnitName, info.branch_name.clone()),
            (CsrField::OrganizationName, info.vat_name.clone()),
            (CsrField::CountryName, location.country_code.alpha2().to_string()),
            (CsrField::InvoiceType, DEFAULT_INVOICE_TYPE.to_string()),
            (
                CsrField::LocationAddress,
                format!(
                    "{} {} {}",
                    location.building_number, location.street, location.city
                ),
            ),
            (CsrField::IndustryBusinessCategory, info.branch_industry.clone()),
        ])
    }

    /// Parse an SDK style `csr.*` properties file.
    pub fn parse_csr_config(path: &Path) -> Result<Self, CsrError> {
        let file = File::open(path).map_err(|source| CsrError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_properties(BufReader::new(file), path)
    }

    fn parse_properties(reader: impl Read, path: &Path) -> Result<Self, CsrError> {
        let mut entries =
            java_properties::read(reader).map_err(|source| CsrError::Properties {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_pairs(
            CsrField::ALL
                .into_iter()
                .filter_map(|field| entries.remove(field.property_key()).map(|v| (field, v))),
        )
    }

    pub fn get(&self, field: CsrField) -> &str {
        &self.values[field as usize]
    }

    pub fn common_name(&self) -> &str {
        self.get(CsrField::CommonName)
    }

    pub fn serial_number(&self) -> &str {
        self.get(CsrField::SerialNumber)
    }

    fn validate(&self) -> Result<(), CsrError> {
        let invalid = |field, reason: &str| CsrError::InvalidField {
            field,
            reason: reason.to_string(),
        };
        for field in CsrField::ALL {
            let value = self.get(field);
            if value.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
            if value.contains(DN_SPECIAL) {
                return Err(invalid(field, "contains a distinguished-name special character"));
            }
        }
        if CountryCode::for_alpha2(self.get(CsrField::CountryName)).is_err() {
            return Err(invalid(CsrField::CountryName, "is not an ISO 3166 alpha-2 code"));
        }
        if VatNumber::parse(self.get(CsrField::OrganizationIdentifier)).is_err() {
            return Err(invalid(
                CsrField::OrganizationIdentifier,
                "must be 15 digits starting and ending with 3",
            ));
        }
        let invoice_type = self.get(CsrField::InvoiceType);
        if invoice_type.len() != 4 || !invoice_type.bytes().all(|b| matches!(b, b'0' | b'1')) {
            return Err(invalid(CsrField::InvoiceType, "must be four 0/1 digits"));
        }
        Ok(())
    }

    fn distinguished_name(part: &'static str, rdns: &[(&str, &str)]) -> Result<Name, CsrError> {
        let text = rdns
            .iter()
            .map(|(attr, value)| format!("{attr}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        Name::from_str(&text).map_err(|source| CsrError::DistinguishedName { part, source })
    }

    fn subject(&self) -> Result<Name, CsrError> {
        Self::distinguished_name(
            "subject",
            &[
                ("C", self.get(CsrField::CountryName)),
                ("OU", self.get(CsrField::OrganizationUnitName)),
                ("O", self.get(CsrField::OrganizationName)),
                ("CN", self.get(CsrField::CommonName)),
            ],
        )
    }

    fn subject_alt_name(&self) -> Result<SubjectAltName, CsrError> {
        let device = Self::distinguished_name(
            "SubjectAltName",
            &[
                ("sn", self.get(CsrField::SerialNumber)),
                ("uid", self.get(CsrField::OrganizationIdentifier)),
                ("title", self.get(CsrField::InvoiceType)),
                ("registeredAddress", self.get(CsrField::LocationAddress)),
                ("businessCategory", self.get(CsrField::IndustryBusinessCategory)),
            ],
        )?;
        Ok(SubjectAltName(vec![GeneralName::DirectoryName(device)]))
    }

    /// Build a CSR signed by `signer`.
    pub fn build(&self, signer: &SigningKey, env: EnvironmentType) -> Result<CertReq, CsrError> {
        let build_err = |step| move |e: x509_cert::builder::Error| CsrError::Build {
            step,
            message: e.to_string(),
        };

        let mut request =
            RequestBuilder::new(self.subject()?, signer).map_err(build_err("request"))?;
        request
            .add_extension(&TemplateName::for_env(env)?)
            .map_err(build_err("certificate template extension"))?;
        request
            .add_extension(&self.subject_alt_name()?)
            .map_err(build_err("SubjectAltName extension"))?;
        request
            .build::<DerSignature>()
            .map_err(build_err("signing"))
    }

    /// Generate a fresh secp256k1 key and a CSR for it.
    pub fn build_with_rng(&self, env: EnvironmentType) -> Result<(CertReq, SigningKey), CsrError> {
        let signer = SigningKey::random(&mut OsRng);
        let csr = self.build(&signer, env)?;
        Ok((csr, signer))
    }
}

/// Certificate template name extension (1.3.6.1.4.1.311.20.2) as a
/// PrintableString.
struct TemplateName(PrintableString);

impl TemplateName {
    fn for_env(env: EnvironmentType) -> Result<Self, CsrError> {
        PrintableString::new(env.certificate_template_name())
            .map(Self)
            .map_err(|e| CsrError::Build {
                step: "certificate template extension",
                message: e.to_string(),
            })
    }
}

impl const_oid::AssociatedOid for TemplateName {
    const OID: const_oid::ObjectIdentifier =
        const_oid::ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.20.2");
}

impl Encode for TemplateName {
    fn encoded_len(&self) -> x509_cert::der::Result<Length> {
        self.0.encoded_len()
    }

    fn encode(&self, writer: &mut impl Writer) -> x509_cert::der::Result<()> {
        self.0.encode(writer)
    }
}

impl AsExtension for TemplateName {
    fn critical(&self, _subject: &Name, _extensions: &[Extension]) -> bool {
        false
    }
}

/// Base64 forms of a certificate request.
pub trait CsrEncoding {
    /// Base64 of the DER bytes.
    fn der_base64(&self) -> Result<String, CsrError>;
    /// Base64 of the PEM text, the form the compliance endpoint expects.
    fn pem_base64(&self) -> Result<String, CsrError>;
}

impl CsrEncoding for CertReq {
    fn der_base64(&self) -> Result<String, CsrError> {
        let der = self.to_der().map_err(CsrError::Encode)?;
        Ok(Base64::encode_string(&der))
    }

    fn pem_base64(&self) -> Result<String, CsrError> {
        let pem = self.to_pem(LineEnding::LF).map_err(CsrError::Encode)?;
        Ok(Base64::encode_string(pem.as_bytes()))
    }
}
