//! Seller and buyer identities.
use isocountry::CountryCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use super::InvoiceError;

/// National address written into `cac:PostalAddress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub country_code: CountryCode,
    pub city: String,
    pub street: String,
    pub additional_street: Option<String>,
    pub building_number: String,
    pub plot_identification: Option<String>,
    pub postal_zone: String,
    pub city_subdivision: Option<String>,
    pub country_subentity: Option<String>,
}

/// VAT registration number: fifteen digits, first and last digit `3`.
///
/// # Examples
/// ```rust
/// use zatca_egs::invoice::VatNumber;
///
/// let vat: VatNumber = "399999999900003".parse()?;
/// assert_eq!(vat.to_string(), "399999999900003");
/// assert!("1234".parse::<VatNumber>().is_err());
/// # Ok::<(), zatca_egs::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VatNumber(String);

impl VatNumber {
    pub fn parse(input: impl AsRef<str>) -> Result<Self, InvoiceError> {
        let digits = input.as_ref().trim();
        let well_formed = digits.len() == 15
            && digits.bytes().all(|b| b.is_ascii_digit())
            && digits.starts_with('3')
            && digits.ends_with('3');
        if !well_formed {
            return Err(InvoiceError::VatNumber(digits.to_string()));
        }
        Ok(Self(digits.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VatNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VatNumber {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VatNumber {
    type Error = InvoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<VatNumber> for String {
    fn from(vat: VatNumber) -> Self {
        vat.0
    }
}

/// `schemeID` of a `cac:PartyIdentification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdScheme {
    #[serde(rename = "TIN")]
    TaxIdentification,
    #[serde(rename = "CRN")]
    CommercialRegistration,
    #[serde(rename = "MOM")]
    Momrah,
    #[serde(rename = "MLS")]
    Mhrsd,
    #[serde(rename = "700")]
    UnifiedNumber,
    #[serde(rename = "SAG")]
    Misa,
    #[serde(rename = "NAT")]
    NationalId,
    #[serde(rename = "GCC")]
    GccId,
    #[serde(rename = "IQA")]
    Iqama,
    #[serde(rename = "PAS")]
    Passport,
    #[serde(rename = "OTH")]
    Other,
}

impl IdScheme {
    const ALL: [IdScheme; 11] = [
        IdScheme::TaxIdentification,
        IdScheme::CommercialRegistration,
        IdScheme::Momrah,
        IdScheme::Mhrsd,
        IdScheme::UnifiedNumber,
        IdScheme::Misa,
        IdScheme::NationalId,
        IdScheme::GccId,
        IdScheme::Iqama,
        IdScheme::Passport,
        IdScheme::Other,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            IdScheme::TaxIdentification => "TIN",
            IdScheme::CommercialRegistration => "CRN",
            IdScheme::Momrah => "MOM",
            IdScheme::Mhrsd => "MLS",
            IdScheme::UnifiedNumber => "700",
            IdScheme::Misa => "SAG",
            IdScheme::NationalId => "NAT",
            IdScheme::GccId => "GCC",
            IdScheme::Iqama => "IQA",
            IdScheme::Passport => "PAS",
            IdScheme::Other => "OTH",
        }
    }
}

impl FromStr for IdScheme {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Self::ALL
            .into_iter()
            .find(|scheme| scheme.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| InvoiceError::IdScheme(code.to_string()))
    }
}

/// Identifier other than the VAT number, such as a commercial registration.
///
/// # Examples
/// ```rust
/// use zatca_egs::invoice::{IdScheme, PartyId};
///
/// let crn = PartyId::new(IdScheme::CommercialRegistration, "1010010000");
/// assert_eq!(crn.scheme().code(), "CRN");
/// assert_eq!(crn.value(), "1010010000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyId {
    scheme: IdScheme,
    value: String,
}

impl PartyId {
    pub fn new(scheme: IdScheme, value: impl Into<String>) -> Self {
        Self {
            scheme,
            value: value.into(),
        }
    }

    pub fn scheme(&self) -> IdScheme {
        self.scheme
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Which side of the transaction a [`Party`] stands on.
pub trait Role {
    /// UBL element wrapping the `cac:Party` block.
    const ELEMENT: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier;

impl Role for Supplier {
    const ELEMENT: &'static str = "cac:AccountingSupplierParty";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer;

impl Role for Customer {
    const ELEMENT: &'static str = "cac:AccountingCustomerParty";
}

/// A named party with its address and identifiers.
///
/// The role parameter keeps sellers and buyers from being swapped.
///
/// # Examples
/// ```rust
/// use isocountry::CountryCode;
/// use zatca_egs::invoice::{Address, IdScheme, PartyId, Seller};
///
/// let seller = Seller::new(
///     "Maximum Speed Tech Supply LTD",
///     Address {
///         country_code: CountryCode::SAU,
///         city: "Riyadh".into(),
///         street: "King Abdulaziz Road".into(),
///         additional_street: None,
///         building_number: "0000".into(),
///         plot_identification: Some("0000".into()),
///         postal_zone: "31952".into(),
///         city_subdivision: Some("West".into()),
///         country_subentity: None,
///     },
///     "311111111101113",
///     Some(PartyId::new(IdScheme::CommercialRegistration, "454634645645654")),
/// )?;
/// assert_eq!(seller.vat_number().map(|v| v.as_str()), Some("311111111101113"));
/// # Ok::<(), zatca_egs::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party<R: Role> {
    #[serde(skip)]
    role: PhantomData<R>,
    registration_name: String,
    address: Address,
    vat_number: Option<VatNumber>,
    identification: Option<PartyId>,
}

pub type Seller = Party<Supplier>;
pub type Buyer = Party<Customer>;

impl Party<Supplier> {
    /// # Errors
    /// Fails when `vat_number` is not a well-formed [`VatNumber`].
    pub fn new(
        registration_name: impl Into<String>,
        address: Address,
        vat_number: impl AsRef<str>,
        identification: Option<PartyId>,
    ) -> Result<Self, InvoiceError> {
        Ok(Self {
            role: PhantomData,
            registration_name: registration_name.into(),
            address,
            vat_number: Some(VatNumber::parse(vat_number)?),
            identification,
        })
    }
}

impl Party<Customer> {
    /// # Errors
    /// Fails on a malformed VAT number, or when neither a VAT number nor an
    /// identification is given.
    pub fn new(
        registration_name: impl Into<String>,
        address: Address,
        vat_number: Option<&str>,
        identification: Option<PartyId>,
    ) -> Result<Self, InvoiceError> {
        let vat_number = vat_number.map(VatNumber::parse).transpose()?;
        if vat_number.is_none() && identification.is_none() {
            return Err(InvoiceError::UnidentifiedBuyer);
        }
        Ok(Self {
            role: PhantomData,
            registration_name: registration_name.into(),
            address,
            vat_number,
            identification,
        })
    }
}

impl<R: Role> Party<R> {
    pub fn registration_name(&self) -> &str {
        &self.registration_name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn vat_number(&self) -> Option<&VatNumber> {
        self.vat_number.as_ref()
    }

    pub fn identification(&self) -> Option<&PartyId> {
        self.identification.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            country_code: CountryCode::SAU,
            city: "Jeddah".into(),
            street: "Prince Sultan".into(),
            additional_street: None,
            building_number: "2322".into(),
            plot_identification: None,
            postal_zone: "23333".into(),
            city_subdivision: Some("Al-Murjan".into()),
            country_subentity: None,
        }
    }

    #[test]
    fn vat_number_shape() {
        assert!(VatNumber::parse(" 300000000000003 ").is_ok());
        for bad in ["", "30000000000000", "200000000000003", "300000000000004", "3000000000a0003"] {
            assert!(
                matches!(VatNumber::parse(bad), Err(InvoiceError::VatNumber(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn vat_number_deserialization_validates() {
        assert!(serde_json::from_str::<VatNumber>("\"399999999900003\"").is_ok());
        assert!(serde_json::from_str::<VatNumber>("\"12\"").is_err());
    }

    #[test]
    fn id_scheme_codes_round_trip() {
        for scheme in IdScheme::ALL {
            assert_eq!(scheme.code().parse::<IdScheme>().unwrap(), scheme);
        }
        assert_eq!("crn".parse::<IdScheme>().unwrap(), IdScheme::CommercialRegistration);
        assert!(matches!("XYZ".parse::<IdScheme>(), Err(InvoiceError::IdScheme(_))));
    }

    #[test]
    fn buyer_needs_some_identifier() {
        assert!(matches!(
            Buyer::new("Fatoora Samples LTD", address(), None, None),
            Err(InvoiceError::UnidentifiedBuyer)
        ));
        let buyer = Buyer::new(
            "Fatoora Samples LTD",
            address(),
            None,
            Some(PartyId::new(IdScheme::NationalId, "1234567890")),
        )
        .unwrap();
        assert!(buyer.vat_number().is_none());
        assert_eq!(buyer.identification().map(PartyId::scheme), Some(IdScheme::NationalId));
    }
}
