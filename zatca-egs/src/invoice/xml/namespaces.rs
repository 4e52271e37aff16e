//! Namespace URIs used by the invoice document and its enveloped signature.

pub(crate) const UBL: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub(crate) const CBC: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub(crate) const CAC: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub(crate) const EXT: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";
const SIG: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonSignatureComponents-2";
const SAC: &str = "urn:oasis:names:specification:ubl:schema:xsd:SignatureAggregateComponents-2";
const SBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:SignatureBasicComponents-2";
pub(crate) const DS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const XADES: &str = "http://uri.etsi.org/01903/v1.3.2#";

/// Prefix bindings registered on every XPath context over an invoice.
pub(crate) const XPATH_PREFIXES: [(&str, &str); 9] = [
    ("ubl", UBL),
    ("cbc", CBC),
    ("cac", CAC),
    ("ext", EXT),
    ("sig", SIG),
    ("sac", SAC),
    ("sbc", SBC),
    ("ds", DS),
    ("xades", XADES),
];
