//! Client for the ZATCA Fatoora gateway: CSID issuance, compliance checks,
//! reporting and clearance.
use base64ct::{Base64, Encoding};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use x509_cert::{der::Decode, request::CertReq, Certificate};

use crate::{
    config::{Config, EnvironmentType},
    csr::CsrEncoding,
    invoice::SignedInvoice,
};

#[derive(Error, Debug)]
pub enum ZatcaError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authority rejected the request ({status}): {body}")]
    Rejected { status: u16, body: AuthorityErrorBody },
    #[error("unreadable authority response: {0}")]
    InvalidResponse(String),
    #[error("request not sent: {0}")]
    ClientState(String),
}

/// Which CSID a set of credentials is.
pub trait TokenScope {}

/// Compliance CSID, used for onboarding checks only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Compliance;

/// Production CSID, used for reporting and clearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Production;

impl TokenScope for Compliance {}
impl TokenScope for Production {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    ComplianceCsid,
    ComplianceInvoices,
    ProductionCsid,
    Reporting,
    Clearance,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::ComplianceCsid => "compliance",
            Endpoint::ComplianceInvoices => "compliance/invoices",
            Endpoint::ProductionCsid => "production/csids",
            Endpoint::Reporting => "invoices/reporting/single",
            Endpoint::Clearance => "invoices/clearance/single",
        }
    }

    /// `Clearance-Status` header value of the submission endpoints.
    fn clearance_status(self) -> Option<&'static str> {
        match self {
            Endpoint::Reporting => Some("0"),
            Endpoint::Clearance => Some("1"),
            _ => None,
        }
    }
}

/// Gateway client for one environment.
///
/// # Examples
/// ```rust,no_run
/// use zatca_egs::api::{ZatcaClient, ZatcaError};
/// use zatca_egs::config::Config;
///
/// let client = ZatcaClient::new(Config::default())?;
/// # let _ = client;
/// # Ok::<(), ZatcaError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ZatcaClient {
    config: Config,
    client: Client,
    base_url: String,
}

/// Body of compliance, reporting and clearance responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validation_results: ValidationResults,
    #[serde(default)]
    pub reporting_status: Option<String>,
    #[serde(default)]
    pub clearance_status: Option<String>,
    /// Base64 of the invoice as stamped by the authority on clearance.
    #[serde(default)]
    pub cleared_invoice: Option<String>,
    #[serde(rename = "qrSellertStatus", default)]
    pub qr_seller_status: Option<String>,
    #[serde(rename = "qrBuyertStatus", default)]
    pub qr_buyer_status: Option<String>,
}

impl ValidationResponse {
    /// `true` unless the authority reported an `ERROR` status or any error
    /// message. Warnings do not fail an invoice.
    pub fn is_accepted(&self) -> bool {
        self.validation_results.status.as_deref() != Some("ERROR")
            && self.validation_results.error_messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResults {
    #[serde(default)]
    pub info_messages: MessageList,
    #[serde(default)]
    pub warning_messages: Vec<ValidationMessage>,
    #[serde(default)]
    pub error_messages: Vec<ValidationMessage>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub code: Option<String>,
    pub category: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `infoMessages` is an object when there is one message and an array otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageList {
    One(ValidationMessage),
    Many(Vec<ValidationMessage>),
    #[default]
    Empty,
}

impl MessageList {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationMessage> {
        let messages: &[ValidationMessage] = match self {
            MessageList::One(message) => std::slice::from_ref(message),
            MessageList::Many(messages) => messages,
            MessageList::Empty => &[],
        };
        messages.iter()
    }
}

/// Gateway body for a 401.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    pub timestamp: Option<i64>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Gateway body for a 5xx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFault {
    pub category: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Payload of a non-2xx authority response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityErrorBody {
    /// Invoice validation failed; carries the authority's messages.
    Validation(ValidationResponse),
    Unauthorized(AuthFailure),
    Server(ServerFault),
    /// Body that did not match any known shape.
    Raw(String),
}

impl AuthorityErrorBody {
    fn parse(status: u16, body: &str) -> Self {
        let raw = || AuthorityErrorBody::Raw(body.to_string());
        if status == 401 {
            return serde_json::from_str(body)
                .map(AuthorityErrorBody::Unauthorized)
                .unwrap_or_else(|_| raw());
        }
        if let Ok(response) = serde_json::from_str(body) {
            return AuthorityErrorBody::Validation(response);
        }
        match serde_json::from_str::<ServerFault>(body) {
            Ok(fault) if fault.code.is_some() || fault.message.is_some() => {
                AuthorityErrorBody::Server(fault)
            }
            _ => raw(),
        }
    }

    /// Authority error messages, if the body carried validation results.
    pub fn error_messages(&self) -> &[ValidationMessage] {
        match self {
            AuthorityErrorBody::Validation(response) => {
                &response.validation_results.error_messages
            }
            _ => &[],
        }
    }
}

impl fmt::Display for AuthorityErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityErrorBody::Validation(_) => {
                let codes: Vec<&str> = self
                    .error_messages()
                    .iter()
                    .filter_map(|m| m.code.as_deref())
                    .collect();
                write!(f, "validation failed [{}]", codes.join(", "))
            }
            AuthorityErrorBody::Unauthorized(failure) => write!(
                f,
                "unauthorized: {}",
                failure
                    .message
                    .as_deref()
                    .or(failure.error.as_deref())
                    .unwrap_or("-")
            ),
            AuthorityErrorBody::Server(fault) => write!(
                f,
                "{}: {}",
                fault.code.as_deref().unwrap_or("error"),
                fault.message.as_deref().unwrap_or("-")
            ),
            AuthorityErrorBody::Raw(body) => f.write_str(body),
        }
    }
}

/// A CSID as issued by the authority: certificate token, secret and the
/// request id of the issuing call.
///
/// Normally returned by [`ZatcaClient::issue_compliance_csid`] or
/// [`ZatcaClient::issue_production_csid`]; stored credentials can be
/// rebuilt with [`CsidCredentials::new`].
///
/// # Examples
/// ```rust
/// use zatca_egs::api::{Compliance, CsidCredentials};
/// use zatca_egs::config::EnvironmentType;
///
/// let creds = CsidCredentials::<Compliance>::new(
///     EnvironmentType::Simulation,
///     Some("1234567890123".to_string()),
///     "TUlJQ1BUQ0NBZU9nQXdJQkFnS....",
///     "Dehvg1fc8GF6Jwt5bOxXwC6en....",
/// );
/// assert_eq!(creds.request_id(), Some("1234567890123"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsidCredentials<T> {
    env: EnvironmentType,
    request_id: Option<String>,
    binary_security_token: String,
    secret: String,
    #[serde(skip)]
    _scope: PhantomData<T>,
}

impl<T> fmt::Debug for CsidCredentials<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsidCredentials")
            .field("env", &self.env)
            .field("request_id", &self.request_id)
            .field("binary_security_token", &self.binary_security_token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl<T> CsidCredentials<T> {
    pub fn new(
        env: EnvironmentType,
        request_id: Option<String>,
        binary_security_token: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            env,
            request_id,
            binary_security_token: binary_security_token.into(),
            secret: secret.into(),
            _scope: PhantomData,
        }
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Base64 of the base64-encoded DER certificate.
    pub fn binary_security_token(&self) -> &str {
        &self.binary_security_token
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The inner base64 DER, with any line breaks removed.
    fn certificate_base64(&self) -> Result<String, ZatcaError> {
        let invalid = |e: &dyn fmt::Display| {
            ZatcaError::InvalidResponse(format!("binarySecurityToken: {e}"))
        };
        let decoded =
            Base64::decode_vec(self.binary_security_token.trim()).map_err(|e| invalid(&e))?;
        let text = String::from_utf8(decoded).map_err(|e| invalid(&e))?;
        Ok(text.split_whitespace().collect())
    }

    /// Issued certificate as PEM with 64-column lines.
    pub fn certificate_pem(&self) -> Result<String, ZatcaError> {
        let body = self.certificate_base64()?;
        let lines: Vec<&str> = body
            .as_bytes()
            .chunks(64)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .collect();
        Ok(format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            lines.join("\n")
        ))
    }

    pub fn certificate(&self) -> Result<Certificate, ZatcaError> {
        let der = Base64::decode_vec(&self.certificate_base64()?)
            .map_err(|e| ZatcaError::InvalidResponse(format!("certificate: {e}")))?;
        Certificate::from_der(&der)
            .map_err(|e| ZatcaError::InvalidResponse(format!("certificate: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct CsrRequest {
    csr: String,
}

#[derive(Debug, Serialize)]
struct ProductionCsidRequest<'a> {
    compliance_request_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceSubmission {
    invoice_hash: String,
    uuid: Uuid,
    invoice: String,
}

impl From<&SignedInvoice> for InvoiceSubmission {
    fn from(invoice: &SignedInvoice) -> Self {
        Self {
            invoice_hash: invoice.invoice_hash().to_string(),
            uuid: invoice.uuid(),
            invoice: invoice.xml_base64(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsidResponse {
    #[serde(rename = "requestID", default, deserialize_with = "request_id_string")]
    request_id: Option<String>,
    binary_security_token: String,
    secret: String,
}

/// `requestID` is a JSON number in some environments and a string in others.
fn request_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RequestId {
        Number(u64),
        Text(String),
    }
    let id = Option::<RequestId>::deserialize(deserializer)?;
    Ok(id.map(|id| match id {
        RequestId::Number(n) => n.to_string(),
        RequestId::Text(s) => s,
    }))
}

impl ZatcaClient {
    /// # Errors
    /// Returns [`ZatcaError::Http`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, ZatcaError> {
        let client = Client::builder().build()?;
        let base_url = config.base_url().to_string();
        Ok(Self {
            config,
            client,
            base_url,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit a CSR with the portal OTP and receive a compliance CSID.
    pub async fn issue_compliance_csid(
        &self,
        csr: &CertReq,
        otp: &str,
    ) -> Result<CsidCredentials<Compliance>, ZatcaError> {
        let body = CsrRequest {
            csr: csr
                .pem_base64()
                .map_err(|e| ZatcaError::ClientState(e.to_string()))?,
        };
        let request = self
            .request(Endpoint::ComplianceCsid)
            .header("OTP", otp)
            .json(&body);
        let issued: CsidResponse = self.send(Endpoint::ComplianceCsid, request).await?;
        Ok(self.credentials(issued))
    }

    /// Validate a signed sample invoice under a compliance CSID.
    ///
    /// A 2xx with `ERROR` validation results is returned as `Ok`; inspect
    /// [`ValidationResponse::is_accepted`].
    pub async fn check_invoice_compliance(
        &self,
        invoice: &SignedInvoice,
        credentials: &CsidCredentials<Compliance>,
    ) -> Result<ValidationResponse, ZatcaError> {
        self.submit(Endpoint::ComplianceInvoices, invoice, credentials)
            .await
    }

    /// Exchange a compliance CSID for a production CSID.
    pub async fn issue_production_csid(
        &self,
        compliance_request_id: &str,
        ccsid: &CsidCredentials<Compliance>,
    ) -> Result<CsidCredentials<Production>, ZatcaError> {
        self.ensure_env(ccsid)?;
        if compliance_request_id.trim().is_empty() {
            return Err(ZatcaError::ClientState(
                "compliance request id is empty".into(),
            ));
        }
        let request = self
            .authorized(Endpoint::ProductionCsid, ccsid)
            .json(&ProductionCsidRequest {
                compliance_request_id,
            });
        let issued: CsidResponse = self.send(Endpoint::ProductionCsid, request).await?;
        Ok(self.credentials(issued))
    }

    /// Report a simplified invoice.
    pub async fn report_invoice(
        &self,
        invoice: &SignedInvoice,
        credentials: &CsidCredentials<Production>,
    ) -> Result<ValidationResponse, ZatcaError> {
        if !invoice.data().is_simplified() {
            return Err(ZatcaError::ClientState(
                "only simplified invoices are reported".into(),
            ));
        }
        self.submit(Endpoint::Reporting, invoice, credentials).await
    }

    /// Clear a standard invoice.
    pub async fn clear_invoice(
        &self,
        invoice: &SignedInvoice,
        credentials: &CsidCredentials<Production>,
    ) -> Result<ValidationResponse, ZatcaError> {
        if invoice.data().is_simplified() {
            return Err(ZatcaError::ClientState(
                "only standard invoices are cleared".into(),
            ));
        }
        self.submit(Endpoint::Clearance, invoice, credentials).await
    }
}

impl ZatcaClient {
    fn build_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, endpoint: Endpoint) -> RequestBuilder {
        let request = self
            .client
            .post(self.build_endpoint(endpoint.path()))
            .header("Accept", "application/json")
            .header("Accept-Language", "en")
            .header("Accept-Version", self.config.api_version());
        match endpoint.clearance_status() {
            Some(status) => request.header("Clearance-Status", status),
            None => request,
        }
    }

    fn authorized<T>(&self, endpoint: Endpoint, credentials: &CsidCredentials<T>) -> RequestBuilder {
        self.request(endpoint)
            .basic_auth(&credentials.binary_security_token, Some(&credentials.secret))
    }

    async fn submit<T>(
        &self,
        endpoint: Endpoint,
        invoice: &SignedInvoice,
        credentials: &CsidCredentials<T>,
    ) -> Result<ValidationResponse, ZatcaError> {
        self.ensure_env(credentials)?;
        let request = self
            .authorized(endpoint, credentials)
            .json(&InvoiceSubmission::from(invoice));
        self.send(endpoint, request).await
    }

    async fn send<R: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        request: RequestBuilder,
    ) -> Result<R, ZatcaError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!(endpoint = endpoint.path(), status, "authority responded");

        if (200..300).contains(&status) {
            return serde_json::from_str(&text)
                .map_err(|e| ZatcaError::InvalidResponse(format!("status {status}: {e}")));
        }

        let body = AuthorityErrorBody::parse(status, &text);
        warn!(endpoint = endpoint.path(), status, error = %body, "authority rejected request");
        Err(ZatcaError::Rejected { status, body })
    }

    fn credentials<T>(&self, issued: CsidResponse) -> CsidCredentials<T> {
        CsidCredentials::new(
            self.config.env(),
            issued.request_id,
            issued.binary_security_token,
            issued.secret,
        )
    }

    fn ensure_env<T>(&self, credentials: &CsidCredentials<T>) -> Result<(), ZatcaError> {
        if credentials.env() == self.config.env() {
            Ok(())
        } else {
            Err(ZatcaError::ClientState(format!(
                "credentials were issued for {}, client targets {}",
                credentials.env(),
                self.config.env()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::{CsrField, CsrProperties};
    use crate::invoice::{test_support, InvoiceSubType, InvoiceType};
    use httpmock::{Method::POST, MockServer};

    const PASS_BODY: &str = r#"{
      "validationResults": {
        "infoMessages": [],
        "warningMessages": [],
        "errorMessages": [],
        "status": "PASS"
      },
      "reportingStatus": "REPORTED",
      "clearanceStatus": null,
      "qrSellertStatus": null,
      "qrBuyertStatus": null
    }"#;

    fn signed(sub_type: InvoiceSubType) -> SignedInvoice {
        test_support::scenario_builder_for(InvoiceType::Invoice, sub_type)
            .build()
            .expect("finalized")
            .sign(&test_support::signer())
            .expect("signed")
    }

    fn creds<T>(env: EnvironmentType) -> CsidCredentials<T> {
        CsidCredentials::new(env, Some("1234567890123".into()), "token", "secret")
    }

    fn sample_csr() -> CertReq {
        CsrProperties::from_pairs([
            (CsrField::CommonName, "TST-886431145-399999999900003"),
            (
                CsrField::SerialNumber,
                "1-TST|2-TST|3-ed22f1d8-e6a2-1118-9b58-d9a8f11e445f",
            ),
            (CsrField::OrganizationIdentifier, "399999999900003"),
            (CsrField::OrganizationUnitName, "Riyadh Branch"),
            (CsrField::OrganizationName, "Maximum Speed Tech Supply LTD"),
            (CsrField::CountryName, "SA"),
            (CsrField::InvoiceType, "1100"),
            (CsrField::LocationAddress, "RRRD2929"),
            (CsrField::IndustryBusinessCategory, "Supply activities"),
        ])
        .and_then(|props| props.build_with_rng(EnvironmentType::NonProduction))
        .expect("csr")
        .0
    }

    fn mock_client(server: &MockServer) -> ZatcaClient {
        ZatcaClient::new(Config::default().with_base_url(server.base_url())).expect("client")
    }

    fn basic_auth() -> String {
        format!("Basic {}", Base64::encode_string(b"token:secret"))
    }

    #[test]
    fn single_info_message_object_is_accepted() {
        let payload = r#"{
          "validationResults": {
            "infoMessages": {
              "type": "INFO",
              "code": "XSD_ZATCA_VALID",
              "category": "XSD validation",
              "message": "Complied with UBL 2.1 standards",
              "status": "PASS"
            },
            "warningMessages": [],
            "errorMessages": [],
            "status": "PASS"
          },
          "reportingStatus": "REPORTED"
        }"#;

        let parsed: ValidationResponse = serde_json::from_str(payload).expect("deserialize");
        let codes: Vec<_> = parsed
            .validation_results
            .info_messages
            .iter()
            .filter_map(|m| m.code.as_deref())
            .collect();
        assert_eq!(codes, ["XSD_ZATCA_VALID"]);
        assert!(parsed.is_accepted());
        assert_eq!(parsed.reporting_status.as_deref(), Some("REPORTED"));
    }

    #[test]
    fn warnings_accept_errors_reject() {
        let warned: ValidationResponse = serde_json::from_str(
            r#"{"validationResults":{"warningMessages":[{"type":"WARNING","code":"BR-KSA-08","category":"KSA","message":"w","status":"WARNING"}],"status":"WARNING"}}"#,
        )
        .expect("warning");
        assert!(warned.is_accepted());
        assert_eq!(warned.validation_results.info_messages, MessageList::Empty);

        let failed: ValidationResponse = serde_json::from_str(
            r#"{"validationResults":{"errorMessages":[{"type":"ERROR","code":"BR-KSA-37","category":"KSA","message":"e","status":"ERROR"}],"status":"ERROR"},"clearanceStatus":"NOT_CLEARED","clearedInvoice":null}"#,
        )
        .expect("error");
        assert!(!failed.is_accepted());
        assert_eq!(failed.validation_results.error_messages.len(), 1);
        assert!(failed.cleared_invoice.is_none());
    }

    #[test]
    fn csid_response_accepts_numeric_or_text_request_id() {
        let numeric: CsidResponse = serde_json::from_str(
            r#"{"requestID": 1234567890123, "binarySecurityToken": "t", "secret": "s"}"#,
        )
        .expect("numeric");
        assert_eq!(numeric.request_id.as_deref(), Some("1234567890123"));

        let text: CsidResponse = serde_json::from_str(
            r#"{"requestID": "42", "binarySecurityToken": "t", "secret": "s", "dispositionMessage": "ISSUED"}"#,
        )
        .expect("text");
        assert_eq!(text.request_id.as_deref(), Some("42"));
    }

    #[test]
    fn credentials_decode_certificate_and_redact_secret() {
        let signer = test_support::signer();
        let der = x509_cert::der::Encode::to_der(signer.certificate()).expect("der");
        let token = Base64::encode_string(Base64::encode_string(&der).as_bytes());
        let creds = CsidCredentials::<Production>::new(
            EnvironmentType::NonProduction,
            None,
            token,
            "top-secret",
        );

        let pem = creds.certificate_pem().expect("pem");
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert!(pem.lines().all(|line| line.len() <= 64));
        assert_eq!(&creds.certificate().expect("certificate"), signer.certificate());
        assert!(!format!("{creds:?}").contains("top-secret"));
    }

    #[test]
    fn authority_error_body_shapes() {
        assert!(matches!(
            AuthorityErrorBody::parse(401, r#"{"status":401,"error":"Unauthorized","message":"nope"}"#),
            AuthorityErrorBody::Unauthorized(_)
        ));
        assert!(matches!(
            AuthorityErrorBody::parse(500, r#"{"category":"HTTP-Errors","code":"500","message":"boom"}"#),
            AuthorityErrorBody::Server(_)
        ));
        assert_eq!(
            AuthorityErrorBody::parse(400, "Invalid-CSR"),
            AuthorityErrorBody::Raw("Invalid-CSR".into())
        );
        let body = AuthorityErrorBody::parse(
            400,
            r#"{"validationResults":{"errorMessages":[{"type":"ERROR","code":"BR-KSA-37","category":"KSA","message":"x","status":"ERROR"}],"status":"ERROR"}}"#,
        );
        assert_eq!(body.error_messages().len(), 1);
        assert_eq!(body.to_string(), "validation failed [BR-KSA-37]");
    }

    #[test]
    fn endpoints_resolve_against_base_url() {
        let client = ZatcaClient::new(Config::default()).expect("client");
        assert_eq!(
            client.build_endpoint("/invoices/reporting/single"),
            client.build_endpoint(Endpoint::Reporting.path())
        );
        assert!(client
            .build_endpoint(Endpoint::ComplianceCsid.path())
            .ends_with("/developer-portal/compliance"));
        assert_eq!(Endpoint::ProductionCsid.clearance_status(), None);
    }

    #[tokio::test]
    async fn submission_kind_and_environment_are_checked_locally() {
        let client = ZatcaClient::new(Config::default()).expect("client");
        let production = creds::<Production>(EnvironmentType::NonProduction);

        let reported = client
            .report_invoice(&signed(InvoiceSubType::Standard), &production)
            .await;
        assert!(matches!(reported, Err(ZatcaError::ClientState(_))));

        let cleared = client
            .clear_invoice(&signed(InvoiceSubType::Simplified), &production)
            .await;
        assert!(matches!(cleared, Err(ZatcaError::ClientState(_))));

        let checked = client
            .check_invoice_compliance(
                &signed(InvoiceSubType::Simplified),
                &creds(EnvironmentType::Production),
            )
            .await;
        assert!(matches!(checked, Err(ZatcaError::ClientState(_))));
    }

    #[tokio::test]
    async fn compliance_csid_posts_csr_with_otp() {
        let server = MockServer::start_async().await;
        let csr = sample_csr();
        let encoded = csr.pem_base64().expect("encode");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/compliance")
                    .header("OTP", "123345")
                    .header("Accept-Version", "V2")
                    .json_body(serde_json::json!({ "csr": encoded }));
                then.status(200).header("content-type", "application/json").body(
                    r#"{"requestID":1234567890123,"dispositionMessage":"ISSUED","binarySecurityToken":"token","secret":"secret"}"#,
                );
            })
            .await;

        let issued = mock_client(&server)
            .issue_compliance_csid(&csr, "123345")
            .await
            .expect("compliance csid");
        mock.assert_async().await;
        assert_eq!(issued.request_id(), Some("1234567890123"));
        assert_eq!(issued.binary_security_token(), "token");
        assert_eq!(issued.secret(), "secret");
        assert_eq!(issued.env(), EnvironmentType::NonProduction);
    }

    #[tokio::test]
    async fn production_csid_sends_request_id_with_basic_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/production/csids")
                    .header("Authorization", basic_auth())
                    .json_body(serde_json::json!({ "compliance_request_id": "1234567890123" }));
                then.status(200).header("content-type", "application/json").body(
                    r#"{"requestID":30368,"binarySecurityToken":"ptoken","secret":"psecret"}"#,
                );
            })
            .await;

        let production = mock_client(&server)
            .issue_production_csid("1234567890123", &creds(EnvironmentType::NonProduction))
            .await
            .expect("production csid");
        mock.assert_async().await;
        assert_eq!(production.binary_security_token(), "ptoken");
        assert_eq!(production.request_id(), Some("30368"));
    }

    #[tokio::test]
    async fn invoice_endpoints_send_hash_uuid_and_document() {
        let server = MockServer::start_async().await;
        let simplified = signed(InvoiceSubType::Simplified);
        let standard = signed(InvoiceSubType::Standard);

        let report = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/invoices/reporting/single")
                    .header("Clearance-Status", "0")
                    .header("Accept-Language", "en")
                    .header("Authorization", basic_auth())
                    .json_body(serde_json::json!({
                        "invoiceHash": simplified.invoice_hash(),
                        "uuid": simplified.uuid(),
                        "invoice": simplified.xml_base64(),
                    }));
                then.status(200)
                    .header("content-type", "application/json")
                    .body(PASS_BODY);
            })
            .await;
        let clear = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/invoices/clearance/single")
                    .header("Clearance-Status", "1");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(PASS_BODY);
            })
            .await;
        let compliance = server
            .mock_async(|when, then| {
                when.method(POST).path("/compliance/invoices");
                then.status(202)
                    .header("content-type", "application/json")
                    .body(PASS_BODY);
            })
            .await;

        let client = mock_client(&server);
        let production = creds::<Production>(EnvironmentType::NonProduction);
        assert!(client.report_invoice(&simplified, &production).await.is_ok());
        assert!(client.clear_invoice(&standard, &production).await.is_ok());
        let checked = client
            .check_invoice_compliance(&simplified, &creds(EnvironmentType::NonProduction))
            .await
            .expect("compliance");
        assert!(checked.is_accepted());

        report.assert_async().await;
        clear.assert_async().await;
        compliance.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_becomes_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/invoices/reporting/single");
                then.status(401)
                    .header("content-type", "application/json")
                    .body(r#"{"timestamp":1,"status":401,"error":"Unauthorized","message":"nope"}"#);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/compliance");
                then.status(400).body("Invalid-OTP");
            })
            .await;

        let client = mock_client(&server);
        let invoice = signed(InvoiceSubType::Simplified);
        match client
            .report_invoice(&invoice, &creds(EnvironmentType::NonProduction))
            .await
        {
            Err(ZatcaError::Rejected {
                status: 401,
                body: AuthorityErrorBody::Unauthorized(failure),
            }) => assert_eq!(failure.message.as_deref(), Some("nope")),
            other => panic!("expected unauthorized rejection, got {other:?}"),
        }

        match client.issue_compliance_csid(&sample_csr(), "000000").await {
            Err(ZatcaError::Rejected { status: 400, body }) => {
                assert_eq!(body, AuthorityErrorBody::Raw("Invalid-OTP".into()))
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_with_unparseable_body_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/production/csids");
                then.status(200).body("not json");
            })
            .await;
        let result = mock_client(&server)
            .issue_production_csid("1", &creds(EnvironmentType::NonProduction))
            .await;
        assert!(matches!(result, Err(ZatcaError::InvalidResponse(_))));
    }
}
