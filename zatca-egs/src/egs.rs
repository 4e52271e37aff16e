//! EGS unit identity and its certificate lifecycle.
//!
//! An [`EgsUnit`] owns the device key pair, the certificates ZATCA issues
//! for it and the running previous-invoice-hash cursor. Every transition
//! awaits the authority first and only then commits, so a failed or
//! dropped call leaves the unit exactly as it was.
use crate::api::{Compliance, CsidCredentials, Production, ValidationResponse, ZatcaClient, ZatcaError};
use crate::csr::{CsrError, CsrProperties};
use crate::invoice::sign::{InvoiceSigner, SigningError};
use crate::invoice::{
    Address, FinalizedInvoice, IdScheme, InvoiceError, PartyId, Seller, SignedInvoice,
    INITIAL_PREVIOUS_INVOICE_HASH,
};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use x509_cert::request::CertReq;

/// Identity of an e-invoicing generation solution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgsUnitInfo {
    pub uuid: Uuid,
    pub custom_id: String,
    pub model: String,
    pub crn_number: String,
    pub vat_name: String,
    pub vat_number: String,
    pub location: Address,
    pub branch_name: String,
    pub branch_industry: String,
}

impl EgsUnitInfo {
    /// Seller party for invoices issued by this unit.
    pub fn seller(&self) -> Result<Seller, InvoiceError> {
        Seller::new(
            self.vat_name.clone(),
            self.location.clone(),
            self.vat_number.clone(),
            Some(PartyId::new(IdScheme::CommercialRegistration, self.crn_number.clone())),
        )
    }
}

/// Lifecycle position of an [`EgsUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EgsState {
    Uninitialized,
    KeysGenerated,
    ComplianceIssued,
    /// Compliance certificate issued and at least one compliance check passed.
    ComplianceVerified,
    ProductionIssued,
}

impl fmt::Display for EgsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EgsState::Uninitialized => "uninitialized",
            EgsState::KeysGenerated => "keys generated",
            EgsState::ComplianceIssued => "compliance issued",
            EgsState::ComplianceVerified => "compliance verified",
            EgsState::ProductionIssued => "production issued",
        })
    }
}

/// Operation attempted out of order, or against the wrong invoice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("{operation} is not allowed in state '{state}'")]
    IllegalTransition {
        operation: &'static str,
        state: EgsState,
    },
    #[error("{operation} requires a {expected} invoice")]
    WrongInvoiceKind {
        operation: &'static str,
        expected: &'static str,
    },
    #[error("invoice chains to '{invoice}' but the device cursor is '{cursor}'")]
    StaleChain { cursor: String, invoice: String },
}

#[derive(Debug, Error)]
pub enum EgsError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Csr(#[from] CsrError),
    #[error(transparent)]
    Api(#[from] ZatcaError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Invoice(#[from] InvoiceError),
}

/// Device state machine driving onboarding, signing and submission.
///
/// One logical actor per device: the `&mut self` receivers serialize
/// transitions for a unit, and independent units share nothing.
///
/// # Examples
/// ```rust,no_run
/// use zatca_egs::api::ZatcaClient;
/// use zatca_egs::config::Config;
/// use zatca_egs::egs::{EgsUnit, EgsUnitInfo};
///
/// # async fn demo(info: EgsUnitInfo) -> Result<(), zatca_egs::egs::EgsError> {
/// let client = ZatcaClient::new(Config::default())?;
/// let mut unit = EgsUnit::new(info, "solution_name", client);
/// unit.generate_keys_and_csr()?;
/// unit.issue_compliance_certificate("123345").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EgsUnit {
    info: EgsUnitInfo,
    solution_name: String,
    client: ZatcaClient,
    private_key: Option<SigningKey>,
    csr: Option<CertReq>,
    compliance: Option<CsidCredentials<Compliance>>,
    compliance_verified: bool,
    production: Option<CsidCredentials<Production>>,
    previous_invoice_hash: String,
}

impl EgsUnit {
    pub fn new(info: EgsUnitInfo, solution_name: impl Into<String>, client: ZatcaClient) -> Self {
        Self {
            info,
            solution_name: solution_name.into(),
            client,
            private_key: None,
            csr: None,
            compliance: None,
            compliance_verified: false,
            production: None,
            previous_invoice_hash: INITIAL_PREVIOUS_INVOICE_HASH.to_string(),
        }
    }

    /// Rebuild a unit already onboarded in an earlier process from its
    /// persisted key, credentials and hash cursor.
    ///
    /// Without the compliance credentials the restored unit cannot run
    /// further compliance checks.
    pub fn restore(
        info: EgsUnitInfo,
        solution_name: impl Into<String>,
        client: ZatcaClient,
        private_key: SigningKey,
        compliance: Option<CsidCredentials<Compliance>>,
        production: CsidCredentials<Production>,
        previous_invoice_hash: impl Into<String>,
    ) -> Self {
        let mut unit = Self::new(info, solution_name, client);
        unit.private_key = Some(private_key);
        unit.compliance = compliance;
        unit.production = Some(production);
        unit.previous_invoice_hash = previous_invoice_hash.into();
        unit
    }

    /// Rebuild a unit that stopped mid-onboarding, holding only its
    /// compliance credentials. It resumes in [`EgsState::ComplianceIssued`].
    pub fn restore_compliance(
        info: EgsUnitInfo,
        solution_name: impl Into<String>,
        client: ZatcaClient,
        private_key: SigningKey,
        compliance: CsidCredentials<Compliance>,
    ) -> Self {
        let mut unit = Self::new(info, solution_name, client);
        unit.private_key = Some(private_key);
        unit.compliance = Some(compliance);
        unit
    }

    pub fn state(&self) -> EgsState {
        if self.production.is_some() {
            EgsState::ProductionIssued
        } else if self.compliance.is_some() && self.compliance_verified {
            EgsState::ComplianceVerified
        } else if self.compliance.is_some() {
            EgsState::ComplianceIssued
        } else if self.private_key.is_some() {
            EgsState::KeysGenerated
        } else {
            EgsState::Uninitialized
        }
    }

    pub fn info(&self) -> &EgsUnitInfo {
        &self.info
    }

    /// Hash the next invoice of this unit must embed as its PIH.
    pub fn previous_invoice_hash(&self) -> &str {
        &self.previous_invoice_hash
    }

    /// Private key, for the caller to persist.
    pub fn private_key(&self) -> Option<&SigningKey> {
        self.private_key.as_ref()
    }

    pub fn csr(&self) -> Option<&CertReq> {
        self.csr.as_ref()
    }

    pub fn compliance_credentials(&self) -> Option<&CsidCredentials<Compliance>> {
        self.compliance.as_ref()
    }

    pub fn production_credentials(&self) -> Option<&CsidCredentials<Production>> {
        self.production.as_ref()
    }

    /// Generate a secp256k1 key pair and a CSR bound to this unit.
    pub fn generate_keys_and_csr(&mut self) -> Result<&CertReq, EgsError> {
        self.generate_keys_and_csr_with_key(SigningKey::random(&mut OsRng))
    }

    /// Same as [`generate_keys_and_csr`][Self::generate_keys_and_csr] with a caller-supplied key.
    pub fn generate_keys_and_csr_with_key(
        &mut self,
        private_key: SigningKey,
    ) -> Result<&CertReq, EgsError> {
        self.require("generate_keys_and_csr", &[EgsState::Uninitialized])?;
        let props = CsrProperties::from_egs_unit(&self.info, &self.solution_name)?;
        let csr = props.build(&private_key, self.client.config().env())?;

        self.private_key = Some(private_key);
        self.transition(EgsState::Uninitialized);
        Ok(self.csr.insert(csr))
    }

    /// Submit the CSR with the onboarding portal's one-time password.
    pub async fn issue_compliance_certificate(
        &mut self,
        otp: &str,
    ) -> Result<&CsidCredentials<Compliance>, EgsError> {
        let from = self.require("issue_compliance_certificate", &[EgsState::KeysGenerated])?;
        let csr = self.csr.as_ref().ok_or(StateError::IllegalTransition {
            operation: "issue_compliance_certificate",
            state: from,
        })?;
        let credentials = self.client.issue_compliance_csid(csr, otp).await?;

        self.compliance_verified = false;
        let credentials = self.compliance.insert(credentials);
        info!(
            egs = %self.info.uuid,
            from = %from,
            to = %EgsState::ComplianceIssued,
            "EGS state transition"
        );
        Ok(credentials)
    }

    /// Run a signed sample invoice through the compliance endpoint, under
    /// the compliance credentials even once production is issued.
    ///
    /// A passing result marks a unit still onboarding as
    /// [`EgsState::ComplianceVerified`].
    pub async fn check_invoice_compliance(
        &mut self,
        invoice: &SignedInvoice,
    ) -> Result<ValidationResponse, EgsError> {
        let from = self.require(
            "check_invoice_compliance",
            &[
                EgsState::ComplianceIssued,
                EgsState::ComplianceVerified,
                EgsState::ProductionIssued,
            ],
        )?;
        let credentials = self.compliance.as_ref().ok_or(StateError::IllegalTransition {
            operation: "check_invoice_compliance",
            state: from,
        })?;
        let response = self
            .client
            .check_invoice_compliance(invoice, credentials)
            .await?;

        if response.is_accepted() && !self.compliance_verified {
            self.compliance_verified = true;
            if from != EgsState::ProductionIssued {
                self.transition(from);
            }
        }
        Ok(response)
    }

    /// Exchange the compliance request id for a production certificate.
    ///
    /// The compliance certificate is retired: it is kept for compliance
    /// checks and never used for signing again.
    pub async fn issue_production_certificate(
        &mut self,
        compliance_request_id: &str,
    ) -> Result<&CsidCredentials<Production>, EgsError> {
        let from = self.require(
            "issue_production_certificate",
            &[EgsState::ComplianceIssued, EgsState::ComplianceVerified],
        )?;
        let compliance = self.compliance.as_ref().ok_or(StateError::IllegalTransition {
            operation: "issue_production_certificate",
            state: from,
        })?;
        let credentials = self
            .client
            .issue_production_csid(compliance_request_id, compliance)
            .await?;

        let credentials = self.production.insert(credentials);
        info!(
            egs = %self.info.uuid,
            from = %from,
            to = %EgsState::ProductionIssued,
            "EGS state transition"
        );
        Ok(credentials)
    }

    /// Sign with the current certificate: production once issued, compliance before.
    pub fn sign_invoice(&self, invoice: FinalizedInvoice) -> Result<SignedInvoice, EgsError> {
        let private_key = self
            .private_key
            .clone()
            .ok_or_else(|| SigningError::PrivateKey("no key pair generated".into()))?;
        let certificate = match (&self.production, &self.compliance) {
            (Some(production), _) => production.certificate()?,
            (None, Some(compliance)) => compliance.certificate()?,
            (None, None) => {
                return Err(SigningError::Certificate("no certificate issued".into()).into())
            }
        };
        let signer = InvoiceSigner::new(certificate, private_key)?;
        Ok(signer.sign(invoice)?)
    }

    /// Report a simplified invoice; advances the hash cursor on success.
    pub async fn report_invoice(
        &mut self,
        invoice: &SignedInvoice,
    ) -> Result<ValidationResponse, EgsError> {
        let production = self.submission_credentials("report_invoice", invoice, true)?;
        let response = self.client.report_invoice(invoice, production).await?;
        self.advance_cursor(invoice);
        Ok(response)
    }

    /// Clear a standard invoice; advances the hash cursor on success.
    pub async fn clear_invoice(
        &mut self,
        invoice: &SignedInvoice,
    ) -> Result<ValidationResponse, EgsError> {
        let production = self.submission_credentials("clear_invoice", invoice, false)?;
        let response = self.client.clear_invoice(invoice, production).await?;
        self.advance_cursor(invoice);
        Ok(response)
    }
}

impl EgsUnit {
    fn require(&self, operation: &'static str, allowed: &[EgsState]) -> Result<EgsState, StateError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(StateError::IllegalTransition { operation, state })
        }
    }

    fn transition(&self, from: EgsState) {
        info!(
            egs = %self.info.uuid,
            from = %from,
            to = %self.state(),
            "EGS state transition"
        );
    }

    fn submission_credentials(
        &self,
        operation: &'static str,
        invoice: &SignedInvoice,
        simplified: bool,
    ) -> Result<&CsidCredentials<Production>, StateError> {
        let state = self.state();
        let production = self
            .production
            .as_ref()
            .ok_or(StateError::IllegalTransition { operation, state })?;
        if invoice.data().is_simplified() != simplified {
            return Err(StateError::WrongInvoiceKind {
                operation,
                expected: if simplified { "simplified" } else { "standard" },
            });
        }
        let embedded = invoice.data().previous_invoice_hash();
        if embedded != self.previous_invoice_hash {
            return Err(StateError::StaleChain {
                cursor: self.previous_invoice_hash.clone(),
                invoice: embedded.to_string(),
            });
        }
        Ok(production)
    }

    fn advance_cursor(&mut self, invoice: &SignedInvoice) {
        self.previous_invoice_hash = invoice.invoice_hash().to_string();
        debug!(
            egs = %self.info.uuid,
            invoice = %invoice.uuid(),
            "previous invoice hash advanced"
        );
    }
}
