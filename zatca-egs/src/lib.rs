//! Rust toolkit for ZATCA (Fatoora) phase 2 e-invoicing.
//!
//! - [`invoice`]: parties, line items, tax totals, UBL assembly, signing and QR.
//! - [`csr`]: certificate signing requests for device onboarding.
//! - [`api`]: the authority's compliance, onboarding, reporting and clearance calls.
//! - [`egs`]: the per-device lifecycle that ties the above together.
//!
//! # Examples
//! ```rust
//! use zatca_egs::config::{Config, EnvironmentType};
//!
//! let config = Config::new(EnvironmentType::Simulation);
//! assert!(config.base_url().contains("simulation"));
//! ```
pub mod api;
pub mod config;
pub mod csr;
pub mod decimal;
pub mod egs;
pub mod invoice;

use thiserror::Error;

pub use api::ZatcaError;
pub use config::EnvironmentParseError;
pub use csr::CsrError;
pub use decimal::DecimalError;
pub use egs::{EgsError, StateError};
pub use invoice::sign::SigningError;
pub use invoice::xml::InvoiceXmlError;
pub use invoice::{InvoiceError, QrCodeError, ValidationError};

/// Any error this crate returns, for callers that do not care which step failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Invoice(#[from] InvoiceError),
    #[error(transparent)]
    Decimal(#[from] DecimalError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Qr(#[from] QrCodeError),
    #[error(transparent)]
    Xml(#[from] InvoiceXmlError),
    #[error(transparent)]
    Api(#[from] ZatcaError),
    #[error(transparent)]
    Csr(#[from] CsrError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Egs(#[from] EgsError),
    #[error(transparent)]
    EnvironmentParse(#[from] EnvironmentParseError),
}
