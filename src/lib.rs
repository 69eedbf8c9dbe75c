//! SEPA Direct Debit mandates: IBAN and BIC validation, mandate references,
//! the mandate lifecycle, creation with a single-flight guard, debounced
//! status display and periodic reconciliation against member bank details.

pub mod authority;
pub mod bank;
pub mod config;
pub mod error;
pub mod history;
pub mod iban;
pub mod lifecycle;
pub mod mandate;
pub mod reconcile;
pub mod reference;
pub mod sync;
pub mod utils;
pub mod workflow;

pub use authority::{LocalAuthority, MandateStatusView, PaymentMethod};
pub use error::{DraftError, IbanError, MandateError};
pub use iban::{ValidIban, validate_iban};
pub use lifecycle::{Activation, MandateIndicator, MandateLifecycle};
pub use mandate::{Mandate, MandateDraft, MandateStatus, MandateType, Purpose};
pub use reconcile::{MemberAccount, ReconciliationReport, reconcile};
pub use sync::StatusSynchronizer;
pub use workflow::{Creation, MandateFields, MandateWorkflow};
