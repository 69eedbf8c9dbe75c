//! Mandate creation for one editing context
//!
//! A [`MandateWorkflow`] turns form input into an activated mandate. At most
//! one creation runs per workflow: a second call while one is pending returns
//! [`Creation::AlreadyInFlight`] without touching any collaborator. The guard
//! is released on every exit path, errors included.
use super::authority::{self, BankDirectory, MandateAuthority, MemberDirectory, PaymentMethod};
use super::bank::BankInfo;
use super::config::MandateConfig;
use super::error::MandateError;
use super::iban;
use super::lifecycle::Activation;
use super::mandate::{Mandate, MandateDraft, MandateType};
use super::reference;
use super::utils;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the member entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MandateFields {
    pub iban: String,
    pub bic: Option<String>,
    pub account_holder_name: String,
    pub mandate_type: MandateType,
    pub sign_date: Option<NaiveDate>,
    pub used_for_memberships: bool,
    pub used_for_donations: bool,
    pub notes: Option<String>,
    /// Switch the member's payment method to SEPA Direct Debit afterwards.
    pub update_payment_method: bool,
}

impl MandateFields {
    pub fn new(iban: &str, account_holder_name: &str) -> Self {
        Self {
            iban: iban.to_string(),
            bic: None,
            account_holder_name: account_holder_name.to_string(),
            mandate_type: MandateType::Recurring,
            sign_date: None,
            used_for_memberships: true,
            used_for_donations: false,
            notes: None,
            update_payment_method: true,
        }
    }

    fn to_draft(&self, member_id: &str) -> MandateDraft {
        let draft = MandateDraft::new(member_id)
            .set_iban(&self.iban)
            .set_bic(self.bic.as_deref())
            .set_account_holder_name(&self.account_holder_name)
            .set_mandate_type(self.mandate_type)
            .set_purposes(self.used_for_memberships, self.used_for_donations)
            .set_notes(self.notes.as_deref());

        match self.sign_date {
            Some(sign_date) => draft.set_sign_date(sign_date),
            None => draft,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creation {
    Created(CreatedMandate),
    /// Another creation was already running in this context; nothing was sent.
    AlreadyInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMandate {
    pub activation: Activation,
    pub bank: Option<BankInfo>,
    /// False when the payment method write failed. The mandate stays active.
    pub payment_method_updated: bool,
}

impl CreatedMandate {
    pub fn mandate(&self) -> &Mandate {
        &self.activation.activated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlightState {
    Idle,
    InFlight,
}

struct FlightGuard<'a> {
    state: &'a Mutex<FlightState>,
}

impl<'a> FlightGuard<'a> {
    fn acquire(state: &'a Mutex<FlightState>) -> Option<Self> {
        let mut current = state.lock();
        match *current {
            FlightState::InFlight => None,
            FlightState::Idle => {
                *current = FlightState::InFlight;
                Some(Self { state })
            }
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = FlightState::Idle;
    }
}

pub struct MandateWorkflow {
    context_id: String,
    authority: Arc<dyn MandateAuthority>,
    members: Arc<dyn MemberDirectory>,
    banks: Option<Arc<dyn BankDirectory>>,
    reference_retries: u32,
    record_name_prefix: String,
    state: Mutex<FlightState>,
}

impl MandateWorkflow {
    pub fn new(authority: Arc<dyn MandateAuthority>, members: Arc<dyn MemberDirectory>) -> Self {
        let defaults = MandateConfig::default();

        Self {
            context_id: utils::new_context_id(),
            authority,
            members,
            banks: None,
            reference_retries: defaults.reference_retries,
            record_name_prefix: defaults.record_name_prefix,
            state: Mutex::new(FlightState::Idle),
        }
    }

    pub fn with_bank_directory(mut self, banks: Arc<dyn BankDirectory>) -> Self {
        self.banks = Some(banks);
        self
    }

    pub fn with_config(mut self, config: &MandateConfig) -> Self {
        self.reference_retries = config.reference_retries;
        self.record_name_prefix = config.record_name_prefix.clone();
        self
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn is_in_flight(&self) -> bool {
        *self.state.lock() == FlightState::InFlight
    }

    pub async fn create_mandate(
        &self,
        member_id: &str,
        fields: &MandateFields,
    ) -> Result<Creation, MandateError> {
        let Some(_guard) = FlightGuard::acquire(&self.state) else {
            debug!(context = %self.context_id, member_id, "mandate creation already in flight");
            return Ok(Creation::AlreadyInFlight);
        };

        let today = Utc::now().date_naive();
        let mut draft = fields.to_draft(member_id);
        draft.check_fields(today)?;

        let valid_iban = iban::validate_iban(&fields.iban)?;
        let bank = authority::resolve_bank(&valid_iban, self.banks.as_deref()).await;
        // a blank BIC counts as not given
        if fields.bic.as_deref().is_none_or(|bic| bic.trim().is_empty()) {
            let derived = bank.as_ref().and_then(|info| info.bic.as_deref());
            draft = draft.set_bic(derived);
        }

        let identity = self.members.member_identity(member_id).await?;

        let mut retries = 0;
        let activation = loop {
            let reference =
                reference::generate_reference(&identity, Utc::now(), &self.record_name_prefix);
            let mandate = draft
                .clone()
                .set_reference(&reference)
                .validate_and_finalise(today)?;

            match self.submit(mandate).await {
                Err(MandateError::DuplicateMandateId(taken))
                    if retries < self.reference_retries =>
                {
                    retries += 1;
                    debug!(context = %self.context_id, reference = %taken, "reference taken, regenerating");
                }
                result => break result?,
            }
        };

        info!(
            context = %self.context_id,
            member_id,
            mandate_id = activation.activated.mandate_id(),
            replaced = activation.replaced.len(),
            "mandate created"
        );

        let payment_method_updated = fields.update_payment_method
            && match self
                .members
                .set_payment_method(member_id, PaymentMethod::SepaDirectDebit)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    warn!(context = %self.context_id, member_id, error = %e, "payment method not updated");
                    false
                }
            };

        Ok(Creation::Created(CreatedMandate {
            activation,
            bank,
            payment_method_updated,
        }))
    }

    async fn submit(&self, mandate: Mandate) -> Result<Activation, MandateError> {
        let check = self.authority.validate(&mandate).await?;
        self.authority.activate(mandate, check.replaces()).await
    }
}
