//! Core mandate record, its status machine and the draft builder
use super::bank;
use super::error::{DraftError, MandateError};
use super::iban;
use super::reference;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::fmt;

// SEPA debtor name limit
pub const MAX_HOLDER_NAME_LEN: usize = 70;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MandateType {
    #[n(0)]
    OneOff,
    #[n(1)]
    Recurring,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MandateStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingActivation,
    #[n(2)]
    Active,
    #[n(3)]
    Replaced,
    #[n(4)]
    Cancelled,
    #[n(5)]
    Expired,
}

impl MandateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Replaced | Self::Cancelled | Self::Expired)
    }

    /// Edges of the lifecycle:
    /// `Draft -> PendingActivation -> Active -> {Replaced, Cancelled, Expired}`
    pub fn can_transition_to(&self, next: MandateStatus) -> bool {
        use MandateStatus::*;
        matches!(
            (self, next),
            (Draft, PendingActivation)
                | (PendingActivation, Active)
                | (Active, Replaced)
                | (Active, Cancelled)
                | (Active, Expired)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::PendingActivation => "Pending Activation",
            Self::Active => "Active",
            Self::Replaced => "Replaced",
            Self::Cancelled => "Cancelled",
            Self::Expired => "Expired",
        }
    }
}

impl fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a mandate authorises debits for. The two purposes are independent:
/// a donations-only mandate never conflicts with a memberships-only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Purpose {
    Memberships,
    Donations,
}

impl Purpose {
    pub const ALL: [Purpose; 2] = [Purpose::Memberships, Purpose::Donations];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memberships => "memberships",
            Self::Donations => "donations",
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap_or_default()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

/// A calendar day, encoded as days since the common era.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(value: NaiveDate) -> Self {
        CalendarDate(value)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An authorisation to debit one account, for memberships, donations or both.
///
/// Fields are read-only outside the crate: the mandate id never changes after
/// drafting, and status plus replacement links are written only by
/// [`crate::lifecycle::MandateLifecycle`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Mandate {
    #[n(0)]
    pub(crate) mandate_id: String,
    #[n(1)]
    pub(crate) member_id: String,
    #[n(2)]
    pub(crate) iban: String, // electronic form, no spaces
    #[n(3)]
    pub(crate) bic: Option<String>,
    #[n(4)]
    pub(crate) account_holder_name: String,
    #[n(5)]
    pub(crate) mandate_type: MandateType,
    #[n(6)]
    pub(crate) sign_date: CalendarDate,
    #[n(7)]
    pub(crate) status: MandateStatus,
    #[n(8)]
    pub(crate) used_for_memberships: bool,
    #[n(9)]
    pub(crate) used_for_donations: bool,
    #[n(10)]
    pub(crate) replaces: Vec<String>,
    #[n(11)]
    pub(crate) replaced_by: Option<String>,
    #[n(12)]
    pub(crate) notes: Option<String>,
    #[n(13)]
    pub(crate) expiry_date: Option<CalendarDate>,
    #[n(14)]
    pub(crate) created_at: TimeStamp<Utc>,
}

impl Mandate {
    pub fn mandate_id(&self) -> &str {
        &self.mandate_id
    }
    pub fn member_id(&self) -> &str {
        &self.member_id
    }
    pub fn iban(&self) -> &str {
        &self.iban
    }
    pub fn formatted_iban(&self) -> String {
        iban::format_iban(&self.iban)
    }
    pub fn bic(&self) -> Option<&str> {
        self.bic.as_deref()
    }
    pub fn account_holder_name(&self) -> &str {
        &self.account_holder_name
    }
    pub fn mandate_type(&self) -> MandateType {
        self.mandate_type
    }
    pub fn sign_date(&self) -> NaiveDate {
        self.sign_date.date()
    }
    pub fn status(&self) -> MandateStatus {
        self.status
    }
    pub fn used_for_memberships(&self) -> bool {
        self.used_for_memberships
    }
    pub fn used_for_donations(&self) -> bool {
        self.used_for_donations
    }
    /// Mandates this one took over from. Usually zero or one entry; two when a
    /// mandate for both purposes consolidates two single-purpose mandates.
    pub fn replaces(&self) -> &[String] {
        &self.replaces
    }
    pub fn replaced_by(&self) -> Option<&str> {
        self.replaced_by.as_deref()
    }
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date.map(|d| d.date())
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at.to_datetime_utc()
    }

    pub fn purposes(&self) -> Vec<Purpose> {
        Purpose::ALL
            .into_iter()
            .filter(|p| self.is_used_for(*p))
            .collect()
    }

    pub fn is_used_for(&self, purpose: Purpose) -> bool {
        match purpose {
            Purpose::Memberships => self.used_for_memberships,
            Purpose::Donations => self.used_for_donations,
        }
    }

    /// True when both mandates authorise at least one common purpose.
    pub fn overlaps(&self, other: &Mandate) -> bool {
        Purpose::ALL
            .iter()
            .any(|p| self.is_used_for(*p) && other.is_used_for(*p))
    }

    pub fn is_active(&self) -> bool {
        self.status == MandateStatus::Active
    }

    /// Active and lapsing within `warning_days` after `today`. A mandate
    /// expiring today is due, not expiring soon.
    pub fn expires_within(&self, today: NaiveDate, warning_days: u32) -> bool {
        self.is_active()
            && self.expiry_date().is_some_and(|expiry| {
                let left = (expiry - today).num_days();
                left > 0 && left <= i64::from(warning_days)
            })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, MandateError> {
        Ok(minicbor::to_vec(self)?)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MandateError> {
        Ok(minicbor::decode(bytes)?)
    }
}

/// Candidate fields collected before a mandate exists.
///
/// Built fluently and turned into a [`Mandate`] in `Draft` status by
/// [`MandateDraft::validate_and_finalise`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MandateDraft {
    member_id: Option<String>,
    mandate_id: Option<String>,
    iban: Option<String>,
    bic: Option<String>,
    account_holder_name: Option<String>,
    mandate_type: Option<MandateType>,
    sign_date: Option<NaiveDate>,
    used_for_memberships: bool,
    used_for_donations: bool,
    notes: Option<String>,
}

impl MandateDraft {
    /// New recurring draft for membership dues, the common case.
    pub fn new(member_id: &str) -> Self {
        Self {
            member_id: Some(member_id.to_string()),
            mandate_type: Some(MandateType::Recurring),
            used_for_memberships: true,
            ..Self::default()
        }
    }
    pub fn set_reference(mut self, mandate_id: &str) -> Self {
        self.mandate_id = Some(mandate_id.to_string());
        self
    }
    pub fn set_iban(mut self, iban: &str) -> Self {
        self.iban = Some(iban.to_string());
        self
    }
    pub fn set_bic(mut self, bic: Option<&str>) -> Self {
        self.bic = bic.map(str::to_string);
        self
    }
    pub fn set_account_holder_name(mut self, name: &str) -> Self {
        self.account_holder_name = Some(name.to_string());
        self
    }
    pub fn set_mandate_type(mut self, mandate_type: MandateType) -> Self {
        self.mandate_type = Some(mandate_type);
        self
    }
    pub fn set_sign_date(mut self, date: NaiveDate) -> Self {
        self.sign_date = Some(date);
        self
    }
    pub fn set_purposes(mut self, memberships: bool, donations: bool) -> Self {
        self.used_for_memberships = memberships;
        self.used_for_donations = donations;
        self
    }
    pub fn set_notes(mut self, notes: Option<&str>) -> Self {
        self.notes = notes.map(str::to_string);
        self
    }

    pub fn reference(&self) -> Option<&str> {
        self.mandate_id.as_deref()
    }

    /// Every local check except the reference, which is usually generated
    /// only once these pass.
    pub fn check_fields(&self, today: NaiveDate) -> Result<(), MandateError> {
        self.checked(today).map(|_| ())
    }

    /// Runs every local check and produces the record in `Draft` status.
    /// `today` bounds the sign date and defaults it when unset.
    pub fn validate_and_finalise(&self, today: NaiveDate) -> Result<Mandate, MandateError> {
        let fields = self.checked(today)?;

        let mandate_id =
            non_blank(&self.mandate_id).ok_or(DraftError::MissingField("mandate reference"))?;
        if !reference::is_valid_reference(mandate_id) {
            return Err(DraftError::InvalidReference(mandate_id.to_string()).into());
        }

        Ok(Mandate {
            mandate_id: mandate_id.to_string(),
            member_id: fields.member_id,
            iban: fields.iban,
            bic: fields.bic,
            account_holder_name: fields.account_holder_name,
            mandate_type: self.mandate_type.unwrap_or(MandateType::Recurring),
            sign_date: fields.sign_date.into(),
            status: MandateStatus::Draft,
            used_for_memberships: self.used_for_memberships,
            used_for_donations: self.used_for_donations,
            replaces: vec![],
            replaced_by: None,
            notes: self.notes.clone().filter(|n| !n.trim().is_empty()),
            expiry_date: None,
            created_at: TimeStamp::new(),
        })
    }

    fn checked(&self, today: NaiveDate) -> Result<CheckedFields, MandateError> {
        let member_id = non_blank(&self.member_id).ok_or(DraftError::MissingField("member"))?;

        let raw_iban = non_blank(&self.iban).ok_or(DraftError::MissingField("IBAN"))?;
        let valid_iban = iban::validate_iban(raw_iban)?;

        let bic = match non_blank(&self.bic) {
            Some(raw) => Some(
                bank::validate_bic(raw).ok_or_else(|| DraftError::InvalidBic(raw.to_string()))?,
            ),
            None => None,
        };

        let holder = non_blank(&self.account_holder_name)
            .ok_or(DraftError::MissingField("account holder name"))?;
        if holder.chars().count() > MAX_HOLDER_NAME_LEN {
            return Err(DraftError::HolderNameTooLong {
                max: MAX_HOLDER_NAME_LEN,
            }
            .into());
        }

        if !self.used_for_memberships && !self.used_for_donations {
            return Err(DraftError::NoPurpose.into());
        }

        let sign_date = self.sign_date.unwrap_or(today);
        if sign_date > today {
            return Err(DraftError::SignDateInFuture { sign_date, today }.into());
        }

        Ok(CheckedFields {
            member_id: member_id.to_string(),
            iban: valid_iban.electronic().to_string(),
            bic,
            account_holder_name: holder.to_string(),
            sign_date,
        })
    }
}

struct CheckedFields {
    member_id: String,
    iban: String,
    bic: Option<String>,
    account_holder_name: String,
    sign_date: NaiveDate,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for CalendarDate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for CalendarDate {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(CalendarDate)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day count to a calendar date",
            ))
    }
}
