//! Async tests for the mandate status synchronizer
//!
//! A scripted lookup records every query and answers after a per-IBAN
//! delay. Time is paused and advances only while the test sleeps, so the
//! debounce window and response ordering are deterministic.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use sepa_mandate::{
    authority::{LocalAuthority, MandateLookup, MandateStatusView, PaymentMethod},
    error::MandateError,
    iban::format_iban,
    lifecycle::MandateLifecycle,
    mandate::{MandateDraft, MandateStatus},
    sync::StatusSynchronizer,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;

const IBAN_A: &str = "NL91ABNA0417164300";
const IBAN_B: &str = "NL20INGB0001234567";
const DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Default)]
struct ScriptedLookup {
    delays: HashMap<String, Duration>,
    queries: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl ScriptedLookup {
    fn with_delay(mut self, iban: &str, delay: Duration) -> Self {
        self.delays.insert(iban.to_string(), delay);
        self
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

fn view(iban: &str) -> MandateStatusView {
    MandateStatusView {
        mandate_id: format!("M-1-{}", &iban[iban.len() - 4..]),
        status: MandateStatus::Active,
        formatted_iban: format_iban(iban),
        sign_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        expiry_date: None,
    }
}

#[async_trait]
impl MandateLookup for ScriptedLookup {
    async fn current_mandate(
        &self,
        _member_id: &str,
        iban: &str,
        _payment_method: PaymentMethod,
    ) -> Result<Option<MandateStatusView>, MandateError> {
        self.queries.lock().push(iban.to_string());
        sleep(self.delays.get(iban).copied().unwrap_or_default()).await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(MandateError::NetworkOrService("lookup timed out".into()));
        }
        Ok(Some(view(iban)))
    }
}

fn synchronizer(lookup: &Arc<ScriptedLookup>) -> StatusSynchronizer {
    StatusSynchronizer::new(lookup.clone(), DEBOUNCE)
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_query_once() {
    let lookup = Arc::new(ScriptedLookup::default());
    let sync = synchronizer(&lookup);

    sync.check_status("1", IBAN_A, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(100)).await;
    sync.check_status("1", IBAN_B, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_secs(1)).await;

    assert_eq!(lookup.queries(), vec![IBAN_B.to_string()]);
    assert_eq!(sync.current(), Some(view(IBAN_B)));
}

#[tokio::test(start_paused = true)]
async fn late_response_for_old_key_is_discarded() {
    let lookup = Arc::new(ScriptedLookup::default().with_delay(IBAN_A, Duration::from_secs(1)));
    let sync = synchronizer(&lookup);

    sync.check_status("1", IBAN_A, PaymentMethod::SepaDirectDebit);
    // past the debounce window, the query for A is in flight
    sleep(Duration::from_millis(400)).await;
    sync.check_status("1", IBAN_B, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_secs(2)).await;

    assert_eq!(lookup.queries(), vec![IBAN_A.to_string(), IBAN_B.to_string()]);
    assert_eq!(sync.current(), Some(view(IBAN_B)));
}

#[tokio::test(start_paused = true)]
async fn unchanged_key_is_a_no_op() {
    let lookup = Arc::new(ScriptedLookup::default());
    let sync = synchronizer(&lookup);

    sync.check_status("1", IBAN_A, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(400)).await;
    sync.check_status("1", "nl91 abna 0417 1643 00", PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(400)).await;

    assert_eq!(lookup.queries().len(), 1);

    // a different payment method is a different key
    sync.check_status("1", IBAN_A, PaymentMethod::BankTransfer);
    sleep(Duration::from_millis(400)).await;

    assert_eq!(lookup.queries().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn clearing_the_iban_clears_at_once() {
    let lookup = Arc::new(ScriptedLookup::default());
    let sync = synchronizer(&lookup);
    let mut rx = sync.subscribe();

    sync.check_status("1", IBAN_A, PaymentMethod::SepaDirectDebit);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some(view(IBAN_A)));

    sync.check_status("1", "", PaymentMethod::SepaDirectDebit);
    assert_eq!(sync.current(), None);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(lookup.queries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cleared_iban_drops_the_pending_answer() {
    let lookup = Arc::new(ScriptedLookup::default().with_delay(IBAN_A, Duration::from_secs(1)));
    let sync = synchronizer(&lookup);

    sync.check_status("1", IBAN_A, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(400)).await;
    sync.check_status("1", "  ", PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_secs(2)).await;

    assert_eq!(lookup.queries().len(), 1);
    assert_eq!(sync.current(), None);
}

#[tokio::test(start_paused = true)]
async fn failed_lookup_keeps_the_display() {
    let lookup = Arc::new(ScriptedLookup::default());
    let sync = synchronizer(&lookup);

    sync.check_status("1", IBAN_A, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(400)).await;

    lookup.failing.store(true, Ordering::SeqCst);
    sync.check_status("1", IBAN_B, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(400)).await;

    assert_eq!(lookup.queries().len(), 2);
    assert_eq!(sync.current(), Some(view(IBAN_A)));
}

#[tokio::test(start_paused = true)]
async fn shows_the_active_mandate_from_the_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = sled::open(dir.path().join("sync.db"))?;
    let lifecycle = MandateLifecycle::new(Arc::new(db))?;

    let draft = MandateDraft::new("1")
        .set_reference("M-1-20240101-001")
        .set_iban(IBAN_A)
        .set_account_holder_name("A. de Vries")
        .validate_and_finalise(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())?;
    lifecycle.activate_draft(draft, None, "test")?;

    let sync = StatusSynchronizer::new(Arc::new(LocalAuthority::new(lifecycle)), DEBOUNCE);

    sync.check_status("1", IBAN_A, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(400)).await;
    let shown = sync.current().unwrap();
    assert_eq!(shown.mandate_id, "M-1-20240101-001");
    assert_eq!(shown.formatted_iban, "NL91 ABNA 0417 1643 00");

    sync.check_status("1", IBAN_B, PaymentMethod::SepaDirectDebit);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(sync.current(), None);

    Ok(())
}
