//! Debounced, stale-safe display of the mandate behind an IBAN field
//!
//! Each call to [`StatusSynchronizer::check_status`] with a new key bumps a
//! request token. A spawned task waits out the quiet period, queries only if
//! its token is still current, and publishes the answer only if the token is
//! still current when the answer arrives. Older answers are dropped.
use super::authority::{MandateLookup, MandateStatusView, PaymentMethod};
use super::iban;
use super::utils;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusKey {
    pub iban: String, // normalised
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Default)]
struct SyncState {
    last_key: Option<StatusKey>,
    token: u64,
}

pub struct StatusSynchronizer {
    context_id: String,
    lookup: Arc<dyn MandateLookup>,
    debounce: Duration,
    state: Arc<Mutex<SyncState>>,
    display: Arc<watch::Sender<Option<MandateStatusView>>>,
    runtime: Option<Handle>,
}

impl StatusSynchronizer {
    /// Lookups run on the runtime current at construction, if there is one.
    pub fn new(lookup: Arc<dyn MandateLookup>, debounce: Duration) -> Self {
        let (display, _) = watch::channel(None);

        Self {
            context_id: utils::new_context_id(),
            lookup,
            debounce,
            state: Arc::default(),
            display: Arc::new(display),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MandateStatusView>> {
        self.display.subscribe()
    }

    pub fn current(&self) -> Option<MandateStatusView> {
        self.display.borrow().clone()
    }

    /// Schedules a lookup for the member's mandate behind `iban`.
    ///
    /// An unchanged key is a no-op; an empty IBAN clears the display at once.
    /// Without a runtime to run the lookup on, the call is skipped with a
    /// warning and the key is not recorded.
    pub fn check_status(&self, member_id: &str, raw_iban: &str, payment_method: PaymentMethod) {
        let normalised = iban::normalize(raw_iban);
        let key = (!normalised.is_empty()).then(|| StatusKey {
            iban: normalised,
            payment_method,
        });

        let mut state = self.state.lock();
        if state.last_key == key {
            return;
        }

        let runtime = match (&key, self.runtime()) {
            (Some(key), None) => {
                warn!(
                    context = %self.context_id,
                    iban = %key.iban,
                    "no tokio runtime, mandate status not checked"
                );
                return;
            }
            (_, runtime) => runtime,
        };

        state.last_key = key.clone();
        state.token += 1;
        let token = state.token;

        let (Some(key), Some(runtime)) = (key, runtime) else {
            self.display.send_replace(None);
            return;
        };
        drop(state);

        let context_id = self.context_id.clone();
        let member_id = member_id.to_string();
        let lookup = self.lookup.clone();
        let state = self.state.clone();
        let display = self.display.clone();
        let debounce = self.debounce;

        runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if state.lock().token != token {
                return;
            }

            let result = lookup
                .current_mandate(&member_id, &key.iban, key.payment_method)
                .await;

            let state = state.lock();
            if state.token != token {
                debug!(context = %context_id, iban = %key.iban, "discarding stale mandate status");
                return;
            }
            match result {
                Ok(view) => {
                    display.send_replace(view);
                }
                Err(e) => {
                    warn!(context = %context_id, iban = %key.iban, error = %e, "mandate status lookup failed");
                }
            }
        });
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }
}
