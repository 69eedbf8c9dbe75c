//! Walks a member through validation, two mandate creations, the status
//! display and a reconciliation run. Run with `RUST_LOG=debug` to see the
//! skipped and stale events.

use sepa_mandate::{
    LocalAuthority, MandateFields, MandateWorkflow, PaymentMethod, StatusSynchronizer,
    authority::MemberRegistry, bank, config::MandateConfig, iban, reconcile,
    reconcile::MemberAccount, reference::MemberIdentity, workflow::Creation,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sepa_mandate=info".parse()?))
        .init();

    let mut config = MandateConfig::load(Some(Path::new("Mandates.toml")))?;
    // keep the demo database out of the working directory
    let scratch = tempfile::tempdir()?;
    config.db_path = scratch.path().join("mandates.db");

    for raw in ["NL91 ABNA 0417 1643 00", "NL91ABNA0417164301", "NL91ABNA041716430"] {
        match iban::validate_iban(raw) {
            Ok(valid) => println!(
                "{raw}: valid, {} ({})",
                valid.formatted(),
                bank::bank_name(&valid).unwrap_or("unknown bank")
            ),
            Err(e) => println!("{raw}: {e}"),
        }
    }

    let authority = Arc::new(LocalAuthority::open(&config)?);
    let members = MemberRegistry::new();
    members.insert(MemberIdentity {
        record_name: "Assoc-Member-2024-00042".into(),
        member_id: Some("42".into()),
        full_name: "Jan Jansen".into(),
    });

    let workflow =
        MandateWorkflow::new(authority.clone(), Arc::new(members.clone())).with_config(&config);

    for raw in ["NL91ABNA0417164300", "NL20INGB0001234567"] {
        let fields = MandateFields::new(raw, "J. Jansen");
        if let Creation::Created(created) = workflow.create_mandate("42", &fields).await? {
            let mandate = created.mandate();
            println!(
                "created {} for {} ({}), replacing {:?}",
                mandate.mandate_id(),
                mandate.formatted_iban(),
                mandate.bic().unwrap_or("no BIC"),
                mandate.replaces()
            );
        }
    }

    let sync = StatusSynchronizer::new(authority.clone(), config.debounce());
    let mut display = sync.subscribe();

    sync.check_status("42", "NL20 INGB 0001 2345 67", PaymentMethod::SepaDirectDebit);
    display.changed().await?;
    match &*display.borrow() {
        Some(view) => println!("current mandate: {} ({})", view.mandate_id, view.status),
        None => println!("no mandate for this IBAN"),
    }

    let today = chrono::Utc::now().date_naive();
    let indicator = authority
        .lifecycle()
        .indicator("42", today, config.expiry_warning_days)?;
    println!(
        "active mandate: {}, expiring soon: {}",
        indicator.has_active_mandate, indicator.expiring_soon
    );

    // the member store now holds a different account
    let accounts = [MemberAccount {
        member_id: "42".into(),
        payment_method: PaymentMethod::SepaDirectDebit,
        iban: "NL44RABO0123456789".into(),
        account_holder_name: Some("J Jansen".into()),
    }];
    let report = reconcile(authority.lifecycle(), &accounts, "nightly-check");
    println!(
        "reconciliation: {} corrected, review needed: {}",
        report.corrections.len(),
        report.needs_review()
    );

    for mandate in authority.lifecycle().mandates_for_member("42")? {
        println!("{}:", mandate.mandate_id());
        for line in authority.lifecycle().history(mandate.mandate_id())?.timeline() {
            println!("  {line}");
        }
    }

    Ok(())
}
