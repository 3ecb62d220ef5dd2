use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;

use glowlisting_server::{
    errors::AppError,
    ledger::{fingerprint, EntitlementGate, MAX_REGENERATE_COUNT},
    models::{NewListingImage, NewUser},
    store::{LedgerStore, MemoryLedgerStore},
};

async fn seed_user(store: &dyn LedgerStore, balance: i64) -> Uuid {
    store
        .create_user(NewUser {
            name: "Casey Rowe".to_string(),
            email: format!("{}@glowlisting.test", Uuid::new_v4()),
            password_hash: "hash".to_string(),
            starting_balance: balance,
        })
        .await
        .unwrap()
        .id
}

async fn seed_image(store: &dyn LedgerStore, owner: Uuid, bytes: &[u8]) -> String {
    let print = fingerprint(bytes);
    store
        .create_image(NewListingImage {
            id: Uuid::new_v4(),
            owner_id: owner,
            fingerprint: print.clone(),
            mime: "image/jpeg".to_string(),
            size_bytes: bytes.len() as i64,
            width: 1920,
            height: 1080,
            style: None,
            room_type: Some("kitchen".to_string()),
        })
        .await
        .unwrap();
    print
}

#[tokio::test]
async fn balance_is_never_negative() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 2).await;

    for expected_after in [1, 0] {
        let (_, debit) = gate.download(user, || async { Ok(()) }).await.unwrap();
        assert_eq!(debit.balance_after, expected_after);
        assert_eq!(debit.balance_after, debit.balance_before - 1);
    }

    // Exhausted: further attempts deny without touching the balance.
    for _ in 0..3 {
        let err = gate.download(user, || async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance));
    }
    let user_row = store.find_user_by_id(user).await.unwrap().unwrap();
    assert_eq!(user_row.balance, 0);
}

#[tokio::test]
async fn denied_download_records_no_usage_event() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 0).await;

    let err = gate.download(user, || async { Ok(()) }).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance));

    let today = chrono::Utc::now().date_naive();
    let stats = store.usage_stats(today, today).await.unwrap();
    assert_eq!(stats.total_events, 0);
}

#[tokio::test]
async fn every_debit_appends_exactly_one_download_event() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 3).await;

    for _ in 0..3 {
        gate.download(user, || async { Ok(()) }).await.unwrap();
    }

    let today = chrono::Utc::now().date_naive();
    let stats = store.usage_stats(today, today).await.unwrap();
    assert_eq!(stats.downloads, 3);
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.unique_users, 1);
}

#[tokio::test]
async fn regenerate_cap_allows_exactly_three() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 5).await;
    let print = seed_image(store.as_ref(), user, b"dusk exterior shot").await;

    for expected_remaining in [2, 1, 0] {
        let (_, outcome, _) = gate
            .regenerate(user, &print, || async { Ok(()) })
            .await
            .unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, expected_remaining);
    }

    let err = gate
        .regenerate(user, &print, || async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RegenerateLimitReached));
    assert_eq!(
        store.regeneration_count(&print).await.unwrap(),
        MAX_REGENERATE_COUNT
    );
}

#[tokio::test]
async fn regeneration_is_free_of_charge() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 5).await;
    let print = seed_image(store.as_ref(), user, b"living room").await;

    let (_, _, balance) = gate
        .regenerate(user, &print, || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(balance, 5);

    let today = chrono::Utc::now().date_naive();
    let stats = store.usage_stats(today, today).await.unwrap();
    assert_eq!(stats.processes, 1);
    assert_eq!(stats.downloads, 0);
}

#[tokio::test]
async fn provider_failure_rolls_back_regeneration_slot() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 5).await;
    let print = seed_image(store.as_ref(), user, b"master bedroom").await;

    let err = gate
        .regenerate(user, &print, || async {
            Err::<(), _>(AppError::Enhancement("provider timeout".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Enhancement(_)));
    assert_eq!(store.regeneration_count(&print).await.unwrap(), 0);

    // The failed attempt did not consume one of the three slots.
    for _ in 0..3 {
        gate.regenerate(user, &print, || async { Ok(()) })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn asset_failure_rolls_back_download_debit() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 2).await;

    let err = gate
        .download(user, || async {
            Err::<(), _>(AppError::Storage("disk unplugged".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Storage(_)));

    let user_row = store.find_user_by_id(user).await.unwrap().unwrap();
    assert_eq!(user_row.balance, 2);
    let today = chrono::Utc::now().date_naive();
    assert_eq!(store.usage_stats(today, today).await.unwrap().total_events, 0);
}

#[tokio::test]
async fn concurrent_regenerations_fill_remaining_slots_exactly() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 5).await;
    let print = seed_image(store.as_ref(), user, b"back garden").await;

    // Two of three slots already used; eight racers fight over the last one.
    store.reserve_regeneration(&print, 3).await.unwrap();
    store.reserve_regeneration(&print, 3).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let gate = gate.clone();
            let print = print.clone();
            tokio::spawn(async move { gate.regenerate(user, &print, || async { Ok(()) }).await })
        })
        .collect();

    let results = join_all(tasks).await;
    let granted = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let denied = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(AppError::RegenerateLimitReached))))
        .count();

    assert_eq!(granted, 1);
    assert_eq!(denied, 7);
    assert_eq!(store.regeneration_count(&print).await.unwrap(), 3);
}

#[tokio::test]
async fn concurrent_downloads_never_overspend() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 3).await;

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.download(user, || async { Ok(()) }).await })
        })
        .collect();

    let results = join_all(tasks).await;
    let granted = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(granted, 3);
    let user_row = store.find_user_by_id(user).await.unwrap().unwrap();
    assert_eq!(user_row.balance, 0);

    let today = chrono::Utc::now().date_naive();
    assert_eq!(store.usage_stats(today, today).await.unwrap().downloads, 3);
}

#[tokio::test]
async fn generate_is_recorded_without_charging() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let user = seed_user(store.as_ref(), 5).await;

    let balance = gate.record_generate(user).await.unwrap();
    assert_eq!(balance, 5);

    let today = chrono::Utc::now().date_naive();
    let stats = store.usage_stats(today, today).await.unwrap();
    assert_eq!(stats.generates, 1);
}

#[tokio::test]
async fn unknown_user_is_rejected_by_the_gate() {
    let store = Arc::new(MemoryLedgerStore::new());
    let gate = EntitlementGate::new(store.clone());
    let ghost = Uuid::new_v4();

    assert!(matches!(
        gate.download(ghost, || async { Ok(()) }).await.unwrap_err(),
        AppError::UnknownUser
    ));
    assert!(matches!(
        gate.record_generate(ghost).await.unwrap_err(),
        AppError::UnknownUser
    ));
}

#[tokio::test]
async fn admin_grant_adjusts_balance_and_leaves_one_audit_entry() {
    let store = Arc::new(MemoryLedgerStore::new());
    let admin = seed_user(store.as_ref(), 5).await;
    let target = seed_user(store.as_ref(), 5).await;
    store.set_admin(admin, true).await.unwrap();

    let balance = store.credit(target, 50).await.unwrap();
    assert_eq!(balance, 55);

    store
        .append_audit(glowlisting_server::models::NewAuditEntry {
            admin_user_id: admin,
            action: "grant_tokens".to_string(),
            target_user_id: target,
            details: serde_json::json!({ "amount": 50, "balance_after": balance }),
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: None,
        })
        .await
        .unwrap();

    let page = store.audit_page(10, 0).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].action, "grant_tokens");
    assert_eq!(page[0].target_user_id, target);
}
