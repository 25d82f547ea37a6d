//! PgStore against a live Postgres.
//!
//! Skips (passes trivially) when LWD_DATABASE_URL is unset.
//!
//! Run:
//!   LWD_DATABASE_URL=postgres://... cargo test -p lwd-db --test scenario_pg_store

use chrono::{Duration, NaiveDate, Utc};
use lwd_db::{PgStore, ENV_DB_URL};
use lwd_schemas::{
    CaptureRecord, Grams, LorrySession, SessionStatus, TareEntry, ToleranceStatus, WeightBasis,
};
use lwd_session::SessionStore;
use uuid::Uuid;

async fn store_or_skip() -> Option<PgStore> {
    if std::env::var(ENV_DB_URL).is_err() {
        eprintln!("SKIP: {ENV_DB_URL} not set");
        return None;
    }
    let pool = lwd_db::connect_from_env().await.expect("db pool");
    lwd_db::migrate(&pool).await.expect("migrate");
    sqlx::query("delete from capture_records")
        .execute(&pool)
        .await
        .expect("clear captures");
    sqlx::query("delete from lorry_sessions")
        .execute(&pool)
        .await
        .expect("clear sessions");
    Some(PgStore::new(pool))
}

fn session(lorry: &str, status: SessionStatus, offset_secs: i64) -> LorrySession {
    LorrySession {
        id: Uuid::new_v4(),
        lorry_number: lorry.to_string(),
        line: "L1".to_string(),
        line_manager: "shift-a".to_string(),
        tare_weight: Grams::new(150),
        status,
        total_bags: 0,
        created_at: Utc::now() + Duration::seconds(offset_secs),
        activated_at: None,
        completed_at: None,
    }
}

fn capture(session_id: Uuid, tag: &str) -> CaptureRecord {
    CaptureRecord {
        id: Uuid::new_v4(),
        session_id,
        tag_id: tag.to_string(),
        controller_weight: Some(Grams::new(12_000)),
        scale_weight: None,
        final_weight: Grams::new(12_000),
        tare_weight: Grams::new(150),
        net_weight: Grams::new(11_850),
        weight_source: WeightBasis::Controller,
        tolerance_status: ToleranceStatus::Good,
        weight_difference: Grams::ZERO,
        needs_review: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn sessions_round_trip_in_queue_order() {
    let Some(store) = store_or_skip().await else {
        return;
    };

    let b = session("B", SessionStatus::Waiting, 5);
    let a = session("A", SessionStatus::Waiting, 0);
    store.insert_session(&b).await.unwrap();
    store.insert_session(&a).await.unwrap();

    let listed: Vec<String> = store
        .list_sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.lorry_number)
        .collect();
    assert_eq!(listed, vec!["A", "B"]);

    let mut updated = a.clone();
    updated.status = SessionStatus::Active;
    updated.total_bags = 2;
    assert!(store.update_session(&updated).await.unwrap());
    let active = store.find_active().await.unwrap().unwrap();
    assert_eq!(active.id, a.id);
    assert_eq!(active.total_bags, 2);
}

#[tokio::test]
async fn database_rejects_second_active_session() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    store
        .insert_session(&session("A", SessionStatus::Active, 0))
        .await
        .unwrap();
    assert!(store
        .insert_session(&session("B", SessionStatus::Active, 1))
        .await
        .is_err());
}

#[tokio::test]
async fn append_capture_bumps_bags_in_the_same_write() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let mut s = session("A", SessionStatus::Active, 0);
    store.insert_session(&s).await.unwrap();

    for (n, tag) in ["T-1", "T-2"].into_iter().enumerate() {
        s.total_bags = n as u32 + 1;
        assert!(store.append_capture(&s, &capture(s.id, tag)).await.unwrap());
    }
    assert_eq!(store.get_session(s.id).await.unwrap().unwrap().total_bags, 2);
    assert_eq!(store.list_captures(s.id).await.unwrap().len(), 2);

    // Missing session row: nothing is written.
    let ghost = session("G", SessionStatus::Waiting, 1);
    assert!(!store.append_capture(&ghost, &capture(ghost.id, "T-9")).await.unwrap());
    assert!(store.list_captures(ghost.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn captures_survive_session_removal_unless_purged() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let mut kept = session("A", SessionStatus::Active, 0);
    store.insert_session(&kept).await.unwrap();
    kept.total_bags = 1;
    store.append_capture(&kept, &capture(kept.id, "T-1")).await.unwrap();

    assert_eq!(store.remove_session(kept.id, false).await.unwrap(), Some(0));
    assert_eq!(store.list_captures(kept.id).await.unwrap().len(), 1);
    assert_eq!(store.remove_session(kept.id, true).await.unwrap(), None);
    assert_eq!(
        store.list_captures(kept.id).await.unwrap().len(),
        1,
        "a failed removal purges nothing"
    );

    let mut purged = session("B", SessionStatus::Active, 1);
    store.insert_session(&purged).await.unwrap();
    purged.total_bags = 1;
    store.append_capture(&purged, &capture(purged.id, "T-2")).await.unwrap();
    assert_eq!(store.remove_session(purged.id, true).await.unwrap(), Some(1));
    assert!(store.list_captures(purged.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn tare_upserts_by_day() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let day = NaiveDate::from_ymd_opt(2031, 1, 15).unwrap();
    for grams in [100, 175] {
        store
            .put_tare(&TareEntry {
                day,
                tare_weight: Grams::new(grams),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }
    let got = store.get_tare(day).await.unwrap().unwrap();
    assert_eq!(got.tare_weight, Grams::new(175));
}
