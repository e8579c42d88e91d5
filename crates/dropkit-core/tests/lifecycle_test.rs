// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the session and drop lifecycle.

mod common;

use chrono::Duration;
use dropkit_core::clock::Clock;
use dropkit_core::db::DropKind;
use dropkit_core::fanout::DropEvent;
use dropkit_core::Error;
use futures::future::join_all;

use common::TestContext;

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DROPKIT_DATABASE_URL").is_err()
            && std::env::var("DROPKIT_DATABASE_URL").is_err()
        {
            eprintln!("Skipping test: TEST_DROPKIT_DATABASE_URL not set");
            return;
        }
    };
}

#[tokio::test]
async fn concurrent_session_creation_yields_distinct_codes() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let sessions = join_all((0..20).map(|_| ctx.lifecycle.create_session())).await;

    let mut codes: Vec<String> = sessions
        .into_iter()
        .map(|s| s.expect("session creation failed"))
        .map(|s| s.code)
        .collect();
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), 20, "live codes must be unique");
    assert!(codes.iter().all(|c| c.len() == 6 && c.chars().all(|ch| ch.is_ascii_digit())));
}

#[tokio::test]
async fn text_drop_is_delivered_and_listed() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let (_id, mut rx) = ctx.registry.subscribe(&session.code);

    let record = ctx
        .lifecycle
        .create_text_drop(&session.code, "Hello", DropKind::Text, false)
        .await
        .unwrap();
    assert_eq!(record.content.as_deref(), Some("Hello"));
    assert_eq!(record.kind, "text");

    match rx.recv().await {
        Some(DropEvent::NewDrop { id, kind, content, .. }) => {
            assert_eq!(id, record.id);
            assert_eq!(kind, "text");
            assert_eq!(content.as_deref(), Some("Hello"));
        }
        other => panic!("expected NEW_DROP, got {other:?}"),
    }

    let visible = ctx.lifecycle.list_visible_drops(&session.code).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, record.id);
}

#[tokio::test]
async fn text_drop_content_is_escaped() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let record = ctx
        .lifecycle
        .create_text_drop(&session.code, "<b>bold</b>", DropKind::Text, false)
        .await
        .unwrap();
    assert_eq!(record.content.as_deref(), Some("&lt;b&gt;bold&lt;/b&gt;"));
}

#[tokio::test]
async fn text_drop_validation_rejects_bad_input() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();

    let err = ctx
        .lifecycle
        .create_text_drop(&session.code, "   ", DropKind::Text, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let oversized = "x".repeat(5001);
    let err = ctx
        .lifecycle
        .create_text_drop(&session.code, &oversized, DropKind::Text, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = ctx
        .lifecycle
        .create_text_drop(&session.code, "hello", DropKind::File, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = ctx
        .lifecycle
        .create_text_drop("000000", "hello", DropKind::Text, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
}

#[tokio::test]
async fn drop_expiry_never_outlives_the_session() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();

    // A short text predicts a 2h TTL, which must clamp to the 1h session.
    let record = ctx
        .lifecycle
        .create_text_drop(&session.code, "hi", DropKind::Text, false)
        .await
        .unwrap();
    assert_eq!(record.expires_at, Some(session.expires_at));

    // A long text predicts 10 minutes and stays below the clamp.
    let long = "y".repeat(300);
    let record = ctx
        .lifecycle
        .create_text_drop(&session.code, &long, DropKind::Text, false)
        .await
        .unwrap();
    assert_eq!(
        record.expires_at,
        Some(ctx.clock.now() + Duration::minutes(10))
    );
}

#[tokio::test]
async fn burn_after_read_has_exactly_one_winner() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let record = ctx
        .lifecycle
        .create_text_drop(&session.code, "secret", DropKind::Text, true)
        .await
        .unwrap();

    let (_id, mut rx) = ctx.registry.subscribe(&session.code);

    let outcomes = join_all(
        (0..8).map(|_| ctx.lifecycle.consume_burn_after_read(record.id, &session.code)),
    )
    .await;

    let wins = outcomes
        .into_iter()
        .map(|r| r.expect("consume call failed"))
        .filter(|&won| won)
        .count();
    assert_eq!(wins, 1, "exactly one concurrent consumer may win");

    // Only the winner publishes; a single DELETE_DROP arrives.
    match rx.recv().await {
        Some(DropEvent::DeleteDrop { id }) => assert_eq!(id, record.id),
        other => panic!("expected DELETE_DROP, got {other:?}"),
    }
    assert!(rx.try_recv().is_err(), "no duplicate events for one consume");

    let visible = ctx.lifecycle.list_visible_drops(&session.code).await.unwrap();
    assert!(visible.iter().all(|d| d.id != record.id));
}

#[tokio::test]
async fn consuming_a_plain_drop_is_a_no_op() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let record = ctx
        .lifecycle
        .create_text_drop(&session.code, "keep me", DropKind::Text, false)
        .await
        .unwrap();

    let consumed = ctx
        .lifecycle
        .consume_burn_after_read(record.id, &session.code)
        .await
        .unwrap();
    assert!(!consumed);

    let visible = ctx.lifecycle.list_visible_drops(&session.code).await.unwrap();
    assert_eq!(visible.len(), 1);
}

#[tokio::test]
async fn consuming_an_unknown_drop_is_not_found() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let err = ctx
        .lifecycle
        .consume_burn_after_read(999_999_999, &session.code)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn one_time_download_has_exactly_one_winner() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let record = ctx
        .lifecycle
        .create_file_drop(&session.code, "notes.txt", Some("text/plain"), b"file body")
        .await
        .unwrap();
    let token = record.download_token.clone().expect("file drops carry a token");

    let outcomes = join_all((0..8).map(|_| ctx.lifecycle.consume_one_time_download(&token))).await;

    let mut wins = 0;
    for outcome in outcomes {
        match outcome {
            Ok((claimed, file_ref)) => {
                wins += 1;
                assert_eq!(claimed.id, record.id);
                let bytes = ctx.blobs.get(&file_ref).await.unwrap().expect("blob present");
                assert_eq!(bytes, b"file body");
            }
            Err(Error::Gone(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1, "exactly one download claim may win");

    // Every later attempt observes the claimed state.
    let err = ctx.lifecycle.consume_one_time_download(&token).await.unwrap_err();
    assert!(matches!(err, Error::Gone(_)));
}

#[tokio::test]
async fn file_drops_keep_the_original_filename() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let record = ctx
        .lifecycle
        .create_file_drop(
            &session.code,
            "../../tmp/report.pdf",
            Some("application/pdf"),
            b"%PDF-1.4",
        )
        .await
        .unwrap();

    // Directory components are dropped; the storage reference stays opaque.
    assert_eq!(record.file_name.as_deref(), Some("report.pdf"));
    let file_ref = record.file_ref.as_deref().expect("file drops carry a ref");
    assert_ne!(file_ref, "report.pdf");
    assert!(file_ref.ends_with(".pdf"));

    let token = record.download_token.expect("file drops carry a token");
    let (claimed, _) = ctx.lifecycle.consume_one_time_download(&token).await.unwrap();
    assert_eq!(claimed.file_name.as_deref(), Some("report.pdf"));
}

#[tokio::test]
async fn unknown_download_token_is_not_found() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let err = ctx
        .lifecycle
        .consume_one_time_download("feedfacefeedfacefeedfacefeedface")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn file_drop_validation_rejects_bad_uploads() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();

    let err = ctx
        .lifecycle
        .create_file_drop(&session.code, "invoice.exe.txt", Some("text/plain"), b"mz")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = ctx
        .lifecycle
        .create_file_drop(&session.code, "empty.txt", Some("text/plain"), b"")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = ctx
        .lifecycle
        .create_file_drop(&session.code, "movie.txt", Some("video/mp4"), b"data")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let oversized = vec![0u8; 5 * 1024 * 1024 + 1];
    let err = ctx
        .lifecycle
        .create_file_drop(&session.code, "big.txt", Some("text/plain"), &oversized)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn expired_session_is_absent_before_any_sweep() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    ctx.clock.advance(Duration::hours(2));

    let err = ctx.lifecycle.get_live_session(&session.code).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    let err = ctx
        .lifecycle
        .create_text_drop(&session.code, "too late", DropKind::Text, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
}

#[tokio::test]
async fn expired_drops_vanish_from_listings_before_any_sweep() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    let long = "z".repeat(300); // 10-minute predicted TTL
    let short_lived = ctx
        .lifecycle
        .create_text_drop(&session.code, &long, DropKind::Text, false)
        .await
        .unwrap();
    let durable = ctx
        .lifecycle
        .create_text_drop(&session.code, "short note", DropKind::Text, false)
        .await
        .unwrap();

    ctx.clock.advance(Duration::minutes(30));

    let visible = ctx.lifecycle.list_visible_drops(&session.code).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, durable.id);
    assert!(visible.iter().all(|d| d.id != short_lived.id));
}

#[tokio::test]
async fn force_expire_requires_an_existing_session() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let session = ctx.lifecycle.create_session().await.unwrap();
    ctx.lifecycle.force_expire_session(&session.code).await.unwrap();

    let err = ctx.lifecycle.get_live_session(&session.code).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    let err = ctx.lifecycle.force_expire_session("000000").await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
}
