//! Score feed and user refresh against a mock upstream with an in-memory store.

mod common;

use chrono::Utc;
use mockito::Matcher;
use quota_ingest::batch::BatchSink;
use quota_ingest::ingest::{
    BatchUserRefresher, CursorFile, MemoryStore, Ruleset, ScoreIngestor, Store, UserRefresher,
};
use quota_ingest::queue::{DispatchHandler, OpMask, QueueConfig, WorkQueue};
use quota_ingest::{Error, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn idle_queue() -> WorkQueue<u64> {
    WorkQueue::new(&QueueConfig::default(), |_id: u64, _mask: OpMask| async {
        Ok::<(), Error>(())
    })
}

fn score_json(id: u64, user_id: u64, ruleset_id: u8) -> serde_json::Value {
    json!({
        "id": id,
        "user_id": user_id,
        "beatmap_id": 75,
        "ruleset_id": ruleset_id,
        "total_score": 1_000_000,
        "accuracy": 0.98,
        "max_combo": 500,
        "rank": "S",
        "passed": true,
        "mods": [{"acronym": "HD"}],
        "ended_at": Utc::now().to_rfc3339(),
    })
}

#[tokio::test]
async fn test_poll_once_stores_queues_and_advances_cursor() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let page = json!({
        "scores": [score_json(1, 7, 0), score_json(2, 7, 3), score_json(3, 8, 1)],
        "cursor_string": "abc==",
    });
    let feed = server
        .mock("GET", Matcher::Regex(r"^/scores".into()))
        .match_query(Matcher::UrlEncoded("cursor_string".into(), String::new()))
        .with_status(200)
        .with_body(page.to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store.clone(), dir.path());
    store.create_user(8).await?;
    ctx.known.insert(8);

    let queue = idle_queue();
    let cursor_path = dir.path().join("cursor.txt");
    let ingestor = ScoreIngestor::new(ctx.clone(), queue.clone(), CursorFile::new(&cursor_path), 1).await?;

    let report = ingestor.poll_once().await?;
    feed.assert_async().await;

    assert_eq!(report.scores, 3);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.new_users, 1);
    assert_eq!(report.failed, 0);
    assert!(report.cursor_advanced);

    assert_eq!(store.score_count(), 3);
    assert!(store.user(7).is_some());
    assert!(ctx.known.contains(7));

    // User 7 was new: one priority entry carrying both rulesets. User 8 goes to the normal lane.
    assert_eq!(queue.pending(7), Ruleset::Osu.bit() | Ruleset::Mania.bit());
    assert_eq!(queue.pending(8), Ruleset::Taiko.bit());
    let snap = queue.snapshot();
    assert_eq!(snap.priority_depth, 1);
    assert_eq!(snap.normal_depth, 1);

    assert_eq!(ingestor.cursor().await, "abc==");
    assert_eq!(tokio::fs::read_to_string(&cursor_path).await?, "abc==");
    Ok(())
}

#[tokio::test]
async fn test_poll_once_resumes_from_saved_cursor_and_skips_seen_scores() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let page = json!({ "scores": [score_json(10, 5, 0)], "cursor_string": "next" });
    let feed = server
        .mock("GET", Matcher::Regex(r"^/scores".into()))
        .match_query(Matcher::UrlEncoded("cursor_string".into(), "saved".into()))
        .with_status(200)
        .with_body(page.to_string())
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let cursor = CursorFile::new(dir.path().join("cursor.txt"));
    cursor.save("saved").await?;

    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store.clone(), dir.path());
    let ingestor = ScoreIngestor::new(ctx.clone(), idle_queue(), cursor, 4).await?;

    let first = ingestor.poll_once().await?;
    assert_eq!(first.inserted, 1);

    // Roll the cursor back by hand so the same page is served again.
    CursorFile::new(dir.path().join("cursor.txt")).save("saved").await?;
    let again = ScoreIngestor::new(ctx, idle_queue(), CursorFile::new(dir.path().join("cursor.txt")), 4).await?;
    let second = again.poll_once().await?;
    assert_eq!(second.scores, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.score_count(), 1);

    feed.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_undecodable_page_is_dumped_and_cursor_kept() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _feed = server
        .mock("GET", Matcher::Regex(r"^/scores".into()))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{\"scores\": [")
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store, dir.path());
    let cursor_path = dir.path().join("cursor.txt");
    let ingestor = ScoreIngestor::new(ctx, idle_queue(), CursorFile::new(&cursor_path), 4).await?;

    let err = ingestor.poll_once().await.unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
    assert_eq!(ingestor.cursor().await, "");
    assert!(!cursor_path.exists());
    assert_eq!(
        tokio::fs::read_to_string(dir.path().join("data.json")).await?,
        "{\"scores\": ["
    );
    assert!(dir.path().join("error.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_user_refresh_stores_profile_and_stats() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let profile = server
        .mock("GET", Matcher::Regex(r"^/users/42(\?|$)".into()))
        .match_query(Matcher::UrlEncoded("mode".into(), "0".into()))
        .with_status(200)
        .with_body(
            json!({
                "id": 42,
                "username": "Cookie Monster",
                "country_code": "DE",
                "statistics": { "pp": 4321.5, "play_count": 900, "is_ranked": true },
            })
            .to_string(),
        )
        .create_async()
        .await;
    let recent = server
        .mock("GET", Matcher::Regex(r"^/users/42/scores/recent".into()))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("mode".into(), "osu".into()),
            Matcher::UrlEncoded("include_fails".into(), "0".into()),
        ]))
        .with_status(200)
        .with_body(json!([score_json(99, 42, 0)]).to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store.clone(), dir.path());
    store.create_user(42).await?;

    let handler = UserRefresher::new(ctx.clone());
    handler.handle(42, Ruleset::Osu.bit()).await?;
    profile.assert_async().await;
    recent.assert_async().await;

    let user = store.user(42).unwrap();
    assert_eq!(user.username, "Cookie Monster");
    assert_eq!(user.safe_name, "cookie_monster");
    assert!(user.last_update.is_some());
    assert_eq!(store.stats(42, Ruleset::Osu).unwrap().play_count, 900);
    assert!(store.score(99).is_some());
    assert_eq!(ctx.reporter.snapshot().stats_updated, 1);
    Ok(())
}

#[tokio::test]
async fn test_user_refresh_retires_missing_user() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _gone = server
        .mock("GET", Matcher::Regex(r"^/users/13(\?|$)".into()))
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store.clone(), dir.path());
    store.create_user(13).await?;
    ctx.known.insert(13);

    UserRefresher::new(ctx.clone())
        .handle(13, Ruleset::Osu.bit() | Ruleset::Taiko.bit())
        .await?;

    assert!(store.user(13).unwrap().restricted);
    assert!(!ctx.known.contains(13));
    assert!(store.known_users().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_user_refresh_failure_is_reported() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _down = server
        .mock("GET", Matcher::Regex(r"^/users/5(\?|$)".into()))
        .match_query(Matcher::Any)
        .with_status(502)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store.clone(), dir.path());

    let err = UserRefresher::new(ctx)
        .handle(5, Ruleset::Osu.bit())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Fetch { status: 502, .. }));
    assert!(store.user(5).is_none());
    Ok(())
}

#[tokio::test]
async fn test_bulk_refresh_updates_present_and_retires_missing() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let bulk = server
        .mock("GET", Matcher::Regex(r"^/users(\?|$)".into()))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "users": [{
                    "id": 1,
                    "username": "alive",
                    "statistics_rulesets": {
                        "osu": { "pp": 100.0, "is_ranked": true },
                        "mania": { "pp": 0.0, "is_ranked": false },
                    },
                }],
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store.clone(), dir.path());
    for id in [1, 2] {
        store.create_user(id).await?;
        ctx.known.insert(id);
    }

    let sink = BatchUserRefresher::new(ctx.clone(), idle_queue());
    sink.flush(vec![1, 2]).await;
    bulk.assert_async().await;

    assert_eq!(store.user(1).unwrap().username, "alive");
    assert!(store.stats(1, Ruleset::Osu).is_some());
    assert!(store.stats(1, Ruleset::Mania).is_none());
    assert!(store.user(2).unwrap().restricted);
    assert!(!ctx.known.contains(2));
    Ok(())
}

#[tokio::test]
async fn test_bulk_refresh_failure_falls_back_to_queue() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _down = server
        .mock("GET", Matcher::Regex(r"^/users(\?|$)".into()))
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&server.url(), store, dir.path());
    let queue = idle_queue();

    BatchUserRefresher::new(ctx, queue.clone())
        .flush(vec![3, 4])
        .await;

    for _ in 0..100 {
        if !queue.pending(4).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(queue.pending(3), Ruleset::Osu.bit());
    assert_eq!(queue.pending(4), Ruleset::Osu.bit());
    assert_eq!(queue.snapshot().normal_depth, 2);
    Ok(())
}
