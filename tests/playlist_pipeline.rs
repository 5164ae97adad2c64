use chrono::NaiveDate;
use music_dashboard_session as lib;
use lib::api::http::build_client;
use lib::api::mock::{MockProvider, MockTokenEndpoint};
use lib::api::spotify::SpotifyProvider;
use lib::error::ApiError;
use lib::models::{FailureReason, PlaylistCreationResult, PlaylistSource, TrackSelection};
use lib::pipeline::{playlist_display_name, PlaylistCreationPipeline, PlaylistRequest};
use lib::token::{AuthState, TokenLifecycleManager};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn jan15() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

async fn logged_in() -> Arc<TokenLifecycleManager> {
    let mgr = Arc::new(TokenLifecycleManager::new(
        Arc::new(MockTokenEndpoint::new()),
        chrono::Duration::minutes(5),
    ));
    mgr.exchange_code("code", "http://127.0.0.1:8888/callback", None)
        .await
        .expect("login");
    mgr
}

fn request<'a>(user_id: &'a str, selection: &'a TrackSelection, name: Option<&'a str>) -> PlaylistRequest<'a> {
    PlaylistRequest {
        user_id,
        selection,
        name,
        source: PlaylistSource::TopTracks,
        date: jan15(),
    }
}

#[test]
fn display_name_falls_back_to_source_label() {
    assert_eq!(
        playlist_display_name(None, &PlaylistSource::TopTracks, jan15()),
        "My Top Tracks (2025-01-15)"
    );
    assert_eq!(
        playlist_display_name(Some("   "), &PlaylistSource::TopTracks, jan15()),
        "My Top Tracks (2025-01-15)"
    );
    assert_eq!(
        playlist_display_name(Some("Road trip"), &PlaylistSource::TopTracks, jan15()),
        "Road trip (2025-01-15)"
    );
    assert_eq!(
        playlist_display_name(None, &PlaylistSource::Custom("Chill".into()), jan15()),
        "Chill (2025-01-15)"
    );
}

#[test]
fn selection_dedupes_and_builds_uris() {
    let sel = TrackSelection::deduplicated(["a", "b", "a", "spotify:track:c"]);
    assert_eq!(sel.len(), 3);
    assert_eq!(
        sel.uris(),
        vec!["spotify:track:a", "spotify:track:b", "spotify:track:c"]
    );
}

#[tokio::test]
async fn creates_and_populates_playlist() {
    let provider = Arc::new(MockProvider::new());
    let pipeline = PlaylistCreationPipeline::new(provider.clone(), logged_in().await);
    let sel = TrackSelection::new(vec!["t1".into(), "t2".into(), "t3".into()]);

    let result = pipeline.run(request("mock_user", &sel, None)).await;
    assert_eq!(
        result,
        PlaylistCreationResult::Created {
            playlist_id: "mock-playlist-1".into(),
            url: "https://open.spotify.com/playlist/mock-playlist-1".into(),
        }
    );
    assert!(result.is_complete());

    let drafts = provider.created();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].name, "My Top Tracks (2025-01-15)");
    assert_eq!(drafts[0].description, "Generated by music-dashboard");
    assert_eq!(
        provider.tracks_of("mock-playlist-1"),
        vec!["spotify:track:t1", "spotify:track:t2", "spotify:track:t3"]
    );
}

#[tokio::test]
async fn not_authenticated_fails_before_any_write() {
    let provider = Arc::new(MockProvider::new());
    let tokens = Arc::new(TokenLifecycleManager::new(
        Arc::new(MockTokenEndpoint::new()),
        chrono::Duration::minutes(5),
    ));
    let pipeline = PlaylistCreationPipeline::new(provider.clone(), tokens);
    let sel = TrackSelection::new(vec!["t1".into()]);

    let result = pipeline.run(request("mock_user", &sel, None)).await;
    assert_eq!(
        result,
        PlaylistCreationResult::Failed {
            reason: FailureReason::NotAuthenticated
        }
    );
    assert!(provider.created().is_empty());
}

#[tokio::test]
async fn empty_selection_and_missing_user_fail_without_writes() {
    let provider = Arc::new(MockProvider::new());
    let pipeline = PlaylistCreationPipeline::new(provider.clone(), logged_in().await);

    let empty = TrackSelection::default();
    let result = pipeline.run(request("mock_user", &empty, None)).await;
    assert_eq!(
        result,
        PlaylistCreationResult::Failed {
            reason: FailureReason::NoTracks
        }
    );

    let sel = TrackSelection::new(vec!["t1".into()]);
    let result = pipeline.run(request("  ", &sel, None)).await;
    assert_eq!(
        result,
        PlaylistCreationResult::Failed {
            reason: FailureReason::MissingUserId
        }
    );
    assert!(provider.created().is_empty());
}

#[tokio::test]
async fn create_failure_is_a_plain_failure() {
    let provider = Arc::new(MockProvider::new().failing_create(ApiError::Rejected {
        status: 403,
        body: "forbidden".into(),
    }));
    let pipeline = PlaylistCreationPipeline::new(provider.clone(), logged_in().await);
    let sel = TrackSelection::new(vec!["t1".into()]);

    let result = pipeline.run(request("mock_user", &sel, Some("Mine"))).await;
    match result {
        PlaylistCreationResult::Failed {
            reason: FailureReason::Rejected(msg),
        } => assert!(msg.contains("403")),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(provider.tracks_of("mock-playlist-1").is_empty());
}

#[tokio::test]
async fn add_failure_reports_the_created_playlist() {
    let provider = Arc::new(MockProvider::new().failing_add(ApiError::Timeout));
    let pipeline = PlaylistCreationPipeline::new(provider.clone(), logged_in().await);
    let sel = TrackSelection::new(vec!["t1".into(), "t2".into()]);

    let result = pipeline.run(request("mock_user", &sel, None)).await;
    match &result {
        PlaylistCreationResult::CreatedTracksFailed {
            playlist_id,
            url,
            reason,
        } => {
            assert_eq!(playlist_id, "mock-playlist-1");
            assert!(url.ends_with("mock-playlist-1"));
            assert_eq!(reason, "request timed out");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(result.playlist_id(), Some("mock-playlist-1"));
    assert!(!result.is_complete());
    assert_eq!(provider.created().len(), 1);
}

#[tokio::test]
async fn unauthorized_create_expires_the_session() {
    let provider = Arc::new(MockProvider::new().failing_create(ApiError::Unauthorized("bad token".into())));
    let tokens = logged_in().await;
    let pipeline = PlaylistCreationPipeline::new(provider, tokens.clone());
    let sel = TrackSelection::new(vec!["t1".into()]);

    let result = pipeline.run(request("mock_user", &sel, None)).await;
    assert_eq!(
        result,
        PlaylistCreationResult::Failed {
            reason: FailureReason::NotAuthenticated
        }
    );
    assert_eq!(tokens.state(), AuthState::Expired);
}

#[tokio::test]
async fn large_selection_is_written_in_ordered_batches() {
    let provider = Arc::new(MockProvider::new());
    let pipeline = PlaylistCreationPipeline::new(provider.clone(), logged_in().await).with_batch_size(100);
    let ids: Vec<String> = (0..250).map(|i| format!("t{}", i)).collect();
    let sel = TrackSelection::new(ids.clone());

    let result = pipeline.run(request("mock_user", &sel, None)).await;
    assert!(result.is_complete());
    let written = provider.tracks_of("mock-playlist-1");
    let expected: Vec<String> = ids.iter().map(|id| format!("spotify:track:{}", id)).collect();
    assert_eq!(written, expected);
}

#[test]
fn spotify_wire_create_then_add() {
    let mut server = Server::new();
    let base = server.url();

    let create = server
        .mock("POST", "/users/u1/playlists")
        .match_header("authorization", "Bearer mock-access-1")
        .match_body(Matcher::PartialJson(json!({
            "name": "My Top Tracks (2025-01-15)",
            "public": true
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "pl-new",
                "external_urls": {"spotify": "https://open.spotify.com/playlist/pl-new"}
            })
            .to_string(),
        )
        .expect(1)
        .create();
    let add = server
        .mock("POST", "/playlists/pl-new/tracks")
        .match_body(Matcher::Json(json!({"uris": ["spotify:track:a", "spotify:track:b"]})))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(json!({"snapshot_id": "s1"}).to_string())
        .expect(1)
        .create();

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let result = rt.block_on(async {
        let client = build_client(Duration::from_secs(5)).expect("client");
        let provider = Arc::new(SpotifyProvider::new(client, base.clone()));
        let pipeline = PlaylistCreationPipeline::new(provider, logged_in().await);
        let sel = TrackSelection::new(vec!["a".into(), "b".into()]);
        pipeline.run(request("u1", &sel, None)).await
    });

    assert_eq!(
        result,
        PlaylistCreationResult::Created {
            playlist_id: "pl-new".into(),
            url: "https://open.spotify.com/playlist/pl-new".into(),
        }
    );
    create.assert();
    add.assert();
}

#[test]
fn spotify_wire_create_rejected_never_adds_tracks() {
    let mut server = Server::new();
    let base = server.url();

    let _create = server
        .mock("POST", "/users/u1/playlists")
        .with_status(403)
        .with_body(json!({"error": {"status": 403, "message": "Insufficient client scope"}}).to_string())
        .create();
    let add = server
        .mock("POST", Matcher::Regex(r"^/playlists/.*/tracks$".into()))
        .with_status(201)
        .expect(0)
        .create();

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let result = rt.block_on(async {
        let client = build_client(Duration::from_secs(5)).expect("client");
        let provider = Arc::new(SpotifyProvider::new(client, base.clone()));
        let pipeline = PlaylistCreationPipeline::new(provider, logged_in().await);
        let sel = TrackSelection::new(vec!["a".into()]);
        pipeline.run(request("u1", &sel, None)).await
    });

    match result {
        PlaylistCreationResult::Failed {
            reason: FailureReason::Rejected(msg),
        } => assert!(msg.contains("Insufficient client scope")),
        other => panic!("unexpected result {:?}", other),
    }
    add.assert();
}

#[test]
fn spotify_wire_add_rejected_keeps_playlist_link() {
    let mut server = Server::new();
    let base = server.url();

    let _create = server
        .mock("POST", "/users/u1/playlists")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": "pl-9"}).to_string())
        .create();
    let _add = server
        .mock("POST", "/playlists/pl-9/tracks")
        .with_status(500)
        .with_body("oops")
        .create();

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let result = rt.block_on(async {
        let client = build_client(Duration::from_secs(5)).expect("client");
        let provider = Arc::new(SpotifyProvider::new(client, base.clone()));
        let pipeline = PlaylistCreationPipeline::new(provider, logged_in().await);
        let sel = TrackSelection::new(vec!["a".into()]);
        pipeline.run(request("u1", &sel, None)).await
    });

    assert_eq!(
        result,
        PlaylistCreationResult::CreatedTracksFailed {
            playlist_id: "pl-9".into(),
            url: "https://open.spotify.com/playlist/pl-9".into(),
            reason: "remote rejected request: 500 => oops".into(),
        }
    );
}
