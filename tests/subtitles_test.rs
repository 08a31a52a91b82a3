//! Subtitle Client Tests
//!
//! Hash-aware search against a mocked Stremio OpenSubtitles addon, language
//! picking, WebVTT conversion and the on-disk cache.

use mockito::{Server, ServerGuard};
use reelseed::stream::subtitles::SubtitleTrack;
use reelseed::stream::{SubtitleClient, SubtitleFetcher};
use reelseed::MovieHash;

const HASH: MovieHash = MovieHash(0x8e245d9679d31e12);
const SIZE: u64 = 12_909_756;
const SEARCH_PATH: &str =
    "/subtitles/movie/tt0111161/videoHash=8e245d9679d31e12&videoSize=12909756.json";

const SRT: &str = "1\n00:00:01,500 --> 00:00:03,000\nGet busy living, or get busy dying.\n";

fn search_body(server: &ServerGuard) -> String {
    format!(
        r#"{{
            "subtitles": [
                {{"id": "55419", "url": "{0}/files/eng-1.srt", "lang": "eng"}},
                {{"id": "55420", "url": "{0}/files/eng-2.srt", "lang": "eng"}},
                {{"id": "122952", "url": "{0}/files/fre.srt", "lang": "fre"}},
                {{"id": "135292", "url": "{0}/files/spa.srt", "lang": "spa"}}
            ],
            "cacheMaxAge": 14400
        }}"#,
        server.url()
    )
}

fn client(server: &ServerGuard, languages: &[&str], cache: &tempfile::TempDir) -> SubtitleClient {
    SubtitleClient::with_base_url(
        server.url(),
        languages.iter().map(|l| l.to_string()).collect(),
        cache.path(),
    )
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn test_search_by_content_hash() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", SEARCH_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(search_body(&server))
        .create_async()
        .await;

    let cache = tempfile::tempdir().unwrap();
    let client = client(&server, &["eng"], &cache);
    let tracks = client.search("tt0111161", HASH, SIZE).await.unwrap();
    mock.assert_async().await;

    assert_eq!(tracks.len(), 4);
    assert_eq!(
        tracks[0],
        SubtitleTrack {
            id: "55419".to_string(),
            url: format!("{}/files/eng-1.srt", server.url()),
            language: "eng".to_string(),
        }
    );
    assert_eq!(tracks[3].language, "spa");
}

#[tokio::test]
async fn test_search_empty() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", SEARCH_PATH)
        .with_status(200)
        .with_body(r#"{"subtitles": []}"#)
        .create_async()
        .await;

    let cache = tempfile::tempdir().unwrap();
    let tracks = client(&server, &["eng"], &cache)
        .search("tt0111161", HASH, SIZE)
        .await
        .unwrap();
    assert!(tracks.is_empty());
}

#[tokio::test]
async fn test_search_http_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", SEARCH_PATH)
        .with_status(502)
        .create_async()
        .await;

    let cache = tempfile::tempdir().unwrap();
    let err = client(&server, &["eng"], &cache)
        .search("tt0111161", HASH, SIZE)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("502"));
}

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn test_fetch_downloads_preferred_languages() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", SEARCH_PATH)
        .with_status(200)
        .with_body(search_body(&server))
        .create_async()
        .await;
    let eng = server
        .mock("GET", "/files/eng-1.srt")
        .with_status(200)
        .with_body(SRT)
        .expect(1)
        .create_async()
        .await;
    let spa = server
        .mock("GET", "/files/spa.srt")
        .with_status(200)
        .with_body(SRT)
        .expect(1)
        .create_async()
        .await;

    let cache = tempfile::tempdir().unwrap();
    let client = client(&server, &["spa", "ger", "eng"], &cache);
    let languages = client.fetch("tt0111161", HASH, SIZE).await.unwrap();

    eng.assert_async().await;
    spa.assert_async().await;
    assert_eq!(languages, vec!["spa", "eng"]);

    let cached = std::fs::read_to_string(cache.path().join("eng_55419.vtt")).unwrap();
    assert!(cached.starts_with("WEBVTT\n\n"));
    assert!(cached.contains("00:00:01.500 --> 00:00:03.000"));
    assert!(cached.contains("Get busy living, or get busy dying."));
}

#[tokio::test]
async fn test_download_uses_cache() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/files/eng-1.srt")
        .with_status(200)
        .with_body(SRT)
        .expect(1)
        .create_async()
        .await;

    let cache = tempfile::tempdir().unwrap();
    let client = client(&server, &["eng"], &cache);
    let track = SubtitleTrack {
        id: "55419".to_string(),
        url: format!("{}/files/eng-1.srt", server.url()),
        language: "eng".to_string(),
    };

    let first = client.download(&track).await.unwrap();
    let second = client.download(&track).await.unwrap();
    assert_eq!(first, second);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_without_matching_language_fails() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", SEARCH_PATH)
        .with_status(200)
        .with_body(search_body(&server))
        .create_async()
        .await;

    let cache = tempfile::tempdir().unwrap();
    let err = client(&server, &["fin"], &cache)
        .fetch("tt0111161", HASH, SIZE)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No subtitles"));
}

#[tokio::test]
async fn test_fetch_fails_when_every_download_fails() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", SEARCH_PATH)
        .with_status(200)
        .with_body(search_body(&server))
        .create_async()
        .await;
    server
        .mock("GET", "/files/eng-1.srt")
        .with_status(404)
        .create_async()
        .await;

    let cache = tempfile::tempdir().unwrap();
    let err = client(&server, &["eng"], &cache)
        .fetch("tt0111161", HASH, SIZE)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Every subtitle download failed"));
}
