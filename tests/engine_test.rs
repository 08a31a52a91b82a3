//! Engine Tests
//!
//! Registry admission, duplicate detection, metadata validation and the
//! lifecycle of registered instances, driven through a scripted swarm.

mod common;

use common::*;
use reelseed::config::EngineConfig;
use reelseed::stream::AcquireError;
use std::time::Duration;

fn config() -> EngineConfig {
    EngineConfig {
        release_on_complete: false,
        ..Default::default()
    }
}

// =============================================================================
// Materialize
// =============================================================================

#[tokio::test]
async fn test_materialize_registers_instance() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(1);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(movie_metadata());
        handle
    });

    let instance = engine.materialize(&id).await.unwrap();
    let handle = feeder.await.unwrap();

    assert_eq!(instance.file().name, "movie.mp4");
    assert_eq!(instance.file().start_piece, 3);
    assert!(engine.contains(&id));
    assert_eq!(engine.stats().instances, 1);
    assert_eq!(engine.stats().materializing, 0);
    assert_eq!(handle.swarm.shutdowns(), 0);
}

#[tokio::test]
async fn test_concurrent_materialize_same_id() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(2);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(movie_metadata());
        (handle, joins)
    });

    let (a, b) = tokio::join!(engine.materialize(&id), engine.materialize(&id));
    let (_handle, mut joins) = feeder.await.unwrap();

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AcquireError::DuplicateAcquisition(d)) if *d == id)));

    // the loser never joined a swarm
    assert!(joins.try_recv().is_err());
    assert!(engine.contains(&id));
}

#[tokio::test]
async fn test_registered_id_is_duplicate() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(3);

    let feeder = tokio::spawn(async move {
        next_join(&mut joins).await.connect(movie_metadata());
    });
    engine.materialize(&id).await.unwrap();
    feeder.await.unwrap();

    let err = engine.materialize(&id).await.unwrap_err();
    assert_eq!(err, AcquireError::DuplicateAcquisition(id.clone()));
    assert_eq!(err.code(), "torrent_duplicate");
}

#[tokio::test]
async fn test_sixth_materialize_exceeds_capacity() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    assert_eq!(engine.config().max_instances, 5);

    let feeder = tokio::spawn(async move {
        let mut handles = Vec::new();
        for _ in 0..5 {
            let handle = next_join(&mut joins).await;
            handle.connect(movie_metadata());
            handles.push(handle);
        }
        (handles, joins)
    });
    for n in 0..5 {
        engine.materialize(&content_id(10 + n)).await.unwrap();
    }
    let (_handles, mut joins) = feeder.await.unwrap();

    assert!(!engine.admission_check());
    let before = engine.stats();
    let err = engine.materialize(&content_id(99)).await.unwrap_err();
    assert_eq!(err, AcquireError::CapacityExceeded);
    assert_eq!(engine.stats(), before);
    assert!(!engine.contains(&content_id(99)));
    assert!(joins.try_recv().is_err());

    assert!(engine.release(&content_id(10)));
    assert!(engine.admission_check());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_timeout_releases_discovery() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(4);

    let err = engine.materialize(&id).await.unwrap_err();
    assert_eq!(err, AcquireError::MetadataTimeout(Duration::from_secs(60)));

    let handle = next_join(&mut joins).await;
    assert_eq!(handle.swarm.shutdowns(), 1);
    assert!(!engine.contains(&id));
    assert_eq!(engine.stats().materializing, 0);
    assert!(engine.admission_check());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_without_connection_times_out() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(5);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        let _ = handle
            .tx
            .send(reelseed::stream::SwarmEvent::Metadata(movie_metadata()));
        handle
    });

    let err = engine.materialize(&id).await.unwrap_err();
    assert!(matches!(err, AcquireError::MetadataTimeout(_)));
    let handle = feeder.await.unwrap();
    assert_eq!(handle.swarm.shutdowns(), 1);
}

#[tokio::test]
async fn test_unsupported_metadata_is_rejected() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(6);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(with_files(&["readme.txt", "cover.jpg"]));
        handle
    });

    let err = engine.materialize(&id).await.unwrap_err();
    let handle = feeder.await.unwrap();

    assert!(matches!(err, AcquireError::UnsupportedMetadata(_)));
    assert_eq!(err.code(), "torrent_invalid_metadata");
    assert_eq!(handle.swarm.shutdowns(), 1);
    assert!(!engine.contains(&id));
    assert_eq!(engine.stats().materializing, 0);
}

// =============================================================================
// Release
// =============================================================================

#[tokio::test]
async fn test_release_unknown_is_noop() {
    let Harness { engine, .. } = harness(config(), vec![]);
    assert!(!engine.release(&content_id(7)));
    assert!(!engine.release(&content_id(7)));
    assert_eq!(engine.stats().instances, 0);
}

#[tokio::test]
async fn test_release_is_idempotent_and_detaches_listeners() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(8);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(movie_metadata());
        handle
    });
    let instance = engine.materialize(&id).await.unwrap();
    let handle = feeder.await.unwrap();
    let mut listener = instance.subscribe();

    assert!(engine.release(&id));
    assert!(!engine.release(&id));
    assert!(!engine.contains(&id));
    assert_eq!(handle.swarm.shutdowns(), 1);
    assert!(listener.recv().await.is_err());
}

// =============================================================================
// Maintenance and background activity
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_maintenance_refreshes_until_release() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(9);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(movie_metadata());
        handle
    });
    engine.materialize(&id).await.unwrap();
    let handle = feeder.await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(handle.swarm.reannounces(), 2);

    engine.release(&id);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(handle.swarm.reannounces(), 2);
}

#[tokio::test]
async fn test_pieces_flow_into_instance() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    let id = content_id(20);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(movie_metadata());
        handle
    });
    let instance = engine.materialize(&id).await.unwrap();
    let handle = feeder.await.unwrap();

    handle.pieces(3..13);
    eventually(|| instance.is_playable()).await;
    assert!(instance.content_hash().is_none());

    handle.pieces([36, 37, 38, 39]);
    eventually(|| instance.content_hash().is_some()).await;
}

#[tokio::test]
async fn test_complete_download_is_released() {
    let Harness {
        engine, mut joins, ..
    } = harness(EngineConfig::default(), vec![]);
    let id = content_id(21);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(movie_metadata());
        handle
    });
    let instance = engine.materialize(&id).await.unwrap();
    let handle = feeder.await.unwrap();

    handle.pieces(3..40);
    eventually(|| !engine.contains(&id)).await;
    assert!(instance.is_complete());
    assert_eq!(handle.swarm.shutdowns(), 1);
}

#[tokio::test]
async fn test_aggregate_throughput() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);
    assert_eq!(engine.aggregate_throughput(), 0);

    let feeder = tokio::spawn(async move {
        let mut handles = Vec::new();
        for _ in 0..2 {
            let handle = next_join(&mut joins).await;
            handle.connect(movie_metadata());
            handles.push(handle);
        }
        handles
    });
    engine.materialize(&content_id(30)).await.unwrap();
    engine.materialize(&content_id(31)).await.unwrap();
    let _handles = feeder.await.unwrap();

    // two instances, each with peers at 100 and 200 B/s
    assert_eq!(engine.aggregate_throughput(), 600);
    assert_eq!(engine.stats().throughput, 600);
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let Harness {
        engine, mut joins, ..
    } = harness(config(), vec![]);

    let feeder = tokio::spawn(async move {
        let handle = next_join(&mut joins).await;
        handle.connect(movie_metadata());
        handle
    });
    engine.materialize(&content_id(40)).await.unwrap();
    let handle = feeder.await.unwrap();

    engine.shutdown();
    assert_eq!(engine.stats().instances, 0);
    assert_eq!(handle.swarm.shutdowns(), 1);
}
