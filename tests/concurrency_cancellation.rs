//! Concurrency ceiling and cooperative cancellation

mod common;

use bgremove_pipeline::{BackgroundRemover, CancellationToken, ErrorKind, SegmentationMode};
use common::{png_bytes, MaskPattern, MockLoader, ModelFiles, RunGate};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_ceiling_holds() {
    let files = ModelFiles::both();
    let gate = Arc::new(RunGate::default());
    let loader = MockLoader::new(MaskPattern::Disc).with_gate(Arc::clone(&gate));
    let remover = BackgroundRemover::new(files.config(), Arc::new(loader.clone())).unwrap();
    assert_eq!(remover.available_permits(), 2);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let remover = remover.clone();
            tokio::spawn(async move {
                remover
                    .remove_background(
                        png_bytes(48, 32),
                        SegmentationMode::General,
                        None,
                        &CancellationToken::new(),
                    )
                    .await
            })
        })
        .collect();

    gate.wait_for_started(2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Third request is queued on the semaphore, not running
    assert_eq!(gate.started(), 2);
    assert_eq!(remover.available_permits(), 0);

    gate.open();
    let results = futures::future::join_all(handles).await;
    for result in results {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(loader.runs(), 3);
    assert_eq!(loader.loads(), 1);
    assert_eq!(remover.available_permits(), 2);
}

#[tokio::test]
async fn test_cancelled_before_call() {
    let files = ModelFiles::both();
    let loader = MockLoader::new(MaskPattern::Disc);
    let remover = BackgroundRemover::new(files.config(), Arc::new(loader.clone())).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = remover
        .remove_background(png_bytes(20, 20), SegmentationMode::General, None, &cancel)
        .await
        .unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_eq!(loader.loads(), 0);
    assert_eq!(loader.runs(), 0);
    assert_eq!(remover.available_permits(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_while_queued() {
    let files = ModelFiles::both();
    let gate = Arc::new(RunGate::default());
    let loader = MockLoader::new(MaskPattern::Disc).with_gate(Arc::clone(&gate));
    let config = bgremove_pipeline::PipelineConfig {
        max_concurrent_inferences: 1,
        ..files.config()
    };
    let remover = BackgroundRemover::new(config, Arc::new(loader.clone())).unwrap();

    let running = {
        let remover = remover.clone();
        tokio::spawn(async move {
            remover
                .remove_background(
                    png_bytes(32, 32),
                    SegmentationMode::General,
                    None,
                    &CancellationToken::new(),
                )
                .await
        })
    };
    gate.wait_for_started(1).await;

    let cancel = CancellationToken::new();
    let queued = {
        let remover = remover.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            remover
                .remove_background(png_bytes(32, 32), SegmentationMode::General, None, &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let error = tokio::time::timeout(Duration::from_secs(5), queued)
        .await
        .expect("queued request did not observe cancellation")
        .unwrap()
        .unwrap_err();
    assert!(error.is_cancelled());

    gate.open();
    assert!(running.await.unwrap().is_ok());
    assert_eq!(loader.runs(), 1);
    assert_eq!(remover.available_permits(), 1);
}

#[tokio::test]
async fn test_cancelled_before_inference() {
    let files = ModelFiles::both();
    let cancel = CancellationToken::new();
    let loader = MockLoader::new(MaskPattern::Disc).cancelling_on_load(cancel.clone());
    let remover = BackgroundRemover::new(files.config(), Arc::new(loader.clone())).unwrap();

    let error = remover
        .remove_background(png_bytes(20, 20), SegmentationMode::General, None, &cancel)
        .await
        .unwrap_err();

    assert!(error.is_cancelled());
    // The model loaded, but inference never ran
    assert_eq!(loader.loads(), 1);
    assert_eq!(loader.runs(), 0);
    assert!(remover.registry().is_loaded(SegmentationMode::General));
    assert_eq!(remover.available_permits(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_caller_keeps_slot_until_inference_ends() {
    let files = ModelFiles::both();
    let gate = Arc::new(RunGate::default());
    let loader = MockLoader::new(MaskPattern::Disc).with_gate(Arc::clone(&gate));
    let config = bgremove_pipeline::PipelineConfig {
        max_concurrent_inferences: 1,
        ..files.config()
    };
    let remover = BackgroundRemover::new(config, Arc::new(loader.clone())).unwrap();

    let abandoned = {
        let remover = remover.clone();
        tokio::spawn(async move {
            remover
                .remove_background(
                    png_bytes(32, 32),
                    SegmentationMode::General,
                    None,
                    &CancellationToken::new(),
                )
                .await
        })
    };
    gate.wait_for_started(1).await;
    abandoned.abort();
    let _ = abandoned.await;

    // Native inference is still running, so the slot stays taken
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remover.available_permits(), 0);

    gate.open();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while remover.available_permits() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "slot never released");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(loader.runs(), 1);
}
