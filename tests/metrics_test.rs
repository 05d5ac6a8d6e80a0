//! Stage 2 metrics as a scrape of the worker's recorder would see them.

mod fixtures;
mod helpers;

use audio_lro_pipeline::models::job::JobHandle;
use audio_lro_pipeline::pipeline::{self, transcription::TranscriptionWaitStage};
use audio_lro_pipeline::services::materializer::{BlobMaterializer, TranscriptionSink};
use audio_lro_pipeline::services::poller::Poller;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

use fixtures::*;
use helpers::*;

#[test]
fn test_wait_stage_metrics_reach_the_recorder() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    let speech = Arc::new(FakeSpeech::new(
        JobHandle::new("https://svc/transcriptions/42", None),
        vec![
            transcription_running("m", 5.0),
            transcription_succeeded("m", &[("Transcription", "https://svc/r1")]),
        ],
    ));
    let blobs = Arc::new(MemoryBlobs::default());
    let wait = TranscriptionWaitStage::new(
        speech.clone(),
        Poller::new(),
        TranscriptionSink::Blob(BlobMaterializer::new(blobs, "transcriptions")),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    metrics::with_local_recorder(&recorder, || {
        pipeline::metrics::describe();
        runtime
            .block_on(wait.run(&JobHandle::new("https://svc/transcriptions/42", None)))
            .unwrap();
    });

    let rendered = handle.render();
    assert!(rendered.contains("# HELP lro_polls_total"), "{rendered}");
    assert!(rendered.contains("lro_polls_total 2"), "{rendered}");
    assert!(rendered.contains("lro_jobs_completed_total{"), "{rendered}");
    assert!(rendered.contains("lro_wait_seconds"), "{rendered}");
    assert!(rendered.contains("lro_artifacts_materialized_total{target=\"blob\"} 1"), "{rendered}");
}
