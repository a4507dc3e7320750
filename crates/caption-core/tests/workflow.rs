//! End-to-end workflow behaviour: counters, history, fallbacks and cancellation.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use caption_core::fakes::{Scripted, ScriptedModel, StaticDeviceProbe, StaticLoader};
use caption_core::{
    cancel_pair, CaptionConfig, Coordinator, ErrorKind, FileImageSource, Image, ImageRef,
    ImageSource, ModelLoader, ResizePreprocessor, StatisticsReport,
};
use image::{DynamicImage, ImageFormat};

fn coordinator(model: ScriptedModel, config: &CaptionConfig) -> (Coordinator, Arc<StaticLoader>) {
    let loader = Arc::new(StaticLoader::new(model));
    let coordinator = Coordinator::from_parts(
        config,
        Arc::clone(&loader) as Arc<dyn ModelLoader>,
        Arc::new(StaticDeviceProbe::cpu()),
        Arc::new(ResizePreprocessor::new(config.max_dimension)),
    );
    (coordinator, loader)
}

fn image(width: u32, height: u32) -> Image {
    Image::new(DynamicImage::new_rgb8(width, height))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workflows_share_model_and_history() {
    let model = ScriptedModel::describing_dimensions().with_delay(Duration::from_millis(20));
    let (coordinator, loader) = coordinator(model, &CaptionConfig::default());
    let coordinator = Arc::new(coordinator);
    assert!(coordinator.initialize().await);

    let mut tasks = Vec::new();
    for i in 0..10u32 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            coordinator
                .run_workflow(image(10 + i, 10), "a photography of", 50)
                .await
        }));
    }

    let mut operation_counts = Vec::new();
    for task in tasks {
        let record = task.await.unwrap();
        assert!(record.success);
        operation_counts.push(record.workflow.unwrap().operation_count);
    }
    operation_counts.sort_unstable();

    assert_eq!(operation_counts, (1..=10).collect::<Vec<u64>>());
    assert_eq!(coordinator.total_operations(), 10);
    assert_eq!(coordinator.history().unwrap().len(), 10);
    assert_eq!(loader.model_loads(), 1);
    assert_eq!(loader.model().calls(), 10);
}

#[tokio::test]
async fn test_counter_counts_attempts_on_every_path() {
    let model = ScriptedModel::fixed("ok").with_script([Scripted::Fail("boom".into())]);
    let (coordinator, _) = coordinator(model, &CaptionConfig::default());

    // Not initialized.
    let record = coordinator.run_workflow(image(8, 8), "p", 10).await;
    assert_eq!(record.error_kind, Some(ErrorKind::NotReady));

    assert!(coordinator.initialize().await);
    // Inference failure, then success.
    assert!(!coordinator.run_workflow(image(8, 8), "p", 10).await.success);
    assert!(coordinator.run_workflow(image(8, 8), "p", 10).await.success);

    assert_eq!(coordinator.total_operations(), 3);

    let history = coordinator.history().unwrap();
    assert_eq!(history.len(), 2, "the uninitialized run is not recorded");
    let report = history.statistics();
    let stats = report.stats().unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.fail_count, 1);
    assert_eq!(stats.success_rate, 50.0);
}

#[tokio::test]
async fn test_large_image_is_downscaled_before_inference() {
    let config = CaptionConfig::default().with_max_dimension(256);
    let (coordinator, _) = coordinator(ScriptedModel::describing_dimensions(), &config);
    assert!(coordinator.initialize().await);

    let record = coordinator.run_workflow(image(1024, 512), "p", 50).await;
    assert!(record.success);
    assert_eq!(record.caption.as_deref(), Some("an image of 256x128 pixels"));
    assert_eq!(record.image_dimensions.width, 256);
}

#[tokio::test]
async fn test_upload_through_source_to_caption() {
    let mut bytes = Vec::new();
    DynamicImage::new_rgb8(40, 30)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    let upload = ImageRef::Upload {
        name: "beach.png".to_string(),
        bytes,
    };
    let loaded = FileImageSource::default().load(&upload).unwrap();

    let (coordinator, _) = coordinator(
        ScriptedModel::describing_dimensions(),
        &CaptionConfig::default(),
    );
    assert!(coordinator.initialize().await);
    let record = coordinator.run_workflow(loaded, "p", 50).await;
    assert_eq!(record.caption.as_deref(), Some("an image of 40x30 pixels"));
}

#[tokio::test]
async fn test_multi_prompt_all_failing_records_last_attempt() {
    let model = ScriptedModel::fixed("unused").with_script([
        Scripted::Fail("first".into()),
        Scripted::Fail("second".into()),
    ]);
    let (coordinator, loader) = coordinator(model, &CaptionConfig::default());
    assert!(coordinator.initialize().await);

    let record = coordinator
        .run_workflow_multi_prompt(image(8, 8), &["a", "b"], 20)
        .await;
    assert!(!record.success);
    assert_eq!(record.prompt, "b");
    assert_eq!(loader.model().prompts_seen(), vec!["a", "b"]);
    assert_eq!(coordinator.history().unwrap().len(), 1);
}

#[tokio::test]
async fn test_multi_prompt_empty_list_is_reported() {
    let (coordinator, loader) = coordinator(ScriptedModel::fixed("x"), &CaptionConfig::default());
    assert!(coordinator.initialize().await);

    let prompts: Vec<String> = Vec::new();
    let record = coordinator
        .run_workflow_multi_prompt(image(8, 8), &prompts, 20)
        .await;
    assert_eq!(record.error_kind, Some(ErrorKind::NoPromptsProvided));
    assert_eq!(loader.model().calls(), 0);
}

#[tokio::test]
async fn test_cancelled_inference_is_recorded_and_model_survives() {
    let model = ScriptedModel::fixed("after").with_script([Scripted::Hang]);
    let (coordinator, _) = coordinator(model, &CaptionConfig::default());
    assert!(coordinator.initialize().await);

    let (handle, signal) = cancel_pair();
    let run = coordinator.run_workflow_with_cancel(image(8, 8), "p", 10, &signal);
    let cancel_soon = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    };
    let (record, _) = tokio::join!(run, cancel_soon);
    assert_eq!(record.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(coordinator.total_operations(), 1);

    let next = coordinator.run_workflow(image(8, 8), "p", 10).await;
    assert_eq!(next.caption.as_deref(), Some("after"));
    assert_eq!(coordinator.history().unwrap().len(), 2);
    assert_eq!(coordinator.total_operations(), 2);
}

#[tokio::test]
async fn test_configured_timeout_cancels_inference() {
    let config = CaptionConfig::default().with_inference_timeout(Duration::from_millis(30));
    let model = ScriptedModel::fixed("x").with_script([Scripted::Hang]);
    let (coordinator, _) = coordinator(model, &config);
    assert!(coordinator.initialize().await);

    let record = coordinator.run_workflow(image(8, 8), "p", 10).await;
    assert_eq!(record.error_kind, Some(ErrorKind::Cancelled));
}

#[tokio::test]
async fn test_cleanup_then_reinitialize() {
    let (coordinator, loader) = coordinator(ScriptedModel::fixed("x"), &CaptionConfig::default());
    assert!(coordinator.initialize().await);
    coordinator.run_workflow(image(8, 8), "p", 10).await;

    coordinator.cleanup().await;
    assert!(matches!(
        coordinator.history().unwrap().statistics(),
        StatisticsReport::Empty { .. }
    ));

    assert!(coordinator.initialize().await);
    assert!(coordinator.run_workflow(image(8, 8), "p", 10).await.success);
    assert_eq!(loader.model_loads(), 2);
    assert_eq!(coordinator.total_operations(), 1);
}
