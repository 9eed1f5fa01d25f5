use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clipforge::config::{Channel, ConfigBuilder};
use clipforge::feed::VideoRef;
use clipforge::llm::mock::MockLLM;
use clipforge::media::mock::{MockDownloader, MockMediaTool};
use clipforge::media::{SliceMode, SliceRequest};
use clipforge::processing::{ChannelProcessor, ProcessingStatus};
use clipforge::publish::MockPublisher;
use clipforge::retry::RetryPolicy;
use clipforge::segments::plan_segments;
use clipforge::state::{VideoProcessingState, VideoStage};
use clipforge::subtitles::{format_window, parse_timed_text};
use tempfile::TempDir;

const VIDEO_ID: &str = "abc123";

/// One caption line near the start of each 1200s segment of a 2500s video
const LONG_VTT: &str = "WEBVTT
Kind: captions
Language: pt

00:00:10.000 --> 00:00:14.000 align:start position:0%
first<00:00:11.000><c> segment</c>

00:20:10.000 --> 00:20:14.000
second segment

00:40:10.000 --> 00:40:14.000
third segment
";

const CUTS: &str = r#"{"cuts":[
    {"title":"Guard pass","begin":0,"end":60},
    {"title":"X","begin":0,"end":9999}
]}"#;

const METADATA: &str = r#"{
    "title":"Pass the guard like a pro",
    "description":"Step by step",
    "tags":["bjj","guard"],
    "hashtags":["bjj","jiujitsu"]
}"#;

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn channel(folder: &Path) -> Channel {
    Channel {
        id: "bjj".to_string(),
        name: "BJJ Channel".to_string(),
        channel_id: "UC123".to_string(),
        folder: folder.to_path_buf(),
        topics: "guard passing".to_string(),
        excerpts: 2,
        stretch_time: 1,
        video_cover: Some(PathBuf::from("/assets/cover.png")),
        video_base_vertical: Some(PathBuf::from("/assets/vertical.mp4")),
        video_base_horizontal: Some(PathBuf::from("/assets/horizontal.mp4")),
        upload_to_youtube: true,
        ytdlp_format: "best".to_string(),
        subtitle_lang: "pt".to_string(),
        ..Channel::default()
    }
}

struct Harness {
    _dir: TempDir,
    folder: PathBuf,
    media: Arc<MockMediaTool>,
    downloader: Arc<MockDownloader>,
    cut_llm: Arc<MockLLM>,
    metadata_llm: Arc<MockLLM>,
    publisher: Arc<MockPublisher>,
}

impl Harness {
    fn new(metadata_llm: MockLLM) -> Self {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().to_path_buf();
        let source = folder.join(VIDEO_ID).join(format!("{}.mp4", VIDEO_ID));

        Self {
            media: Arc::new(MockMediaTool::new().with_duration(source, secs(2500))),
            downloader: Arc::new(MockDownloader::with_captions(LONG_VTT)),
            cut_llm: Arc::new(MockLLM::always(CUTS)),
            metadata_llm: Arc::new(metadata_llm),
            publisher: Arc::new(MockPublisher::new()),
            folder,
            _dir: dir,
        }
    }

    fn processor(&self) -> ChannelProcessor {
        let config = ConfigBuilder::new()
            .with_api_key("sk-test")
            .with_retry(RetryPolicy::new(3, 1000))
            .with_segment_bound(1200)
            .build();

        ChannelProcessor::new(
            Arc::new(config),
            self.media.clone(),
            self.downloader.clone(),
            self.cut_llm.clone(),
        )
        .unwrap()
        .with_metadata_llm(self.metadata_llm.clone())
        .with_publisher(self.publisher.clone())
    }

    fn video_dir(&self) -> PathBuf {
        self.folder.join(VIDEO_ID)
    }
}

#[tokio::test]
async fn test_long_video_end_to_end() {
    let harness = Harness::new(MockLLM::always(METADATA));
    let channel = channel(&harness.folder);

    let result = harness
        .processor()
        .process_video(&channel, &VideoRef::new(VIDEO_ID, "Long class"), false)
        .await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.segments, 3);

    // Segments are stream-copied from 0, 1200 and 2400
    let segment_starts: Vec<u64> = harness
        .media
        .slices()
        .iter()
        .filter(|slice| slice.mode == SliceMode::StreamCopy)
        .map(|slice| slice.start.as_secs())
        .collect();
    assert_eq!(segment_starts, vec![0, 1200, 2400]);

    // The hallucinated window is rejected in every segment
    assert_eq!(result.cuts.len(), 3);
    assert!(result.cuts.iter().all(|cut| cut.title == "Guard pass"));
    assert_eq!(harness.cut_llm.call_count(), 3);

    let video_dir = harness.video_dir();
    for stem in ["Guard pass", "Guard pass (2)", "Guard pass (3)"] {
        assert!(video_dir.join("horizontal").join(format!("{}.mp4", stem)).exists());
        assert!(video_dir.join("horizontal").join(format!("{}.json", stem)).exists());
        assert!(video_dir.join("covers").join(format!("{}.jpg", stem)).exists());
        assert!(video_dir.join("vertical").join(format!("{}.mp4", stem)).exists());
        assert!(video_dir.join("horizontal-yt").join(format!("{}.mp4", stem)).exists());
    }

    // Split files are removed once the video is done, the source stays
    assert!(!video_dir.join(format!("{}.part1.mp4", VIDEO_ID)).exists());
    assert!(!video_dir.join(format!("{}.part3.srt", VIDEO_ID)).exists());
    assert!(video_dir.join(format!("{}.mp4", VIDEO_ID)).exists());

    // Captions are re-timed onto the cut
    let burns = harness.media.burns();
    assert_eq!(burns.len(), 3);
    assert!(burns[1].1.contains("00:00:10,000 --> 00:00:14,000"));
    assert!(burns[1].1.contains("second segment"));
    assert!(burns[0].1.contains("first segment"));

    let uploads = harness.publisher.uploads();
    assert_eq!(uploads.len(), 6);
    assert_eq!(uploads[0].1.title, "Pass the guard like a pro");
    assert_eq!(uploads[1].1.title, "Pass the guard like a pro (Vertical)");
    assert_eq!(uploads[0].1.privacy_status, "unlisted");
    assert!(uploads[0].0.to_string_lossy().contains("horizontal-yt"));

    let state = VideoProcessingState::load(&video_dir.join("state.json")).await.unwrap();
    assert_eq!(state.current_stage, VideoStage::Completed);
    assert!(state.reached(VideoStage::Uploaded));
}

#[tokio::test(start_paused = true)]
async fn test_metadata_exhaustion_renders_but_never_uploads() {
    let harness = Harness::new(MockLLM::failing());
    let channel = channel(&harness.folder);

    let result = harness
        .processor()
        .process_video(&channel, &VideoRef::new(VIDEO_ID, ""), false)
        .await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.cuts.len(), 3);
    assert!(result.cuts.iter().all(|cut| !cut.has_metadata));
    assert!(result.cuts.iter().all(|cut| cut.variants.len() == 4));
    assert_eq!(harness.metadata_llm.call_count(), 9);

    let video_dir = harness.video_dir();
    assert!(video_dir.join("vertical/Guard pass.mp4").exists());
    assert!(video_dir.join("horizontal-yt/Guard pass.mp4").exists());
    assert!(!video_dir.join("horizontal/Guard pass.json").exists());
    assert!(harness.publisher.uploads().is_empty());
}

#[tokio::test]
async fn test_failed_uploads_leave_video_unpublished() {
    let mut harness = Harness::new(MockLLM::always(METADATA));
    harness.publisher = Arc::new(MockPublisher::failing());
    let channel = channel(&harness.folder);

    let result = harness
        .processor()
        .process_video(&channel, &VideoRef::new(VIDEO_ID, ""), false)
        .await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.uploaded(), 0);
    for cut in &result.cuts {
        assert_eq!(cut.uploads.len(), 2);
        assert!(cut.uploads.iter().all(|upload| upload.video_id.is_none() && upload.error.is_some()));
    }

    let state = VideoProcessingState::load(&harness.video_dir().join("state.json")).await.unwrap();
    assert!(!state.reached(VideoStage::Uploaded));
    let before_completion = &state.history[state.history.len() - 2];
    assert_eq!(before_completion.stage, VideoStage::Rendered);
}

#[tokio::test]
async fn test_skip_then_force() {
    let harness = Harness::new(MockLLM::always(METADATA));
    let mut channel = channel(&harness.folder);
    channel.upload_to_youtube = false;
    let processor = harness.processor();
    let video = VideoRef::new(VIDEO_ID, "");

    let first = processor.process_video(&channel, &video, false).await;
    assert_eq!(first.status, ProcessingStatus::Completed);
    assert_eq!(harness.downloader.requests().len(), 2);

    let second = processor.process_video(&channel, &video, false).await;
    assert_eq!(second.status, ProcessingStatus::Skipped);
    assert_eq!(harness.downloader.requests().len(), 2);

    let forced = processor.process_video(&channel, &video, true).await;
    assert_eq!(forced.status, ProcessingStatus::Completed);
    assert_eq!(harness.downloader.requests().len(), 4);
    assert_eq!(forced.cuts.len(), 3);
    assert!(harness.publisher.uploads().is_empty());
}

#[tokio::test]
async fn test_single_video_channel() {
    let harness = Harness::new(MockLLM::always(METADATA));
    let mut channel = channel(&harness.folder);
    channel.channel_id = format!("v={}", VIDEO_ID);

    let report = harness
        .processor()
        .process_channel(&channel, false, None)
        .await
        .unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(report.successful, 1);
    assert_eq!(
        harness.downloader.requests()[0],
        format!("https://www.youtube.com/watch?v={}", VIDEO_ID)
    );
}

#[tokio::test]
async fn test_short_video_keeps_original_files() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join(VIDEO_ID).join(format!("{}.mp4", VIDEO_ID));
    let media = Arc::new(MockMediaTool::new().with_duration(&source, secs(600)));
    let cut_llm = Arc::new(MockLLM::always(CUTS));
    let config = ConfigBuilder::new().with_api_key("sk-test").build();

    let processor = ChannelProcessor::new(
        Arc::new(config),
        media.clone(),
        Arc::new(MockDownloader::with_captions(LONG_VTT)),
        cut_llm,
    )
    .unwrap()
    .with_metadata_llm(Arc::new(MockLLM::always(METADATA)));

    let mut channel = channel(dir.path());
    channel.video_cover = None;
    channel.video_base_vertical = None;
    channel.video_base_horizontal = None;

    let result = processor
        .process_video(&channel, &VideoRef::new(VIDEO_ID, ""), false)
        .await;

    assert_eq!(result.segments, 1);
    assert_eq!(result.cuts.len(), 1);
    assert_eq!(result.cuts[0].variants, vec!["horizontal"]);
    assert!(source.exists());

    let cut_slices: Vec<SliceRequest> = media
        .slices()
        .into_iter()
        .filter(|slice| slice.mode == SliceMode::Reencode)
        .collect();
    assert_eq!(cut_slices.len(), 1);
    assert_eq!(cut_slices[0].input, source);
    assert_eq!(cut_slices[0].length, secs(60));
}

#[test]
fn test_identity_window_round_trip() {
    let entries = parse_timed_text(LONG_VTT);
    let total = secs(2500);

    let reparsed = parse_timed_text(&format_window(&entries, Duration::ZERO, total));

    assert_eq!(reparsed.len(), entries.len());
    for (original, copy) in entries.iter().zip(&reparsed) {
        assert_eq!(copy.start, original.start);
        assert_eq!(copy.end, original.end);
    }
    assert_eq!(reparsed[0].text, "first segment");
}

#[test]
fn test_formatted_entries_stay_inside_window() {
    let entries = parse_timed_text(LONG_VTT);
    let windows = [(0, 12), (11, 1300), (1205, 1212), (2412, 3000), (14, 1210)];

    for (a, b) in windows {
        let length = secs(b - a);
        for entry in parse_timed_text(&format_window(&entries, secs(a), secs(b))) {
            assert!(entry.start <= entry.end);
            assert!(entry.end <= length, "window [{}, {}) produced {:?}", a, b, entry);
        }
    }
}

#[test]
fn test_segment_counts() {
    let bound = secs(1200);
    for (duration, expected) in [(600, 1), (1200, 1), (1201, 2), (2500, 3), (3600, 3), (3601, 4)] {
        let windows = plan_segments(secs(duration), bound);
        assert_eq!(windows.len(), expected, "duration {}", duration);

        let starts: Vec<u64> = windows.iter().map(|w| w.start.as_secs()).collect();
        let expected_starts: Vec<u64> = (0..expected as u64).map(|i| i * 1200).collect();
        assert_eq!(starts, expected_starts);
    }

    let last = plan_segments(secs(2500), bound).pop().unwrap();
    assert_eq!(last.expected_length(secs(2500)), secs(100));
}
