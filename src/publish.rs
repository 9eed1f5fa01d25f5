//! Uploading rendered cuts to the publishing target

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::auth::{CredentialStore, OAuthClient, Token};
use crate::clips::MaterializedCut;
use crate::errors::{PipelineError, PipelineResult};
use crate::rendition::{RenditionSet, RenditionVariant};

pub const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
pub const DEFAULT_CATEGORY_ID: &str = "22";
pub const DEFAULT_PRIVACY: &str = "unlisted";
const VERTICAL_SUFFIX: &str = " (Vertical)";

/// Metadata sent with an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
}

impl UploadRequest {
    pub fn new(title: impl Into<String>, description: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            tags,
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy_status: DEFAULT_PRIVACY.to_string(),
        }
    }

    /// Resource body of the upload session
    pub fn resource(&self) -> serde_json::Value {
        serde_json::json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy_status,
            }
        })
    }
}

/// A destination for finished clips
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Upload a file and return the id assigned by the target
    async fn upload(&self, file: &Path, request: &UploadRequest) -> PipelineResult<String>;
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Resumable uploads to the YouTube Data API
pub struct YouTubePublisher {
    client: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    oauth: Option<OAuthClient>,
    endpoint: String,
}

impl YouTubePublisher {
    pub fn new(store: Arc<dyn CredentialStore>, oauth: Option<OAuthClient>) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3600))
            .build()?;
        Ok(Self {
            client,
            store,
            oauth,
            endpoint: UPLOAD_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn session_url(&self) -> String {
        format!("{}?uploadType=resumable&part=snippet,status", self.endpoint)
    }

    async fn refresh(&self, token: &Token) -> PipelineResult<Token> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            PipelineError::Credential("token expired and no client secret to refresh it".to_string())
        })?;
        let fresh = oauth.refresh(token).await?;
        self.store.save(&fresh).await?;
        info!("🔑 Access token refreshed");
        Ok(fresh)
    }

    async fn current_token(&self) -> PipelineResult<Token> {
        let token = self.store.load().await?;
        if self.store.is_expired(&token, Utc::now()) {
            return self.refresh(&token).await;
        }
        Ok(token)
    }

    async fn open_session(
        &self,
        token: &Token,
        request: &UploadRequest,
        length: u64,
    ) -> PipelineResult<std::result::Result<String, reqwest::StatusCode>> {
        let response = self
            .client
            .post(self.session_url())
            .bearer_auth(&token.access_token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", length.to_string())
            .json(&request.resource())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(Err(status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Transport(format!(
                "upload session returned {}: {}",
                status, body
            )));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                PipelineError::Transport("upload session has no Location header".to_string())
            })?;
        Ok(Ok(location.to_string()))
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    async fn upload(&self, file: &Path, request: &UploadRequest) -> PipelineResult<String> {
        let length = tokio::fs::metadata(file).await?.len();
        let mut token = self.current_token().await?;

        let mut session = self.open_session(&token, request, length).await?;
        if session.is_err() {
            debug!("Upload session rejected the token, refreshing once");
            token = self.refresh(&token).await?;
            session = self.open_session(&token, request, length).await?;
        }
        let location = session.map_err(|status| {
            PipelineError::Credential(format!("upload rejected with {}", status))
        })?;

        let source = tokio::fs::File::open(file).await?;
        let response = self
            .client
            .put(&location)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::CONTENT_TYPE, "video/*")
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(source)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Transport(format!(
                "upload of {} returned {}: {}",
                file.display(),
                status,
                body
            )));
        }

        let uploaded: UploadedVideo = response
            .json()
            .await
            .map_err(|e| PipelineError::Transport(format!("invalid upload response: {}", e)))?;
        Ok(uploaded.id)
    }
}

/// Records uploads instead of sending them
#[derive(Default)]
pub struct MockPublisher {
    uploads: Mutex<Vec<(PathBuf, UploadRequest)>>,
    fail: bool,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<(PathBuf, UploadRequest)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn upload(&self, file: &Path, request: &UploadRequest) -> PipelineResult<String> {
        if self.fail {
            return Err(PipelineError::Credential("mock publisher rejects uploads".to_string()));
        }
        let mut uploads = self
            .uploads
            .lock()
            .map_err(|_| PipelineError::Transport("mock publisher poisoned".to_string()))?;
        uploads.push((file.to_path_buf(), request.clone()));
        Ok(format!("mock-{}", uploads.len()))
    }
}

/// One upload attempt of a cut's variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedVariant {
    pub variant: String,
    pub file: PathBuf,
    pub video_id: Option<String>,
    pub error: Option<String>,
}

/// Upload the publishable variants of a cut.
///
/// Nothing is uploaded when the cut has no metadata. The horizontal-publishable
/// variant goes first, then the vertical one titled with a `(Vertical)` suffix.
pub async fn publish_cut(
    publisher: &dyn Publisher,
    cut: &MaterializedCut,
    renditions: &RenditionSet,
) -> Vec<PublishedVariant> {
    let Some(metadata) = &cut.metadata else {
        warn!("No metadata for '{}', upload skipped", cut.title);
        return Vec::new();
    };

    let mut published = Vec::new();
    let targets = [
        (RenditionVariant::HorizontalPublishable, metadata.title.clone()),
        (
            RenditionVariant::Vertical,
            format!("{}{}", metadata.title, VERTICAL_SUFFIX),
        ),
    ];

    for (variant, title) in targets {
        let Some(file) = renditions.get(variant) else {
            debug!("No {} variant of '{}' to upload", variant, cut.title);
            continue;
        };

        let request = UploadRequest::new(title, metadata.description.clone(), metadata.tags.clone());
        info!("📤 Uploading {} variant of '{}'", variant, cut.title);

        let outcome = match publisher.upload(file, &request).await {
            Ok(video_id) => {
                info!("✅ Uploaded '{}' as {}", request.title, video_id);
                PublishedVariant {
                    variant: variant.to_string(),
                    file: file.to_path_buf(),
                    video_id: Some(video_id),
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    "Upload of {} variant of '{}' (segment {}) failed: {}",
                    variant, cut.title, cut.segment_index, e
                );
                PublishedVariant {
                    variant: variant.to_string(),
                    file: file.to_path_buf(),
                    video_id: None,
                    error: Some(e.to_string()),
                }
            }
        };
        published.push(outcome);
    }

    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CutWindow, VideoMetadata};

    fn cut(metadata: Option<VideoMetadata>) -> MaterializedCut {
        MaterializedCut {
            title: "Armbar from guard".to_string(),
            stem: "Armbar from guard".to_string(),
            window: CutWindow::new("Armbar from guard", 10, 70),
            segment_index: 1,
            clip_path: PathBuf::from("/out/vid/horizontal/Armbar from guard.mp4"),
            captioned: true,
            metadata,
        }
    }

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            title: "The armbar everyone misses".to_string(),
            description: "A short breakdown".to_string(),
            tags: vec!["bjj".to_string(), "armbar".to_string()],
            hashtags: vec!["#bjj".to_string()],
        }
    }

    fn renditions(vertical: bool, publishable: bool) -> RenditionSet {
        RenditionSet {
            stem: "Armbar from guard".to_string(),
            horizontal: PathBuf::from("/out/vid/horizontal/Armbar from guard.mp4"),
            cover: None,
            vertical: vertical.then(|| PathBuf::from("/out/vid/vertical/Armbar from guard.mp4")),
            horizontal_publishable: publishable
                .then(|| PathBuf::from("/out/vid/horizontal-yt/Armbar from guard.mp4")),
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_upload_resource() {
        let request = UploadRequest::new("Title", "Desc", vec!["a".to_string()]);
        let resource = request.resource();

        assert_eq!(resource["snippet"]["categoryId"], "22");
        assert_eq!(resource["snippet"]["tags"][0], "a");
        assert_eq!(resource["status"]["privacyStatus"], "unlisted");
    }

    #[tokio::test]
    async fn test_publish_both_variants() {
        let publisher = MockPublisher::new();

        let published = publish_cut(&publisher, &cut(Some(metadata())), &renditions(true, true)).await;

        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|p| p.video_id.is_some()));

        let uploads = publisher.uploads();
        assert_eq!(uploads[0].0, PathBuf::from("/out/vid/horizontal-yt/Armbar from guard.mp4"));
        assert_eq!(uploads[0].1.title, "The armbar everyone misses");
        assert_eq!(uploads[1].1.title, "The armbar everyone misses (Vertical)");
        assert_eq!(uploads[1].1.tags, vec!["bjj", "armbar"]);
    }

    #[tokio::test]
    async fn test_missing_metadata_blocks_upload() {
        let publisher = MockPublisher::new();

        let published = publish_cut(&publisher, &cut(None), &renditions(true, true)).await;

        assert!(published.is_empty());
        assert!(publisher.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_missing_variants_are_not_uploaded() {
        let publisher = MockPublisher::new();

        let published = publish_cut(&publisher, &cut(Some(metadata())), &renditions(false, true)).await;

        assert_eq!(published.len(), 1);
        assert_eq!(published[0].variant, "horizontal-publishable");
    }

    #[tokio::test]
    async fn test_upload_failures_are_reported() {
        let publisher = MockPublisher::failing();

        let published = publish_cut(&publisher, &cut(Some(metadata())), &renditions(true, true)).await;

        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|p| p.error.is_some()));
    }

    #[test]
    fn test_session_url() {
        struct NoStore;
        #[async_trait]
        impl CredentialStore for NoStore {
            async fn load(&self) -> PipelineResult<Token> {
                Err(PipelineError::Credential("none".to_string()))
            }
            async fn save(&self, _token: &Token) -> PipelineResult<()> {
                Ok(())
            }
        }

        let publisher = YouTubePublisher::new(Arc::new(NoStore), None).unwrap();
        assert_eq!(
            publisher.session_url(),
            "https://www.googleapis.com/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status"
        );
    }

    mod http {
        use super::*;
        use crate::auth::FileCredentialStore;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        async fn read_request(socket: &mut TcpStream) -> String {
            let mut data = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                let read = socket.read(&mut buffer).await.unwrap();
                if read == 0 {
                    break;
                }
                data.extend_from_slice(&buffer[..read]);

                let text = String::from_utf8_lossy(&data).into_owned();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if data.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            String::from_utf8_lossy(&data).into_owned()
        }

        /// Answer one connection per canned response, returning the raw requests
        fn serve(listener: TcpListener, responses: Vec<String>) -> tokio::task::JoinHandle<Vec<String>> {
            tokio::spawn(async move {
                let mut requests = Vec::new();
                for response in responses {
                    let (mut socket, _) = listener.accept().await.unwrap();
                    requests.push(read_request(&mut socket).await);
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.unwrap();
                }
                requests
            })
        }

        async fn store(dir: &Path) -> Arc<FileCredentialStore> {
            let store = Arc::new(FileCredentialStore::new(dir.join("token.json")));
            store
                .save(&Token {
                    access_token: "tok-1".to_string(),
                    token_type: "Bearer".to_string(),
                    refresh_token: None,
                    expiry: None,
                })
                .await
                .unwrap();
            store
        }

        #[tokio::test]
        async fn test_resumable_upload_streams_the_file() {
            let dir = tempfile::TempDir::new().unwrap();
            let clip = dir.path().join("clip.mp4");
            tokio::fs::write(&clip, b"clip-bytes").await.unwrap();

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let body = r#"{"id":"yt-42"}"#;
            let server = serve(
                listener,
                vec![
                    format!(
                        "HTTP/1.1 200 OK\r\nLocation: {}/session/1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        base
                    ),
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    ),
                ],
            );

            let publisher = YouTubePublisher::new(store(dir.path()).await, None)
                .unwrap()
                .with_endpoint(format!("{}/upload", base));
            let request = UploadRequest::new("Title", "Desc", vec!["a".to_string()]);

            let video_id = publisher.upload(&clip, &request).await.unwrap();
            assert_eq!(video_id, "yt-42");

            let requests = server.await.unwrap();
            let session = requests[0].to_lowercase();
            assert!(session.starts_with("post /upload?uploadtype=resumable&part=snippet,status"));
            assert!(session.contains("authorization: bearer tok-1"));
            assert!(session.contains("x-upload-content-length: 10"));
            assert!(requests[0].contains(r#""privacyStatus":"unlisted""#));

            assert!(requests[1].starts_with("PUT /session/1"));
            assert!(requests[1].to_lowercase().contains("content-length: 10"));
            assert!(requests[1].ends_with("clip-bytes"));
        }

        #[tokio::test]
        async fn test_rejected_token_without_client_secret() {
            let dir = tempfile::TempDir::new().unwrap();
            let clip = dir.path().join("clip.mp4");
            tokio::fs::write(&clip, b"clip-bytes").await.unwrap();

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let server = serve(
                listener,
                vec!["HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()],
            );

            let publisher = YouTubePublisher::new(store(dir.path()).await, None)
                .unwrap()
                .with_endpoint(format!("{}/upload", base));
            let request = UploadRequest::new("Title", "Desc", Vec::new());

            let err = publisher.upload(&clip, &request).await.unwrap_err();
            assert_eq!(err.kind(), "credential");
            assert_eq!(server.await.unwrap().len(), 1);
        }
    }
}
