use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tracing::{debug, info};

use super::{parse_probe_output, seconds_arg, CoverRequest, MediaTool, OverlayRequest, SliceMode, SliceRequest};
use crate::config::EncodingConfig;
use crate::errors::{PipelineError, PipelineResult};

/// `MediaTool` backed by the ffmpeg and ffprobe binaries
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    encoding: EncodingConfig,
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, encoding: EncodingConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            encoding,
        }
    }

    async fn run(&self, program: &Path, args: &[String], stage: &str) -> PipelineResult<Output> {
        debug!("{} {}", program.display(), args.join(" "));

        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Encoding {
                tool: program.display().to_string(),
                stage: stage.to_string(),
                detail: format!("failed to start: {}", e),
            })?;

        if !output.status.success() {
            return Err(PipelineError::Encoding {
                tool: program.display().to_string(),
                stage: stage.to_string(),
                detail: format!("{}: {}", output.status, stderr_tail(&output.stderr)),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe_duration(&self, path: &Path) -> PipelineResult<Duration> {
        let probe_error = |reason: String| PipelineError::DurationProbe {
            path: path.to_path_buf(),
            reason,
        };

        let output = tokio::process::Command::new(&self.ffprobe)
            .args(probe_args(path))
            .output()
            .await
            .map_err(|e| probe_error(format!("could not run {}: {}", self.ffprobe.display(), e)))?;

        if !output.status.success() {
            return Err(probe_error(format!(
                "{}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = parse_probe_output(&stdout)
            .ok_or_else(|| probe_error(format!("unexpected output '{}'", stdout.trim())))?;

        debug!("Probed {}: {:.1}s", path.display(), duration.as_secs_f64());
        Ok(duration)
    }

    async fn extract_slice(&self, request: &SliceRequest) -> PipelineResult<()> {
        let stage = match request.mode {
            SliceMode::StreamCopy => "segment",
            SliceMode::Reencode => "cut",
        };
        self.run(&self.ffmpeg, &slice_args(request, &self.encoding), stage)
            .await?;
        Ok(())
    }

    async fn burn_captions(&self, input: &Path, captions: &Path, output: &Path) -> PipelineResult<()> {
        info!("🔤 Burning captions into {}", output.display());
        self.run(
            &self.ffmpeg,
            &burn_args(input, captions, output, &self.encoding),
            "burn-in",
        )
        .await?;
        Ok(())
    }

    async fn compose_overlay(&self, request: &OverlayRequest) -> PipelineResult<()> {
        self.run(&self.ffmpeg, &overlay_args(request, &self.encoding), "overlay")
            .await?;
        Ok(())
    }

    async fn render_cover(&self, request: &CoverRequest) -> PipelineResult<()> {
        self.run(&self.ffmpeg, &cover_args(request), "cover").await?;
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn encode_args(encoding: &EncodingConfig) -> Vec<String> {
    vec![
        "-c:a".to_string(),
        encoding.audio_codec.clone(),
        "-c:v".to_string(),
        encoding.video_codec.clone(),
        "-preset".to_string(),
        encoding.preset.clone(),
        "-tune".to_string(),
        encoding.tune.clone(),
        "-crf".to_string(),
        encoding.crf.to_string(),
        "-threads".to_string(),
        encoding.threads.to_string(),
    ]
}

pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path_arg(input),
    ]
}

pub fn slice_args(request: &SliceRequest, encoding: &EncodingConfig) -> Vec<String> {
    let start = seconds_arg(request.start);
    let length = seconds_arg(request.length);
    let input = path_arg(&request.input);

    let mut args = match request.mode {
        SliceMode::StreamCopy => vec![
            "-i".to_string(),
            input,
            "-ss".to_string(),
            start,
            "-t".to_string(),
            length,
            "-c".to_string(),
            "copy".to_string(),
        ],
        SliceMode::Reencode => {
            let mut args = vec![
                "-ss".to_string(),
                start,
                "-i".to_string(),
                input,
                "-t".to_string(),
                length,
            ];
            args.extend(encode_args(encoding));
            args
        }
    };

    args.push("-y".to_string());
    args.push(path_arg(&request.output));
    args
}

pub fn burn_args(input: &Path, captions: &Path, output: &Path, encoding: &EncodingConfig) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        format!(
            "subtitles={}:force_style='{}'",
            escape_filter_value(&path_arg(captions)),
            encoding.subtitle_style
        ),
    ];
    args.extend(encode_args(encoding));
    args.push("-y".to_string());
    args.push(path_arg(output));
    args
}

pub fn overlay_filter(width: u32) -> String {
    format!(
        "[0:v]loop=loop=-1:size=1:start=0[loopbg];[1:v]scale={}:-1[scaled];[loopbg][scaled]overlay=(W-w)/2:(H-h)/2:shortest=1[outv]",
        width
    )
}

pub fn overlay_args(request: &OverlayRequest, encoding: &EncodingConfig) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        path_arg(&request.background),
        "-i".to_string(),
        path_arg(&request.foreground),
        "-filter_complex".to_string(),
        overlay_filter(encoding.overlay_width),
        "-map".to_string(),
        "[outv]".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
    ];
    args.extend(encode_args(encoding));
    args.push("-shortest".to_string());
    args.push("-y".to_string());
    args.push(path_arg(&request.output));
    args
}

pub fn drawtext_filter(request: &CoverRequest) -> String {
    let font = request
        .font_file
        .as_deref()
        .filter(|font| !font.is_empty())
        .map(|font| format!(":fontfile={}", escape_filter_value(font)))
        .unwrap_or_default();

    format!(
        "drawtext=text={}:fontsize={}:fontcolor={}{}:x=(w-text_w)/2:y=(h-text_h)/2{}",
        escape_drawtext(&request.text),
        request.font_size,
        request.font_color,
        font,
        request.font_effect.as_deref().unwrap_or_default()
    )
}

pub fn cover_args(request: &CoverRequest) -> Vec<String> {
    vec![
        "-i".to_string(),
        path_arg(&request.template),
        "-vf".to_string(),
        drawtext_filter(request),
        "-frames:v".to_string(),
        "1".to_string(),
        "-y".to_string(),
        path_arg(&request.output),
    ]
}

/// Prefix every character of `special` with a backslash
fn escape_chars(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape a filter option value for use inside a `-vf` filtergraph.
///
/// The option parser and then the filtergraph parser each strip one level of
/// escaping, so the value is escaped for the option first and the graph second.
pub fn escape_filter_value(value: &str) -> String {
    let option_level = escape_chars(value, &['\\', '\'', ':']);
    escape_chars(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

/// Escape cover text for the drawtext `text=` option, keeping `%` and `\`
/// literal through text expansion
pub fn escape_drawtext(text: &str) -> String {
    escape_filter_value(&escape_chars(text, &['\\', '%']))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding() -> EncodingConfig {
        EncodingConfig::default()
    }

    #[test]
    fn test_probe_args() {
        assert_eq!(
            probe_args(Path::new("/v/abc.mp4")),
            vec![
                "-v",
                "quiet",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                "/v/abc.mp4"
            ]
        );
    }

    #[test]
    fn test_segment_slice_is_stream_copy() {
        let request = SliceRequest {
            input: PathBuf::from("abc.mp4"),
            output: PathBuf::from("abc.part2.mp4"),
            start: Duration::from_secs(1200),
            length: Duration::from_secs(1200),
            mode: SliceMode::StreamCopy,
        };

        assert_eq!(
            slice_args(&request, &encoding()),
            vec!["-i", "abc.mp4", "-ss", "1200", "-t", "1200", "-c", "copy", "-y", "abc.part2.mp4"]
        );
    }

    #[test]
    fn test_cut_slice_reencodes() {
        let request = SliceRequest {
            input: PathBuf::from("seg.mp4"),
            output: PathBuf::from("temp.mp4"),
            start: Duration::from_secs(30),
            length: Duration::from_millis(90_500),
            mode: SliceMode::Reencode,
        };
        let args = slice_args(&request, &encoding());

        assert_eq!(&args[..6], &["-ss", "30", "-i", "seg.mp4", "-t", "90.500"]);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "28"]));
        assert_eq!(args.last().unwrap(), "temp.mp4");
    }

    #[test]
    fn test_burn_args_use_fixed_style() {
        let args = burn_args(
            Path::new("in.mp4"),
            Path::new("/out/temp_x.srt"),
            Path::new("out.mp4"),
            &encoding(),
        );

        assert_eq!(args[2], "-vf");
        assert_eq!(
            args[3],
            "subtitles=/out/temp_x.srt:force_style='FontSize=22,Alignment=2'"
        );
        assert!(args.windows(2).any(|w| w == ["-preset", "ultrafast"]));
        assert!(args.windows(2).any(|w| w == ["-tune", "fastdecode"]));
        assert!(args.windows(2).any(|w| w == ["-threads", "0"]));
    }

    #[test]
    fn test_overlay_args() {
        let request = OverlayRequest {
            background: PathBuf::from("base.png"),
            foreground: PathBuf::from("cut.mp4"),
            output: PathBuf::from("vertical/cut.mp4"),
        };
        let args = overlay_args(&request, &encoding());

        assert_eq!(&args[..4], &["-i", "base.png", "-i", "cut.mp4"]);
        assert_eq!(
            args[5],
            "[0:v]loop=loop=-1:size=1:start=0[loopbg];[1:v]scale=1080:-1[scaled];[loopbg][scaled]overlay=(W-w)/2:(H-h)/2:shortest=1[outv]"
        );
        assert!(args.windows(2).any(|w| w == ["-map", "[outv]"]));
        assert!(args.windows(2).any(|w| w == ["-map", "1:a"]));
        assert!(args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_cover_filter_defaults_and_effect() {
        let mut request = CoverRequest {
            template: PathBuf::from("cover.png"),
            output: PathBuf::from("covers/t.jpg"),
            text: "Guard pass\n100%".to_string(),
            font_file: None,
            font_size: 36,
            font_color: "white".to_string(),
            font_effect: None,
        };

        assert_eq!(
            drawtext_filter(&request),
            "drawtext=text=Guard pass\n100\\\\\\\\%:fontsize=36:fontcolor=white:x=(w-text_w)/2:y=(h-text_h)/2"
        );

        request.font_file = Some("/fonts/Bold.ttf".to_string());
        request.font_effect = Some(":borderw=2:bordercolor=black".to_string());
        assert_eq!(
            drawtext_filter(&request),
            "drawtext=text=Guard pass\n100\\\\\\\\%:fontsize=36:fontcolor=white:fontfile=/fonts/Bold.ttf:x=(w-text_w)/2:y=(h-text_h)/2:borderw=2:bordercolor=black"
        );

        let args = cover_args(&request);
        assert!(args.windows(2).any(|w| w == ["-frames:v", "1"]));
    }

    #[test]
    fn test_drawtext_escaping() {
        assert_eq!(escape_drawtext(r"a\b"), r"a\\\\\\\\b");
        assert_eq!(escape_drawtext("it's"), r"it\\\'s");
        assert_eq!(escape_drawtext("10:30"), r"10\\:30");
        assert_eq!(escape_drawtext("50%"), r"50\\\\%");
        assert_eq!(escape_drawtext("one, two [three]"), r"one\, two \[three\]");
    }

    #[test]
    fn test_filter_value_escaping() {
        assert_eq!(escape_filter_value("C:\\clips\\a.srt"), r"C\\:\\\\clips\\\\a.srt");
        assert_eq!(escape_filter_value("/tmp/a,b.srt"), r"/tmp/a\,b.srt");
        assert_eq!(escape_filter_value("/out/Don't Stop.srt"), r"/out/Don\\\'t Stop.srt");
    }

    #[test]
    fn test_burn_args_escape_apostrophe_titles() {
        let args = burn_args(
            Path::new("in.mp4"),
            Path::new("/out/temp_s1_Don't Stop.srt"),
            Path::new("out.mp4"),
            &encoding(),
        );

        assert_eq!(
            args[3],
            r"subtitles=/out/temp_s1_Don\\\'t Stop.srt:force_style='FontSize=22,Alignment=2'"
        );
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let tail = stderr_tail(b"one\ntwo\n\nthree\nfour\n");
        assert_eq!(tail, "two | three | four");
    }

    #[tokio::test]
    async fn test_missing_binary_is_encoding_error() {
        let tool = FfmpegTool::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe", encoding());

        let err = tool
            .burn_captions(Path::new("a"), Path::new("b"), Path::new("c"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "encoding");

        let err = tool.probe_duration(Path::new("a.mp4")).await.unwrap_err();
        assert!(err.is_fatal_for_video());
    }
}
