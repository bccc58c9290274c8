use super::Encoder;
use crate::common::error::JobError;
use crate::infrastructure::storage::ChunkStream;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

/// ffmpeg invocation producing a three-rung HLS ladder (360p/720p/1080p) with
/// a master manifest, reading the source from stdin. The ladder is a
/// deployment parameter, not a per-job input.
pub struct FfmpegEncoder;

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self
    }

    fn hls_args(output_dir: &Path) -> Vec<String> {
        let segments = output_dir.join("stream_%v").join("seg_%03d.ts");
        let playlists = output_dir.join("stream_%v").join("playlist.m3u8");

        let mut args: Vec<String> = [
            "-y",
            "-fflags",
            "+genpts",
            "-i",
            "pipe:0",
            "-filter_complex",
            "[0:v]split=3[v1][v2][v3];\
             [v1]scale=w=640:h=360:force_original_aspect_ratio=decrease[v360];\
             [v2]scale=w=1280:h=720:force_original_aspect_ratio=decrease[v720];\
             [v3]scale=w=1920:h=1080:force_original_aspect_ratio=decrease[v1080]",
            // 360p
            "-map", "[v360]", "-map", "a:0",
            "-c:v:0", "libx264", "-b:v:0", "800k", "-maxrate:v:0", "800k", "-bufsize:v:0", "1200k",
            "-c:a:0", "aac", "-b:a:0", "96k",
            // 720p
            "-map", "[v720]", "-map", "a:0",
            "-c:v:1", "libx264", "-b:v:1", "2000k", "-maxrate:v:1", "2000k", "-bufsize:v:1", "3000k",
            "-c:a:1", "aac", "-b:a:1", "128k",
            // 1080p
            "-map", "[v1080]", "-map", "a:0",
            "-c:v:2", "libx264", "-b:v:2", "5000k", "-maxrate:v:2", "5000k", "-bufsize:v:2", "7500k",
            "-c:a:2", "aac", "-b:a:2", "192k",
            "-preset", "veryfast",
            "-f", "hls",
            "-hls_time", "6",
            "-hls_playlist_type", "vod",
            "-hls_segment_filename",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(segments.to_string_lossy().into_owned());
        args.extend(
            [
                "-hls_flags",
                "independent_segments+split_by_time",
                "-master_pl_name",
                "master.m3u8",
                "-var_stream_map",
                "v:0,a:0,name:360p v:1,a:1,name:720p v:2,a:2,name:1080p",
            ]
            .map(String::from),
        );
        args.push(playlists.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn run(&self, input: ChunkStream, output_dir: &Path) -> Result<i32, JobError> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(Self::hls_args(output_dir));
        drive(cmd, input).await
    }
}

/// Spawns `cmd` with a piped stdin and stderr and runs the two activities the
/// contract requires concurrently: a feeder writing chunks to stdin and a
/// drainer forwarding diagnostics to the log. An unread stderr pipe would
/// block the child once the pipe buffer fills, so the drainer runs for the
/// whole life of the process. Stdin is closed exactly once, by dropping the
/// handle at the end of the feeder on every path.
async fn drive(mut cmd: Command, mut input: ChunkStream) -> Result<i32, JobError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child: Child = cmd.spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("encoder stdin not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("encoder stderr not captured"))?;

    let feeder = async move {
        let mut source_error = None;
        while let Some(chunk) = input.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        // The child stopped reading; its exit code tells the story.
                        debug!("encoder stdin closed early: {e}");
                        break;
                    }
                }
                Err(e) => {
                    source_error = Some(e);
                    break;
                }
            }
        }
        drop(stdin);
        source_error
    };

    let drainer = async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "encoder", "{line}");
        }
    };

    let (source_error, ()) = tokio::join!(feeder, drainer);
    let status = child.wait().await?;

    // A failing source outranks whatever code the starved encoder returned.
    if let Some(e) = source_error {
        return Err(e.into());
    }
    Ok(status.code().unwrap_or(-1))
}
