//! FFmpeg-based video composer.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::config::FfmpegComposerConfig;
use super::error::GenerationError;
use super::traits::GeneratorAdapter;
use super::types::GenerationTask;
use crate::artifact::{Artifact, ArtifactMetadata, ArtifactStore};
use crate::job::ContentType;

/// Lines of ffmpeg stderr kept in an error message.
const STDERR_TAIL_LINES: usize = 8;

/// Composes a still illustration and a narration track into an MP4.
pub struct FfmpegComposer {
    config: FfmpegComposerConfig,
    store: Arc<dyn ArtifactStore>,
}

/// Parse a `WIDTHxHEIGHT` resolution string.
pub(crate) fn parse_resolution(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.trim().split_once(['x', 'X'])?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().parse().ok()?;
    // libx264 with yuv420p needs even dimensions.
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return None;
    }
    Some((width, height))
}

impl FfmpegComposer {
    /// Creates a new composer with the given configuration.
    pub fn new(config: FfmpegComposerConfig, store: Arc<dyn ArtifactStore>) -> Self {
        Self { config, store }
    }

    /// Creates a composer with default configuration.
    pub fn with_defaults(store: Arc<dyn ArtifactStore>) -> Self {
        Self::new(FfmpegComposerConfig::default(), store)
    }

    /// Builds ffmpeg arguments for a still-image + audio composition.
    fn build_compose_args(
        &self,
        image: &Path,
        audio: &Path,
        output: &Path,
        (width, height): (u32, u32),
        fps: u32,
    ) -> Vec<String> {
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,format=yuv420p",
            w = width,
            h = height
        );

        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-loop".to_string(),
            "1".to_string(),
            "-i".to_string(),
            image.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-vf".to_string(),
            filter,
            "-r".to_string(),
            fps.to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-tune".to_string(),
            "stillimage".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-shortest".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ];

        args.extend(self.config.extra_args.iter().cloned());
        args.push("-f".to_string());
        args.push("mp4".to_string());
        args.push(output.to_string_lossy().to_string());
        args
    }

    fn resolution_for(&self, task: &GenerationTask) -> Result<(u32, u32), GenerationError> {
        let raw = task
            .param_str("resolution")
            .unwrap_or(&self.config.default_resolution);
        parse_resolution(raw)
            .ok_or_else(|| GenerationError::invalid_input(format!("invalid resolution: {}", raw)))
    }

    fn fps_for(&self, task: &GenerationTask) -> Result<u32, GenerationError> {
        match task.params.get("fps") {
            None => Ok(self.config.default_fps),
            Some(value) => value
                .as_u64()
                .filter(|fps| (1..=120).contains(fps))
                .map(|fps| fps as u32)
                .ok_or_else(|| GenerationError::invalid_input(format!("invalid fps: {}", value))),
        }
    }

    /// Runs ffmpeg in a fresh scratch directory and returns the composed bytes.
    ///
    /// The directory is removed when the returned future completes or is dropped.
    async fn compose(
        &self,
        task: &GenerationTask,
    ) -> Result<(Vec<u8>, ArtifactMetadata), GenerationError> {
        let illustration = task.inputs.illustration.as_ref().ok_or_else(|| {
            GenerationError::invalid_input("video job has no illustration input")
        })?;
        let audio = task
            .inputs
            .audio
            .as_ref()
            .ok_or_else(|| GenerationError::invalid_input("video job has no audio input"))?;

        let resolution = self.resolution_for(task)?;
        let fps = self.fps_for(task)?;

        let image_bytes = self.store.get(&illustration.content_hash).await?;
        let audio_bytes = self.store.get(&audio.content_hash).await?;

        let scratch_dir = &self.config.scratch_dir;
        tokio::fs::create_dir_all(scratch_dir)
            .await
            .map_err(|e| GenerationError::unknown(format!("failed to create scratch dir: {}", e)))?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", task.job_id, task.attempt))
            .tempdir_in(scratch_dir)
            .map_err(|e| GenerationError::unknown(format!("failed to create scratch dir: {}", e)))?;
        let workdir = scratch.path();

        let image_path = workdir.join("illustration");
        let audio_path = workdir.join("narration");
        let output_path = workdir.join("video.mp4");

        for (path, bytes) in [(&image_path, &image_bytes), (&audio_path, &audio_bytes)] {
            tokio::fs::write(path, bytes).await.map_err(|e| {
                GenerationError::unknown(format!("failed to write {}: {}", path.display(), e))
            })?;
        }

        let args = self.build_compose_args(&image_path, &audio_path, &output_path, resolution, fps);
        debug!(job_id = %task.job_id, args = ?args, "Running ffmpeg");

        let start = Instant::now();
        let output = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    GenerationError::provider_unavailable(format!(
                        "ffmpeg not found at path: {}",
                        self.config.ffmpeg_path.display()
                    ))
                } else {
                    GenerationError::unknown(format!("failed to run ffmpeg: {}", e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(GenerationError::unknown(format!(
                "ffmpeg exited with code {:?}: {}",
                output.status.code(),
                tail.join("\n")
            )));
        }

        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|_| GenerationError::unknown("ffmpeg produced no output file"))?;

        let mut metadata = ArtifactMetadata::new();
        metadata.insert("mime_type".into(), "video/mp4".into());
        metadata.insert(
            "resolution".into(),
            format!("{}x{}", resolution.0, resolution.1).into(),
        );
        metadata.insert("fps".into(), fps.into());
        metadata.insert("illustration".into(), illustration.content_hash.clone().into());
        metadata.insert("audio".into(), audio.content_hash.clone().into());
        metadata.insert(
            "compose_ms".into(),
            (start.elapsed().as_millis() as u64).into(),
        );

        Ok((bytes, metadata))
    }

}

#[async_trait]
impl GeneratorAdapter for FfmpegComposer {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn capability(&self) -> ContentType {
        ContentType::Video
    }

    async fn generate(&self, task: GenerationTask) -> Result<Artifact, GenerationError> {
        let (bytes, metadata) = self.compose(&task).await?;
        let artifact = self.store.put(bytes, ContentType::Video, metadata).await?;
        Ok(artifact)
    }

    async fn validate(&self) -> Result<(), GenerationError> {
        let result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) if status.success() => {}
            Ok(status) => {
                return Err(GenerationError::provider_unavailable(format!(
                    "ffmpeg -version exited with {:?}",
                    status.code()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GenerationError::provider_unavailable(format!(
                    "ffmpeg not found at path: {}",
                    self.config.ffmpeg_path.display()
                )))
            }
            Err(e) => return Err(GenerationError::unknown(e.to_string())),
        }

        parse_resolution(&self.config.default_resolution).ok_or_else(|| {
            GenerationError::invalid_input(format!(
                "invalid default resolution: {}",
                self.config.default_resolution
            ))
        })?;

        Ok(())
    }
}
