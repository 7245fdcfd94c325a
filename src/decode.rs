use std::path::{Path, PathBuf};

use crate::{
    error::{FramecastError, FramecastResult},
    picture::Picture,
};

/// Frame source collaborator. Video container demuxing lives behind this
/// trait; the crate ships image-backed implementations and leaves codec work
/// to external services.
pub trait FrameDecoder: Send + Sync {
    fn total_frames(&self) -> u32;
    fn fps(&self) -> f32;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn get_frame(&self, frame_index: u32) -> FramecastResult<Picture>;
}

/// Frame consumer collaborator for batch rendering.
pub trait FrameSink {
    fn append(&mut self, frame_index: u32, picture: &Picture) -> FramecastResult<()>;
    fn finish(&mut self) -> FramecastResult<()>;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "tif", "webp"];

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Open a frame source.
///
/// A directory becomes an [`ImageSequenceDecoder`] over its image files in
/// name order; a single image file becomes a [`StillImageDecoder`]. Anything
/// else (video containers in particular) needs an external decoder service.
pub fn open_source(path: impl AsRef<Path>) -> FramecastResult<Box<dyn FrameDecoder>> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceDecoder::open(path)?));
    }
    if is_image_path(path) {
        return Ok(Box::new(StillImageDecoder::open(path)?));
    }
    Err(FramecastError::unsupported_operation(format!(
        "no built-in decoder for '{}'; container formats require an external decoder",
        path.display()
    )))
}

/// Decoder over a directory of numbered image files.
///
/// Files are decoded on demand, so `get_frame` is safe to call from multiple
/// worker threads.
pub struct ImageSequenceDecoder {
    frames: Vec<PathBuf>,
    width: u32,
    height: u32,
    fps: f32,
}

impl ImageSequenceDecoder {
    pub fn open(dir: impl AsRef<Path>) -> FramecastResult<Self> {
        let dir = dir.as_ref();
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_path(p))
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(FramecastError::invalid_parameter(format!(
                "image sequence directory '{}' contains no image files",
                dir.display()
            )));
        }
        let first = Picture::open(&frames[0])?;
        Ok(Self {
            frames,
            width: first.width(),
            height: first.height(),
            fps: 0.0,
        })
    }

    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = fps;
        self
    }
}

impl FrameDecoder for ImageSequenceDecoder {
    fn total_frames(&self) -> u32 {
        self.frames.len() as u32
    }

    fn fps(&self) -> f32 {
        self.fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn get_frame(&self, frame_index: u32) -> FramecastResult<Picture> {
        let path = self.frames.get(frame_index as usize).ok_or_else(|| {
            FramecastError::out_of_range(format!(
                "frame #{frame_index} is not in source [0, {})",
                self.frames.len()
            ))
        })?;
        Picture::open(path)
    }
}

/// Single still image exposed as an endless frame source; every frame index
/// maps to the same picture.
pub struct StillImageDecoder {
    picture: Picture,
}

impl StillImageDecoder {
    pub fn open(path: impl AsRef<Path>) -> FramecastResult<Self> {
        Ok(Self {
            picture: Picture::open(path)?,
        })
    }

    pub fn from_picture(picture: Picture) -> Self {
        Self { picture }
    }
}

impl FrameDecoder for StillImageDecoder {
    fn total_frames(&self) -> u32 {
        u32::MAX
    }

    fn fps(&self) -> f32 {
        0.0
    }

    fn width(&self) -> u32 {
        self.picture.width()
    }

    fn height(&self) -> u32 {
        self.picture.height()
    }

    fn get_frame(&self, _frame_index: u32) -> FramecastResult<Picture> {
        Ok(self.picture.clone())
    }
}

/// Writes frames as `frame_000042.png` into a directory.
pub struct PngDirectorySink {
    dir: PathBuf,
    appended: u64,
}

impl PngDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> FramecastResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, appended: 0 })
    }

    pub fn appended(&self) -> u64 {
        self.appended
    }
}

impl FrameSink for PngDirectorySink {
    fn append(&mut self, frame_index: u32, picture: &Picture) -> FramecastResult<()> {
        let path = self.dir.join(format!("frame_{frame_index:06}.png"));
        picture
            .to_rgba16()
            .save(&path)
            .map_err(|e| FramecastError::Other(anyhow::anyhow!(
                "cannot write '{}': {e}",
                path.display()
            )))?;
        self.appended += 1;
        Ok(())
    }

    fn finish(&mut self) -> FramecastResult<()> {
        Ok(())
    }
}

/// Test-friendly sink collecting frames in memory.
#[derive(Default)]
pub struct MemorySink {
    pub frames: Vec<(u32, Picture)>,
    pub finished: bool,
}

impl FrameSink for MemorySink {
    fn append(&mut self, frame_index: u32, picture: &Picture) -> FramecastResult<()> {
        self.frames.push((frame_index, picture.clone()));
        Ok(())
    }

    fn finish(&mut self) -> FramecastResult<()> {
        self.finished = true;
        Ok(())
    }
}
