use std::path::PathBuf;

use crate::{
    decode::{self, FrameDecoder},
    error::{FramecastError, FramecastResult},
    mixture::{MixtureArgs, MixtureMode},
    model::{ClipDraft, ClipType, EffectDescriptor},
    picture::{Picture, fit_dimensions},
};

/// Source payload of a clip.
pub enum ClipSource {
    Video { path: PathBuf },
    Photo { path: PathBuf },
    SolidColor { r: u16, g: u16, b: u16, alpha: Option<f32> },
}

impl std::fmt::Debug for ClipSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClipSource::Video { path } => f.debug_struct("Video").field("path", path).finish(),
            ClipSource::Photo { path } => f.debug_struct("Photo").field("path", path).finish(),
            ClipSource::SolidColor { r, g, b, alpha } => f
                .debug_struct("SolidColor")
                .field("r", r)
                .field("g", g)
                .field("b", b)
                .field("alpha", alpha)
                .finish(),
        }
    }
}

enum ClipState {
    Uninitialized,
    Ready(ReadySource),
    Closed,
}

enum ReadySource {
    Decoder(Box<dyn FrameDecoder>),
    Still(Picture),
    Solid { r: u16, g: u16, b: u16, alpha: Option<f32> },
}

/// A placed clip: timeline span, layer, blend configuration and a bound
/// source.
///
/// Lifecycle: `Uninitialized -> re_init -> Ready -> get_frame* -> dispose`.
/// `get_frame` before `re_init` is a programming error and fails with
/// [`FramecastError::NotInitialized`].
pub struct ClipRecord {
    pub id: String,
    pub name: String,
    pub layer_index: u32,
    pub start_frame: u32,
    pub relative_start_frame: u32,
    pub duration: u32,
    pub frame_time: f32,
    pub mixture_mode: MixtureMode,
    pub mixture_args: MixtureArgs,
    pub effects: Vec<EffectDescriptor>,
    pub source: ClipSource,
    state: ClipState,
}

impl std::fmt::Debug for ClipRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipRecord")
            .field("id", &self.id)
            .field("layer_index", &self.layer_index)
            .field("start_frame", &self.start_frame)
            .field("duration", &self.duration)
            .field("source", &self.source)
            .finish()
    }
}

impl ClipRecord {
    pub fn from_draft(draft: &ClipDraft) -> FramecastResult<Self> {
        draft.validate()?;
        let source = match draft.clip_type {
            ClipType::Video => ClipSource::Video {
                path: PathBuf::from(draft.file_path.clone().unwrap_or_default()),
            },
            ClipType::Photo => ClipSource::Photo {
                path: PathBuf::from(draft.file_path.clone().unwrap_or_default()),
            },
            ClipType::SolidColor => ClipSource::SolidColor {
                r: draft.r.unwrap_or(0),
                g: draft.g.unwrap_or(0),
                b: draft.b.unwrap_or(0),
                alpha: draft.a,
            },
        };
        Ok(Self {
            id: draft.id.clone(),
            name: draft.name.clone(),
            layer_index: draft.layer_index,
            start_frame: draft.start_frame,
            relative_start_frame: draft.relative_start_frame,
            duration: draft.duration,
            frame_time: draft.frame_time,
            mixture_mode: draft.mixture_mode,
            mixture_args: MixtureArgs::from_json(draft.mixture_args.as_ref())?,
            effects: draft.effects.clone(),
            source,
            state: ClipState::Uninitialized,
        })
    }

    /// Direct constructor for programmatic timelines.
    pub fn new(id: impl Into<String>, layer_index: u32, start_frame: u32, duration: u32, source: ClipSource) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            layer_index,
            start_frame,
            relative_start_frame: 0,
            duration,
            frame_time: 0.0,
            mixture_mode: MixtureMode::Overlay,
            mixture_args: MixtureArgs::default(),
            effects: Vec::new(),
            source,
            state: ClipState::Uninitialized,
        }
    }

    pub fn with_mixture(mut self, mode: MixtureMode, args: MixtureArgs) -> Self {
        self.mixture_mode = mode;
        self.mixture_args = args;
        self
    }

    pub fn with_effects(mut self, effects: Vec<EffectDescriptor>) -> Self {
        self.effects = effects;
        self
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ClipState::Ready(_))
    }

    /// First frame index past the clip's span.
    pub fn end_frame(&self) -> u32 {
        self.start_frame.saturating_add(self.duration)
    }

    /// Bind the underlying source: open the decoder, load the image, or
    /// no-op for solid color. Re-entrant; call again after the source file
    /// changed to reload it.
    pub fn re_init(&mut self) -> FramecastResult<()> {
        let ready = match &self.source {
            ClipSource::Video { path } => ReadySource::Decoder(decode::open_source(path)?),
            ClipSource::Photo { path } => ReadySource::Still(Picture::open(path)?),
            ClipSource::SolidColor { r, g, b, alpha } => ReadySource::Solid {
                r: *r,
                g: *g,
                b: *b,
                alpha: *alpha,
            },
        };
        self.state = ClipState::Ready(ready);
        Ok(())
    }

    /// Release the bound source. `get_frame` fails until `re_init` is called
    /// again.
    pub fn dispose(&mut self) {
        self.state = ClipState::Closed;
    }

    /// Map an absolute timeline frame to a source-relative index.
    ///
    /// `Ok(None)` marks the frame exactly at `start + duration`: a rounding
    /// artifact downstream treats as a black filler, not an error.
    pub fn relative_frame_index(&self, target_frame: u32) -> FramecastResult<Option<u32>> {
        let offset = target_frame as i64 - self.start_frame as i64;
        if offset == self.duration as i64 {
            return Ok(None);
        }
        if offset < 0 || offset >= self.duration as i64 {
            return Err(FramecastError::out_of_range(format!(
                "frame #{target_frame} is not in clip [{}, {})",
                self.start_frame,
                self.end_frame()
            )));
        }
        let source = self.relative_start_frame as i64 + offset;
        u32::try_from(source)
            .map(Some)
            .map_err(|_| {
                FramecastError::out_of_range(format!(
                    "frame mapping overflow for frame #{target_frame}"
                ))
            })
    }

    /// Produce this clip's picture for an absolute timeline frame, scaled
    /// toward `target_width x target_height`.
    ///
    /// `force_resize` stretches to the exact target; otherwise the frame is
    /// fitted inside it preserving aspect. Solid color sources generate at
    /// the target size directly.
    pub fn get_frame(
        &self,
        target_frame: u32,
        target_width: u32,
        target_height: u32,
        force_resize: bool,
    ) -> FramecastResult<Picture> {
        let ready = match &self.state {
            ClipState::Ready(r) => r,
            ClipState::Uninitialized => {
                return Err(FramecastError::not_initialized(format!(
                    "clip '{}' used before re_init",
                    self.id
                )));
            }
            ClipState::Closed => {
                return Err(FramecastError::not_initialized(format!(
                    "clip '{}' used after dispose",
                    self.id
                )));
            }
        };

        let Some(source_index) = self.relative_frame_index(target_frame)? else {
            return Ok(Picture::black(target_width, target_height));
        };

        let frame = match ready {
            ReadySource::Solid { r, g, b, alpha } => {
                return Ok(Picture::solid(target_width, target_height, *r, *g, *b, *alpha));
            }
            ReadySource::Still(picture) => picture.clone(),
            ReadySource::Decoder(decoder) => decoder.get_frame(source_index)?,
        };

        if frame.width() == target_width && frame.height() == target_height {
            return Ok(frame);
        }
        if force_resize {
            frame.resize(target_width, target_height, true)
        } else {
            let (w, h) = fit_dimensions(frame.width(), frame.height(), target_width, target_height);
            frame.resize(w, h, true)
        }
    }
}
