use serde::{Deserialize, Serialize};

use crate::{
    error::{FramecastError, FramecastResult},
    mixture::MixtureMode,
};

/// Persisted draft document: the timeline data model as it crosses the wire.
///
/// Field casing follows the established draft JSON shape; this crate consumes
/// and validates the document but does not own file persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Draft {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "relativeResolution")]
    pub relative_resolution: Resolution,

    #[serde(rename = "targetFrameRate")]
    pub target_frame_rate: f32,

    #[serde(rename = "Clips", default)]
    pub clips: Vec<ClipDraft>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    #[serde(rename = "Width")]
    pub width: u32,
    #[serde(rename = "Height")]
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClipType {
    Video,
    Photo,
    SolidColor,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClipDraft {
    pub clip_type: ClipType,
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub layer_index: u32,
    pub start_frame: u32,

    #[serde(default)]
    pub relative_start_frame: u32,

    /// Frame count; the span `[start_frame, start_frame + duration)` is the
    /// clip's timeline placement.
    pub duration: u32,

    /// Source seconds-per-frame. Carried for collaborators that need source
    /// timing; frame mapping itself is index-based.
    #[serde(default)]
    pub frame_time: f32,

    #[serde(default)]
    pub effects: Vec<EffectDescriptor>,

    #[serde(default)]
    pub mixture_mode: MixtureMode,

    #[serde(default)]
    pub mixture_args: Option<serde_json::Value>,

    /// Source path for Video/Photo clips.
    #[serde(default)]
    pub file_path: Option<String>,

    /// Solid-color payload, 16-bit channels.
    #[serde(default)]
    pub r: Option<u16>,
    #[serde(default)]
    pub g: Option<u16>,
    #[serde(default)]
    pub b: Option<u16>,
    /// Optional constant alpha; its presence decides whether the generated
    /// buffer carries an alpha channel.
    #[serde(default)]
    pub a: Option<f32>,
}

/// One entry of a clip's effect stack, parameters still untyped.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EffectDescriptor {
    pub type_name: String,

    #[serde(default)]
    pub parameters: serde_json::Value,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub index: i32,

    #[serde(default)]
    pub relative_width: Option<u32>,

    #[serde(default)]
    pub relative_height: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Draft {
    pub fn from_json(json: &str) -> FramecastResult<Self> {
        let draft: Draft = serde_json::from_str(json)
            .map_err(|e| FramecastError::serde(format!("cannot parse draft JSON: {e}")))?;
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> FramecastResult<()> {
        if self.relative_resolution.width == 0 || self.relative_resolution.height == 0 {
            return Err(FramecastError::invalid_parameter(
                "draft relativeResolution must be positive",
            ));
        }
        if !(self.target_frame_rate > 0.0) {
            return Err(FramecastError::invalid_parameter(
                "draft targetFrameRate must be positive",
            ));
        }
        for clip in &self.clips {
            clip.validate()?;
        }
        Ok(())
    }

    /// First frame index past every clip: the draft's natural length.
    pub fn end_frame(&self) -> u32 {
        self.clips
            .iter()
            .map(|c| c.start_frame.saturating_add(c.duration))
            .max()
            .unwrap_or(0)
    }
}

impl ClipDraft {
    pub fn validate(&self) -> FramecastResult<()> {
        if self.id.trim().is_empty() {
            return Err(FramecastError::invalid_parameter(
                "clip id must be non-empty",
            ));
        }
        if self.duration == 0 {
            return Err(FramecastError::invalid_parameter(format!(
                "clip '{}' duration must be positive",
                self.id
            )));
        }
        match self.clip_type {
            ClipType::Video | ClipType::Photo => {
                if self.file_path.as_deref().is_none_or(str::is_empty) {
                    return Err(FramecastError::invalid_parameter(format!(
                        "clip '{}' requires FilePath",
                        self.id
                    )));
                }
            }
            ClipType::SolidColor => {
                if self.r.is_none() || self.g.is_none() || self.b.is_none() {
                    return Err(FramecastError::invalid_parameter(format!(
                        "solid color clip '{}' requires R, G and B",
                        self.id
                    )));
                }
            }
        }
        if let Some(a) = self.a
            && !(0.0..=1.0).contains(&a)
        {
            return Err(FramecastError::invalid_parameter(format!(
                "clip '{}' alpha must be in [0, 1]",
                self.id
            )));
        }
        for fx in &self.effects {
            if fx.type_name.trim().is_empty() {
                return Err(FramecastError::invalid_parameter(format!(
                    "clip '{}' has an effect with an empty TypeName",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
