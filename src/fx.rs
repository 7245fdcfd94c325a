use crate::{
    compute::{AcceleratorHandle, Kernel},
    error::{FramecastError, FramecastResult},
    mixture::{self, MixtureArgs},
    model::EffectDescriptor,
    picture::{BitMask, Picture, fit_dimensions},
};

/// A parsed, validated effect instance. `parse_effect` is the only
/// constructor path; the variant set is closed.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Crop {
        start_x: u32,
        start_y: u32,
        width: u32,
        height: u32,
    },
    Place {
        start_x: i64,
        start_y: i64,
    },
    Resize {
        width: u32,
        height: u32,
        preserve_aspect: bool,
    },
    RemoveColor {
        key: (u16, u16, u16),
        tolerance: u16,
    },
    ColorCorrection {
        brightness: f32,
        contrast: f32,
        saturation: f32,
    },
    ReplaceAlpha {
        alpha: f32,
    },
    /// Continuous: interpolates a centered crop from the full frame toward
    /// `target` over `[start_point, end_point]`, then scales back up.
    ZoomIn {
        target_x: u32,
        target_y: u32,
        start_point: u32,
        end_point: u32,
    },
    /// Continuous: seeded pseudo-random offset within
    /// `[-max_offset, +max_offset]` per axis.
    Jitter {
        max_offset_x: i64,
        max_offset_y: i64,
        seed: u64,
    },
}

/// Frame-scoped context handed to every effect application.
pub struct EffectContext<'a> {
    pub frame_index: u32,
    /// Owning clip's absolute span, used to bind unbound continuous effects.
    pub clip_start: u32,
    pub clip_end: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub backend: &'a AcceleratorHandle,
}

/// Build a typed effect from a descriptor, rescaling spatial parameters when
/// the descriptor was authored against a different reference resolution.
pub fn parse_effect(
    desc: &EffectDescriptor,
    target_width: u32,
    target_height: u32,
) -> FramecastResult<Effect> {
    let kind = desc.type_name.trim();
    if kind.is_empty() {
        return Err(FramecastError::invalid_parameter(
            "effect type name must be non-empty",
        ));
    }
    let sx = Rescale::new(desc.relative_width, target_width);
    let sy = Rescale::new(desc.relative_height, target_height);
    let p = &desc.parameters;

    match kind.to_ascii_lowercase().as_str() {
        "crop" => {
            let width = get_u32(p, "Width")?;
            let height = get_u32(p, "Height")?;
            if width == 0 || height == 0 {
                return Err(FramecastError::invalid_parameter(
                    "Crop.Width and Crop.Height must be positive",
                ));
            }
            Ok(Effect::Crop {
                start_x: sx.offset_u32(get_u32(p, "StartX")?),
                start_y: sy.offset_u32(get_u32(p, "StartY")?),
                width: sx.size(width),
                height: sy.size(height),
            })
        }
        "place" => Ok(Effect::Place {
            start_x: sx.offset_i64(get_i64(p, "StartX")?),
            start_y: sy.offset_i64(get_i64(p, "StartY")?),
        }),
        "resize" => {
            let width = get_u32(p, "Width")?;
            let height = get_u32(p, "Height")?;
            if width == 0 || height == 0 {
                return Err(FramecastError::invalid_parameter(
                    "Resize.Width and Resize.Height must be positive",
                ));
            }
            Ok(Effect::Resize {
                width: sx.size(width),
                height: sy.size(height),
                preserve_aspect: get_bool(p, "PreserveAspectRatio").unwrap_or(false),
            })
        }
        "removecolor" | "remove_color" => Ok(Effect::RemoveColor {
            key: (get_u16(p, "R")?, get_u16(p, "G")?, get_u16(p, "B")?),
            tolerance: get_u16(p, "Tolerance")?,
        }),
        "colorcorrection" | "color_correction" => {
            let brightness = get_f32(p, "Brightness")?;
            let contrast = get_f32(p, "Contrast")?;
            let saturation = match p.get("Saturation") {
                Some(_) => get_f32(p, "Saturation")?,
                None => 1.0,
            };
            if brightness < 0.0 || contrast < 0.0 || saturation < 0.0 {
                return Err(FramecastError::invalid_parameter(
                    "ColorCorrection.Brightness, .Contrast and .Saturation must be >= 0",
                ));
            }
            Ok(Effect::ColorCorrection {
                brightness,
                contrast,
                saturation,
            })
        }
        "replacealpha" | "replace_alpha" => {
            let alpha = get_f32(p, "Alpha")?;
            if !(0.0..=1.0).contains(&alpha) {
                return Err(FramecastError::invalid_parameter(
                    "ReplaceAlpha.Alpha must be in [0, 1]",
                ));
            }
            Ok(Effect::ReplaceAlpha { alpha })
        }
        "zoomin" | "zoom_in" => Ok(Effect::ZoomIn {
            target_x: sx.size(get_u32(p, "TargetX")?),
            target_y: sy.size(get_u32(p, "TargetY")?),
            start_point: get_u32(p, "StartPoint").unwrap_or(0),
            end_point: get_u32(p, "EndPoint").unwrap_or(0),
        }),
        "jitter" => Ok(Effect::Jitter {
            max_offset_x: sx.offset_i64(get_i64(p, "MaxOffsetX")?),
            max_offset_y: sy.offset_i64(get_i64(p, "MaxOffsetY")?),
            seed: get_u32(p, "Seed").unwrap_or(0) as u64,
        }),
        other => Err(FramecastError::invalid_parameter(format!(
            "unknown effect type '{other}'"
        ))),
    }
}

/// Apply a clip's effect chain: enabled descriptors only, ascending `index`.
pub fn apply_chain(
    picture: Picture,
    effects: &[EffectDescriptor],
    ctx: &EffectContext<'_>,
) -> FramecastResult<Picture> {
    let mut ordered: Vec<&EffectDescriptor> = effects.iter().filter(|e| e.enabled).collect();
    ordered.sort_by_key(|e| e.index);

    let mut current = picture;
    for desc in ordered {
        let effect = parse_effect(desc, ctx.target_width, ctx.target_height)?;
        current = apply_effect(&effect, current, ctx)?;
    }
    Ok(current)
}

pub fn apply_effect(
    effect: &Effect,
    src: Picture,
    ctx: &EffectContext<'_>,
) -> FramecastResult<Picture> {
    match *effect {
        Effect::Crop {
            start_x,
            start_y,
            width,
            height,
        } => src.crop(start_x, start_y, width, height),
        Effect::Place { start_x, start_y } => {
            Ok(src.place_onto(ctx.target_width, ctx.target_height, start_x, start_y))
        }
        Effect::Resize {
            width,
            height,
            preserve_aspect,
        } => {
            if preserve_aspect {
                let (w, h) = fit_dimensions(src.width(), src.height(), width, height);
                src.resize(w, h, true)
            } else {
                src.resize(width, height, true)
            }
        }
        Effect::RemoveColor { key, tolerance } => {
            let args = MixtureArgs {
                key_color: key,
                tolerance,
                ..MixtureArgs::default()
            };
            mixture::remove_color(&src, &args, ctx.backend)
        }
        Effect::ColorCorrection {
            brightness,
            contrast,
            saturation,
        } => color_correction(&src, brightness, contrast, saturation, ctx.backend),
        Effect::ReplaceAlpha { alpha } => {
            let n = src.pixel_count();
            let old = match src.alpha() {
                Some(a) => a.to_vec(),
                None => vec![1.0; n],
            };
            let out = ctx
                .backend
                .compute(Kernel::ReplaceAlpha, &[&old, &[alpha]])?;
            src.with_alpha(out.into_iter().next().unwrap_or_default())
        }
        Effect::ZoomIn {
            target_x,
            target_y,
            start_point,
            end_point,
        } => {
            let (start, end) = bind_span(start_point, end_point, ctx);
            let total = end.saturating_sub(start);
            let progress = if total == 0 {
                0.0
            } else {
                (ctx.frame_index.saturating_sub(start) as f64 / total as f64).clamp(0.0, 1.0)
            };
            let w = src.width();
            let h = src.height();
            let cw = ((w as f64 + (target_x as f64 - w as f64) * progress).round() as i64).max(1)
                as u32;
            let ch = ((h as f64 + (target_y as f64 - h as f64) * progress).round() as i64).max(1)
                as u32;
            let cw = cw.min(w);
            let ch = ch.min(h);
            let x = (w - cw) / 2;
            let y = (h - ch) / 2;
            src.crop(x, y, cw, ch)?.resize(w, h, true)
        }
        Effect::Jitter {
            max_offset_x,
            max_offset_y,
            seed,
        } => {
            let (start, _) = bind_span(0, 0, ctx);
            let local = ctx.frame_index.saturating_sub(start) as u64;
            let mut rng = SplitMix64::new(seed ^ local.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let dx = rng.range_signed(max_offset_x);
            let dy = rng.range_signed(max_offset_y);
            Ok(src.place_onto(src.width(), src.height(), dx, dy))
        }
    }
}

// Saturation mixes each channel toward the frame's luma, so all three
// channels go through the kernel in one call.
fn color_correction(
    src: &Picture,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    backend: &AcceleratorHandle,
) -> FramecastResult<Picture> {
    let norm = |c: &[u16]| -> Vec<f32> { c.iter().map(|&v| v as f32 / 65535.0).collect() };
    let denorm = |c: &[f32]| -> Vec<u16> {
        c.iter()
            .map(|&v| (v * 65535.0).round().clamp(0.0, 65535.0) as u16)
            .collect()
    };
    let out = backend.compute(
        Kernel::ColorCorrection,
        &[
            &norm(src.r()),
            &norm(src.g()),
            &norm(src.b()),
            &[brightness],
            &[contrast],
            &[saturation],
        ],
    )?;
    Picture::new(
        src.width(),
        src.height(),
        denorm(&out[0]),
        denorm(&out[1]),
        denorm(&out[2]),
        src.alpha().map(|a| a.to_vec()),
    )
}

/// Continuous effects authored with start == end == 0 span the whole clip.
fn bind_span(start_point: u32, end_point: u32, ctx: &EffectContext<'_>) -> (u32, u32) {
    if start_point == 0 && end_point == 0 {
        (ctx.clip_start, ctx.clip_end)
    } else {
        (start_point, end_point)
    }
}

/// Execution role of a bindable-argument effect within a matting pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    ValueProvider,
    ValueProcessor,
    ResultGenerator,
    MultiInputProcessor,
}

/// Opaque value passed between bindable-argument effects.
#[derive(Clone, Debug)]
pub enum BoundValue {
    Mask(BitMask),
}

/// Two-stage matting pipeline: a provider derives an intermediate value from
/// one picture, a generator consumes it against another. Calling a stage
/// outside its role is a programming error.
#[derive(Clone, Debug, PartialEq)]
pub enum BindableEffect {
    /// Foreground/background mask keyed on Euclidean distance to a color.
    MattingMaskSource { key: (u16, u16, u16), tolerance: f32 },
    /// Cuts the target to the mask: `false` pixels become transparent black.
    MaskApply,
}

impl BindableEffect {
    pub fn role(&self) -> Role {
        match self {
            BindableEffect::MattingMaskSource { .. } => Role::ValueProvider,
            BindableEffect::MaskApply => Role::ResultGenerator,
        }
    }

    pub fn provide(&self, src: &Picture) -> FramecastResult<BoundValue> {
        match *self {
            BindableEffect::MattingMaskSource { key, tolerance } => {
                let (kr, kg, kb) = key;
                let (kr, kg, kb) = (kr as f32 / 257.0, kg as f32 / 257.0, kb as f32 / 257.0);
                let threshold = tolerance * tolerance * (255.0 * 255.0 * 3.0);
                let n = src.pixel_count();
                let mut data = Vec::with_capacity(n);
                for i in 0..n {
                    let dr = src.r()[i] as f32 / 257.0 - kr;
                    let dg = src.g()[i] as f32 / 257.0 - kg;
                    let db = src.b()[i] as f32 / 257.0 - kb;
                    let dist2 = dr * dr + dg * dg + db * db;
                    data.push(dist2 >= threshold);
                }
                Ok(BoundValue::Mask(BitMask::new(src.width(), src.height(), data)?))
            }
            BindableEffect::MaskApply => Err(FramecastError::unsupported_operation(
                "MaskApply is a result generator, not a value provider",
            )),
        }
    }

    pub fn generate(&self, value: &BoundValue, target: &Picture) -> FramecastResult<Picture> {
        match self {
            BindableEffect::MaskApply => {
                let BoundValue::Mask(mask) = value;
                let n = target.pixel_count();
                let mut r = target.r().to_vec();
                let mut g = target.g().to_vec();
                let mut b = target.b().to_vec();
                let mut alpha = match target.alpha() {
                    Some(a) => a.to_vec(),
                    None => vec![1.0; n],
                };
                for y in 0..target.height() {
                    for x in 0..target.width() {
                        if !mask.sample(x, y, target.width(), target.height()) {
                            let i = (y * target.width() + x) as usize;
                            r[i] = 0;
                            g[i] = 0;
                            b[i] = 0;
                            alpha[i] = 0.0;
                        }
                    }
                }
                Picture::new(target.width(), target.height(), r, g, b, Some(alpha))
            }
            BindableEffect::MattingMaskSource { .. } => {
                Err(FramecastError::unsupported_operation(
                    "MattingMaskSource is a value provider, not a result generator",
                ))
            }
        }
    }
}

struct SplitMix64(u64);

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn range_signed(&mut self, max: i64) -> i64 {
        if max <= 0 {
            return 0;
        }
        let span = (2 * max + 1) as u64;
        (self.next() % span) as i64 - max
    }
}

struct Rescale {
    relative: Option<u32>,
    target: u32,
}

impl Rescale {
    fn new(relative: Option<u32>, target: u32) -> Self {
        Self { relative, target }
    }

    fn active(&self) -> Option<u32> {
        match self.relative {
            Some(rel) if rel > 0 && rel != self.target => Some(rel),
            _ => None,
        }
    }

    fn offset_u32(&self, v: u32) -> u32 {
        match self.active() {
            Some(rel) => (v as f64 * self.target as f64 / rel as f64).round() as u32,
            None => v,
        }
    }

    fn offset_i64(&self, v: i64) -> i64 {
        match self.active() {
            Some(rel) => (v as f64 * self.target as f64 / rel as f64).round() as i64,
            None => v,
        }
    }

    fn size(&self, v: u32) -> u32 {
        self.offset_u32(v).max(1)
    }
}

fn get_u32(p: &serde_json::Value, key: &str) -> FramecastResult<u32> {
    p.get(key)
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            FramecastError::invalid_parameter(format!(
                "missing or non-integer effect param '{key}'"
            ))
        })
}

fn get_u16(p: &serde_json::Value, key: &str) -> FramecastResult<u16> {
    p.get(key)
        .and_then(|v| v.as_u64())
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| {
            FramecastError::invalid_parameter(format!(
                "effect param '{key}' must be an integer in 0..=65535"
            ))
        })
}

fn get_i64(p: &serde_json::Value, key: &str) -> FramecastResult<i64> {
    p.get(key).and_then(|v| v.as_i64()).ok_or_else(|| {
        FramecastError::invalid_parameter(format!("missing or non-integer effect param '{key}'"))
    })
}

fn get_f32(p: &serde_json::Value, key: &str) -> FramecastResult<f32> {
    let n = p.get(key).and_then(|v| v.as_f64()).ok_or_else(|| {
        FramecastError::invalid_parameter(format!("missing or non-number effect param '{key}'"))
    })? as f32;
    if !n.is_finite() {
        return Err(FramecastError::invalid_parameter(format!(
            "effect param '{key}' must be finite"
        )));
    }
    Ok(n)
}

fn get_bool(p: &serde_json::Value, key: &str) -> Option<bool> {
    p.get(key).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(type_name: &str, parameters: serde_json::Value) -> EffectDescriptor {
        EffectDescriptor {
            type_name: type_name.to_string(),
            parameters,
            enabled: true,
            index: 0,
            relative_width: None,
            relative_height: None,
        }
    }

    fn ctx(backend: &AcceleratorHandle) -> EffectContext<'_> {
        EffectContext {
            frame_index: 0,
            clip_start: 0,
            clip_end: 10,
            target_width: 8,
            target_height: 8,
            backend,
        }
    }

    #[test]
    fn parse_crop_rejects_zero_size() {
        let d = desc(
            "Crop",
            serde_json::json!({"StartX": 0, "StartY": 0, "Width": 0, "Height": 4}),
        );
        assert!(matches!(
            parse_effect(&d, 8, 8),
            Err(FramecastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn parse_unknown_type_fails() {
        let d = desc("Sparkle", serde_json::json!({}));
        assert!(parse_effect(&d, 8, 8).is_err());
    }

    #[test]
    fn relative_resolution_rescales_spatial_params() {
        let mut d = desc(
            "Crop",
            serde_json::json!({"StartX": 100, "StartY": 50, "Width": 200, "Height": 100}),
        );
        d.relative_width = Some(400);
        d.relative_height = Some(200);
        // target 8x8: x scales by 8/400, y by 8/200
        let e = parse_effect(&d, 8, 8).unwrap();
        assert_eq!(
            e,
            Effect::Crop {
                start_x: 2,
                start_y: 2,
                width: 4,
                height: 4
            }
        );
    }

    #[test]
    fn chain_filters_disabled_and_sorts_by_index() {
        let backend = AcceleratorHandle::cpu();
        let src = Picture::solid(8, 8, 1000, 1000, 1000, Some(1.0));
        let mut crop_late = desc(
            "Crop",
            serde_json::json!({"StartX": 0, "StartY": 0, "Width": 2, "Height": 2}),
        );
        crop_late.index = 5;
        let mut disabled = desc("Sparkle", serde_json::json!({}));
        disabled.enabled = false;
        let mut resize_first = desc(
            "Resize",
            serde_json::json!({"Width": 4, "Height": 4}),
        );
        resize_first.index = 1;

        // Disabled unknown effect is skipped entirely; resize runs before crop.
        let out = apply_chain(src, &[crop_late, disabled, resize_first], &ctx(&backend)).unwrap();
        assert_eq!((out.width(), out.height()), (2, 2));
    }

    #[test]
    fn parse_color_correction_defaults_saturation_to_one() {
        let d = desc(
            "ColorCorrection",
            serde_json::json!({"Brightness": 1.5, "Contrast": 0.5}),
        );
        let e = parse_effect(&d, 8, 8).unwrap();
        assert_eq!(
            e,
            Effect::ColorCorrection {
                brightness: 1.5,
                contrast: 0.5,
                saturation: 1.0
            }
        );
    }

    #[test]
    fn color_correction_zero_saturation_grays_the_frame() {
        let backend = AcceleratorHandle::cpu();
        let e = Effect::ColorCorrection {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 0.0,
        };
        let src = Picture::solid(2, 2, 65535, 0, 0, Some(1.0));
        let out = apply_effect(&e, src, &ctx(&backend)).unwrap();
        let gray = (0.299f32 * 65535.0).round() as u16;
        assert_eq!((out.r()[0], out.g()[0], out.b()[0]), (gray, gray, gray));
    }

    #[test]
    fn replace_alpha_sets_constant() {
        let backend = AcceleratorHandle::cpu();
        let src = Picture::solid(2, 2, 5, 5, 5, None);
        let e = Effect::ReplaceAlpha { alpha: 0.25 };
        let out = apply_effect(&e, src, &ctx(&backend)).unwrap();
        assert!(out.alpha().unwrap().iter().all(|&a| a == 0.25));
    }

    #[test]
    fn zoom_in_is_identity_at_start_and_cropped_at_end() {
        let backend = AcceleratorHandle::cpu();
        let src = Picture::solid(8, 8, 9, 9, 9, Some(1.0));
        let e = Effect::ZoomIn {
            target_x: 4,
            target_y: 4,
            start_point: 0,
            end_point: 10,
        };

        let mut c = ctx(&backend);
        c.frame_index = 0;
        let out = apply_effect(&e, src.clone(), &c).unwrap();
        assert_eq!((out.width(), out.height()), (8, 8));

        c.frame_index = 10;
        let out = apply_effect(&e, src, &c).unwrap();
        // Fully zoomed: 4x4 center crop scaled back to 8x8.
        assert_eq!((out.width(), out.height()), (8, 8));
    }

    #[test]
    fn jitter_is_deterministic_per_frame() {
        let backend = AcceleratorHandle::cpu();
        let src = Picture::solid(4, 4, 7, 7, 7, Some(1.0));
        let e = Effect::Jitter {
            max_offset_x: 2,
            max_offset_y: 2,
            seed: 42,
        };
        let mut c = ctx(&backend);
        c.frame_index = 3;
        let a = apply_effect(&e, src.clone(), &c).unwrap();
        let b = apply_effect(&e, src, &c).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn matting_roles_are_enforced() {
        let provider = BindableEffect::MattingMaskSource {
            key: (0, 65535, 0),
            tolerance: 0.2,
        };
        let generator = BindableEffect::MaskApply;
        assert_eq!(provider.role(), Role::ValueProvider);
        assert_eq!(generator.role(), Role::ResultGenerator);

        let pic = Picture::solid(2, 2, 0, 65535, 0, Some(1.0));
        assert!(matches!(
            generator.provide(&pic),
            Err(FramecastError::UnsupportedOperation(_))
        ));
        let mask = provider.provide(&pic).unwrap();
        assert!(matches!(
            provider.generate(&mask, &pic),
            Err(FramecastError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn matting_cuts_background_to_transparent_black() {
        let provider = BindableEffect::MattingMaskSource {
            key: (0, 65535, 0),
            tolerance: 0.3,
        };
        // left pixel pure green (background), right pixel red (foreground)
        let src = Picture::new(
            2,
            1,
            vec![0, 65535],
            vec![65535, 0],
            vec![0, 0],
            Some(vec![1.0, 1.0]),
        )
        .unwrap();
        let mask = provider.provide(&src).unwrap();
        let out = BindableEffect::MaskApply.generate(&mask, &src).unwrap();
        assert_eq!((out.r()[0], out.g()[0], out.b()[0]), (0, 0, 0));
        assert_eq!(out.alpha().unwrap()[0], 0.0);
        assert_eq!(out.r()[1], 65535);
        assert_eq!(out.alpha().unwrap()[1], 1.0);
    }
}
