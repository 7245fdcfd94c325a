use serde::{Deserialize, Serialize};

use crate::{
    compute::{AcceleratorHandle, Kernel},
    error::{FramecastError, FramecastResult},
    picture::Picture,
};

/// Per-layer blend mode used when folding a layer into the accumulated frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixtureMode {
    #[default]
    Overlay,
    Add,
    Minus,
    Multiply,
    RemoveColor,
}

/// Arguments shared by the arithmetic modes and the remove-color mixture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixtureArgs {
    /// Clamp applied when the raw result stays in range; 0 disables it.
    pub upper_bound: u16,
    /// Wrap on overflow instead of saturating.
    pub allow_overflow: bool,
    /// Reference color for [`MixtureMode::RemoveColor`].
    pub key_color: (u16, u16, u16),
    /// Per-channel tolerance around the reference color, 16-bit space.
    pub tolerance: u16,
}

impl Default for MixtureArgs {
    fn default() -> Self {
        Self {
            upper_bound: 0,
            allow_overflow: false,
            key_color: (0, 0, 0),
            tolerance: 0,
        }
    }
}

impl MixtureArgs {
    /// Read args from a clip's mixture-argument bag. Unknown keys are
    /// ignored; missing keys keep their defaults.
    pub fn from_json(value: Option<&serde_json::Value>) -> FramecastResult<Self> {
        let mut args = Self::default();
        let Some(value) = value else {
            return Ok(args);
        };
        let Some(obj) = value.as_object() else {
            return Err(FramecastError::invalid_parameter(
                "mixture args must be a JSON object",
            ));
        };
        if let Some(v) = obj.get("UpperBound") {
            args.upper_bound = as_u16(v, "UpperBound")?;
        }
        if let Some(v) = obj.get("AllowOverflow") {
            args.allow_overflow = v.as_bool().ok_or_else(|| {
                FramecastError::invalid_parameter("mixture arg 'AllowOverflow' must be a bool")
            })?;
        }
        let r = obj.get("R").map(|v| as_u16(v, "R")).transpose()?;
        let g = obj.get("G").map(|v| as_u16(v, "G")).transpose()?;
        let b = obj.get("B").map(|v| as_u16(v, "B")).transpose()?;
        let (dr, dg, db) = args.key_color;
        args.key_color = (r.unwrap_or(dr), g.unwrap_or(dg), b.unwrap_or(db));
        if let Some(v) = obj.get("Tolerance") {
            args.tolerance = as_u16(v, "Tolerance")?;
        }
        Ok(args)
    }
}

fn as_u16(v: &serde_json::Value, key: &str) -> FramecastResult<u16> {
    v.as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| {
            FramecastError::invalid_parameter(format!(
                "mixture arg '{key}' must be an integer in 0..=65535"
            ))
        })
}

/// Blend `top` into `base`.
///
/// If resolutions differ the top buffer is stretch-resized to the base first.
/// Overlay recomputes alpha; the arithmetic modes keep the base layer's
/// alpha. A base without an alpha channel short-circuits Overlay to the base
/// itself (fully opaque base, nothing to composite through).
pub fn mix(
    base: &Picture,
    top: &Picture,
    mode: MixtureMode,
    args: &MixtureArgs,
    backend: &AcceleratorHandle,
) -> FramecastResult<Picture> {
    let resized;
    let top = if top.width() != base.width() || top.height() != base.height() {
        resized = top.resize(base.width(), base.height(), true)?;
        &resized
    } else {
        top
    };

    match mode {
        MixtureMode::Overlay => mix_overlay(base, top, backend),
        MixtureMode::Add => mix_arithmetic(base, top, Kernel::MixAdd, args, backend),
        MixtureMode::Minus => mix_arithmetic(base, top, Kernel::MixMinus, args, backend),
        MixtureMode::Multiply => mix_arithmetic(base, top, Kernel::MixMultiply, args, backend),
        MixtureMode::RemoveColor => {
            let keyed = remove_color(top, args, backend)?;
            mix_overlay(base, &keyed, backend)
        }
    }
}

fn mix_overlay(
    base: &Picture,
    top: &Picture,
    backend: &AcceleratorHandle,
) -> FramecastResult<Picture> {
    if !base.has_alpha() {
        return Ok(base.clone());
    }

    let n = base.pixel_count();
    let top_a = alpha_or_opaque(top, n);
    let base_a = alpha_or_opaque(base, n);

    let mut out_a = Vec::new();
    let mut channel = |top_c: &[u16], base_c: &[u16]| -> FramecastResult<Vec<u16>> {
        let tc: Vec<f32> = top_c.iter().map(|&v| v as f32).collect();
        let bc: Vec<f32> = base_c.iter().map(|&v| v as f32).collect();
        let out = backend.compute(Kernel::OverlayBlend, &[&tc, &bc, &top_a, &base_a])?;
        out_a = out[1].clone();
        Ok(out[0]
            .iter()
            .map(|&v| v.round().clamp(0.0, 65535.0) as u16)
            .collect())
    };

    let r = channel(top.r(), base.r())?;
    let g = channel(top.g(), base.g())?;
    let b = channel(top.b(), base.b())?;

    Picture::new(base.width(), base.height(), r, g, b, Some(out_a))
}

fn mix_arithmetic(
    base: &Picture,
    top: &Picture,
    kernel: Kernel,
    args: &MixtureArgs,
    backend: &AcceleratorHandle,
) -> FramecastResult<Picture> {
    let bound = [args.upper_bound as f32];
    let allow = [if args.allow_overflow { 1.0f32 } else { 0.0 }];

    let channel = |base_c: &[u16], top_c: &[u16]| -> FramecastResult<Vec<u16>> {
        let a: Vec<f32> = base_c.iter().map(|&v| v as f32).collect();
        let b: Vec<f32> = top_c.iter().map(|&v| v as f32).collect();
        let out = backend.compute(kernel, &[&a, &b, &bound, &allow])?;
        Ok(out[0].iter().map(|&v| v as u16).collect())
    };

    let r = channel(base.r(), top.r())?;
    let g = channel(base.g(), top.g())?;
    let b = channel(base.b(), top.b())?;

    Picture::new(
        base.width(),
        base.height(),
        r,
        g,
        b,
        base.alpha().map(|a| a.to_vec()),
    )
}

/// Zero every pixel within the tolerance cube of the key color and drop its
/// alpha to 0; everything else keeps its channels and alpha.
pub fn remove_color(
    src: &Picture,
    args: &MixtureArgs,
    backend: &AcceleratorHandle,
) -> FramecastResult<Picture> {
    let (kr, kg, kb) = args.key_color;
    let tol = args.tolerance;

    let mask_for = |channel: &[u16], key: u16| -> FramecastResult<Vec<f32>> {
        let low = [key.saturating_sub(tol) as f32 / 65535.0];
        let high = [key.saturating_add(tol) as f32 / 65535.0];
        let v: Vec<f32> = channel.iter().map(|&c| c as f32 / 65535.0).collect();
        Ok(backend
            .compute(Kernel::RemoveColorMask, &[&v, &low, &high])?
            .remove(0))
    };

    let rm = mask_for(src.r(), kr)?;
    let gm = mask_for(src.g(), kg)?;
    let bm = mask_for(src.b(), kb)?;

    let n = src.pixel_count();
    let mut r = src.r().to_vec();
    let mut g = src.g().to_vec();
    let mut b = src.b().to_vec();
    let mut alpha = alpha_or_opaque(src, n);
    for i in 0..n {
        // The kernel flags 1.0 for samples inside the band; a pixel is keyed
        // out only when all three channels are flagged.
        let removed = rm[i] == 1.0 && gm[i] == 1.0 && bm[i] == 1.0;
        if removed {
            r[i] = 0;
            g[i] = 0;
            b[i] = 0;
            alpha[i] = 0.0;
        }
    }
    Picture::new(src.width(), src.height(), r, g, b, Some(alpha))
}

fn alpha_or_opaque(p: &Picture, n: usize) -> Vec<f32> {
    match p.alpha() {
        Some(a) => a.to_vec(),
        None => vec![1.0; n],
    }
}
