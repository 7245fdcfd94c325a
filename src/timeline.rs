use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{
    clip::ClipRecord,
    compute::AcceleratorHandle,
    error::{FramecastError, FramecastResult},
    fx::{self, EffectContext},
    mixture::{self, MixtureArgs, MixtureMode},
    model::EffectDescriptor,
    picture::Picture,
};

/// Hash of the empty layer set; distinct from any real frame hash.
pub const NULL_FRAME_HASH: &str = "nullframe";

/// One layer's contribution to a single frame, resolved and ready to mix.
#[derive(Debug)]
pub struct OneFrame {
    pub frame_number: u32,
    pub picture: Picture,
    pub layer_index: u32,
    pub mixture_mode: MixtureMode,
    pub mixture_args: MixtureArgs,
    pub effects: Vec<EffectDescriptor>,
    pub clip_id: String,
    pub clip_start: u32,
    pub clip_end: u32,
}

/// Select the clips active at `target_frame` and pull their frames.
///
/// Selection is inclusive at both span ends: the frame exactly at
/// `start + duration` still selects the clip and yields its boundary filler.
/// Two selected clips on the same layer are a hard data error, never
/// auto-resolved. The result is ordered by ascending `layer_index`, bottom
/// layer first, which is the order [`composite`] consumes.
pub fn resolve_layers(
    clips: &[ClipRecord],
    target_frame: u32,
    target_width: u32,
    target_height: u32,
) -> FramecastResult<Vec<OneFrame>> {
    let mut result: Vec<OneFrame> = Vec::new();
    for clip in clips {
        if !(clip.start_frame <= target_frame && target_frame <= clip.end_frame()) {
            continue;
        }
        if let Some(existing) = result.iter().find(|f| f.layer_index == clip.layer_index) {
            return Err(FramecastError::overlap(format!(
                "clips '{}' and '{}' in layer {} are overlapping at frame {target_frame}",
                existing.clip_id, clip.id, clip.layer_index
            )));
        }
        let picture = clip.get_frame(target_frame, target_width, target_height, false)?;
        result.push(OneFrame {
            frame_number: target_frame,
            picture,
            layer_index: clip.layer_index,
            mixture_mode: clip.mixture_mode,
            mixture_args: clip.mixture_args,
            effects: clip.effects.clone(),
            clip_id: clip.id.clone(),
            clip_start: clip.start_frame,
            clip_end: clip.end_frame(),
        });
    }
    result.sort_by_key(|f| f.layer_index);
    Ok(result)
}

#[derive(Serialize)]
struct LayerStamp<'a> {
    frame_number: u32,
    layer_index: u32,
    clip_id: &'a str,
    start_frame: u32,
    relative_start_frame: u32,
    duration: u32,
    mixture_mode: MixtureMode,
    effects: &'a [EffectDescriptor],
}

/// Content-addressable key for a frame's resolved layer set.
///
/// Serializes the active layers (everything that shapes the output, no pixel
/// data) to canonical JSON and hashes it. An empty set is the fixed
/// [`NULL_FRAME_HASH`] sentinel; otherwise the key is `"0x"` + lowercase
/// SHA-256 hex.
pub fn frame_hash(clips: &[ClipRecord], target_frame: u32) -> FramecastResult<String> {
    let mut stamps: Vec<LayerStamp<'_>> = Vec::new();
    for clip in clips {
        if !(clip.start_frame <= target_frame && target_frame <= clip.end_frame()) {
            continue;
        }
        if let Some(existing) = stamps.iter().find(|s| s.layer_index == clip.layer_index) {
            return Err(FramecastError::overlap(format!(
                "clips '{}' and '{}' in layer {} are overlapping at frame {target_frame}",
                existing.clip_id, clip.id, clip.layer_index
            )));
        }
        stamps.push(LayerStamp {
            frame_number: target_frame,
            layer_index: clip.layer_index,
            clip_id: &clip.id,
            start_frame: clip.start_frame,
            relative_start_frame: clip.relative_start_frame,
            duration: clip.duration,
            mixture_mode: clip.mixture_mode,
            effects: &clip.effects,
        });
    }
    if stamps.is_empty() {
        return Ok(NULL_FRAME_HASH.to_string());
    }
    stamps.sort_by_key(|s| s.layer_index);

    let value = serde_json::to_value(&stamps)
        .map_err(|e| FramecastError::serde(format!("cannot serialize layer set: {e}")))?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(2 + digest.len() * 2);
    out.push_str("0x");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    Ok(out)
}

// Canonical form: object keys sorted, no whitespace. Keeps the hash stable
// across serializer changes.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Fold the resolved layers into one frame, bottom to top.
///
/// The bottom layer's effected buffer seeds the accumulator directly; its own
/// mixture mode never runs, there is nothing underneath it to mix against.
/// Each further layer's effect chain runs first, then its mixture mode folds
/// it in. No layers produce an opaque black frame. The final buffer is
/// brought to the exact target size (placed if smaller, stretched if larger).
///
/// Errors propagate; resilient fallback lives in
/// [`composite_or_placeholder`].
pub fn composite(
    layers: &[OneFrame],
    frame_index: u32,
    target_width: u32,
    target_height: u32,
    backend: &AcceleratorHandle,
) -> FramecastResult<Picture> {
    let Some((bottom, rest)) = layers.split_first() else {
        return Ok(Picture::black(target_width, target_height));
    };

    let effected = |layer: &OneFrame| -> FramecastResult<Picture> {
        let ctx = EffectContext {
            frame_index,
            clip_start: layer.clip_start,
            clip_end: layer.clip_end,
            target_width,
            target_height,
            backend,
        };
        fx::apply_chain(layer.picture.clone(), &layer.effects, &ctx)
    };

    let mut acc = effected(bottom)?;
    for layer in rest {
        acc = mixture::mix(
            &acc,
            &effected(layer)?,
            layer.mixture_mode,
            &layer.mixture_args,
            backend,
        )?;
    }

    if acc.width() == target_width && acc.height() == target_height {
        Ok(acc)
    } else if acc.width() <= target_width && acc.height() <= target_height {
        Ok(acc.place_onto(target_width, target_height, 0, 0))
    } else {
        acc.resize(target_width, target_height, true)
    }
}

/// Resilient composite boundary: any failure degrades to the
/// "media unavailable" placeholder instead of aborting the frame, and is
/// logged. Lower-level components keep propagating precise errors; this is
/// the only place that swallows them.
pub fn composite_or_placeholder(
    layers: &[OneFrame],
    frame_index: u32,
    target_width: u32,
    target_height: u32,
    backend: &AcceleratorHandle,
) -> Picture {
    match composite(layers, frame_index, target_width, target_height, backend) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(frame_index, error = %err, "composite failed, emitting placeholder");
            placeholder(target_width, target_height)
        }
    }
}

/// Deterministic "media unavailable" frame: dark gray with a lighter
/// diagonal cross.
pub fn placeholder(width: u32, height: u32) -> Picture {
    let pixels = width as usize * height as usize;
    let mut r = vec![0x2000u16; pixels];
    let mut g = vec![0x2000u16; pixels];
    let mut b = vec![0x2000u16; pixels];
    for y in 0..height as u64 {
        for x in 0..width as u64 {
            let d1 = x * height.max(1) as u64;
            let d2 = y * width.max(1) as u64;
            let on_diag = d1.abs_diff(d2) < width.max(height).max(1) as u64
                || (d1 + d2).abs_diff(width as u64 * height as u64)
                    < width.max(height).max(1) as u64;
            if on_diag {
                let i = (y * width as u64 + x) as usize;
                r[i] = 0x6000;
                g[i] = 0x6000;
                b[i] = 0x6000;
            }
        }
    }
    Picture::new(width, height, r, g, b, Some(vec![1.0; pixels]))
        .unwrap_or_else(|_| Picture::black(width.max(1), height.max(1)))
}

/// Static draft validation: same-layer range overlaps beyond a tolerance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlapInfo {
    pub clip_a: String,
    pub clip_b: String,
    pub overlap_frames: u64,
    pub layer_index: u32,
}

pub fn find_overlaps(clips: &[ClipRecord], allowed_overlap_frames: u32) -> Vec<OverlapInfo> {
    let mut layers: Vec<u32> = clips.iter().map(|c| c.layer_index).collect();
    layers.sort_unstable();
    layers.dedup();

    let mut result = Vec::new();
    for layer in layers {
        let mut ordered: Vec<&ClipRecord> = clips
            .iter()
            .filter(|c| c.layer_index == layer)
            .collect();
        ordered.sort_by_key(|c| c.start_frame);
        for i in 0..ordered.len() {
            let a = ordered[i];
            let a_end = a.start_frame as u64 + a.duration as u64;
            for b in &ordered[i + 1..] {
                if b.start_frame as u64 >= a_end {
                    break;
                }
                let overlap = a_end - b.start_frame as u64;
                if overlap > allowed_overlap_frames as u64 {
                    result.push(OverlapInfo {
                        clip_a: format!("{} ({})", a.id, a.name),
                        clip_b: format!("{} ({})", b.id, b.name),
                        overlap_frames: overlap,
                        layer_index: layer,
                    });
                }
            }
        }
    }
    result
}

pub fn has_overlap(clips: &[ClipRecord], allowed_overlap_frames: u32) -> bool {
    !find_overlaps(clips, allowed_overlap_frames).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipSource;

    fn solid_clip(id: &str, layer: u32, start: u32, duration: u32) -> ClipRecord {
        let mut clip = ClipRecord::new(
            id,
            layer,
            start,
            duration,
            ClipSource::SolidColor {
                r: 500,
                g: 600,
                b: 700,
                alpha: Some(1.0),
            },
        );
        clip.re_init().expect("solid re_init cannot fail");
        clip
    }

    #[test]
    fn resolve_orders_bottom_layer_first() {
        let clips = vec![
            solid_clip("top", 3, 0, 10),
            solid_clip("bottom", 1, 0, 10),
        ];
        let layers = resolve_layers(&clips, 5, 4, 4).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].clip_id, "bottom");
        assert_eq!(layers[1].clip_id, "top");
    }

    #[test]
    fn same_layer_overlap_names_both_clips_and_frame() {
        let clips = vec![
            solid_clip("first", 0, 0, 100),
            solid_clip("second", 0, 50, 100),
        ];
        let err = resolve_layers(&clips, 60, 4, 4).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("first") && msg.contains("second") && msg.contains("60"));

        // Frame 120: only the second clip is active.
        let layers = resolve_layers(&clips, 120, 4, 4).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].clip_id, "second");
    }

    #[test]
    fn empty_layer_set_hashes_to_sentinel() {
        let clips = vec![solid_clip("a", 0, 10, 10)];
        assert_eq!(frame_hash(&clips, 50).unwrap(), NULL_FRAME_HASH);
    }

    #[test]
    fn frame_hash_is_deterministic_and_prefixed() {
        let clips = vec![solid_clip("a", 0, 0, 10)];
        let h1 = frame_hash(&clips, 5).unwrap();
        let h2 = frame_hash(&clips, 5).unwrap();
        assert_eq!(h1, h2);
        assert!(h1.starts_with("0x"));
        assert_eq!(h1.len(), 2 + 64);
    }

    #[test]
    fn frame_hash_tracks_effect_parameters() {
        let mut a = solid_clip("a", 0, 0, 10);
        let h_plain = frame_hash(std::slice::from_ref(&a), 5).unwrap();

        a.effects.push(EffectDescriptor {
            type_name: "Resize".to_string(),
            parameters: serde_json::json!({"Width": 4, "Height": 4}),
            enabled: true,
            index: 0,
            relative_width: None,
            relative_height: None,
        });
        let h_fx = frame_hash(std::slice::from_ref(&a), 5).unwrap();
        assert_ne!(h_plain, h_fx);

        a.effects[0].parameters = serde_json::json!({"Width": 8, "Height": 8});
        let h_fx2 = frame_hash(std::slice::from_ref(&a), 5).unwrap();
        assert_ne!(h_fx, h_fx2);
    }

    #[test]
    fn composite_without_layers_is_black() {
        let backend = AcceleratorHandle::cpu();
        let out = composite(&[], 0, 4, 4, &backend).unwrap();
        assert_eq!((out.r()[0], out.g()[0], out.b()[0]), (0, 0, 0));
        assert_eq!(out.alpha_at(0), 1.0);
    }

    #[test]
    fn composite_single_opaque_layer_wins() {
        let backend = AcceleratorHandle::cpu();
        let clips = vec![solid_clip("a", 0, 0, 10)];
        let layers = resolve_layers(&clips, 5, 4, 4).unwrap();
        let out = composite(&layers, 5, 4, 4, &backend).unwrap();
        assert_eq!((out.r()[0], out.g()[0], out.b()[0]), (500, 600, 700));
    }

    #[test]
    fn bottom_layer_mixture_mode_does_not_run_against_the_seed() {
        // A lone Multiply layer must come through unchanged; mixing it into
        // an empty accumulator would collapse it to black.
        let backend = AcceleratorHandle::cpu();
        let mut clip = ClipRecord::new(
            "a",
            0,
            0,
            10,
            ClipSource::SolidColor {
                r: 40000,
                g: 40000,
                b: 40000,
                alpha: Some(1.0),
            },
        );
        clip.re_init().unwrap();
        clip.mixture_mode = MixtureMode::Multiply;
        let layers = resolve_layers(std::slice::from_ref(&clip), 5, 4, 4).unwrap();
        let out = composite(&layers, 5, 4, 4, &backend).unwrap();
        assert_eq!((out.r()[0], out.g()[0], out.b()[0]), (40000, 40000, 40000));
    }

    #[test]
    fn composite_or_placeholder_survives_bad_effects() {
        let backend = AcceleratorHandle::cpu();
        let mut clip = solid_clip("a", 0, 0, 10);
        clip.effects.push(EffectDescriptor {
            type_name: "NoSuchEffect".to_string(),
            parameters: serde_json::Value::Null,
            enabled: true,
            index: 0,
            relative_width: None,
            relative_height: None,
        });
        let layers = resolve_layers(std::slice::from_ref(&clip), 5, 4, 4).unwrap();
        assert!(composite(&layers, 5, 4, 4, &backend).is_err());
        let out = composite_or_placeholder(&layers, 5, 4, 4, &backend);
        assert_eq!((out.width(), out.height()), (4, 4));
    }

    #[test]
    fn find_overlaps_honors_tolerance() {
        let clips = vec![
            solid_clip("a", 0, 0, 100),
            solid_clip("b", 0, 97, 50),
        ];
        assert!(find_overlaps(&clips, 5).is_empty());
        let found = find_overlaps(&clips, 2);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].overlap_frames, 3);
        assert_eq!(found[0].layer_index, 0);
    }

    #[test]
    fn overlapping_layers_blend_red_under_half_blue() {
        let backend = AcceleratorHandle::cpu();
        let mut base = ClipRecord::new(
            "red",
            0,
            0,
            10,
            ClipSource::SolidColor {
                r: 65535,
                g: 0,
                b: 0,
                alpha: Some(1.0),
            },
        );
        base.re_init().unwrap();
        let mut top = ClipRecord::new(
            "blue",
            1,
            0,
            10,
            ClipSource::SolidColor {
                r: 0,
                g: 0,
                b: 65535,
                alpha: Some(0.5),
            },
        );
        top.re_init().unwrap();

        let clips = vec![base, top];
        let layers = resolve_layers(&clips, 5, 4, 4).unwrap();
        let out = composite(&layers, 5, 4, 4, &backend).unwrap();
        let half = (65535.0f32 * 0.5).round() as u16;
        for i in 0..out.pixel_count() {
            assert_eq!(out.r()[i], half);
            assert_eq!(out.g()[i], 0);
            assert_eq!(out.b()[i], half);
            assert_eq!(out.alpha_at(i), 1.0);
        }
    }
}
