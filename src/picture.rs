use std::path::Path;

use crate::error::{FramecastError, FramecastResult};

/// In-memory raster: three 16-bit color channels plus optional per-pixel
/// float alpha in `[0, 1]`.
///
/// Operations return new buffers; a published `Picture` is never mutated
/// underneath another owner. The only in-place methods are the alpha-presence
/// toggles, which require exclusive access.
#[derive(Clone, Debug, PartialEq)]
pub struct Picture {
    width: u32,
    height: u32,
    r: Vec<u16>,
    g: Vec<u16>,
    b: Vec<u16>,
    alpha: Option<Vec<f32>>,
}

impl Picture {
    pub fn new(
        width: u32,
        height: u32,
        r: Vec<u16>,
        g: Vec<u16>,
        b: Vec<u16>,
        alpha: Option<Vec<f32>>,
    ) -> FramecastResult<Self> {
        let pixels = width as usize * height as usize;
        if width == 0 || height == 0 {
            return Err(FramecastError::invalid_parameter(
                "picture dimensions must be positive",
            ));
        }
        if r.len() != pixels || g.len() != pixels || b.len() != pixels {
            return Err(FramecastError::invalid_parameter(format!(
                "channel length mismatch: expected {pixels} samples for {width}x{height}"
            )));
        }
        if let Some(a) = &alpha
            && a.len() != pixels
        {
            return Err(FramecastError::invalid_parameter(format!(
                "alpha length mismatch: expected {pixels} samples for {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            r,
            g,
            b,
            alpha,
        })
    }

    /// Constant-color buffer. The alpha channel is present iff `alpha` is
    /// supplied.
    pub fn solid(width: u32, height: u32, r: u16, g: u16, b: u16, alpha: Option<f32>) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            r: vec![r; pixels],
            g: vec![g; pixels],
            b: vec![b; pixels],
            alpha: alpha.map(|a| vec![a; pixels]),
        }
    }

    /// Fully transparent black at the given size.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self::solid(width, height, 0, 0, 0, Some(0.0))
    }

    /// Opaque black at the given size.
    pub fn black(width: u32, height: u32) -> Self {
        Self::solid(width, height, 0, 0, 0, Some(1.0))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    pub fn r(&self) -> &[u16] {
        &self.r
    }

    pub fn g(&self) -> &[u16] {
        &self.g
    }

    pub fn b(&self) -> &[u16] {
        &self.b
    }

    pub fn alpha(&self) -> Option<&[f32]> {
        self.alpha.as_deref()
    }

    /// Alpha for a pixel, treating a missing channel as opaque.
    pub fn alpha_at(&self, idx: usize) -> f32 {
        match &self.alpha {
            Some(a) => a[idx],
            None => 1.0,
        }
    }

    /// Replace the whole alpha channel.
    pub fn with_alpha(mut self, alpha: Vec<f32>) -> FramecastResult<Self> {
        if alpha.len() != self.pixel_count() {
            return Err(FramecastError::invalid_parameter(
                "replacement alpha length must match pixel count",
            ));
        }
        self.alpha = Some(alpha);
        Ok(self)
    }

    /// Materialize a full-opacity alpha channel if absent. Idempotent.
    pub fn ensure_alpha(&mut self) {
        let pixels = self.pixel_count();
        match &self.alpha {
            Some(a) if a.len() == pixels => {}
            _ => self.alpha = Some(vec![1.0; pixels]),
        }
    }

    /// Discard the alpha channel if present. Idempotent.
    pub fn ensure_no_alpha(&mut self) {
        self.alpha = None;
    }

    pub fn set_alpha(&mut self, present: bool) {
        if present {
            self.ensure_alpha();
        } else {
            self.ensure_no_alpha();
        }
    }

    /// Scale to `target_width x target_height`.
    ///
    /// When both axes are exact integer multiples (either direction) the
    /// resize is nearest-sample repetition/decimation, which is what makes
    /// expand-then-shrink round trips lossless. Any other ratio fails with
    /// [`FramecastError::UnsupportedResize`] unless `allow_non_exact` is set,
    /// in which case a bilinear filter is used.
    pub fn resize(
        &self,
        target_width: u32,
        target_height: u32,
        allow_non_exact: bool,
    ) -> FramecastResult<Picture> {
        if target_width == 0 || target_height == 0 {
            return Err(FramecastError::invalid_parameter(
                "resize target must be positive",
            ));
        }
        if target_width == self.width && target_height == self.height {
            return Ok(self.clone());
        }
        if exact_ratio(self.width, target_width) && exact_ratio(self.height, target_height) {
            return Ok(self.resize_exact(target_width, target_height));
        }
        if !allow_non_exact {
            return Err(FramecastError::unsupported_resize(format!(
                "{}x{} -> {}x{} is not an exact ratio",
                self.width, self.height, target_width, target_height
            )));
        }
        Ok(self.resize_bilinear(target_width, target_height))
    }

    fn resize_exact(&self, tw: u32, th: u32) -> Picture {
        let pixels = tw as usize * th as usize;
        let mut r = Vec::with_capacity(pixels);
        let mut g = Vec::with_capacity(pixels);
        let mut b = Vec::with_capacity(pixels);
        let mut a = self.alpha.as_ref().map(|_| Vec::with_capacity(pixels));
        for y in 0..th {
            let sy = (y as u64 * self.height as u64 / th as u64) as usize;
            for x in 0..tw {
                let sx = (x as u64 * self.width as u64 / tw as u64) as usize;
                let src = sy * self.width as usize + sx;
                r.push(self.r[src]);
                g.push(self.g[src]);
                b.push(self.b[src]);
                if let (Some(dst), Some(sa)) = (a.as_mut(), self.alpha.as_ref()) {
                    dst.push(sa[src]);
                }
            }
        }
        Picture {
            width: tw,
            height: th,
            r,
            g,
            b,
            alpha: a,
        }
    }

    fn resize_bilinear(&self, tw: u32, th: u32) -> Picture {
        let sw = self.width as usize;
        let sh = self.height as usize;
        let pixels = tw as usize * th as usize;
        let mut r = vec![0u16; pixels];
        let mut g = vec![0u16; pixels];
        let mut b = vec![0u16; pixels];
        let mut a = self.alpha.as_ref().map(|_| vec![1.0f32; pixels]);

        let x_ratio = sw as f32 / tw as f32;
        let y_ratio = sh as f32 / th as f32;
        for y in 0..th as usize {
            let sy = (y as f32 + 0.5) * y_ratio - 0.5;
            let y0 = sy.floor().clamp(0.0, (sh - 1) as f32) as usize;
            let y1 = (y0 + 1).min(sh - 1);
            let fy = (sy - y0 as f32).clamp(0.0, 1.0);
            for x in 0..tw as usize {
                let sx = (x as f32 + 0.5) * x_ratio - 0.5;
                let x0 = sx.floor().clamp(0.0, (sw - 1) as f32) as usize;
                let x1 = (x0 + 1).min(sw - 1);
                let fx = (sx - x0 as f32).clamp(0.0, 1.0);

                let i00 = y0 * sw + x0;
                let i10 = y0 * sw + x1;
                let i01 = y1 * sw + x0;
                let i11 = y1 * sw + x1;
                let dst = y * tw as usize + x;

                r[dst] = lerp2_u16(self.r[i00], self.r[i10], self.r[i01], self.r[i11], fx, fy);
                g[dst] = lerp2_u16(self.g[i00], self.g[i10], self.g[i01], self.g[i11], fx, fy);
                b[dst] = lerp2_u16(self.b[i00], self.b[i10], self.b[i01], self.b[i11], fx, fy);
                if let (Some(dsta), Some(sa)) = (a.as_mut(), self.alpha.as_ref()) {
                    let v = lerp2_f32(sa[i00], sa[i10], sa[i01], sa[i11], fx, fy);
                    dsta[dst] = if v.is_nan() { 1.0 } else { v.clamp(0.0, 1.0) };
                }
            }
        }
        Picture {
            width: tw,
            height: th,
            r,
            g,
            b,
            alpha: a,
        }
    }

    /// Extract `[x, x+w) x [y, y+h)`. The rectangle must lie within the
    /// source.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> FramecastResult<Picture> {
        if w == 0 || h == 0 {
            return Err(FramecastError::invalid_parameter(
                "crop size must be positive",
            ));
        }
        if x.checked_add(w).is_none_or(|e| e > self.width)
            || y.checked_add(h).is_none_or(|e| e > self.height)
        {
            return Err(FramecastError::invalid_parameter(format!(
                "crop rect {x},{y} {w}x{h} exceeds source {}x{}",
                self.width, self.height
            )));
        }
        let pixels = w as usize * h as usize;
        let mut r = Vec::with_capacity(pixels);
        let mut g = Vec::with_capacity(pixels);
        let mut b = Vec::with_capacity(pixels);
        let mut a = self.alpha.as_ref().map(|_| Vec::with_capacity(pixels));
        for row in 0..h as usize {
            let src_row = (y as usize + row) * self.width as usize + x as usize;
            r.extend_from_slice(&self.r[src_row..src_row + w as usize]);
            g.extend_from_slice(&self.g[src_row..src_row + w as usize]);
            b.extend_from_slice(&self.b[src_row..src_row + w as usize]);
            if let (Some(dst), Some(sa)) = (a.as_mut(), self.alpha.as_ref()) {
                dst.extend_from_slice(&sa[src_row..src_row + w as usize]);
            }
        }
        Ok(Picture {
            width: w,
            height: h,
            r,
            g,
            b,
            alpha: a,
        })
    }

    /// Draw this picture onto a fresh transparent canvas of
    /// `canvas_width x canvas_height` at offset `(x, y)`. Pixels falling
    /// outside the canvas are clipped; negative offsets are allowed.
    pub fn place_onto(&self, canvas_width: u32, canvas_height: u32, x: i64, y: i64) -> Picture {
        let pixels = canvas_width as usize * canvas_height as usize;
        let mut r = vec![0u16; pixels];
        let mut g = vec![0u16; pixels];
        let mut b = vec![0u16; pixels];
        let mut a = vec![0.0f32; pixels];
        for sy in 0..self.height as i64 {
            let dy = y + sy;
            if dy < 0 || dy >= canvas_height as i64 {
                continue;
            }
            for sx in 0..self.width as i64 {
                let dx = x + sx;
                if dx < 0 || dx >= canvas_width as i64 {
                    continue;
                }
                let src = sy as usize * self.width as usize + sx as usize;
                let dst = dy as usize * canvas_width as usize + dx as usize;
                r[dst] = self.r[src];
                g[dst] = self.g[src];
                b[dst] = self.b[src];
                a[dst] = self.alpha_at(src);
            }
        }
        Picture {
            width: canvas_width,
            height: canvas_height,
            r,
            g,
            b,
            alpha: Some(a),
        }
    }

    /// Load from an image file (PNG/JPEG/...), widening 8-bit samples to
    /// 16-bit via x257.
    pub fn open(path: impl AsRef<Path>) -> FramecastResult<Picture> {
        let img = image::open(path.as_ref()).map_err(|e| {
            FramecastError::invalid_parameter(format!(
                "cannot decode image '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::from_image(&img))
    }

    pub fn from_image(img: &image::DynamicImage) -> Picture {
        let rgba = img.to_rgba16();
        let (w, h) = (rgba.width(), rgba.height());
        let pixels = w as usize * h as usize;
        let mut r = Vec::with_capacity(pixels);
        let mut g = Vec::with_capacity(pixels);
        let mut b = Vec::with_capacity(pixels);
        let mut a = Vec::with_capacity(pixels);
        for px in rgba.pixels() {
            r.push(px.0[0]);
            g.push(px.0[1]);
            b.push(px.0[2]);
            a.push(px.0[3] as f32 / 65535.0);
        }
        Picture {
            width: w,
            height: h,
            r,
            g,
            b,
            alpha: Some(a),
        }
    }

    /// Convert to a straight-alpha 16-bit RGBA image for encoding.
    pub fn to_rgba16(&self) -> image::ImageBuffer<image::Rgba<u16>, Vec<u16>> {
        let mut out = image::ImageBuffer::new(self.width, self.height);
        for (i, px) in out.pixels_mut().enumerate() {
            let a = (self.alpha_at(i).clamp(0.0, 1.0) * 65535.0).round() as u16;
            *px = image::Rgba([self.r[i], self.g[i], self.b[i], a]);
        }
        out
    }
}

/// Boolean-mask companion to [`Picture`], used by matting effects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<bool>,
}

impl BitMask {
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> FramecastResult<Self> {
        if data.len() != width as usize * height as usize {
            return Err(FramecastError::invalid_parameter(
                "mask length must equal width*height",
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Nearest-neighbor sample, mapping `(x, y)` in a `w x h` space onto this
    /// mask.
    pub fn sample(&self, x: u32, y: u32, w: u32, h: u32) -> bool {
        let mx = (x as u64 * self.width as u64 / w.max(1) as u64).min(self.width as u64 - 1);
        let my = (y as u64 * self.height as u64 / h.max(1) as u64).min(self.height as u64 - 1);
        self.data[(my * self.width as u64 + mx) as usize]
    }
}

/// Fit `src` into `max` preserving aspect (fit-to-max-dimension). Sizes are
/// kept >= 1.
pub fn fit_dimensions(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let src_ratio = src_w as f64 / src_h.max(1) as f64;
    let target_ratio = max_w as f64 / max_h.max(1) as f64;
    if src_ratio > target_ratio {
        let h = (max_w as f64 / src_ratio).round() as u32;
        (max_w.max(1), h.max(1))
    } else {
        let w = (max_h as f64 * src_ratio).round() as u32;
        (w.max(1), max_h.max(1))
    }
}

fn exact_ratio(src: u32, dst: u32) -> bool {
    src > 0 && dst > 0 && (dst % src == 0 || src % dst == 0)
}

fn lerp2_u16(c00: u16, c10: u16, c01: u16, c11: u16, fx: f32, fy: f32) -> u16 {
    let top = c00 as f32 + (c10 as f32 - c00 as f32) * fx;
    let bot = c01 as f32 + (c11 as f32 - c01 as f32) * fx;
    (top + (bot - top) * fy).round().clamp(0.0, 65535.0) as u16
}

fn lerp2_f32(c00: f32, c10: f32, c01: f32, c11: f32, fx: f32, fy: f32) -> f32 {
    let top = c00 + (c10 - c00) * fx;
    let bot = c01 + (c11 - c01) * fx;
    top + (bot - top) * fy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Picture {
        let pixels = (w * h) as usize;
        let r: Vec<u16> = (0..pixels).map(|i| (i * 13 % 65536) as u16).collect();
        let g: Vec<u16> = (0..pixels).map(|i| (i * 29 % 65536) as u16).collect();
        let b: Vec<u16> = (0..pixels).map(|i| (i * 41 % 65536) as u16).collect();
        Picture::new(w, h, r, g, b, None).unwrap()
    }

    #[test]
    fn new_rejects_channel_mismatch() {
        let err = Picture::new(2, 2, vec![0; 3], vec![0; 4], vec![0; 4], None);
        assert!(matches!(err, Err(FramecastError::InvalidParameter(_))));
    }

    #[test]
    fn solid_alpha_presence_follows_argument() {
        assert!(!Picture::solid(4, 4, 1, 2, 3, None).has_alpha());
        assert!(Picture::solid(4, 4, 1, 2, 3, Some(0.5)).has_alpha());
    }

    #[test]
    fn ensure_alpha_is_idempotent() {
        let mut p = Picture::solid(2, 2, 9, 9, 9, None);
        p.ensure_alpha();
        let first = p.alpha().unwrap().to_vec();
        p.ensure_alpha();
        assert_eq!(p.alpha().unwrap(), &first[..]);
        assert!(first.iter().all(|&a| a == 1.0));
    }

    #[test]
    fn resize_identity_returns_equal_buffer() {
        let p = gradient(8, 6);
        let q = p.resize(8, 6, false).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn resize_exact_round_trip_preserves_samples() {
        let p = gradient(4, 4);
        let big = p.resize(8, 8, false).unwrap();
        let back = big.resize(4, 4, false).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn resize_non_exact_requires_flag() {
        let p = gradient(4, 4);
        assert!(matches!(
            p.resize(5, 5, false),
            Err(FramecastError::UnsupportedResize(_))
        ));
        let q = p.resize(5, 5, true).unwrap();
        assert_eq!((q.width(), q.height()), (5, 5));
    }

    #[test]
    fn crop_extracts_subrect() {
        let p = gradient(4, 4);
        let c = p.crop(1, 1, 2, 2).unwrap();
        assert_eq!(c.r()[0], p.r()[1 * 4 + 1]);
        assert_eq!(c.r()[3], p.r()[2 * 4 + 2]);
    }

    #[test]
    fn crop_rejects_out_of_bounds() {
        let p = gradient(4, 4);
        assert!(p.crop(3, 3, 2, 2).is_err());
        assert!(p.crop(0, 0, 0, 1).is_err());
    }

    #[test]
    fn place_clips_and_keeps_rest_transparent() {
        let src = Picture::solid(2, 2, 100, 200, 300, None);
        let out = src.place_onto(3, 3, 2, 2);
        assert_eq!(out.r()[2 * 3 + 2], 100);
        assert_eq!(out.alpha_at(2 * 3 + 2), 1.0);
        assert_eq!(out.alpha_at(0), 0.0);

        let neg = src.place_onto(3, 3, -1, -1);
        assert_eq!(neg.r()[0], 100);
        assert_eq!(neg.alpha_at(0), 1.0);
    }

    #[test]
    fn fit_dimensions_fits_to_max_axis() {
        assert_eq!(fit_dimensions(200, 100, 100, 100), (100, 50));
        assert_eq!(fit_dimensions(100, 200, 100, 100), (50, 100));
        assert_eq!(fit_dimensions(1, 1000, 10, 10), (1, 10));
    }

    #[test]
    fn bitmask_nearest_sample() {
        let m = BitMask::new(2, 2, vec![true, false, false, true]).unwrap();
        assert!(m.sample(0, 0, 4, 4));
        assert!(!m.sample(3, 0, 4, 4));
        assert!(m.sample(3, 3, 4, 4));
    }
}
