use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{FramecastError, FramecastResult};

/// Closed set of elementwise kernels the engine dispatches.
///
/// Each kernel fixes its input/output array arity and ordering; backends must
/// not reorder or reinterpret arrays. Channel-domain kernels (the mix family
/// and the overlay blend) operate on raw sample values (0..=65535 stored as
/// f32); `ColorCorrection` and `RemoveColorMask` operate on normalized [0,1]
/// samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// `[top_c, base_c, top_a, base_a] -> [out_c, out_a]`, raw channel domain.
    OverlayBlend,
    /// `[a, b, upper_bound, allow_overflow] -> [c]`, raw channel domain.
    MixAdd,
    /// `[a, b, upper_bound, allow_overflow] -> [c]`, raw channel domain.
    MixMinus,
    /// `[a, b, upper_bound, allow_overflow] -> [c]`, raw channel domain.
    MixMultiply,
    /// `[v, low, high] -> [m]`, normalized; `m == 1` flags a sample inside the
    /// band, `m == 0` one outside it.
    RemoveColorMask,
    /// `[r, g, b, brightness, contrast, saturation] -> [r', g', b']`,
    /// normalized.
    ColorCorrection,
    /// `[a, b] -> [b]`.
    ReplaceAlpha,
    /// `[v] -> [v]`.
    Identity,
}

impl Kernel {
    pub fn input_arity(self) -> usize {
        match self {
            Kernel::ColorCorrection => 6,
            Kernel::OverlayBlend | Kernel::MixAdd | Kernel::MixMinus | Kernel::MixMultiply => 4,
            Kernel::RemoveColorMask => 3,
            Kernel::ReplaceAlpha => 2,
            Kernel::Identity => 1,
        }
    }

    pub fn output_arity(self) -> usize {
        match self {
            Kernel::ColorCorrection => 3,
            Kernel::OverlayBlend => 2,
            _ => 1,
        }
    }
}

/// Logical accelerator families. The CPU reference implementation always
/// ships; device families are served by the wgpu backend when the `gpu`
/// feature is enabled, and are unavailable otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceleratorKind {
    #[default]
    Auto,
    Cpu,
    Cuda,
    OpenCl,
    OpenGl,
    Metal,
}

impl std::fmt::Display for AcceleratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AcceleratorKind::Auto => "auto",
            AcceleratorKind::Cpu => "cpu",
            AcceleratorKind::Cuda => "cuda",
            AcceleratorKind::OpenCl => "opencl",
            AcceleratorKind::OpenGl => "opengl",
            AcceleratorKind::Metal => "metal",
        };
        f.write_str(name)
    }
}

/// Elementwise numeric kernel executor.
///
/// The element count is taken from the first input array; every further input
/// must have the same length, length 1 (broadcast as a constant), or length 0
/// (treated as all zeros). All implementations must produce numerically
/// identical results for identical inputs: same clamping, same rounding
/// direction. That parity is what makes backends interchangeable and frame
/// output deterministic.
pub trait ComputeBackend: Send + Sync {
    fn kind(&self) -> AcceleratorKind;

    fn compute(&self, kernel: Kernel, inputs: &[&[f32]]) -> FramecastResult<Vec<Vec<f32>>>;
}

/// Instantiate a backend for the requested accelerator family.
///
/// Unavailable device families fail with
/// [`FramecastError::ResourceExhausted`] so callers can retry on CPU.
pub fn create_backend(kind: AcceleratorKind) -> FramecastResult<Box<dyn ComputeBackend>> {
    match kind {
        AcceleratorKind::Auto | AcceleratorKind::Cpu => Ok(Box::new(CpuBackend::new())),
        #[cfg(feature = "gpu")]
        other => Ok(Box::new(crate::compute_gpu::GpuBackend::new(other)?)),
        #[cfg(not(feature = "gpu"))]
        other => Err(FramecastError::resource_exhausted(format!(
            "accelerator '{other}' is not available; rebuild with the `gpu` feature"
        ))),
    }
}

/// Scalar reference implementation. The numeric ground truth every other
/// backend is measured against.
#[derive(Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for CpuBackend {
    fn kind(&self) -> AcceleratorKind {
        AcceleratorKind::Cpu
    }

    fn compute(&self, kernel: Kernel, inputs: &[&[f32]]) -> FramecastResult<Vec<Vec<f32>>> {
        if inputs.len() != kernel.input_arity() {
            return Err(FramecastError::invalid_parameter(format!(
                "kernel {kernel:?} expects {} input arrays, got {}",
                kernel.input_arity(),
                inputs.len()
            )));
        }
        let n = inputs[0].len();
        for (i, arr) in inputs.iter().enumerate().skip(1) {
            if !(arr.len() == n || arr.len() <= 1) {
                return Err(FramecastError::invalid_parameter(format!(
                    "kernel {kernel:?} input {i} has length {}, expected {n}, 1, or 0",
                    arr.len()
                )));
            }
        }
        let at = |arr: &[f32], i: usize| -> f32 {
            match arr.len() {
                0 => 0.0,
                1 => arr[0],
                _ => arr[i],
            }
        };

        match kernel {
            Kernel::OverlayBlend => {
                let mut out_c = vec![0.0f32; n];
                let mut out_a = vec![0.0f32; n];
                for i in 0..n {
                    let (c, a) = overlay_blend(
                        inputs[0][i],
                        at(inputs[1], i),
                        at(inputs[2], i),
                        at(inputs[3], i),
                    );
                    out_c[i] = c;
                    out_a[i] = a;
                }
                Ok(vec![out_c, out_a])
            }
            Kernel::MixAdd | Kernel::MixMinus | Kernel::MixMultiply => {
                let mut out = vec![0.0f32; n];
                for i in 0..n {
                    let a = inputs[0][i];
                    let b = at(inputs[1], i);
                    let bound = at(inputs[2], i) as u16;
                    let allow = at(inputs[3], i) != 0.0;
                    out[i] = match kernel {
                        Kernel::MixAdd => mix_add(a as u32, b as u32, bound, allow),
                        Kernel::MixMinus => mix_minus(a as i32, b as i32, bound, allow),
                        Kernel::MixMultiply => mix_multiply(a as u32, b as u32, bound, allow),
                        _ => unreachable!(),
                    } as f32;
                }
                Ok(vec![out])
            }
            Kernel::RemoveColorMask => {
                let mut out = vec![0.0f32; n];
                for i in 0..n {
                    let v = inputs[0][i];
                    let low = at(inputs[1], i);
                    let high = at(inputs[2], i);
                    out[i] = if v >= low && v <= high { 1.0 } else { 0.0 };
                }
                Ok(vec![out])
            }
            Kernel::ColorCorrection => {
                let mut out_r = vec![0.0f32; n];
                let mut out_g = vec![0.0f32; n];
                let mut out_b = vec![0.0f32; n];
                for i in 0..n {
                    let brightness = at(inputs[3], i);
                    let contrast = at(inputs[4], i);
                    let saturation = at(inputs[5], i);
                    let adjust = |v: f32| ((v - 0.5) * contrast + 0.5) * brightness;
                    let r = adjust(inputs[0][i]);
                    let g = adjust(at(inputs[1], i));
                    let b = adjust(at(inputs[2], i));
                    // Rec. 601 luma weights.
                    let gray = 0.299 * r + 0.587 * g + 0.114 * b;
                    out_r[i] = (gray + (r - gray) * saturation).clamp(0.0, 1.0);
                    out_g[i] = (gray + (g - gray) * saturation).clamp(0.0, 1.0);
                    out_b[i] = (gray + (b - gray) * saturation).clamp(0.0, 1.0);
                }
                Ok(vec![out_r, out_g, out_b])
            }
            Kernel::ReplaceAlpha => {
                let mut out = vec![0.0f32; n];
                for i in 0..n {
                    out[i] = at(inputs[1], i);
                }
                Ok(vec![out])
            }
            Kernel::Identity => Ok(vec![inputs[0].to_vec()]),
        }
    }
}

/// Porter-Duff "A over B" with the engine's exact fast-path guards. The
/// thresholds (1, 0.05, 1e-6) are part of the output contract, not tunables.
fn overlay_blend(top_c: f32, base_c: f32, top_a: f32, base_a: f32) -> (f32, f32) {
    if top_a == 1.0 {
        return (top_c, 1.0);
    }
    if top_a <= 0.05 {
        return (base_c, base_a);
    }
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a < 1e-6 {
        return (0.0, 0.0);
    }
    let out_c = (top_c * top_a + base_c * base_a * (1.0 - top_a)) / out_a;
    (out_c.clamp(0.0, 65535.0), out_a)
}

fn mix_add(a: u32, b: u32, bound: u16, allow_overflow: bool) -> u16 {
    let temp = a + b;
    if temp > 65535 {
        if allow_overflow {
            (temp - 65535) as u16
        } else {
            65535
        }
    } else if bound > 0 && temp >= bound as u32 {
        bound
    } else {
        temp as u16
    }
}

// Negative differences fall through to the plain cast and wrap two's
// complement, matching reference renderer output. The |t - 65535| overflow
// arm is unreachable for 16-bit operands but kept for kernel parity.
fn mix_minus(a: i32, b: i32, bound: u16, allow_overflow: bool) -> u16 {
    let temp = a - b;
    if temp > 65535 {
        if allow_overflow {
            (temp - 65535).unsigned_abs() as u16
        } else {
            65535
        }
    } else if bound > 0 && temp >= bound as i32 {
        bound
    } else {
        temp as u16
    }
}

fn mix_multiply(a: u32, b: u32, bound: u16, allow_overflow: bool) -> u16 {
    let temp = a * b;
    if temp > 65535 {
        if allow_overflow {
            (temp - 65535 * (65535 / temp)) as u16
        } else {
            65535
        }
    } else if bound > 0 && temp >= bound as u32 {
        bound
    } else {
        temp as u16
    }
}

/// A dispatchable accelerator owning its own serialization mutex.
///
/// Some device backends corrupt results under concurrent dispatch, so every
/// `compute` call on a handle is serialized here. This is the correctness
/// boundary; there is no process-wide lock.
pub struct AcceleratorHandle {
    backend: Mutex<Box<dyn ComputeBackend>>,
    kind: AcceleratorKind,
}

impl AcceleratorHandle {
    pub fn new(backend: Box<dyn ComputeBackend>) -> Self {
        let kind = backend.kind();
        Self {
            backend: Mutex::new(backend),
            kind,
        }
    }

    pub fn cpu() -> Self {
        Self::new(Box::new(CpuBackend::new()))
    }

    pub fn with_kind(kind: AcceleratorKind) -> FramecastResult<Self> {
        Ok(Self::new(create_backend(kind)?))
    }

    pub fn kind(&self) -> AcceleratorKind {
        self.kind
    }

    pub fn compute(&self, kernel: Kernel, inputs: &[&[f32]]) -> FramecastResult<Vec<Vec<f32>>> {
        let guard = self
            .backend
            .lock()
            .map_err(|_| FramecastError::resource_exhausted("accelerator mutex poisoned"))?;
        guard.compute(kernel, inputs)
    }
}

impl std::fmt::Debug for AcceleratorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorHandle")
            .field("kind", &self.kind)
            .finish()
    }
}

/// Round-robin dispatcher over a set of accelerator handles.
pub struct BackendPool {
    handles: Vec<AcceleratorHandle>,
    next: AtomicUsize,
}

impl BackendPool {
    pub fn new(handles: Vec<AcceleratorHandle>) -> FramecastResult<Self> {
        if handles.is_empty() {
            return Err(FramecastError::invalid_parameter(
                "backend pool must contain at least one handle",
            ));
        }
        Ok(Self {
            handles,
            next: AtomicUsize::new(0),
        })
    }

    pub fn cpu_only() -> Self {
        Self {
            handles: vec![AcceleratorHandle::cpu()],
            next: AtomicUsize::new(0),
        }
    }

    pub fn acquire(&self) -> &AcceleratorHandle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[i]
    }

    pub fn compute(&self, kernel: Kernel, inputs: &[&[f32]]) -> FramecastResult<Vec<Vec<f32>>> {
        self.acquire().compute(kernel, inputs)
    }
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool")
            .field("handles", &self.handles.len())
            .finish()
    }
}
