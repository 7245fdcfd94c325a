use std::collections::HashMap;
use std::sync::mpsc;

use tracing::info;

use crate::compute::{AcceleratorKind, ComputeBackend, Kernel};
use crate::error::{FramecastError, FramecastResult};

const WORKGROUP_SIZE: u32 = 64;
// dispatch_workgroups caps each dimension at 65535.
const MAX_GROUPS_PER_DIM: u32 = 65535;

/// wgpu compute backend. One shader module carries an entry point per
/// [`Kernel`], compiled once at startup; every `compute` call uploads the
/// expanded inputs, dispatches, and reads the result back synchronously.
///
/// The WGSL kernels mirror [`crate::compute::CpuBackend`] operation for
/// operation, including the integer wrap arithmetic of the mix family.
pub struct GpuBackend {
    kind: AcceleratorKind,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: HashMap<Kernel, wgpu::ComputePipeline>,
}

impl GpuBackend {
    /// Acquire a device for the requested accelerator family.
    ///
    /// Fails with [`FramecastError::ResourceExhausted`] when no adapter of
    /// that family is present, so callers can fall back to CPU.
    pub fn new(kind: AcceleratorKind) -> FramecastResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: backends_for(kind),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|e| {
            FramecastError::resource_exhausted(format!("no adapter for accelerator '{kind}': {e}"))
        })?;
        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("framecast_compute"),
                ..Default::default()
            }))
            .map_err(|e| {
                FramecastError::resource_exhausted(format!(
                    "accelerator '{kind}' rejected device request: {e}"
                ))
            })?;
        info!(accelerator = %kind, adapter = %adapter.get_info().name, "gpu backend ready");

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("framecast_kernels"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(KERNELS_WGSL)),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("framecast_kernels_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("framecast_kernels_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mut pipelines = HashMap::new();
        for kernel in [
            Kernel::OverlayBlend,
            Kernel::MixAdd,
            Kernel::MixMinus,
            Kernel::MixMultiply,
            Kernel::RemoveColorMask,
            Kernel::ColorCorrection,
            Kernel::ReplaceAlpha,
            Kernel::Identity,
        ] {
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point(kernel)),
                layout: Some(&layout),
                module: &module,
                entry_point: Some(entry_point(kernel)),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            pipelines.insert(kernel, pipeline);
        }

        Ok(Self {
            kind,
            device,
            queue,
            pipelines,
        })
    }
}

impl ComputeBackend for GpuBackend {
    fn kind(&self) -> AcceleratorKind {
        self.kind
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
        let out_arity = kernel.output_arity();
        if n == 0 {
            return Ok(vec![Vec::new(); out_arity]);
        }

        // Broadcast and zero-fill on the host; the shader indexes flat
        // length-n slots.
        let mut flat = Vec::with_capacity(inputs.len() * n);
        for arr in inputs {
            match arr.len() {
                0 => flat.extend(std::iter::repeat_n(0.0f32, n)),
                1 => flat.extend(std::iter::repeat_n(arr[0], n)),
                _ => flat.extend_from_slice(arr),
            }
        }

        use wgpu::util::DeviceExt;
        let params: [u32; 4] = [n as u32, 0, 0, 0];
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let input_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_inputs"),
                contents: bytemuck::cast_slice(&flat),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let out_size = (out_arity * n * std::mem::size_of::<f32>()) as u64;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_outputs"),
            size: out_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_readback"),
            size: out_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let pipeline = self.pipelines.get(&kernel).ok_or_else(|| {
            FramecastError::unsupported_operation(format!("kernel {kernel:?} has no gpu pipeline"))
        })?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel_bind_group"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
            ],
        });

        let groups = (n as u32).div_ceil(WORKGROUP_SIZE);
        let groups_x = groups.min(MAX_GROUPS_PER_DIM);
        let groups_y = groups.div_ceil(groups_x);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel_dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(entry_point(kernel)),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, out_size);
        self.queue.submit(Some(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        staging_buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.device.poll(wgpu::PollType::Wait).map_err(|e| {
            FramecastError::resource_exhausted(format!("gpu poll failed: {e}"))
        })?;
        rx.recv()
            .map_err(|_| FramecastError::resource_exhausted("gpu readback callback dropped"))?
            .map_err(|e| FramecastError::resource_exhausted(format!("gpu readback failed: {e}")))?;

        let data: Vec<f32> = {
            let view = staging_buffer.slice(..).get_mapped_range();
            bytemuck::cast_slice(&view).to_vec()
        };
        staging_buffer.unmap();

        Ok(data.chunks_exact(n).map(|c| c.to_vec()).collect())
    }
}

impl std::fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBackend").field("kind", &self.kind).finish()
    }
}

fn backends_for(kind: AcceleratorKind) -> wgpu::Backends {
    match kind {
        AcceleratorKind::Metal => wgpu::Backends::METAL,
        AcceleratorKind::OpenGl => wgpu::Backends::GL,
        AcceleratorKind::Cuda | AcceleratorKind::OpenCl => {
            wgpu::Backends::VULKAN | wgpu::Backends::DX12
        }
        AcceleratorKind::Auto | AcceleratorKind::Cpu => wgpu::Backends::all(),
    }
}

fn entry_point(kernel: Kernel) -> &'static str {
    match kernel {
        Kernel::OverlayBlend => "overlay_blend",
        Kernel::MixAdd => "mix_add",
        Kernel::MixMinus => "mix_minus",
        Kernel::MixMultiply => "mix_multiply",
        Kernel::RemoveColorMask => "remove_color_mask",
        Kernel::ColorCorrection => "color_correction",
        Kernel::ReplaceAlpha => "replace_alpha",
        Kernel::Identity => "identity",
    }
}

// Inputs are concatenated length-n slots: input[k * len + i] is element i of
// array k. Outputs use the same layout. The mix kernels keep the CPU
// backend's integer arithmetic, including the two's-complement wrap of the
// minus kernel and the 16-bit truncation of the wrapped results.
const KERNELS_WGSL: &str = r#"
struct Params {
    len: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

fn flat_index(gid: vec3<u32>, nwg: vec3<u32>) -> u32 {
    return gid.y * nwg.x * 64u + gid.x;
}

@compute @workgroup_size(64)
fn overlay_blend(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    let n = params.len;
    if i >= n {
        return;
    }
    let top_c = input[i];
    let base_c = input[n + i];
    let top_a = input[2u * n + i];
    let base_a = input[3u * n + i];

    var out_c: f32;
    var out_a: f32;
    if top_a == 1.0 {
        out_c = top_c;
        out_a = 1.0;
    } else if top_a <= 0.05 {
        out_c = base_c;
        out_a = base_a;
    } else {
        out_a = top_a + base_a * (1.0 - top_a);
        if out_a < 1e-6 {
            out_c = 0.0;
            out_a = 0.0;
        } else {
            out_c = clamp(
                (top_c * top_a + base_c * base_a * (1.0 - top_a)) / out_a,
                0.0,
                65535.0,
            );
        }
    }
    output[i] = out_c;
    output[n + i] = out_a;
}

fn mix_common(temp_in_range: u32, bound: u32) -> u32 {
    if bound > 0u && temp_in_range >= bound {
        return bound;
    }
    return temp_in_range;
}

@compute @workgroup_size(64)
fn mix_add(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    let n = params.len;
    if i >= n {
        return;
    }
    let a = u32(input[i]);
    let b = u32(input[n + i]);
    let bound = u32(input[2u * n + i]);
    let allow = input[3u * n + i] != 0.0;
    let temp = a + b;
    var result: u32;
    if temp > 65535u {
        if allow {
            result = (temp - 65535u) & 0xffffu;
        } else {
            result = 65535u;
        }
    } else {
        result = mix_common(temp, bound);
    }
    output[i] = f32(result);
}

@compute @workgroup_size(64)
fn mix_minus(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    let n = params.len;
    if i >= n {
        return;
    }
    let a = i32(input[i]);
    let b = i32(input[n + i]);
    let bound = i32(input[2u * n + i]);
    let allow = input[3u * n + i] != 0.0;
    let temp = a - b;
    var result: u32;
    if temp > 65535 {
        if allow {
            result = u32(abs(temp - 65535)) & 0xffffu;
        } else {
            result = 65535u;
        }
    } else if bound > 0 && temp >= bound {
        result = u32(bound);
    } else {
        result = bitcast<u32>(temp) & 0xffffu;
    }
    output[i] = f32(result);
}

@compute @workgroup_size(64)
fn mix_multiply(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    let n = params.len;
    if i >= n {
        return;
    }
    let a = u32(input[i]);
    let b = u32(input[n + i]);
    let bound = u32(input[2u * n + i]);
    let allow = input[3u * n + i] != 0.0;
    let temp = a * b;
    var result: u32;
    if temp > 65535u {
        if allow {
            result = (temp - 65535u * (65535u / temp)) & 0xffffu;
        } else {
            result = 65535u;
        }
    } else {
        result = mix_common(temp, bound);
    }
    output[i] = f32(result);
}

@compute @workgroup_size(64)
fn remove_color_mask(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    let n = params.len;
    if i >= n {
        return;
    }
    let v = input[i];
    let low = input[n + i];
    let high = input[2u * n + i];
    output[i] = select(0.0, 1.0, v >= low && v <= high);
}

@compute @workgroup_size(64)
fn color_correction(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    let n = params.len;
    if i >= n {
        return;
    }
    let brightness = input[3u * n + i];
    let contrast = input[4u * n + i];
    let saturation = input[5u * n + i];
    let r = ((input[i] - 0.5) * contrast + 0.5) * brightness;
    let g = ((input[n + i] - 0.5) * contrast + 0.5) * brightness;
    let b = ((input[2u * n + i] - 0.5) * contrast + 0.5) * brightness;
    let gray = 0.299 * r + 0.587 * g + 0.114 * b;
    output[i] = clamp(gray + (r - gray) * saturation, 0.0, 1.0);
    output[n + i] = clamp(gray + (g - gray) * saturation, 0.0, 1.0);
    output[2u * n + i] = clamp(gray + (b - gray) * saturation, 0.0, 1.0);
}

@compute @workgroup_size(64)
fn replace_alpha(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    let n = params.len;
    if i >= n {
        return;
    }
    output[i] = input[n + i];
}

@compute @workgroup_size(64)
fn identity(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let i = flat_index(gid, nwg);
    if i >= params.len {
        return;
    }
    output[i] = input[i];
}
"#;
