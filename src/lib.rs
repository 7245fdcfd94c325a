#![forbid(unsafe_code)]

pub mod clip;
pub mod compute;
#[cfg(feature = "gpu")]
pub mod compute_gpu;
pub mod decode;
pub mod error;
pub mod fx;
pub mod mixture;
pub mod model;
pub mod picture;
pub mod render;
pub mod timeline;

pub use clip::{ClipRecord, ClipSource};
pub use compute::{
    AcceleratorHandle, AcceleratorKind, BackendPool, ComputeBackend, CpuBackend, Kernel,
    create_backend,
};
#[cfg(feature = "gpu")]
pub use compute_gpu::GpuBackend;
pub use decode::{FrameDecoder, FrameSink, MemorySink, PngDirectorySink, open_source};
pub use error::{FramecastError, FramecastResult};
pub use fx::{BindableEffect, BoundValue, Effect, EffectContext, Role, apply_chain, parse_effect};
pub use mixture::{MixtureArgs, MixtureMode, mix, remove_color};
pub use model::{ClipDraft, ClipType, Draft, EffectDescriptor, Resolution};
pub use picture::{BitMask, Picture, fit_dimensions};
pub use render::{CancelToken, RenderOptions, RenderStats, render_batch};
pub use timeline::{
    NULL_FRAME_HASH, OneFrame, OverlapInfo, composite, composite_or_placeholder, find_overlaps,
    frame_hash, has_overlap, resolve_layers,
};
