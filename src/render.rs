use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    clip::ClipRecord,
    compute::{AcceleratorHandle, AcceleratorKind},
    decode::FrameSink,
    error::{FramecastError, FramecastResult},
    picture::Picture,
    timeline,
};

/// Batch render configuration.
#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    /// Worker count; `None` uses the oversubscribed default, frame work is
    /// decode-heavy and blocks on IO.
    pub threads: Option<usize>,
    /// Strict mode fails the whole batch on the first frame error; otherwise
    /// failed frames degrade to the placeholder and are counted.
    pub strict: bool,
    pub accelerator: AcceleratorKind,
}

impl RenderOptions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            threads: None,
            strict: false,
            accelerator: AcceleratorKind::Auto,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_total: u64,
    pub frames_rendered: u64,
    pub frames_failed: u64,
}

/// Cooperative cancellation flag shared with the caller. Checked before each
/// frame; frames already in flight still finish.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// IO-bound frame work wants more workers than cores.
fn default_thread_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 7 / 4).max(1)
}

fn build_thread_pool(threads: Option<usize>) -> FramecastResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(FramecastError::invalid_parameter(
            "render 'threads' must be >= 1 when set",
        ));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or_else(default_thread_count))
        .build()
        .map_err(|e| {
            FramecastError::resource_exhausted(format!("cannot build render thread pool: {e}"))
        })
}

enum FrameOutcome {
    Rendered(Picture),
    Failed(Picture),
    Cancelled,
}

/// Render `frames` and deliver them to `sink` in frame order.
///
/// Clips must be `re_init`-ed by the caller. Each rayon worker gets its own
/// accelerator handle; pictures are composited in parallel, then appended
/// strictly in order so container-style sinks see a monotone stream.
/// `progress` is invoked from worker threads with (done, total).
pub fn render_batch(
    clips: &[ClipRecord],
    frames: std::ops::Range<u32>,
    options: &RenderOptions,
    sink: &mut dyn FrameSink,
    progress: Option<&(dyn Fn(u64, u64) + Sync)>,
    cancel: &CancelToken,
) -> FramecastResult<RenderStats> {
    for clip in clips {
        if !clip.is_ready() {
            return Err(FramecastError::not_initialized(format!(
                "clip '{}' must be re_init-ed before batch rendering",
                clip.id
            )));
        }
    }

    let indices: Vec<u32> = frames.collect();
    let total = indices.len() as u64;
    let pool = build_thread_pool(options.threads)?;
    debug!(
        frames = total,
        threads = pool.current_num_threads(),
        strict = options.strict,
        "starting batch render"
    );

    let done = AtomicU64::new(0);
    let accelerator = options.accelerator;
    let outcomes = pool.install(|| {
        indices
            .par_iter()
            .map_init(
                || AcceleratorHandle::with_kind(accelerator),
                |backend, &frame| -> FramecastResult<FrameOutcome> {
                    if cancel.is_cancelled() {
                        return Ok(FrameOutcome::Cancelled);
                    }
                    let backend = backend.as_ref().map_err(|e| {
                        FramecastError::resource_exhausted(format!(
                            "cannot create worker accelerator: {e}"
                        ))
                    })?;
                    let outcome = match render_one(clips, frame, options, backend) {
                        Ok(picture) => FrameOutcome::Rendered(picture),
                        Err(err) if options.strict => return Err(err),
                        Err(err) => {
                            warn!(frame, error = %err, "frame failed, emitting placeholder");
                            FrameOutcome::Failed(timeline::placeholder(
                                options.width,
                                options.height,
                            ))
                        }
                    };
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(cb) = progress {
                        cb(finished, total);
                    }
                    Ok(outcome)
                },
            )
            .collect::<Vec<_>>()
    });

    let mut stats = RenderStats {
        frames_total: total,
        ..RenderStats::default()
    };
    for (outcome, &frame) in outcomes.into_iter().zip(&indices) {
        match outcome? {
            FrameOutcome::Rendered(picture) => {
                sink.append(frame, &picture)?;
                stats.frames_rendered += 1;
            }
            FrameOutcome::Failed(picture) => {
                sink.append(frame, &picture)?;
                stats.frames_failed += 1;
            }
            FrameOutcome::Cancelled => break,
        }
    }
    sink.finish()?;
    Ok(stats)
}

fn render_one(
    clips: &[ClipRecord],
    frame: u32,
    options: &RenderOptions,
    backend: &AcceleratorHandle,
) -> FramecastResult<Picture> {
    let layers = timeline::resolve_layers(clips, frame, options.width, options.height)?;
    timeline::composite(&layers, frame, options.width, options.height, backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clip::ClipSource, decode::MemorySink, model::EffectDescriptor};

    fn solid_clip(id: &str, layer: u32, start: u32, duration: u32) -> ClipRecord {
        let mut clip = ClipRecord::new(
            id,
            layer,
            start,
            duration,
            ClipSource::SolidColor {
                r: 1000,
                g: 2000,
                b: 3000,
                alpha: Some(1.0),
            },
        );
        clip.re_init().expect("solid re_init cannot fail");
        clip
    }

    #[test]
    fn zero_threads_is_rejected() {
        let clips = vec![solid_clip("a", 0, 0, 4)];
        let mut opts = RenderOptions::new(4, 4);
        opts.threads = Some(0);
        let mut sink = MemorySink::default();
        assert!(render_batch(&clips, 0..4, &opts, &mut sink, None, &CancelToken::new()).is_err());
    }

    #[test]
    fn uninitialized_clip_is_rejected_upfront() {
        let clips = vec![ClipRecord::new(
            "a",
            0,
            0,
            4,
            ClipSource::SolidColor {
                r: 0,
                g: 0,
                b: 0,
                alpha: Some(1.0),
            },
        )];
        let opts = RenderOptions::new(4, 4);
        let mut sink = MemorySink::default();
        let err = render_batch(&clips, 0..4, &opts, &mut sink, None, &CancelToken::new());
        assert!(matches!(err, Err(FramecastError::NotInitialized(_))));
    }

    #[test]
    fn batch_delivers_frames_in_order() {
        let clips = vec![solid_clip("a", 0, 0, 8)];
        let mut opts = RenderOptions::new(4, 4);
        opts.threads = Some(3);
        let mut sink = MemorySink::default();
        let stats =
            render_batch(&clips, 0..8, &opts, &mut sink, None, &CancelToken::new()).unwrap();
        assert_eq!(stats.frames_total, 8);
        assert_eq!(stats.frames_rendered, 8);
        assert_eq!(stats.frames_failed, 0);
        assert!(sink.finished);
        let order: Vec<u32> = sink.frames.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        assert_eq!(sink.frames[0].1.r()[0], 1000);
    }

    #[test]
    fn empty_timeline_frames_are_black() {
        let clips = vec![solid_clip("a", 0, 100, 10)];
        let opts = RenderOptions::new(2, 2);
        let mut sink = MemorySink::default();
        let stats =
            render_batch(&clips, 0..3, &opts, &mut sink, None, &CancelToken::new()).unwrap();
        assert_eq!(stats.frames_rendered, 3);
        assert_eq!(sink.frames[0].1.r()[0], 0);
    }

    fn broken_clip(id: &str, layer: u32) -> ClipRecord {
        let mut clip = solid_clip(id, layer, 0, 8);
        clip.effects.push(EffectDescriptor {
            type_name: "NoSuchEffect".to_string(),
            parameters: serde_json::Value::Null,
            enabled: true,
            index: 0,
            relative_width: None,
            relative_height: None,
        });
        clip
    }

    #[test]
    fn strict_mode_propagates_frame_errors() {
        let clips = vec![broken_clip("bad", 0)];
        let mut opts = RenderOptions::new(4, 4);
        opts.strict = true;
        let mut sink = MemorySink::default();
        assert!(render_batch(&clips, 0..4, &opts, &mut sink, None, &CancelToken::new()).is_err());
    }

    #[test]
    fn resilient_mode_counts_placeholder_frames() {
        let clips = vec![broken_clip("bad", 0)];
        let opts = RenderOptions::new(4, 4);
        let mut sink = MemorySink::default();
        let stats =
            render_batch(&clips, 0..4, &opts, &mut sink, None, &CancelToken::new()).unwrap();
        assert_eq!(stats.frames_failed, 4);
        assert_eq!(stats.frames_rendered, 0);
        assert_eq!(sink.frames.len(), 4);
    }

    #[test]
    fn cancelled_token_stops_new_frames() {
        let clips = vec![solid_clip("a", 0, 0, 100)];
        let opts = RenderOptions::new(2, 2);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut sink = MemorySink::default();
        let stats = render_batch(&clips, 0..100, &opts, &mut sink, None, &cancel).unwrap();
        assert_eq!(stats.frames_rendered, 0);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn progress_reaches_total() {
        let clips = vec![solid_clip("a", 0, 0, 6)];
        let opts = RenderOptions::new(2, 2);
        let seen = AtomicU64::new(0);
        let progress = |done: u64, _total: u64| {
            seen.fetch_max(done, Ordering::Relaxed);
        };
        let mut sink = MemorySink::default();
        render_batch(
            &clips,
            0..6,
            &opts,
            &mut sink,
            Some(&progress),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 6);
    }
}
