use std::{
    fs::File,
    io::{BufReader, Read as _},
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use framecast::{
    AcceleratorKind, CancelToken, ClipRecord, Draft, PngDirectorySink, RenderOptions, find_overlaps,
    frame_hash, render_batch,
};

#[derive(Parser, Debug)]
#[command(name = "framecast", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a frame range of a draft as numbered PNGs.
    Render(RenderArgs),
    /// Print the content hash of one timeline frame.
    Hash(HashArgs),
    /// Report same-layer clip range overlaps in a draft.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input draft JSON.
    #[arg(long)]
    draft: PathBuf,

    /// Output directory for PNG frames.
    #[arg(long)]
    out: PathBuf,

    /// Output width; defaults to the draft's relative resolution.
    #[arg(long)]
    width: Option<u32>,

    /// Output height; defaults to the draft's relative resolution.
    #[arg(long)]
    height: Option<u32>,

    /// First frame to render (0-based).
    #[arg(long, default_value_t = 0)]
    start: u32,

    /// Frame count; defaults to the draft's natural length.
    #[arg(long)]
    frames: Option<u32>,

    /// Worker thread count.
    #[arg(long)]
    threads: Option<usize>,

    /// Fail the whole batch on the first frame error instead of emitting
    /// placeholders.
    #[arg(long)]
    strict: bool,

    /// Accelerator to use.
    #[arg(long, value_enum, default_value_t = AcceleratorChoice::Cpu)]
    accelerator: AcceleratorChoice,
}

#[derive(Parser, Debug)]
struct HashArgs {
    /// Input draft JSON.
    #[arg(long)]
    draft: PathBuf,

    /// Frame index (0-based).
    #[arg(long)]
    frame: u32,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Input draft JSON.
    #[arg(long)]
    draft: PathBuf,

    /// Overlap length tolerated without reporting, in frames.
    #[arg(long, default_value_t = 0)]
    allowed_overlap: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AcceleratorChoice {
    Cpu,
    Cuda,
    Opencl,
    Opengl,
    Metal,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Hash(args) => cmd_hash(args),
        Command::Check(args) => cmd_check(args),
    }
}

fn read_draft(path: &Path) -> anyhow::Result<Draft> {
    let f = File::open(path).with_context(|| format!("open draft '{}'", path.display()))?;
    let mut json = String::new();
    BufReader::new(f)
        .read_to_string(&mut json)
        .with_context(|| format!("read draft '{}'", path.display()))?;
    Ok(Draft::from_json(&json)?)
}

fn build_clips(draft: &Draft) -> anyhow::Result<Vec<ClipRecord>> {
    let mut clips = Vec::with_capacity(draft.clips.len());
    for clip_draft in &draft.clips {
        let mut clip = ClipRecord::from_draft(clip_draft)?;
        clip.re_init()
            .with_context(|| format!("open source of clip '{}'", clip_draft.id))?;
        clips.push(clip);
    }
    Ok(clips)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let draft = read_draft(&args.draft)?;
    let clips = build_clips(&draft)?;

    let width = args.width.unwrap_or(draft.relative_resolution.width);
    let height = args.height.unwrap_or(draft.relative_resolution.height);
    let count = args.frames.unwrap_or_else(|| draft.end_frame());
    let end = args
        .start
        .checked_add(count)
        .context("frame range overflows u32")?;

    let mut options = RenderOptions::new(width, height);
    options.threads = args.threads;
    options.strict = args.strict;
    options.accelerator = match args.accelerator {
        AcceleratorChoice::Cpu => AcceleratorKind::Cpu,
        AcceleratorChoice::Cuda => AcceleratorKind::Cuda,
        AcceleratorChoice::Opencl => AcceleratorKind::OpenCl,
        AcceleratorChoice::Opengl => AcceleratorKind::OpenGl,
        AcceleratorChoice::Metal => AcceleratorKind::Metal,
    };

    let mut sink = PngDirectorySink::new(&args.out)?;
    let stats = render_batch(
        &clips,
        args.start..end,
        &options,
        &mut sink,
        None,
        &CancelToken::new(),
    )?;

    eprintln!(
        "wrote {} frames to {} ({} failed)",
        stats.frames_rendered + stats.frames_failed,
        args.out.display(),
        stats.frames_failed
    );
    Ok(())
}

fn cmd_hash(args: HashArgs) -> anyhow::Result<()> {
    let draft = read_draft(&args.draft)?;
    let clips = build_clips(&draft)?;
    println!("{}", frame_hash(&clips, args.frame)?);
    Ok(())
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let draft = read_draft(&args.draft)?;
    let mut clips = Vec::with_capacity(draft.clips.len());
    for clip_draft in &draft.clips {
        clips.push(ClipRecord::from_draft(clip_draft)?);
    }

    let overlaps = find_overlaps(&clips, args.allowed_overlap);
    if overlaps.is_empty() {
        eprintln!("no overlaps");
        return Ok(());
    }
    for o in &overlaps {
        eprintln!(
            "layer {}: {} overlaps {} by {} frames",
            o.layer_index, o.clip_a, o.clip_b, o.overlap_frames
        );
    }
    anyhow::bail!("{} overlap(s) found", overlaps.len())
}
