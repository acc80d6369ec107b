use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use svgaplay::load::DefaultFetcher;
use svgaplay::playback::{EnvironmentClock, IntervalDriver, PlaybackEvent};
use svgaplay::{Engine, EngineOpts, MovieSource, PixelSize, PlaybackOpts, Priority, ScalePolicy};

#[derive(Parser, Debug)]
#[command(name = "svgaplay", version)]
struct Cli {
    /// Engine configuration JSON (defaults apply to missing fields).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print canvas, timing and resource counts as JSON.
    Inspect(InspectArgs),
    /// Render a single frame as a PNG.
    Frame(FrameArgs),
    /// Drive playback from a real-time clock and log frame steps.
    Play(PlayArgs),
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// URL, file path or asset path of the movie.
    source: String,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// URL, file path or asset path of the movie.
    source: String,

    /// Frame index (0-based).
    #[arg(long, default_value_t = 0)]
    frame: u32,

    /// Output width in pixels (defaults to the movie canvas width).
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels (defaults to the movie canvas height).
    #[arg(long)]
    height: Option<u32>,

    /// fit, crop, fill or inside.
    #[arg(long, default_value = "fit")]
    scale: ScalePolicy,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct PlayArgs {
    /// URL, file path or asset path of the movie.
    source: String,

    /// How long to run the clock.
    #[arg(long, default_value_t = 3.0)]
    seconds: f64,

    /// high, normal or low.
    #[arg(long, default_value = "normal")]
    priority: Priority,

    /// Loop count; 0 loops until the clock stops.
    #[arg(long, default_value_t = 0)]
    loops: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let opts = load_opts(cli.config.as_deref())?;
    match cli.cmd {
        Command::Inspect(args) => cmd_inspect(opts, args),
        Command::Frame(args) => cmd_frame(opts, args),
        Command::Play(args) => cmd_play(opts, args),
    }
}

fn load_opts(path: Option<&std::path::Path>) -> anyhow::Result<EngineOpts> {
    let opts = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("read config '{}'", p.display()))?;
            EngineOpts::from_json_str(&text)?
        }
        None => EngineOpts::default(),
    };
    let mut opts = opts.with_env_overrides();
    if opts.loader.asset_root.is_none() {
        opts.loader.asset_root = Some(std::env::current_dir().context("resolve working dir")?);
    }
    Ok(opts)
}

fn cmd_inspect(opts: EngineOpts, args: InspectArgs) -> anyhow::Result<()> {
    let engine = Engine::new(opts)?;
    let entity = engine.load_blocking(MovieSource::parse(&args.source))?;

    let view_box = entity.view_box();
    let report = serde_json::json!({
        "source": args.source,
        "cache_key": entity.cache_key(),
        "version": entity.version(),
        "view_box": { "width": view_box.width, "height": view_box.height },
        "fps": entity.fps(),
        "frames": entity.frames(),
        "sprites": entity.sprites().len(),
        "images": entity.bitmap_keys(),
        "bitmap_bytes": entity.bitmap_bytes(),
        "audio": entity.audio_tracks(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_frame(opts: EngineOpts, args: FrameArgs) -> anyhow::Result<()> {
    let engine = Engine::new(opts)?;
    let entity = engine.load_blocking(MovieSource::parse(&args.source))?;

    let view_box = entity.view_box();
    let size = PixelSize::new(
        args.width.unwrap_or(view_box.width.ceil() as u32),
        args.height.unwrap_or(view_box.height.ceil() as u32),
    )?;
    let frame = engine.render_frame(&entity, args.frame, size, args.scale, None)?;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &frame.to_rgba8_straight(),
        size.width,
        size.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_play(opts: EngineOpts, args: PlayArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.seconds.is_finite() && args.seconds > 0.0,
        "--seconds must be positive"
    );
    let fetcher = Arc::new(DefaultFetcher::new(&opts.loader));
    let clock = EnvironmentClock::new(IntervalDriver::display_rate());
    let engine = Engine::with_services(opts, fetcher, clock)?;
    let entity = engine.load_blocking(MovieSource::parse(&args.source))?;

    let play_opts = PlaybackOpts {
        priority: args.priority,
        loops: args.loops,
        ..PlaybackOpts::default()
    };
    let clock = engine.clock().clone();
    let id = engine.play(&entity, play_opts, move |_, event| match event {
        PlaybackEvent::Started => tracing::info!("started"),
        PlaybackEvent::Frame(f) => {
            tracing::debug!(frame = *f, load_fps = clock.load_fps(), "frame")
        }
        PlaybackEvent::Step { frame, percentage } => {
            tracing::info!(frame = *frame, percent = percentage * 100.0, "step")
        }
        PlaybackEvent::Finished => tracing::info!("finished"),
    });

    std::thread::sleep(Duration::from_secs_f64(args.seconds));
    let instance = engine.scheduler().unregister(id);
    let last = instance.as_ref().and_then(|i| i.last_frame());
    let finished = instance.is_some_and(|i| i.is_finished());
    eprintln!("stopped at frame {last:?} (finished: {finished})");
    Ok(())
}
