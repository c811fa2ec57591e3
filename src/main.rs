// ============================================================================
// fluxis CLI: headless background removal and before/after rendering
// ============================================================================
//
// Usage examples:
//   fluxis process -i photo.jpg                         (writes photo-processed.png)
//   fluxis process -i photo.jpg -o out.jpg --color "#00ff00" --upscale 2x
//   fluxis process -i photo.png --alpha-matting --fg-threshold 230 --erode-size 5
//   fluxis compare -i photo.jpg -o split.png --viewport 1024x768 --separator 0.3

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

use fluxis::compositor::{flatten_for_opaque_format, BackgroundColor};
use fluxis::config::{Settings, ViewportSettings};
use fluxis::io::{format_supports_alpha, output_format, write_image};
use fluxis::removal::{RemovalConfig, MAX_ERODE_SIZE};
use fluxis::worker::{Controller, JobOutcome};
use fluxis::{EdgeFloodRemover, LanczosUpscaler, Pipeline, RasterImage, UpscaleMode};

/// Background remover and upscaler.
#[derive(Parser, Debug)]
#[command(name = "fluxis", version, about = "Remove image backgrounds, recolour and upscale")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON settings file. Command-line flags override its values.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Also write a debug log to this file.
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Increase terminal log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, remove background, recolour, upscale and save.
    Process(ProcessArgs),
    /// Render the before/after comparison view to an image.
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct RemovalArgs {
    /// Soften the cut into graded alpha along edges.
    #[arg(long)]
    alpha_matting: bool,

    /// Foreground threshold (0-255). Only used with --alpha-matting.
    #[arg(long, value_name = "0-255")]
    fg_threshold: Option<u8>,

    /// Background threshold (0-255). Only used with --alpha-matting.
    #[arg(long, value_name = "0-255")]
    bg_threshold: Option<u8>,

    /// Erode size (0-50). Only used with --alpha-matting.
    #[arg(
        long,
        value_name = "0-50",
        value_parser = clap::value_parser!(u8).range(0..=MAX_ERODE_SIZE as i64)
    )]
    erode_size: Option<u8>,

    /// Keep the original background (skip removal).
    #[arg(long)]
    keep_background: bool,

    /// Background colour as hex, e.g. "#00ff00".
    #[arg(long, value_name = "HEX")]
    color: Option<String>,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Input image.
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Output file. Defaults to "<input>-processed.png" next to the input.
    /// JPEG output drops transparency.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    #[command(flatten)]
    removal: RemovalArgs,

    /// Upscaling: none or 2x.
    #[arg(long, value_name = "MODE")]
    upscale: Option<UpscaleMode>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Input image.
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Output image for the rendered comparison frame.
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    #[command(flatten)]
    removal: RemovalArgs,

    /// Viewport size as WIDTHxHEIGHT.
    #[arg(long, value_name = "WxH", value_parser = parse_viewport)]
    viewport: Option<ViewportSettings>,

    /// Separator position across the image, 0.0 (left) to 1.0 (right).
    #[arg(long, default_value_t = 0.5)]
    separator: f32,
}

fn parse_viewport(s: &str) -> Result<ViewportSettings, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err("viewport must be non-empty".to_string());
    }
    Ok(ViewportSettings { width, height })
}

fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }
    CombinedLogger::init(loggers).context("installing logger")?;
    Ok(())
}

/// Fold command-line overrides into the file settings
fn removal_config(base: RemovalConfig, args: &RemovalArgs) -> RemovalConfig {
    RemovalConfig {
        alpha_matting: base.alpha_matting || args.alpha_matting,
        foreground_threshold: args.fg_threshold.unwrap_or(base.foreground_threshold),
        background_threshold: args.bg_threshold.unwrap_or(base.background_threshold),
        erode_size: args.erode_size.unwrap_or(base.erode_size),
    }
}

/// Wait for the single in-flight job and require that it was applied
async fn finish_job(controller: &mut Controller) -> anyhow::Result<()> {
    match controller.apply_next().await {
        None | Some(Ok(JobOutcome::Committed { .. })) => Ok(()),
        Some(Ok(other)) => bail!("job was not applied: {:?}", other),
        Some(Err(e)) => Err(e.into()),
    }
}

/// Shared front half of both commands: load, cut out, recolour
async fn prepare(
    settings: &Settings,
    input: &Path,
    args: &RemovalArgs,
    viewport: ViewportSettings,
) -> anyhow::Result<Controller> {
    let pipeline = Pipeline::new(viewport.width, viewport.height);
    let mut controller = Controller::new(
        pipeline,
        Arc::new(EdgeFloodRemover::default()),
        Arc::new(LanczosUpscaler),
    );

    controller.load_path(input)?;

    if !args.keep_background {
        let config = removal_config(settings.removal, args);
        config.validate()?;
        controller.submit_removal(config)?;
        finish_job(&mut controller).await.context("removing background")?;
    }

    let color = match &args.color {
        Some(hex) => Some(hex.parse::<BackgroundColor>()?),
        None => settings.background_color()?,
    };
    if color.is_some() {
        controller.pipeline_mut().set_background_color(color)?;
    }

    Ok(controller)
}

async fn run_process(settings: Settings, args: ProcessArgs) -> anyhow::Result<()> {
    let mut controller = prepare(&settings, &args.input, &args.removal, settings.viewport).await?;

    let mode = args.upscale.unwrap_or(settings.upscale);
    if controller.submit_upscale(mode)?.is_some() {
        finish_job(&mut controller).await.context("upscaling")?;
    }

    let pipeline = controller.pipeline_mut();
    let output = args
        .output
        .unwrap_or_else(|| args.input.with_file_name(pipeline.suggested_output_name()));
    pipeline.save(&output)?;

    println!("{}", output.display());
    Ok(())
}

async fn run_compare(settings: Settings, args: CompareArgs) -> anyhow::Result<()> {
    let viewport = args.viewport.unwrap_or(settings.viewport);
    let mut controller = prepare(&settings, &args.input, &args.removal, viewport).await?;

    let view = controller.pipeline_mut().view_mut();
    if let (Some(left), Some(width)) = (view.image_left_edge(), view.displayed_width()) {
        let x = left + args.separator.clamp(0.0, 1.0) * width as f32;
        view.on_pointer_down(x, 0.0);
    }

    let frame = RasterImage::Rgba(view.render().rasterize());
    let format = output_format(&args.output)?;
    let frame = if format_supports_alpha(format) {
        frame
    } else {
        RasterImage::Rgb(flatten_for_opaque_format(&frame))
    };
    write_image(&frame, &args.output, format)?;

    info!("Comparison frame written to {}", args.output.display());
    println!("{}", args.output.display());
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("reading settings {}", path.display()))?,
        None => Settings::default(),
    };

    let base_level: LevelFilter = settings.log_level.parse().unwrap_or(LevelFilter::Info);
    let level = match cli.verbose {
        0 => base_level,
        1 => LevelFilter::Debug.max(base_level),
        _ => LevelFilter::Trace,
    };
    init_logging(level, cli.log_file.as_deref())?;

    match cli.command {
        Command::Process(args) => run_process(settings, args).await,
        Command::Compare(args) => run_compare(settings, args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
