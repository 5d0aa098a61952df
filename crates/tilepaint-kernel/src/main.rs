use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tilepaint_core::{
    order_seeded, quantize_image, Anchor, Ledger, OrderStrategy, PaintConfig, Palette,
    PaletteColor, PlanBuilder, Quantizer, Rgba, SessionSnapshot, SourceImage,
};
use tilepaint_kernel::{
    logging, select_anchor, BatchScheduler, ColorProbe, EventBus, PaintEvent, SchedulerSession,
    SessionClock, SimulatedCanvas, StopSource,
};
use tokio::sync::broadcast::{self, error::RecvError};

const SIM_MAX_CHARGES: u32 = 40;

fn cli() -> Command {
    let session_args = [
        Arg::new("image")
            .long("image")
            .value_parser(value_parser!(PathBuf))
            .help("PNG to paint; a generated pattern is used when omitted"),
        Arg::new("width")
            .long("width")
            .default_value("16")
            .value_parser(value_parser!(u32))
            .help("Width of the generated pattern"),
        Arg::new("height")
            .long("height")
            .default_value("16")
            .value_parser(value_parser!(u32))
            .help("Height of the generated pattern"),
        Arg::new("config")
            .long("config")
            .value_parser(value_parser!(PathBuf))
            .help("TOML configuration file"),
        Arg::new("strategy")
            .long("strategy")
            .value_parser(value_parser!(OrderStrategy))
            .help("Plan ordering, overrides the config file"),
        Arg::new("seed")
            .long("seed")
            .default_value("42")
            .value_parser(value_parser!(u64))
            .help("Seed for the generated pattern and shuffle ordering"),
        Arg::new("anchor")
            .long("anchor")
            .default_value("0,0,990,990")
            .help("Image origin as tile_x,tile_y,local_x,local_y"),
    ];

    Command::new("tilepaint")
        .version(tilepaint_kernel::VERSION)
        .about("Rate-limited reconciling tile painter")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Paint an image onto the in-memory canvas")
                .args(session_args.clone())
                .arg(
                    Arg::new("vandalize")
                        .long("vandalize")
                        .default_value("0")
                        .value_parser(value_parser!(usize))
                        .help("Overwrite this many painted pixels halfway through"),
                )
                .arg(
                    Arg::new("fast")
                        .long("fast")
                        .action(ArgAction::SetTrue)
                        .help("Shrink regeneration and pauses to milliseconds"),
                )
                .arg(
                    Arg::new("save")
                        .long("save")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the session snapshot here when the run ends"),
                )
                .arg(
                    Arg::new("resume")
                        .long("resume")
                        .value_parser(value_parser!(PathBuf))
                        .help("Continue a saved session instead of planning a new one"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the ordered plan preview as JSON")
                .args(session_args),
        )
        .subcommand(Command::new("config").about("Print the default configuration as TOML"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    logging::init("info", matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("plan", args)) => {
            let config = load_config(args)?;
            let palette = default_palette();
            let session = plan_session(args, config, palette, parse_anchor(args)?)?;
            println!("{}", serde_json::to_string_pretty(&session.plan_preview())?);
            Ok(())
        }
        Some(("config", _)) => {
            print!("{}", PaintConfig::default().to_toml()?);
            Ok(())
        }
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}

async fn simulate(args: &ArgMatches) -> Result<()> {
    let mut config = load_config(args)?;
    if args.get_flag("fast") {
        config.charge_regen_ms = 100;
        config.retry_base_delay_ms = 50;
        config.inter_batch_pause_ms = 10;
        config.failed_batch_pause_ms = 50;
        config.charge_wait_margin_ms = 20;
        config.progress_interval_ms = 250;
    }

    let canvas = SimulatedCanvas::new(
        config.tile_size,
        default_palette(),
        f64::from(SIM_MAX_CHARGES) / 2.0,
        SIM_MAX_CHARGES,
        config.charge_regen_ms,
    );
    let palette = Palette::from_colors(
        canvas
            .list_available_colors()
            .await
            .context("listing available colors")?,
    );

    let stop = StopSource::new();
    let session = match args.get_one::<PathBuf>("resume") {
        Some(path) => {
            let snapshot = SessionSnapshot::load(path)
                .with_context(|| format!("loading session from {}", path.display()))?;
            let mut session = SchedulerSession::from_snapshot(snapshot, config, SessionClock::new())?;
            let report = session.revalidate_palette(palette)?;
            if report.remapped + report.dropped > 0 {
                tracing::warn!(remapped = report.remapped, dropped = report.dropped, "palette changed since save");
            }
            session
        }
        None => {
            canvas.set_position(parse_anchor(args)?);
            let anchor = select_anchor(
                &canvas,
                config.tile_size,
                config.position_timeout(),
                &stop.token(),
            )
            .await?;
            plan_session(args, config, palette, anchor)?
        }
    };

    let events = EventBus::new();
    let printer = tokio::spawn(print_events(events.subscribe()));
    let vandal = match args.get_one::<usize>("vandalize").copied().unwrap_or(0) {
        0 => None,
        count => Some(tokio::spawn(vandalize(
            events.subscribe(),
            canvas.clone(),
            session.plan_preview(),
            count,
        ))),
    };

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current step");
            ctrl_c_stop.stop();
        }
    });

    let ttl = session.config().credential_ttl();
    let mut scheduler = BatchScheduler::new(session, canvas.collaborators(ttl), events, stop.token());
    let outcome = scheduler.run().await;
    let session = scheduler.into_session();

    if let Some(path) = args.get_one::<PathBuf>("save") {
        session
            .to_snapshot()
            .save(path)
            .with_context(|| format!("saving session to {}", path.display()))?;
        println!("session saved to {}", path.display());
    }
    if let Some(vandal) = vandal {
        vandal.abort();
    }
    // the printer ends once the scheduler has dropped every sender
    let _ = printer.await;

    let report = outcome?;
    println!(
        "painted {} / verified {} / repaired {} of {} ({} remaining, {} writes)",
        report.painted,
        report.verified,
        report.repaired,
        report.total,
        report.remaining,
        canvas.write_count()
    );
    if !report.clean {
        bail!("session stopped before completion");
    }
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<PaintEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!(error = %err, "unprintable event"),
            },
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "event printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Overwrite `count` planned pixels with a wrong color once half the plan is done
async fn vandalize(
    mut rx: broadcast::Receiver<PaintEvent>,
    canvas: SimulatedCanvas,
    preview: tilepaint_core::PlanPreview,
    count: usize,
) {
    let palette = default_palette();
    while let Ok(event) = rx.recv().await {
        let counters = event.counters();
        if !matches!(event, PaintEvent::Progress { .. }) || counters.painted * 2 < counters.total {
            continue;
        }
        let mut hits = 0;
        for entry in preview.pending.iter().filter(|e| canvas.pixel(&e.address).a > 0).take(count) {
            let Some(wrong) = palette.iter().find(|c| c.id != entry.color_id) else {
                continue;
            };
            canvas.vandalize(&entry.address, Rgba::opaque(wrong.rgb()));
            hits += 1;
        }
        tracing::info!(hits, "vandalized painted pixels");
        return;
    }
}

fn load_config(args: &ArgMatches) -> Result<PaintConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => PaintConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PaintConfig::default(),
    };
    if let Some(strategy) = args.get_one::<OrderStrategy>("strategy") {
        config = config.with_strategy(*strategy);
    }
    config.validate()?;
    Ok(config)
}

fn parse_anchor(args: &ArgMatches) -> Result<Anchor> {
    let raw = args
        .get_one::<String>("anchor")
        .context("missing --anchor")?;
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let [tile_x, tile_y, local_x, local_y] = parts.as_slice() else {
        bail!("--anchor expects tile_x,tile_y,local_x,local_y, got {raw}");
    };
    Ok(Anchor::new(
        tile_x.parse().context("tile_x")?,
        tile_y.parse().context("tile_y")?,
        local_x.parse().context("local_x")?,
        local_y.parse().context("local_y")?,
    ))
}

fn plan_session(
    args: &ArgMatches,
    config: PaintConfig,
    palette: Palette,
    anchor: Anchor,
) -> Result<SchedulerSession> {
    let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
    let image = match args.get_one::<PathBuf>("image") {
        Some(path) => load_png(path)?,
        None => {
            let width = args.get_one::<u32>("width").copied().unwrap_or(16);
            let height = args.get_one::<u32>("height").copied().unwrap_or(16);
            generated_pattern(width, height, &palette, seed)
        }
    };

    let quantizer = Quantizer::from_config(&config);
    let quantized = quantize_image(&image, &quantizer, &palette);
    let plan = PlanBuilder::new(config.tile_size, config.transparency_threshold)
        .build(&quantized, &anchor);
    let plan = order_seeded(plan, config.strategy, image.width(), image.height(), Some(seed));

    let ledger = Ledger::new(0.0, SIM_MAX_CHARGES, config.charge_regen_ms, Utc::now());
    let session = SchedulerSession::from_plan(
        config,
        palette,
        anchor,
        (image.width(), image.height()),
        plan,
        ledger,
        SessionClock::new(),
    )?;
    Ok(session)
}

fn load_png(path: &Path) -> Result<SourceImage> {
    let decoded = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    Ok(SourceImage::from_rgba_bytes(width, height, decoded.as_raw())?)
}

/// Random palette blocks with a transparent border
fn generated_pattern(width: u32, height: u32, palette: &Palette, seed: u64) -> SourceImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let colors: Vec<Rgba> = palette.iter().map(|c| Rgba::opaque(c.rgb())).collect();
    let mut image = SourceImage::filled(width, height, Rgba::new(0, 0, 0, 0));
    if colors.is_empty() {
        return image;
    }
    for by in (1..height.saturating_sub(1)).step_by(4) {
        for bx in (1..width.saturating_sub(1)).step_by(4) {
            let color = colors[rng.random_range(0..colors.len())];
            for y in by..(by + 4).min(height - 1) {
                for x in bx..(bx + 4).min(width - 1) {
                    image.set_pixel(x, y, color);
                }
            }
        }
    }
    image
}

fn default_palette() -> Palette {
    Palette::from_colors(vec![
        PaletteColor::new(1, 0, 0, 0, "Black"),
        PaletteColor::new(2, 60, 60, 60, "Dark Gray"),
        PaletteColor::new(3, 120, 120, 120, "Gray"),
        PaletteColor::new(4, 210, 210, 210, "Light Gray"),
        PaletteColor::new(5, 255, 255, 255, "White"),
        PaletteColor::new(6, 96, 0, 24, "Deep Red"),
        PaletteColor::new(7, 237, 28, 36, "Red"),
        PaletteColor::new(8, 255, 127, 39, "Orange"),
        PaletteColor::new(9, 246, 170, 9, "Gold"),
        PaletteColor::new(10, 249, 221, 59, "Yellow"),
        PaletteColor::new(11, 14, 185, 104, "Green"),
        PaletteColor::new(12, 40, 80, 158, "Dark Blue"),
        PaletteColor::new(13, 153, 177, 251, "Light Blue"),
        PaletteColor::new(14, 120, 12, 153, "Purple"),
    ])
}
