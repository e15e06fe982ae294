use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vetscan_assets::{DescriptorRegistry, FileAssetSource, QualityLevel, write_placeholders};
use vetscan_common::EntityId;
use vetscan_render::{
    DebugTextRenderer, GpuResources, InMemoryScene, RenderView, Renderer, ResourceLedger,
    VisualizationRegistry,
};
use vetscan_stream::{
    DeviceProfile, GpuTier, LoadOptions, LoaderConfig, ProgressEvent, ProgressiveLoadController,
    QualitySelector, SessionState,
};

#[derive(Parser)]
#[command(name = "vetscan", about = "Progressive multi-quality asset loader")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Loader config (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Entity descriptor list (YAML); defaults to the built-in species table
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct DeviceArgs {
    /// Viewport width in pixels
    #[arg(long, default_value = "1920")]
    width: u32,
    /// Viewport height in pixels
    #[arg(long, default_value = "1080")]
    height: u32,
    /// Device pixel ratio
    #[arg(long, default_value = "1.0")]
    density: f32,
    /// GPU renderer string, e.g. "Adreno (TM) 650"
    #[arg(long, default_value = "")]
    gpu: String,
}

impl DeviceArgs {
    fn profile(&self) -> DeviceProfile {
        DeviceProfile::new(
            self.width,
            self.height,
            self.density,
            GpuTier::from_renderer(&self.gpu),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// List registered entities
    Species,
    /// List visualization modes
    Modes,
    /// Show the quality chain selected for an entity on a device
    Chain {
        entity: String,
        /// Preferred quality (skips device heuristics)
        #[arg(short, long)]
        quality: Option<QualityLevel>,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Write placeholder GLB files for every quality level
    Placeholders {
        /// Output root
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Only this entity
        #[arg(short, long)]
        entity: Option<String>,
    },
    /// Run a load session against an asset directory and render the result
    Load(LoadArgs),
}

#[derive(Args, Debug)]
struct LoadArgs {
    entity: String,
    /// Asset root directory
    #[arg(short, long, default_value = ".")]
    assets: PathBuf,
    /// Preferred quality (skips device heuristics)
    #[arg(short, long)]
    quality: Option<QualityLevel>,
    /// Visualization mode to apply once the fallback is shown
    #[arg(short, long)]
    mode: Option<String>,
    /// Load every level in the foreground
    #[arg(long)]
    no_defer: bool,
    /// Override the background upgrade delay
    #[arg(long)]
    delay_ms: Option<u64>,
    #[command(flatten)]
    device: DeviceArgs,
}

fn load_registry(path: Option<&Path>) -> anyhow::Result<DescriptorRegistry> {
    match path {
        Some(path) => DescriptorRegistry::load(path)
            .with_context(|| format!("loading registry {}", path.display())),
        None => Ok(DescriptorRegistry::builtin()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LoaderConfig> {
    match path {
        Some(path) => {
            LoaderConfig::load(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => Ok(LoaderConfig::default()),
    }
}

fn print_event(event: &ProgressEvent) {
    println!(
        "[{:>3}%] {:?} +{}ms",
        event.percent,
        event.stage,
        event.elapsed.as_millis()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let registry = load_registry(cli.registry.as_deref())?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("vetscan v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", vetscan_common::crate_info());
            println!("assets: {}", vetscan_assets::crate_info());
            println!("render: {}", vetscan_render::crate_info());
            println!("stream: {}", vetscan_stream::crate_info());
            println!("entities: {}", registry.len());
        }
        Commands::Species => {
            for d in registry.iter() {
                println!(
                    "{:<12} {:<12} {:?} scale={:.2} anatomy={:.2} default={}",
                    d.id, d.name, d.template, d.display_scale, d.anatomy_scale, d.default_quality
                );
            }
        }
        Commands::Modes => {
            for (mode, info) in VisualizationRegistry::with_builtin_modes().modes() {
                println!("{:<11} {:<16} {}", mode, info.name, info.description);
            }
        }
        Commands::Chain {
            entity,
            quality,
            device,
        } => {
            let descriptor = registry
                .get(&EntityId::from(entity.as_str()))
                .with_context(|| format!("unknown entity {entity}"))?;
            let selector = QualitySelector::new(config.selector.clone());
            let chain = selector.select_chain(descriptor, &device.profile(), quality);
            let names: Vec<&str> = chain.iter().map(|q| q.as_str()).collect();
            println!("{entity}: {}", names.join(" -> "));
            for q in chain {
                println!("  {:<8} {}", q, descriptor.asset_path(q));
            }
        }
        Commands::Placeholders { out, entity } => {
            let mut written = 0;
            for descriptor in registry.iter() {
                if entity.as_deref().is_some_and(|e| e != descriptor.id.as_str()) {
                    continue;
                }
                written += write_placeholders(&out, descriptor)
                    .with_context(|| format!("writing placeholders for {}", descriptor.id))?
                    .len();
            }
            println!("Wrote {written} placeholder assets under {}", out.display());
        }
        Commands::Load(args) => {
            let state = run_load(registry, config, args).await?;
            tracing::debug!(%state, "load command finished");
        }
    }

    Ok(())
}

/// Run one session to completion, print the scene and dispose it. Fails if
/// disposal leaves GPU resources behind.
async fn run_load(
    registry: DescriptorRegistry,
    mut config: LoaderConfig,
    args: LoadArgs,
) -> anyhow::Result<SessionState> {
    if let Some(ms) = args.delay_ms {
        config.background_upgrade_delay_ms = ms;
    }
    tracing::info!(entity = %args.entity, assets = %args.assets.display(), "starting load session");
    let scene = Arc::new(Mutex::new(InMemoryScene::new()));
    let ledger = ResourceLedger::shared();
    let controller =
        ProgressiveLoadController::builder(registry, Arc::new(FileAssetSource::new(args.assets)))
            .config(config)
            .device(args.device.profile())
            .scene(scene.clone())
            .gpu(ledger.clone())
            .build();

    let mut progress = controller.progress().channel();
    let handle = controller.start_session(
        args.entity.as_str(),
        LoadOptions {
            preferred_quality: args.quality,
            defer_upgrades: args.no_defer.then_some(false),
        },
    )?;
    if let Some(mode) = &args.mode {
        if let Err(err) = controller.apply_mode_key(handle.id(), mode) {
            eprintln!("warning: {err}; keeping current mode");
        }
    }

    let settled = handle.settled();
    tokio::pin!(settled);
    let status = loop {
        tokio::select! {
            Some(event) = progress.recv() => print_event(&event),
            status = &mut settled => break status,
        }
    };
    while let Ok(event) = progress.try_recv() {
        print_event(&event);
    }

    controller.tick(1.0);
    let frame = DebugTextRenderer::new().render(&*scene.lock(), &RenderView::default());
    print!("{frame}");
    println!("Session {}: {}", handle.id(), status.state);
    print!("{}", controller.stats());

    controller.dispose(handle.id());
    let live = ledger.lock().live_count();
    println!("After dispose: {live} live GPU resources");
    if live != 0 {
        anyhow::bail!("{live} GPU resources leaked");
    }
    Ok(status.state)
}
