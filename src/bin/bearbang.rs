//! bearbang - offline alert looper.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bearbang::cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
use bearbang::fetch::HttpFetcher;
use bearbang::manifest::AssetManifest;
use bearbang::prefs::{FileKeyValueStore, load_volume, save_volume};
use bearbang::request::Url;
use bearbang::server::run_server;
use bearbang::worker::{CacheWorker, InstallReport, LifecycleObserver};
use bearbang::{AppConfig, Result};

// ============================================================================
// CLI Parsing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    Precache,
    Play,
    Test,
    Volume,
    Clear,
}

struct CliArgs {
    command: Command,
    config: Option<PathBuf>,
    origin: Option<String>,
    base: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    memory: bool,
    volume: Option<f32>,
}

fn print_usage() {
    eprintln!("Usage: bearbang <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve               Precache, then serve the site cache-first");
    eprintln!("  precache            Install the current cache version and evict old ones");
    eprintln!("  play                Loop the alert until Ctrl-C");
    eprintln!("  test                Play the alert once");
    eprintln!("  volume [0.0-1.0]    Show or set the persisted volume");
    eprintln!("  clear               Delete the current cache");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>     Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  --origin <URL>      Site origin, e.g. https://example.github.io");
    eprintln!("  --base <PATH>       Base path the site is deployed under");
    eprintln!("  --host <HOST>       Bind address for serve");
    eprintln!("  --port <PORT>       Bind port for serve");
    eprintln!("  --memory            Keep the cache in memory (serve only)");
    eprintln!("  -h, --help          Show this help");
}

fn value_after(args: &[String], i: usize, flag: &str) -> String {
    args.get(i).cloned().unwrap_or_else(|| {
        eprintln!("Error: {flag} requires a value");
        std::process::exit(1);
    })
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut command = None;
    let mut config = None;
    let mut origin = None;
    let mut base = None;
    let mut host = None;
    let mut port = None;
    let mut memory = false;
    let mut volume = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(value_after(&args, i, "--config")));
            }
            "--origin" => {
                i += 1;
                origin = Some(value_after(&args, i, "--origin"));
            }
            "--base" => {
                i += 1;
                base = Some(value_after(&args, i, "--base"));
            }
            "--host" => {
                i += 1;
                host = Some(value_after(&args, i, "--host"));
            }
            "--port" => {
                i += 1;
                let raw = value_after(&args, i, "--port");
                port = Some(raw.parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid port {raw}");
                    std::process::exit(1);
                }));
            }
            "--memory" => memory = true,
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            arg if command.is_none() && !arg.starts_with('-') => {
                command = Some(match arg {
                    "serve" => Command::Serve,
                    "precache" => Command::Precache,
                    "play" => Command::Play,
                    "test" => Command::Test,
                    "volume" => Command::Volume,
                    "clear" => Command::Clear,
                    other => {
                        eprintln!("Unknown command: {other}");
                        print_usage();
                        std::process::exit(1);
                    }
                });
            }
            arg if command == Some(Command::Volume) && volume.is_none() => {
                volume = Some(arg.parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid volume {arg}");
                    std::process::exit(1);
                }));
            }
            other => {
                eprintln!("Unknown option: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };

    CliArgs {
        command,
        config,
        origin,
        base,
        host,
        port,
        memory,
        volume,
    }
}

fn apply_overrides(mut config: AppConfig, args: &CliArgs) -> AppConfig {
    if let Some(origin) = &args.origin {
        config.site = config.site.with_origin(origin.as_str());
    }
    if let Some(base) = &args.base {
        config.site = config.site.with_base_path(base.as_str());
    }
    if let Some(host) = &args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config
}

// ============================================================================
// Worker
// ============================================================================

/// Prints install and activate events as they happen.
struct PrintObserver;

impl LifecycleObserver for PrintObserver {
    fn on_asset_cached(&self, url: &Url, bytes: usize) {
        println!("  cached {url} ({bytes} bytes)");
    }

    fn on_asset_failed(&self, url: &Url, error: &str) {
        println!("  FAILED {url}: {error}");
    }

    fn on_cache_evicted(&self, name: &str) {
        println!("  evicted {name}");
    }
}

fn build_worker<S: CacheStorage>(storage: S, config: &AppConfig) -> Result<CacheWorker<S, HttpFetcher>> {
    let site = config.site.site_base()?;
    let manifest = AssetManifest::builtin(&site)?;
    Ok(CacheWorker::new(
        storage,
        HttpFetcher::new()?,
        config.cache.name(),
        manifest,
        site.root_document()?,
    )
    .with_concurrency(config.cache.precache_concurrency))
}

fn print_report(report: &InstallReport) {
    println!(
        "\n{}: {} cached, {} failed",
        report.cache,
        report.cached.len(),
        report.failed.len()
    );
}

// ============================================================================
// Commands
// ============================================================================

async fn serve<S: CacheStorage + 'static>(storage: S, config: &AppConfig) -> Result<()> {
    let worker = Arc::new(build_worker(storage, config)?);
    match worker.register(&PrintObserver).await {
        Ok(report) => print_report(&report),
        Err(e) => log::warn!("Registration failed, serving network-only: {e}"),
    }

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutting down");
            token.cancel();
        }
    });

    run_server(
        worker,
        config.site.site_base()?,
        &config.server.host,
        config.server.port,
        shutdown,
    )
    .await
}

async fn precache(config: &AppConfig) -> Result<()> {
    let worker = build_worker(DiskCacheStorage::new(&config.cache.dir), config)?;
    println!("Precaching {} assets into {}...\n", worker.manifest().len(), worker.cache_name());
    let report = worker.register(&PrintObserver).await?;
    print_report(&report);
    Ok(())
}

async fn clear(config: &AppConfig) -> Result<()> {
    let worker = build_worker(DiskCacheStorage::new(&config.cache.dir), config)?;
    if worker.clear().await? {
        println!("Deleted {}", worker.cache_name());
    } else {
        println!("{} does not exist", worker.cache_name());
    }
    Ok(())
}

fn volume(config: &AppConfig, value: Option<f32>) -> Result<()> {
    let prefs = FileKeyValueStore::open(FileKeyValueStore::default_path());
    match value {
        Some(volume) => {
            save_volume(&prefs, volume)?;
            println!("Volume set to {volume}");
        }
        None => println!("{}", load_volume(&prefs, config.audio.default_volume)),
    }
    Ok(())
}

#[cfg(feature = "playback")]
mod playback {
    use std::sync::Arc;
    use std::time::Duration;

    use bearbang::audio::{AudioSession, DecodedAudio, RodioBackend};
    use bearbang::cache::DiskCacheStorage;
    use bearbang::controller::{Controller, Readiness};
    use bearbang::fetch::HttpFetcher;
    use bearbang::prefs::FileKeyValueStore;
    use bearbang::wake::{InhibitProvider, WakeLockManager};
    use bearbang::worker::{CacheWorker, NoObserver};
    use bearbang::{AppConfig, Result};

    type Worker = CacheWorker<DiskCacheStorage, HttpFetcher>;
    type PlaybackController = Controller<RodioBackend, Arc<Worker>, FileKeyValueStore, InhibitProvider>;

    /// Registers the worker and wires the controller to load audio through it.
    async fn controller(config: &AppConfig) -> Result<PlaybackController> {
        let worker = Arc::new(super::build_worker(DiskCacheStorage::new(&config.cache.dir), config)?);
        let site = config.site.site_base()?;
        let audio = AudioSession::new(
            RodioBackend::new(),
            Arc::clone(&worker),
            FileKeyValueStore::open(FileKeyValueStore::default_path()),
            config.audio.sources(&site)?,
        )
        .with_default_volume(config.audio.default_volume);
        let mut controller = Controller::new(audio, WakeLockManager::new(InhibitProvider::new()));

        match controller.register_worker(&worker, &NoObserver).await {
            Readiness::OfflineReady => println!("Offline ready"),
            Readiness::Unavailable => println!("Offline cache unavailable"),
        }
        Ok(controller)
    }

    pub async fn play(config: &AppConfig) -> Result<()> {
        let mut controller = controller(config).await?;
        controller.start().await?;
        println!("Looping at volume {}, press Ctrl-C to stop", controller.volume());
        tokio::signal::ctrl_c().await?;
        controller.stop().await.log("stop");
        println!("Stopped");
        Ok(())
    }

    pub async fn test(config: &AppConfig) -> Result<()> {
        let mut controller = controller(config).await?;
        controller.test().await?;
        let length = controller
            .audio()
            .buffer()
            .map_or(Duration::ZERO, DecodedAudio::duration);
        tokio::time::sleep(length + Duration::from_millis(100)).await;
        Ok(())
    }
}

#[cfg(not(feature = "playback"))]
mod playback {
    use bearbang::{AppConfig, Result};

    #[allow(clippy::unused_async)]
    pub async fn play(_config: &AppConfig) -> Result<()> {
        eprintln!("Playback support not compiled in");
        std::process::exit(1);
    }

    #[allow(clippy::unused_async)]
    pub async fn test(_config: &AppConfig) -> Result<()> {
        eprintln!("Playback support not compiled in");
        std::process::exit(1);
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();
    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = apply_overrides(AppConfig::load_or_create(&config_path)?, &args);
    config.validate()?;

    match args.command {
        Command::Serve if args.memory => serve(MemoryCacheStorage::new(), &config).await,
        Command::Serve => serve(DiskCacheStorage::new(&config.cache.dir), &config).await,
        Command::Precache => precache(&config).await,
        Command::Play => playback::play(&config).await,
        Command::Test => playback::test(&config).await,
        Command::Volume => volume(&config, args.volume),
        Command::Clear => clear(&config).await,
    }
}
