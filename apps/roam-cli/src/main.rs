use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use roam_common::{WorldDescriptor, WorldUrl};
use roam_runtime::{
    AssetError, AudioBackend, AudioHandle, CharacterBackend, Collaborators, CollisionHandle,
    CrossingDirection, DescriptorSource, DiscoveryError, MeshHandle, Orchestrator, PhysicsBackend,
    PortalCrossing, PortalPairId, PortalPairSpec, SceneBackend, SyncConfig,
};
use roam_universe::WorldNumber;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "roam-cli", about = "Inspect and simulate roam world streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover a world graph from descriptor files and print the plan
    Inspect {
        /// Directory containing world descriptor JSON files
        #[arg(long)]
        dir: PathBuf,
        /// Root world (file path relative to --dir)
        #[arg(long)]
        root: String,
        /// Preload hop radius
        #[arg(long, default_value = "2")]
        radius: u32,
    },
    /// Simulate a walk: initial load, then one portal crossing per step
    Walk {
        /// Directory containing world descriptor JSON files
        #[arg(long)]
        dir: PathBuf,
        /// Starting world (file path relative to --dir)
        #[arg(long)]
        root: String,
        /// Comma-separated worlds to cross into, in order
        #[arg(long, value_delimiter = ',')]
        path: Vec<String>,
        /// Preload hop radius
        #[arg(long, default_value = "2")]
        radius: u32,
        /// Load collision for every in-range world during the sync itself
        #[arg(long)]
        eager_collision: bool,
    },
}

/// Descriptor source backed by a directory of JSON files; world URLs are
/// file paths relative to the directory.
struct FsSource {
    dir: PathBuf,
}

impl DescriptorSource for FsSource {
    fn fetch(&mut self, url: &WorldUrl) -> Result<WorldDescriptor, DiscoveryError> {
        let path = self.dir.join(url.as_str());
        let data = std::fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                DiscoveryError::NotFound(url.clone())
            } else {
                DiscoveryError::Transport {
                    url: url.clone(),
                    reason: err.to_string(),
                }
            }
        })?;
        serde_json::from_str(&data).map_err(|err| DiscoveryError::Malformed {
            url: url.clone(),
            reason: err.to_string(),
        })
    }
}

/// Scene backend that only logs; handles are fresh UUIDs.
#[derive(Default)]
struct LogScene;

impl SceneBackend for LogScene {
    fn load_mesh(&mut self, url: &str, number: WorldNumber) -> Result<MeshHandle, AssetError> {
        tracing::info!(url, number = number.0, "load mesh");
        Ok(MeshHandle(Uuid::new_v4()))
    }

    fn release_mesh(&mut self, _handle: MeshHandle) {
        tracing::info!("release mesh");
    }

    fn load_collision(
        &mut self,
        url: &str,
        number: WorldNumber,
        visible: bool,
    ) -> Result<CollisionHandle, AssetError> {
        tracing::info!(url, number = number.0, visible, "load collision");
        Ok(CollisionHandle(Uuid::new_v4()))
    }

    fn release_collision(&mut self, _handle: CollisionHandle) {
        tracing::info!("release collision");
    }

    fn create_portal_pair(&mut self, spec: &PortalPairSpec) -> PortalPairId {
        tracing::info!(
            source = %spec.source_world,
            destination = %spec.destination_world,
            "create portal pair"
        );
        PortalPairId(Uuid::new_v4())
    }

    fn destroy_portal_pair(&mut self, _id: PortalPairId) {
        tracing::info!("destroy portal pair");
    }
}

#[derive(Default)]
struct LogPhysics;

impl PhysicsBackend for LogPhysics {
    fn register_collision_body(&mut self, _handle: CollisionHandle, number: WorldNumber) {
        tracing::debug!(number = number.0, "register collision body");
    }

    fn unregister_collision_body(&mut self, _handle: CollisionHandle) {
        tracing::debug!("unregister collision body");
    }

    fn register_portal(&mut self, _id: PortalPairId) {
        tracing::debug!("register portal");
    }

    fn unregister_portal(&mut self, _id: PortalPairId) {
        tracing::debug!("unregister portal");
    }

    fn resync(&mut self) {
        tracing::debug!("physics resync");
    }
}

#[derive(Default)]
struct LogCharacters;

impl CharacterBackend for LogCharacters {
    fn spawn(
        &mut self,
        descriptors: &[serde_json::Value],
        _origin: glam::DVec3,
        number: WorldNumber,
        world: &WorldUrl,
    ) {
        tracing::info!(world = %world, count = descriptors.len(), number = number.0, "spawn characters");
    }

    fn set_visible(&mut self, world: &WorldUrl, visible: bool) {
        tracing::debug!(world = %world, visible, "set characters visible");
    }

    fn remove(&mut self, world: &WorldUrl) {
        tracing::info!(world = %world, "remove characters");
    }
}

#[derive(Default)]
struct LogAudio;

impl AudioBackend for LogAudio {
    fn spawn_sources(
        &mut self,
        sources: &[serde_json::Value],
        _number: WorldNumber,
        world: &WorldUrl,
    ) -> Vec<AudioHandle> {
        tracing::info!(world = %world, count = sources.len(), "spawn audio sources");
        sources.iter().map(|_| AudioHandle(Uuid::new_v4())).collect()
    }

    fn remove_sources(&mut self, world: &WorldUrl) {
        tracing::info!(world = %world, "remove audio sources");
    }
}

fn build_orchestrator(dir: &Path, radius: u32, eager_collision: bool) -> Orchestrator {
    let config = SyncConfig {
        hop_radius: radius,
        eager_collision,
        ..SyncConfig::default()
    };
    Orchestrator::new(
        config,
        Collaborators {
            source: Box::new(FsSource {
                dir: dir.to_path_buf(),
            }),
            scene: Box::new(LogScene),
            physics: Box::new(LogPhysics),
            characters: Box::new(LogCharacters),
            audio: Box::new(LogAudio),
        },
    )
}

fn print_stats(orch: &Orchestrator) {
    let stats = orch.stats();
    println!(
        "  fetched {} descriptor(s), loaded {}, flushed {}, wired {} portal pair(s), {} warning(s)",
        stats.descriptors_fetched,
        stats.worlds_loaded,
        stats.worlds_flushed,
        stats.portals_wired,
        stats.warnings
    );
    let resident: Vec<&str> = orch.resident_worlds().map(WorldUrl::as_str).collect();
    println!("  resident: {}", resident.join(", "));
}

fn run_inspect(dir: &Path, root: &str, radius: u32) -> Result<()> {
    let mut orch = build_orchestrator(dir, radius, false);
    let root = WorldUrl::from(root);
    orch.sync(root.clone(), None)
        .with_context(|| format!("initial sync to {root}"))?;

    let graph = orch.graph();
    println!(
        "graph: {} world(s), {} portal edge(s)",
        graph.world_count(),
        graph.portal_count()
    );

    let plan = graph.traversal_plan(&root, radius);
    println!("plan for root {root} at radius {radius}:");
    for world in &plan.worlds_to_load {
        println!("  load  {} (distance {})", world.url, world.distance);
    }
    for portal in &plan.portals_to_setup {
        println!("  wire  {} <-> {}", portal.source, portal.destination);
    }
    for url in &plan.worlds_to_flush {
        println!("  flush {url}");
    }
    Ok(())
}

fn run_walk(
    dir: &Path,
    root: &str,
    path: &[String],
    radius: u32,
    eager_collision: bool,
) -> Result<()> {
    let mut orch = build_orchestrator(dir, radius, eager_collision);
    orch.set_on_world_change(Box::new(|url, descriptor| {
        tracing::info!(world = %url, name = descriptor.name, "world changed");
    }));

    let root = WorldUrl::from(root);
    println!("entering {root}");
    orch.sync(root, None).context("initial sync")?;
    print_stats(&orch);

    for step in path {
        let to = WorldUrl::from(step.as_str());
        let from = orch
            .current_root()
            .cloned()
            .context("no current root after sync")?;

        // Settle deferred collision work before moving on, one item per
        // iteration as the main loop would.
        while orch.preload_next_collision() {}

        let crossing = orch
            .portal_between(&from, &to)
            .map(|pair| PortalCrossing {
                pair,
                direction: CrossingDirection::Forward,
            })
            .or_else(|| {
                orch.portal_between(&to, &from).map(|pair| PortalCrossing {
                    pair,
                    direction: CrossingDirection::Reverse,
                })
            });
        let Some(crossing) = crossing else {
            bail!("no wired portal from {from} to {to}");
        };

        println!("crossing {from} -> {to}");
        orch.handle_crossing(crossing)
            .with_context(|| format!("sync after crossing into {to}"))?;
        print_stats(&orch);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Inspect { dir, root, radius } => run_inspect(&dir, &root, radius),
        Commands::Walk {
            dir,
            root,
            path,
            radius,
            eager_collision,
        } => run_walk(&dir, &root, &path, radius, eager_collision),
    }
}
