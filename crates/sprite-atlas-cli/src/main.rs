use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use futures::executor::block_on;
use futures::future::join_all;
use image::Rgba;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sprite_atlas_core::prelude::*;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "sprite-atlas",
    about = "Allocate sprite rectangles into fixed-size texture atlases",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action=ArgAction::Count, global=true, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(
        short,
        long,
        default_value_t = false,
        global = true,
        help_heading = "Logging/UX"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Allocate the requests and write atlas pages (PNG) plus a JSON layout
    Pack(PackArgs),
    /// Layout-only: allocate and write the JSON layout, no PNGs
    Layout(PackArgs),
}

#[derive(Parser, Debug, Clone)]
struct PackArgs {
    // Input/Output
    /// Sprite sizes as WxH or name=WxH (e.g. 64x32 hero=128x128)
    #[arg(help_heading = "Input/Output")]
    sizes: Vec<String>,
    /// JSON or YAML request file: a list of "WxH" strings or {name, width, height} objects
    #[arg(short, long, help_heading = "Input/Output")]
    input: Option<PathBuf>,
    /// Output directory
    #[arg(short, long, default_value = "out", help_heading = "Input/Output")]
    out_dir: PathBuf,
    /// Base name for written files (name.png / name_N.png / name.json)
    #[arg(short, long, default_value = "atlas", help_heading = "Input/Output")]
    name: String,
    /// Manager config file (JSON or YAML); command-line flags override it
    #[arg(long, help_heading = "Input/Output")]
    config: Option<PathBuf>,

    // Atlas
    /// Atlas side length: a power of two in 128..=16384, anything else means 1024
    #[arg(long, help_heading = "Atlas")]
    size: Option<u32>,
    /// Draw split and claim outlines onto the pages
    #[arg(long, default_value_t = false, help_heading = "Atlas")]
    debug: bool,
    /// Queue every request and place them in one solve pass
    #[arg(long, default_value_t = false, help_heading = "Atlas")]
    batch: bool,
    /// Seed for the fill colours
    #[arg(long, default_value_t = 0, help_heading = "Atlas")]
    seed: u64,

    // Export
    /// Export allocation stats (JSON) to this file
    #[arg(long, help_heading = "Export")]
    export_stats: Option<PathBuf>,
    /// Print the merged configuration and exit
    #[arg(long, default_value_t = false, help_heading = "Export")]
    print_config: bool,
    /// Output format for --print-config: json|yaml
    #[arg(long, default_value = "json", value_parser = ["json", "yaml"], help_heading = "Export")]
    print_config_format: String,
    /// Dry run: allocate and report but do not write files
    #[arg(long, default_value_t = false, help_heading = "Export")]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_with_level(cli.quiet, cli.verbose);
    match &cli.command {
        Commands::Pack(args) => run_pack(args, true),
        Commands::Layout(args) => run_pack(args, false),
    }
}

/// One sprite to place.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    name: String,
    width: u32,
    height: u32,
}

/// Request file entry: either `"WxH"` / `"name=WxH"` or a full object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RequestEntry {
    Short(String),
    Full {
        name: Option<String>,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Serialize)]
struct Layout {
    texture_size: u32,
    sprites: Vec<SpriteEntry>,
    rejected: Vec<RejectedEntry>,
    atlases: Vec<AtlasSnapshot>,
}

#[derive(Debug, Serialize)]
struct SpriteEntry {
    name: String,
    handle: NodeHandle,
    rectangle: Rectangle,
    uv: [f64; 4],
}

#[derive(Debug, Serialize)]
struct RejectedEntry {
    name: String,
    width: u32,
    height: u32,
    reason: String,
}

fn run_pack(cli: &PackArgs, write_pages: bool) -> anyhow::Result<()> {
    let cfg = load_config(cli)?;
    if cli.print_config {
        match cli.print_config_format.as_str() {
            "yaml" => println!("{}", serde_yaml::to_string(&cfg)?),
            _ => println!("{}", serde_json::to_string_pretty(&cfg)?),
        }
        return Ok(());
    }

    let requests = gather_requests(cli)?;
    if requests.is_empty() {
        anyhow::bail!("no sprite sizes given (pass WxH arguments or --input)");
    }
    info!(count = requests.len(), size = %cfg.texture_size, "loaded requests");

    let mut manager = TextureManager::with_config(cfg);
    let (placed, rejected) = if cli.batch {
        allocate_batch(&mut manager, &requests)?
    } else {
        allocate_each(&mut manager, &requests)
    };
    for r in &rejected {
        warn!(name = %r.name, reason = %r.reason, "request rejected");
    }

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let mut sprites = Vec::with_capacity(placed.len());
    for (request, handle) in placed {
        let color = Rgba([
            rng.gen_range(64..=255),
            rng.gen_range(64..=255),
            rng.gen_range(64..=255),
            255,
        ]);
        let (w, h) = (f64::from(request.width), f64::from(request.height));
        // Oversized on purpose; the node's clip keeps the fill inside it.
        manager.draw(handle, |canvas| canvas.fill_rect(-w, -h, 2.0 * w, 2.0 * h, color))?;
        sprites.push(SpriteEntry {
            name: request.name.clone(),
            handle,
            rectangle: manager.node(handle)?.rectangle(),
            uv: manager.uv_coordinates(handle)?,
        });
    }

    let stats = manager.stats();
    info!("{}", stats.summary());
    let layout = Layout {
        texture_size: manager.texture_size(),
        sprites,
        rejected,
        atlases: manager.snapshot(),
    };

    if cli.dry_run {
        println!(
            "atlases={} nodes={} used_area={} total_area={} occupancy={:.2}%",
            stats.num_atlases,
            stats.occupied_nodes,
            stats.used_area,
            stats.total_area,
            stats.occupancy * 100.0
        );
        return Ok(());
    }

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create out_dir {}", cli.out_dir.display()))?;
    if write_pages {
        let pages = manager.knapsacks().len();
        for index in 0..pages {
            let png_path = page_path(&cli.out_dir, &cli.name, index, pages);
            if let Some(knapsack) = manager.knapsack_mut(index) {
                knapsack
                    .save_png(&png_path)
                    .with_context(|| format!("write {}", png_path.display()))?;
                info!(?png_path, atlas = index, "page written");
            }
        }
    }
    let json_path = cli.out_dir.join(format!("{}.json", cli.name));
    fs::write(&json_path, serde_json::to_string_pretty(&layout)?)
        .with_context(|| format!("write {}", json_path.display()))?;
    info!(?json_path, sprites = layout.sprites.len(), "layout written");

    if let Some(stats_path) = &cli.export_stats {
        fs::write(stats_path, serde_json::to_string_pretty(&stats)?)
            .with_context(|| format!("write {}", stats_path.display()))?;
        info!(?stats_path, "stats exported");
    }
    Ok(())
}

type Placed<'a> = Vec<(&'a Request, NodeHandle)>;

fn allocate_each<'a>(
    manager: &mut TextureManager,
    requests: &'a [Request],
) -> (Placed<'a>, Vec<RejectedEntry>) {
    let mut placed = Vec::with_capacity(requests.len());
    let mut rejected = Vec::new();
    for request in requests {
        match manager.allocate(request.width, request.height) {
            Ok(handle) => placed.push((request, handle)),
            Err(e) => rejected.push(rejection(request, &e)),
        }
    }
    (placed, rejected)
}

fn allocate_batch<'a>(
    manager: &mut TextureManager,
    requests: &'a [Request],
) -> anyhow::Result<(Placed<'a>, Vec<RejectedEntry>)> {
    let mut queued = Vec::with_capacity(requests.len());
    let mut pending = Vec::with_capacity(requests.len());
    let mut rejected = Vec::new();
    for request in requests {
        match manager.allocate_async(request.width, request.height) {
            Ok(p) => {
                queued.push(request);
                pending.push(p);
            }
            Err(e) => rejected.push(rejection(request, &e)),
        }
    }
    debug!(queued = manager.pending_count(), "solving deferred requests");
    manager.solve_async().context("solve allocation queue")?;
    let handles = block_on(join_all(pending));
    let mut placed = Vec::with_capacity(handles.len());
    for (request, handle) in queued.into_iter().zip(handles) {
        placed.push((request, handle.with_context(|| format!("settle {}", request.name))?));
    }
    Ok((placed, rejected))
}

fn rejection(request: &Request, err: &AtlasError) -> RejectedEntry {
    RejectedEntry {
        name: request.name.clone(),
        width: request.width,
        height: request.height,
        reason: err.to_string(),
    }
}

fn load_config(cli: &PackArgs) -> anyhow::Result<ManagerConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            if is_json(path) {
                serde_json::from_str(&text)
                    .with_context(|| format!("parse config {}", path.display()))?
            } else {
                serde_yaml::from_str(&text)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
        }
        None => ManagerConfig::default(),
    };
    if let Some(size) = cli.size {
        cfg.texture_size = TextureSize::new(size);
    }
    if cli.debug {
        cfg.debug = true;
    }
    Ok(cfg)
}

fn gather_requests(cli: &PackArgs) -> anyhow::Result<Vec<Request>> {
    let mut out = Vec::new();
    if let Some(path) = &cli.input {
        let text =
            fs::read_to_string(path).with_context(|| format!("read input {}", path.display()))?;
        let entries: Vec<RequestEntry> = if is_json(path) {
            serde_json::from_str(&text)
                .with_context(|| format!("parse input {}", path.display()))?
        } else {
            serde_yaml::from_str(&text)
                .with_context(|| format!("parse input {}", path.display()))?
        };
        for entry in entries {
            let index = out.len();
            out.push(match entry {
                RequestEntry::Short(s) => parse_request(&s, index)?,
                RequestEntry::Full {
                    name,
                    width,
                    height,
                } => Request {
                    name: name.unwrap_or_else(|| default_name(index)),
                    width,
                    height,
                },
            });
        }
    }
    for s in &cli.sizes {
        let index = out.len();
        out.push(parse_request(s, index)?);
    }
    Ok(out)
}

/// Parses `WxH` or `name=WxH`.
fn parse_request(s: &str, index: usize) -> anyhow::Result<Request> {
    let (name, dims) = match s.split_once('=') {
        Some((name, dims)) => (name.trim().to_string(), dims),
        None => (default_name(index), s),
    };
    let (w, h) = dims
        .trim()
        .split_once(['x', 'X'])
        .with_context(|| format!("expected WxH, got '{s}'"))?;
    let width = w
        .trim()
        .parse()
        .with_context(|| format!("invalid width in '{s}'"))?;
    let height = h
        .trim()
        .parse()
        .with_context(|| format!("invalid height in '{s}'"))?;
    Ok(Request {
        name,
        width,
        height,
    })
}

fn default_name(index: usize) -> String {
    format!("sprite_{index}")
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn page_path(out_dir: &Path, name: &str, index: usize, pages: usize) -> PathBuf {
    if pages == 1 {
        out_dir.join(format!("{name}.png"))
    } else {
        out_dir.join(format!("{name}_{index}.png"))
    }
}

fn init_tracing_with_level(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error".to_string()
    } else {
        match verbose {
            0 => "info".into(),
            1 => "debug".into(),
            _ => "trace".into(),
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_named_sizes() {
        let r = parse_request("64x32", 3).unwrap();
        assert_eq!(
            r,
            Request {
                name: "sprite_3".into(),
                width: 64,
                height: 32
            }
        );
        let r = parse_request("hero = 128X96", 0).unwrap();
        assert_eq!(r.name, "hero");
        assert_eq!((r.width, r.height), (128, 96));
        assert!(parse_request("128", 0).is_err());
        assert!(parse_request("ax12", 0).is_err());
    }

    #[test]
    fn request_file_accepts_both_forms() {
        let yaml = "- 16x16\n- name: boss\n  width: 200\n  height: 100\n";
        let entries: Vec<RequestEntry> = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(&entries[0], RequestEntry::Short(s) if s == "16x16"));
        assert!(matches!(
            &entries[1],
            RequestEntry::Full { name: Some(n), width: 200, height: 100 } if n == "boss"
        ));
    }

    #[test]
    fn batch_and_direct_modes_agree() {
        let requests: Vec<Request> = ["100x100", "300x50", "2048x10", "128x128", "10x10"]
            .iter()
            .enumerate()
            .map(|(i, s)| parse_request(s, i).unwrap())
            .collect();

        let mut direct = TextureManager::new(512);
        let (a, a_rejected) = allocate_each(&mut direct, &requests);
        let mut batched = TextureManager::new(512);
        let (b, b_rejected) = allocate_batch(&mut batched, &requests).unwrap();

        assert_eq!(a_rejected.len(), 1);
        assert_eq!(b_rejected.len(), 1);
        assert_eq!(a_rejected[0].name, "sprite_2");
        let rects = |m: &TextureManager, p: &Placed<'_>| {
            p.iter()
                .map(|(r, h)| (r.name.clone(), m.node(*h).unwrap().rectangle()))
                .collect::<Vec<_>>()
        };
        assert_eq!(rects(&direct, &a), rects(&batched, &b));
    }

    #[test]
    fn config_flags_override_file_defaults() {
        let args = PackArgs::parse_from(["pack", "--size", "300", "--debug", "8x8"]);
        let cfg = load_config(&args).unwrap();
        assert_eq!(cfg.texture_size.get(), 1024);
        assert!(cfg.debug);
        assert_eq!(args.sizes, vec!["8x8".to_string()]);
    }

    #[test]
    fn single_page_has_no_index_suffix() {
        let dir = Path::new("out");
        assert_eq!(page_path(dir, "atlas", 0, 1), dir.join("atlas.png"));
        assert_eq!(page_path(dir, "atlas", 1, 3), dir.join("atlas_1.png"));
    }
}
