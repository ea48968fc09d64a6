use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use janus_core::{
    compare, compare_all, decode_gallery, decode_template, search, CosineComparator,
    FlatGalleryBuilder, FlatGalleryRef, FlatTemplateRef, Template, TemplateId,
};
use std::path::{Path, PathBuf};

mod daemon;

use daemon::JanusProxy;

#[derive(Parser)]
#[command(name = "janus", about = "Janus biometric template tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe a flat template (or, with --gallery, a flat gallery)
    Inspect {
        file: PathBuf,
        /// Parse the file as a flat gallery
        #[arg(long)]
        gallery: bool,
    },
    /// Score two flat templates against each other
    Verify { a: PathBuf, b: PathBuf },
    /// Rank a flat gallery against a flat query template
    Search {
        query: PathBuf,
        gallery: PathBuf,
        /// Number of matches to return
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Pack flat templates into a flat gallery
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Templates to pack, as ID=PATH
        #[arg(required = true, value_parser = parse_entry)]
        entries: Vec<Entry>,
    },
    /// Score every target template against every query template
    Compare {
        /// Target template, as ID=PATH (repeatable)
        #[arg(long = "target", required = true, value_parser = parse_entry)]
        targets: Vec<Entry>,
        /// Query template, as ID=PATH (repeatable)
        #[arg(long = "query", required = true, value_parser = parse_entry)]
        queries: Vec<Entry>,
    },
    /// Talk to a running janusd
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
    /// Build a flat template from a face image
    #[cfg(feature = "onnx")]
    Enroll {
        /// ArcFace ONNX model
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        image: PathBuf,
        /// Subject's right eye centre, as X,Y
        #[arg(long, value_parser = parse_point)]
        right_eye: Point,
        /// Subject's left eye centre, as X,Y
        #[arg(long, value_parser = parse_point)]
        left_eye: Point,
        /// Write a one-entry flat gallery under this id instead of a bare template
        #[arg(long)]
        id: Option<u64>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Show daemon status
    Status,
    /// Number of enrolled templates
    Size,
    /// Enroll a flat template file under ID
    Enroll { id: u64, file: PathBuf },
    /// Score two flat template files via the daemon
    Verify { a: PathBuf, b: PathBuf },
    /// Search the daemon's gallery (k = 0 uses the daemon default)
    Search {
        query: PathBuf,
        #[arg(short, default_value_t = 0)]
        k: u32,
    },
    /// Cross-compare enrolled templates by id (none given = whole gallery)
    Compare {
        #[arg(long = "target")]
        targets: Vec<u64>,
        #[arg(long = "query")]
        queries: Vec<u64>,
    },
    /// Write the daemon's gallery to a flat gallery file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// `ID=PATH` command-line argument.
#[derive(Debug, Clone, PartialEq)]
struct Entry {
    id: TemplateId,
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
struct Point {
    x: f32,
    y: f32,
}

fn parse_entry(arg: &str) -> Result<Entry, String> {
    let (id, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ID=PATH, got {arg:?}"))?;
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid template id {id:?}: {e}"))?;
    if path.is_empty() {
        return Err(format!("missing path in {arg:?}"));
    }
    Ok(Entry {
        id: TemplateId(id),
        path: PathBuf::from(path),
    })
}

#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn parse_point(arg: &str) -> Result<Point, String> {
    let (x, y) = arg
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {arg:?}"))?;
    let coord = |s: &str| {
        s.trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid coordinate {s:?}"))
    };
    Ok(Point {
        x: coord(x)?,
        y: coord(y)?,
    })
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_templates(entries: &[Entry]) -> Result<Vec<Template>> {
    entries
        .iter()
        .map(|entry| {
            let bytes = read(&entry.path)?;
            let template = FlatTemplateRef::new(&bytes)
                .to_template()
                .with_context(|| format!("{} is not a flat template", entry.path.display()))?;
            Ok(template.with_id(entry.id))
        })
        .collect()
}

fn inspect(file: &Path, gallery: bool) -> Result<()> {
    let bytes = read(file)?;
    if gallery {
        let entries = decode_gallery(&bytes)
            .with_context(|| format!("{} is not a flat gallery", file.display()))?;
        let listed = entries
            .iter()
            .map(|e| {
                Ok(serde_json::json!({
                    "id": e.id,
                    "bytes": e.template.len(),
                    "fragments": e.template.validate()?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        print_json(&serde_json::json!({
            "kind": "gallery",
            "bytes": bytes.len(),
            "entries": listed,
        }))
    } else {
        let fragments = decode_template(&bytes)
            .with_context(|| format!("{} is not a flat template", file.display()))?;
        print_json(&serde_json::json!({
            "kind": "template",
            "bytes": bytes.len(),
            "fragments": fragments.iter().map(|f| f.len()).collect::<Vec<_>>(),
        }))
    }
}

fn pack(output: &Path, entries: &[Entry]) -> Result<()> {
    let mut builder = FlatGalleryBuilder::new();
    for entry in entries {
        let bytes = read(&entry.path)?;
        builder
            .push(entry.id, FlatTemplateRef::new(&bytes))
            .with_context(|| format!("{} is not a flat template", entry.path.display()))?;
    }
    let count = builder.len();
    let gallery = builder.finish();
    write(output, gallery.as_bytes())?;
    tracing::info!(entries = count, bytes = gallery.len(), "gallery packed");
    print_json(&serde_json::json!({ "entries": count, "bytes": gallery.len() }))
}

#[cfg(feature = "onnx")]
fn enroll_image(
    model: &Path,
    image_path: &Path,
    right_eye: Point,
    left_eye: Point,
    id: Option<u64>,
    output: &Path,
) -> Result<()> {
    use janus_core::types::{LEFT_EYE_X, LEFT_EYE_Y, RIGHT_EYE_X, RIGHT_EYE_Y};
    use janus_core::{flatten_template, Algorithm, ArcFaceEmbedder, Attributes, Image};

    let luma = image::open(image_path)
        .with_context(|| format!("failed to open {}", image_path.display()))?
        .to_luma8();
    let (width, height) = luma.dimensions();
    let image = Image::gray(luma.into_raw(), width, height);
    let attributes = Attributes::new()
        .with(RIGHT_EYE_X, right_eye.x)
        .with(RIGHT_EYE_Y, right_eye.y)
        .with(LEFT_EYE_X, left_eye.x)
        .with(LEFT_EYE_Y, left_eye.y);

    let embedder = ArcFaceEmbedder::load(&model.to_string_lossy())?;
    let mut algorithm = Algorithm::new(embedder, CosineComparator);
    let mut template = Template::new();
    let added = algorithm.augment(&image, &attributes, &mut template)?;

    let flattened = flatten_template(&template)?;
    let (kind, bytes) = enrollment_bytes(flattened.template.view(), id.map(TemplateId))?;
    write(output, &bytes)?;
    print_json(&serde_json::json!({
        "kind": kind,
        "fragments": added,
        "bytes": bytes.len(),
        "dropped": flattened.dropped,
    }))
}

/// A flat template carries no id, so an enrollment with an id is written as a
/// one-entry flat gallery instead.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn enrollment_bytes(
    template: FlatTemplateRef<'_>,
    id: Option<TemplateId>,
) -> Result<(&'static str, Vec<u8>)> {
    match id {
        None => Ok(("template", template.as_bytes().to_vec())),
        Some(id) => {
            let mut builder = FlatGalleryBuilder::new();
            builder.push(id, template)?;
            Ok(("gallery", builder.finish().into_bytes()))
        }
    }
}

async fn run_daemon(command: DaemonCommand) -> Result<()> {
    let connection = daemon::connect().await?;
    let proxy = JanusProxy::new(&connection)
        .await
        .context("janusd is not reachable")?;

    match command {
        DaemonCommand::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            print_json(&status)
        }
        DaemonCommand::Size => print_json(&serde_json::json!({
            "gallery_size": proxy.gallery_size().await?,
        })),
        DaemonCommand::Enroll { id, file } => {
            let size = proxy.enroll(id, read(&file)?).await?;
            print_json(&serde_json::json!({ "id": id, "gallery_size": size }))
        }
        DaemonCommand::Verify { a, b } => {
            let similarity = proxy.verify(read(&a)?, read(&b)?).await?;
            print_json(&serde_json::json!({ "similarity": similarity }))
        }
        DaemonCommand::Search { query, k } => {
            let hits = proxy.search(read(&query)?, k).await?;
            let hits: Vec<_> = hits
                .into_iter()
                .map(|(id, similarity)| serde_json::json!({ "id": id, "similarity": similarity }))
                .collect();
            print_json(&hits)
        }
        DaemonCommand::Compare { targets, queries } => {
            let (target_ids, query_ids, matrix) = proxy.compare_all(targets, queries).await?;
            print_json(&serde_json::json!({
                "target_ids": target_ids,
                "query_ids": query_ids,
                "matrix": matrix,
            }))
        }
        DaemonCommand::Export { output } => {
            let bytes = proxy.export_gallery().await?;
            write(&output, &bytes)?;
            print_json(&serde_json::json!({ "bytes": bytes.len() }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let comparator = CosineComparator;

    match cli.command {
        Commands::Inspect { file, gallery } => inspect(&file, gallery)?,
        Commands::Verify { a, b } => {
            let (a, b) = (read(&a)?, read(&b)?);
            let similarity = compare(&comparator, FlatTemplateRef::new(&a), FlatTemplateRef::new(&b))?;
            print_json(&serde_json::json!({ "similarity": similarity }))?;
        }
        Commands::Search { query, gallery, k } => {
            let (query, gallery) = (read(&query)?, read(&gallery)?);
            let hits = search(
                &comparator,
                FlatTemplateRef::new(&query),
                FlatGalleryRef::new(&gallery),
                k,
            )?;
            print_json(&hits)?;
        }
        Commands::Pack { output, entries } => pack(&output, &entries)?,
        Commands::Compare { targets, queries } => {
            let targets = load_templates(&targets)?;
            let queries = load_templates(&queries)?;
            print_json(&compare_all(&comparator, &targets, &queries)?)?;
        }
        Commands::Daemon { command } => run_daemon(command).await?,
        #[cfg(feature = "onnx")]
        Commands::Enroll {
            model,
            image,
            right_eye,
            left_eye,
            id,
            output,
        } => enroll_image(&model, &image, right_eye, left_eye, id, &output)?,
    }

    Ok(())
}
