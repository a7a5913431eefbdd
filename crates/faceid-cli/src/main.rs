use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::FacePipeline;
use faceidd::artifacts::ArtifactStorage;
use faceidd::config::Config;
use faceidd::enroll::{BulkEvent, Enroller, ItemStatus};
use faceidd::store::{IdentityStore, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Parser)]
#[command(name = "faceid", about = "Face identification gallery CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll one identity from an image
    Enroll {
        /// Display name, unique across the gallery
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// Enroll every sub-directory of DIR, named after the directory
    Bulk { dir: PathBuf },
    /// Identify the person in an image
    Search { image: PathBuf },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Show model and gallery status
    Status,
}

struct Gallery {
    config: Config,
    pipeline: Arc<FacePipeline>,
    store: Arc<SqliteStore>,
    artifacts: Arc<ArtifactStorage>,
}

impl Gallery {
    fn open() -> Result<Self> {
        let config = Config::from_env();
        let pipeline = Arc::new(faceidd::engine::load_pipeline(&config));
        let store = Arc::new(
            SqliteStore::open(&config.db_path)
                .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
        );
        let artifacts = Arc::new(ArtifactStorage::new(config.data_dir.clone(), config.face_image_dir.clone()));
        Ok(Self {
            config,
            pipeline,
            store,
            artifacts,
        })
    }

    fn enroller(&self) -> Enroller {
        Enroller::new(self.pipeline.clone(), self.store.clone(), self.artifacts.clone())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let gallery = Gallery::open()?;

    match cli.command {
        Commands::Enroll { name, image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
            let identity = gallery.enroller().enroll(&bytes, &name)?;
            println!("Enrolled {} as {}", identity.name, identity.identity_id);
        }
        Commands::Bulk { dir } => {
            let (images, names) = collect_batch(&dir)?;
            if images.is_empty() {
                bail!("no sub-directory of {} contains an image", dir.display());
            }
            for event in gallery.enroller().bulk(images, names)? {
                match event {
                    BulkEvent::Progress(p) => match p.status {
                        ItemStatus::Success => println!("[{}/{}] {}: ok", p.current, p.total, p.name),
                        ItemStatus::Failed => println!(
                            "[{}/{}] {}: failed ({})",
                            p.current,
                            p.total,
                            p.name,
                            p.reason.unwrap_or_default()
                        ),
                    },
                    BulkEvent::Complete(summary) => {
                        println!(
                            "Scanned {}: {} enrolled, {} failed",
                            summary.total_folders_scanned, summary.success_count, summary.failed_count
                        );
                        for failure in summary.failures {
                            println!("  {}: {}", failure.folder, failure.reason);
                        }
                    }
                }
            }
        }
        Commands::Search { image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
            let found = faceidd::identify::identify(
                &gallery.pipeline,
                gallery.store.as_ref(),
                &bytes,
                gallery.config.match_threshold,
            )?;
            match found.identity() {
                Some(identity) => println!(
                    "Identified {} ({}) similarity={:.4}",
                    identity.name, identity.identity_id, found.similarity
                ),
                None => println!(
                    "No match (best: {}, similarity={:.4}, threshold={:.2})",
                    found.best.as_ref().map(|i| i.name.as_str()).unwrap_or("-"),
                    found.similarity,
                    gallery.config.match_threshold
                ),
            }
        }
        Commands::List => {
            let total = gallery.store.count()?;
            let identities = gallery.store.list(0, total)?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                println!(
                    "{}  {}  {}  {}",
                    identity.identity_id,
                    if identity.is_active { "active  " } else { "inactive" },
                    identity.created_at,
                    identity.name
                );
            }
        }
        Commands::Remove { id } => match gallery.store.delete(&id)? {
            Some(identity) => {
                for token in [identity.face_image_path, identity.face_preprocessed_path].into_iter().flatten() {
                    gallery.artifacts.delete_if_exists(&token);
                }
                println!("Removed {} ({})", identity.name, identity.identity_id);
            }
            None => bail!("no identity with id {id}"),
        },
        Commands::Status => {
            let engine = gallery.pipeline.engine();
            let status = serde_json::json!({
                "model_loaded": engine.is_loaded(),
                "model": engine.describe(),
                "detector_available": gallery.pipeline.preprocessor().has_detector(),
                "match_threshold": gallery.config.match_threshold,
                "database": gallery.config.db_path.display().to_string(),
                "identities": gallery.store.count()?,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// One `(image, name)` pair per sub-directory of `dir`, in name order. The
/// image is the first file, by name, with a known image extension.
/// Sub-directories without one are skipped.
fn collect_batch(dir: &Path) -> Result<(Vec<Vec<u8>>, Vec<String>)> {
    let mut folders: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();

    let mut images = Vec::new();
    let mut names = Vec::new();
    for folder in folders {
        let Some(name) = folder.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        match first_image(&folder)? {
            Some(path) => {
                images.push(std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?);
                names.push(name);
            }
            None => tracing::warn!(folder = %folder.display(), "no image found, skipping"),
        }
    }
    Ok((images, names))
}

fn first_image(folder: &Path) -> Result<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}
