mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use eigenface_core::acquisition::{
    FaceLocator, FrameSource, ImageSequenceSource, WholeFrameLocator, DARK_FRAME_THRESHOLD,
};
use eigenface_core::verify::{self, SampleStatus};
use eigenface_core::{export, normalize, store, trainer, Catalog, Recognizer};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "eigenface", about = "Eigenfaces face recognition CLI")]
struct Cli {
    /// SQLite catalog of identities and sample images
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Trained model document
    #[arg(long, global = true)]
    trainfile: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a training list, fit a model and save it
    Train {
        /// Training list, one `[number,]name,path` per line
        #[arg(long)]
        picsfile: Option<PathBuf>,
        /// Directory for the mean face and eigenface images
        #[arg(long)]
        export_dir: Option<PathBuf>,
        /// Skip writing diagnostic images
        #[arg(long)]
        no_export: bool,
    },
    /// Recognize every enrolled sample and report mismatches
    Verify,
    /// Recognize faces in a sequence of frames (default)
    Recognize {
        /// Directory of frames, or a single image
        #[arg(long)]
        videosrc: Option<PathBuf>,
        /// Minimum confidence for a named match
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Add a face image for a person
    Enroll {
        /// Person's name
        #[arg(short, long)]
        name: String,
        /// Face image to add
        #[arg(short, long)]
        image: PathBuf,
        /// Directory the face copy is written to
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// List enrolled identities
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let db_path = cli.db.unwrap_or_else(|| config.db_path.clone());
    let model_path = cli.trainfile.unwrap_or_else(|| config.model_path.clone());

    match cli.command.unwrap_or(Commands::Recognize {
        videosrc: None,
        threshold: None,
    }) {
        Commands::Train {
            picsfile,
            export_dir,
            no_export,
        } => {
            let pics = picsfile.unwrap_or_else(|| config.pics_file.clone());
            let export_dir = (!no_export).then(|| export_dir.unwrap_or_else(|| config.export_dir.clone()));
            train(&db_path, &model_path, &pics, export_dir.as_deref())
        }
        Commands::Verify => run_verify(&db_path, &model_path),
        Commands::Recognize { videosrc, threshold } => {
            let source = videosrc.unwrap_or_else(|| config.video_src.clone());
            let threshold = threshold.unwrap_or(config.confidence_threshold);
            recognize(&db_path, &model_path, &source, threshold)
        }
        Commands::Enroll {
            name,
            image,
            data_dir,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| config.data_dir.clone());
            enroll(&db_path, &name, &image, &data_dir)
        }
        Commands::List => list(&db_path),
    }
}

fn open_catalog(db_path: &Path) -> Result<Catalog> {
    Catalog::open(db_path).with_context(|| format!("opening catalog {}", db_path.display()))
}

fn train(db_path: &Path, model_path: &Path, pics: &Path, export_dir: Option<&Path>) -> Result<()> {
    let catalog = open_catalog(db_path)?;
    let loaded = catalog
        .load_from_list(pics)
        .with_context(|| format!("loading training list {}", pics.display()))?;
    tracing::info!(samples = loaded, list = %pics.display(), "training list loaded");

    let model = trainer::fit(&catalog).context("training failed")?;
    println!(
        "Trained {} faces into {} eigenfaces ({})",
        model.n_faces(),
        model.n_eigens(),
        model.geometry
    );

    if let Some(dir) = export_dir {
        export::write_diagnostics(&model, dir)
            .with_context(|| format!("writing diagnostic images to {}", dir.display()))?;
    }

    store::save(&model, model_path).with_context(|| format!("saving model {}", model_path.display()))?;
    println!("Saved model to {}", model_path.display());
    Ok(())
}

fn run_verify(db_path: &Path, model_path: &Path) -> Result<()> {
    let catalog = open_catalog(db_path)?;
    let mut recognizer = Recognizer::new();
    recognizer
        .load_model(model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;

    let summary = verify::verify_catalog(&catalog, &recognizer, |outcome| match &outcome.status {
        SampleStatus::Success => println!(
            "Verifying {}: Expect {}, Got {} [Success]",
            outcome.path.display(),
            outcome.identity_id,
            outcome.identity_id
        ),
        SampleStatus::Failure { got } => println!(
            "Verifying {}: Expect {}, Got {} [Failure]",
            outcome.path.display(),
            outcome.identity_id,
            got
        ),
        SampleStatus::Unreadable(reason) => println!(
            "Verifying {}: Expect {}, unable to load image ({reason})",
            outcome.path.display(),
            outcome.identity_id
        ),
    })
    .context("verification stopped")?;

    println!(
        "{} samples: {} succeeded, {} failed, {} unreadable",
        summary.total(),
        summary.succeeded,
        summary.failed,
        summary.unreadable
    );
    Ok(())
}

fn recognize(db_path: &Path, model_path: &Path, source: &Path, threshold: f32) -> Result<()> {
    let catalog = open_catalog(db_path)?;
    let mut recognizer = Recognizer::new();
    recognizer
        .load_model(model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;
    let mut frames = ImageSequenceSource::open(source)
        .with_context(|| format!("opening frame source {}", source.display()))?;
    let mut locator = WholeFrameLocator;

    while let Some(next) = frames.next_frame() {
        let frame = match next {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "skipping frame");
                continue;
            }
        };
        if frame.is_dark(DARK_FRAME_THRESHOLD) {
            tracing::debug!(seq = frame.sequence, "dark frame, skipping");
            continue;
        }

        let Some(region) = locator.locate(&frame).into_iter().next() else {
            tracing::debug!(seq = frame.sequence, "no face in frame");
            continue;
        };
        let Some(face) = frame.crop(&region) else {
            continue;
        };

        let result = match recognizer.recognize_gray(&face) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "recognition failed");
                continue;
            }
        };

        if !result.is_known(threshold) {
            println!(
                "Frame {}: unknown (confidence {:.3})",
                frame.sequence, result.confidence
            );
            continue;
        }

        let name = match catalog.name_for_identity(result.identity_id) {
            Ok(Some(name)) => name,
            Ok(None) => format!("#{}", result.identity_id),
            Err(e) => {
                tracing::warn!(id = %result.identity_id, error = %e, "name lookup failed");
                format!("#{}", result.identity_id)
            }
        };
        println!(
            "Frame {}: {} (confidence {:.3}, {:.1} ms)",
            frame.sequence,
            name,
            result.confidence,
            result.elapsed.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

fn enroll(db_path: &Path, name: &str, image: &Path, data_dir: &Path) -> Result<()> {
    let catalog = open_catalog(db_path)?;
    let face = normalize::load_gray(image).with_context(|| format!("reading {}", image.display()))?;
    let saved = catalog
        .add_face_image(name, &face, data_dir)
        .with_context(|| format!("enrolling {name}"))?;
    println!("Enrolled {name}: {}", saved.display());
    Ok(())
}

fn list(db_path: &Path) -> Result<()> {
    let catalog = open_catalog(db_path)?;
    let identities = catalog.list_identities().context("listing identities")?;
    if identities.is_empty() {
        println!("No identities enrolled");
        return Ok(());
    }
    for identity in identities {
        let samples = catalog.count_samples_for(identity.id)?;
        println!(
            "{:>4}  {:<24} {} samples  (since {})",
            identity.id, identity.name, samples, identity.created_at
        );
    }
    Ok(())
}
