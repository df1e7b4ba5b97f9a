use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{self, Context as _},
};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{Layer, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use vidream_upload::{
    api::{BunnyStreamClient, ConvexClient},
    clock::SystemClock,
    config::{self, Config, ProviderConfig},
    credentials::{CredentialIssuer, CredentialRequest, CredentialSource},
    identity::Caller,
    store::{MemoryStore, MetadataStore},
    upload::{
        FilePicker, PathPicker, PickedFile, PipelineError, ResumableUpload, ResumeStore,
        TusClient, UploadForm, UploadPipeline, UploadUpdate,
    },
    video::{VideoId, Visibility},
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file to use instead of the one in the data directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a video. Without FILE a file dialog is shown, if available.
    Upload {
        file: Option<PathBuf>,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma-separated
        #[arg(long, default_value = "")]
        tags: String,
        #[arg(long, default_value_t = Visibility::Public)]
        visibility: Visibility,
    },
    /// Continue an interrupted upload
    Resume { record_id: VideoId, file: PathBuf },
    /// List your videos, newest first
    List,
    Show { record_id: VideoId },
    /// Issue upload credentials for an existing record and print them as JSON
    IssueCredentials {
        #[arg(long)]
        title: String,
        #[arg(long)]
        record_id: VideoId,
        #[arg(long)]
        collection: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging, including to file
    let data_dir = config::get_persistent_dir()?;
    let log_path = data_dir.join(constants::filename::persistent::LOG);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter.clone()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false)
                .with_filter(env_filter),
        )
        .init();

    tracing::debug!("Logging initialized, writing to {:?}", log_path);
    tracing::info!("Vidream uploader v{}", env!("CARGO_PKG_VERSION"));

    color_eyre::install()?;

    let config_path = match args.config {
        Some(path) => path,
        None => Config::get_path()?,
    };
    let config = Config::load_from(&config_path)?;

    tokio::runtime::Runtime::new()?.block_on(run(args.command, config, &data_dir))
}

/// Where records live and who hands out upload credentials.
struct Backend {
    store: Arc<dyn MetadataStore>,
    credentials: Arc<dyn CredentialSource>,
}

fn backend(config: &Config, data_dir: &Path) -> Result<Backend> {
    if let Some(url) = &config.preferences.convex_url {
        tracing::info!("Using hosted backend at {url}");
        let client = Arc::new(ConvexClient::new(
            url.clone(),
            Some(config.credentials.auth_token.clone()),
        ));
        return Ok(Backend {
            store: client.clone(),
            credentials: client,
        });
    }

    let videos_path = data_dir.join(constants::filename::persistent::VIDEOS);
    tracing::info!("Using local backend at {}", videos_path.display());
    let store = MemoryStore::open(&videos_path)?;

    let caller = match config.credentials.identity() {
        Some(identity) => Caller::User(identity),
        None => Caller::Anonymous,
    };

    let provider = ProviderConfig::from_env();
    let issuer = CredentialIssuer::new(
        provider.clone(),
        Arc::new(BunnyStreamClient::new(provider.api_base)),
        Arc::new(store.as_system()),
        Arc::new(SystemClock),
    );

    Ok(Backend {
        store: Arc::new(store.as_caller(caller)),
        credentials: Arc::new(issuer),
    })
}

fn pipeline(config: &Config, data_dir: &Path, backend: Backend) -> Result<UploadPipeline> {
    let options = config.preferences.upload_options();
    let resume = ResumeStore::open(&data_dir.join(constants::filename::persistent::PENDING_UPLOADS))?;
    let driver = ResumableUpload::new(
        Arc::new(TusClient::new(&options.endpoint)?),
        Arc::new(resume),
        Arc::new(SystemClock),
        options,
    );
    Ok(UploadPipeline::new(
        backend.store,
        backend.credentials,
        driver,
        config.preferences.collection_id.clone(),
    ))
}

async fn run(command: Command, config: Config, data_dir: &Path) -> Result<()> {
    let backend = backend(&config, data_dir)?;

    match command {
        Command::Upload {
            file,
            title,
            description,
            tags,
            visibility,
        } => {
            let mut form = UploadForm::new();
            form.title = title;
            form.description = description;
            form.tags = tags;
            form.visibility = visibility;

            let picker = file_picker(file);
            if !form.pick_file(picker.as_ref()).await {
                tracing::info!("No file selected");
            }

            let pipeline = pipeline(&config, data_dir, backend)?;
            let watch = UploadWatch::start(&pipeline);
            let outcome = pipeline
                .submit(&mut form, watch.token())
                .await
                .map_err(report)?;
            println!("{}", outcome.record_id);
        }
        Command::Resume { record_id, file } => {
            if !file.is_file() {
                eyre::bail!("{} is not a file", file.display());
            }
            let mut form = UploadForm::new();
            let pipeline = pipeline(&config, data_dir, backend)?;
            let watch = UploadWatch::start(&pipeline);
            let outcome = pipeline
                .resume(&record_id, PickedFile::from_path(&file), &mut form, watch.token())
                .await
                .map_err(report)?;
            println!("{}", outcome.record_id);
        }
        Command::List => {
            for video in backend.store.list_for_user().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    video.id, video.processing_status, video.visibility, video.title
                );
            }
        }
        Command::Show { record_id } => match backend.store.get_by_id(&record_id).await? {
            Some(video) => println!("{}", serde_json::to_string_pretty(&video)?),
            None => eyre::bail!("Video {record_id} not found"),
        },
        Command::IssueCredentials {
            title,
            record_id,
            collection,
        } => {
            let credential = backend
                .credentials
                .request_upload_credentials(CredentialRequest {
                    title,
                    collection_id: collection.or(config.preferences.collection_id),
                    record_id,
                })
                .await
                .context("failed to issue upload credentials")?;
            println!("{}", serde_json::to_string_pretty(&credential)?);
        }
    }

    Ok(())
}

#[cfg(feature = "dialog")]
fn file_picker(file: Option<PathBuf>) -> Box<dyn FilePicker> {
    match file {
        Some(path) => Box::new(PathPicker::new(Some(path))),
        None => Box::new(vidream_upload::upload::DialogPicker),
    }
}

#[cfg(not(feature = "dialog"))]
fn file_picker(file: Option<PathBuf>) -> Box<dyn FilePicker> {
    Box::new(PathPicker::new(file))
}

/// Background tasks that live as long as one upload: Ctrl+C cancels it and
/// progress is logged as it arrives. Aborted on drop.
struct UploadWatch {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}
impl UploadWatch {
    fn start(pipeline: &UploadPipeline) -> Self {
        let cancel = CancellationToken::new();
        let ctrl_c = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl+C received, cancelling upload");
                    cancel.cancel();
                }
            }
        });

        let mut updates = pipeline.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(UploadUpdate::Progress(Some(progress))) => tracing::info!(
                        "{:.1}% ({} bytes, {:.2} MiB/s, ETA {:.0}s)",
                        progress.percent,
                        progress.bytes_uploaded,
                        progress.speed_mbps,
                        progress.eta_seconds
                    ),
                    Ok(UploadUpdate::Progress(None)) => {}
                    Ok(UploadUpdate::Status(status)) => tracing::info!("Video is now {status}"),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            cancel,
            tasks: vec![ctrl_c, printer],
        }
    }

    fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
impl Drop for UploadWatch {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn report(error: PipelineError) -> eyre::Report {
    if let PipelineError::Validation(errors) = &error {
        for (field, message) in errors.iter() {
            eprintln!("{field}: {message}");
        }
    }
    eyre::eyre!("{error}")
}
