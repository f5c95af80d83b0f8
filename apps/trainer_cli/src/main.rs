use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    load_settings, BoardDisplay, ClickOutcome, CornerCaptureController, ImageFile, ImageRect,
    PointerClick, PredictionError, PredictionRequestCoordinator, ServiceHandles, SessionEvent,
    SessionStatusController, SubmitOutcome, TrainingRequestCoordinator, TrainingService,
    TrainingUpload,
};
use shared::domain::{ModelContext, Player, TaskType, TrainingStatus};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod board;
mod dataset;

#[derive(Parser, Debug)]
#[command(about = "Operator console for the board-recognition training service")]
struct Cli {
    /// Overrides `server_url` from trainer.toml and the environment.
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the training status once.
    Status,
    /// Stream the training log until interrupted.
    Watch,
    /// Upload a dataset directory and start a training run.
    Train {
        #[arg(long)]
        name: String,
        #[arg(long, value_enum, default_value_t = TaskArg::ObjectDetection)]
        task: TaskArg,
        #[arg(long)]
        dataset: PathBuf,
        /// Keep streaming the log after the run starts.
        #[arg(long)]
        follow: bool,
    },
    /// Stop the running training.
    Stop,
    /// List trained models.
    Models,
    /// Download the training-result images of a model.
    ModelData {
        #[arg(long)]
        name: String,
        #[arg(long)]
        model_type: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Recognise the position on a board photo.
    Predict {
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, value_enum)]
        player: Option<PlayerArg>,
        #[arg(long, value_enum)]
        crop: Option<CropArg>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        model_type: Option<String>,
        /// Board corner on the displayed image, as `X,Y`. Repeat four times.
        #[arg(long = "click", value_parser = parse_click)]
        clicks: Vec<PointerClick>,
        /// Displayed image size, as `WIDTHxHEIGHT`.
        #[arg(long, value_parser = parse_surface, default_value = "1280x720")]
        surface: ImageRect,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TaskArg {
    ObjectDetection,
    ImageClassification,
}

impl From<TaskArg> for TaskType {
    fn from(task: TaskArg) -> Self {
        match task {
            TaskArg::ObjectDetection => TaskType::ObjectDetection,
            TaskArg::ImageClassification => TaskType::ImageClassification,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PlayerArg {
    White,
    Black,
}

impl From<PlayerArg> for Player {
    fn from(player: PlayerArg) -> Self {
        match player {
            PlayerArg::White => Player::White,
            PlayerArg::Black => Player::Black,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CropArg {
    Yes,
    No,
}

fn parse_click(raw: &str) -> Result<PointerClick, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{raw}'"))?;
    let x: f64 = x.trim().parse().map_err(|err| format!("bad X '{x}': {err}"))?;
    let y: f64 = y.trim().parse().map_err(|err| format!("bad Y '{y}': {err}"))?;
    Ok(PointerClick::at(x, y))
}

fn parse_surface(raw: &str) -> Result<ImageRect, String> {
    let (width, height) = raw
        .split_once(|c: char| c.eq_ignore_ascii_case(&'x'))
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let width: f64 = width
        .trim()
        .parse()
        .map_err(|err| format!("bad width '{width}': {err}"))?;
    let height: f64 = height
        .trim()
        .parse()
        .map_err(|err| format!("bad height '{height}': {err}"))?;
    if width <= 0.0 || height <= 0.0 {
        return Err(format!("surface must be non-empty, got '{raw}'"));
    }
    Ok(ImageRect::sized(width, height))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    let handles = ServiceHandles::from_settings(&settings)?;
    let service = handles.service.as_ref();
    info!(server_url = %service.server_url(), "using training service");
    let new_session = || {
        SessionStatusController::with_event_capacity(handles.events.clone(), settings.event_buffer)
    };

    match cli.command {
        Command::Status => {
            let mut session = new_session();
            let status = session.refresh_status(service).await?;
            println!("status: {status}");
        }
        Command::Watch => {
            let mut session = new_session();
            let mut events = session.subscribe_events();
            open_session(&mut session, service, true).await;
            follow(&mut session, &mut events, service).await;
        }
        Command::Train {
            name,
            task,
            dataset,
            follow: keep_following,
        } => {
            let files = dataset::collect_dataset(&dataset)?;
            info!(dataset = %dataset.display(), file_count = files.len(), "dataset packed");

            let mut session = new_session();
            let mut events = session.subscribe_events();
            open_session(&mut session, service, keep_following).await;

            let mut coordinator = TrainingRequestCoordinator::new();
            coordinator
                .start(
                    &mut session,
                    service,
                    TrainingUpload {
                        name,
                        task_type: task.into(),
                        files,
                    },
                )
                .await?;
            if keep_following {
                follow(&mut session, &mut events, service).await;
            } else {
                drain_events(&mut events);
            }
        }
        Command::Stop => {
            let mut session = new_session();
            let mut events = session.subscribe_events();
            open_session(&mut session, service, false).await;
            TrainingRequestCoordinator::new()
                .stop(&mut session, service)
                .await?;
            drain_events(&mut events);
        }
        Command::Models => print_models(service).await?,
        Command::ModelData {
            name,
            model_type,
            out,
        } => save_model_images(service, &name, &model_type, &out).await?,
        Command::Predict {
            image,
            player,
            crop,
            name,
            model_type,
            clicks,
            surface,
        } => {
            let mut coordinator =
                PredictionRequestCoordinator::new(ModelContext { name, model_type });
            if let Some(path) = image {
                coordinator.select_image(read_image(&path).await?);
            }
            if let Some(player) = player {
                coordinator.select_player(player.into());
            }
            if let Some(crop) = crop {
                coordinator.set_crop(matches!(crop, CropArg::Yes));
            }
            predict(&mut coordinator, surface, &clicks, service).await?;
        }
    }

    Ok(())
}

/// Subscribes when asked, then polls once. A failed poll is reported and
/// leaves the session `unknown`; an established subscription stays live.
async fn open_session(
    session: &mut SessionStatusController,
    service: &dyn TrainingService,
    subscribe: bool,
) -> TrainingStatus {
    let polled = if subscribe {
        session.initialize(service).await
    } else {
        session.refresh_status(service).await
    };
    match polled {
        Ok(status) => status,
        Err(err) => {
            warn!(status = %session.status(), "training status unavailable: {err}");
            session.status()
        }
    }
}

/// Prints session events until the push stream ends or Ctrl-C arrives.
async fn follow(
    session: &mut SessionStatusController,
    events: &mut broadcast::Receiver<SessionEvent>,
    service: &dyn TrainingService,
) {
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        if drain_events(events) {
            refresh_catalog(service).await;
        }
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                break;
            }
            more = session.process_next_event() => {
                if !more {
                    break;
                }
            }
        }
    }

    if drain_events(events) {
        refresh_catalog(service).await;
    }
    session.shutdown();
}

/// Prints pending log lines; returns whether a run completed meanwhile.
fn drain_events(events: &mut broadcast::Receiver<SessionEvent>) -> bool {
    let mut completed = false;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::LogAppended(line)) => println!("{line}"),
            Ok(SessionEvent::StatusChanged(status)) => info!(status = %status, "status"),
            Ok(SessionEvent::TrainingCompleted) => completed = true,
            Ok(SessionEvent::StreamError(message)) => warn!("{message}"),
            Ok(SessionEvent::LogReset) => {}
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "log output fell behind"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return completed,
        }
    }
}

async fn refresh_catalog(service: &dyn TrainingService) {
    if let Err(err) = print_models(service).await {
        warn!("failed to refresh model catalog: {err:#}");
    }
}

async fn print_models(service: &dyn TrainingService) -> Result<()> {
    let models = service
        .list_models()
        .await
        .context("failed to list models")?;
    if models.is_empty() {
        println!("no trained models");
    }
    for model in models {
        println!("{model}");
    }
    Ok(())
}

async fn save_model_images(
    service: &dyn TrainingService,
    name: &str,
    model_type: &str,
    out: &Path,
) -> Result<()> {
    let data = service
        .model_data(name, model_type)
        .await
        .with_context(|| format!("failed to fetch images of {name}"))?;
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("failed to create {}", out.display()))?;
    for (key, bytes) in data.images {
        let path = out.join(format!("{key}.png"));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

async fn read_image(path: &Path) -> Result<ImageFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(ImageFile {
        file_name,
        mime_type: dataset::image_mime_type(path).map(str::to_string),
        bytes,
    })
}

async fn predict(
    coordinator: &mut PredictionRequestCoordinator,
    surface: ImageRect,
    clicks: &[PointerClick],
    service: &dyn TrainingService,
) -> Result<()> {
    let mut capture = CornerCaptureController::new();
    let board = match coordinator.submit(&mut capture, surface, service).await? {
        SubmitOutcome::Predicted(board) => board,
        SubmitOutcome::AwaitingCorners => {
            for click in clicks {
                match capture.click(*click) {
                    ClickOutcome::Ignored => {
                        warn!(x = click.client_x, y = click.client_y, "click ignored")
                    }
                    ClickOutcome::Recorded { count } => info!(count, "corner marked"),
                    ClickOutcome::Completed(_) => break,
                }
            }
            let marked = capture.points().len();
            capture.close();
            match coordinator.resume(service).await {
                Ok(Some(board)) => board,
                Ok(None) => return Ok(()),
                Err(PredictionError::CaptureAbandoned) => {
                    bail!("cropping needs four --click corners on the image, got {marked}")
                }
                Err(err) => return Err(err.into()),
            }
        }
    };
    show_board(&board);
    Ok(())
}

fn show_board(board: &BoardDisplay) {
    match board::diagram(board) {
        Some(diagram) => println!("{}\n\n{diagram}", board.position),
        None => println!("{}", board.position),
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
