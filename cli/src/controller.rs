use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    api::{self, GenerationService},
    app::{AppCommand, AppEvent},
    error::WorkflowError,
    playback::{PlaybackCommand, PlaybackWorker},
    poller::{PollEpoch, PollOutcome, PollSettings, PollTicket, TaskPoller},
    presenter::PlaybackTrack,
    types::{GenerationRequest, TaskHandle},
};

const SELECT_TRACK_HINT: &str = "Select a track with an audio URL to play";

/// Submit → poll → report cycle. At most one poll is live; starting a new
/// submission or cancelling retires the previous one.
pub struct Workflow<S: ?Sized> {
    service: Arc<S>,
    epoch: PollEpoch,
    settings: PollSettings,
    event_tx: UnboundedSender<AppEvent>,
}

impl<S> Workflow<S>
where
    S: GenerationService + ?Sized + 'static,
{
    pub fn new(service: Arc<S>, settings: PollSettings, event_tx: UnboundedSender<AppEvent>) -> Self {
        Self { service, epoch: PollEpoch::new(), settings, event_tx }
    }

    /// Submits `request` and, once the service hands out a task, spawns its poller.
    ///
    /// Returns the poll task so callers can wait on it; `None` when nothing was started.
    pub async fn submit(&self, request: GenerationRequest) -> Option<JoinHandle<()>> {
        if let Err(err) = request.validate() {
            let _ = self.event_tx.send(AppEvent::Error(err.to_string()));
            return None;
        }

        let ticket = self.epoch.begin();
        let generation = ticket.generation();
        let _ = self
            .event_tx
            .send(AppEvent::SubmissionStarted { generation, caption: request.prompt.clone() });

        let handle = match self.service.release_task(&request).await {
            Ok(handle) => handle,
            Err(err) => {
                error!("generation submit failed: {err}");
                let error = WorkflowError::Submission(err.user_message());
                let _ = self.event_tx.send(AppEvent::GenerationFailed { generation, error });
                return None;
            }
        };

        if !ticket.is_live() {
            debug!(task = %handle, "submission superseded before polling started");
            return None;
        }

        info!(task = %handle, model = %request.model, batch = request.batch_size, "task submitted");
        let _ = self.event_tx.send(AppEvent::JobQueued { generation, handle: handle.clone() });
        Some(self.spawn_poll(handle, ticket))
    }

    pub fn cancel(&self) {
        self.epoch.cancel();
        let _ = self.event_tx.send(AppEvent::Cancelled { generation: self.epoch.current() });
    }

    fn spawn_poll(&self, handle: TaskHandle, ticket: PollTicket) -> JoinHandle<()> {
        let poller = TaskPoller::new(self.service.clone(), self.settings);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let generation = ticket.generation();
            match poller.run(&handle, &ticket).await {
                Ok(PollOutcome::Completed(tracks)) => {
                    let _ = event_tx.send(AppEvent::TracksReady { generation, tracks });
                }
                Ok(PollOutcome::Cancelled) => {
                    debug!(task = %handle, "poll retired");
                }
                Err(error) => {
                    error!(task = %handle, "generation failed: {error}");
                    let _ = event_tx.send(AppEvent::GenerationFailed { generation, error });
                }
            }
        })
    }
}

pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    client: api::Client,
    workflow: Workflow<api::Client>,
    event_tx: UnboundedSender<AppEvent>,
    playback: PlaybackWorker,
}

impl Controller {
    pub fn new(
        client: api::Client,
        settings: PollSettings,
        event_tx: UnboundedSender<AppEvent>,
    ) -> Result<Self> {
        let playback = PlaybackWorker::spawn(event_tx.clone())?;
        let workflow = Workflow::new(Arc::new(client.clone()), settings, event_tx.clone());
        let inner = ControllerInner { client, workflow, event_tx, playback };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn spawn(self, mut command_rx: UnboundedReceiver<AppCommand>) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if let Err(err) = Controller::handle_command(inner.clone(), command).await {
                    error!("command error: {err:#}");
                    let _ = inner.event_tx.send(AppEvent::Error(format!("{err:#}")));
                }
            }
        })
    }

    async fn handle_command(inner: Arc<ControllerInner>, command: AppCommand) -> Result<()> {
        match command {
            AppCommand::Submit(request) => {
                inner.workflow.submit(request).await;
            }
            AppCommand::Cancel => inner.workflow.cancel(),
            AppCommand::Surprise => {
                let sample = inner.client.random_sample().await.context("random sample failed")?;
                let _ = inner.event_tx.send(AppEvent::SampleLoaded(sample));
            }
            AppCommand::FormatInput { prompt, lyrics } => {
                let formatted = inner
                    .client
                    .format_input(&prompt, &lyrics)
                    .await
                    .context("prompt enhancement failed")?;
                let _ = inner.event_tx.send(AppEvent::InputFormatted(formatted));
            }
            AppCommand::RefreshModels => Controller::refresh_models(&inner).await?,
            AppCommand::RefreshLibrary => Controller::refresh_library(&inner).await?,
            AppCommand::DeleteTrack { id } => {
                inner.client.delete_history(&id).await.context("failed to delete")?;
                let _ = inner.event_tx.send(AppEvent::LibraryTrackDeleted { id });
            }
            AppCommand::UpdateLibrary(update) => {
                inner.client.update_library(&update).await.context("library update failed")?;
                let _ = inner.event_tx.send(AppEvent::LibraryUpdated(update));
                Controller::refresh_library(&inner).await?;
            }
            AppCommand::LoadLora { reference, scale } => {
                inner.client.load_lora(&reference).await.context("failed to load LoRA")?;
                inner.client.set_lora_scale(scale).await.context("failed to set LoRA scale")?;
                let _ = inner
                    .event_tx
                    .send(AppEvent::Info(format!("LoRA {reference} loaded at scale {scale:.1}")));
            }
            AppCommand::UnloadLora => {
                inner.client.unload_lora().await.context("failed to unload LoRA")?;
                let _ = inner.event_tx.send(AppEvent::Info("LoRA unloaded".to_string()));
            }
            AppCommand::Play(track) => Controller::play(&inner, track).await?,
            AppCommand::TogglePause => inner.playback.send(PlaybackCommand::TogglePause)?,
            AppCommand::Restart => inner.playback.send(PlaybackCommand::Restart)?,
            AppCommand::SeekBy(delta) => inner.playback.send(PlaybackCommand::SeekBy(delta))?,
            AppCommand::StopPlayback => inner.playback.send(PlaybackCommand::Stop)?,
            AppCommand::SetVolume(volume) => {
                inner.playback.send(PlaybackCommand::SetVolume(volume))?
            }
        }
        Ok(())
    }

    async fn refresh_models(inner: &ControllerInner) -> Result<()> {
        let catalog = inner.client.models().await.context("failed to list models")?;
        info!(count = catalog.models.len(), "models loaded");
        let _ = inner.event_tx.send(AppEvent::ModelsLoaded(catalog));
        // LoRA support is optional on the service side.
        match inner.client.loras().await {
            Ok(loras) => {
                let _ = inner.event_tx.send(AppEvent::LorasLoaded(loras));
            }
            Err(err) => warn!("LoRA listing unavailable: {err}"),
        }
        Ok(())
    }

    async fn refresh_library(inner: &ControllerInner) -> Result<()> {
        let tracks = inner.client.history().await.context("failed to load history")?;
        let _ = inner.event_tx.send(AppEvent::LibraryLoaded(tracks));
        Ok(())
    }

    async fn play(inner: &ControllerInner, track: Option<PlaybackTrack>) -> Result<()> {
        let Some((caption, url)) =
            track.and_then(|track| track.audio_url.map(|url| (track.caption, url)))
        else {
            let _ = inner.event_tx.send(AppEvent::Info(SELECT_TRACK_HINT.to_string()));
            return Ok(());
        };
        let bytes = inner
            .client
            .fetch_audio(&url)
            .await
            .with_context(|| format!("failed to download {url}"))?;
        debug!(%url, bytes = bytes.len(), "audio downloaded");
        inner.playback.send(PlaybackCommand::Play { caption, bytes })
    }
}
