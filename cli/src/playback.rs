use anyhow::{anyhow, Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::io::Cursor;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::app::AppEvent;

const IDLE_CHECK: Duration = Duration::from_millis(500);

pub enum PlaybackCommand {
    Play { caption: String, bytes: Vec<u8> },
    TogglePause,
    Restart,
    /// Moves the playhead by whole seconds, negative to rewind.
    SeekBy(i64),
    Stop,
    SetVolume(f32),
    Shutdown,
}

/// Owns the audio output on a dedicated thread; rodio's stream is not `Send`.
pub struct PlaybackWorker {
    command_tx: Sender<PlaybackCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlaybackWorker {
    pub fn spawn(event_tx: UnboundedSender<AppEvent>) -> Result<Self> {
        let (command_tx, command_rx) = channel::<PlaybackCommand>();
        let thread_handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let mut player = Player::default();
                loop {
                    match command_rx.recv_timeout(IDLE_CHECK) {
                        Ok(PlaybackCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            player.stop();
                            break;
                        }
                        Ok(command) => {
                            if let Err(err) = player.apply(command, &event_tx) {
                                error!("playback error: {err:#}");
                                let _ = event_tx.send(AppEvent::Error(format!("{err:#}")));
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if player.finished() {
                                player.stop();
                                let _ = event_tx.send(AppEvent::PlaybackStopped);
                            }
                        }
                    }
                }
            })
            .context("failed to spawn playback thread")?;

        Ok(Self { command_tx, thread_handle: Some(thread_handle) })
    }

    pub fn send(&self, command: PlaybackCommand) -> Result<()> {
        self.command_tx.send(command).map_err(|_| anyhow!("playback thread has stopped"))
    }

    pub fn shutdown(&mut self) {
        let _ = self.command_tx.send(PlaybackCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Player {
    output: Option<(OutputStream, OutputStreamHandle)>,
    sink: Option<Sink>,
    volume: f32,
}

impl Default for Player {
    fn default() -> Self {
        Self { output: None, sink: None, volume: 1.0 }
    }
}

impl Player {
    fn apply(&mut self, command: PlaybackCommand, event_tx: &UnboundedSender<AppEvent>) -> Result<()> {
        match command {
            PlaybackCommand::Play { caption, bytes } => {
                self.play(bytes)?;
                info!(%caption, "playback started");
                let _ = event_tx.send(AppEvent::PlaybackStarted { caption });
            }
            PlaybackCommand::TogglePause => {
                if let Some(sink) = &self.sink {
                    if sink.is_paused() {
                        sink.play();
                    } else {
                        sink.pause();
                    }
                    let _ = event_tx.send(AppEvent::PlaybackPaused(sink.is_paused()));
                }
            }
            PlaybackCommand::Restart => {
                if let Some(sink) = &self.sink {
                    if let Err(err) = sink.try_seek(Duration::ZERO) {
                        warn!("seek failed: {err}");
                    }
                }
            }
            PlaybackCommand::SeekBy(delta) => {
                if let Some(sink) = &self.sink {
                    let target = seek_target(sink.get_pos(), delta);
                    if let Err(err) = sink.try_seek(target) {
                        warn!("seek failed: {err}");
                    }
                }
            }
            PlaybackCommand::Stop => {
                self.stop();
                let _ = event_tx.send(AppEvent::PlaybackStopped);
            }
            PlaybackCommand::SetVolume(volume) => {
                self.volume = volume.clamp(0.0, 1.0);
                if let Some(sink) = &self.sink {
                    sink.set_volume(self.volume);
                }
                let _ = event_tx.send(AppEvent::VolumeChanged(self.volume));
            }
            PlaybackCommand::Shutdown => self.stop(),
        }
        Ok(())
    }

    fn play(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.stop();
        if self.output.is_none() {
            let output = OutputStream::try_default().context("failed to open audio output")?;
            self.output = Some(output);
        }
        let Some((_, handle)) = &self.output else {
            return Err(anyhow!("audio output unavailable"));
        };
        let decoder = Decoder::new(Cursor::new(bytes)).context("failed to decode audio")?;
        let sink = Sink::try_new(handle).context("failed to create audio sink")?;
        sink.set_volume(self.volume);
        sink.append(decoder);
        sink.play();
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn finished(&self) -> bool {
        self.sink.as_ref().map(|sink| sink.empty()).unwrap_or(false)
    }
}

fn seek_target(position: Duration, delta_secs: i64) -> Duration {
    let step = Duration::from_secs(delta_secs.unsigned_abs());
    if delta_secs >= 0 {
        position + step
    } else {
        position.saturating_sub(step)
    }
}
