use anyhow::{anyhow, Context, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    fs::OpenOptions,
    io,
    sync::Mutex,
};
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;

mod api;
mod app;
mod config;
mod controller;
mod error;
mod library;
mod playback;
mod poller;
mod presenter;
#[cfg(test)]
mod testing;
mod types;
mod ui;

use app::{AppCommand, AppEvent, AppState};
use config::AppConfig;
use controller::Controller;

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;

    let config = AppConfig::load()?;
    let client = api::Client::new(config.service_url(), config.request_timeout())?;
    info!(service = %client.base_url(), "starting studio");

    let (event_tx, mut event_rx) = unbounded_channel();
    let (command_tx, command_rx) = unbounded_channel();

    let controller = Controller::new(client.clone(), config.poll_settings(), event_tx.clone())?;
    let _controller_task = controller.spawn(command_rx);

    let mut app_state = AppState::new(config.initial_request(), client.base_url().clone());
    app_state.handle_event(AppEvent::Info(format!("Service at {}", client.base_url())));
    for command in [AppCommand::RefreshModels, AppCommand::RefreshLibrary] {
        command_tx.send(command).map_err(|_| anyhow!("controller stopped during startup"))?;
    }

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    enable_raw_mode()?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let ui_result = ui::run(&mut terminal, &mut app_state, &mut event_rx, command_tx);

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;

    ui_result
}

/// Logs go to a file; the terminal belongs to the UI.
fn setup_tracing() -> Result<()> {
    let path = AppConfig::log_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("studio=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .compact()
        .try_init()
        .map_err(|err: Box<dyn std::error::Error + Send + Sync>| {
            anyhow!("failed to initialise tracing: {err}")
        })?;
    Ok(())
}
