use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Tabs},
    Frame, Terminal,
};
use std::time::Duration;
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::app::{AppCommand, AppEvent, AppState, FormField, InputKind, PendingInput, Tab};

mod generator;
mod library;

const VOLUME_STEP: f32 = 0.1;
const SEEK_STEP_SECS: i64 = 10;

pub fn run<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    event_rx: &mut UnboundedReceiver<AppEvent>,
    command_tx: UnboundedSender<AppCommand>,
) -> Result<()> {
    loop {
        loop {
            match event_rx.try_recv() {
                Ok(event) => app.handle_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    app.push_status_line("Controller stopped".to_string());
                    break;
                }
            }
        }

        terminal.draw(|frame| draw(frame, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(app, key, &command_tx) == KeyOutcome::Quit {
                    break;
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Quit,
}

fn handle_key(app: &mut AppState, key: KeyEvent, command_tx: &UnboundedSender<AppCommand>) -> KeyOutcome {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q')) {
        return KeyOutcome::Quit;
    }

    if app.input.is_some() {
        handle_input_key(app, key, command_tx);
        return KeyOutcome::Continue;
    }

    match key.code {
        KeyCode::F(1) => app.tab = Tab::Generator,
        KeyCode::F(2) => app.tab = Tab::Library,
        KeyCode::F(5) => send(command_tx, AppCommand::Play(selected_playback(app))),
        KeyCode::F(6) => send(command_tx, AppCommand::TogglePause),
        KeyCode::F(7) => send(command_tx, AppCommand::StopPlayback),
        KeyCode::F(8) => send(command_tx, AppCommand::Restart),
        KeyCode::Left if ctrl => send(command_tx, AppCommand::SeekBy(-SEEK_STEP_SECS)),
        KeyCode::Right if ctrl => send(command_tx, AppCommand::SeekBy(SEEK_STEP_SECS)),
        KeyCode::Up if ctrl => nudge_volume(app, VOLUME_STEP, command_tx),
        KeyCode::Down if ctrl => nudge_volume(app, -VOLUME_STEP, command_tx),
        _ => {
            return match app.tab {
                Tab::Generator => handle_generator_key(app, key, ctrl, command_tx),
                Tab::Library => handle_library_key(app, key, command_tx),
            };
        }
    }
    KeyOutcome::Continue
}

fn handle_generator_key(
    app: &mut AppState,
    key: KeyEvent,
    ctrl: bool,
    command_tx: &UnboundedSender<AppCommand>,
) -> KeyOutcome {
    match key.code {
        KeyCode::Char('g') if ctrl => submit(app, command_tx),
        KeyCode::Char('x') if ctrl => cancel(app, command_tx),
        KeyCode::Char('r') if ctrl => send(command_tx, AppCommand::Surprise),
        KeyCode::Char('e') if ctrl => {
            if app.form.prompt.trim().is_empty() && app.form.lyrics.trim().is_empty() {
                app.push_status_line("Write a description or lyrics to enhance".to_string());
            } else {
                send(
                    command_tx,
                    AppCommand::FormatInput {
                        prompt: app.form.prompt.clone(),
                        lyrics: app.form.lyrics.clone(),
                    },
                );
            }
        }
        KeyCode::Char('l') if ctrl => match app.form.lora.clone() {
            Some(reference) => {
                send(command_tx, AppCommand::LoadLora { reference, scale: app.lora_scale })
            }
            None => app.push_status_line("Pick a LoRA first".to_string()),
        },
        KeyCode::Char('u') if ctrl => send(command_tx, AppCommand::UnloadLora),
        KeyCode::Esc => cancel(app, command_tx),
        KeyCode::Tab | KeyCode::Down => app.focus = app.focus.next(),
        KeyCode::BackTab | KeyCode::Up => app.focus = app.focus.previous(),
        KeyCode::Left => app.adjust(-1),
        KeyCode::Right => app.adjust(1),
        KeyCode::PageDown => app.results.select_next(),
        KeyCode::PageUp => app.results.select_previous(),
        KeyCode::Backspace => app.backspace(),
        KeyCode::Enter if app.focus == FormField::Lyrics => app.newline(),
        KeyCode::Enter => submit(app, command_tx),
        KeyCode::Char(c) if !ctrl => {
            if app.focus.is_text() || app.focus == FormField::Seed {
                app.type_char(c);
            } else if c == '+' {
                app.adjust(1);
            } else if c == '-' {
                app.adjust(-1);
            } else if c == 'q' {
                return KeyOutcome::Quit;
            }
        }
        _ => {}
    }
    KeyOutcome::Continue
}

fn handle_library_key(
    app: &mut AppState,
    key: KeyEvent,
    command_tx: &UnboundedSender<AppCommand>,
) -> KeyOutcome {
    let selected_id = app.library.selected_track().map(|track| track.id.clone());
    match key.code {
        KeyCode::Char('q') => return KeyOutcome::Quit,
        KeyCode::Down | KeyCode::Char('j') => app.library.select_next(),
        KeyCode::Up | KeyCode::Char('k') => app.library.select_previous(),
        KeyCode::Enter | KeyCode::Char('p') => {
            send(command_tx, AppCommand::Play(app.selected_library_playback()))
        }
        KeyCode::Char(' ') => send(command_tx, AppCommand::TogglePause),
        KeyCode::Char('s') => send(command_tx, AppCommand::StopPlayback),
        KeyCode::Char('r') => send(command_tx, AppCommand::Restart),
        KeyCode::Left => send(command_tx, AppCommand::SeekBy(-SEEK_STEP_SECS)),
        KeyCode::Right => send(command_tx, AppCommand::SeekBy(SEEK_STEP_SECS)),
        KeyCode::Char('l') => send(command_tx, AppCommand::RefreshLibrary),
        KeyCode::Char('/') => {
            let query = app.library.query().to_string();
            open_input(app, InputKind::Search, query);
        }
        KeyCode::Char('f') => open_input(app, InputKind::CreateFolder, String::new()),
        KeyCode::Esc => app.library.set_query(""),
        KeyCode::Char(c @ ('n' | 't' | 'm' | 'D')) => {
            let Some(id) = selected_id else {
                app.push_status_line("No track selected".to_string());
                return KeyOutcome::Continue;
            };
            match c {
                'n' => {
                    let current =
                        app.library.get(&id).map(|t| t.display_name().to_string()).unwrap_or_default();
                    open_input(app, InputKind::Rename { id }, current);
                }
                't' => {
                    let current =
                        app.library.get(&id).map(|t| t.meta.tags.join(", ")).unwrap_or_default();
                    open_input(app, InputKind::Tag { id }, current);
                }
                'm' => {
                    let current = app.library.get(&id).and_then(|t| t.folder.clone()).unwrap_or_default();
                    open_input(app, InputKind::Move { id }, current);
                }
                _ => send(command_tx, AppCommand::DeleteTrack { id }),
            }
        }
        _ => {}
    }
    KeyOutcome::Continue
}

fn handle_input_key(app: &mut AppState, key: KeyEvent, command_tx: &UnboundedSender<AppCommand>) {
    let Some(input) = app.input.as_mut() else {
        return;
    };
    match key.code {
        KeyCode::Esc => app.input = None,
        KeyCode::Backspace => {
            input.buffer.pop();
            if input.kind == InputKind::Search {
                let query = input.buffer.clone();
                app.library.set_query(query);
            }
        }
        KeyCode::Char(c) => {
            input.buffer.push(c);
            if input.kind == InputKind::Search {
                let query = input.buffer.clone();
                app.library.set_query(query);
            }
        }
        KeyCode::Enter => {
            let Some(input) = app.input.take() else {
                return;
            };
            if let Some(update) = input.into_update() {
                send(command_tx, AppCommand::UpdateLibrary(update));
            }
        }
        _ => {}
    }
}

fn open_input(app: &mut AppState, kind: InputKind, buffer: String) {
    app.input = Some(PendingInput { kind, buffer });
}

fn submit(app: &mut AppState, command_tx: &UnboundedSender<AppCommand>) {
    if app.phase.is_busy() {
        app.push_status_line("A generation is already running".to_string());
        return;
    }
    send(command_tx, AppCommand::Submit(app.form.clone()));
}

fn cancel(app: &mut AppState, command_tx: &UnboundedSender<AppCommand>) {
    if app.phase.is_busy() {
        send(command_tx, AppCommand::Cancel);
    }
}

fn selected_playback(app: &AppState) -> Option<crate::presenter::PlaybackTrack> {
    match app.tab {
        Tab::Generator => app.selected_result_playback(),
        Tab::Library => app.selected_library_playback(),
    }
}

fn nudge_volume(app: &AppState, delta: f32, command_tx: &UnboundedSender<AppCommand>) {
    let volume = ((app.playback.volume + delta).clamp(0.0, 1.0) * 10.0).round() / 10.0;
    send(command_tx, AppCommand::SetVolume(volume));
}

fn send(command_tx: &UnboundedSender<AppCommand>, command: AppCommand) {
    let _ = command_tx.send(command);
}

fn draw(frame: &mut Frame, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(7),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let titles = vec!["Generator [F1]", "Library [F2]"];
    let selected = match app.tab {
        Tab::Generator => 0,
        Tab::Library => 1,
    };
    let tabs = Tabs::new(titles)
        .block(Block::default().title("Studio").borders(Borders::ALL))
        .select(selected)
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    frame.render_widget(tabs, chunks[0]);

    match app.tab {
        Tab::Generator => generator::render(frame, chunks[1], app),
        Tab::Library => library::render(frame, chunks[1], app),
    }

    render_status(frame, chunks[2], app);
    frame.render_widget(Paragraph::new(help_line(app)), chunks[3]);

    if let Some(input) = &app.input {
        render_input(frame, input);
    }
}

fn render_status(frame: &mut Frame, area: Rect, app: &AppState) {
    let now_playing = match &app.playback.now_playing {
        Some(caption) if app.playback.paused => format!("Paused: {caption}"),
        Some(caption) => format!("Playing: {caption}"),
        None => "Nothing playing".to_string(),
    };
    let title = format!(
        "Status | {now_playing} | volume {:.0}%",
        app.playback.volume * 100.0
    );
    let lines: Vec<Line> = if app.status_lines.is_empty() {
        vec![Line::from("Ready.")]
    } else {
        app.status_lines.iter().map(|line| Line::from(line.as_str())).collect()
    };
    let inner_height = area.height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(inner_height);
    let paragraph = Paragraph::new(lines.into_iter().skip(skip).collect::<Vec<_>>())
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn help_line(app: &AppState) -> Line<'static> {
    let text = match app.tab {
        Tab::Generator => {
            "Tab/↑↓ field  ←→ adjust  Enter/^G generate  Esc cancel  ^R surprise  ^E enhance  ^L/^U LoRA  PgUp/PgDn result  F5 play  F6 pause  F7 stop  ^←→ seek  ^C quit"
        }
        Tab::Library => {
            "↑↓ select  Enter play  space pause  ←→ seek  / search  n rename  t tag  m move  f folder  D delete  l reload  q quit"
        }
    };
    Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)))
}

fn render_input(frame: &mut Frame, input: &PendingInput) {
    let area = centered(frame.size(), 60, 3);
    frame.render_widget(Clear, area);
    let block = Block::default()
        .title(format!("{} (Enter to apply, Esc to close)", input.kind.title()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    frame.render_widget(Paragraph::new(input.buffer.as_str()).block(block), area);
}

fn centered(area: Rect, width_percent: u16, height: u16) -> Rect {
    let width = area.width * width_percent / 100;
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height: height.min(area.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryUpdate;
    use crate::types::{GenerationRequest, LibraryTrack, TaskHandle};
    use reqwest::Url;
    use tokio::sync::mpsc::unbounded_channel;

    fn state() -> AppState {
        AppState::new(GenerationRequest::default(), Url::parse("http://127.0.0.1:8001/").unwrap())
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn typing_fills_prompt_and_submit_sends_form() {
        let (tx, mut rx) = unbounded_channel();
        let mut app = state();
        for c in "lofi".chars() {
            handle_key(&mut app, press(KeyCode::Char(c)), &tx);
        }
        assert_eq!(app.form.prompt, "lofi");

        handle_key(&mut app, ctrl('g'), &tx);
        let Ok(AppCommand::Submit(request)) = rx.try_recv() else { panic!("expected submit") };
        assert_eq!(request.prompt, "lofi");
    }

    #[test]
    fn submit_is_refused_while_busy() {
        let (tx, mut rx) = unbounded_channel();
        let mut app = state();
        app.handle_event(AppEvent::SubmissionStarted { generation: 1, caption: "x".into() });
        app.handle_event(AppEvent::JobQueued { generation: 1, handle: TaskHandle::new("t1") });

        handle_key(&mut app, ctrl('g'), &tx);
        assert!(rx.try_recv().is_err());

        handle_key(&mut app, press(KeyCode::Esc), &tx);
        assert!(matches!(rx.try_recv(), Ok(AppCommand::Cancel)));
    }

    #[test]
    fn library_rename_goes_through_input() {
        let (tx, mut rx) = unbounded_channel();
        let mut app = state();
        app.tab = Tab::Library;
        app.library.replace(vec![LibraryTrack {
            id: "a".into(),
            caption: Some("Old".into()),
            ..LibraryTrack::default()
        }]);

        handle_key(&mut app, press(KeyCode::Char('n')), &tx);
        assert_eq!(app.input.as_ref().map(|i| i.buffer.as_str()), Some("Old"));
        for _ in 0..3 {
            handle_key(&mut app, press(KeyCode::Backspace), &tx);
        }
        for c in "New".chars() {
            handle_key(&mut app, press(KeyCode::Char(c)), &tx);
        }
        handle_key(&mut app, press(KeyCode::Enter), &tx);

        assert!(app.input.is_none());
        let Ok(AppCommand::UpdateLibrary(update)) = rx.try_recv() else { panic!("expected update") };
        assert_eq!(update, LibraryUpdate::Rename { id: "a".into(), name: "New".into() });
    }

    #[test]
    fn arrow_keys_seek_by_ten_seconds() {
        let (tx, mut rx) = unbounded_channel();
        let mut app = state();
        app.tab = Tab::Library;
        handle_key(&mut app, press(KeyCode::Left), &tx);
        assert!(matches!(rx.try_recv(), Ok(AppCommand::SeekBy(-10))));

        app.tab = Tab::Generator;
        app.focus = FormField::Duration;
        handle_key(&mut app, KeyEvent::new(KeyCode::Right, KeyModifiers::CONTROL), &tx);
        assert!(matches!(rx.try_recv(), Ok(AppCommand::SeekBy(10))));
        assert_eq!(app.form.duration, GenerationRequest::default().duration);
    }

    #[test]
    fn search_filters_while_typing() {
        let (tx, _rx) = unbounded_channel();
        let mut app = state();
        app.tab = Tab::Library;
        app.library.replace(vec![
            LibraryTrack { id: "a".into(), caption: Some("Jazz".into()), ..LibraryTrack::default() },
            LibraryTrack { id: "b".into(), caption: Some("Drone".into()), ..LibraryTrack::default() },
        ]);

        handle_key(&mut app, press(KeyCode::Char('/')), &tx);
        handle_key(&mut app, press(KeyCode::Char('d')), &tx);
        assert_eq!(app.library.filtered().len(), 1);
        assert_eq!(
            handle_key(&mut app, press(KeyCode::Char('q')), &tx),
            KeyOutcome::Continue
        );
    }
}
