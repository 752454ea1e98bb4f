use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::{AppState, FormField, Phase};

pub fn render(frame: &mut Frame, area: Rect, app: &AppState) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let form = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(4), Constraint::Length(11)])
        .split(columns[0]);

    render_text(frame, form[0], app, FormField::Prompt, &app.form.prompt);
    render_text(frame, form[1], app, FormField::Lyrics, &app.form.lyrics);
    render_parameters(frame, form[2], app);
    render_results(frame, columns[1], app);
}

fn field_block(app: &AppState, field: FormField) -> Block<'static> {
    let block = Block::default().title(field.label()).borders(Borders::ALL);
    if app.focus == field {
        block.border_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    } else {
        block
    }
}

fn render_text(frame: &mut Frame, area: Rect, app: &AppState, field: FormField, value: &str) {
    let mut text = value.to_string();
    if app.focus == field {
        text.push('▏');
    }
    let paragraph = Paragraph::new(text)
        .block(field_block(app, field))
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_parameters(frame: &mut Frame, area: Rect, app: &AppState) {
    let form = &app.form;
    let lines: Vec<Line> = FormField::ORDER
        .iter()
        .filter(|field| !field.is_text())
        .map(|field| {
            let value = match field {
                FormField::Model if form.model.is_empty() => "(loading)".to_string(),
                FormField::Model => form.model.clone(),
                FormField::TaskType => form.task_type.label().to_string(),
                FormField::Duration => format!("{:.0}", form.duration),
                FormField::BatchSize => form.batch_size.to_string(),
                FormField::Steps => form.inference_steps.to_string(),
                FormField::Guidance => format!("{:.1}", form.guidance_scale),
                FormField::Seed if form.use_random_seed() => "random".to_string(),
                FormField::Seed => form.seed.to_string(),
                FormField::Lora => form.lora.clone().unwrap_or_else(|| "none".to_string()),
                FormField::LoraScale => format!("{:.1}", app.lora_scale),
                FormField::Prompt | FormField::Lyrics => String::new(),
            };
            let style = if app.focus == *field {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{:<16}", field.label()), style),
                Span::styled(value, style),
            ])
        })
        .collect();

    let paragraph = Paragraph::new(lines)
        .block(Block::default().title("Parameters").borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn render_results(frame: &mut Frame, area: Rect, app: &AppState) {
    let header = match &app.phase {
        Phase::Idle if app.results.is_empty() => "No tracks yet".to_string(),
        Phase::Idle | Phase::Completed => format!("{} track(s)", app.results.len()),
        Phase::Submitting => "Submitting".to_string(),
        Phase::Polling { handle, .. } => {
            let elapsed = app.polling_elapsed().map(|d| d.as_secs()).unwrap_or(0);
            format!("Generating {handle} ({elapsed}s)")
        }
        Phase::Failed(message) => message.clone(),
    };

    let title = if app.results.caption().is_empty() {
        "Results".to_string()
    } else {
        format!("Results: {}", app.results.caption())
    };

    let items: Vec<ListItem> = app
        .results
        .tracks()
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let name = track
                .filename
                .as_deref()
                .or(track.location())
                .unwrap_or("(no audio)");
            ListItem::new(format!("Track {}  {name}", index + 1))
        })
        .collect();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(Block::default().borders(Borders::ALL).inner(area));

    frame.render_widget(Block::default().title(title).borders(Borders::ALL), area);
    let header_style = match app.phase {
        Phase::Failed(_) => Style::default().fg(Color::Red),
        _ => Style::default().fg(Color::Yellow),
    };
    frame.render_widget(Paragraph::new(Line::from(Span::styled(header, header_style))), chunks[0]);

    let mut state = ListState::default();
    if !app.results.is_empty() {
        state.select(Some(app.results.selected()));
    }
    let list = List::new(items)
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, chunks[1], &mut state);
}
