use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, Borders, List, ListItem, ListState},
    Frame,
};

use crate::app::AppState;
use crate::types::LibraryTrack;

pub fn render(frame: &mut Frame, area: Rect, app: &AppState) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(area);

    let folders: Vec<ListItem> = app
        .library
        .folders()
        .into_iter()
        .map(|group| {
            let slash = if group.root { "" } else { "/" };
            ListItem::new(format!("{}{slash} ({})", group.name, group.ids.len()))
        })
        .collect();
    frame.render_widget(
        List::new(folders).block(Block::default().title("Folders").borders(Borders::ALL)),
        columns[0],
    );

    let tracks = app.library.filtered();
    let title = match (app.library.is_loaded(), app.library.query()) {
        (false, _) => "Library (loading)".to_string(),
        (true, "") => format!("Library: {} track(s)", tracks.len()),
        (true, query) => {
            format!("Library: {} of {} match \"{query}\"", tracks.len(), app.library.len())
        }
    };
    let items: Vec<ListItem> = tracks.iter().map(|track| ListItem::new(track_line(track))).collect();

    let mut state = ListState::default();
    if !tracks.is_empty() {
        state.select(Some(app.library.selected()));
    }
    let list = List::new(items)
        .block(Block::default().title(title).borders(Borders::ALL))
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, columns[1], &mut state);
}

fn track_line(track: &LibraryTrack) -> String {
    let mut line = track.display_name().to_string();
    if let Some(date) = track.display_date() {
        line.push_str(&format!("  {date}"));
    }
    if let Some(duration) = track.duration {
        line.push_str(&format!("  {duration:.0}s"));
    }
    if !track.meta.tags.is_empty() {
        line.push_str(&format!("  [{}]", track.meta.tags.join(", ")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackMeta;

    #[test]
    fn track_line_shows_date_duration_and_tags() {
        let track = LibraryTrack {
            id: "outputs/a.wav".into(),
            caption: Some("Night drive".into()),
            date: Some("2024-05-01 10:22:03".into()),
            duration: Some(29.6),
            meta: TrackMeta { tags: vec!["synth".into(), "retro".into()] },
            ..LibraryTrack::default()
        };
        assert_eq!(track_line(&track), "Night drive  2024-05-01  30s  [synth, retro]");

        let bare = LibraryTrack { id: "x.wav".into(), ..LibraryTrack::default() };
        assert_eq!(track_line(&bare), "x.wav");
    }
}
