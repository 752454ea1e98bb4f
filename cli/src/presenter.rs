use reqwest::Url;
use tracing::warn;

use crate::types::{GeneratedTrack, LibraryTrack};

/// What the playback worker needs to start a track.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackTrack {
    pub caption: String,
    pub filename: Option<String>,
    /// `None` when the track carried no usable location.
    pub audio_url: Option<Url>,
}

impl PlaybackTrack {
    pub fn from_generated(track: &GeneratedTrack, caption: &str, base: &Url) -> Self {
        Self {
            caption: caption.to_string(),
            filename: track.filename.clone(),
            audio_url: track.location().and_then(|location| canonical_url(base, location)),
        }
    }

    pub fn from_library(track: &LibraryTrack, base: &Url) -> Self {
        Self {
            caption: track.display_name().to_string(),
            filename: track.filename.clone(),
            audio_url: track.location().and_then(|location| canonical_url(base, location)),
        }
    }
}

fn canonical_url(base: &Url, location: &str) -> Option<Url> {
    match base.join(location) {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(%location, "unusable track location: {err}");
            None
        }
    }
}

/// Tracks produced by the most recent submission, with the prompt that made them.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    caption: String,
    tracks: Vec<GeneratedTrack>,
    selected: usize,
}

impl ResultSet {
    /// Drops the previous results ahead of a new submission.
    pub fn begin(&mut self, caption: impl Into<String>) {
        self.caption = caption.into();
        self.tracks.clear();
        self.selected = 0;
    }

    pub fn replace(&mut self, tracks: Vec<GeneratedTrack>) {
        self.tracks = tracks;
        self.selected = 0;
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn tracks(&self) -> &[GeneratedTrack] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn select_next(&mut self) {
        if !self.tracks.is_empty() {
            self.selected = (self.selected + 1) % self.tracks.len();
        }
    }

    pub fn select_previous(&mut self) {
        if !self.tracks.is_empty() {
            let len = self.tracks.len();
            self.selected = if self.selected == 0 { len - 1 } else { self.selected - 1 };
        }
    }

    /// Playback request for the track at `index`, tagged with the originating caption.
    pub fn playback(&self, index: usize, base: &Url) -> Option<PlaybackTrack> {
        self.tracks.get(index).map(|track| PlaybackTrack::from_generated(track, &self.caption, base))
    }

    pub fn selected_playback(&self, base: &Url) -> Option<PlaybackTrack> {
        self.playback(self.selected, base)
    }
}
