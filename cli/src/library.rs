use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::types::LibraryTrack;

pub const ROOT_FOLDER: &str = "Unsorted";

/// Body of `/v1/library/update`, discriminated by `action`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LibraryUpdate {
    Rename { id: String, name: String },
    Tag { id: String, tags: Vec<String> },
    Move { id: String, folder: String },
    CreateFolder { name: String },
}

impl LibraryUpdate {
    pub fn describe(&self) -> String {
        match self {
            Self::Rename { name, .. } => format!("Renamed to {name}"),
            Self::Tag { tags, .. } if tags.is_empty() => "Cleared tags".to_string(),
            Self::Tag { tags, .. } => format!("Tagged {}", tags.join(", ")),
            Self::Move { folder, .. } => format!("Moved to {folder}"),
            Self::CreateFolder { name } => format!("Created folder {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderGroup {
    pub name: String,
    /// Tracks the service reported without a folder.
    pub root: bool,
    pub ids: Vec<String>,
}

/// Client-side view of the history library.
#[derive(Debug, Clone, Default)]
pub struct LibraryView {
    tracks: IndexMap<String, LibraryTrack>,
    /// Folders created from this client; history only reveals folders that hold tracks.
    created_folders: IndexSet<String>,
    query: String,
    selected: usize,
    loaded: bool,
}

impl LibraryView {
    pub fn replace(&mut self, tracks: Vec<LibraryTrack>) {
        self.tracks = tracks.into_iter().map(|track| (track.id.clone(), track)).collect();
        self.loaded = true;
        self.clamp_selection();
    }

    pub fn remove(&mut self, id: &str) -> Option<LibraryTrack> {
        let removed = self.tracks.shift_remove(id);
        self.clamp_selection();
        removed
    }

    pub fn add_folder(&mut self, name: impl Into<String>) {
        self.created_folders.insert(name.into());
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn get(&self, id: &str) -> Option<&LibraryTrack> {
        self.tracks.get(id)
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
        self.clamp_selection();
    }

    /// Tracks whose caption or filename contains the query, ignoring case.
    pub fn filtered(&self) -> Vec<&LibraryTrack> {
        let needle = self.query.trim().to_lowercase();
        self.tracks
            .values()
            .filter(|track| {
                needle.is_empty()
                    || contains_folded(track.caption.as_deref(), &needle)
                    || contains_folded(track.filename.as_deref(), &needle)
            })
            .collect()
    }

    /// Groups tracks by the folder the library service reports, in first-seen order.
    ///
    /// Tracks without a folder form the root group, which comes first when non-empty.
    /// Folders created here but still empty follow the reported ones.
    pub fn folders(&self) -> Vec<FolderGroup> {
        let mut groups: IndexMap<Option<&str>, Vec<String>> = IndexMap::new();
        groups.insert(None, Vec::new());
        for track in self.tracks.values() {
            let folder = track.folder.as_deref().filter(|f| !f.trim().is_empty());
            groups.entry(folder).or_default().push(track.id.clone());
        }
        for name in &self.created_folders {
            groups.entry(Some(name.as_str())).or_default();
        }
        groups
            .into_iter()
            .filter(|(folder, ids)| folder.is_some() || !ids.is_empty())
            .map(|(folder, ids)| FolderGroup {
                name: folder.unwrap_or(ROOT_FOLDER).to_string(),
                root: folder.is_none(),
                ids,
            })
            .collect()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_track(&self) -> Option<&LibraryTrack> {
        self.filtered().get(self.selected).copied()
    }

    pub fn select_next(&mut self) {
        let len = self.filtered().len();
        if len > 0 {
            self.selected = (self.selected + 1) % len;
        }
    }

    pub fn select_previous(&mut self) {
        let len = self.filtered().len();
        if len > 0 {
            self.selected = if self.selected == 0 { len - 1 } else { self.selected - 1 };
        }
    }

    fn clamp_selection(&mut self) {
        let len = self.filtered().len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }
}

fn contains_folded(field: Option<&str>, needle: &str) -> bool {
    field.map(|value| value.to_lowercase().contains(needle)).unwrap_or(false)
}

/// Splits a comma separated tag list, dropping blanks and duplicates.
pub fn parse_tags(input: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in input.split(',').map(str::trim).filter(|tag| !tag.is_empty()) {
        if !tags.iter().any(|existing| existing == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}
