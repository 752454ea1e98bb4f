use crate::{
    error::WorkflowError,
    library::{parse_tags, LibraryUpdate, LibraryView},
    presenter::{PlaybackTrack, ResultSet},
    types::{
        FormattedInput, GeneratedTrack, GenerationRequest, LibraryTrack, LoraInfo, ModelCatalog,
        ModelInfo, RandomSample, TaskHandle, TaskType, MAX_BATCH_SIZE, MIN_BATCH_SIZE,
        RANDOM_SEED,
    },
};
use chrono::{DateTime, Local};
use reqwest::Url;
use std::time::Duration;

const MAX_STATUS_LINES: usize = 8;
const DURATION_STEP: f32 = 5.0;
const MAX_DURATION: f32 = 600.0;
const STEPS_STEP: u32 = 5;
const MAX_STEPS: u32 = 200;
const GUIDANCE_STEP: f32 = 0.5;
const MAX_GUIDANCE: f32 = 30.0;
const LORA_SCALE_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Generator,
    Library,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Prompt,
    Lyrics,
    Model,
    TaskType,
    Duration,
    BatchSize,
    Steps,
    Guidance,
    Seed,
    Lora,
    LoraScale,
}

impl FormField {
    pub const ORDER: [FormField; 11] = [
        Self::Prompt,
        Self::Lyrics,
        Self::Model,
        Self::TaskType,
        Self::Duration,
        Self::BatchSize,
        Self::Steps,
        Self::Guidance,
        Self::Seed,
        Self::Lora,
        Self::LoraScale,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Prompt => "Description",
            Self::Lyrics => "Lyrics",
            Self::Model => "Model",
            Self::TaskType => "Task",
            Self::Duration => "Duration (s)",
            Self::BatchSize => "Batch size",
            Self::Steps => "Steps",
            Self::Guidance => "Guidance scale",
            Self::Seed => "Seed",
            Self::Lora => "LoRA",
            Self::LoraScale => "LoRA scale",
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ORDER.iter().position(|field| *field == self).unwrap_or(0);
        Self::ORDER[(idx + 1) % Self::ORDER.len()]
    }

    pub fn previous(self) -> Self {
        let idx = Self::ORDER.iter().position(|field| *field == self).unwrap_or(0);
        Self::ORDER[if idx == 0 { Self::ORDER.len() - 1 } else { idx - 1 }]
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Prompt | Self::Lyrics)
    }
}

/// Where the current submission is in the submit → poll → present cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Submitting,
    Polling { handle: TaskHandle, since: DateTime<Local> },
    Completed,
    Failed(String),
}

impl Phase {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Submitting | Self::Polling { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputKind {
    Search,
    Rename { id: String },
    Tag { id: String },
    Move { id: String },
    CreateFolder,
}

impl InputKind {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Search => "Search",
            Self::Rename { .. } => "Rename",
            Self::Tag { .. } => "Tags (comma separated)",
            Self::Move { .. } => "Move to folder",
            Self::CreateFolder => "New folder",
        }
    }
}

/// One-line text entry opened from the library tab.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInput {
    pub kind: InputKind,
    pub buffer: String,
}

impl PendingInput {
    /// Turns the entry into a library update; `None` for search or blank input.
    pub fn into_update(self) -> Option<LibraryUpdate> {
        let value = self.buffer.trim().to_string();
        match self.kind {
            InputKind::Search => None,
            InputKind::Tag { id } => Some(LibraryUpdate::Tag { id, tags: parse_tags(&value) }),
            _ if value.is_empty() => None,
            InputKind::Rename { id } => Some(LibraryUpdate::Rename { id, name: value }),
            InputKind::Move { id } => Some(LibraryUpdate::Move { id, folder: value }),
            InputKind::CreateFolder => Some(LibraryUpdate::CreateFolder { name: value }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub now_playing: Option<String>,
    pub paused: bool,
    pub volume: f32,
}

/// Everything the UI renders, owned by the UI loop and mutated only through events.
#[derive(Debug)]
pub struct AppState {
    pub tab: Tab,
    pub form: GenerationRequest,
    pub focus: FormField,
    pub models: Vec<ModelInfo>,
    pub loras: Vec<LoraInfo>,
    pub lora_scale: f32,
    pub phase: Phase,
    pub results: ResultSet,
    pub library: LibraryView,
    pub input: Option<PendingInput>,
    pub playback: PlaybackState,
    pub status_lines: Vec<String>,
    base_url: Url,
    generation: u64,
}

impl AppState {
    pub fn new(form: GenerationRequest, base_url: Url) -> Self {
        Self {
            tab: Tab::Generator,
            form,
            focus: FormField::Prompt,
            models: Vec::new(),
            loras: Vec::new(),
            lora_scale: 1.0,
            phase: Phase::Idle,
            results: ResultSet::default(),
            library: LibraryView::default(),
            input: None,
            playback: PlaybackState { volume: 1.0, ..PlaybackState::default() },
            status_lines: Vec::new(),
            base_url,
            generation: 0,
        }
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Info(message) => self.push_status_line(message),
            AppEvent::Error(message) => self.push_status_line(format!("Error: {message}")),
            AppEvent::ModelsLoaded(catalog) => self.apply_models(catalog),
            AppEvent::LorasLoaded(loras) => {
                if let Some(selected) = self.form.lora.as_deref() {
                    if !loras.iter().any(|lora| lora.reference() == selected) {
                        self.form.lora = None;
                    }
                }
                self.loras = loras;
            }
            AppEvent::SubmissionStarted { generation, caption } => {
                self.generation = generation;
                self.phase = Phase::Submitting;
                self.results.begin(caption);
                self.push_status_line("Initializing...".to_string());
            }
            AppEvent::JobQueued { generation, handle } => {
                if generation != self.generation {
                    return;
                }
                self.push_status_line(format!("Task {handle} queued, generating..."));
                self.phase = Phase::Polling { handle, since: Local::now() };
            }
            AppEvent::TracksReady { generation, tracks } => {
                if generation != self.generation || !self.phase.is_busy() {
                    return;
                }
                let count = tracks.len();
                self.results.replace(tracks);
                self.phase = Phase::Completed;
                self.push_status_line(format!("Completed! {count} track(s) ready"));
            }
            AppEvent::GenerationFailed { generation, error } => {
                if generation != self.generation || !self.phase.is_busy() {
                    return;
                }
                let message = match error.detail() {
                    Some(detail) => format!("{error} ({detail})"),
                    None => error.to_string(),
                };
                self.push_status_line(format!("Error: {message}"));
                self.phase = Phase::Failed(error.to_string());
            }
            AppEvent::Cancelled { generation } => {
                if self.phase.is_busy() {
                    self.push_status_line("Generation cancelled".to_string());
                    self.phase = Phase::Idle;
                }
                self.generation = generation;
            }
            AppEvent::SampleLoaded(sample) => self.apply_sample(sample),
            AppEvent::InputFormatted(formatted) => self.apply_formatted(formatted),
            AppEvent::LibraryLoaded(tracks) => {
                let count = tracks.len();
                self.library.replace(tracks);
                self.push_status_line(format!("Library: {count} track(s)"));
            }
            AppEvent::LibraryUpdated(update) => {
                self.push_status_line(update.describe());
                if let LibraryUpdate::CreateFolder { name } = update {
                    self.push_status_line(format!("{name} stays empty until a track is moved in (m)"));
                    self.library.add_folder(name);
                }
            }
            AppEvent::LibraryTrackDeleted { id } => {
                if let Some(track) = self.library.remove(&id) {
                    self.push_status_line(format!("Deleted {}", track.display_name()));
                }
            }
            AppEvent::PlaybackStarted { caption } => {
                self.playback.paused = false;
                self.push_status_line(format!("Playing {caption}"));
                self.playback.now_playing = Some(caption);
            }
            AppEvent::PlaybackPaused(paused) => self.playback.paused = paused,
            AppEvent::PlaybackStopped => {
                self.playback.now_playing = None;
                self.playback.paused = false;
            }
            AppEvent::VolumeChanged(volume) => self.playback.volume = volume,
        }
    }

    pub fn push_status_line(&mut self, line: String) {
        let stamped = format!("{} {line}", Local::now().format("%H:%M:%S"));
        self.status_lines.push(stamped);
        if self.status_lines.len() > MAX_STATUS_LINES {
            let overflow = self.status_lines.len() - MAX_STATUS_LINES;
            self.status_lines.drain(0..overflow);
        }
    }

    /// Seconds since the current task was handed out, while polling.
    pub fn polling_elapsed(&self) -> Option<Duration> {
        match &self.phase {
            Phase::Polling { since, .. } => (Local::now() - *since).to_std().ok(),
            _ => None,
        }
    }

    pub fn selected_result_playback(&self) -> Option<PlaybackTrack> {
        self.results.selected_playback(&self.base_url)
    }

    pub fn selected_library_playback(&self) -> Option<PlaybackTrack> {
        self.library
            .selected_track()
            .map(|track| PlaybackTrack::from_library(track, &self.base_url))
    }

    pub fn type_char(&mut self, c: char) {
        match self.focus {
            FormField::Prompt => self.form.prompt.push(c),
            FormField::Lyrics => self.form.lyrics.push(c),
            FormField::Seed => {
                if let Some(digit) = c.to_digit(10) {
                    let base = if self.form.seed == RANDOM_SEED { 0 } else { self.form.seed };
                    self.form.seed = base.saturating_mul(10).saturating_add(i64::from(digit));
                } else if c == 'r' {
                    self.form.seed = RANDOM_SEED;
                }
            }
            _ => {}
        }
    }

    pub fn newline(&mut self) {
        if self.focus == FormField::Lyrics {
            self.form.lyrics.push('\n');
        }
    }

    pub fn backspace(&mut self) {
        match self.focus {
            FormField::Prompt => {
                self.form.prompt.pop();
            }
            FormField::Lyrics => {
                self.form.lyrics.pop();
            }
            FormField::Seed => {
                self.form.seed = if self.form.seed < 10 { RANDOM_SEED } else { self.form.seed / 10 };
            }
            _ => {}
        }
    }

    /// Steps the focused non-text field up (`delta > 0`) or down.
    pub fn adjust(&mut self, delta: i32) {
        let up = delta > 0;
        let form = &mut self.form;
        match self.focus {
            FormField::Prompt | FormField::Lyrics => {}
            FormField::Model => {
                if let Some(next) = cycle(&self.models, |m| m.name == form.model, up) {
                    form.model = next.name.clone();
                }
            }
            FormField::TaskType => {
                form.task_type = if up {
                    form.task_type.next()
                } else {
                    (0..TaskType::ALL.len() - 1).fold(form.task_type, |task, _| task.next())
                };
            }
            FormField::Duration => {
                let next = form.duration + if up { DURATION_STEP } else { -DURATION_STEP };
                form.duration = next.clamp(DURATION_STEP, MAX_DURATION);
            }
            FormField::BatchSize => {
                let next = if up { form.batch_size.saturating_add(1) } else { form.batch_size.saturating_sub(1) };
                form.batch_size = next.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
            }
            FormField::Steps => {
                let next = if up { form.inference_steps + STEPS_STEP } else { form.inference_steps.saturating_sub(STEPS_STEP) };
                form.inference_steps = next.clamp(1, MAX_STEPS);
            }
            FormField::Guidance => {
                let next = form.guidance_scale + if up { GUIDANCE_STEP } else { -GUIDANCE_STEP };
                form.guidance_scale = next.clamp(GUIDANCE_STEP, MAX_GUIDANCE);
            }
            FormField::Seed => {
                form.seed = if up { form.seed.saturating_add(1) } else { (form.seed - 1).max(RANDOM_SEED) };
            }
            FormField::Lora => {
                // "no adapter" sits at the front of the cycle.
                let options: Vec<Option<&str>> = std::iter::once(None)
                    .chain(self.loras.iter().map(|lora| Some(lora.reference())))
                    .collect();
                let next = cycle(&options, |option| *option == form.lora.as_deref(), up);
                form.lora = next.copied().flatten().map(str::to_string);
            }
            FormField::LoraScale => {
                let next = self.lora_scale + if up { LORA_SCALE_STEP } else { -LORA_SCALE_STEP };
                self.lora_scale = (next.clamp(0.0, 2.0) * 10.0).round() / 10.0;
            }
        }
    }

    fn apply_models(&mut self, catalog: ModelCatalog) {
        let known = self.models_contain(&catalog.models, &self.form.model);
        if self.form.model.is_empty() || !known {
            if let Some(default) = catalog.default_model.clone().or_else(|| {
                catalog.models.first().map(|model| model.name.clone())
            }) {
                self.form.model = default;
            }
        }
        self.models = catalog.models;
    }

    fn models_contain(&self, models: &[ModelInfo], name: &str) -> bool {
        models.iter().any(|model| model.name == name)
    }

    fn apply_sample(&mut self, sample: RandomSample) {
        self.form.prompt = sample.text().to_string();
        self.form.lyrics = sample.lyrics.clone().unwrap_or_default();
        if let Some(duration) = sample.duration.filter(|d| *d > 0.0) {
            self.form.duration = duration as f32;
        }
        self.form.task_type = TaskType::TextToMusic;
        self.push_status_line("Loaded a random sample".to_string());
    }

    fn apply_formatted(&mut self, formatted: FormattedInput) {
        if let Some(prompt) = formatted.prompt.filter(|p| !p.trim().is_empty()) {
            self.form.prompt = prompt;
        }
        if let Some(lyrics) = formatted.lyrics.filter(|l| !l.trim().is_empty()) {
            self.form.lyrics = lyrics;
        }
        self.push_status_line("Prompt enhanced".to_string());
    }
}

/// Moves one step through `items` from the entry matching `is_current`, wrapping.
fn cycle<T>(items: &[T], is_current: impl Fn(&T) -> bool, forward: bool) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let len = items.len();
    let next = match items.iter().position(is_current) {
        Some(idx) if forward => (idx + 1) % len,
        Some(idx) => if idx == 0 { len - 1 } else { idx - 1 },
        None => 0,
    };
    items.get(next)
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Info(String),
    Error(String),
    ModelsLoaded(ModelCatalog),
    LorasLoaded(Vec<LoraInfo>),
    SubmissionStarted { generation: u64, caption: String },
    JobQueued { generation: u64, handle: TaskHandle },
    TracksReady { generation: u64, tracks: Vec<GeneratedTrack> },
    GenerationFailed { generation: u64, error: WorkflowError },
    Cancelled { generation: u64 },
    SampleLoaded(RandomSample),
    InputFormatted(FormattedInput),
    LibraryLoaded(Vec<LibraryTrack>),
    LibraryUpdated(LibraryUpdate),
    LibraryTrackDeleted { id: String },
    PlaybackStarted { caption: String },
    PlaybackPaused(bool),
    PlaybackStopped,
    VolumeChanged(f32),
}

#[derive(Debug, Clone)]
pub enum AppCommand {
    Submit(GenerationRequest),
    Cancel,
    Surprise,
    FormatInput { prompt: String, lyrics: String },
    RefreshModels,
    RefreshLibrary,
    DeleteTrack { id: String },
    UpdateLibrary(LibraryUpdate),
    LoadLora { reference: String, scale: f32 },
    UnloadLora,
    Play(Option<PlaybackTrack>),
    TogglePause,
    Restart,
    SeekBy(i64),
    StopPlayback,
    SetVolume(f32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LibraryTrack, TrackMeta};

    fn state() -> AppState {
        AppState::new(GenerationRequest::default(), Url::parse("http://127.0.0.1:8001/").unwrap())
    }

    fn tracks(urls: &[&str]) -> Vec<GeneratedTrack> {
        urls.iter()
            .map(|url| GeneratedTrack { url: Some(url.to_string()), ..GeneratedTrack::default() })
            .collect()
    }

    #[test]
    fn new_submission_clears_previous_results() {
        let mut app = state();
        app.handle_event(AppEvent::SubmissionStarted { generation: 1, caption: "first".into() });
        app.handle_event(AppEvent::TracksReady { generation: 1, tracks: tracks(&["/files/a.wav"]) });
        assert_eq!(app.results.len(), 1);
        assert_eq!(app.phase, Phase::Completed);

        app.handle_event(AppEvent::SubmissionStarted { generation: 2, caption: "second".into() });
        assert!(app.results.is_empty());
        assert_eq!(app.results.caption(), "second");
        assert_eq!(app.phase, Phase::Submitting);
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let mut app = state();
        app.handle_event(AppEvent::SubmissionStarted { generation: 1, caption: "old".into() });
        app.handle_event(AppEvent::SubmissionStarted { generation: 2, caption: "new".into() });
        app.handle_event(AppEvent::JobQueued { generation: 2, handle: TaskHandle::new("t2") });

        app.handle_event(AppEvent::TracksReady { generation: 1, tracks: tracks(&["/files/old.wav"]) });
        app.handle_event(AppEvent::GenerationFailed {
            generation: 1,
            error: WorkflowError::TaskFailed(String::new()),
        });

        assert!(app.results.is_empty());
        assert!(matches!(app.phase, Phase::Polling { .. }));
    }

    #[test]
    fn terminal_event_after_cancel_has_no_effect() {
        let mut app = state();
        app.handle_event(AppEvent::SubmissionStarted { generation: 1, caption: "pad".into() });
        app.handle_event(AppEvent::JobQueued { generation: 1, handle: TaskHandle::new("t1") });
        app.handle_event(AppEvent::Cancelled { generation: 2 });
        assert_eq!(app.phase, Phase::Idle);

        app.handle_event(AppEvent::TracksReady { generation: 1, tracks: tracks(&["/files/a.wav"]) });
        assert!(app.results.is_empty());
        assert_eq!(app.phase, Phase::Idle);
    }

    #[test]
    fn only_first_terminal_event_applies() {
        let mut app = state();
        app.handle_event(AppEvent::SubmissionStarted { generation: 3, caption: "pad".into() });
        app.handle_event(AppEvent::TracksReady { generation: 3, tracks: tracks(&["/files/a.wav"]) });
        app.handle_event(AppEvent::GenerationFailed {
            generation: 3,
            error: WorkflowError::TaskFailed(String::new()),
        });
        app.handle_event(AppEvent::TracksReady { generation: 3, tracks: Vec::new() });

        assert_eq!(app.phase, Phase::Completed);
        assert_eq!(app.results.len(), 1);
    }

    #[test]
    fn failure_is_surfaced() {
        let mut app = state();
        app.handle_event(AppEvent::SubmissionStarted { generation: 1, caption: "pad".into() });
        app.handle_event(AppEvent::GenerationFailed {
            generation: 1,
            error: WorkflowError::ResultParse("expected value".into()),
        });
        let Phase::Failed(message) = &app.phase else { panic!("expected failure") };
        assert!(message.contains("could not read generation result"));
        assert!(app.status_lines.last().unwrap().contains("Error:"));
        assert!(app.results.is_empty());
    }

    #[test]
    fn models_fill_in_default() {
        let mut app = state();
        app.handle_event(AppEvent::ModelsLoaded(ModelCatalog {
            models: vec![
                ModelInfo { name: "turbo".into(), description: None },
                ModelInfo { name: "base".into(), description: None },
            ],
            default_model: Some("base".into()),
        }));
        assert_eq!(app.form.model, "base");

        app.focus = FormField::Model;
        app.adjust(1);
        assert_eq!(app.form.model, "turbo");
    }

    #[test]
    fn sample_replaces_prompt_and_lyrics() {
        let mut app = state();
        app.form.task_type = TaskType::Cover;
        app.handle_event(AppEvent::SampleLoaded(RandomSample {
            description: Some("bossa nova".into()),
            prompt: None,
            lyrics: Some("[Verse]".into()),
            duration: None,
        }));
        assert_eq!(app.form.prompt, "bossa nova");
        assert_eq!(app.form.lyrics, "[Verse]");
        assert_eq!(app.form.duration, 10.0);
        assert_eq!(app.form.task_type, TaskType::TextToMusic);
    }

    #[test]
    fn numeric_fields_stay_in_bounds() {
        let mut app = state();
        app.focus = FormField::BatchSize;
        for _ in 0..10 {
            app.adjust(1);
        }
        assert_eq!(app.form.batch_size, MAX_BATCH_SIZE);
        for _ in 0..10 {
            app.adjust(-1);
        }
        assert_eq!(app.form.batch_size, MIN_BATCH_SIZE);

        app.focus = FormField::Seed;
        app.adjust(-1);
        assert_eq!(app.form.seed, RANDOM_SEED);
        app.type_char('4');
        app.type_char('2');
        assert_eq!(app.form.seed, 42);
        app.backspace();
        app.backspace();
        assert_eq!(app.form.seed, RANDOM_SEED);
        assert!(app.form.validate().is_ok());
    }

    #[test]
    fn lora_selection_cycles_through_none() {
        let mut app = state();
        app.handle_event(AppEvent::LorasLoaded(vec![
            LoraInfo { name: "lofi".into(), path: None },
            LoraInfo { name: "choir".into(), path: Some("/loras/choir".into()) },
        ]));
        app.focus = FormField::Lora;
        app.adjust(1);
        assert_eq!(app.form.lora.as_deref(), Some("lofi"));
        app.adjust(1);
        assert_eq!(app.form.lora.as_deref(), Some("/loras/choir"));
        app.adjust(1);
        assert_eq!(app.form.lora, None);
        app.adjust(-1);
        assert_eq!(app.form.lora.as_deref(), Some("/loras/choir"));
    }

    #[test]
    fn pending_input_builds_library_updates() {
        let rename = PendingInput { kind: InputKind::Rename { id: "a".into() }, buffer: " Night ".into() };
        assert_eq!(
            rename.into_update(),
            Some(LibraryUpdate::Rename { id: "a".into(), name: "Night".into() })
        );
        let blank = PendingInput { kind: InputKind::Move { id: "a".into() }, buffer: "  ".into() };
        assert_eq!(blank.into_update(), None);
        let clear_tags = PendingInput { kind: InputKind::Tag { id: "a".into() }, buffer: String::new() };
        assert_eq!(clear_tags.into_update(), Some(LibraryUpdate::Tag { id: "a".into(), tags: vec![] }));
        let search = PendingInput { kind: InputKind::Search, buffer: "jazz".into() };
        assert_eq!(search.into_update(), None);
    }

    #[test]
    fn library_delete_event_removes_track() {
        let mut app = state();
        app.handle_event(AppEvent::LibraryLoaded(vec![LibraryTrack {
            id: "a".into(),
            caption: Some("Night".into()),
            meta: TrackMeta::default(),
            ..LibraryTrack::default()
        }]));
        assert_eq!(app.library.len(), 1);
        app.handle_event(AppEvent::LibraryTrackDeleted { id: "a".into() });
        assert_eq!(app.library.len(), 0);
    }

    #[test]
    fn created_folder_shows_before_it_has_tracks() {
        let mut app = state();
        app.handle_event(AppEvent::LibraryLoaded(Vec::new()));
        app.handle_event(AppEvent::LibraryUpdated(LibraryUpdate::CreateFolder {
            name: "drafts".into(),
        }));
        app.handle_event(AppEvent::LibraryLoaded(Vec::new()));

        let names: Vec<_> = app.library.folders().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["drafts".to_string()]);
        assert!(app.status_lines.iter().any(|line| line.contains("Created folder drafts")));
    }
}
