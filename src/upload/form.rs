use std::{collections::BTreeMap, fmt};

use constants::limits::{DESCRIPTION_MAX_CHARS, TITLE_MAX_CHARS};

use crate::{
    upload::{FilePicker, PickedFile, ProgressData},
    video::{NewVideo, Visibility},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormField {
    Title,
    Description,
    VideoFile,
}
impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormField::Title => write!(f, "title"),
            FormField::Description => write!(f, "description"),
            FormField::VideoFile => write!(f, "video file"),
        }
    }
}

/// Field-level validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<FormField, String>);
impl FieldErrors {
    pub fn get(&self, field: FormField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormField, &str)> {
        self.0.iter().map(|(field, message)| (*field, message.as_str()))
    }

    fn insert(&mut self, field: FormField, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }
}
impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>();
        write!(f, "{}", messages.join("; "))
    }
}
impl std::error::Error for FieldErrors {}

/// Input that passed validation, ready to send onward.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub video: NewVideo,
    pub file: PickedFile,
}

/// Splits comma-separated tags, trimming and dropping empty entries.
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether the picked file is a video: MIME prefix `video/`, or the extension
/// allow-list when the platform did not report a MIME type.
pub fn is_video_file(file: &PickedFile) -> bool {
    match file.mime_type.as_deref().map(str::trim) {
        Some(mime) if !mime.is_empty() => mime.to_ascii_lowercase().starts_with("video/"),
        _ => file
            .extension()
            .is_some_and(|ext| constants::VIDEO_EXTENSIONS.contains(&ext.as_str())),
    }
}

/// State of the upload form: field values, the selected file, validation and
/// banner messages, progress, and the single-submission lock.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub title: String,
    pub description: String,
    pub tags: String,
    pub visibility: Visibility,
    video_file: Option<PickedFile>,

    field_errors: FieldErrors,
    error_banner: Option<String>,
    progress: Option<ProgressData>,
    submitting: bool,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video_file(&self) -> Option<&PickedFile> {
        self.video_file.as_ref()
    }

    /// Sets the selected file. A cancelled pick (`None`) leaves the current selection alone.
    pub fn select_file(&mut self, file: Option<PickedFile>) {
        if let Some(file) = file {
            tracing::debug!("Selected {} ({:?} bytes)", file.name, file.size);
            self.video_file = Some(file);
        }
    }

    /// Runs the picker; returns whether a file was selected.
    pub async fn pick_file(&mut self, picker: &dyn FilePicker) -> bool {
        let picked = picker.pick().await;
        let selected = picked.is_some();
        self.select_file(picked);
        selected
    }

    pub fn validate(&self) -> Result<ValidatedUpload, FieldErrors> {
        let mut errors = FieldErrors::default();

        let title = self.title.trim();
        if title.is_empty() {
            errors.insert(FormField::Title, "Title is required");
        } else if title.chars().count() > TITLE_MAX_CHARS {
            errors.insert(
                FormField::Title,
                format!("Title must be at most {TITLE_MAX_CHARS} characters"),
            );
        }

        let description = self.description.trim();
        if description.chars().count() > DESCRIPTION_MAX_CHARS {
            errors.insert(
                FormField::Description,
                format!("Description must be at most {DESCRIPTION_MAX_CHARS} characters"),
            );
        }

        match &self.video_file {
            None => errors.insert(FormField::VideoFile, "Please select a video file"),
            Some(file) if !is_video_file(file) => errors.insert(
                FormField::VideoFile,
                format!(
                    "Please select a video file ({})",
                    constants::VIDEO_EXTENSIONS.join(", ")
                ),
            ),
            Some(_) => {}
        }

        let Some(file) = self.video_file.clone().filter(|_| errors.is_empty()) else {
            return Err(errors);
        };

        Ok(ValidatedUpload {
            video: NewVideo {
                title: title.to_string(),
                description: (!description.is_empty()).then(|| description.to_string()),
                tags: parse_tags(&self.tags),
                visibility: self.visibility,
            },
            file,
        })
    }

    pub fn field_errors(&self) -> &FieldErrors {
        &self.field_errors
    }

    pub fn set_field_errors(&mut self, errors: FieldErrors) {
        self.field_errors = errors;
    }

    pub fn error_banner(&self) -> Option<&str> {
        self.error_banner.as_deref()
    }

    pub fn progress(&self) -> Option<&ProgressData> {
        self.progress.as_ref()
    }

    pub fn set_progress(&mut self, progress: Option<ProgressData>) {
        self.progress = progress;
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Whether the submit control is enabled.
    pub fn can_submit(&self) -> bool {
        !self.submitting
    }

    /// Takes the submission lock. Returns `false` if a submission is already in flight.
    pub fn begin_submission(&mut self) -> bool {
        if self.submitting {
            return false;
        }
        self.submitting = true;
        self.error_banner = None;
        self.field_errors = FieldErrors::default();
        true
    }

    pub fn end_submission(&mut self) {
        self.submitting = false;
    }

    /// Terminal failure: show the message, clear progress, re-enable submit.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_banner = Some(message.into());
        self.progress = None;
        self.end_submission();
    }

    /// Back to empty defaults, including the selected file.
    pub fn reset(&mut self) {
        self.title.clear();
        self.description.clear();
        self.tags.clear();
        self.visibility = Visibility::default();
        self.video_file = None;
        self.field_errors = FieldErrors::default();
        self.error_banner = None;
        self.progress = None;
    }
}
