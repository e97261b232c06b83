use serde::Serialize;
use std::collections::HashMap;

/// One playable rendition of a media item, already resolved to a direct URL.
#[derive(Debug, Clone, Serialize)]
pub struct FormatDescriptor {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
}

impl FormatDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), note: None, extension: None, bitrate: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtitleTrack {
    pub ext: String,
    pub url: String,
}

/// Language code -> alternative subtitle tracks for that language.
pub type SubtitleMap = HashMap<String, Vec<SubtitleTrack>>;

#[derive(Debug, Clone, Serialize)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<SubtitleMap>,
    /// Player embed a streaming client must present when the CDN checks
    /// the referring SWF (live RTMP streams).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_url: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}

impl MediaItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            duration_seconds: None,
            thumbnail_url: None,
            subtitles: None,
            player_url: None,
            formats: Vec::new(),
        }
    }
}

/// A single input URL that yields several independently playable items
/// (segmented or multi-part content).
#[derive(Debug, Clone, Serialize)]
pub struct MediaCollection {
    pub id: String,
    pub title: String,
    pub entries: Vec<MediaItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedMedia {
    Single(MediaItem),
    Collection(MediaCollection),
}

impl ResolvedMedia {
    pub fn id(&self) -> &str {
        match self {
            ResolvedMedia::Single(item) => &item.id,
            ResolvedMedia::Collection(col) => &col.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ResolvedMedia::Single(item) => &item.title,
            ResolvedMedia::Collection(col) => &col.title,
        }
    }
}
