//! Data models for the notice board
//!
//! Defines notices and their attachments. Forms and responses live in
//! [`crate::forms`]. Field names serialize in camelCase so the local store
//! and the remote document share one JSON shape.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// Order positions reserved for pinned notices
pub const RESERVED_POSITIONS: std::ops::RangeInclusive<u32> = 1..=3;

/// First order value handed out automatically
pub const FIRST_FLOATING_POSITION: u32 = 4;

/// Notice priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
}

/// Notice category
///
/// Values written by other clients that we don't know about are kept as
/// written and sent back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Category {
    #[default]
    General,
    Academic,
    Examination,
    Event,
    Placement,
    Sports,
    Holiday,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::General => "general",
            Category::Academic => "academic",
            Category::Examination => "examination",
            Category::Event => "event",
            Category::Placement => "placement",
            Category::Sports => "sports",
            Category::Holiday => "holiday",
            Category::Other(raw) => raw,
        }
    }

    fn known(s: &str) -> Option<Self> {
        Some(match s {
            "general" => Category::General,
            "academic" => Category::Academic,
            "examination" => Category::Examination,
            "event" => Category::Event,
            "placement" => Category::Placement,
            "sports" => Category::Sports,
            "holiday" => Category::Holiday,
            _ => return None,
        })
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Category::known(&raw).unwrap_or(Category::Other(raw)))
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower == "exam" {
            return Ok(Category::Examination);
        }
        Category::known(&lower).ok_or_else(|| format!("unknown category '{}'", s))
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
        };
        f.write_str(label)
    }
}

/// Speed of the scrolling data list attached to a notice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollingSpeed {
    Slow,
    #[default]
    Normal,
    Fast,
}

/// A notice on the board
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    /// Unique identifier, never changes after creation
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    /// Serialized rich-text HTML, opaque to the sync core
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    pub date: NaiveDate,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub scrolling_enabled: bool,
    #[serde(default)]
    pub scrolling_label: String,
    #[serde(default)]
    pub scrolling_speed: ScrollingSpeed,
    #[serde(default)]
    pub popup_enabled: bool,
    #[serde(default)]
    pub form_capture_enabled: bool,
    #[serde(default)]
    pub form_id: Option<String>,
    /// 1..=3 are pinned positions, everything else floats from 4 upward
    #[serde(default)]
    pub order: u32,
    pub timestamp: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Notice {
    /// Create a new notice with the given title, dated today
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: String::new(),
            category: Category::default(),
            priority: Priority::default(),
            date: now.date_naive(),
            deadline: None,
            author: None,
            tags: Vec::new(),
            attachments: Vec::new(),
            scrolling_enabled: false,
            scrolling_label: String::new(),
            scrolling_speed: ScrollingSpeed::default(),
            popup_enabled: false,
            form_capture_enabled: false,
            form_id: None,
            order: 0,
            timestamp: now,
            last_modified: now,
        }
    }

    /// Mark the notice as modified now
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.touch();
    }

    /// Add a tag, ignoring duplicates
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
            self.touch();
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(pos);
            self.touch();
        }
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
        self.touch();
    }

    /// Find an attachment by file name
    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.name() == name)
    }

    /// Link a capture form to this notice
    pub fn attach_form(&mut self, form_id: impl Into<String>) {
        self.form_id = Some(form_id.into());
        self.form_capture_enabled = true;
        self.touch();
    }

    pub fn is_pinned(&self) -> bool {
        RESERVED_POSITIONS.contains(&self.order)
    }
}

/// A file attached to a notice
///
/// Remote payloads are size-limited, so the same logical file can be carried
/// inline, as a link to an external host, or as a metadata-only stand-in.
///
/// Written with a `kind` tag. Entries without one, as older clients write
/// them, are recognised by their fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Attachment {
    Inline(InlineAttachment),
    Hosted(HostedAttachment),
    Placeholder(PlaceholderAttachment),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineAttachment {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    /// Base64 payload, optionally in `data:<mime>;base64,` form
    pub data: String,
    /// Set when the data was re-encoded to fit the remote payload
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostedAttachment {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub url: String,
    pub service: String,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderAttachment {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub original_size: u64,
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_data: Option<String>,
}

impl<'de> Deserialize<'de> for Attachment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let kind = match value.get("kind").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => infer_attachment_kind(&value)
                .ok_or_else(|| D::Error::custom("attachment has no kind, url, note or data"))?
                .to_string(),
        };

        let decoded = match kind.as_str() {
            "inline" => serde_json::from_value(value).map(Attachment::Inline),
            "hosted" => serde_json::from_value(value).map(Attachment::Hosted),
            "placeholder" => serde_json::from_value(value).map(Attachment::Placeholder),
            other => {
                return Err(D::Error::unknown_variant(
                    other,
                    &["inline", "hosted", "placeholder"],
                ))
            }
        };
        decoded.map_err(D::Error::custom)
    }
}

/// Variant of an untagged attachment. A compressed inline file carries
/// `originalSize` too, so `data` is checked before it.
fn infer_attachment_kind(value: &Value) -> Option<&'static str> {
    let has = |field: &str| value.get(field).map_or(false, |v| !v.is_null());
    if has("url") {
        Some("hosted")
    } else if has("note") || value.get("isPlaceholder") == Some(&Value::Bool(true)) {
        Some("placeholder")
    } else if has("data") {
        Some("inline")
    } else if has("originalSize") {
        Some("placeholder")
    } else {
        None
    }
}

impl Attachment {
    pub fn name(&self) -> &str {
        match self {
            Attachment::Inline(a) => &a.name,
            Attachment::Hosted(a) => &a.name,
            Attachment::Placeholder(a) => &a.name,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Attachment::Inline(a) => &a.mime_type,
            Attachment::Hosted(a) => &a.mime_type,
            Attachment::Placeholder(a) => &a.mime_type,
        }
    }

    /// Size in bytes as declared by the attachment
    pub fn size(&self) -> u64 {
        match self {
            Attachment::Inline(a) => a.size,
            Attachment::Hosted(a) => a.size,
            Attachment::Placeholder(a) => a.size,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Attachment::Placeholder(_))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type().starts_with("image/")
    }
}

impl InlineAttachment {
    /// Build an inline attachment from raw file bytes
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mime_type = mime_type.into();
        Self {
            name: name.into(),
            data: format!("data:{};base64,{}", mime_type, BASE64.encode(bytes)),
            mime_type,
            size: bytes.len() as u64,
            compressed: false,
            original_size: None,
        }
    }

    /// Decode the payload, accepting both bare base64 and data URLs
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let payload = match self.data.split_once(";base64,") {
            Some((_, encoded)) => encoded,
            None => self.data.as_str(),
        };
        BASE64.decode(payload.trim())
    }
}

/// Accept ids written either as JSON strings or numbers
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
