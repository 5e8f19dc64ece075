use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::convert::ConvertError;

/// Conversion category. Each category is served by exactly one converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Text,
    Document,
    Image,
    Audio,
    Video,
    Compressed,
}

impl Category {
    /// All categories, in registry order.
    pub const ALL: [Category; 6] = [
        Category::Text,
        Category::Document,
        Category::Image,
        Category::Audio,
        Category::Video,
        Category::Compressed,
    ];

    /// Stable lowercase name, also used as the storage directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Document => "document",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Compressed => "compressed",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "document" => Ok(Self::Document),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "compressed" => Ok(Self::Compressed),
            _ => Err(ConvertError::UnknownCategory(s.to_string())),
        }
    }
}
