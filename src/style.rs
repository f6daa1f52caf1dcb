use tracing::{debug, warn};

use crate::model::{Placemark, StyleDef, StyleTable};

/// Where a placemark's color came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleResolution {
    Inline(String),
    Shared { id: String, color: String },
    /// The placemark points at a style id the document does not define.
    DanglingReference(String),
    Absent,
}

impl StyleResolution {
    pub fn color(&self) -> Option<&str> {
        match self {
            Self::Inline(color) | Self::Shared { color, .. } => Some(color),
            Self::DanglingReference(_) | Self::Absent => None,
        }
    }
}

/// Resolves the effective color of a placemark.
///
/// Inline styles win over a `styleUrl`; within a style the icon color is
/// preferred, then line, then fill. Colors are returned lowercase.
pub fn resolve(placemark: &Placemark, styles: &StyleTable) -> StyleResolution {
    if let Some(color) = placemark.inline_styles.iter().find_map(StyleDef::color) {
        debug!("Inline style color: {}", color);
        return StyleResolution::Inline(normalize(color));
    }

    let Some(url) = placemark.style_url.as_deref() else {
        return StyleResolution::Absent;
    };
    let id = style_id(url);

    match styles.get(id) {
        Some(style) => match style.color() {
            Some(color) => {
                debug!("Shared style '{}' color: {}", id, color);
                StyleResolution::Shared {
                    id: id.to_string(),
                    color: normalize(color),
                }
            }
            None => StyleResolution::Absent,
        },
        None => {
            warn!("Style reference '{}' does not match any style definition", url);
            StyleResolution::DanglingReference(id.to_string())
        }
    }
}

pub fn resolve_color(placemark: &Placemark, styles: &StyleTable) -> Option<String> {
    resolve(placemark, styles).color().map(str::to_string)
}

/// `#verde` -> `verde`
fn style_id(url: &str) -> &str {
    let url = url.trim();
    url.strip_prefix('#').unwrap_or(url)
}

fn normalize(color: &str) -> String {
    color.trim().to_ascii_lowercase()
}
