use std::collections::HashMap;

/// `<Style>` 要素の色情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleDef {
    pub id: Option<String>,
    pub icon_color: Option<String>,
    pub line_color: Option<String>,
    pub fill_color: Option<String>,
}

impl StyleDef {
    /// First color present in icon, line, fill order.
    pub fn color(&self) -> Option<&str> {
        self.icon_color
            .as_deref()
            .or(self.line_color.as_deref())
            .or(self.fill_color.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placemark {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// `<Style>` elements nested in the placemark, in document order.
    pub inline_styles: Vec<StyleDef>,
    pub style_url: Option<String>,
}

impl Placemark {
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("undefined")
    }
}

/// Styles shared at document level, keyed by id.
///
/// Built once after parsing and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct StyleTable {
    styles: HashMap<String, StyleDef>,
}

impl StyleTable {
    pub fn from_styles<'a>(styles: impl IntoIterator<Item = &'a StyleDef>) -> Self {
        let mut table = HashMap::new();
        for style in styles {
            if let Some(id) = &style.id {
                // 同じIDが複数ある場合は最初の定義を優先
                table.entry(id.clone()).or_insert_with(|| style.clone());
            }
        }
        Self { styles: table }
    }

    pub fn get(&self, id: &str) -> Option<&StyleDef> {
        self.styles.get(id)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapDocument {
    pub shared_styles: StyleTable,
    pub placemarks: Vec<Placemark>,
}
