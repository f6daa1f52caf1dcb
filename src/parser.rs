use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use tracing::{debug, error};

use crate::error::Result;
use crate::model::{MapDocument, Placemark, StyleDef, StyleTable};

/// Parses a KML document into placemarks and shared styles.
///
/// Placemarks are collected wherever they appear (folders, nested
/// documents). `<Style>` elements inside a placemark become its inline
/// styles; all others are shared definitions.
pub fn parse_kml<R: BufRead>(source: R) -> Result<MapDocument> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut state = ParseState::default();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            error!(
                "KML read error at position {}: {:?}",
                reader.buffer_position(),
                e
            );
            e
        })?;

        match event {
            Event::Start(e) => state.open(&e, false),
            Event::Empty(e) => state.open(&e, true),
            Event::End(e) => state.close(e.local_name().as_ref()),
            Event::Text(t) => {
                // 未定義の実体参照（&nbsp; など）はそのままの文字列で扱う
                let text = match t.unescape() {
                    Ok(s) => s.into_owned(),
                    Err(_) => String::from_utf8_lossy(&t).into_owned(),
                };
                state.text(&text);
            }
            Event::CData(c) => state.text(&String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    let document = state.finish();
    debug!(
        "Parsed {} placemarks and {} shared styles",
        document.placemarks.len(),
        document.shared_styles.len()
    );
    Ok(document)
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Icon,
    Line,
    Fill,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Name,
    ShortName,
    Description,
    StyleUrl,
    Color,
}

struct PlacemarkBuilder {
    placemark: Placemark,
    short_name: Option<String>,
    depth: usize,
}

struct StyleBuilder {
    def: StyleDef,
    channel: Option<(Channel, usize)>,
    depth: usize,
}

struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

#[derive(Default)]
struct ParseState {
    depth: usize,
    placemark: Option<PlacemarkBuilder>,
    style: Option<StyleBuilder>,
    capture: Option<Capture>,
    shared_styles: Vec<StyleDef>,
    placemarks: Vec<Placemark>,
}

impl ParseState {
    fn open(&mut self, e: &BytesStart, empty: bool) {
        let depth = self.depth;
        let in_style = self.style.is_some();

        match e.local_name().as_ref() {
            b"Placemark" => {
                self.placemark = Some(PlacemarkBuilder {
                    placemark: Placemark {
                        id: attribute(e, b"id"),
                        ..Default::default()
                    },
                    short_name: None,
                    depth,
                });
                if empty {
                    self.close_placemark();
                }
            }
            b"Style" => {
                self.style = Some(StyleBuilder {
                    def: StyleDef {
                        id: attribute(e, b"id"),
                        ..Default::default()
                    },
                    channel: None,
                    depth,
                });
                if empty {
                    self.close_style();
                }
            }
            b"IconStyle" if in_style && !empty => self.set_channel(Channel::Icon, depth),
            b"LineStyle" if in_style && !empty => self.set_channel(Channel::Line, depth),
            b"PolyStyle" if in_style && !empty => self.set_channel(Channel::Fill, depth),
            b"color" if self.style.as_ref().is_some_and(|s| s.channel.is_some()) => {
                self.begin_capture(Field::Color, depth, empty)
            }
            b"name" if !in_style && self.placemark_field_free(Field::Name) => {
                self.begin_capture(Field::Name, depth, empty)
            }
            b"n" if !in_style && self.placemark_field_free(Field::ShortName) => {
                self.begin_capture(Field::ShortName, depth, empty)
            }
            b"description" if self.placemark_field_free(Field::Description) => {
                self.begin_capture(Field::Description, depth, empty)
            }
            b"styleUrl" if !in_style && self.placemark_field_free(Field::StyleUrl) => {
                self.begin_capture(Field::StyleUrl, depth, empty)
            }
            _ => (),
        }

        if !empty {
            self.depth += 1;
        }
    }

    fn close(&mut self, local_name: &[u8]) {
        self.depth = self.depth.saturating_sub(1);
        let depth = self.depth;

        if self.capture.as_ref().is_some_and(|c| c.depth == depth) {
            self.end_capture();
        }

        match local_name {
            b"IconStyle" | b"LineStyle" | b"PolyStyle" => {
                if let Some(style) = self.style.as_mut() {
                    if style.channel.is_some_and(|(_, d)| d == depth) {
                        style.channel = None;
                    }
                }
            }
            b"Style" if self.style.as_ref().is_some_and(|s| s.depth == depth) => {
                self.close_style()
            }
            b"Placemark" if self.placemark.as_ref().is_some_and(|p| p.depth == depth) => {
                self.close_placemark()
            }
            _ => (),
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn set_channel(&mut self, channel: Channel, depth: usize) {
        if let Some(style) = self.style.as_mut() {
            style.channel = Some((channel, depth));
        }
    }

    /// Whether the current placemark still lacks this field.
    fn placemark_field_free(&self, field: Field) -> bool {
        let Some(builder) = &self.placemark else {
            return false;
        };
        let p = &builder.placemark;
        match field {
            Field::Name => p.name.is_none(),
            Field::ShortName => builder.short_name.is_none(),
            Field::Description => p.description.is_none(),
            Field::StyleUrl => p.style_url.is_none(),
            Field::Color => false,
        }
    }

    fn begin_capture(&mut self, field: Field, depth: usize, empty: bool) {
        if self.capture.is_some() {
            return;
        }
        self.capture = Some(Capture {
            field,
            depth,
            text: String::new(),
        });
        if empty {
            self.end_capture();
        }
    }

    fn end_capture(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        let value = capture.text.trim().to_string();

        if let Field::Color = capture.field {
            if let Some(style) = self.style.as_mut() {
                let slot = match style.channel {
                    Some((Channel::Icon, _)) => &mut style.def.icon_color,
                    Some((Channel::Line, _)) => &mut style.def.line_color,
                    Some((Channel::Fill, _)) => &mut style.def.fill_color,
                    None => return,
                };
                if slot.is_none() && !value.is_empty() {
                    *slot = Some(value);
                }
            }
            return;
        }

        let Some(builder) = self.placemark.as_mut() else {
            return;
        };
        match capture.field {
            Field::Name => builder.placemark.name = Some(value),
            Field::ShortName => builder.short_name = Some(value),
            Field::Description => builder.placemark.description = Some(value),
            Field::StyleUrl => builder.placemark.style_url = Some(value),
            Field::Color => (),
        }
    }

    fn close_style(&mut self) {
        let Some(style) = self.style.take() else {
            return;
        };
        match self.placemark.as_mut() {
            Some(builder) => builder.placemark.inline_styles.push(style.def),
            None => self.shared_styles.push(style.def),
        }
    }

    fn close_placemark(&mut self) {
        let Some(builder) = self.placemark.take() else {
            return;
        };
        let mut placemark = builder.placemark;
        // <name> が無い場合は <n> を使う
        if placemark.name.as_deref().map_or(true, str::is_empty) {
            placemark.name = builder.short_name.or(placemark.name);
        }
        self.placemarks.push(placemark);
    }

    fn finish(mut self) -> MapDocument {
        // 閉じられていない要素が残っている場合も回収する
        self.capture = None;
        self.close_style();
        self.close_placemark();

        MapDocument {
            shared_styles: StyleTable::from_styles(&self.shared_styles),
            placemarks: self.placemarks,
        }
    }
}

fn attribute(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}
