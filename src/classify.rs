use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Savable,
    MustRegularize,
    Unknown,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Savable => "savable",
            Outcome::MustRegularize => "must-regularize",
            Outcome::Unknown => "unknown",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: Outcome,
    /// Color name for known codes, diagnostic text otherwise.
    pub label: String,
}

impl Classification {
    fn new(outcome: Outcome, label: impl Into<String>) -> Self {
        Self {
            outcome,
            label: label.into(),
        }
    }
}

/// Maps a color code to its outcome. Codes compare case-insensitively;
/// an empty code counts as absent.
pub fn classify(color: Option<&str>) -> Classification {
    let code = match color.map(str::trim) {
        Some(code) if !code.is_empty() => code,
        _ => return Classification::new(Outcome::Unknown, "color not found"),
    };

    match code.to_ascii_lowercase().as_str() {
        "ff00b371" => Classification::new(Outcome::Savable, "Verde-Padrão"),
        "ff3643f4" => Classification::new(Outcome::MustRegularize, "Laranja-escuro"),
        "ff631ee9" => Classification::new(Outcome::MustRegularize, "Rosa-escuro"),
        _ => Classification::new(Outcome::Unknown, format!("unmapped color: {}", code)),
    }
}
