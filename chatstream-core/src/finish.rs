use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// How the accumulated text is turned into the final `StreamResult` text.
/// Update callbacks always see the raw accumulated text.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FinishPolicy {
    /// Verbatim.
    None,
    /// Strip leading/trailing whitespace.
    #[default]
    Trim,
    /// NFC normalization, BOM strip, CRLF -> LF, then trim.
    Clean,
}

impl FinishPolicy {
    pub fn apply(self, text: &str) -> String {
        match self {
            Self::None => text.to_string(),
            Self::Trim => text.trim().to_string(),
            Self::Clean => clean_text(text),
        }
    }
}

fn clean_text(s: &str) -> String {
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}
