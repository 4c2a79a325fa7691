//! Audit strings attached to every resolved value.
//!
//! Formats:
//! - `"<source>/<year>"`          value read from a source at its effective year
//! - `"CROP_<year>"`              value copied from the same feature's `<year>`
//! - `"DEFAULT"`                  configured constant
//! - anything else                hand-curated text, kept verbatim
//!
//! each optionally followed by `" - remapped annual crops"`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::remap::REMAP_NOTE;
use crate::unit::Origin;
use crate::years::Year;

/// Prefix of the per-year code field in the persisted vector schema.
pub const CROP_FIELD_PREFIX: &str = "CROP_";
/// Prefix of the per-year provenance field in the persisted vector schema.
pub const SOURCE_FIELD_PREFIX: &str = "CSRC_";
pub const DEFAULT_TOKEN: &str = "DEFAULT";

const REMAP_SEPARATOR: &str = " - ";

pub fn crop_field(year: Year) -> String {
    format!("{CROP_FIELD_PREFIX}{year}")
}

pub fn source_field(year: Year) -> String {
    format!("{SOURCE_FIELD_PREFIX}{year}")
}

/// The ultimate origin named by a provenance string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Source { name: String, year: Year },
    Field { year: Year },
    Default,
    Curated(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Source { name, year } => write!(f, "{name}/{year}"),
            Token::Field { year } => write!(f, "{}", crop_field(*year)),
            Token::Default => f.write_str(DEFAULT_TOKEN),
            Token::Curated(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provenance {
    pub token: Token,
    pub remapped: bool,
}

impl Provenance {
    pub fn source(name: impl Into<String>, year: Year, remapped: bool) -> Self {
        Self {
            token: Token::Source { name: name.into(), year },
            remapped,
        }
    }

    pub fn field(year: Year, remapped: bool) -> Self {
        Self {
            token: Token::Field { year },
            remapped,
        }
    }

    pub fn default_constant() -> Self {
        Self {
            token: Token::Default,
            remapped: false,
        }
    }

    /// Provenance for a value copied out of `donor_year`, whose own
    /// provenance is `self`. Field-copy chains collapse onto the first donor.
    pub fn copied_from(&self, donor_year: Year) -> Self {
        match &self.token {
            Token::Field { .. } => self.clone(),
            _ => Self::field(donor_year, self.remapped),
        }
    }

    pub fn with_remap(mut self) -> Self {
        self.remapped = true;
        self
    }

    /// How a value stored under `year` with this provenance was produced.
    pub fn origin_for(&self, year: Year) -> Origin {
        match &self.token {
            Token::Source { year: effective, .. } if *effective != year => Origin::Composited,
            Token::Source { .. } | Token::Default | Token::Curated(_) => Origin::Sourced,
            Token::Field { .. } => Origin::Filled,
        }
    }

    /// Parse a persisted string. Empty text means "no provenance".
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let (body, remapped) = match text.strip_suffix(REMAP_NOTE) {
            Some(rest) if rest.ends_with(REMAP_SEPARATOR) => {
                (rest[..rest.len() - REMAP_SEPARATOR.len()].trim_end(), true)
            }
            _ => (text, false),
        };
        Some(Self {
            token: parse_token(body),
            remapped,
        })
    }
}

fn parse_token(body: &str) -> Token {
    if body == DEFAULT_TOKEN {
        return Token::Default;
    }
    if let Some(year) = body
        .strip_prefix(CROP_FIELD_PREFIX)
        .and_then(|y| y.parse::<Year>().ok())
    {
        return Token::Field { year };
    }
    if let Some((name, year)) = body.rsplit_once('/') {
        if let Ok(year) = year.parse::<Year>() {
            if !name.is_empty() {
                return Token::Source { name: name.to_string(), year };
            }
        }
    }
    Token::Curated(body.to_string())
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)?;
        if self.remapped {
            write!(f, "{REMAP_SEPARATOR}{REMAP_NOTE}")?;
        }
        Ok(())
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provenance::parse(s).ok_or_else(|| "empty provenance".to_string())
    }
}

impl Serialize for Provenance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Provenance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_source_and_remap_note() {
        assert_eq!(Provenance::source("CDL", 2014, false).to_string(), "CDL/2014");
        assert_eq!(
            Provenance::source("CDL", 2014, true).to_string(),
            "CDL/2014 - remapped annual crops"
        );
        assert_eq!(Provenance::field(2011, true).to_string(), "CROP_2011 - remapped annual crops");
    }

    #[test]
    fn parses_persisted_strings() {
        let p = Provenance::parse("USDA/NASS/CDL/2008 - remapped annual crops").unwrap();
        assert_eq!(p.token, Token::Source { name: "USDA/NASS/CDL".into(), year: 2008 });
        assert!(p.remapped);

        let p = Provenance::parse("CROP_2011").unwrap();
        assert_eq!(p.token, Token::Field { year: 2011 });
        assert!(!p.remapped);

        assert_eq!(Provenance::parse("DEFAULT").unwrap().token, Token::Default);
        assert_eq!(
            Provenance::parse("USDA/NASS/CDL/2005a").unwrap().token,
            Token::Curated("USDA/NASS/CDL/2005a".into())
        );
        assert!(Provenance::parse("  ").is_none());
    }

    #[test]
    fn display_parse_agree() {
        for text in [
            "CDL/2014",
            "LANDIQ/2014 - remapped annual crops",
            "CROP_2015",
            "CA2014 CDL2014 composite - remapped annual crops",
        ] {
            assert_eq!(Provenance::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn copy_chain_collapses_to_first_donor() {
        let sourced = Provenance::source("CDL", 2008, false);
        let hop1 = sourced.copied_from(2008);
        assert_eq!(hop1.to_string(), "CROP_2008");
        let hop2 = hop1.copied_from(2007);
        assert_eq!(hop2.to_string(), "CROP_2008");
    }

    #[test]
    fn copy_keeps_remap_note_of_donor() {
        let sourced = Provenance::source("CDL", 2008, true);
        assert_eq!(sourced.copied_from(2008).to_string(), "CROP_2008 - remapped annual crops");
    }

    #[test]
    fn origin_from_token_and_year() {
        assert_eq!(Provenance::source("CDL", 2014, false).origin_for(2014), Origin::Sourced);
        assert_eq!(Provenance::source("CDL", 2014, true).origin_for(2011), Origin::Composited);
        assert_eq!(Provenance::field(2015, false).origin_for(2012), Origin::Filled);
        assert_eq!(Provenance::default_constant().origin_for(2012), Origin::Sourced);
    }
}
