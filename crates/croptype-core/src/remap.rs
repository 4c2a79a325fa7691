//! Annual crop remap table: raw source codes → canonical generic codes.
//!
//! The table is total over 0..=255. Codes without a row map to themselves and
//! 0 (unset) is never remapped. Every target code must be a fixed point, which
//! is checked when the table is built so that `remap(remap(x)) == remap(x)`.

use std::{collections::BTreeMap, fs, path::Path};

use crate::error::ConfigError;
use crate::unit::CropCode;

pub const BUILTIN_REMAP_TABLE: &str = include_str!("data/cdl_annual_crop_remap_table.csv");

/// Provenance suffix recording that a value went through the table.
pub const REMAP_NOTE: &str = "remapped annual crops";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapTable {
    map: [CropCode; 256],
}

impl RemapTable {
    pub fn identity() -> Self {
        let mut map = [0u8; 256];
        for (i, slot) in map.iter_mut().enumerate() {
            *slot = i as CropCode;
        }
        Self { map }
    }

    /// Build from explicit `(in, out)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (CropCode, CropCode)>) -> Result<Self, ConfigError> {
        let mut rows: BTreeMap<CropCode, CropCode> = BTreeMap::new();
        for (line, (code, target)) in pairs.into_iter().enumerate() {
            if code == 0 || target == 0 {
                return Err(ConfigError::RemapRow {
                    line: line + 1,
                    message: format!("code 0 is reserved for unset ({code} -> {target})"),
                });
            }
            if let Some(&first) = rows.get(&code) {
                if first != target {
                    return Err(ConfigError::ConflictingRemap { code, first, second: target });
                }
            }
            rows.insert(code, target);
        }
        Self::from_rows(&rows)
    }

    fn from_rows(rows: &BTreeMap<CropCode, CropCode>) -> Result<Self, ConfigError> {
        for (&code, &target) in rows {
            if let Some(&next) = rows.get(&target) {
                if next != target {
                    return Err(ConfigError::NonIdempotentRemap { code, target, next });
                }
            }
        }
        let mut table = Self::identity();
        for (&code, &target) in rows {
            table.map[code as usize] = target;
        }
        Ok(table)
    }

    /// Parse the `IN,OUT` text format. `#` lines and blank lines are skipped,
    /// as is a header row; extra columns are ignored.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut rows: BTreeMap<CropCode, CropCode> = BTreeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cols = line.split(',').map(str::trim);
            let (a, b) = match (cols.next(), cols.next()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(ConfigError::RemapRow {
                        line: idx + 1,
                        message: format!("expected IN,OUT but found {line:?}"),
                    })
                }
            };
            if a.eq_ignore_ascii_case("IN") && b.eq_ignore_ascii_case("OUT") {
                continue;
            }
            let code = parse_code(a, idx + 1)?;
            let target = parse_code(b, idx + 1)?;
            if let Some(&first) = rows.get(&code) {
                if first != target {
                    return Err(ConfigError::ConflictingRemap { code, first, second: target });
                }
            }
            rows.insert(code, target);
        }
        Self::from_rows(&rows)
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::parse(BUILTIN_REMAP_TABLE)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            what: "remap table",
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    #[inline]
    pub fn remap(&self, code: CropCode) -> CropCode {
        self.map[code as usize]
    }

    /// True when `code` is in the non-identity domain of the table.
    #[inline]
    pub fn is_remapped(&self, code: CropCode) -> bool {
        self.map[code as usize] != code
    }

    /// Number of codes the table changes.
    pub fn len(&self) -> usize {
        (1..=255u8).filter(|&c| self.is_remapped(c)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full 1..=255 input/output lists, the shape raster remap operators take.
    pub fn pairs(&self) -> (Vec<CropCode>, Vec<CropCode>) {
        (1..=255u8).map(|c| (c, self.remap(c))).unzip()
    }
}

fn parse_code(text: &str, line: usize) -> Result<CropCode, ConfigError> {
    let value: i64 = text.parse().map_err(|_| ConfigError::RemapRow {
        line,
        message: format!("invalid code {text:?}"),
    })?;
    if !(1..=255).contains(&value) {
        return Err(ConfigError::RemapRow {
            line,
            message: format!("code {value} outside 1..=255"),
        });
    }
    Ok(value as CropCode)
}
