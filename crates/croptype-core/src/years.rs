//! Calendar-year domain, validity windows, and year-list parsing.

use std::{collections::BTreeSet, ops::RangeInclusive};

use chrono::Datelike;
use serde::{Deserialize, Serialize};

pub type Year = i32;

/// Earliest year any source or field record covers.
pub const YEAR_MIN: Year = 1997;

/// Latest year accepted anywhere: next calendar year, so provisional
/// products for the upcoming season can be keyed.
pub fn year_max() -> Year {
    chrono::Utc::now().year() + 1
}

pub fn in_domain(year: Year) -> bool {
    domain().contains(&year)
}

/// Every year a unit record can hold.
pub fn domain() -> RangeInclusive<Year> {
    YEAR_MIN..=year_max()
}

/// Years for which a source has native data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidYears {
    /// Every year in `first..=last`.
    Range { first: Year, last: Year },
    /// Discrete acquisition years, e.g. a biennial survey.
    Sparse(BTreeSet<Year>),
}

impl ValidYears {
    pub fn range(first: Year, last: Year) -> Self {
        ValidYears::Range { first, last }
    }

    pub fn sparse(years: impl IntoIterator<Item = Year>) -> Self {
        ValidYears::Sparse(years.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ValidYears::Range { first, last } => first > last,
            ValidYears::Sparse(years) => years.is_empty(),
        }
    }

    pub fn contains(&self, year: Year) -> bool {
        match self {
            ValidYears::Range { first, last } => (*first..=*last).contains(&year),
            ValidYears::Sparse(years) => years.contains(&year),
        }
    }

    pub fn earliest(&self) -> Option<Year> {
        match self {
            ValidYears::Range { first, last } if first <= last => Some(*first),
            ValidYears::Range { .. } => None,
            ValidYears::Sparse(years) => years.first().copied(),
        }
    }

    pub fn latest(&self) -> Option<Year> {
        match self {
            ValidYears::Range { first, last } if first <= last => Some(*last),
            ValidYears::Range { .. } => None,
            ValidYears::Sparse(years) => years.last().copied(),
        }
    }

    /// Nearest valid year strictly before `year`.
    pub fn nearest_earlier(&self, year: Year) -> Option<Year> {
        match self {
            ValidYears::Range { first, last } => {
                if year <= *first || first > last {
                    None
                } else {
                    Some((year - 1).min(*last))
                }
            }
            ValidYears::Sparse(years) => years.range(..year).next_back().copied(),
        }
    }

    /// Union with extra native years. A contiguous result stays a range.
    pub fn merged(&self, extra: &[Year]) -> ValidYears {
        if extra.iter().all(|y| self.contains(*y)) {
            return self.clone();
        }
        let mut years: BTreeSet<Year> = match self {
            ValidYears::Range { first, last } => (*first..=*last).collect(),
            ValidYears::Sparse(years) => years.clone(),
        };
        years.extend(extra.iter().copied());
        match (years.first().copied(), years.last().copied()) {
            (Some(first), Some(last)) if (last - first + 1) as usize == years.len() => {
                ValidYears::Range { first, last }
            }
            _ => ValidYears::Sparse(years),
        }
    }
}

/// Optional inclusive bounds on a requested year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearBounds {
    #[serde(default)]
    pub min: Option<Year>,
    #[serde(default)]
    pub max: Option<Year>,
}

impl YearBounds {
    pub fn contains(&self, year: Year) -> bool {
        self.min.map_or(true, |min| year >= min) && self.max.map_or(true, |max| year <= max)
    }
}

/// Parse comma/space separated years and `first-last` ranges into a sorted,
/// de-duplicated list clipped to `[min, max]`.
///
/// `"2008-2010, 2015"` → `[2008, 2009, 2010, 2015]`
pub fn parse_year_ranges<S: AsRef<str>>(
    inputs: &[S],
    min: Year,
    max: Year,
) -> Result<Vec<Year>, String> {
    let mut years = BTreeSet::new();
    for input in inputs {
        for token in input
            .as_ref()
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            let (start, end) = match token.split_once('-') {
                Some((a, b)) => (parse_year(a, token)?, parse_year(b, token)?),
                None => {
                    let y = parse_year(token, token)?;
                    (y, y)
                }
            };
            if start > end {
                return Err(format!("descending year range {token:?}"));
            }
            years.extend((start..=end).filter(|y| (min..=max).contains(y)));
        }
    }
    Ok(years.into_iter().collect())
}

fn parse_year(text: &str, token: &str) -> Result<Year, String> {
    text.trim()
        .parse::<Year>()
        .map_err(|_| format!("invalid year {token:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_earlier_in_sparse_gap() {
        let v = ValidYears::sparse([2014, 2016, 2018, 2019]);
        assert_eq!(v.nearest_earlier(2017), Some(2016));
        assert_eq!(v.nearest_earlier(2015), Some(2014));
        assert_eq!(v.nearest_earlier(2014), None);
    }

    #[test]
    fn merged_stays_range_when_contiguous() {
        let v = ValidYears::range(2008, 2010).merged(&[2007, 2006]);
        assert_eq!(v, ValidYears::range(2006, 2010));
    }

    #[test]
    fn merged_becomes_sparse_with_gap() {
        let v = ValidYears::range(2008, 2010).merged(&[2004]);
        assert_eq!(v, ValidYears::sparse([2004, 2008, 2009, 2010]));
        assert_eq!(v.nearest_earlier(2006), Some(2004));
    }

    #[test]
    fn inverted_range_is_empty() {
        let v = ValidYears::range(2010, 2008);
        assert!(v.is_empty());
        assert_eq!(v.earliest(), None);
    }

    #[test]
    fn parse_year_ranges_mixed() {
        let years = parse_year_ranges(&["2008-2010, 2015", "2009 2020"], 1997, 2024).unwrap();
        assert_eq!(years, vec![2008, 2009, 2010, 2015, 2020]);
    }

    #[test]
    fn parse_year_ranges_clips_to_domain() {
        let years = parse_year_ranges(&["1990-1998"], 1997, 2024).unwrap();
        assert_eq!(years, vec![1997, 1998]);
    }

    #[test]
    fn parse_year_ranges_rejects_garbage() {
        assert!(parse_year_ranges(&["20x8"], 1997, 2024).is_err());
        assert!(parse_year_ranges(&["2010-2008"], 1997, 2024).is_err());
    }

    #[test]
    fn bounds_open_ended() {
        let b = YearBounds { min: Some(2009), max: None };
        assert!(!b.contains(2008));
        assert!(b.contains(2030));
    }
}
