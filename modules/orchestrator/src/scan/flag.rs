use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

/// The categories of scans.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    License,
    Copyright,
}

/// A scan which completed, by a specific detector.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScanToken {
    pub category: Category,
    pub detector: String,
}

impl ScanToken {
    pub fn new(category: Category, detector: impl Into<String>) -> Self {
        Self {
            category,
            detector: detector.into(),
        }
    }
}

impl Display for ScanToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.category, self.detector)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid scan flag token: '{0}'")]
pub struct InvalidToken(String);

impl FromStr for ScanToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidToken(s.to_string());

        let (category, rest) = s.split_once('(').ok_or_else(invalid)?;
        let detector = rest.strip_suffix(')').ok_or_else(invalid)?;
        if detector.is_empty() || detector.contains([',', '(', ')']) {
            return Err(invalid());
        }

        Ok(Self {
            category: category.trim().parse().map_err(|_| invalid())?,
            detector: detector.to_string(),
        })
    }
}

/// The scans completed for a source, in the order they were recorded.
///
/// Stored as comma separated tokens, like `license(scancode-toolkit 30.1.0)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanFlag(Vec<ScanToken>);

impl ScanFlag {
    pub fn tokens(&self) -> &[ScanToken] {
        &self.0
    }

    pub fn contains(&self, token: &ScanToken) -> bool {
        self.0.contains(token)
    }

    /// Append a token, unless it is already present. Returns `true` if it was added.
    pub fn append(&mut self, token: ScanToken) -> bool {
        if self.contains(&token) {
            false
        } else {
            self.0.push(token);
            true
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ScanFlag {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flag = Self::default();
        for token in s.split(',').filter(|token| !token.trim().is_empty()) {
            flag.append(token.parse()?);
        }
        Ok(flag)
    }
}

impl Display for ScanFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (n, token) in self.0.iter().enumerate() {
            if n > 0 {
                f.write_str(",")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// The categories which still need to be scanned with `detector`.
///
/// A category counts as done only if it was scanned by the very same detector.
pub fn plan(flag: &ScanFlag, requested: &[Category], detector: &str) -> Vec<Category> {
    let mut result = Vec::with_capacity(requested.len());
    for category in requested {
        if !flag.contains(&ScanToken::new(*category, detector)) && !result.contains(category) {
            result.push(*category);
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    const DETECTOR: &str = "scancode-toolkit 30.1.0";

    #[rstest]
    #[case("")]
    #[case("license(scancode-toolkit 30.1.0)")]
    #[case("license(scancode-toolkit 30.1.0),copyright(scancode-toolkit 30.1.0)")]
    #[case("copyright(scancode-toolkit 30.1.0),license(scancode-toolkit 3.2.3),license(scancode-toolkit 30.1.0)")]
    fn round_trip(#[case] input: &str) {
        let flag: ScanFlag = input.parse().expect("valid flag");
        assert_eq!(flag.to_string(), input);
    }

    #[rstest]
    #[case("license")]
    #[case("license()")]
    #[case("license(scancode")]
    #[case("unknown(scancode)")]
    fn invalid(#[case] input: &str) {
        assert!(input.parse::<ScanFlag>().is_err());
    }

    #[test]
    fn append_keeps_order() {
        let mut flag: ScanFlag = "copyright(scancode-toolkit 3.2.3),license(scancode-toolkit 3.2.3)"
            .parse()
            .expect("valid flag");

        assert!(flag.append(ScanToken::new(Category::License, DETECTOR)));
        assert!(!flag.append(ScanToken::new(Category::License, DETECTOR)));

        assert_eq!(
            flag.to_string(),
            "copyright(scancode-toolkit 3.2.3),license(scancode-toolkit 3.2.3),license(scancode-toolkit 30.1.0)"
        );
    }

    #[rstest]
    #[case("", &[Category::License, Category::Copyright], &[Category::License, Category::Copyright])]
    #[case("license(scancode-toolkit 30.1.0)", &[Category::License, Category::Copyright], &[Category::Copyright])]
    #[case("license(scancode-toolkit 3.2.3)", &[Category::License], &[Category::License])]
    #[case("license(scancode-toolkit 30.1.0),copyright(scancode-toolkit 30.1.0)", &[Category::License, Category::Copyright], &[])]
    #[case("", &[], &[])]
    fn planning(#[case] flag: &str, #[case] requested: &[Category], #[case] expected: &[Category]) {
        let flag: ScanFlag = flag.parse().expect("valid flag");
        assert_eq!(plan(&flag, requested, DETECTOR), expected);
    }
}
