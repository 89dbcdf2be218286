use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Accent color of an identity-document template. The set is closed: anything
/// outside it has no registered template and must be rejected, not defaulted.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, EnumIter, Display, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AccentColor {
    Navy,
    Crimson,
    Forest,
    Slate,
}

impl AccentColor {
    /// Primary fill used for the card header band.
    pub fn hex(self) -> &'static str {
        match self {
            AccentColor::Navy => "#1f3a5f",
            AccentColor::Crimson => "#7a1e2b",
            AccentColor::Forest => "#1e4d2b",
            AccentColor::Slate => "#3c4451",
        }
    }

    /// Lighter companion tone used for the footer band.
    pub fn hex_light(self) -> &'static str {
        match self {
            AccentColor::Navy => "#8fa8c8",
            AccentColor::Crimson => "#c98a94",
            AccentColor::Forest => "#8fbf9f",
            AccentColor::Slate => "#9aa3b0",
        }
    }
}

/// Gender-conditioned template variant. Drives the placeholder silhouette and
/// the name tables used when synthesizing a subject.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, EnumIter, Display, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GenderVariant {
    #[strum(serialize = "male", to_string = "masculine")]
    Masculine,
    #[strum(serialize = "female", to_string = "feminine")]
    Feminine,
}

/// Attributes of the synthetic subject a job submits and binds its document
/// artifact to. Fully determined by the job id (see `services::identity`), so
/// an internally retried job re-submits the exact same identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectAttributes {
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    pub birth_date: NaiveDate,
    pub program: String,
    pub id_number: String,
    pub gender: GenderVariant,
    pub accent: AccentColor,
}

impl SubjectAttributes {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_gender_variant_aliases() {
        assert_eq!(GenderVariant::from_str("male").unwrap(), GenderVariant::Masculine);
        assert_eq!(GenderVariant::from_str("FEMALE").unwrap(), GenderVariant::Feminine);
        assert_eq!(GenderVariant::from_str("feminine").unwrap(), GenderVariant::Feminine);
        assert!(GenderVariant::from_str("other").is_err());
    }

    #[test]
    fn test_accent_color_closed_set() {
        assert_eq!(AccentColor::from_str("navy").unwrap(), AccentColor::Navy);
        assert!(AccentColor::from_str("chartreuse").is_err());
    }
}
