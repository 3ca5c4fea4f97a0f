use serde::Serialize;

/// Coarse classification of a condition, used to theme the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Rainy,
    Cloudy,
    Clear,
    Default,
}

const RAIN: &[&str] = &["rain", "drizzle", "shower", "thunder", "storm", "sleet"];
const CLOUD: &[&str] = &["cloud", "overcast"];
const CLEAR: &[&str] = &["sunny", "clear"];

impl Category {
    /// Checked in order: rain, then cloud, then clear.
    pub fn from_condition(condition: &str) -> Self {
        let condition = condition.to_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|k| condition.contains(k));

        if matches(RAIN) {
            Self::Rainy
        } else if matches(CLOUD) {
            Self::Cloudy
        } else if matches(CLEAR) {
            Self::Clear
        } else {
            Self::Default
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tags() {
        assert_eq!(Category::from_condition("light rain"), Category::Rainy);
        assert_eq!(Category::from_condition("partly cloudy"), Category::Cloudy);
        assert_eq!(Category::from_condition("sunny"), Category::Clear);
        assert_eq!(Category::from_condition("fog"), Category::Default);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(Category::from_condition("Patchy Light Drizzle"), Category::Rainy);
        assert_eq!(Category::from_condition("OVERCAST"), Category::Cloudy);
        assert_eq!(Category::from_condition("Clear "), Category::Clear);
    }

    #[test]
    fn precedence() {
        // both rain and cloud keywords: rain wins
        assert_eq!(Category::from_condition("Cloudy with light rain showers"), Category::Rainy);
        assert_eq!(Category::from_condition("Thundery outbreaks possible"), Category::Rainy);
        // cloud beats clear
        assert_eq!(Category::from_condition("clearing, still cloudy"), Category::Cloudy);
    }

    #[test]
    fn serialises_lowercase() {
        assert_eq!(serde_json::to_string(&Category::Cloudy).unwrap(), "\"cloudy\"");
        assert_eq!(serde_json::to_string(&Category::Default).unwrap(), "\"default\"");
    }
}
