use std::fmt;

use serde::{Deserialize, Serialize};

/// Decision threshold applied to the sigmoid output.
pub const THRESHOLD: f32 = 0.5;

/// Binary class of a chest X-ray.
///
/// The numeric value is the one the weights were trained against and must
/// not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "No Finding")]
    NoFinding = 0,
    #[serde(rename = "Cardiomegaly")]
    Cardiomegaly = 1,
}

impl Label {
    /// Both labels in index order.
    pub const ALL: [Label; 2] = [Label::NoFinding, Label::Cardiomegaly];

    pub fn name(self) -> &'static str {
        match self {
            Label::NoFinding => "No Finding",
            Label::Cardiomegaly => "Cardiomegaly",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Label::NoFinding),
            1 => Some(Label::Cardiomegaly),
            _ => None,
        }
    }

    /// Thresholded decision for a probability of cardiomegaly.
    pub fn from_probability(probability: f32) -> Self {
        if probability > THRESHOLD {
            Label::Cardiomegaly
        } else {
            Label::NoFinding
        }
    }

    pub fn is_positive(self) -> bool {
        self == Label::Cardiomegaly
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::Label;

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(Label::from_probability(0.5), Label::NoFinding);
        assert_eq!(Label::from_probability(0.5001), Label::Cardiomegaly);
        assert_eq!(Label::from_probability(0.0), Label::NoFinding);
    }

    #[test]
    fn serializes_to_display_names() {
        assert_eq!(
            serde_json::to_string(&Label::NoFinding).unwrap(),
            "\"No Finding\""
        );
        assert_eq!(Label::from_index(1), Some(Label::Cardiomegaly));
        assert_eq!(Label::from_index(2), None);
    }
}
