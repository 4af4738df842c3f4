//! Keyword-driven topic classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Coarse classification tag for what a user is asking about.
///
/// Declaration order is the detection priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Experience,
    Skills,
    Projects,
    Education,
    Contact,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Experience,
        Topic::Skills,
        Topic::Projects,
        Topic::Education,
        Topic::Contact,
    ];

    /// The serialized tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Experience => "experience",
            Topic::Skills => "skills",
            Topic::Projects => "projects",
            Topic::Education => "education",
            Topic::Contact => "contact",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Topic::Experience => &[
                "experience", "work", "job", "career", "role", "company", "employer",
                "position", "worked",
            ],
            Topic::Skills => &[
                "skill", "technolog", "language", "framework", "stack", "tool", "expert",
                "proficien",
            ],
            Topic::Projects => &["project", "built", "build", "portfolio", "github", "demo"],
            Topic::Education => &[
                "education", "degree", "university", "college", "school", "stud", "certif",
            ],
            Topic::Contact => &["contact", "email", "hire", "reach", "linkedin", "phone"],
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ValidationError::invalid_format("topic", format!("unknown topic '{}'", s)))
    }
}

/// Pure classifier mapping free text to a [`Topic`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicDetector;

impl TopicDetector {
    /// Returns the first topic whose keyword starts any word of `text`.
    ///
    /// Matching is case-insensitive and anchored at word starts, so
    /// "framework" is a skills word and never an experience one.
    pub fn detect(text: &str) -> Option<Topic> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        Topic::ALL.into_iter().find(|topic| {
            topic
                .keywords()
                .iter()
                .any(|kw| words.iter().any(|w| w.starts_with(kw)))
        })
    }
}
