use serde::{Deserialize, Serialize};

/// Inclusion/exclusion rules for one trial. Seeded as the first hidden turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaSet {
    pub title: String,
    #[serde(default)]
    pub inclusion: Vec<String>,
    #[serde(default)]
    pub exclusion: Vec<String>,
}

impl CriteriaSet {
    /// Render as the Markdown seed sent to the reasoning service.
    pub fn to_markdown(&self) -> String {
        let title = if self.title.trim().is_empty() {
            "Trial Criteria"
        } else {
            self.title.as_str()
        };
        let inclusion = bullet_list(&self.inclusion);
        let exclusion = bullet_list(&self.exclusion);

        format!(
            "**{title}**\n\n**Key Inclusion Criteria:**\n{inclusion}\n\n**Key Exclusion Criteria:**\n{exclusion}"
        )
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("* {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
