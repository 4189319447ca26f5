use serde::Serialize;

/// What a chat instruction asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Create,
    Fetch,
    Kpi,
    Graph,
    Unrecognized,
}

impl Intent {
    /// Recognized intents, in the order they are tested. The first match wins.
    pub const PRIORITY: [Intent; 4] = [Intent::Create, Intent::Fetch, Intent::Kpi, Intent::Graph];

    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Intent::Create => Some("CREATE"),
            Intent::Fetch => Some("FETCH"),
            Intent::Kpi => Some("KPI"),
            Intent::Graph => Some("GRAPH"),
            Intent::Unrecognized => None,
        }
    }

    /// Classify an instruction by case-insensitive keyword containment.
    pub fn classify(instruction: &str) -> Intent {
        let normalized = instruction.to_uppercase();

        Self::PRIORITY
            .into_iter()
            .find(|intent| {
                intent
                    .keyword()
                    .is_some_and(|keyword| normalized.contains(keyword))
            })
            .unwrap_or(Intent::Unrecognized)
    }
}

pub fn classify(instruction: &str) -> Intent {
    Intent::classify(instruction)
}
