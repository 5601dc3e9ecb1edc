use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use crate::services::attendance_engine::ResetTarget;

/// Bearer token claims. Tokens are issued by the external identity provider;
/// this service only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user id.
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Team deleted")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `"all"` or an explicit list of team ids.
#[derive(Debug, Clone, PartialEq, Eq, ToSchema)]
#[schema(example = json!({"teams": ["T-001", "T-002"]}))]
pub struct ResetTargetReq {
    #[schema(value_type = Object, example = json!(["T-001", "T-002"]))]
    pub teams: ResetTarget,
}

impl<'de> Deserialize<'de> for ResetTargetReq {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            Ids(Vec<String>),
        }

        #[derive(Deserialize)]
        struct Body {
            teams: Raw,
        }

        let body = Body::deserialize(deserializer)?;
        let teams = match body.teams {
            Raw::Keyword(word) if word == "all" => ResetTarget::All,
            Raw::Keyword(word) => {
                return Err(serde::de::Error::custom(format!(
                    "teams must be \"all\" or a list of ids, got \"{}\"",
                    word
                )));
            }
            Raw::Ids(ids) => ResetTarget::Teams(ids),
        };
        Ok(ResetTargetReq { teams })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reset_target_accepts_keyword_or_ids() {
        let all: ResetTargetReq = serde_json::from_value(json!({"teams": "all"})).unwrap();
        assert_eq!(all.teams, ResetTarget::All);

        let some: ResetTargetReq = serde_json::from_value(json!({"teams": ["a", "b"]})).unwrap();
        assert_eq!(some.teams, ResetTarget::Teams(vec!["a".into(), "b".into()]));

        assert!(serde_json::from_value::<ResetTargetReq>(json!({"teams": "some"})).is_err());
    }
}
