use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self { name: name.into(), description: description.into(), parameter_schema: schema }
    }
}

/// Organizational scope a worker serves. Empty fields mean "unrestricted".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub location: Option<String>,
    pub user: Option<String>,
}

impl ScopeFilter {
    pub fn is_unrestricted(&self) -> bool {
        self.location.is_none() && self.user.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub tool_names: Vec<String>,
    pub scope: ScopeFilter,
}

#[cfg(test)]
mod tests {
    use super::ScopeFilter;

    #[test]
    fn any_field_restricts_the_scope() {
        assert!(ScopeFilter::default().is_unrestricted());
        assert!(!ScopeFilter { location: Some("group-7".to_owned()), user: None }.is_unrestricted());
        assert!(!ScopeFilter { location: None, user: Some("user-1".to_owned()) }.is_unrestricted());
    }
}
