//! The active council: built-in personas plus custom roles added for a review.

use chrono::Utc;
use shared::{
    domain::{Role, RoleId},
    protocol::CustomRolePayload,
};
use tracing::info;

use crate::error::ClientError;

pub const CUSTOM_ROLE_PREFIX: &str = "custom_";
pub const CUSTOM_ROLE_COLOR: &str = "#8b5cf6";
pub const DEFAULT_CUSTOM_ICON: &str = "👤";
pub const CUSTOM_ROLE_ICONS: [&str; 10] = ["👤", "📚", "🔬", "💼", "🎯", "🩺", "📋", "🧠", "💡", "🌟"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinRole {
    pub id: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    pub color: &'static str,
}

impl BuiltinRole {
    pub fn to_role(self) -> Role {
        Role {
            id: RoleId::from(self.id),
            name: self.name.to_string(),
            icon: self.icon.to_string(),
            description: self.description.to_string(),
            color: self.color.to_string(),
            is_custom: false,
        }
    }
}

pub const BUILTIN_ROLES: [BuiltinRole; 3] = [
    BuiltinRole {
        id: "academic",
        name: "The Academic",
        icon: "🎓",
        description: "NMC Standards, evidence-based practice, scholarly rigor",
        color: "#a855f7",
    },
    BuiltinRole {
        id: "clinical_mentor",
        name: "The Clinical Mentor",
        icon: "🏥",
        description: "Ward realism, clinical applicability, compassionate care",
        color: "#22c55e",
    },
    BuiltinRole {
        id: "student_advocate",
        name: "The Student Advocate",
        icon: "👩‍🎓",
        description: "Accessibility, clarity, diverse learning needs",
        color: "#3b82f6",
    },
];

/// Input of the "add custom role" form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRole {
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
}

impl NewRole {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.description.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSet {
    roles: Vec<Role>,
}

impl Default for RoleSet {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl RoleSet {
    pub fn with_builtins() -> Self {
        Self {
            roles: BUILTIN_ROLES.iter().map(|role| role.to_role()).collect(),
        }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn get(&self, id: &RoleId) -> Option<&Role> {
        self.roles.iter().find(|role| &role.id == id)
    }

    /// Heading for a result produced by `model`: the matching role's icon and
    /// name, or the raw identifier when no role matches.
    pub fn display_name(&self, model: &str) -> String {
        self.roles
            .iter()
            .find(|role| role.id.as_str() == model)
            .map(|role| format!("{} {}", role.icon, role.name))
            .unwrap_or_else(|| model.to_string())
    }

    pub fn custom_roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter().filter(|role| role.is_custom)
    }

    pub fn add_custom(&mut self, draft: NewRole) -> Result<&Role, ClientError> {
        self.add_custom_at(draft, Utc::now().timestamp_millis())
    }

    fn add_custom_at(&mut self, draft: NewRole, now_millis: i64) -> Result<&Role, ClientError> {
        if !draft.is_complete() {
            return Err(ClientError::Validation(
                "custom roles need a name and a focus description".to_string(),
            ));
        }

        let id = self.next_custom_id(now_millis);
        let icon = draft
            .icon
            .filter(|icon| !icon.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CUSTOM_ICON.to_string());
        info!(role_id = %id, name = draft.name.trim(), "adding custom council role");

        self.roles.push(Role {
            id,
            name: draft.name.trim().to_string(),
            icon,
            description: draft.description.trim().to_string(),
            color: CUSTOM_ROLE_COLOR.to_string(),
            is_custom: true,
        });
        Ok(&self.roles[self.roles.len() - 1])
    }

    fn next_custom_id(&self, now_millis: i64) -> RoleId {
        let mut stamp = now_millis;
        loop {
            let candidate = RoleId(format!("{CUSTOM_ROLE_PREFIX}{stamp}"));
            if self.get(&candidate).is_none() {
                return candidate;
            }
            stamp += 1;
        }
    }

    /// Removes a custom role. Built-in roles are never removed.
    pub fn remove(&mut self, id: &RoleId) -> bool {
        let before = self.roles.len();
        self.roles.retain(|role| !(role.is_custom && &role.id == id));
        let removed = self.roles.len() != before;
        if removed {
            info!(role_id = %id, "removed custom council role");
        }
        removed
    }

    pub fn custom_role_payloads(&self) -> Vec<CustomRolePayload> {
        self.custom_roles()
            .map(|role| CustomRolePayload {
                id: role.id.clone(),
                name: role.name.clone(),
                description: role.description.clone(),
                icon: role.icon.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_the_three_builtin_roles() {
        let roles = RoleSet::with_builtins();
        let ids: Vec<&str> = roles.roles().iter().map(|role| role.id.as_str()).collect();
        assert_eq!(ids, vec!["academic", "clinical_mentor", "student_advocate"]);
        assert_eq!(roles.custom_roles().count(), 0);
    }

    #[test]
    fn add_custom_assigns_timestamp_id_and_custom_styling() {
        let mut roles = RoleSet::with_builtins();
        let role = roles
            .add_custom_at(
                NewRole::new("The Policy Expert", "Local trust policy").with_icon("📋"),
                1_700_000_000_000,
            )
            .expect("role")
            .clone();

        assert_eq!(role.id.as_str(), "custom_1700000000000");
        assert_eq!(role.icon, "📋");
        assert_eq!(role.color, CUSTOM_ROLE_COLOR);
        assert!(role.is_custom);
        assert_eq!(roles.len(), 4);
    }

    #[test]
    fn custom_ids_stay_unique_within_the_same_millisecond() {
        let mut roles = RoleSet::with_builtins();
        let first = roles
            .add_custom_at(NewRole::new("A", "a"), 42)
            .expect("first")
            .id
            .clone();
        let second = roles
            .add_custom_at(NewRole::new("B", "b"), 42)
            .expect("second")
            .id
            .clone();
        assert_ne!(first, second);
        assert_eq!(second.as_str(), "custom_43");
    }

    #[test]
    fn rejects_blank_name_or_description() {
        let mut roles = RoleSet::with_builtins();
        assert!(matches!(
            roles.add_custom(NewRole::new("   ", "focus")),
            Err(ClientError::Validation(_))
        ));
        assert!(roles.add_custom(NewRole::new("Name", "")).is_err());
        assert_eq!(roles.len(), 3);
    }

    #[test]
    fn default_icon_used_when_none_chosen() {
        let mut roles = RoleSet::with_builtins();
        let role = roles.add_custom(NewRole::new("Name", "Focus")).expect("role");
        assert_eq!(role.icon, DEFAULT_CUSTOM_ICON);
    }

    #[test]
    fn removing_custom_role_removes_exactly_that_role() {
        let mut roles = RoleSet::with_builtins();
        let keep = roles
            .add_custom_at(NewRole::new("Keep", "k"), 1)
            .expect("keep")
            .id
            .clone();
        let drop = roles
            .add_custom_at(NewRole::new("Drop", "d"), 2)
            .expect("drop")
            .id
            .clone();

        assert!(roles.remove(&drop));
        assert_eq!(roles.len(), 4);
        assert!(roles.get(&keep).is_some());
        assert!(roles.get(&drop).is_none());
    }

    #[test]
    fn removing_builtin_role_is_a_no_op() {
        let mut roles = RoleSet::with_builtins();
        assert!(!roles.remove(&RoleId::from("academic")));
        assert_eq!(roles, RoleSet::with_builtins());
    }

    #[test]
    fn display_name_falls_back_to_model_identifier() {
        let roles = RoleSet::with_builtins();
        assert_eq!(roles.display_name("academic"), "🎓 The Academic");
        assert_eq!(roles.display_name("openai/gpt-4o"), "openai/gpt-4o");
    }

    #[test]
    fn payloads_include_only_custom_roles() {
        let mut roles = RoleSet::with_builtins();
        roles
            .add_custom_at(NewRole::new("Policy", "Trust policy").with_icon("💼"), 9)
            .expect("role");

        let payloads = roles.custom_role_payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].id.as_str(), "custom_9");
        assert_eq!(payloads[0].icon, "💼");
    }
}
