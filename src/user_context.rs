use crate::{
    forced_decisions::{ForcedDecisionKey, ForcedDecisions},
    AttributeValue, Attributes,
};

/// A user to make decisions for: id, attributes, and forced decisions.
///
/// Cloning a context copies its forced decisions; the clone can be changed independently.
///
/// # Examples
/// ```
/// # use decision_core::{ForcedDecisionKey, UserContext};
/// let mut user = UserContext::new("user-1", [("country".to_owned(), "us".into())].into());
/// user.set_attribute("age", 30.0);
/// user.set_forced_decision(ForcedDecisionKey::flag("checkout"), "treatment");
/// assert_eq!(user.get_forced_decision(&ForcedDecisionKey::flag("checkout")), Some("treatment"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    forced_decisions: ForcedDecisions,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> UserContext {
        UserContext {
            user_id: user_id.into(),
            attributes,
            forced_decisions: ForcedDecisions::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn forced_decisions(&self) -> &ForcedDecisions {
        &self.forced_decisions
    }

    pub fn set_forced_decision(&mut self, key: ForcedDecisionKey, variation_key: impl Into<String>) {
        self.forced_decisions.set(key, variation_key);
    }

    pub fn get_forced_decision(&self, key: &ForcedDecisionKey) -> Option<&str> {
        self.forced_decisions.get(key)
    }

    /// Returns whether a forced decision was removed.
    pub fn remove_forced_decision(&mut self, key: &ForcedDecisionKey) -> bool {
        self.forced_decisions.remove(key)
    }

    pub fn remove_all_forced_decisions(&mut self) {
        self.forced_decisions.remove_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_copies_forced_decisions() {
        let mut original = UserContext::new("u", Attributes::new());
        original.set_forced_decision(ForcedDecisionKey::flag("f"), "a");

        let mut copy = original.clone();
        copy.set_forced_decision(ForcedDecisionKey::flag("f"), "b");
        copy.set_forced_decision(ForcedDecisionKey::rule("f", "r"), "c");

        assert_eq!(original.get_forced_decision(&ForcedDecisionKey::flag("f")), Some("a"));
        assert_eq!(original.get_forced_decision(&ForcedDecisionKey::rule("f", "r")), None);
        assert_eq!(copy.get_forced_decision(&ForcedDecisionKey::flag("f")), Some("b"));
    }

    #[test]
    fn attributes_can_be_updated() {
        let mut user = UserContext::new("u", Attributes::new());
        user.set_attribute("age", 30.0);
        user.set_attribute("age", 31.0);
        assert_eq!(user.attributes().get("age"), Some(&AttributeValue::Number(31.0)));
    }

    #[test]
    fn remove_forced_decisions() {
        let mut user = UserContext::new("u", Attributes::new());
        user.set_forced_decision(ForcedDecisionKey::flag("f"), "a");
        user.set_forced_decision(ForcedDecisionKey::rule("f", "r"), "b");

        assert!(user.remove_forced_decision(&ForcedDecisionKey::flag("f")));
        assert!(!user.remove_forced_decision(&ForcedDecisionKey::flag("f")));
        user.remove_all_forced_decisions();
        assert!(user.forced_decisions().is_empty());
    }
}
