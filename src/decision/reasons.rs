use std::fmt::Display;

/// Human-readable explanation of a decision.
///
/// Error reasons are always reported to the caller. Informational reasons are reported only when
/// requested with [`DecideOption::IncludeReasons`](super::DecideOption::IncludeReasons). Every
/// reason is also logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionReasons {
    errors: Vec<String>,
    infos: Vec<String>,
}

impl DecisionReasons {
    pub fn new() -> Self {
        DecisionReasons::default()
    }

    pub fn add_error(&mut self, error: impl Display) {
        let message = error.to_string();
        log::warn!(target: "decision_core", "{message}");
        self.errors.push(message);
    }

    pub fn add_info(&mut self, info: impl Display) {
        let message = info.to_string();
        log::info!(target: "decision_core", "{message}");
        self.infos.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn infos(&self) -> &[String] {
        &self.infos
    }

    /// Reasons to report: all errors, followed by informational reasons if `include_infos`.
    pub fn to_report(&self, include_infos: bool) -> Vec<String> {
        let mut report = self.errors.clone();
        if include_infos {
            report.extend(self.infos.iter().cloned());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_always_reported() {
        let mut reasons = DecisionReasons::new();
        reasons.add_info("info");
        reasons.add_error("error");

        assert_eq!(reasons.to_report(false), vec!["error"]);
        assert_eq!(reasons.to_report(true), vec!["error", "info"]);
    }
}
