/// Outcome of a safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyReport {
    pub safe: bool,
    pub reason: Option<String>,
}

impl SafetyReport {
    pub fn pass() -> Self {
        Self { safe: true, reason: None }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self { safe: false, reason: Some(reason.into()) }
    }
}

/// Final check over reflected text against the persona's traits and instructions.
pub trait SafetyChecker: Send + Sync {
    fn check(&self, text: &str, traits: &[String], instructions: &[String]) -> SafetyReport;
}

/// Phrase-matching checker for secret leaks and destructive commands.
#[derive(Debug, Clone)]
pub struct KeywordSafetyChecker {
    blocked: Vec<(String, &'static str)>,
}

impl Default for KeywordSafetyChecker {
    fn default() -> Self {
        let blocked = [
            ("password:", "possible credential leak"),
            ("api_key", "possible credential leak"),
            ("api key:", "possible credential leak"),
            ("secret key", "possible credential leak"),
            ("private key", "possible credential leak"),
            ("begin rsa", "possible credential leak"),
            ("rm -rf", "destructive shell command"),
            ("mkfs", "destructive shell command"),
            (":(){", "fork bomb"),
            ("dd if=", "raw disk write"),
        ];
        Self { blocked: blocked.iter().map(|(p, r)| (p.to_string(), *r)).collect() }
    }
}

impl KeywordSafetyChecker {
    /// Add a phrase that fails the check (matched case-insensitively).
    pub fn with_phrase(mut self, phrase: &str, reason: &'static str) -> Self {
        self.blocked.push((phrase.to_lowercase(), reason));
        self
    }
}

impl SafetyChecker for KeywordSafetyChecker {
    fn check(&self, text: &str, _traits: &[String], instructions: &[String]) -> SafetyReport {
        let lower = text.to_lowercase();
        if let Some((phrase, reason)) = self.blocked.iter().find(|(p, _)| lower.contains(p.as_str())) {
            return SafetyReport::fail(format!("{reason} ({phrase})"));
        }
        // "Never mention X" style instructions forbid X outright.
        for line in instructions {
            let l = line.to_lowercase();
            if let Some(rest) = l.strip_prefix("never mention ") {
                let term = rest.trim_end_matches('.').trim();
                if !term.is_empty() && lower.contains(term) {
                    return SafetyReport::fail(format!("instruction violated: {line}"));
                }
            }
        }
        SafetyReport::pass()
    }
}
