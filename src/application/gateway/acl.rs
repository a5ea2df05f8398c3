//! Role-based channel access control and Redis-style glob matching.

use std::collections::HashMap;

pub struct Acl {
    roles: HashMap<String, Vec<String>>,
    default_role: String,
}

impl Acl {
    pub fn new(roles: HashMap<String, Vec<String>>, default_role: String) -> Self {
        Self {
            roles,
            default_role,
        }
    }

    /// Whether `role` may subscribe to `channel`. Unknown roles fall
    /// back to the default role's allow-list.
    pub fn allows(&self, role: &str, channel: &str) -> bool {
        let patterns = self
            .roles
            .get(role)
            .or_else(|| self.roles.get(&self.default_role));
        let Some(patterns) = patterns else {
            return false;
        };
        patterns.iter().any(|pattern| {
            if pattern == "*" {
                return true;
            }
            if pattern.contains('*') || pattern.contains('?') {
                return glob_match(pattern, channel);
            }
            channel == pattern || channel.starts_with(pattern)
        })
    }
}

/// Redis-style glob: `*` matches any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Backtrack: let the last star swallow one more character.
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// A subscription target counts as a wildcard when it carries glob
/// metacharacters.
pub fn is_wildcard(channel: &str) -> bool {
    channel.contains('*') || channel.contains('?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_and_question() {
        assert!(glob_match("market:tick:*", "market:tick:NIFTY"));
        assert!(glob_match("market:*:NIFTY", "market:tick:NIFTY"));
        assert!(glob_match("market:tick:?IFTY", "market:tick:NIFTY"));
        assert!(!glob_match("market:tick:*", "engine:decision"));
        assert!(!glob_match("market:tick:?", "market:tick:NIFTY"));
        assert!(glob_match("*", "anything:at:all"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    fn sample_acl() -> Acl {
        let mut roles = HashMap::new();
        roles.insert("user".to_string(), vec!["market:tick:*".to_string()]);
        roles.insert("internal".to_string(), vec!["*".to_string()]);
        Acl::new(roles, "user".to_string())
    }

    #[test]
    fn role_prefixes_enforced() {
        let acl = sample_acl();
        assert!(acl.allows("user", "market:tick:NIFTY"));
        assert!(!acl.allows("user", "engine:decision"));
        assert!(acl.allows("internal", "engine:decision"));
        // Unknown role falls back to the default role.
        assert!(acl.allows("mystery", "market:tick:NIFTY"));
        assert!(!acl.allows("mystery", "engine:decision"));
    }
}
