//! `/etc/passwd` lookup for file owners.

use std::collections::HashMap;

/// Parses `/etc/passwd` content and returns a map of UID -> username.
///
/// Format: username:password:uid:gid:gecos:home:shell
pub fn parse_passwd(content: &str) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() >= 3
            && let Ok(uid) = parts[2].parse::<u32>()
        {
            map.entry(uid).or_insert_with(|| parts[0].to_string());
        }
    }
    map
}

/// Resolver for UID -> username mapping.
#[derive(Debug, Clone, Default)]
pub struct UserResolver {
    uid_to_name: HashMap<u32, String>,
}

impl UserResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads user mappings from /etc/passwd content.
    pub fn load_from_content(&mut self, content: &str) {
        self.uid_to_name = parse_passwd(content);
    }

    /// Resolves UID to username, returns UID as string if not found.
    pub fn resolve(&self, uid: u32) -> String {
        self.uid_to_name
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| uid.to_string())
    }

    pub fn is_loaded(&self) -> bool {
        !self.uid_to_name.is_empty()
    }
}
