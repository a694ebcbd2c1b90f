//! Cascading per-directory allow-lists.
//!
//! A directory may hold a control file whose last `Require user` directive
//! lists the users allowed to see it. A path is visible only if every
//! directory from the data root down to it either has no directive or lists
//! the user.

use crate::store::clean_relative;
use std::path::{Path, PathBuf};

const REQUIRE_USER: &str = "Require user ";

/// Extract the user list of the last `Require user` directive in `text`.
pub fn required_users(text: &str) -> Option<Vec<&str>> {
    let pos = text.rfind(REQUIRE_USER)?;
    let rest = &text[pos + REQUIRE_USER.len()..];
    let line = rest.split('\n').next().unwrap_or(rest);
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some(line.split(' ').collect())
}

#[derive(Clone, Debug)]
pub struct AccessGate {
    root: PathBuf,
    control_file: String,
}

impl AccessGate {
    pub fn new(root: impl Into<PathBuf>, control_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            control_file: control_file.into(),
        }
    }

    pub fn control_file(&self) -> &str {
        &self.control_file
    }

    /// Check `path` and every ancestor below the data root. Anonymous callers
    /// are always allowed.
    pub fn allowed(&self, path: &Path, user: Option<&str>) -> bool {
        let Some(user) = user else { return true };
        let mut prefix = self.root.clone();
        for part in clean_relative(path).iter() {
            prefix.push(part);
            if !self.permits(&prefix, user) {
                tracing::debug!(user, dir = %prefix.display(), "access denied");
                return false;
            }
        }
        true
    }

    /// Check a single directory, assuming its ancestors were already allowed.
    pub fn allowed_dir(&self, dir: &Path, user: Option<&str>) -> bool {
        let Some(user) = user else { return true };
        let abs = self.root.join(clean_relative(dir));
        let ok = self.permits(&abs, user);
        if !ok {
            tracing::debug!(user, dir = %abs.display(), "access denied");
        }
        ok
    }

    fn permits(&self, dir: &Path, user: &str) -> bool {
        let control = dir.join(&self.control_file);
        if !control.is_file() {
            return true;
        }
        let bytes = match std::fs::read(&control) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %control.display(), error = %e, "unreadable control file");
                return true;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        match required_users(&text) {
            Some(users) => users.contains(&user),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_control(root: &Path, dir: &str, body: &str) {
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(".htaccess"), body).unwrap();
    }

    #[test]
    fn last_directive_wins() {
        let text = "AuthType Digest\nRequire user bob\nRequire user alice carol\n";
        assert_eq!(required_users(text), Some(vec!["alice", "carol"]));
        assert_eq!(required_users("AuthType Digest\n"), None);
        assert_eq!(required_users("Require user dave"), Some(vec!["dave"]));
        assert_eq!(required_users("Require user erin\r\n"), Some(vec!["erin"]));
    }

    #[test]
    fn anonymous_always_allowed() {
        let tempdir = tempfile::tempdir().unwrap();
        write_control(tempdir.path(), "p1", "Require user alice\n");
        let gate = AccessGate::new(tempdir.path(), ".htaccess");
        assert!(gate.allowed(Path::new("p1"), None));
    }

    #[test]
    fn ancestor_chain_is_checked() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        write_control(root, "p1", "Require user alice\n");
        std::fs::create_dir_all(root.join("p1/p2")).unwrap();
        write_control(root, "p1/p2/p3", "Require user bob\n");
        let gate = AccessGate::new(root, ".htaccess");

        assert!(gate.allowed(Path::new("p1/p2"), Some("alice")));
        assert!(!gate.allowed(Path::new("p1/p2/p3"), Some("alice")));
        assert!(!gate.allowed(Path::new("p1/p2"), Some("bob")));
        assert!(gate.allowed_dir(Path::new("p1/p2/p3"), Some("bob")));
    }

    #[test]
    fn control_without_directive_imposes_nothing() {
        let tempdir = tempfile::tempdir().unwrap();
        write_control(tempdir.path(), "open", "Options -Indexes\n");
        let gate = AccessGate::new(tempdir.path(), ".htaccess");
        assert!(gate.allowed(Path::new("open"), Some("anyone")));
    }
}
