//! Repository keys: filesystem- and queue-safe names derived from repository URLs.
//!
//! Two different URLs may sanitize to the same key (`a/b` and `a:b` both become
//! `a__b`). Builds of such URLs share a mirror and a queue slot.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-@.]").expect("valid regex"));

const ESCAPE: &str = "__";
const WORKSPACE_SUFFIX: &str = "%work";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoKey(String);

impl RepoKey {
    pub fn from_url(url: &str) -> Self {
        Self(UNSAFE_CHARS.replace_all(url, ESCAPE).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location of the bare mirror under `workdir`.
    pub fn mirror_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(&self.0)
    }

    /// Location of the ephemeral checkout, a sibling of the mirror.
    pub fn workspace_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(format!("{}{}", self.0, WORKSPACE_SUFFIX))
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_escapes_separators() {
        let key = RepoKey::from_url("git://host/repo.git");
        assert_eq!(key.as_str(), "git______host__repo.git");
    }

    #[test]
    fn test_from_url_keeps_safe_chars() {
        let key = RepoKey::from_url("git@github.com-user_x.repo");
        assert_eq!(key.as_str(), "git@github.com-user_x.repo");
    }

    #[test]
    fn test_from_url_is_stable() {
        let url = "https://aur.archlinux.org/yay.git";
        assert_eq!(RepoKey::from_url(url), RepoKey::from_url(url));
    }

    #[test]
    fn test_colliding_urls_share_a_key() {
        assert_eq!(RepoKey::from_url("a/b"), RepoKey::from_url("a:b"));
    }

    #[test]
    fn test_non_ascii_is_escaped() {
        assert_eq!(RepoKey::from_url("répo").as_str(), "r__po");
    }

    #[test]
    fn test_workspace_path_is_distinct_sibling() {
        let key = RepoKey::from_url("git://host/repo.git");
        let workdir = Path::new("/tmp");
        let mirror = key.mirror_path(workdir);
        let workspace = key.workspace_path(workdir);

        assert_eq!(mirror, PathBuf::from("/tmp/git______host__repo.git"));
        assert_eq!(workspace, PathBuf::from("/tmp/git______host__repo.git%work"));
        assert_ne!(mirror, workspace);
        assert_eq!(mirror.parent(), workspace.parent());
    }
}
