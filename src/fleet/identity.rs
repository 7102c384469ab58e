//! Repository identity fingerprinting
//!
//! Two checkouts of the same project must produce the same fingerprint no
//! matter how the remote was spelled when it was cloned.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::git::GitManager;

/// Length of the hex hash advertised to peers
pub const FINGERPRINT_HASH_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintMethod {
    RemoteOrigin,
    RootCommit,
}

impl FingerprintMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintMethod::RemoteOrigin => "remote-origin",
            FingerprintMethod::RootCommit => "root-commit",
        }
    }
}

impl std::fmt::Display for FingerprintMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoFingerprint {
    pub method: FingerprintMethod,
    pub raw: String,
    pub normalized: String,
    pub hash: String,
}

/// Canonical form of a remote URL.
///
/// `https://host/org/repo.git`, `git@host:org/repo.git` and
/// `ssh://git@host/org/repo` all map to `host/org/repo`.
pub fn normalize_remote_url(url: &str) -> String {
    let mut rest = url.trim();

    if let Some(idx) = rest.find("://") {
        rest = &rest[idx + 3..];
    }

    // user@ (only when it precedes the first path separator)
    if let Some(at) = rest.find('@') {
        if rest.find('/').map_or(true, |slash| at < slash) {
            rest = &rest[at + 1..];
        }
    }

    // host:port/path (drop the port) or scp-style host:path
    let (host, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, ""),
    };
    let mut normalized = match host.split_once(':') {
        Some((h, tail)) if tail.chars().all(|c| c.is_ascii_digit()) => format!("{}{}", h, path),
        Some((h, tail)) => format!("{}/{}{}", h, tail, path),
        None => format!("{}{}", host, path),
    }
    .to_lowercase();

    loop {
        let before = normalized.len();
        while normalized.ends_with('/') {
            normalized.pop();
        }
        if let Some(stripped) = normalized.strip_suffix(".git") {
            normalized = stripped.to_string();
        }
        if normalized.len() == before {
            break;
        }
    }

    normalized
}

/// First 16 hex characters of the SHA-256 of `input`
pub fn fingerprint_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_HASH_LEN);
    hex
}

/// Fingerprint the repository at `repo_root`.
///
/// Uses the `origin` remote when configured, otherwise the root commit.
/// Returns `None` outside a repository or when the repository has no commits.
pub fn compute_fingerprint(repo_root: &Path) -> Option<RepoFingerprint> {
    let manager = match GitManager::new(repo_root) {
        Ok(m) => m,
        Err(e) => {
            log::debug!("[RepoIdentity] {:?} is not a git repository: {}", repo_root, e);
            return None;
        }
    };

    if let Some(raw) = manager.remote_origin_url() {
        let normalized = normalize_remote_url(&raw);
        if !normalized.is_empty() {
            let hash = fingerprint_hash(&normalized);
            return Some(RepoFingerprint {
                method: FingerprintMethod::RemoteOrigin,
                raw,
                normalized,
                hash,
            });
        }
    }

    match manager.root_commit() {
        Ok(Some(root)) => Some(RepoFingerprint {
            method: FingerprintMethod::RootCommit,
            hash: fingerprint_hash(&root),
            raw: root.clone(),
            normalized: root,
        }),
        Ok(None) => None,
        Err(e) => {
            log::warn!("[RepoIdentity] Failed to resolve root commit: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    #[test]
    fn test_equivalent_urls_normalize_identically() {
        let spellings = [
            "https://github.com/Org/Repo.git",
            "https://github.com/org/repo",
            "https://github.com/org/repo/",
            "http://github.com/org/repo.git/",
            "git@github.com:org/repo.git",
            "git@GitHub.com:Org/Repo",
            "ssh://git@github.com/org/repo",
            "ssh://git@github.com:22/org/repo.git",
            "git://github.com/org/repo.git",
            "https://user@github.com/org/repo.git",
        ];

        for url in spellings {
            assert_eq!(normalize_remote_url(url), "github.com/org/repo", "{}", url);
        }
        let hashes: std::collections::HashSet<String> = spellings
            .iter()
            .map(|u| fingerprint_hash(&normalize_remote_url(u)))
            .collect();
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn test_different_repos_differ() {
        assert_ne!(
            normalize_remote_url("git@github.com:org/repo-a.git"),
            normalize_remote_url("git@github.com:org/repo-b.git")
        );
    }

    #[test]
    fn test_fingerprint_hash_length() {
        let hash = fingerprint_hash("github.com/org/repo");
        assert_eq!(hash.len(), FINGERPRINT_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_method_serialization() {
        let json = serde_json::to_string(&FingerprintMethod::RootCommit).unwrap();
        assert_eq!(json, "\"root-commit\"");
    }

    #[test]
    fn test_compute_fingerprint_not_a_repo() {
        let temp_dir = TempDir::new().unwrap();
        assert!(compute_fingerprint(temp_dir.path()).is_none());
    }

    #[test]
    fn test_compute_fingerprint_empty_repo() {
        let temp_dir = TempDir::new().unwrap();
        Repository::init(temp_dir.path()).unwrap();
        assert!(compute_fingerprint(temp_dir.path()).is_none());
    }

    #[test]
    fn test_compute_fingerprint_root_commit_then_remote() {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        let fp = compute_fingerprint(temp_dir.path()).unwrap();
        assert_eq!(fp.method, FingerprintMethod::RootCommit);
        assert_eq!(fp.normalized, oid.to_string());
        assert_eq!(fp.hash, fingerprint_hash(&oid.to_string()));

        repo.remote("origin", "git@github.com:Org/Repo.git").unwrap();
        let fp = compute_fingerprint(temp_dir.path()).unwrap();
        assert_eq!(fp.method, FingerprintMethod::RemoteOrigin);
        assert_eq!(fp.raw, "git@github.com:Org/Repo.git");
        assert_eq!(fp.normalized, "github.com/org/repo");
    }
}
