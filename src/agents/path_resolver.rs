// CLI binary path resolution for agent tools

use std::path::PathBuf;

use super::AgentSdk;

pub struct CliPathResolver;

impl CliPathResolver {
    /// Resolve the binary for an agent SDK
    pub fn resolve(sdk: AgentSdk) -> Option<PathBuf> {
        match sdk {
            AgentSdk::Claude => Self::resolve_cli("claude", &[]),
            AgentSdk::Codex => Self::resolve_cli("codex", &[]),
            AgentSdk::Opencode => Self::resolve_cli(
                "opencode",
                &[dirs::home_dir().map(|h| h.join(".opencode/bin/opencode"))],
            ),
        }
    }

    /// Resolve a CLI binary by checking common paths then falling back to PATH
    fn resolve_cli(name: &str, extra_paths: &[Option<PathBuf>]) -> Option<PathBuf> {
        let standard_paths = [
            dirs::home_dir().map(|h| h.join(format!(".npm-global/bin/{}", name))),
            Some(PathBuf::from(format!("/usr/local/bin/{}", name))),
            Some(PathBuf::from(format!("/opt/homebrew/bin/{}", name))),
        ];

        for path in extra_paths.iter().chain(standard_paths.iter()).flatten() {
            if path.exists() {
                log::debug!("[CliPathResolver] Found {} at: {:?}", name, path);
                return Some(path.clone());
            }
        }

        match which::which(name) {
            Ok(path) => {
                log::debug!("[CliPathResolver] Found {} via PATH at: {:?}", name, path);
                Some(path)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_binary() {
        assert!(CliPathResolver::resolve_cli("this-command-definitely-does-not-exist-12345", &[]).is_none());
    }

    #[test]
    fn test_extra_path_wins() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let fake = temp_dir.path().join("fake-agent");
        std::fs::write(&fake, "").unwrap();
        let found = CliPathResolver::resolve_cli("fake-agent-xyz", &[Some(fake.clone())]);
        assert_eq!(found, Some(fake));
    }
}
