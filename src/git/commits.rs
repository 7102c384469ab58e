//! Ahead-of-base checks for GitManager
//!
//! Used after an agent attempt to decide whether the workspace contains
//! commits that are not yet present upstream.

use git2::{Branch, BranchType, Error as GitError, Oid};

use crate::git::types::{AheadCheck, AheadReference};
use crate::git::GitManager;

impl GitManager {
    /// Count commits on HEAD that are not on the comparison reference.
    ///
    /// The comparison reference is resolved in order:
    /// 1. the upstream tracking branch of HEAD
    /// 2. `origin/<base_branch>`
    /// 3. local `<base_branch>`
    ///
    /// Returns `Ok(None)` when HEAD is unborn or none of the references exist.
    pub fn commits_ahead(&self, base_branch: &str) -> Result<Option<AheadCheck>, GitError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e),
        };
        let head_oid = head.peel_to_commit()?.id();

        if head.is_branch() {
            let branch = Branch::wrap(head);
            if let Ok(upstream) = branch.upstream() {
                let name = upstream.name().ok().flatten().unwrap_or("").to_string();
                if let Ok(commit) = upstream.get().peel_to_commit() {
                    let ahead = self.ahead_of(head_oid, commit.id())?;
                    return Ok(Some(AheadCheck {
                        reference: AheadReference::Upstream(name),
                        ahead,
                    }));
                }
            }
        }

        let remote_name = format!("origin/{}", base_branch);
        if let Ok(remote) = self.repo.find_branch(&remote_name, BranchType::Remote) {
            let target = remote.get().peel_to_commit()?.id();
            let ahead = self.ahead_of(head_oid, target)?;
            return Ok(Some(AheadCheck {
                reference: AheadReference::RemoteBase(remote_name),
                ahead,
            }));
        }

        if let Ok(local) = self.repo.find_branch(base_branch, BranchType::Local) {
            let target = local.get().peel_to_commit()?.id();
            let ahead = self.ahead_of(head_oid, target)?;
            return Ok(Some(AheadCheck {
                reference: AheadReference::LocalBase(base_branch.to_string()),
                ahead,
            }));
        }

        Ok(None)
    }

    fn ahead_of(&self, local: Oid, upstream: Oid) -> Result<usize, GitError> {
        let (ahead, _behind) = self.repo.graph_ahead_behind(local, upstream)?;
        Ok(ahead)
    }
}
