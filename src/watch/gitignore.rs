// src/watch/gitignore.rs

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use tracing::warn;

/// Answers "is this path ignored by git?" for the watched tree.
///
/// Loads the `.gitignore` of the Procfile's directory and of every ancestor
/// up to the filesystem root, and always excludes the `.git/` directory
/// itself. Matching follows git semantics (`**`, leading `/`, trailing `/`,
/// `!` re-inclusion), with deeper files taking precedence.
pub struct IgnoreMatcher {
    chain: Vec<Gitignore>,
}

impl IgnoreMatcher {
    pub fn new(root: &Path) -> Self {
        let root: PathBuf = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let mut chain = Vec::new();

        let mut dir = Some(root.as_path());
        while let Some(d) = dir {
            let file = d.join(".gitignore");
            if file.is_file() {
                let mut builder = GitignoreBuilder::new(d);
                if let Some(err) = builder.add(&file) {
                    warn!(path = %file.display(), error = %err, "skipping unreadable .gitignore");
                } else {
                    match builder.build() {
                        Ok(gitignore) => chain.push(gitignore),
                        Err(err) => {
                            warn!(path = %file.display(), error = %err, "failed to compile .gitignore")
                        }
                    }
                }
            }
            dir = d.parent();
        }

        Self { chain }
    }

    /// An empty matcher that ignores only `.git/`.
    pub fn empty() -> Self {
        Self { chain: Vec::new() }
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        if path.components().any(|c| c.as_os_str() == ".git") {
            return true;
        }
        for gitignore in &self.chain {
            match gitignore.matched_path_or_any_parents(path, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
        false
    }
}
