use crate::backend::{Diff, GrepMatch, VcsBackend, VcsError, Worktree};
use crate::detection::detect_repo;
use crate::process::{CommandOutput, run_command};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Git backend driving the `git` executable.
pub struct GitCli {
    root: PathBuf,
    cancel: Option<CancellationToken>,
}

impl GitCli {
    pub fn open(path: &Path) -> Result<Self, VcsError> {
        let root = detect_repo(path)?;
        Ok(Self { root, cancel: None })
    }

    /// Every subsequent git invocation is killed once `token` fires.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0");
        command
    }

    /// Diff runs with a scrubbed environment so user config such as external
    /// diff drivers cannot change the output format.
    fn minimal_command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("git");
        command.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_DIR", self.root.join(".git"))
            .args(args)
            .current_dir(&self.root);
        command
    }

    async fn exec(&self, command: Command, label: &str) -> Result<CommandOutput, VcsError> {
        run_command(command, label, None, self.cancel.as_ref()).await
    }

    async fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let label = args.first().copied().unwrap_or("git");
        let output = self.exec(self.command(args), label).await?;
        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: label.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VcsBackend for GitCli {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn rev_parse(&self, rev: &str) -> Result<String, VcsError> {
        let spec = format!("{rev}^{{commit}}");
        let output = self
            .exec(
                self.command(&["rev-parse", "--verify", "--quiet", &spec]),
                "rev-parse",
            )
            .await?;
        let sha = output.stdout.trim().to_string();
        if !output.status.success() || sha.len() != 40 {
            return Err(VcsError::InvalidRef {
                name: rev.to_string(),
            });
        }
        Ok(sha)
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, VcsError> {
        let output = self
            .exec(
                self.command(&["merge-base", "--is-ancestor", ancestor, descendant]),
                "merge-base",
            )
            .await?;
        match output.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(VcsError::CommandFailed {
                command: "merge-base".to_string(),
                reason: output.stderr.trim().to_string(),
            }),
        }
    }

    async fn diff_range(&self, base: &str, head: &str) -> Result<Diff, VcsError> {
        let range = format!("{base}..{head}");
        let output = self
            .exec(
                self.minimal_command(&["diff", "--no-color", "--no-ext-diff", &range]),
                "diff",
            )
            .await?;
        if !output.status.success() {
            return Err(VcsError::DiffFailed {
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(Diff {
            base: base.to_string(),
            head: head.to_string(),
            unified: output.stdout,
        })
    }

    async fn ensure_clean(&self) -> Result<(), VcsError> {
        let status = self
            .run(&["status", "--porcelain", "--untracked-files=no"])
            .await?;
        if status.trim().is_empty() {
            Ok(())
        } else {
            Err(VcsError::DirtyWorkingCopy)
        }
    }

    async fn current_branch(&self) -> Result<String, VcsError> {
        let branch = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let branch = branch.trim();
        if branch == "HEAD" {
            return Ok(String::new());
        }
        Ok(branch.to_string())
    }

    async fn commit_subject(&self, rev: &str) -> Result<String, VcsError> {
        let subject = self.run(&["log", "-1", "--format=%s", rev]).await?;
        Ok(subject.trim().to_string())
    }

    async fn rev_list(&self, since: &str, until: &str) -> Result<Vec<String>, VcsError> {
        let range = format!("{since}..{until}");
        let output = self.run(&["rev-list", "--reverse", &range]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn worktree_add(&self, path: &Path, rev: &str) -> Result<Worktree, VcsError> {
        if path.exists() {
            return Err(VcsError::WorktreeExists {
                path: path.to_path_buf(),
            });
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| VcsError::BackendError {
                reason: format!("create {}: {err}", parent.display()),
            })?;
        }
        let path_str = path.to_string_lossy();
        self.run(&["worktree", "add", "--detach", &path_str, rev]).await?;
        Ok(Worktree {
            path: path.to_path_buf(),
            head: Some(rev.to_string()),
        })
    }

    async fn worktree_list(&self) -> Result<Vec<Worktree>, VcsError> {
        let output = self.run(&["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&output))
    }

    /// Teardown runs to completion even after cancellation.
    async fn worktree_remove(&self, path: &Path) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy();
        let output = run_command(
            self.command(&["worktree", "remove", "--force", &path_str]),
            "worktree",
            None,
            None,
        )
        .await?;
        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: "worktree".to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn note_add(&self, notes_ref: &str, rev: &str, body: &str) -> Result<(), VcsError> {
        let ref_arg = format!("--ref={notes_ref}");
        self.run(&["notes", &ref_arg, "add", "-f", "-m", body, rev]).await?;
        Ok(())
    }

    async fn note_show(&self, notes_ref: &str, rev: &str) -> Result<Option<String>, VcsError> {
        let ref_arg = format!("--ref={notes_ref}");
        let output = self
            .exec(self.command(&["notes", &ref_arg, "show", rev]), "notes")
            .await?;
        if !output.status.success() {
            if output.stderr.contains("no note found") {
                return Ok(None);
            }
            return Err(VcsError::CommandFailed {
                command: "notes".to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(Some(output.stdout.trim_end().to_string()))
    }

    async fn grep(
        &self,
        pattern: &str,
        pathspecs: &[String],
        deadline: Duration,
    ) -> Result<Vec<GrepMatch>, VcsError> {
        let mut args = vec!["grep", "-n", "-I", "-E", "-e", pattern, "--"];
        args.extend(pathspecs.iter().map(String::as_str));
        let output = run_command(
            self.command(&args),
            "grep",
            Some(deadline),
            self.cancel.as_ref(),
        )
        .await?;
        match output.code() {
            Some(0) => Ok(parse_grep_output(&output.stdout)),
            Some(1) => Ok(Vec::new()),
            _ => Err(VcsError::CommandFailed {
                command: "grep".to_string(),
                reason: output.stderr.trim().to_string(),
            }),
        }
    }
}

fn parse_worktree_list(output: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::new();
    let mut current: Option<Worktree> = None;
    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
            current = Some(Worktree {
                path: PathBuf::from(path),
                head: None,
            });
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            if let Some(worktree) = current.as_mut() {
                worktree.head = Some(head.to_string());
            }
        }
    }
    if let Some(done) = current {
        worktrees.push(done);
    }
    worktrees
}

/// Parses `path:line:text` records. Paths containing colons are not supported.
fn parse_grep_output(output: &str) -> Vec<GrepMatch> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let path = parts.next()?;
            let line_no = parts.next()?.parse::<u32>().ok()?;
            let text = parts.next().unwrap_or_default();
            Some(GrepMatch {
                path: path.to_string(),
                line: line_no,
                text: text.to_string(),
            })
        })
        .collect()
}

/// Directory name used for the baseline worktree of `baseline`.
pub fn worktree_path(worktree_root: &Path, baseline: &str) -> PathBuf {
    let short = &baseline[..baseline.len().min(12)];
    worktree_root.join(format!("stet-{short}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_porcelain_worktree_list() {
        let output = "worktree /repo\nHEAD aaaa\nbranch refs/heads/main\n\nworktree /repo/.review/worktrees/stet-abc\nHEAD bbbb\ndetached\n";
        let list = parse_worktree_list(output);
        assert_eq!(
            list,
            vec![
                Worktree {
                    path: PathBuf::from("/repo"),
                    head: Some("aaaa".to_string()),
                },
                Worktree {
                    path: PathBuf::from("/repo/.review/worktrees/stet-abc"),
                    head: Some("bbbb".to_string()),
                },
            ]
        );
    }

    #[test]
    fn parses_grep_lines_and_skips_garbage() {
        let output = "src/a.go:12:func Foo() {\nnot a match\nsrc/b.go:x:bad\nsrc/c.go:3:type Bar struct{ a: int }\n";
        let matches = parse_grep_output(output);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].path, "src/a.go");
        assert_eq!(matches[0].line, 12);
        assert_eq!(matches[1].text, "type Bar struct{ a: int }");
    }

    #[test]
    fn worktree_path_uses_short_sha() {
        let path = worktree_path(Path::new("/r/.review/worktrees"), "0123456789abcdef0123");
        assert_eq!(path, PathBuf::from("/r/.review/worktrees/stet-0123456789ab"));
    }
}
