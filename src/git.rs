//! Bounded wrappers around the `git` binary.
//!
//! Every invocation the gateway makes runs under the same discipline: an
//! explicit working directory, piped stdio, a wall-clock timeout, and a cap
//! on captured output. A child that overruns either bound is killed and the
//! call fails with a typed [`GitError`] instead of wedging a chain run.
//!
//! The same runner executes the pre-receive hook and manifest plugins, so
//! nothing the gateway spawns escapes the bounds.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};

use crate::config::SubprocessConfig;
use crate::error::GitError;

/// Captured output of a finished, in-bounds, zero-exit child.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Spawns external processes with the configured bounds applied.
#[derive(Debug, Clone)]
pub struct GitRunner {
    timeout: Duration,
    max_output_bytes: usize,
}

async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    cap: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut reader) = pipe else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok((buf, false));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > cap {
            return Ok((buf, true));
        }
    }
}

async fn write_stdin(pipe: Option<ChildStdin>, bytes: Option<&[u8]>) -> std::io::Result<()> {
    let (Some(mut pipe), Some(bytes)) = (pipe, bytes) else {
        return Ok(());
    };
    // A child that exits before draining its stdin is reported through its
    // exit status, not as a broken pipe here.
    for result in [pipe.write_all(bytes).await, pipe.shutdown().await] {
        match result {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

impl GitRunner {
    pub fn new(subprocess: &SubprocessConfig) -> GitRunner {
        GitRunner {
            timeout: subprocess.timeout,
            max_output_bytes: subprocess.max_output_bytes,
        }
    }

    /// Run any program under the configured bounds, failing on non-zero exit.
    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        dir: Option<&Path>,
        stdin: Option<&[u8]>,
    ) -> Result<GitOutput, GitError> {
        let (output, code) = self.run_with_status(program, args, dir, stdin).await?;
        if code != 0 {
            let command = if args.is_empty() {
                program.to_string()
            } else {
                format!("{program} {}", args.join(" "))
            };
            return Err(GitError::Exit {
                command,
                code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run any program under the configured bounds and report its exit code
    /// instead of failing on it. Spawn, timeout, and output-cap violations
    /// still fail.
    pub async fn run_with_status(
        &self,
        program: &str,
        args: &[&str],
        dir: Option<&Path>,
        stdin: Option<&[u8]>,
    ) -> Result<(GitOutput, i32), GitError> {
        let command = if args.is_empty() {
            program.to_string()
        } else {
            format!("{program} {}", args.join(" "))
        };
        let io_path = || {
            dir.map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(program))
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        // GIT_DIR or GIT_WORK_TREE in the parent environment would override
        // the working-directory discovery every call here relies on.
        cmd.env_remove("GIT_DIR").env_remove("GIT_WORK_TREE");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;
        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let interact = async {
            let (write, out, err) = tokio::join!(
                write_stdin(stdin_pipe, stdin),
                read_capped(stdout_pipe, self.max_output_bytes),
                read_capped(stderr_pipe, self.max_output_bytes),
            );
            write?;
            let (stdout, stdout_over) = out?;
            let (stderr, stderr_over) = err?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((stdout, stdout_over, stderr, stderr_over, status))
        };

        let (stdout, stdout_over, stderr, stderr_over, status) =
            match tokio::time::timeout(self.timeout, interact).await {
                Err(_) => {
                    return Err(GitError::Timeout {
                        command,
                        timeout: self.timeout,
                    });
                }
                Ok(Err(source)) => {
                    return Err(GitError::Io {
                        path: io_path(),
                        source,
                    });
                }
                Ok(Ok(parts)) => parts,
            };

        if stdout_over || stderr_over {
            return Err(GitError::OutputCap {
                command,
                limit: self.max_output_bytes,
            });
        }
        let output = GitOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };
        Ok((output, status.code().unwrap_or(-1)))
    }

    async fn git(
        &self,
        repo: &Path,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<GitOutput, GitError> {
        self.run("git", args, Some(repo), stdin).await
    }

    /// Clone `url` into `parent`/`target`, forwarding the client's
    /// Authorization header when one was sent.
    pub async fn clone_repo(
        &self,
        parent: &Path,
        url: &str,
        target: &str,
        auth_header: Option<&str>,
    ) -> Result<GitOutput, GitError> {
        match auth_header {
            Some(auth) => {
                let header = format!("http.extraHeader=Authorization: {auth}");
                self.git(parent, &["-c", &header, "clone", url, target], None)
                    .await
            }
            None => self.git(parent, &["clone", url, target], None).await,
        }
    }

    /// `git config <key> <value>` inside `repo`.
    pub async fn config_set(&self, repo: &Path, key: &str, value: &str) -> Result<(), GitError> {
        self.git(repo, &["config", key, value], None).await?;
        Ok(())
    }

    /// Deliver a buffered receive-pack request body to the clone named
    /// `repo_name` under `parent`, exactly as the client sent it.
    pub async fn receive_pack(
        &self,
        parent: &Path,
        repo_name: &str,
        body: &[u8],
    ) -> Result<GitOutput, GitError> {
        self.git(parent, &["receive-pack", repo_name], Some(body))
            .await
    }

    /// Commits reachable from `tip`, newest first.
    pub async fn rev_list(&self, repo: &Path, tip: &str) -> Result<Vec<String>, GitError> {
        let out = self.git(repo, &["rev-list", tip], None).await?;
        Ok(Self::object_lines(&out.stdout))
    }

    /// Commits reachable from `tip` but not from `base`.
    pub async fn rev_list_range(
        &self,
        repo: &Path,
        base: &str,
        tip: &str,
    ) -> Result<Vec<String>, GitError> {
        let range = format!("{base}..{tip}");
        let out = self.git(repo, &["rev-list", &range], None).await?;
        Ok(Self::object_lines(&out.stdout))
    }

    /// The commit ids contained in the pack behind one `.idx` file.
    pub async fn verify_pack_commits(
        &self,
        repo: &Path,
        idx_path: &str,
    ) -> Result<Vec<String>, GitError> {
        let out = self.git(repo, &["verify-pack", "-v", idx_path], None).await?;
        Ok(Self::verify_pack_commit_ids(&out.stdout))
    }

    /// The object type of `id`, for example `commit`.
    pub async fn cat_file_type(&self, repo: &Path, id: &str) -> Result<String, GitError> {
        let out = self.git(repo, &["cat-file", "-t", id], None).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Unified diff between two commits.
    pub async fn diff(&self, repo: &Path, base: &str, tip: &str) -> Result<String, GitError> {
        let out = self.git(repo, &["diff", base, tip], None).await?;
        Ok(out.stdout)
    }

    /// One object id per non-empty output line.
    fn object_lines(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// First column of every `verify-pack -v` row whose type is `commit`.
    fn verify_pack_commit_ids(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .filter_map(|line| {
                let mut cols = line.split_whitespace();
                let id = cols.next()?;
                (cols.next()? == "commit").then(|| id.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> GitRunner {
        GitRunner {
            timeout: Duration::from_secs(10),
            max_output_bytes: 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = runner().run("echo", &["hello"], None, None).await.unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "");
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let out = runner()
            .run("cat", &[], None, Some(b"pack bytes"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "pack bytes");
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let err = runner()
            .run("sh", &["-c", "echo boom >&2; exit 3"], None, None)
            .await
            .unwrap_err();
        match err {
            GitError::Exit { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_with_status_reports_exit_code() {
        let (out, code) = runner()
            .run_with_status("sh", &["-c", "echo parked; exit 2"], None, None)
            .await
            .unwrap();
        assert_eq!(code, 2);
        assert_eq!(out.stdout, "parked\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = GitRunner {
            timeout: Duration::from_millis(50),
            max_output_bytes: 1024,
        };
        let err = runner.run("sleep", &["5"], None, None).await.unwrap_err();
        assert!(matches!(err, GitError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_output_cap_enforced() {
        let runner = GitRunner {
            timeout: Duration::from_secs(10),
            max_output_bytes: 1024,
        };
        let err = runner
            .run("sh", &["-c", "head -c 100000 /dev/zero"], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::OutputCap { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = runner()
            .run("no-such-binary-anywhere", &[], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Spawn { .. }));
    }

    #[test]
    fn test_object_lines_filters_blanks() {
        let parsed = GitRunner::object_lines("aaa\n\nbbb\n");
        assert_eq!(parsed, vec!["aaa".to_string(), "bbb".to_string()]);
    }

    #[test]
    fn test_verify_pack_rows_filtered_to_commits() {
        let stdout = "\
2d3bd09ad4759a766b05a62penny commit 225 158 12\n\
9928b8e5b3de44732dfa2d4bb12345 tree 33 44 170\n\
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa commit 100 90 214\n\
non-header noise\n";
        let ids = GitRunner::verify_pack_commit_ids(stdout);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    }
}
