use pretty_assertions::assert_eq;
use std::path::Path;
use std::process::Command;
use stet_core::diff::parse_unified_diff;
use stet_core::hunk_id::strict_id;
use stet_core::partition::partition;
use stet_core::scope::ScopeFilter;
use stet_vcs::GitCli;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) -> String {
    std::fs::write(dir.join(name), contents).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

fn files(hunks: &[stet_core::types::Hunk]) -> Vec<&str> {
    hunks.iter().map(|h| h.file_path.as_str()).collect()
}

#[tokio::test]
async fn new_file_since_last_review_is_the_only_hunk_to_review() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let c0 = commit_file(dir.path(), "README", "readme\n", "root");
    let c1 = commit_file(dir.path(), "f1.txt", "one\n", "add f1");
    let c2 = commit_file(dir.path(), "f2.txt", "two\n", "add f2");

    let cli = GitCli::open(dir.path()).unwrap();
    let result = partition(&cli, &ScopeFilter::default(), &c0, &c2, Some(&c1))
        .await
        .unwrap();
    assert_eq!(files(&result.to_review), vec!["f2.txt"]);
    assert_eq!(files(&result.approved), vec!["f1.txt"]);

    let full = partition(&cli, &ScopeFilter::default(), &c0, &c2, None)
        .await
        .unwrap();
    assert_eq!(files(&full.to_review), vec!["f1.txt", "f2.txt"]);
    assert!(full.approved.is_empty());
}

#[tokio::test]
async fn comment_only_change_is_approved_semantically() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let c0 = commit_file(dir.path(), "README", "readme\n", "root");
    let c1 = commit_file(dir.path(), "p.go", "func F() {}\n", "add F");
    let c2 = commit_file(dir.path(), "p.go", "func F() {} // comment\n", "comment F");

    let cli = GitCli::open(dir.path()).unwrap();
    let result = partition(&cli, &ScopeFilter::default(), &c0, &c2, Some(&c1))
        .await
        .unwrap();
    assert!(result.to_review.is_empty());
    assert_eq!(files(&result.approved), vec!["p.go"]);
}

#[tokio::test]
async fn partition_covers_every_current_hunk_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let c0 = commit_file(dir.path(), "README", "readme\n", "root");
    let c1 = commit_file(dir.path(), "a.py", "x = 1\n", "a");
    commit_file(dir.path(), "b.py", "y = 2\n", "b");
    let c3 = commit_file(dir.path(), "a.py", "x = 1\nz = 3\n", "a again");

    let cli = GitCli::open(dir.path()).unwrap();
    let result = partition(&cli, &ScopeFilter::default(), &c0, &c3, Some(&c1))
        .await
        .unwrap();
    let current = stet_core::partition::diff_hunks(&cli, &ScopeFilter::default(), &c0, &c3)
        .await
        .unwrap();

    let mut union: Vec<String> = result
        .to_review
        .iter()
        .chain(&result.approved)
        .map(|h| strict_id(&h.file_path, &h.raw_content))
        .collect();
    let mut expected: Vec<String> = current
        .iter()
        .map(|h| strict_id(&h.file_path, &h.raw_content))
        .collect();
    union.sort();
    expected.sort();
    assert_eq!(union, expected);
}

#[tokio::test]
async fn excluded_paths_never_reach_partition() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let c0 = commit_file(dir.path(), "README", "readme\n", "root");
    std::fs::create_dir(dir.path().join("vendor")).unwrap();
    commit_file(dir.path(), "vendor/lib.go", "package lib\n", "vendor");
    let c2 = commit_file(dir.path(), "main.go", "package main\n", "main");

    let cli = GitCli::open(dir.path()).unwrap();
    let result = partition(&cli, &ScopeFilter::default(), &c0, &c2, None)
        .await
        .unwrap();
    assert_eq!(files(&result.to_review), vec!["main.go"]);

    let everything = ScopeFilter::new(Some(&[]));
    let result = partition(&cli, &everything, &c0, &c2, None)
        .await
        .unwrap();
    assert_eq!(files(&result.to_review), vec!["main.go", "vendor/lib.go"]);
}

#[test]
fn binary_sections_produce_no_hunks() {
    let diff = "\
diff --git a/bin b/bin
new file mode 100644
index 0000000..e69de29
Binary files /dev/null and b/bin differ
diff --git a/notes.txt b/notes.txt
new file mode 100644
index 0000000..3b18e51
--- /dev/null
+++ b/notes.txt
@@ -0,0 +1 @@
+hello
";
    let hunks = parse_unified_diff(diff);
    assert_eq!(files(&hunks), vec!["notes.txt"]);
    assert_eq!(hunks[0].raw_content, "@@ -0,0 +1 @@\n+hello");
}
