use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;

const EXCLUDED_DIRS: &[&str] = &["target", ".git"];

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/main");
    println!("cargo:rerun-if-changed=.git/packed-refs");

    let sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=RESIDUE_GIT_SHA={}", sha);

    let files = collect_source_files();
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    enforce_line_limits(&files);
    enforce_no_dead_code_allows(&files);
    enforce_no_test_skips(&files);
}

fn manifest_root() -> PathBuf {
    PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR must be set"))
}

/// Every `.rs` file under `src/`.
fn collect_source_files() -> Vec<PathBuf> {
    let mut files = Vec::new();
    walk_directory(&manifest_root().join("src"), &mut files);
    files.sort();
    files
}

fn walk_directory(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if EXCLUDED_DIRS.contains(&name) {
                    continue;
                }
            }
            walk_directory(&path, files);
        } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
            files.push(path);
        }
    }
}

fn relative(path: &Path) -> PathBuf {
    let root = manifest_root();
    path.strip_prefix(&root).unwrap_or(path).to_path_buf()
}

fn count_non_empty_lines(content: &str) -> usize {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count()
}

fn enforce_line_limits(files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        match std::fs::read_to_string(file) {
            Ok(content) => {
                let line_count = count_non_empty_lines(&content);
                if line_count > MAX_LINES {
                    violations.push((relative(file), line_count));
                }
            }
            Err(e) => println!(
                "cargo:warning=Could not read file {}: {}",
                relative(file).display(),
                e
            ),
        }
    }

    if !violations.is_empty() {
        eprintln!("\n========================================");
        eprintln!("FILE LINE LIMIT EXCEEDED (max {} lines)", MAX_LINES);
        eprintln!("========================================");
        for (path, lines) in &violations {
            eprintln!(
                "  {} - {} lines (exceeds by {})",
                path.display(),
                lines,
                lines - MAX_LINES
            );
        }
        eprintln!("========================================\n");
        eprintln!("Please split these files into smaller modules.\n");
        panic!(
            "Build failed: {} file(s) exceed the {} line limit",
            violations.len(),
            MAX_LINES
        );
    }
}

/// Collects `(line number, line)` pairs matching `is_violation` per file.
fn scan(
    files: &[PathBuf],
    is_violation: impl Fn(&str) -> bool,
) -> Vec<(PathBuf, Vec<(usize, String)>)> {
    let mut violations = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        let hits: Vec<(usize, String)> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| is_violation(line.trim()))
            .map(|(i, line)| (i + 1, line.to_string()))
            .collect();
        if !hits.is_empty() {
            violations.push((relative(file), hits));
        }
    }
    violations
}

fn report(violations: &[(PathBuf, Vec<(usize, String)>)], title: &str, advice: &[&str]) {
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================\n");
    for (path, lines) in violations {
        for (line_num, line_content) in lines {
            eprintln!("  {}:{}", path.display(), line_num);
            eprintln!("    {}", line_content.trim());
            eprintln!();
        }
    }
    for line in advice {
        eprintln!("{}", line);
    }
    eprintln!("\n========================================\n");
}

fn enforce_no_dead_code_allows(files: &[PathBuf]) {
    let violations = scan(files, |trimmed| {
        (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
            && trimmed.contains("dead_code")
    });

    if !violations.is_empty() {
        report(
            &violations,
            "#[allow(dead_code)] IS NOT ALLOWED",
            &[
                "Do NOT use #[allow(dead_code)] to silence warnings.",
                "  - DELETE unused code entirely",
                "  - If the code is for tests, use #[cfg(test)]",
            ],
        );
        panic!(
            "Build failed: {} file(s) contain #[allow(dead_code)]. Remove the dead code.",
            violations.len()
        );
    }
}

/// Bans tests that silently skip instead of failing.
fn enforce_no_test_skips(files: &[PathBuf]) {
    const SKIP_PATTERNS: &[&str] = &["Skipping test", "skipping test", "Test skipped"];

    let violations = scan(files, |trimmed| {
        (trimmed.starts_with("println!") || trimmed.starts_with("eprintln!"))
            && SKIP_PATTERNS.iter().any(|p| trimmed.contains(p))
    });

    if !violations.is_empty() {
        report(
            &violations,
            "SILENTLY SKIPPED TESTS ARE NOT ALLOWED",
            &["If a test cannot run it must FAIL, not print and return."],
        );
        panic!(
            "Build failed: {} file(s) contain skipped tests.",
            violations.len()
        );
    }
}
