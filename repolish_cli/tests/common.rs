#![allow(dead_code)]

use std::path::Path;

use assert_cmd::Command;

pub fn repolish_cmd() -> Command {
	let mut cmd = Command::cargo_bin("repolish").unwrap_or_else(|e| panic!("binary: {e}"));
	cmd.env("NO_COLOR", "1");
	cmd.env_remove("REPOLISH_PRESERVE_LINE_ENDINGS");
	cmd.env_remove("RUST_LOG");
	cmd
}

pub fn write_file(root: &Path, relative: &str, content: &str) {
	let path = root.join(relative);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).unwrap_or_else(|e| panic!("create dir: {e}"));
	}
	std::fs::write(&path, content).unwrap_or_else(|e| panic!("write {relative}: {e}"));
}

/// A project with one provider that renders `README.md` and `pyproject.toml`.
pub fn sample_project(root: &Path) {
	write_file(
		root,
		"repolish.yaml",
		"context:\n  name: demo\nproviders:\n  base: ./providers/base\n",
	);
	write_file(root, "providers/base/repolish.provider.yaml", "migrated: true\n");
	write_file(
		root,
		"providers/base/templates/README.md",
		"# {{ name }}\n<!-- repolish-start[intro] -->\nDefault intro\n<!-- repolish-end[intro] -->\n",
	);
	write_file(
		root,
		"providers/base/templates/pyproject.toml",
		"## repolish-regex[version]: ^version = \"(.+?)\"$\nversion = \"0.1.0\"\nname = \"{{ name }}\"\n",
	);
}
