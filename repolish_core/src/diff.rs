use std::borrow::Cow;
use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use similar::TextDiff;

/// Options controlling how candidate and existing content are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
	/// Compare bytes exactly instead of normalizing line endings first.
	pub preserve_line_endings: bool,
}

/// Classification of a single output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
	Unchanged,
	Changed,
	New,
	Deleted,
}

impl Display for FileStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let label = match self {
			Self::Unchanged => "unchanged",
			Self::Changed => "changed",
			Self::New => "new",
			Self::Deleted => "deleted",
		};
		f.pad(label)
	}
}

/// The dominant line-ending style of some content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineEnding {
	/// No line breaks at all.
	None,
	Lf,
	Crlf,
	Cr,
	Mixed,
}

/// The comparison result for a single output path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
	pub path: PathBuf,
	pub status: FileStatus,
	/// Unified diff from the existing content to the candidate. Only present
	/// for changed text files.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diff: Option<String>,
	pub candidate_len: usize,
	pub existing_len: Option<usize>,
	pub candidate_line_ending: LineEnding,
	pub existing_line_ending: Option<LineEnding>,
}

/// Replace `\r\n` and lone `\r` with `\n`.
pub fn normalize_line_endings(content: &str) -> Cow<'_, str> {
	if !content.contains('\r') {
		return Cow::Borrowed(content);
	}
	Cow::Owned(content.replace("\r\n", "\n").replace('\r', "\n"))
}

fn normalize_bytes(content: &[u8]) -> Cow<'_, [u8]> {
	if !content.contains(&b'\r') {
		return Cow::Borrowed(content);
	}

	let mut normalized = Vec::with_capacity(content.len());
	let mut iter = content.iter().copied().peekable();
	while let Some(byte) = iter.next() {
		if byte == b'\r' {
			if iter.peek() == Some(&b'\n') {
				iter.next();
			}
			normalized.push(b'\n');
		} else {
			normalized.push(byte);
		}
	}
	Cow::Owned(normalized)
}

/// Detect the line-ending style used by `content`.
pub fn detect_line_ending(content: &[u8]) -> LineEnding {
	let mut lf = 0usize;
	let mut crlf = 0usize;
	let mut cr = 0usize;

	let mut index = 0;
	while index < content.len() {
		match content[index] {
			b'\r' if content.get(index + 1) == Some(&b'\n') => {
				crlf += 1;
				index += 1;
			}
			b'\r' => cr += 1,
			b'\n' => lf += 1,
			_ => {}
		}
		index += 1;
	}

	match (lf > 0, crlf > 0, cr > 0) {
		(false, false, false) => LineEnding::None,
		(true, false, false) => LineEnding::Lf,
		(false, true, false) => LineEnding::Crlf,
		(false, false, true) => LineEnding::Cr,
		_ => LineEnding::Mixed,
	}
}

/// Compare freshly produced `candidate` content with what exists on disk.
pub fn compare(path: impl Into<PathBuf>, candidate: &[u8], existing: Option<&[u8]>, options: &DiffOptions) -> DiffResult {
	let path = path.into();
	let candidate_line_ending = detect_line_ending(candidate);

	let Some(existing) = existing else {
		return DiffResult {
			path,
			status: FileStatus::New,
			diff: None,
			candidate_len: candidate.len(),
			existing_len: None,
			candidate_line_ending,
			existing_line_ending: None,
		};
	};

	let same = if options.preserve_line_endings {
		candidate == existing
	} else {
		normalize_bytes(candidate) == normalize_bytes(existing)
	};

	let (status, diff) = if same {
		(FileStatus::Unchanged, None)
	} else {
		(FileStatus::Changed, text_diff(&path, candidate, existing, options))
	};

	DiffResult {
		path,
		status,
		diff,
		candidate_len: candidate.len(),
		existing_len: Some(existing.len()),
		candidate_line_ending,
		existing_line_ending: Some(detect_line_ending(existing)),
	}
}

/// A scheduled deletion. Returns `None` when there is nothing to delete.
pub fn compare_deletion(path: impl Into<PathBuf>, existing: Option<&[u8]>) -> Option<DiffResult> {
	let existing = existing?;
	Some(DiffResult {
		path: path.into(),
		status: FileStatus::Deleted,
		diff: None,
		candidate_len: 0,
		existing_len: Some(existing.len()),
		candidate_line_ending: LineEnding::None,
		existing_line_ending: Some(detect_line_ending(existing)),
	})
}

fn text_diff(path: &Path, candidate: &[u8], existing: &[u8], options: &DiffOptions) -> Option<String> {
	let candidate = std::str::from_utf8(candidate).ok()?;
	let existing = std::str::from_utf8(existing).ok()?;

	if options.preserve_line_endings {
		Some(unified_diff(path, existing, candidate))
	} else {
		Some(unified_diff(
			path,
			&normalize_line_endings(existing),
			&normalize_line_endings(candidate),
		))
	}
}

/// Unified diff from `old` to `new` with `a/` and `b/` headers.
pub fn unified_diff(path: &Path, old: &str, new: &str) -> String {
	let display = path.display().to_string().replace('\\', "/");
	TextDiff::from_lines(old, new)
		.unified_diff()
		.context_radius(3)
		.header(&format!("a/{display}"), &format!("b/{display}"))
		.to_string()
}

/// All comparison results of a run, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
	pub results: Vec<DiffResult>,
}

impl CheckReport {
	pub fn new(mut results: Vec<DiffResult>) -> Self {
		results.sort_by(|a, b| a.path.cmp(&b.path));
		Self { results }
	}

	/// True when any path is not `Unchanged`.
	pub fn has_changes(&self) -> bool {
		self.results
			.iter()
			.any(|result| result.status != FileStatus::Unchanged)
	}

	pub fn count(&self, status: FileStatus) -> usize {
		self.results
			.iter()
			.filter(|result| result.status == status)
			.count()
	}

	pub fn changed(&self) -> impl Iterator<Item = &DiffResult> {
		self.results
			.iter()
			.filter(|result| result.status != FileStatus::Unchanged)
	}
}
