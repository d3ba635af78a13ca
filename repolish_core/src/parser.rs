use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;
use std::ops::Range;
use std::sync::LazyLock;

use fancy_regex::Captures;
use fancy_regex::Regex;

use crate::RepolishError;
use crate::RepolishResult;
use crate::lexer::Marker;
use crate::lexer::MarkerKind;
use crate::lexer::scan_line;

/// Matches a `key = "value"` line; the key may itself be double quoted.
static KEY_VALUE_LINE: LazyLock<regex::Regex> = LazyLock::new(|| {
	regex::Regex::new(r#"^\s*(")?([^"=\s]+)(")?\s*=\s*"([^"]*)""#).expect("key/value pattern is valid")
});

/// A byte range within the rendered template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
	pub start: usize,
	pub end: usize,
}

impl Span {
	pub fn new(start: usize, end: usize) -> Self {
		Self { start, end }
	}

	pub fn range(&self) -> Range<usize> {
		self.start..self.end
	}

	pub fn is_empty(&self) -> bool {
		self.start == self.end
	}

	/// True when the two spans share at least one byte, or when an empty span
	/// sits strictly inside `self`.
	pub fn overlaps(&self, other: &Span) -> bool {
		if other.is_empty() {
			return self.start < other.start && other.start < self.end;
		}
		self.start < other.end && other.start < self.end
	}
}

/// The kind of a preservation directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
	AnchorBlock,
	SingleRegex,
	MultiregexBlock,
}

impl Display for DirectiveKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::AnchorBlock => "anchor-block",
			Self::SingleRegex => "single-regex",
			Self::MultiregexBlock => "multiregex-block",
		};
		write!(f, "{name}")
	}
}

/// A default `key = "value"` line inside a multiregex block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultItem {
	pub key: String,
	/// Span of the value text between the quotes.
	pub value: Span,
}

/// Kind-specific data of a directive.
#[derive(Debug, Clone)]
pub enum PatchKind {
	AnchorBlock {
		start_marker: Span,
		end_marker: Span,
		default: Span,
	},
	SingleRegex {
		marker: Span,
		pattern: Regex,
		/// The region of the template replaced by the target's capture. `None`
		/// when the pattern does not match the text after the marker.
		default: Option<Span>,
	},
	MultiregexBlock {
		block_marker: Span,
		item_marker: Span,
		block_pattern: Regex,
		item_pattern: Regex,
		defaults: Vec<DefaultItem>,
	},
}

/// One preservation directive found in a rendered template.
#[derive(Debug, Clone)]
pub struct Patch {
	pub name: String,
	/// 1-indexed line of the directive's first marker.
	pub line: usize,
	/// Range covered by the marker lines and the default content.
	pub span: Span,
	pub kind: PatchKind,
}

impl Patch {
	pub fn directive_kind(&self) -> DirectiveKind {
		match self.kind {
			PatchKind::AnchorBlock { .. } => DirectiveKind::AnchorBlock,
			PatchKind::SingleRegex { .. } => DirectiveKind::SingleRegex,
			PatchKind::MultiregexBlock { .. } => DirectiveKind::MultiregexBlock,
		}
	}
}

/// A rendered template together with the directives found in it.
#[derive(Debug, Clone)]
pub struct Template {
	source: String,
	patches: Vec<Patch>,
}

impl Template {
	pub fn source(&self) -> &str {
		&self.source
	}

	/// Patches in order of their first marker.
	pub fn patches(&self) -> &[Patch] {
		&self.patches
	}

	pub fn text(&self, span: Span) -> &str {
		&self.source[span.range()]
	}

	/// The default content of a patch as it appears in the template.
	pub fn default_text(&self, patch: &Patch) -> Option<&str> {
		match &patch.kind {
			PatchKind::AnchorBlock { default, .. } => Some(self.text(*default)),
			PatchKind::SingleRegex { default, .. } => default.map(|span| self.text(span)),
			PatchKind::MultiregexBlock { .. } => None,
		}
	}

	pub fn find(&self, name: &str) -> Option<&Patch> {
		self.patches.iter().find(|patch| patch.name == name)
	}
}

/// A line of the template with its byte offsets.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
	number: usize,
	/// Offset of the first byte.
	start: usize,
	/// Offset just past the terminating newline, or the end of input.
	next: usize,
	text: &'a str,
}

impl Line<'_> {
	fn span(&self) -> Span {
		Span::new(self.start, self.next)
	}

	fn is_blank(&self) -> bool {
		self.text.trim().is_empty()
	}

	fn is_section_header(&self) -> bool {
		let trimmed = self.text.trim();
		trimmed.starts_with('[') && trimmed.contains(']')
	}
}

fn split_lines(source: &str) -> Vec<Line<'_>> {
	let mut lines = Vec::new();
	let mut start = 0;
	let mut number = 1;

	while start < source.len() {
		let (text_end, next) = match source[start..].find('\n') {
			Some(idx) => (start + idx, start + idx + 1),
			None => (source.len(), source.len()),
		};
		lines.push(Line {
			number,
			start,
			next,
			text: &source[start..text_end],
		});
		start = next;
		number += 1;
	}

	lines
}

struct OpenAnchor<'a> {
	name: &'a str,
	line: Line<'a>,
}

struct PendingBlock<'a> {
	line: Line<'a>,
	pattern: Regex,
}

/// Scan rendered template text for directive markers and return the parsed
/// template. Any directive syntax problem aborts parsing of this template.
pub fn extract_patches(source: impl Into<String>) -> RepolishResult<Template> {
	let source = source.into();
	let patches = parse_patches(&source)?;

	tracing::debug!(
		patches = ?patches.iter().map(|p| format!("{}[{}]", p.directive_kind(), p.name)).collect::<Vec<_>>(),
		"extracted directives"
	);

	Ok(Template { source, patches })
}

fn parse_patches(source: &str) -> RepolishResult<Vec<Patch>> {
	let lines = split_lines(source);
	let markers: Vec<Option<Marker<'_>>> = lines.iter().map(|line| scan_line(line.text)).collect();

	let mut patches = Vec::new();
	let mut declared: HashMap<&str, usize> = HashMap::new();
	let mut open_anchors: Vec<OpenAnchor<'_>> = Vec::new();
	let mut pending_blocks: HashMap<&str, PendingBlock<'_>> = HashMap::new();

	for (index, line) in lines.iter().enumerate() {
		let Some(marker) = &markers[index] else {
			continue;
		};

		match marker.kind {
			MarkerKind::AnchorStart => {
				declare(&mut declared, marker.name, line.number)?;
				open_anchors.push(OpenAnchor {
					name: marker.name,
					line: *line,
				});
			}
			MarkerKind::AnchorEnd => {
				let Some(position) = open_anchors.iter().rposition(|a| a.name == marker.name) else {
					tracing::warn!(
						name = marker.name,
						line = line.number,
						"ignoring anchor end marker without a start marker"
					);
					continue;
				};
				let open = open_anchors.remove(position);
				patches.push(Patch {
					name: open.name.to_string(),
					line: open.line.number,
					span: Span::new(open.line.start, line.next),
					kind: PatchKind::AnchorBlock {
						start_marker: open.line.span(),
						end_marker: line.span(),
						default: Span::new(open.line.next, line.start),
					},
				});
			}
			MarkerKind::Regex => {
				declare(&mut declared, marker.name, line.number)?;
				let pattern = compile(marker, line.number, false)?;
				if pattern.captures_len() < 2 {
					return Err(RepolishError::MissingCaptureGroup {
						name: marker.name.to_string(),
						line: line.number,
					});
				}

				let limit = next_marker_start(&lines, &markers, index + 1, source.len());
				let default = locate_regex_default(source, &pattern, line.next, limit);
				if default.is_none() {
					tracing::debug!(
						name = marker.name,
						line = line.number,
						"regex directive does not match its default content"
					);
				}

				patches.push(Patch {
					name: marker.name.to_string(),
					line: line.number,
					span: Span::new(line.start, default.map_or(line.next, |span| span.end)),
					kind: PatchKind::SingleRegex {
						marker: line.span(),
						pattern,
						default,
					},
				});
			}
			MarkerKind::MultiregexBlock => {
				declare(&mut declared, marker.name, line.number)?;
				let pattern = compile(marker, line.number, true)?;
				pending_blocks.insert(
					marker.name,
					PendingBlock {
						line: *line,
						pattern,
					},
				);
			}
			MarkerKind::MultiregexItem => {
				let Some(block) = pending_blocks.remove(marker.name) else {
					return Err(RepolishError::OrphanItemMarker {
						name: marker.name.to_string(),
						line: line.number,
					});
				};
				let item_pattern = compile(marker, line.number, false)?;
				let (defaults, body_end) = collect_default_items(&lines, &markers, index + 1, line.next);

				patches.push(Patch {
					name: marker.name.to_string(),
					line: block.line.number,
					span: Span::new(block.line.start, body_end),
					kind: PatchKind::MultiregexBlock {
						block_marker: block.line.span(),
						item_marker: line.span(),
						block_pattern: block.pattern,
						item_pattern,
						defaults,
					},
				});
			}
		}
	}

	if let Some(open) = open_anchors.into_iter().next() {
		return Err(RepolishError::UnterminatedAnchor {
			name: open.name.to_string(),
			line: open.line.number,
		});
	}

	if let Some(block) = pending_blocks.into_values().min_by_key(|block| block.line.number) {
		let name = markers[block.line.number - 1]
			.as_ref()
			.map_or_else(String::new, |marker| marker.name.to_string());
		return Err(RepolishError::MissingItemMarker {
			name,
			line: block.line.number,
		});
	}

	patches.sort_by_key(|patch| patch.span.start);
	Ok(patches)
}

fn declare<'a>(declared: &mut HashMap<&'a str, usize>, name: &'a str, line: usize) -> RepolishResult<()> {
	if let Some(first_line) = declared.get(name) {
		return Err(RepolishError::DuplicateDirective {
			name: name.to_string(),
			line,
			first_line: *first_line,
		});
	}
	declared.insert(name, line);
	Ok(())
}

fn compile(marker: &Marker<'_>, line: usize, dot_matches_new_line: bool) -> RepolishResult<Regex> {
	let pattern = marker.pattern.unwrap_or_default();
	let flags = if dot_matches_new_line { "(?ms)" } else { "(?m)" };

	Regex::new(&format!("{flags}{}", absolute_end_anchor(pattern))).map_err(|e| {
		RepolishError::InvalidDirectivePattern {
			name: marker.name.to_string(),
			line,
			reason: e.to_string(),
		}
	})
}

/// Directive patterns write `\Z` for the very end of the input, which is
/// spelled `\z` here.
fn absolute_end_anchor(pattern: &str) -> Cow<'_, str> {
	if !pattern.contains(r"\Z") {
		return Cow::Borrowed(pattern);
	}

	let mut rewritten = String::with_capacity(pattern.len());
	let mut chars = pattern.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			rewritten.push(c);
			continue;
		}
		match chars.next() {
			Some('Z') => rewritten.push_str(r"\z"),
			Some(escaped) => {
				rewritten.push('\\');
				rewritten.push(escaped);
			}
			None => rewritten.push('\\'),
		}
	}

	Cow::Owned(rewritten)
}

/// Captures of the first match at or after `from`. A pattern that exceeds the
/// backtracking limit counts as not matching.
pub(crate) fn captures_from<'h>(pattern: &Regex, haystack: &'h str, from: usize) -> Option<Captures<'h>> {
	match pattern.captures_from_pos(haystack, from) {
		Ok(captures) => captures,
		Err(error) => {
			tracing::warn!(pattern = pattern.as_str(), %error, "pattern failed to run, treating it as no match");
			None
		}
	}
}

/// Offset of the first marker line at or after `from`, or `fallback`.
fn next_marker_start(lines: &[Line<'_>], markers: &[Option<Marker<'_>>], from: usize, fallback: usize) -> usize {
	(from..lines.len())
		.find(|&index| markers[index].is_some())
		.map_or(fallback, |index| lines[index].start)
}

/// Find the template region a regex directive replaces: the first capture of
/// the first match between the marker line and the next marker, trimmed to
/// its indentation-contiguous block.
fn locate_regex_default(source: &str, pattern: &Regex, from: usize, limit: usize) -> Option<Span> {
	let haystack = &source[..limit];
	let capture = captures_from(pattern, haystack, from)?.get(1)?;
	let trimmed = trim_block_by_indent(capture.as_str());

	Some(Span::new(capture.start(), capture.start() + trimmed.len()))
}

/// Trim a captured block to its first line plus the following lines indented
/// at least as far as the first line. Blank lines inside the block are kept,
/// trailing blank lines are padding and are left out.
pub fn trim_block_by_indent(block: &str) -> &str {
	let mut lines = block.split_inclusive('\n');
	let Some(first) = lines.next() else {
		return block;
	};

	let anchor_indent = indent_width(first);
	let mut kept = first.len();
	let mut end = first.len();
	for line in lines {
		if line.trim().is_empty() {
			end += line.len();
			continue;
		}
		if indent_width(line) < anchor_indent {
			break;
		}
		end += line.len();
		kept = end;
	}

	&block[..kept]
}

fn indent_width(line: &str) -> usize {
	line.len() - line.trim_start_matches(' ').len()
}

/// Collect the default `key = "value"` lines that follow a multiregex item
/// marker. Section headers before the first item belong to the body. After
/// that the body ends at the first blank line, section header, marker line or
/// end of input. Returns the items and the offset where the body ends.
fn collect_default_items(
	lines: &[Line<'_>],
	markers: &[Option<Marker<'_>>],
	from: usize,
	body_start: usize,
) -> (Vec<DefaultItem>, usize) {
	let mut defaults = Vec::new();
	let mut body_end = body_start;

	for index in from..lines.len() {
		let line = &lines[index];
		if markers[index].is_some() || line.is_blank() {
			break;
		}
		if line.is_section_header() {
			if !defaults.is_empty() {
				break;
			}
			body_end = line.next;
			continue;
		}

		if let Some(captures) = KEY_VALUE_LINE.captures(line.text) {
			if let (Some(key), Some(value)) = (captures.get(2), captures.get(4)) {
				defaults.push(DefaultItem {
					key: key.as_str().to_string(),
					value: Span::new(line.start + value.start(), line.start + value.end()),
				});
			}
		}

		body_end = line.next;
	}

	(defaults, body_end)
}
