use std::collections::BTreeMap;
use std::collections::HashMap;

use fancy_regex::Captures;
use fancy_regex::Regex;

use crate::RepolishResult;
use crate::parser::DefaultItem;
use crate::parser::PatchKind;
use crate::parser::Span;
use crate::parser::Template;
use crate::parser::captures_from;
use crate::parser::extract_patches;
use crate::parser::trim_block_by_indent;

/// Anchor name to replacement text. Lookups are case-sensitive.
pub type Anchors = BTreeMap<String, String>;

/// A single text replacement against the rendered template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
	span: Span,
	text: String,
}

impl Edit {
	fn remove(span: Span) -> Self {
		Self {
			span,
			text: String::new(),
		}
	}

	fn conflicts_with(&self, other: &Edit) -> bool {
		self.span.overlaps(&other.span) || other.span.overlaps(&self.span)
	}
}

/// Produce the final text for a rendered template.
///
/// Directives are applied in a fixed precedence: anchor blocks, then single
/// regex directives, then multiregex blocks. When a present anchor replaces a
/// region, any lower-precedence directive inside that region is discarded.
/// Marker lines never survive into the output.
pub fn reconcile(template: &Template, target: Option<&str>, anchors: &Anchors) -> String {
	let mut accepted: Vec<Edit> = Vec::new();

	for edit in anchor_edits(template, anchors)
		.into_iter()
		.chain(regex_edits(template, target))
		.chain(multiregex_edits(template, target))
	{
		if accepted.iter().any(|existing| existing.conflicts_with(&edit)) {
			tracing::debug!(span = ?edit.span, "dropping edit shadowed by a higher precedence directive");
			continue;
		}
		accepted.push(edit);
	}

	apply_edits(template.source(), accepted)
}

/// Parse `source` for directives and reconcile it in one step.
pub fn reconcile_text(source: &str, target: Option<&str>, anchors: &Anchors) -> RepolishResult<String> {
	let template = extract_patches(source)?;
	Ok(reconcile(&template, target, anchors))
}

fn anchor_edits(template: &Template, anchors: &Anchors) -> Vec<Edit> {
	let mut edits = Vec::new();

	for patch in template.patches() {
		let PatchKind::AnchorBlock {
			start_marker,
			end_marker,
			..
		} = &patch.kind
		else {
			continue;
		};

		if let Some(value) = anchors.get(&patch.name) {
			tracing::debug!(name = %patch.name, "replacing anchor block with anchor value");
			let mut text = value.clone();
			if template.text(patch.span).ends_with('\n') && !text.is_empty() && !text.ends_with('\n') {
				text.push('\n');
			}
			edits.push(Edit {
				span: patch.span,
				text,
			});
		} else {
			tracing::debug!(name = %patch.name, "no anchor value, keeping default");
			edits.push(Edit::remove(*start_marker));
			edits.push(Edit::remove(*end_marker));
		}
	}

	edits
}

fn regex_edits(template: &Template, target: Option<&str>) -> Vec<Edit> {
	let mut edits = Vec::new();

	for patch in template.patches() {
		let PatchKind::SingleRegex {
			marker,
			pattern,
			default,
		} = &patch.kind
		else {
			continue;
		};

		edits.push(Edit::remove(*marker));

		let Some(default) = default else {
			continue;
		};
		let Some(value) = target.and_then(|target| capture_value(pattern, target)) else {
			tracing::debug!(name = %patch.name, "regex not found in target, keeping default");
			continue;
		};

		tracing::debug!(name = %patch.name, "preserving regex capture from target");
		edits.push(Edit {
			span: *default,
			text: value.to_string(),
		});
	}

	edits
}

/// The first capture of the first match of `pattern`, trimmed to its
/// indentation-contiguous block.
fn capture_value<'h>(pattern: &Regex, target: &'h str) -> Option<&'h str> {
	let capture = captures_from(pattern, target, 0)?.get(1)?;
	Some(trim_block_by_indent(capture.as_str()))
}

fn multiregex_edits(template: &Template, target: Option<&str>) -> Vec<Edit> {
	let mut edits = Vec::new();

	for patch in template.patches() {
		let PatchKind::MultiregexBlock {
			block_marker,
			item_marker,
			block_pattern,
			item_pattern,
			defaults,
		} = &patch.kind
		else {
			continue;
		};

		edits.push(Edit::remove(*block_marker));
		edits.push(Edit::remove(*item_marker));

		let Some(region) = target.and_then(|target| block_region(block_pattern, target)) else {
			tracing::debug!(name = %patch.name, "block not found in target, keeping defaults");
			continue;
		};

		let values = collect_items(item_pattern, region);
		edits.extend(replace_default_values(defaults, &values));
	}

	edits
}

fn block_region<'h>(pattern: &Regex, target: &'h str) -> Option<&'h str> {
	let captures = captures_from(pattern, target, 0)?;
	captures.get(1).or_else(|| captures.get(0)).map(|m| m.as_str())
}

/// Run the item pattern over a block region and collect key/value pairs. A
/// later occurrence of the same key replaces an earlier one.
fn collect_items<'h>(pattern: &Regex, region: &'h str) -> HashMap<&'h str, &'h str> {
	let mut values = HashMap::new();

	for captures in pattern.captures_iter(region) {
		let captures = match captures {
			Ok(captures) => captures,
			Err(error) => {
				tracing::warn!(pattern = pattern.as_str(), %error, "item pattern failed to run, stopping");
				break;
			}
		};
		if let Some((key, value)) = item_key_value(pattern, &captures) {
			values.insert(key, value);
		}
	}

	values
}

fn item_key_value<'h>(pattern: &Regex, captures: &Captures<'h>) -> Option<(&'h str, &'h str)> {
	let has_named = |name: &str| pattern.capture_names().flatten().any(|n| n == name);

	let (key, value) = if has_named("key") && has_named("value") {
		(captures.name("key"), captures.name("value"))
	} else if pattern.captures_len() >= 5 {
		(captures.get(2), captures.get(4))
	} else {
		(captures.get(1), captures.get(2))
	};

	Some((key?.as_str(), value?.as_str()))
}

fn replace_default_values(defaults: &[DefaultItem], values: &HashMap<&str, &str>) -> Vec<Edit> {
	defaults
		.iter()
		.filter_map(|item| {
			values.get(item.key.as_str()).map(|value| {
				Edit {
					span: item.value,
					text: (*value).to_string(),
				}
			})
		})
		.collect()
}

/// Apply non-overlapping edits from the highest offset down so earlier
/// offsets stay valid.
fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
	edits.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.span.end.cmp(&a.span.end)));

	let mut result = source.to_string();
	for edit in edits {
		result.replace_range(edit.span.range(), &edit.text);
	}

	result
}
