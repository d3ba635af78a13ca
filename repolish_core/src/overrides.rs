use std::fmt::Display;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

/// A dot-path (`a.b.0.c`) and the value that replaces whatever sits there.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
	pub path: String,
	pub value: Value,
}

impl Override {
	pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
		Self {
			path: path.into(),
			value: value.into(),
		}
	}
}

/// An ordered list of overrides. Applied first to last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides(Vec<Override>);

impl Overrides {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build overrides from a mapping whose keys are dot-paths or nested maps.
	///
	/// Nested non-empty objects are flattened so `{a: {b: 1}}` and `{"a.b": 1}`
	/// produce the same override. An empty object is kept as a value.
	pub fn from_map(map: &Map<String, Value>) -> Self {
		let mut overrides = Vec::new();
		flatten_into(&mut overrides, None, map);
		Self(overrides)
	}

	pub fn push(&mut self, item: Override) {
		self.0.push(item);
	}

	pub fn iter(&self) -> impl Iterator<Item = &Override> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Apply every override to `root`. Paths that cannot be resolved are
	/// skipped and reported as warnings; they never abort the merge.
	pub fn apply(&self, root: &mut Value) -> Vec<OverrideWarning> {
		let mut warnings = Vec::new();

		for item in &self.0 {
			if let Err(error) = apply_override(root, &item.path, item.value.clone()) {
				tracing::warn!(path = %item.path, %error, "skipping context override");
				warnings.push(OverrideWarning {
					path: item.path.clone(),
					error,
				});
			}
		}

		warnings
	}
}

impl FromIterator<Override> for Overrides {
	fn from_iter<T: IntoIterator<Item = Override>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl<'a> IntoIterator for &'a Overrides {
	type IntoIter = std::slice::Iter<'a, Override>;
	type Item = &'a Override;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

fn flatten_into(overrides: &mut Vec<Override>, prefix: Option<&str>, map: &Map<String, Value>) {
	for (key, value) in map {
		let path = match prefix {
			Some(prefix) => format!("{prefix}.{key}"),
			None => key.clone(),
		};

		match value {
			Value::Object(nested) if !nested.is_empty() => flatten_into(overrides, Some(&path), nested),
			_ => overrides.push(Override::new(path, value.clone())),
		}
	}
}

/// Why an override path could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverridePathError {
	#[error("override path is empty")]
	EmptyPath,
	#[error("key `{key}` does not exist at `{at}`")]
	MissingKey { key: String, at: String },
	#[error("`{segment}` is not a valid index into the sequence at `{at}`")]
	InvalidIndex { segment: String, at: String },
	#[error("index {index} is out of range for the sequence at `{at}` (length {len})")]
	IndexOutOfRange { index: usize, len: usize, at: String },
	#[error("cannot traverse into `{segment}` because `{at}` is not a mapping or sequence")]
	NotContainer { segment: String, at: String },
}

/// A recoverable problem applying a single override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideWarning {
	pub path: String,
	pub error: OverridePathError,
}

impl Display for OverrideWarning {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "override `{}` skipped: {}", self.path, self.error)
	}
}

/// Set the value at `path` inside `root`.
///
/// The final segment may add a new key to an existing mapping. Intermediate
/// segments must already exist.
pub fn apply_override(root: &mut Value, path: &str, value: Value) -> Result<(), OverridePathError> {
	if path.is_empty() {
		return Err(OverridePathError::EmptyPath);
	}

	let segments: Vec<&str> = path.split('.').collect();
	let (last, parents) = segments
		.split_last()
		.ok_or(OverridePathError::EmptyPath)?;

	let mut current = root;
	for (depth, segment) in parents.iter().enumerate() {
		let at = location(&segments[..depth]);
		current = step(current, segment, &at)?;
	}

	let at = location(parents);
	match current {
		Value::Object(map) => {
			map.insert((*last).to_string(), value);
			Ok(())
		}
		Value::Array(items) => {
			let index = parse_index(last, &at)?;
			let len = items.len();
			let slot = items
				.get_mut(index)
				.ok_or(OverridePathError::IndexOutOfRange { index, len, at })?;
			*slot = value;
			Ok(())
		}
		_ => {
			Err(OverridePathError::NotContainer {
				segment: (*last).to_string(),
				at,
			})
		}
	}
}

fn step<'v>(current: &'v mut Value, segment: &str, at: &str) -> Result<&'v mut Value, OverridePathError> {
	match current {
		Value::Object(map) => {
			map.get_mut(segment).ok_or_else(|| {
				OverridePathError::MissingKey {
					key: segment.to_string(),
					at: at.to_string(),
				}
			})
		}
		Value::Array(items) => {
			let index = parse_index(segment, at)?;
			let len = items.len();
			items.get_mut(index).ok_or_else(|| {
				OverridePathError::IndexOutOfRange {
					index,
					len,
					at: at.to_string(),
				}
			})
		}
		_ => {
			Err(OverridePathError::NotContainer {
				segment: segment.to_string(),
				at: at.to_string(),
			})
		}
	}
}

fn parse_index(segment: &str, at: &str) -> Result<usize, OverridePathError> {
	segment.parse().map_err(|_| {
		OverridePathError::InvalidIndex {
			segment: segment.to_string(),
			at: at.to_string(),
		}
	})
}

fn location(segments: &[&str]) -> String {
	if segments.is_empty() {
		"<root>".to_string()
	} else {
		segments.join(".")
	}
}
