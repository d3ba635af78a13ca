use derive_more::Deref;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::RepolishResult;
use crate::overrides::OverrideWarning;
use crate::overrides::Overrides;
use crate::provider::RegisteredProvider;

/// A mapping of context keys to JSON values. Keys are kept sorted so
/// serialization is reproducible.
pub type ContextMap = Map<String, Value>;

/// The merged, read-only context used to render every template of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deref)]
#[serde(transparent)]
pub struct Context(ContextMap);

impl Context {
	/// Look up a value by dot-path. Numeric segments index into sequences.
	pub fn lookup(&self, path: &str) -> Option<&Value> {
		let mut segments = path.split('.');
		let mut current = self.0.get(segments.next()?)?;

		for segment in segments {
			current = match current {
				Value::Object(map) => map.get(segment)?,
				Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
				_ => return None,
			};
		}

		Some(current)
	}
}

impl From<ContextMap> for Context {
	fn from(map: ContextMap) -> Self {
		Self(map)
	}
}

/// The outcome of a context merge.
#[derive(Debug, Clone, Default)]
pub struct MergedContext {
	pub context: Context,
	/// Each provider's own contribution, in merge order.
	pub provider_contexts: Vec<(String, ContextMap)>,
	/// Overrides that could not be applied.
	pub warnings: Vec<OverrideWarning>,
}

/// Build the context for a run.
///
/// 1. Start from the project seed.
/// 2. Shallow-merge each provider's contribution in the given order; a later
///    provider replaces a whole top-level key.
/// 3. Re-apply the seed so project values win over provider values.
/// 4. Apply overrides by dot-path. Invalid paths are skipped with a warning.
///
/// Factory errors abort the merge.
pub fn merge_context(
	seed: Option<&ContextMap>,
	providers: &[RegisteredProvider],
	overrides: &Overrides,
) -> RepolishResult<MergedContext> {
	let mut accumulated = seed.cloned().unwrap_or_default();
	let mut provider_contexts = Vec::with_capacity(providers.len());

	for provider in providers {
		let contribution = provider.factory().invoke(&accumulated)?;
		tracing::debug!(
			provider = provider.id(),
			keys = ?contribution.keys().collect::<Vec<_>>(),
			"merging provider context"
		);

		for (key, value) in &contribution {
			accumulated.insert(key.clone(), value.clone());
		}
		provider_contexts.push((provider.id().to_string(), contribution));
	}

	if let Some(seed) = seed {
		for (key, value) in seed {
			accumulated.insert(key.clone(), value.clone());
		}
	}

	let mut root = Value::Object(accumulated);
	let warnings = overrides.apply(&mut root);
	let Value::Object(merged) = root else {
		unreachable!("overrides never replace the root object");
	};

	Ok(MergedContext {
		context: Context(merged),
		provider_contexts,
		warnings,
	})
}
