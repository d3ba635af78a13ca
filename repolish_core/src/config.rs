use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Deserializer;
use serde::de::MapAccess;
use serde::de::Visitor;

use crate::RepolishError;
use crate::RepolishResult;
use crate::context::ContextMap;
use crate::diff::DiffOptions;
use crate::provider::DEFAULT_TEMPLATES_DIR;
use crate::reconciler::Anchors;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["repolish.yaml", "repolish.yml", ".repolish.yaml"];

/// Where a provider's files live.
///
/// ```yaml
/// providers:
///   base: ./providers/base
///   python:
///     directory: ./providers/python
///     templates_dir: files
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ProviderSource {
	Directory(PathBuf),
	Detailed {
		directory: PathBuf,
		#[serde(default = "default_templates_dir")]
		templates_dir: PathBuf,
	},
}

impl ProviderSource {
	pub fn directory(&self) -> &Path {
		match self {
			Self::Directory(directory) | Self::Detailed { directory, .. } => directory,
		}
	}

	pub fn templates_dir(&self) -> PathBuf {
		match self {
			Self::Directory(_) => default_templates_dir(),
			Self::Detailed { templates_dir, .. } => templates_dir.clone(),
		}
	}
}

fn default_templates_dir() -> PathBuf {
	PathBuf::from(DEFAULT_TEMPLATES_DIR)
}

/// Providers in the order they appear in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderEntries(Vec<(String, ProviderSource)>);

impl ProviderEntries {
	pub fn new(entries: Vec<(String, ProviderSource)>) -> Self {
		Self(entries)
	}

	pub fn get(&self, name: &str) -> Option<&ProviderSource> {
		self.0
			.iter()
			.find(|(entry, _)| entry == name)
			.map(|(_, source)| source)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}
}

impl<'de> Deserialize<'de> for ProviderEntries {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct EntriesVisitor;

		impl<'de> Visitor<'de> for EntriesVisitor {
			type Value = ProviderEntries;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("a mapping of provider names to directories")
			}

			fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
				Ok(ProviderEntries::default())
			}

			fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
				let mut entries: Vec<(String, ProviderSource)> = Vec::new();
				while let Some((name, source)) = map.next_entry::<String, ProviderSource>()? {
					if entries.iter().any(|(existing, _)| *existing == name) {
						return Err(serde::de::Error::custom(format!("duplicate provider `{name}`")));
					}
					entries.push((name, source));
				}
				Ok(ProviderEntries(entries))
			}
		}

		deserializer.deserialize_map(EntriesVisitor)
	}
}

/// Configuration loaded from `repolish.yaml`.
///
/// ```yaml
/// context:
///   project_name: demo
/// context_overrides:
///   tools.python: "3.12"
/// anchors:
///   readme-intro: "Local introduction."
/// providers_order: [base, python]
/// providers:
///   base: ./providers/base
///   python: { directory: ./providers/python }
/// delete_files: [setup.py, "!setup.cfg"]
/// provider_scoped: false
/// preserve_line_endings: false
/// post_process: ["dprint fmt"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepolishConfig {
	/// Seed context. Project values win over provider values.
	pub context: ContextMap,
	/// Dot-path keys (or nested maps) applied after every other layer.
	pub context_overrides: ContextMap,
	/// Project anchors. These win over provider anchors with the same name.
	pub anchors: Anchors,
	/// Explicit provider order. Defaults to the order of `providers`.
	pub providers_order: Vec<String>,
	pub providers: ProviderEntries,
	/// Project-relative paths to delete; a leading `!` keeps a path.
	pub delete_files: Vec<String>,
	/// Require every provider to be migrated.
	pub provider_scoped: bool,
	/// Compare files byte-for-byte without normalizing line endings.
	pub preserve_line_endings: bool,
	/// Shell commands run over the generated files before they are compared
	/// or written, e.g. formatters.
	pub post_process: Vec<String>,
}

impl RepolishConfig {
	/// Find the config file path by checking supported candidates in
	/// precedence order.
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> RepolishResult<Option<Self>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		Self::load_from(&config_path).map(Some)
	}

	/// Load the config from an explicit path.
	pub fn load_from(path: &Path) -> RepolishResult<Self> {
		let content = std::fs::read_to_string(path)?;
		Self::parse(&content)
	}

	pub fn parse(content: &str) -> RepolishResult<Self> {
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_yaml_ng::from_str(content).map_err(|e| RepolishError::ConfigParse(e.to_string()))
	}

	/// Providers in merge order.
	///
	/// With `providers_order` set, listed providers come first in that order.
	/// Declared providers missing from the list follow in declaration order
	/// with a warning. A listed name that is not declared is an error.
	pub fn ordered_providers(&self) -> RepolishResult<Vec<(&str, &ProviderSource)>> {
		if self.providers_order.is_empty() {
			return Ok(self
				.providers
				.0
				.iter()
				.map(|(name, source)| (name.as_str(), source))
				.collect());
		}

		let mut ordered: Vec<(&str, &ProviderSource)> = Vec::with_capacity(self.providers.len());
		for name in &self.providers_order {
			let source = self
				.providers
				.get(name)
				.ok_or_else(|| RepolishError::UnknownProvider(name.clone()))?;
			if ordered.iter().any(|(existing, _)| existing == name) {
				continue;
			}
			ordered.push((name.as_str(), source));
		}

		for (name, source) in &self.providers.0 {
			if ordered.iter().any(|(existing, _)| existing == name) {
				continue;
			}
			tracing::warn!(provider = %name, "provider missing from providers_order, appending it");
			ordered.push((name.as_str(), source));
		}

		Ok(ordered)
	}

	/// Diff options from the config, with `force_preserve` taking precedence
	/// when set.
	pub fn diff_options(&self, force_preserve: bool) -> DiffOptions {
		DiffOptions {
			preserve_line_endings: force_preserve || self.preserve_line_endings,
		}
	}
}

/// Written by `repolish init`.
pub const SAMPLE_CONFIG: &str = r#"# repolish configuration
context:
  project_name: my-project

context_overrides: {}

anchors: {}

providers:
  base: ./providers/base

delete_files: []

provider_scoped: false
preserve_line_endings: false

post_process: []
"#;
