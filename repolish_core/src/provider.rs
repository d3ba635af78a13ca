use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::RepolishError;
use crate::RepolishResult;
use crate::context::Context;
use crate::context::ContextMap;
use crate::context::MergedContext;
use crate::context::merge_context;
use crate::overrides::Overrides;
use crate::reconciler::Anchors;
use crate::render::render_str;
use crate::render::render_value;
use crate::render::value_has_template_syntax;

/// File name of the optional manifest inside a provider directory.
pub const PROVIDER_MANIFEST_FILE: &str = "repolish.provider.yaml";

/// Default directory (relative to the provider directory) holding templates.
pub const DEFAULT_TEMPLATES_DIR: &str = "templates";

/// Templates whose file name starts with this prefix are only produced
/// through a file mapping.
pub const MAPPED_ONLY_PREFIX: &str = "_repolish.";

type WithoutInputFn = dyn Fn() -> RepolishResult<ContextMap>;
type WithMergedContextFn = dyn Fn(&ContextMap) -> RepolishResult<ContextMap>;

/// How a provider produces its context contribution.
pub enum ContextFactory {
	/// The contribution does not depend on other providers.
	WithoutInput(Box<WithoutInputFn>),
	/// The contribution is computed from the context accumulated so far.
	WithMergedContext(Box<WithMergedContextFn>),
}

impl ContextFactory {
	pub fn without_input(factory: impl Fn() -> RepolishResult<ContextMap> + 'static) -> Self {
		Self::WithoutInput(Box::new(factory))
	}

	pub fn with_merged_context(
		factory: impl Fn(&ContextMap) -> RepolishResult<ContextMap> + 'static,
	) -> Self {
		Self::WithMergedContext(Box::new(factory))
	}

	/// A factory that always returns a copy of `map`.
	pub fn fixed(map: ContextMap) -> Self {
		Self::without_input(move || Ok(map.clone()))
	}

	pub fn invoke(&self, accumulated: &ContextMap) -> RepolishResult<ContextMap> {
		match self {
			Self::WithoutInput(factory) => factory(),
			Self::WithMergedContext(factory) => factory(accumulated),
		}
	}

	pub fn takes_merged_context(&self) -> bool {
		matches!(self, Self::WithMergedContext(_))
	}
}

impl fmt::Debug for ContextFactory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::WithoutInput(_) => f.write_str("ContextFactory::WithoutInput"),
			Self::WithMergedContext(_) => f.write_str("ContextFactory::WithMergedContext"),
		}
	}
}

/// A source of context, anchors and templates.
pub trait Provider {
	/// Unique name of the provider within a project.
	fn id(&self) -> &str;

	/// Whether the provider supports provider-scoped mode.
	fn migrated(&self) -> bool;

	/// Called once when the provider is registered.
	fn context_factory(&self) -> ContextFactory;

	/// Anchor values contributed by the provider, computed from the merged
	/// context.
	fn anchors(&self, _context: &Context) -> RepolishResult<Anchors> {
		Ok(Anchors::new())
	}

	/// Project-relative paths to delete. A leading `!` keeps a path that an
	/// earlier source scheduled for deletion.
	fn delete_files(&self) -> Vec<String> {
		Vec::new()
	}

	/// Project-relative paths written only when they do not exist yet.
	fn create_only_files(&self) -> Vec<String> {
		Vec::new()
	}

	/// Destination path to template path. A `None` template leaves the
	/// destination out.
	fn file_mappings(&self, _context: &Context) -> RepolishResult<BTreeMap<String, Option<String>>> {
		Ok(BTreeMap::new())
	}

	/// Directory whose files are rendered into the project.
	fn templates_dir(&self) -> Option<PathBuf> {
		None
	}
}

/// A provider with its context factory resolved at registration.
pub struct RegisteredProvider {
	provider: Box<dyn Provider>,
	factory: ContextFactory,
}

impl RegisteredProvider {
	pub fn new(provider: impl Provider + 'static) -> Self {
		let factory = provider.context_factory();
		Self {
			provider: Box::new(provider),
			factory,
		}
	}

	pub fn id(&self) -> &str {
		self.provider.id()
	}

	pub fn migrated(&self) -> bool {
		self.provider.migrated()
	}

	pub fn factory(&self) -> &ContextFactory {
		&self.factory
	}

	pub fn provider(&self) -> &dyn Provider {
		self.provider.as_ref()
	}
}

impl fmt::Debug for RegisteredProvider {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RegisteredProvider")
			.field("id", &self.id())
			.field("migrated", &self.migrated())
			.field("factory", &self.factory)
			.finish()
	}
}

/// Where a delete decision came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSource {
	Provider(String),
	Project,
}

impl fmt::Display for DeleteSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Provider(id) => write!(f, "provider `{id}`"),
			Self::Project => f.write_str("project config"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
	Delete,
	Keep,
}

/// One step in the history of a path's deletion status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteDecision {
	pub source: DeleteSource,
	pub action: DeleteAction,
}

/// Deletion decisions per project-relative path, applied in provider order
/// and then the project config. The last decision for a path wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletePlan {
	history: BTreeMap<String, Vec<DeleteDecision>>,
}

impl DeletePlan {
	pub fn record(&mut self, entry: &str, source: &DeleteSource) {
		let (action, path) = match entry.strip_prefix('!') {
			Some(path) => (DeleteAction::Keep, path),
			None => (DeleteAction::Delete, entry),
		};
		let path = normalize_relative(path);
		if path.is_empty() {
			return;
		}

		self.history.entry(path).or_default().push(DeleteDecision {
			source: source.clone(),
			action,
		});
	}

	/// Paths whose final decision is to delete, sorted.
	pub fn paths(&self) -> impl Iterator<Item = &str> {
		self.history.iter().filter_map(|(path, decisions)| {
			(decisions.last().map(|d| d.action) == Some(DeleteAction::Delete)).then_some(path.as_str())
		})
	}

	pub fn is_deleted(&self, path: &str) -> bool {
		self.history
			.get(path)
			.and_then(|decisions| decisions.last())
			.is_some_and(|decision| decision.action == DeleteAction::Delete)
	}

	pub fn history(&self, path: &str) -> &[DeleteDecision] {
		self.history.get(path).map_or(&[], Vec::as_slice)
	}
}

/// Normalize a project-relative path to forward slashes without a leading
/// `./`.
pub fn normalize_relative(path: &str) -> String {
	let path = path.trim().replace('\\', "/");
	let mut path = path.as_str();
	while let Some(rest) = path.strip_prefix("./") {
		path = rest;
	}
	path.trim_start_matches('/').to_string()
}

/// A template written to a project path other than its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
	/// Project-relative path that receives the output.
	pub destination: String,
	/// Template path relative to a provider's templates directory.
	pub source: String,
}

/// True for templates that are skipped unless a file mapping names them.
pub fn is_mapped_only(template: &str) -> bool {
	template
		.rsplit('/')
		.next()
		.is_some_and(|name| name.starts_with(MAPPED_ONLY_PREFIX))
}

/// The providers of a project in declared order.
#[derive(Debug, Default)]
pub struct ProviderSet {
	providers: Vec<RegisteredProvider>,
}

impl ProviderSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, provider: impl Provider + 'static) {
		let registered = RegisteredProvider::new(provider);
		tracing::debug!(
			provider = registered.id(),
			factory = ?registered.factory(),
			"registered provider"
		);
		self.providers.push(registered);
	}

	pub fn providers(&self) -> &[RegisteredProvider] {
		&self.providers
	}

	pub fn len(&self) -> usize {
		self.providers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.providers.is_empty()
	}

	/// In provider-scoped mode every provider must be migrated. The error lists
	/// every offending provider.
	pub fn validate_scope(&self, provider_scoped: bool) -> RepolishResult<()> {
		if !provider_scoped {
			return Ok(());
		}

		let providers: Vec<String> = self
			.providers
			.iter()
			.filter(|provider| !provider.migrated())
			.map(|provider| provider.id().to_string())
			.collect();

		if providers.is_empty() {
			Ok(())
		} else {
			Err(RepolishError::ProviderScopeViolation { providers })
		}
	}

	pub fn merge_context(&self, seed: Option<&ContextMap>, overrides: &Overrides) -> RepolishResult<MergedContext> {
		merge_context(seed, &self.providers, overrides)
	}

	/// Provider anchors in provider order, then project anchors. Later sources
	/// replace earlier values for the same name.
	pub fn anchors(&self, context: &Context, project_anchors: &Anchors) -> RepolishResult<Anchors> {
		let mut anchors = Anchors::new();

		for provider in &self.providers {
			anchors.extend(provider.provider().anchors(context)?);
		}
		anchors.extend(project_anchors.iter().map(|(k, v)| (k.clone(), v.clone())));

		Ok(anchors)
	}

	pub fn delete_plan(&self, project_entries: &[String]) -> DeletePlan {
		let mut plan = DeletePlan::default();

		for provider in &self.providers {
			let source = DeleteSource::Provider(provider.id().to_string());
			for entry in provider.provider().delete_files() {
				plan.record(&entry, &source);
			}
		}
		for entry in project_entries {
			plan.record(entry, &DeleteSource::Project);
		}

		plan
	}

	pub fn create_only_files(&self) -> BTreeSet<String> {
		self.providers
			.iter()
			.flat_map(|provider| provider.provider().create_only_files())
			.map(|path| normalize_relative(&path))
			.collect()
	}

	/// File mappings of every provider, sorted by destination. A later
	/// provider replaces an earlier mapping for the same destination.
	pub fn file_mappings(&self, context: &Context) -> RepolishResult<Vec<FileMapping>> {
		let mut mappings = BTreeMap::new();

		for provider in &self.providers {
			for (destination, source) in provider.provider().file_mappings(context)? {
				let Some(source) = source else {
					tracing::debug!(provider = provider.id(), destination = %destination, "file mapping disabled");
					continue;
				};
				mappings.insert(normalize_relative(&destination), normalize_relative(&source));
			}
		}

		Ok(mappings
			.into_iter()
			.filter(|(destination, source)| !destination.is_empty() && !source.is_empty())
			.map(|(destination, source)| FileMapping { destination, source })
			.collect())
	}
}

/// Contents of `repolish.provider.yaml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderManifest {
	pub migrated: bool,
	pub context: ContextMap,
	pub anchors: BTreeMap<String, String>,
	pub delete_files: Vec<String>,
	pub create_only_files: Vec<String>,
	/// Destination to template path; `~` disables a destination.
	pub file_mappings: BTreeMap<String, Option<String>>,
}

impl ProviderManifest {
	/// Load the manifest from `directory`. A missing manifest is an empty one.
	pub fn load(directory: &Path) -> RepolishResult<Self> {
		let path = directory.join(PROVIDER_MANIFEST_FILE);
		if !path.is_file() {
			return Ok(Self::default());
		}

		let content = std::fs::read_to_string(&path)?;
		if content.trim().is_empty() {
			return Ok(Self::default());
		}

		serde_yaml_ng::from_str(&content).map_err(|e| {
			RepolishError::ProviderManifest {
				path: path.display().to_string(),
				reason: e.to_string(),
			}
		})
	}
}

/// A provider backed by a directory with an optional manifest and a
/// templates folder.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
	id: String,
	templates_dir: PathBuf,
	manifest: ProviderManifest,
}

impl DirectoryProvider {
	pub fn load(id: impl Into<String>, directory: impl AsRef<Path>, templates_dir: impl AsRef<Path>) -> RepolishResult<Self> {
		let directory = directory.as_ref();
		let manifest = ProviderManifest::load(directory)?;

		Ok(Self {
			id: id.into(),
			templates_dir: directory.join(templates_dir),
			manifest,
		})
	}

	pub fn from_manifest(id: impl Into<String>, directory: impl AsRef<Path>, manifest: ProviderManifest) -> Self {
		Self {
			id: id.into(),
			templates_dir: directory.as_ref().join(DEFAULT_TEMPLATES_DIR),
			manifest,
		}
	}
}

impl Provider for DirectoryProvider {
	fn id(&self) -> &str {
		&self.id
	}

	fn migrated(&self) -> bool {
		self.manifest.migrated
	}

	fn context_factory(&self) -> ContextFactory {
		let context = self.manifest.context.clone();
		let templated = context.values().any(value_has_template_syntax);

		if !templated {
			return ContextFactory::fixed(context);
		}

		ContextFactory::with_merged_context(move |accumulated| {
			let mut rendered = ContextMap::new();
			for (key, value) in &context {
				rendered.insert(key.clone(), render_value(value, accumulated)?);
			}
			Ok(rendered)
		})
	}

	fn anchors(&self, context: &Context) -> RepolishResult<Anchors> {
		let mut anchors = Anchors::new();
		for (name, value) in &self.manifest.anchors {
			anchors.insert(name.clone(), render_str(value, context)?);
		}
		Ok(anchors)
	}

	fn delete_files(&self) -> Vec<String> {
		self.manifest.delete_files.clone()
	}

	fn create_only_files(&self) -> Vec<String> {
		self.manifest.create_only_files.clone()
	}

	fn file_mappings(&self, context: &Context) -> RepolishResult<BTreeMap<String, Option<String>>> {
		let mut mappings = BTreeMap::new();
		for (destination, source) in &self.manifest.file_mappings {
			let source = source.as_deref().map(|source| render_str(source, context)).transpose()?;
			mappings.insert(render_str(destination, context)?, source);
		}
		Ok(mappings)
	}

	fn templates_dir(&self) -> Option<PathBuf> {
		Some(self.templates_dir.clone())
	}
}
