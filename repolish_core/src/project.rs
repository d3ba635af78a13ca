use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use ignore::WalkBuilder;

use crate::RepolishError;
use crate::RepolishResult;
use crate::config::RepolishConfig;
use crate::context::MergedContext;
use crate::diff::CheckReport;
use crate::diff::DiffOptions;
use crate::diff::FileStatus;
use crate::diff::compare;
use crate::diff::compare_deletion;
use crate::overrides::Overrides;
use crate::parser::extract_patches;
use crate::provider::DeletePlan;
use crate::provider::DirectoryProvider;
use crate::provider::FileMapping;
use crate::provider::ProviderSet;
use crate::provider::is_mapped_only;
use crate::provider::normalize_relative;
use crate::reconciler::Anchors;
use crate::reconciler::reconcile;
use crate::render::TemplateWarning;
use crate::render::find_undefined_variables;
use crate::render::has_template_syntax;
use crate::render::render_str;

/// A loaded project: config, providers and everything derived from them once
/// per invocation.
#[derive(Debug)]
pub struct ProjectContext {
	pub root: PathBuf,
	pub config: RepolishConfig,
	pub providers: ProviderSet,
	pub merged: MergedContext,
	/// Provider anchors merged with project anchors.
	pub anchors: Anchors,
	pub delete_plan: DeletePlan,
	pub create_only: BTreeSet<String>,
	pub file_mappings: Vec<FileMapping>,
	pub diff_options: DiffOptions,
}

/// Load the config at `config_path` (or discover it under `root`), register
/// its directory providers in order and build the merged context.
pub fn load_project(root: &Path, config_path: Option<&Path>) -> RepolishResult<ProjectContext> {
	let config = match config_path {
		Some(path) => RepolishConfig::load_from(path)?,
		None => RepolishConfig::load(root)?.unwrap_or_default(),
	};

	let mut providers = ProviderSet::new();
	for (name, source) in config.ordered_providers()? {
		let directory = root.join(source.directory());
		providers.register(DirectoryProvider::load(name, directory, source.templates_dir())?);
	}

	build_project(root, config, providers)
}

/// Build a project from an already populated provider set.
pub fn build_project(root: &Path, config: RepolishConfig, providers: ProviderSet) -> RepolishResult<ProjectContext> {
	providers.validate_scope(config.provider_scoped)?;

	let overrides = Overrides::from_map(&config.context_overrides);
	let merged = providers.merge_context(Some(&config.context), &overrides)?;
	let anchors = providers.anchors(&merged.context, &config.anchors)?;
	let delete_plan = providers.delete_plan(&config.delete_files);
	let create_only = providers.create_only_files();
	let file_mappings = providers.file_mappings(&merged.context)?;
	let diff_options = config.diff_options(false);

	Ok(ProjectContext {
		root: root.to_path_buf(),
		config,
		providers,
		merged,
		anchors,
		delete_plan,
		create_only,
		file_mappings,
		diff_options,
	})
}

/// A file the run will produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
	/// Project-relative path with forward slashes.
	pub path: String,
	pub absolute: PathBuf,
	pub content: Vec<u8>,
	/// Id of the provider whose template produced the file.
	pub provider: String,
	pub create_only: bool,
}

/// Everything a run would write or delete.
#[derive(Debug, Clone, Default)]
pub struct Plan {
	/// Files to write, sorted by path.
	pub files: Vec<PlannedFile>,
	/// Project-relative paths scheduled for deletion, sorted.
	pub deletions: Vec<String>,
	/// Create-only files left alone because they already exist.
	pub skipped: Vec<String>,
	/// File mappings whose template no provider has.
	pub missing_sources: Vec<FileMapping>,
	pub warnings: Vec<TemplateWarning>,
}

/// Render and reconcile every provider template.
///
/// Later providers replace files produced by earlier ones. A template named
/// by a file mapping is written to the mapped destinations instead of its own
/// path, and `_repolish.` templates nothing maps are skipped. Directive syntax
/// and render errors are collected for all templates, and the plan is
/// rejected when any occurred.
pub fn compute_plan(ctx: &ProjectContext) -> RepolishResult<Plan> {
	let mut files: BTreeMap<String, PlannedFile> = BTreeMap::new();
	let mut warnings = Vec::new();
	let mut errors = Vec::new();

	let mut destinations_by_source: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
	for mapping in &ctx.file_mappings {
		destinations_by_source
			.entry(mapping.source.as_str())
			.or_default()
			.push(mapping.destination.as_str());
	}
	let mut found_sources: BTreeSet<String> = BTreeSet::new();

	for provider in ctx.providers.providers() {
		let Some(templates_dir) = provider.provider().templates_dir() else {
			continue;
		};
		if !templates_dir.is_dir() {
			tracing::debug!(provider = provider.id(), dir = %templates_dir.display(), "no templates directory");
			continue;
		}

		for template_path in collect_templates(&templates_dir)? {
			let relative = relative_path(&templates_dir, &template_path);
			let destinations = match destinations_by_source.get(relative.as_str()) {
				Some(destinations) => {
					found_sources.insert(relative.clone());
					destinations.clone()
				}
				None if is_mapped_only(&relative) => {
					tracing::debug!(template = %relative, "template is only written through a file mapping, skipping");
					continue;
				}
				None => vec![relative.as_str()],
			};

			for destination in destinations {
				match plan_file(ctx, &template_path, destination, &mut warnings) {
					Ok(Some((path, content))) => {
						if let Some(previous) = files.get(&path) {
							tracing::debug!(
								path = %path,
								previous = %previous.provider,
								provider = provider.id(),
								"later provider replaces file"
							);
						}
						let create_only = ctx.create_only.contains(&path);
						files.insert(
							path.clone(),
							PlannedFile {
								absolute: ctx.root.join(&path),
								path,
								content,
								provider: provider.id().to_string(),
								create_only,
							},
						);
					}
					Ok(None) => {}
					Err(error) => errors.push(RepolishError::in_template(destination, error)),
				}
			}
		}
	}

	match errors.len() {
		0 => {}
		1 => return Err(errors.remove(0)),
		_ => return Err(RepolishError::Templates { errors }),
	}

	let missing_sources: Vec<FileMapping> = ctx
		.file_mappings
		.iter()
		.filter(|mapping| !found_sources.contains(&mapping.source))
		.cloned()
		.collect();
	for mapping in &missing_sources {
		tracing::warn!(
			destination = %mapping.destination,
			source = %mapping.source,
			"file mapping source not found in any provider"
		);
	}

	let deletions: Vec<String> = ctx.delete_plan.paths().map(String::from).collect();
	for path in &deletions {
		if files.remove(path).is_some() {
			tracing::debug!(path = %path, "file scheduled for deletion is not written");
		}
	}

	let mut skipped = Vec::new();
	files.retain(|path, file| {
		let keep = !(file.create_only && file.absolute.exists());
		if !keep {
			tracing::debug!(path = %path, "create-only file exists, skipping");
			skipped.push(path.clone());
		}
		keep
	});

	run_post_process(ctx, &mut files)?;

	Ok(Plan {
		files: files.into_values().collect(),
		deletions,
		skipped,
		missing_sources,
		warnings,
	})
}

/// Directory under the project root where post-process commands run over a
/// copy of the planned files.
pub const POST_PROCESS_DIR: &str = ".repolish/post-process";

/// Stage the planned files, run every `post_process` command in the staging
/// directory and read the results back into the plan. The staging directory
/// is removed afterwards.
fn run_post_process(ctx: &ProjectContext, files: &mut BTreeMap<String, PlannedFile>) -> RepolishResult<()> {
	let commands = &ctx.config.post_process;
	if commands.is_empty() {
		return Ok(());
	}

	let staging = ctx.root.join(POST_PROCESS_DIR);
	if staging.exists() {
		std::fs::remove_dir_all(&staging)?;
	}

	let outcome = stage_files(&staging, files)
		.and_then(|()| run_commands(commands, &staging))
		.and_then(|()| {
			for file in files.values_mut() {
				file.content = std::fs::read(staging.join(&file.path))?;
			}
			Ok(())
		});

	std::fs::remove_dir_all(&staging)?;
	outcome
}

fn stage_files(staging: &Path, files: &BTreeMap<String, PlannedFile>) -> RepolishResult<()> {
	std::fs::create_dir_all(staging)?;
	for file in files.values() {
		let path = staging.join(&file.path);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(&path, &file.content)?;
	}
	Ok(())
}

fn run_commands(commands: &[String], cwd: &Path) -> RepolishResult<()> {
	for command in commands {
		tracing::debug!(command = %command, "running post-process command");
		let status = shell(command).current_dir(cwd).status()?;
		if !status.success() {
			return Err(RepolishError::PostProcess {
				command: command.clone(),
				exit_code: status.code(),
			});
		}
	}
	Ok(())
}

fn shell(command: &str) -> Command {
	let mut shell = if cfg!(windows) {
		let mut shell = Command::new("cmd");
		shell.arg("/C");
		shell
	} else {
		let mut shell = Command::new("sh");
		shell.arg("-c");
		shell
	};
	shell.arg(command);
	shell
}

/// Render one template. Returns `None` when its rendered path has an empty
/// component and the file should not be produced.
fn plan_file(
	ctx: &ProjectContext,
	template_path: &Path,
	relative: &str,
	warnings: &mut Vec<TemplateWarning>,
) -> RepolishResult<Option<(String, Vec<u8>)>> {
	let context = &ctx.merged.context;

	let path = if has_template_syntax(relative) {
		let rendered = render_str(relative, context)?.replace('\\', "/");
		if rendered.split('/').any(|component| component.trim().is_empty()) {
			tracing::debug!(template = relative, "rendered path has an empty component, skipping");
			return Ok(None);
		}
		normalize_relative(&rendered)
	} else {
		relative.to_string()
	};

	let bytes = std::fs::read(template_path)?;
	let Ok(source) = String::from_utf8(bytes.clone()) else {
		tracing::debug!(path = %path, "binary template copied verbatim");
		return Ok(Some((path, bytes)));
	};

	let undefined = find_undefined_variables(&source, context);
	if !undefined.is_empty() {
		tracing::warn!(path = %path, variables = ?undefined, "template references undefined variables");
		warnings.push(TemplateWarning {
			path: PathBuf::from(&path),
			undefined_variables: undefined,
		});
	}

	let rendered = render_str(&source, context)?;
	let template = extract_patches(rendered)?;

	let existing = read_existing(&ctx.root.join(&path))?;
	let target = existing.as_deref().and_then(|bytes| std::str::from_utf8(bytes).ok());
	let output = reconcile(&template, target, &ctx.anchors);

	Ok(Some((path, output.into_bytes())))
}

fn collect_templates(dir: &Path) -> RepolishResult<Vec<PathBuf>> {
	let mut files = Vec::new();
	let walker = WalkBuilder::new(dir)
		.hidden(false)
		.ignore(false)
		.git_ignore(false)
		.git_global(false)
		.git_exclude(false)
		.parents(false)
		.build();

	for entry in walker {
		let entry = entry.map_err(|e| RepolishError::Io(std::io::Error::other(e.to_string())))?;
		if entry.file_type().is_some_and(|kind| kind.is_file()) {
			files.push(entry.into_path());
		}
	}

	// Sort for deterministic ordering.
	files.sort();
	Ok(files)
}

fn relative_path(base: &Path, path: &Path) -> String {
	let relative = path.strip_prefix(base).unwrap_or(path);
	normalize_relative(&relative.display().to_string())
}

/// The content of `path`, or `None` when it does not exist.
fn read_existing(path: &Path) -> RepolishResult<Option<Vec<u8>>> {
	match std::fs::read(path) {
		Ok(bytes) => Ok(Some(bytes)),
		Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
		Err(error) => Err(error.into()),
	}
}

/// Compare a plan against the files on disk.
pub fn check_plan(ctx: &ProjectContext, plan: &Plan) -> RepolishResult<CheckReport> {
	let mut results = Vec::with_capacity(plan.files.len() + plan.deletions.len());

	for file in &plan.files {
		let existing = read_existing(&file.absolute)?;
		results.push(compare(&file.path, &file.content, existing.as_deref(), &ctx.diff_options));
	}

	for path in &plan.deletions {
		let existing = read_existing(&ctx.root.join(path))?;
		if let Some(result) = compare_deletion(path, existing.as_deref()) {
			results.push(result);
		}
	}

	Ok(CheckReport::new(results))
}

/// Result of writing a plan to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
	pub written: Vec<String>,
	pub deleted: Vec<String>,
}

/// Write changed and new files and remove scheduled deletions.
pub fn write_plan(ctx: &ProjectContext, plan: &Plan) -> RepolishResult<WriteSummary> {
	let report = check_plan(ctx, plan)?;
	let mut summary = WriteSummary::default();

	for result in &report.results {
		let path = result.path.display().to_string();
		match result.status {
			FileStatus::Unchanged => {}
			FileStatus::Changed | FileStatus::New => {
				let Some(file) = plan.files.iter().find(|file| file.path == path) else {
					continue;
				};
				if let Some(parent) = file.absolute.parent() {
					std::fs::create_dir_all(parent)?;
				}
				std::fs::write(&file.absolute, &file.content)?;
				tracing::debug!(path = %path, status = %result.status, "wrote file");
				summary.written.push(path);
			}
			FileStatus::Deleted => {
				std::fs::remove_file(ctx.root.join(&path))?;
				tracing::debug!(path = %path, "deleted file");
				summary.deleted.push(path);
			}
		}
	}

	Ok(summary)
}
