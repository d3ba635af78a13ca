use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum RepolishError {
	#[error(transparent)]
	#[diagnostic(code(repolish::io_error))]
	Io(#[from] std::io::Error),

	#[error("unterminated anchor block `{name}` starting on line {line}")]
	#[diagnostic(
		code(repolish::unterminated_anchor),
		help("add a line containing `repolish-end[{name}]` after the default content")
	)]
	UnterminatedAnchor { name: String, line: usize },

	#[error("duplicate directive name `{name}` on line {line} (first declared on line {first_line})")]
	#[diagnostic(
		code(repolish::duplicate_directive),
		help("directive names must be unique within a template")
	)]
	DuplicateDirective {
		name: String,
		line: usize,
		first_line: usize,
	},

	#[error("multiregex item marker `{name}` on line {line} has no preceding block marker")]
	#[diagnostic(
		code(repolish::orphan_item_marker),
		help("declare `repolish-multiregex-block[{name}]: <pattern>` before the item marker")
	)]
	OrphanItemMarker { name: String, line: usize },

	#[error("multiregex block marker `{name}` on line {line} is never followed by an item marker")]
	#[diagnostic(
		code(repolish::missing_item_marker),
		help("add `repolish-multiregex[{name}]: <pattern>` after the block marker")
	)]
	MissingItemMarker { name: String, line: usize },

	#[error("invalid pattern for directive `{name}` on line {line}: {reason}")]
	#[diagnostic(
		code(repolish::invalid_pattern),
		help("patterns follow `fancy-regex` syntax, which adds look-around and backreferences to the `regex` crate")
	)]
	InvalidDirectivePattern {
		name: String,
		line: usize,
		reason: String,
	},

	#[error("regex directive `{name}` on line {line} has no capture group")]
	#[diagnostic(
		code(repolish::missing_capture_group),
		help("wrap the value to preserve in parentheses, e.g. `version = \"(.+?)\"`")
	)]
	MissingCaptureGroup { name: String, line: usize },

	#[error("failed to process template `{path}`")]
	#[diagnostic(code(repolish::template))]
	InTemplate {
		path: String,
		#[source]
		source: Box<RepolishError>,
	},

	#[error("{} template(s) could not be processed", .errors.len())]
	#[diagnostic(
		code(repolish::templates),
		help("fix the reported templates; no files were written")
	)]
	Templates {
		#[related]
		errors: Vec<RepolishError>,
	},

	#[error("provider-scoped mode requires migrated providers; not migrated: {}", .providers.join(", "))]
	#[diagnostic(
		code(repolish::provider_scope_violation),
		help("set `migrated: true` in each provider manifest or disable `provider_scoped`")
	)]
	ProviderScopeViolation { providers: Vec<String> },

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(repolish::config_parse),
		help("check that repolish.yaml is valid YAML with `providers` and `context` mappings")
	)]
	ConfigParse(String),

	#[error("failed to load provider manifest `{path}`: {reason}")]
	#[diagnostic(code(repolish::provider_manifest))]
	ProviderManifest { path: String, reason: String },

	#[error("unknown provider `{0}` in providers_order")]
	#[diagnostic(
		code(repolish::unknown_provider),
		help("every name in `providers_order` must be declared under `providers`")
	)]
	UnknownProvider(String),

	#[error("post-process command `{command}` failed{}", .exit_code.map(|code| format!(" with exit code {code}")).unwrap_or_default())]
	#[diagnostic(
		code(repolish::post_process),
		help("post-process commands run inside `.repolish/post-process` over a copy of the generated files")
	)]
	PostProcess { command: String, exit_code: Option<i32> },

	#[error("template rendering failed: {0}")]
	#[diagnostic(code(repolish::template_render))]
	TemplateRender(String),
}

impl RepolishError {
	/// Returns true for errors raised while parsing directive markers.
	pub fn is_directive_syntax(&self) -> bool {
		match self {
			Self::UnterminatedAnchor { .. }
			| Self::DuplicateDirective { .. }
			| Self::OrphanItemMarker { .. }
			| Self::MissingItemMarker { .. }
			| Self::InvalidDirectivePattern { .. }
			| Self::MissingCaptureGroup { .. } => true,
			Self::InTemplate { source, .. } => source.is_directive_syntax(),
			Self::Templates { errors } => errors.iter().any(Self::is_directive_syntax),
			_ => false,
		}
	}

	pub(crate) fn in_template(path: impl Into<String>, source: RepolishError) -> Self {
		Self::InTemplate {
			path: path.into(),
			source: Box::new(source),
		}
	}
}

pub type RepolishResult<T> = Result<T, RepolishError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
