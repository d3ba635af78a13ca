use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Keep generated project files in sync with provider templates.",
	long_about = "repolish renders provider templates into a project while preserving local \
	              customizations marked by directives in the templates.\n\nQuick start:\n  \
	              repolish init     Create a sample repolish.yaml\n  repolish check    Report \
	              files that differ from the templates\n  repolish apply    Write reconciled \
	              files\n  repolish context  Print the merged context"
)]
pub struct RepolishCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Path to the project root directory.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Path to the config file. Defaults to the first of `repolish.yaml`,
	/// `repolish.yml` or `.repolish.yaml` in the project root.
	#[arg(long, short, global = true)]
	pub config: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Create a sample `repolish.yaml` in the project root.
	///
	/// If a config file already exists this command is a no-op and exits
	/// successfully.
	Init,
	/// Check that every generated file matches what the templates produce.
	///
	/// Exits with status 1 when any file would be created, changed or
	/// deleted. Line endings are normalized before comparing unless
	/// `preserve_line_endings` is set in the config or
	/// `REPOLISH_PRESERVE_LINE_ENDINGS` is set in the environment.
	Check {
		/// Show a unified diff for each changed file.
		#[arg(long, default_value_t = false)]
		diff: bool,

		/// Output format for check results. Use `text` for human-readable
		/// output or `json` for programmatic consumption.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,
	},
	/// Render, reconcile and write every generated file.
	///
	/// Files scheduled for deletion are removed and create-only files that
	/// already exist are left untouched.
	Apply {
		/// Print what would change without writing to disk.
		#[arg(long, default_value_t = false)]
		dry_run: bool,
	},
	/// Reconcile a single template against an optional target file and print
	/// the result.
	///
	/// The template is used as-is; no rendering takes place.
	Preview {
		/// Template file containing directives.
		#[arg(long)]
		template: PathBuf,

		/// Existing file whose customizations should be preserved.
		#[arg(long)]
		target: Option<PathBuf>,

		/// Anchor value as `NAME=TEXT`. May be repeated.
		#[arg(long = "anchor", value_parser = parse_anchor)]
		anchors: Vec<(String, String)>,
	},
	/// Print the merged context as JSON.
	Context,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text output.
	#[default]
	Text,
	/// Machine-readable JSON output.
	Json,
}

/// Parse a `NAME=TEXT` anchor argument. `\n` in the text becomes a newline.
pub fn parse_anchor(value: &str) -> Result<(String, String), String> {
	let Some((name, text)) = value.split_once('=') else {
		return Err(format!("expected NAME=TEXT, got `{value}`"));
	};
	if name.is_empty() {
		return Err("anchor name must not be empty".to_string());
	}

	Ok((name.to_string(), text.replace("\\n", "\n")))
}

/// Truthy values of `REPOLISH_PRESERVE_LINE_ENDINGS`.
pub fn env_flag_enabled(value: Option<&str>) -> bool {
	value.is_some_and(|value| {
		matches!(
			value.trim().to_ascii_lowercase().as_str(),
			"1" | "true" | "yes"
		)
	})
}
