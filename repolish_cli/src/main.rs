use std::path::Path;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use owo_colors::OwoColorize;
use repolish_cli::Commands;
use repolish_cli::OutputFormat;
use repolish_cli::RepolishCli;
use repolish_cli::env_flag_enabled;
use repolish_core::Anchors;
use repolish_core::CheckReport;
use repolish_core::FileStatus;
use repolish_core::ProjectContext;
use repolish_core::RepolishConfig;
use repolish_core::SAMPLE_CONFIG;
use repolish_core::check_plan;
use repolish_core::compute_plan;
use repolish_core::load_project;
use repolish_core::reconcile_text;
use repolish_core::write_plan;
use tracing_subscriber::EnvFilter;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

const PRESERVE_LINE_ENDINGS_ENV: &str = "REPOLISH_PRESERVE_LINE_ENDINGS";

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,yellow) => {
		if color_enabled() {
			format!("{}", $text.yellow())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
	let args = RepolishCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	init_tracing(args.verbose);

	let result = match &args.command {
		Some(Commands::Init) => run_init(&args),
		Some(Commands::Check { diff, format }) => run_check(&args, *diff, *format),
		Some(Commands::Apply { dry_run }) => run_apply(&args, *dry_run),
		Some(Commands::Preview {
			template,
			target,
			anchors,
		}) => run_preview(template, target.as_deref(), anchors),
		Some(Commands::Context) => run_context(&args),
		None => {
			eprintln!("No subcommand specified. Run `repolish --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		// Render through miette for error codes and help text.
		match e.downcast::<repolish_core::RepolishError>() {
			Ok(error) => {
				let report: miette::Report = (*error).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Logs go to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
	let fallback = if verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(color_enabled())
		.with_target(false)
		.without_time()
		.init();
}

fn resolve_root(args: &RepolishCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn load(args: &RepolishCli) -> CliResult<ProjectContext> {
	let root = resolve_root(args);
	let mut ctx = load_project(&root, args.config.as_deref())?;

	let env_value = std::env::var(PRESERVE_LINE_ENDINGS_ENV).ok();
	if env_flag_enabled(env_value.as_deref()) {
		ctx.diff_options.preserve_line_endings = true;
	}

	// stdout is reserved for `context` and `check --format json` output.
	if args.verbose {
		eprintln!("Loaded {} provider(s)", ctx.providers.len());
		for provider in ctx.providers.providers() {
			let migrated = if provider.migrated() { "migrated" } else { "not migrated" };
			eprintln!("  {} ({migrated}, {:?})", provider.id(), provider.factory());
		}
	}

	Ok(ctx)
}

fn run_init(args: &RepolishCli) -> CliResult<()> {
	let root = resolve_root(args);

	if let Some(existing) = RepolishConfig::resolve_path(&root) {
		println!("Config file already exists: {}", existing.display());
		return Ok(());
	}

	let config_path = root.join("repolish.yaml");
	std::fs::write(&config_path, SAMPLE_CONFIG)?;
	println!("Created {}", config_path.display());
	println!();
	println!("Next steps:");
	println!("  1. Point `providers` at directories containing a `templates/` folder");
	println!("  2. Mark local customizations in templates:");
	println!("     ## repolish-start[name] ... ## repolish-end[name]");
	println!("  3. Run `repolish apply` to generate files");

	Ok(())
}

fn run_check(args: &RepolishCli, show_diff: bool, format: OutputFormat) -> CliResult<()> {
	let ctx = load(args)?;
	let plan = compute_plan(&ctx)?;
	let report = check_plan(&ctx, &plan)?;

	match format {
		OutputFormat::Json => {
			let files: Vec<_> = report.changed().collect();
			let output = serde_json::json!({
				"ok": !report.has_changes(),
				"files": files,
			});
			println!("{}", serde_json::to_string_pretty(&output)?);
		}
		OutputFormat::Text => {
			if report.has_changes() {
				print_check_failure(&report, show_diff);
			} else {
				println!("Check passed: all files are up to date.");
			}
		}
	}

	if report.has_changes() {
		process::exit(1);
	}

	Ok(())
}

fn print_check_failure(report: &CheckReport, show_diff: bool) {
	eprintln!("Check failed.");
	for result in report.changed() {
		let label = status_label(result.status);
		eprintln!("  {label} {}", display_path(&result.path));

		if show_diff {
			if let Some(diff) = &result.diff {
				print_diff(diff);
			}
		}
	}

	eprintln!();
	eprintln!("{}", check_summary(report));
}

fn check_summary(report: &CheckReport) -> String {
	let mut parts = Vec::new();
	for (status, noun) in [
		(FileStatus::New, "new"),
		(FileStatus::Changed, "changed"),
		(FileStatus::Deleted, "to delete"),
	] {
		let count = report.count(status);
		if count > 0 {
			parts.push(format!("{count} {noun}"));
		}
	}
	format!("{} file(s) out of date. Run `repolish apply` to fix.", parts.join(", "))
}

fn status_label(status: FileStatus) -> String {
	let label = format!("{status:<9}");
	match status {
		FileStatus::New => colored!(label, green),
		FileStatus::Changed => colored!(label, yellow),
		FileStatus::Deleted => colored!(label, red),
		FileStatus::Unchanged => label,
	}
}

fn run_apply(args: &RepolishCli, dry_run: bool) -> CliResult<()> {
	let ctx = load(args)?;
	let plan = compute_plan(&ctx)?;

	if args.verbose {
		for path in &plan.skipped {
			println!("Skipped existing create-only file {path}");
		}
	}

	if dry_run {
		let report = check_plan(&ctx, &plan)?;
		if !report.has_changes() {
			println!("Dry run: all files are up to date.");
			return Ok(());
		}

		println!("Dry run: the following files would change:");
		for result in report.changed() {
			println!("  {} {}", status_label(result.status), display_path(&result.path));
			if args.verbose {
				if let Some(diff) = &result.diff {
					print_diff(diff);
				}
			}
		}
		return Ok(());
	}

	let summary = write_plan(&ctx, &plan)?;
	if summary.written.is_empty() && summary.deleted.is_empty() {
		println!("All files are up to date.");
		return Ok(());
	}

	for path in &summary.written {
		println!("  {} {path}", colored!("wrote", green));
	}
	for path in &summary.deleted {
		println!("  {} {path}", colored!("deleted", red));
	}
	println!(
		"Wrote {} file(s), deleted {} file(s).",
		summary.written.len(),
		summary.deleted.len()
	);

	Ok(())
}

fn run_preview(template: &Path, target: Option<&Path>, anchors: &[(String, String)]) -> CliResult<()> {
	let source = std::fs::read_to_string(template)?;
	let existing = target.map(std::fs::read_to_string).transpose()?;
	let anchors: Anchors = anchors.iter().cloned().collect();

	let output = reconcile_text(&source, existing.as_deref(), &anchors)?;
	print!("{output}");

	Ok(())
}

fn run_context(args: &RepolishCli) -> CliResult<()> {
	let ctx = load(args)?;
	println!("{}", serde_json::to_string_pretty(&ctx.merged.context)?);

	if !ctx.merged.warnings.is_empty() {
		eprintln!(
			"{} {} override(s) could not be applied",
			colored!("warning:", yellow),
			ctx.merged.warnings.len()
		);
	}

	Ok(())
}

fn print_diff(diff: &str) {
	for line in diff.lines() {
		if line.starts_with("+++") || line.starts_with("---") {
			eprintln!("    {}", colored!(line, bold));
		} else if line.starts_with('+') {
			eprintln!("    {}", colored!(line, green));
		} else if line.starts_with('-') {
			eprintln!("    {}", colored!(line, red));
		} else if line.starts_with("@@") {
			eprintln!("    {}", colored!(line, yellow));
		} else {
			eprintln!("    {line}");
		}
	}
}

fn display_path(path: &Path) -> String {
	path.display().to_string().replace('\\', "/")
}
