use rstest::rstest;
use serde_json::json;
use similar_asserts::assert_eq;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::*;
use crate::lexer::MarkerKind;
use crate::lexer::scan_line;

struct StaticProvider {
	id: String,
	migrated: bool,
	context: ContextMap,
	delete_files: Vec<String>,
}

impl StaticProvider {
	fn new(id: &str, context: serde_json::Value) -> Self {
		Self {
			id: id.to_string(),
			migrated: true,
			context: context_map(context),
			delete_files: Vec::new(),
		}
	}

	fn unmigrated(mut self) -> Self {
		self.migrated = false;
		self
	}

	fn deleting(mut self, paths: &[&str]) -> Self {
		self.delete_files = paths.iter().map(ToString::to_string).collect();
		self
	}
}

impl Provider for StaticProvider {
	fn id(&self) -> &str {
		&self.id
	}

	fn migrated(&self) -> bool {
		self.migrated
	}

	fn context_factory(&self) -> ContextFactory {
		ContextFactory::fixed(self.context.clone())
	}

	fn delete_files(&self) -> Vec<String> {
		self.delete_files.clone()
	}
}

#[rstest]
#[case::anchor_start("## repolish-start[intro]", MarkerKind::AnchorStart, "intro", None)]
#[case::html_anchor_end("<!-- repolish-end[intro] -->", MarkerKind::AnchorEnd, "intro", None)]
#[case::regex("## repolish-regex[version]: (\\d+)", MarkerKind::Regex, "version", Some("(\\d+)"))]
#[case::regex_crlf("# repolish-regex[v]: (x)\r", MarkerKind::Regex, "v", Some("(x)"))]
#[case::block("// repolish-multiregex-block[tools]: ^a", MarkerKind::MultiregexBlock, "tools", Some("^a"))]
#[case::item("## repolish-multiregex[tools]: ^(\\w+)", MarkerKind::MultiregexItem, "tools", Some("^(\\w+)"))]
fn scans_marker_lines(
	#[case] line: &str,
	#[case] kind: MarkerKind,
	#[case] name: &str,
	#[case] pattern: Option<&str>,
) {
	let marker = scan_line(line).unwrap_or_else(|| panic!("no marker in {line:?}"));
	assert_eq!(marker.kind, kind);
	assert_eq!(marker.name, name);
	assert_eq!(marker.pattern, pattern);
}

#[rstest]
#[case::plain("just some text")]
#[case::empty_name("## repolish-start[]")]
#[case::unclosed("## repolish-start[intro")]
#[case::regex_without_colon("## repolish-regex[version] (x)")]
#[case::unknown_kind("## repolish-stop[intro]")]
fn ignores_non_marker_lines(#[case] line: &str) {
	assert!(scan_line(line).is_none());
}

#[test]
fn extracts_patches_in_order() -> RepolishResult<()> {
	let source = format!("{HEADER_TEMPLATE}{VERSION_TEMPLATE}{TOOLS_TEMPLATE}");
	let template = extract_patches(source)?;

	let kinds: Vec<(String, DirectiveKind, usize)> = template
		.patches()
		.iter()
		.map(|patch| (patch.name.clone(), patch.directive_kind(), patch.line))
		.collect();
	assert_eq!(
		kinds,
		vec![
			("header".to_string(), DirectiveKind::AnchorBlock, 1),
			("version".to_string(), DirectiveKind::SingleRegex, 4),
			("tools".to_string(), DirectiveKind::MultiregexBlock, 7),
		]
	);

	let header = template.find("header").unwrap_or_else(|| panic!("header patch"));
	assert_eq!(template.default_text(header), Some("# Default Header\n"));
	let version = template.find("version").unwrap_or_else(|| panic!("version patch"));
	assert_eq!(template.default_text(version), Some("0.0.0"));

	Ok(())
}

#[test]
fn multiregex_defaults_are_tracked() -> RepolishResult<()> {
	let template = extract_patches(TOOLS_TEMPLATE)?;
	let patch = template.find("tools").unwrap_or_else(|| panic!("tools patch"));
	let PatchKind::MultiregexBlock { defaults, .. } = &patch.kind else {
		panic!("expected a multiregex block, got {}", patch.directive_kind());
	};

	let items: Vec<(&str, &str)> = defaults
		.iter()
		.map(|item| (item.key.as_str(), template.text(item.value)))
		.collect();
	assert_eq!(items, vec![("uv", "0.0.0"), ("dprint", "0.0.0"), ("starship", "0.0.0")]);

	Ok(())
}

#[test]
fn multiregex_body_stops_at_blank_line() -> RepolishResult<()> {
	let source = format!("{TOOLS_TEMPLATE}\nextra = \"1\"\n");
	let template = extract_patches(source)?;
	let patch = template.find("tools").unwrap_or_else(|| panic!("tools patch"));
	let PatchKind::MultiregexBlock { defaults, .. } = &patch.kind else {
		panic!("expected a multiregex block");
	};
	assert_eq!(defaults.len(), 3);

	Ok(())
}

#[rstest]
#[case::unterminated("## repolish-start[a]\nx\n", "unterminated_anchor")]
#[case::duplicate("## repolish-start[a]\n## repolish-end[a]\n## repolish-regex[a]: (x)\nx\n", "duplicate")]
#[case::orphan_item("## repolish-multiregex[t]: (a) = (b)\n", "orphan")]
#[case::missing_item("## repolish-multiregex-block[t]: (a)\nx\n", "missing_item")]
#[case::invalid_pattern("## repolish-regex[v]: (unclosed\n", "invalid_pattern")]
#[case::unbalanced_look_ahead("## repolish-regex[v]: (x)(?=y\n", "invalid_pattern")]
#[case::no_capture("## repolish-regex[v]: abc\nabc\n", "no_capture")]
fn rejects_malformed_directives(#[case] source: &str, #[case] expected: &str) {
	let error = extract_patches(source).expect_err("directive syntax error");
	assert!(error.is_directive_syntax());

	let matched = match expected {
		"unterminated_anchor" => matches!(error, RepolishError::UnterminatedAnchor { ref name, line: 1 } if name == "a"),
		"duplicate" => {
			matches!(
				error,
				RepolishError::DuplicateDirective {
					line: 3,
					first_line: 1,
					..
				}
			)
		}
		"orphan" => matches!(error, RepolishError::OrphanItemMarker { line: 1, .. }),
		"missing_item" => matches!(error, RepolishError::MissingItemMarker { ref name, .. } if name == "t"),
		"invalid_pattern" => matches!(error, RepolishError::InvalidDirectivePattern { .. }),
		"no_capture" => matches!(error, RepolishError::MissingCaptureGroup { .. }),
		_ => false,
	};
	assert!(matched, "unexpected error: {error:?}");
}

#[test]
fn look_around_patterns_compile() -> RepolishResult<()> {
	let output = reconcile_text("## repolish-regex[v]: (x+)(?=y)\nxy\n", Some("xxxy\n"), &Anchors::new())?;
	assert_eq!(output, "xxxy\n");

	Ok(())
}

#[test]
fn multiregex_header_after_markers_belongs_to_the_body() -> RepolishResult<()> {
	let source = r#"## repolish-multiregex-block[tools]: ^\[tools\](.*?)(?=\n\[|\Z)
## repolish-multiregex[tools]: ^(")?([^"=\s]+)(")?\s*=\s*"([^"]+)"$
[tools]
uv = "0.0.0"
"#;
	let template = extract_patches(source)?;
	let patch = template.find("tools").unwrap_or_else(|| panic!("tools patch"));
	let PatchKind::MultiregexBlock { defaults, .. } = &patch.kind else {
		panic!("expected a multiregex block");
	};
	assert_eq!(defaults.len(), 1);

	let output = reconcile(&template, Some("[tools]\nuv = \"0.7.20\"\n"), &Anchors::new());
	assert_eq!(output, "[tools]\nuv = \"0.7.20\"\n");

	Ok(())
}

#[test]
#[traced_test]
fn stray_end_marker_is_ignored() -> RepolishResult<()> {
	let template = extract_patches("a\n## repolish-end[nothing]\nb\n")?;
	assert!(template.patches().is_empty());
	assert!(logs_contain("ignoring anchor end marker without a start marker"));

	Ok(())
}

#[test]
fn anchor_falls_back_to_default() -> RepolishResult<()> {
	let output = reconcile_text(HEADER_TEMPLATE, None, &Anchors::new())?;
	assert_eq!(output, "# Default Header\n");

	Ok(())
}

#[test]
fn anchor_value_replaces_whole_block() -> RepolishResult<()> {
	let source = "before\n## repolish-start[intro]\nDefault intro\n## repolish-end[intro]\nafter\n";
	let output = reconcile_text(source, None, &anchors(&[("intro", "Custom\nintro")]))?;
	assert_eq!(output, "before\nCustom\nintro\nafter\n");

	Ok(())
}

#[test]
fn anchor_lookup_is_case_sensitive() -> RepolishResult<()> {
	let output = reconcile_text(HEADER_TEMPLATE, None, &anchors(&[("Header", "# Other")]))?;
	assert_eq!(output, "# Default Header\n");

	Ok(())
}

#[test]
fn regex_preserves_target_value() -> RepolishResult<()> {
	let output = reconcile_text(VERSION_TEMPLATE, Some("__version__ = \"1.2.3\"\n"), &Anchors::new())?;
	assert_eq!(output, "__version__ = \"1.2.3\"\n");

	Ok(())
}

#[rstest]
#[case::no_target(None)]
#[case::no_match(Some("nothing to see here\n"))]
fn regex_falls_back_to_default(#[case] target: Option<&str>) -> RepolishResult<()> {
	let output = reconcile_text(VERSION_TEMPLATE, target, &Anchors::new())?;
	assert_eq!(output, "__version__ = \"0.0.0\"\n");

	Ok(())
}

#[test]
fn regex_trims_multiline_capture_by_indentation() -> RepolishResult<()> {
	let source = "## repolish-regex[deps]: (?s)deps:\\n(.*)\ndeps:\n  - a\n  - b\nother: 1\n";
	let target = "deps:\n  - x\n  - y\n  - z\nother: 2\n";
	let output = reconcile_text(source, Some(target), &Anchors::new())?;
	assert_eq!(output, "deps:\n  - x\n  - y\n  - z\nother: 1\n");

	Ok(())
}

#[test]
fn multiregex_overwrites_defaults_in_template_order() -> RepolishResult<()> {
	let target = "[tools]\nstarship = \"1.0.0\"\nuv = \"0.7.20\"\ndprint = \"0.50.1\"\n";
	let output = reconcile_text(TOOLS_TEMPLATE, Some(target), &Anchors::new())?;
	assert_eq!(
		output,
		"[tools]\nuv = \"0.7.20\"\ndprint = \"0.50.1\"\nstarship = \"1.0.0\"\n"
	);

	Ok(())
}

#[test]
fn lookahead_block_pattern_keeps_template_keys() -> RepolishResult<()> {
	let target = "[tools]\nuv = \"0.7.20\"\ndprint = \"0.50.1\"\nstarship = \"1.0.0\"\n";
	let output = reconcile_text(LOOKAHEAD_TOOLS_TEMPLATE, Some(target), &Anchors::new())?;
	assert_eq!(output, "[tools]\nuv = \"0.7.20\"\ndprint = \"0.50.1\"\n");

	Ok(())
}

#[test]
fn lookahead_block_pattern_stops_at_next_section() -> RepolishResult<()> {
	let source = r#"[tools]
## repolish-multiregex-block[tools]: ^\[tools\](.*?)(?=\n\[|\Z)
## repolish-multiregex[tools]: ^(")?([^"=\s]+)(")?\s*=\s*"([^"]+)"$
uv = "0.0.0"

[settings]
## repolish-multiregex-block[settings]: ^\[settings\](.*?)(?=\n\[|\Z)
## repolish-multiregex[settings]: ^(")?([^"=\s]+)(")?\s*=\s*"([^"]+)"$
debug = "false"
"#;
	let target = "[tools]\nuv = \"0.7.20\"\n\n[settings]\ndebug = \"true\"\n";
	let output = reconcile_text(source, Some(target), &Anchors::new())?;
	assert_eq!(output, target);

	Ok(())
}

#[test]
fn multiregex_never_adds_target_only_keys() -> RepolishResult<()> {
	let target = "[tools]\nuv = \"0.7.20\"\nruff = \"0.5.0\"\n";
	let output = reconcile_text(TOOLS_TEMPLATE, Some(target), &Anchors::new())?;
	assert_eq!(
		output,
		"[tools]\nuv = \"0.7.20\"\ndprint = \"0.0.0\"\nstarship = \"0.0.0\"\n"
	);

	Ok(())
}

#[test]
fn multiregex_last_duplicate_wins() -> RepolishResult<()> {
	let target = "[tools]\nuv = \"0.1.0\"\nuv = \"0.2.0\"\n";
	let output = reconcile_text(TOOLS_TEMPLATE, Some(target), &Anchors::new())?;
	assert!(output.contains("uv = \"0.2.0\"\n"));

	Ok(())
}

#[test]
fn multiregex_keeps_defaults_without_block() -> RepolishResult<()> {
	let output = reconcile_text(TOOLS_TEMPLATE, Some("[other]\nuv = \"9\"\n"), &Anchors::new())?;
	assert_eq!(
		output,
		"[tools]\nuv = \"0.0.0\"\ndprint = \"0.0.0\"\nstarship = \"0.0.0\"\n"
	);

	Ok(())
}

#[test]
fn multiregex_supports_named_groups() -> RepolishResult<()> {
	let source = "[env]\n## repolish-multiregex-block[env]: ^\\[env\\]\\n(.*)\n## repolish-multiregex[env]: ^(?P<key>\\w+)\\s*=\\s*\"(?P<value>[^\"]*)\"\nDEBUG = \"false\"\n";
	let output = reconcile_text(source, Some("[env]\nDEBUG = \"true\"\n"), &Anchors::new())?;
	assert_eq!(output, "[env]\nDEBUG = \"true\"\n");

	Ok(())
}

#[test]
fn present_anchor_shadows_nested_regex() -> RepolishResult<()> {
	let source = "## repolish-start[block]\n## repolish-regex[v]: v = \"(.+)\"\nv = \"1\"\n## repolish-end[block]\n";

	let replaced = reconcile_text(source, Some("v = \"9\"\n"), &anchors(&[("block", "custom")]))?;
	assert_eq!(replaced, "custom\n");

	let preserved = reconcile_text(source, Some("v = \"9\"\n"), &Anchors::new())?;
	assert_eq!(preserved, "v = \"9\"\n");

	Ok(())
}

#[rstest]
#[case::anchor(HEADER_TEMPLATE)]
#[case::regex(VERSION_TEMPLATE)]
#[case::multiregex(TOOLS_TEMPLATE)]
#[case::lookahead_multiregex(LOOKAHEAD_TOOLS_TEMPLATE)]
fn defaults_reconcile_to_themselves(#[case] source: &str) -> RepolishResult<()> {
	let template = extract_patches(source)?;
	let defaults = reconcile(&template, None, &Anchors::new());
	assert!(!defaults.contains("repolish-"));

	let output = reconcile(&template, Some(&defaults), &Anchors::new());
	assert_eq!(output, defaults);

	Ok(())
}

#[rstest]
#[case::anchor(HEADER_TEMPLATE, "# Local Header\n")]
#[case::regex(VERSION_TEMPLATE, "__version__ = \"4.5.6\"\n")]
#[case::multiregex(TOOLS_TEMPLATE, "[tools]\nuv = \"1\"\ndprint = \"2\"\nstarship = \"3\"\n")]
fn reconciling_is_idempotent(#[case] source: &str, #[case] target: &str) -> RepolishResult<()> {
	let template = extract_patches(source)?;
	let anchors = anchors(&[("header", "# Local Header")]);

	let first = reconcile(&template, Some(target), &anchors);
	let second = reconcile(&template, Some(&first), &anchors);
	assert_eq!(first, second);

	Ok(())
}

#[test]
fn seed_wins_over_providers() -> RepolishResult<()> {
	let providers = vec![
		RegisteredProvider::new(StaticProvider::new("a", json!({"x": 1, "a_only": true}))),
		RegisteredProvider::new(StaticProvider::new("b", json!({"x": 2}))),
	];
	let seed = context_map(json!({"x": 3}));

	let merged = merge_context(Some(&seed), &providers, &Overrides::new())?;
	assert_eq!(merged.context.get("x"), Some(&json!(3)));
	assert_eq!(merged.context.get("a_only"), Some(&json!(true)));
	assert_eq!(merged.provider_contexts.len(), 2);

	Ok(())
}

#[test]
fn later_provider_replaces_whole_key() -> RepolishResult<()> {
	let providers = vec![
		RegisteredProvider::new(StaticProvider::new("a", json!({"tools": {"uv": "1", "ruff": "1"}}))),
		RegisteredProvider::new(StaticProvider::new("b", json!({"tools": {"uv": "2"}}))),
	];

	let merged = merge_context(None, &providers, &Overrides::new())?;
	assert_eq!(merged.context.get("tools"), Some(&json!({"uv": "2"})));

	Ok(())
}

#[test]
fn merged_context_factory_sees_earlier_providers() -> RepolishResult<()> {
	struct Derived;

	impl Provider for Derived {
		fn id(&self) -> &str {
			"derived"
		}

		fn migrated(&self) -> bool {
			true
		}

		fn context_factory(&self) -> ContextFactory {
			ContextFactory::with_merged_context(|accumulated| {
				let name = accumulated
					.get("name")
					.and_then(|value| value.as_str())
					.unwrap_or("unknown");
				Ok(context_map(json!({"package": format!("{name}-pkg")})))
			})
		}
	}

	let providers = vec![
		RegisteredProvider::new(StaticProvider::new("base", json!({"name": "demo"}))),
		RegisteredProvider::new(Derived),
	];
	assert!(providers[1].factory().takes_merged_context());

	let merged = merge_context(None, &providers, &Overrides::new())?;
	assert_eq!(merged.context.get("package"), Some(&json!("demo-pkg")));

	Ok(())
}

#[test]
fn override_indexes_into_sequences() -> RepolishResult<()> {
	let seed = context_map(json!({"devkits": [{"name": "d1"}]}));
	let overrides = Overrides::from_map(&context_map(json!({"devkits.0.name": "new-d1"})));

	let merged = merge_context(Some(&seed), &[], &overrides)?;
	assert_eq!(merged.context.lookup("devkits.0.name"), Some(&json!("new-d1")));
	assert!(merged.warnings.is_empty());

	Ok(())
}

#[test]
fn overrides_win_over_seed_and_providers() -> RepolishResult<()> {
	let providers = vec![RegisteredProvider::new(StaticProvider::new("a", json!({"x": 1})))];
	let seed = context_map(json!({"x": 2}));
	let overrides = Overrides::from_map(&context_map(json!({"x": 3})));

	let merged = merge_context(Some(&seed), &providers, &overrides)?;
	assert_eq!(merged.context.get("x"), Some(&json!(3)));

	Ok(())
}

#[test]
fn nested_override_maps_are_flattened() {
	let overrides = Overrides::from_map(&context_map(json!({
		"a": {"b": 1, "c": {}},
		"d.e": 2,
	})));

	let flattened: Vec<(&str, &serde_json::Value)> = overrides
		.iter()
		.map(|item| (item.path.as_str(), &item.value))
		.collect();
	assert_eq!(
		flattened,
		vec![("a.b", &json!(1)), ("a.c", &json!({})), ("d.e", &json!(2))]
	);
}

#[rstest]
#[case::empty("", OverridePathError::EmptyPath)]
#[case::missing_key("missing.key", OverridePathError::MissingKey { key: "missing".into(), at: "<root>".into() })]
#[case::invalid_index("list.x", OverridePathError::InvalidIndex { segment: "x".into(), at: "list".into() })]
#[case::out_of_range("list.5", OverridePathError::IndexOutOfRange { index: 5, len: 1, at: "list".into() })]
#[case::scalar("scalar.a", OverridePathError::NotContainer { segment: "a".into(), at: "scalar".into() })]
fn invalid_override_paths(#[case] path: &str, #[case] expected: OverridePathError) {
	let mut root = json!({"list": [1], "scalar": 1});
	let result = apply_override(&mut root, path, json!("value"));
	assert_eq!(result, Err(expected));
	assert_eq!(root, json!({"list": [1], "scalar": 1}));
}

#[test]
fn override_can_add_a_final_key() -> Result<(), OverridePathError> {
	let mut root = json!({"tools": {}});
	apply_override(&mut root, "tools.uv", json!("0.7"))?;
	assert_eq!(root, json!({"tools": {"uv": "0.7"}}));

	Ok(())
}

#[test]
#[traced_test]
fn invalid_overrides_are_warnings() -> RepolishResult<()> {
	let seed = context_map(json!({"name": "demo"}));
	let overrides: Overrides = vec![
		Override::new("missing.key", "x"),
		Override::new("name", "renamed"),
	]
	.into_iter()
	.collect();

	let merged = merge_context(Some(&seed), &[], &overrides)?;
	assert_eq!(merged.context.get("name"), Some(&json!("renamed")));
	assert_eq!(merged.warnings.len(), 1);
	assert_eq!(merged.warnings[0].path, "missing.key");
	assert!(logs_contain("skipping context override"));

	Ok(())
}

#[test]
fn merge_is_deterministic() -> RepolishResult<()> {
	let build = || {
		let providers = vec![
			RegisteredProvider::new(StaticProvider::new("a", json!({"zeta": 1, "alpha": {"b": 2, "a": 1}}))),
			RegisteredProvider::new(StaticProvider::new("b", json!({"mid": [3, 2, 1]}))),
		];
		let seed = context_map(json!({"name": "demo"}));
		let overrides = Overrides::from_map(&context_map(json!({"alpha.a": 5})));
		merge_context(Some(&seed), &providers, &overrides)
	};

	let first = serde_json::to_string(&build()?.context).unwrap_or_default();
	let second = serde_json::to_string(&build()?.context).unwrap_or_default();
	assert_eq!(first, second);
	assert_eq!(
		first,
		r#"{"alpha":{"a":5,"b":2},"mid":[3,2,1],"name":"demo","zeta":1}"#
	);

	Ok(())
}

#[test]
fn scope_violation_lists_unmigrated_providers() {
	let mut providers = ProviderSet::new();
	providers.register(StaticProvider::new("a", json!({})).unmigrated());
	providers.register(StaticProvider::new("b", json!({})));
	providers.register(StaticProvider::new("c", json!({})).unmigrated());

	assert!(providers.validate_scope(false).is_ok());
	let error = providers.validate_scope(true).expect_err("scope violation");
	assert!(
		matches!(&error, RepolishError::ProviderScopeViolation { providers } if providers == &["a", "c"])
	);
	assert!(error.to_string().ends_with("not migrated: a, c"));
}

#[test]
fn delete_plan_applies_negations_in_order() {
	let mut providers = ProviderSet::new();
	providers.register(StaticProvider::new("a", json!({})).deleting(&["setup.py", "./setup.cfg"]));
	providers.register(StaticProvider::new("b", json!({})).deleting(&["!setup.cfg", "tox.ini"]));

	let plan = providers.delete_plan(&["!tox.ini".to_string(), "setup.cfg".to_string()]);
	let paths: Vec<&str> = plan.paths().collect();
	assert_eq!(paths, vec!["setup.cfg", "setup.py"]);
	assert!(!plan.is_deleted("tox.ini"));

	let history = plan.history("setup.cfg");
	assert_eq!(history.len(), 3);
	assert_eq!(history[1].source, DeleteSource::Provider("b".into()));
	assert_eq!(history[1].action, DeleteAction::Keep);
	assert_eq!(history[2].source, DeleteSource::Project);
}

#[test]
fn project_anchors_win_over_provider_anchors() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(
		tmp.path(),
		"base/repolish.provider.yaml",
		"anchors:\n  intro: \"Hello {{ name }}\"\n  footer: \"base footer\"\n",
	);

	let mut providers = ProviderSet::new();
	providers.register(DirectoryProvider::load("base", tmp.path().join("base"), "templates")?);
	let merged = providers.merge_context(Some(&context_map(json!({"name": "demo"}))), &Overrides::new())?;

	let resolved = providers.anchors(&merged.context, &anchors(&[("footer", "local footer")]))?;
	assert_eq!(resolved, anchors(&[("footer", "local footer"), ("intro", "Hello demo")]));

	Ok(())
}

#[test]
fn directory_provider_renders_templated_context() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(
		tmp.path(),
		"base/repolish.provider.yaml",
		"migrated: true\ncontext:\n  greeting: \"hello {{ name }}\"\n  plain: value\n",
	);

	let provider = DirectoryProvider::load("base", tmp.path().join("base"), "templates")?;
	assert!(provider.migrated());
	assert!(provider.context_factory().takes_merged_context());

	let registered = vec![RegisteredProvider::new(provider)];
	let seed = context_map(json!({"name": "demo"}));
	let merged = merge_context(Some(&seed), &registered, &Overrides::new())?;
	assert_eq!(merged.context.get("greeting"), Some(&json!("hello demo")));
	assert_eq!(merged.context.get("plain"), Some(&json!("value")));

	Ok(())
}

#[test]
fn plain_manifest_context_needs_no_input() {
	let manifest = ProviderManifest {
		context: context_map(json!({"plain": "value"})),
		..ProviderManifest::default()
	};
	let provider = DirectoryProvider::from_manifest("base", "base", manifest);
	assert!(!provider.context_factory().takes_merged_context());
}

#[test]
fn invalid_manifest_is_reported() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(tmp.path(), "base/repolish.provider.yaml", "migrated: [not, a, bool\n");

	let error = DirectoryProvider::load("base", tmp.path().join("base"), "templates").expect_err("manifest error");
	assert!(matches!(error, RepolishError::ProviderManifest { .. }));

	Ok(())
}

#[rstest]
#[case::lf_only(b"a\nb\n".as_slice(), LineEnding::Lf)]
#[case::crlf(b"a\r\nb\r\n".as_slice(), LineEnding::Crlf)]
#[case::cr(b"a\rb\r".as_slice(), LineEnding::Cr)]
#[case::mixed(b"a\r\nb\n".as_slice(), LineEnding::Mixed)]
#[case::none(b"abc".as_slice(), LineEnding::None)]
fn detects_line_endings(#[case] content: &[u8], #[case] expected: LineEnding) {
	assert_eq!(detect_line_ending(content), expected);
}

#[test]
fn crlf_target_is_unchanged_by_default() {
	let candidate = b"line one\nline two\n";
	let existing = b"line one\r\nline two\r\n";

	let normalized = compare("a.txt", candidate, Some(existing), &DiffOptions::default());
	assert_eq!(normalized.status, FileStatus::Unchanged);
	assert_eq!(normalized.existing_line_ending, Some(LineEnding::Crlf));

	let exact = compare(
		"a.txt",
		candidate,
		Some(existing),
		&DiffOptions {
			preserve_line_endings: true,
		},
	);
	assert_eq!(exact.status, FileStatus::Changed);
}

#[test]
fn changed_files_carry_a_unified_diff() {
	let result = compare("src/lib.rs", b"one\nthree\n", Some(b"one\ntwo\n"), &DiffOptions::default());
	assert_eq!(result.status, FileStatus::Changed);

	let diff = result.diff.unwrap_or_default();
	assert!(diff.starts_with("--- a/src/lib.rs\n+++ b/src/lib.rs\n"));
	assert!(diff.contains("-two\n"));
	assert!(diff.contains("+three\n"));
}

#[test]
fn binary_content_has_no_diff_text() {
	let result = compare("logo.png", &[0xff, 0x00, 0x01], Some(&[0xff, 0x00, 0x02]), &DiffOptions::default());
	assert_eq!(result.status, FileStatus::Changed);
	assert!(result.diff.is_none());
}

#[test]
fn new_and_deleted_statuses() {
	let created = compare("new.txt", b"x\n", None, &DiffOptions::default());
	assert_eq!(created.status, FileStatus::New);
	assert_eq!(created.existing_len, None);

	assert!(compare_deletion("gone.txt", None).is_none());
	let deleted = compare_deletion("old.txt", Some(b"old\n".as_slice())).unwrap_or_else(|| panic!("deletion"));
	assert_eq!(deleted.status, FileStatus::Deleted);
	assert_eq!(deleted.existing_len, Some(4));
}

#[test]
fn check_report_is_sorted_by_path() {
	let options = DiffOptions::default();
	let report = CheckReport::new(vec![
		compare("b.txt", b"x", Some(b"x"), &options),
		compare("a.txt", b"x", Some(b"x"), &options),
	]);

	let paths: Vec<String> = report
		.results
		.iter()
		.map(|result| result.path.display().to_string())
		.collect();
	assert_eq!(paths, vec!["a.txt", "b.txt"]);
	assert!(!report.has_changes());
}

#[test]
fn config_preserves_provider_declaration_order() -> RepolishResult<()> {
	let config = RepolishConfig::parse(
		"providers:\n  zeta: ./zeta\n  alpha:\n    directory: ./alpha\n    templates_dir: files\n",
	)?;

	let ordered: Vec<&str> = config.ordered_providers()?.into_iter().map(|(name, _)| name).collect();
	assert_eq!(ordered, vec!["zeta", "alpha"]);

	let alpha = config.providers.get("alpha").unwrap_or_else(|| panic!("alpha"));
	assert_eq!(alpha.directory(), std::path::Path::new("./alpha"));
	assert_eq!(alpha.templates_dir(), std::path::PathBuf::from("files"));
	let zeta = config.providers.get("zeta").unwrap_or_else(|| panic!("zeta"));
	assert_eq!(zeta.templates_dir(), std::path::PathBuf::from("templates"));

	Ok(())
}

#[test]
#[traced_test]
fn providers_order_lists_first_and_appends_the_rest() -> RepolishResult<()> {
	let config = RepolishConfig::parse("providers_order: [b]\nproviders:\n  a: ./a\n  b: ./b\n")?;

	let ordered: Vec<&str> = config.ordered_providers()?.into_iter().map(|(name, _)| name).collect();
	assert_eq!(ordered, vec!["b", "a"]);
	assert!(logs_contain("provider missing from providers_order"));

	Ok(())
}

#[test]
fn unknown_provider_in_order_is_an_error() -> RepolishResult<()> {
	let config = RepolishConfig::parse("providers_order: [missing]\nproviders:\n  a: ./a\n")?;
	let error = config.ordered_providers().expect_err("unknown provider");
	assert!(matches!(error, RepolishError::UnknownProvider(ref name) if name == "missing"));

	Ok(())
}

#[test]
fn duplicate_provider_names_are_rejected() {
	let error = RepolishConfig::parse("providers:\n  a: ./a\n  a: ./b\n").expect_err("duplicate");
	assert!(matches!(error, RepolishError::ConfigParse(_)));
}

#[test]
fn sample_config_parses() -> RepolishResult<()> {
	let config = RepolishConfig::parse(SAMPLE_CONFIG)?;
	assert_eq!(config.providers.len(), 1);
	assert!(!config.provider_scoped);
	assert!(config.post_process.is_empty());

	Ok(())
}

#[test]
fn finds_undefined_variables() {
	let context = context_map(json!({"name": "demo"}));
	let undefined = find_undefined_variables("{{ name }} {{ pkgg.version }}\n", &context);
	assert_eq!(undefined, vec!["pkgg.version"]);
}

fn sample_project(root: &std::path::Path) {
	write_file(
		root,
		"repolish.yaml",
		"context:\n  name: demo\nanchors:\n  intro: Local intro\nproviders:\n  base: ./providers/base\ndelete_files: [old.txt]\n",
	);
	write_file(
		root,
		"providers/base/repolish.provider.yaml",
		"migrated: true\ncreate_only_files: [settings.toml]\n",
	);
	write_file(
		root,
		"providers/base/templates/README.md",
		"# {{ name }}\n<!-- repolish-start[intro] -->\nDefault intro\n<!-- repolish-end[intro] -->\n",
	);
	write_file(
		root,
		"providers/base/templates/pyproject.toml",
		"## repolish-regex[version]: ^version = \"(.+?)\"$\nversion = \"0.1.0\"\nname = \"{{ name }}\"\n",
	);
	write_file(root, "providers/base/templates/{{ name }}/__init__.py", "");
	write_file(root, "providers/base/templates/{{ missing }}/skipped.py", "");
	write_file(root, "providers/base/templates/settings.toml", "generated = true\n");

	write_file(root, "pyproject.toml", "version = \"2.0.0\"\nname = \"old\"\n");
	write_file(root, "settings.toml", "local = true\n");
	write_file(root, "old.txt", "stale\n");
}

#[test]
fn plans_renders_and_reconciles_project_files() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	sample_project(tmp.path());

	let ctx = load_project(tmp.path(), None)?;
	let plan = compute_plan(&ctx)?;

	let paths: Vec<&str> = plan.files.iter().map(|file| file.path.as_str()).collect();
	assert_eq!(paths, vec!["README.md", "demo/__init__.py", "pyproject.toml"]);
	assert_eq!(plan.deletions, vec!["old.txt"]);
	assert_eq!(plan.skipped, vec!["settings.toml"]);

	let readme = String::from_utf8_lossy(&plan.files[0].content).to_string();
	assert_eq!(readme, "# demo\nLocal intro\n");
	let pyproject = String::from_utf8_lossy(&plan.files[2].content).to_string();
	assert_eq!(pyproject, "version = \"2.0.0\"\nname = \"demo\"\n");

	let report = check_plan(&ctx, &plan)?;
	let statuses: Vec<(String, FileStatus)> = report
		.results
		.iter()
		.map(|result| (result.path.display().to_string(), result.status))
		.collect();
	assert_eq!(
		statuses,
		vec![
			("README.md".to_string(), FileStatus::New),
			("demo/__init__.py".to_string(), FileStatus::New),
			("old.txt".to_string(), FileStatus::Deleted),
			("pyproject.toml".to_string(), FileStatus::Changed),
		]
	);

	Ok(())
}

#[test]
fn writing_a_plan_converges() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	sample_project(tmp.path());

	let ctx = load_project(tmp.path(), None)?;
	let summary = write_plan(&ctx, &compute_plan(&ctx)?)?;
	assert_eq!(summary.deleted, vec!["old.txt"]);
	assert_eq!(summary.written.len(), 3);

	assert!(!tmp.path().join("old.txt").exists());
	assert_eq!(read_file(tmp.path(), "settings.toml"), "local = true\n");
	assert_eq!(read_file(tmp.path(), "README.md"), "# demo\nLocal intro\n");

	let ctx = load_project(tmp.path(), None)?;
	let report = check_plan(&ctx, &compute_plan(&ctx)?)?;
	assert!(!report.has_changes());

	Ok(())
}

#[test]
fn template_errors_abort_before_writing() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(tmp.path(), "repolish.yaml", "providers:\n  base: ./base\n");
	write_file(tmp.path(), "base/templates/a.txt", "## repolish-start[a]\nunterminated\n");
	write_file(tmp.path(), "base/templates/b.txt", "## repolish-regex[b]: no capture\n");
	write_file(tmp.path(), "base/templates/c.txt", "fine\n");

	let ctx = load_project(tmp.path(), None)?;
	let error = compute_plan(&ctx).expect_err("template errors");
	assert!(error.is_directive_syntax());
	let RepolishError::Templates { errors } = &error else {
		panic!("expected aggregated errors, got {error:?}");
	};
	assert_eq!(errors.len(), 2);
	assert!(!tmp.path().join("c.txt").exists());

	Ok(())
}

#[test]
fn later_provider_replaces_earlier_file() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(tmp.path(), "repolish.yaml", "providers_order: [second, first]\nproviders:\n  first: ./first\n  second: ./second\n");
	write_file(tmp.path(), "first/templates/shared.txt", "from first\n");
	write_file(tmp.path(), "second/templates/shared.txt", "from second\n");

	let ctx = load_project(tmp.path(), None)?;
	let plan = compute_plan(&ctx)?;
	assert_eq!(plan.files.len(), 1);
	assert_eq!(plan.files[0].provider, "first");
	assert_eq!(plan.files[0].content, b"from first\n".to_vec());

	Ok(())
}

#[test]
fn provider_scoped_project_rejects_unmigrated() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(tmp.path(), "repolish.yaml", "provider_scoped: true\nproviders:\n  base: ./base\n");
	write_file(tmp.path(), "base/templates/a.txt", "a\n");

	let error = load_project(tmp.path(), None).expect_err("scope violation");
	assert!(matches!(error, RepolishError::ProviderScopeViolation { .. }));

	Ok(())
}

#[test]
fn file_mappings_rename_and_gate_templates() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(tmp.path(), "repolish.yaml", "providers:\n  base: ./base\n");
	write_file(
		tmp.path(),
		"base/repolish.provider.yaml",
		"file_mappings:\n  config.yml: _repolish.option-a.yml\n  subdir/renamed.yml: _repolish.option-b.yml\n  final-config.yml: template-config.yml\n  skipped.yml: ~\n  missing.yml: _repolish.missing.yml\n",
	);
	write_file(tmp.path(), "base/templates/regular.txt", "regular\n");
	write_file(tmp.path(), "base/templates/_repolish.option-a.yml", "option: a\n");
	write_file(tmp.path(), "base/templates/_repolish.option-b.yml", "option: b\n");
	write_file(tmp.path(), "base/templates/_repolish.unused.txt", "unused\n");
	write_file(tmp.path(), "base/templates/template-config.yml", "name: {{ name | default('none') }}\n");

	let ctx = load_project(tmp.path(), None)?;
	let plan = compute_plan(&ctx)?;

	let files: Vec<(&str, String)> = plan
		.files
		.iter()
		.map(|file| (file.path.as_str(), String::from_utf8_lossy(&file.content).to_string()))
		.collect();
	assert_eq!(
		files,
		vec![
			("config.yml", "option: a\n".to_string()),
			("final-config.yml", "name: none\n".to_string()),
			("regular.txt", "regular\n".to_string()),
			("subdir/renamed.yml", "option: b\n".to_string()),
		]
	);
	assert_eq!(
		plan.missing_sources,
		vec![FileMapping {
			destination: "missing.yml".to_string(),
			source: "_repolish.missing.yml".to_string(),
		}]
	);

	Ok(())
}

#[test]
fn later_provider_replaces_file_mapping() -> RepolishResult<()> {
	let first = ProviderManifest {
		file_mappings: [("config.yml".to_string(), Some("_repolish.a.yml".to_string()))].into(),
		..ProviderManifest::default()
	};
	let second = ProviderManifest {
		file_mappings: [
			("config.yml".to_string(), Some("_repolish.b.yml".to_string())),
			("{{ name }}.yml".to_string(), Some("_repolish.named.yml".to_string())),
		]
		.into(),
		..ProviderManifest::default()
	};

	let mut providers = ProviderSet::new();
	providers.register(DirectoryProvider::from_manifest("first", "first", first));
	providers.register(DirectoryProvider::from_manifest("second", "second", second));
	let merged = providers.merge_context(Some(&context_map(json!({"name": "demo"}))), &Overrides::new())?;

	let mappings = providers.file_mappings(&merged.context)?;
	assert_eq!(
		mappings,
		vec![
			FileMapping {
				destination: "config.yml".to_string(),
				source: "_repolish.b.yml".to_string(),
			},
			FileMapping {
				destination: "demo.yml".to_string(),
				source: "_repolish.named.yml".to_string(),
			},
		]
	);

	Ok(())
}

#[rstest]
#[case::prefixed("_repolish.ci.yml", true)]
#[case::nested(".github/workflows/_repolish.ci.yml", true)]
#[case::plain("ci.yml", false)]
#[case::prefixed_directory("_repolish.dir/ci.yml", false)]
fn detects_mapped_only_templates(#[case] path: &str, #[case] expected: bool) {
	assert_eq!(is_mapped_only(path), expected);
}

#[cfg(unix)]
#[test]
fn post_process_rewrites_planned_files() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(
		tmp.path(),
		"repolish.yaml",
		"providers:\n  base: ./base\npost_process:\n  - \"tr a-z A-Z < notes.txt > notes.tmp && mv notes.tmp notes.txt\"\n",
	);
	write_file(tmp.path(), "base/templates/notes.txt", "hello\n");
	write_file(tmp.path(), "base/templates/other.txt", "untouched\n");

	let ctx = load_project(tmp.path(), None)?;
	let plan = compute_plan(&ctx)?;

	assert_eq!(plan.files[0].path, "notes.txt");
	assert_eq!(plan.files[0].content, b"HELLO\n".to_vec());
	assert_eq!(plan.files[1].content, b"untouched\n".to_vec());
	assert!(!tmp.path().join(POST_PROCESS_DIR).exists());
	assert!(!tmp.path().join("notes.txt").exists());

	Ok(())
}

#[cfg(unix)]
#[test]
fn failing_post_process_command_aborts() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(tmp.path(), "repolish.yaml", "providers:\n  base: ./base\npost_process: [\"exit 3\"]\n");
	write_file(tmp.path(), "base/templates/notes.txt", "hello\n");

	let ctx = load_project(tmp.path(), None)?;
	let error = compute_plan(&ctx).expect_err("post-process failure");
	assert!(matches!(
		error,
		RepolishError::PostProcess {
			ref command,
			exit_code: Some(3),
		} if command == "exit 3"
	));
	assert!(!tmp.path().join(POST_PROCESS_DIR).exists());

	Ok(())
}

#[test]
fn unreadable_target_is_an_error() -> RepolishResult<()> {
	let tmp = tempfile::tempdir()?;
	write_file(tmp.path(), "repolish.yaml", "providers:\n  base: ./base\n");
	write_file(tmp.path(), "base/templates/README.md", "# readme\n");
	std::fs::create_dir_all(tmp.path().join("README.md"))?;

	let ctx = load_project(tmp.path(), None)?;
	let error = compute_plan(&ctx).expect_err("directory in place of a file");
	let RepolishError::InTemplate { path, source } = &error else {
		panic!("expected a template error, got {error:?}");
	};
	assert_eq!(path, "README.md");
	assert!(matches!(**source, RepolishError::Io(_)));

	Ok(())
}
