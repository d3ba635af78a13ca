use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::Value;

use crate::RepolishError;
use crate::RepolishResult;
use crate::context::ContextMap;

/// A template that references variables missing from the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateWarning {
	/// Project-relative path of the template output.
	pub path: PathBuf,
	/// Undefined variable references, e.g. `["pkgg.version", "typo"]`.
	pub undefined_variables: Vec<String>,
}

fn environment<'source>() -> minijinja::Environment<'source> {
	let mut env = minijinja::Environment::new();
	env.set_keep_trailing_newline(true);
	env.set_undefined_behavior(minijinja::UndefinedBehavior::Chainable);
	env
}

/// Render `content` through minijinja with the given context. Content without
/// template syntax is returned unchanged.
pub fn render_str(content: &str, context: &ContextMap) -> RepolishResult<String> {
	if !has_template_syntax(content) {
		return Ok(content.to_string());
	}

	let env = environment();
	let template = env
		.template_from_str(content)
		.map_err(|e| RepolishError::TemplateRender(e.to_string()))?;

	let ctx = minijinja::Value::from_serialize(context);
	template
		.render(ctx)
		.map_err(|e| RepolishError::TemplateRender(e.to_string()))
}

/// Render every string inside `value`, recursing into mappings and sequences.
pub fn render_value(value: &Value, context: &ContextMap) -> RepolishResult<Value> {
	Ok(match value {
		Value::String(text) => Value::String(render_str(text, context)?),
		Value::Array(items) => {
			Value::Array(
				items
					.iter()
					.map(|item| render_value(item, context))
					.collect::<RepolishResult<_>>()?,
			)
		}
		Value::Object(map) => {
			let mut rendered = ContextMap::new();
			for (key, item) in map {
				rendered.insert(key.clone(), render_value(item, context)?);
			}
			Value::Object(rendered)
		}
		other => other.clone(),
	})
}

/// Find variables referenced in `content` whose top-level name is not in
/// `context`. Uses minijinja's static analysis so control flow does not
/// matter. Returns an empty list for content without template syntax.
pub fn find_undefined_variables(content: &str, context: &ContextMap) -> Vec<String> {
	if !has_template_syntax(content) {
		return Vec::new();
	}

	let env = environment();
	let Ok(template) = env.template_from_str(content) else {
		return Vec::new();
	};

	let undeclared: HashSet<String> = template.undeclared_variables(true);
	let mut undefined: Vec<String> = undeclared
		.into_iter()
		.filter(|var| {
			let top_level = var.split('.').next().unwrap_or(var);
			!context.contains_key(top_level) && !is_builtin_variable(top_level)
		})
		.collect();

	undefined.sort();
	undefined
}

fn is_builtin_variable(name: &str) -> bool {
	matches!(
		name,
		"loop" | "self" | "super" | "true" | "false" | "none" | "namespace" | "range" | "dict"
	)
}

/// Check whether content contains minijinja template syntax.
pub fn has_template_syntax(content: &str) -> bool {
	content.contains("{{") || content.contains("{%") || content.contains("{#")
}

/// True when any string inside `value` contains template syntax.
pub fn value_has_template_syntax(value: &Value) -> bool {
	match value {
		Value::String(text) => has_template_syntax(text),
		Value::Array(items) => items.iter().any(value_has_template_syntax),
		Value::Object(map) => map.values().any(value_has_template_syntax),
		_ => false,
	}
}
