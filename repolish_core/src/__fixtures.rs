use std::path::Path;

use serde_json::Value;

use crate::context::ContextMap;
use crate::reconciler::Anchors;

pub fn anchors(entries: &[(&str, &str)]) -> Anchors {
	entries
		.iter()
		.map(|(name, value)| ((*name).to_string(), (*value).to_string()))
		.collect()
}

pub fn context_map(value: Value) -> ContextMap {
	match value {
		Value::Object(map) => map,
		other => panic!("expected an object, got {other}"),
	}
}

pub fn write_file(root: &Path, relative: &str, content: &str) {
	let path = root.join(relative);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).unwrap_or_else(|e| panic!("create dir: {e}"));
	}
	std::fs::write(&path, content).unwrap_or_else(|e| panic!("write {relative}: {e}"));
}

pub fn read_file(root: &Path, relative: &str) -> String {
	std::fs::read_to_string(root.join(relative)).unwrap_or_else(|e| panic!("read {relative}: {e}"))
}

pub const TOOLS_TEMPLATE: &str = r#"[tools]
## repolish-multiregex-block[tools]: ^\[tools\]\n(.*?)(?:^\[|\z)
## repolish-multiregex[tools]: ^(")?([^"=\s]+)(")?\s*=\s*"([^"]+)"$
uv = "0.0.0"
dprint = "0.0.0"
starship = "0.0.0"
"#;

pub const VERSION_TEMPLATE: &str = r#"## repolish-regex[version]: __version__ = "(.+?)"
__version__ = "0.0.0"
"#;

pub const HEADER_TEMPLATE: &str = "## repolish-start[header]\n# Default Header\n## repolish-end[header]\n";

pub const LOOKAHEAD_TOOLS_TEMPLATE: &str = r#"[tools]
## repolish-multiregex-block[tools]: ^\[tools\](.*?)(?=\n\[|\Z)
## repolish-multiregex[tools]: ^(")?([^"=\s]+)(")?\s*=\s*"([^"]+)"$
uv = "0.0.0"
dprint = "0.0.0"
"#;
