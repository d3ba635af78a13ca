use logos::Logos;

/// Marker tokens recognized anywhere on a template line. Everything else on
/// the line (comment prefixes like `## `, `<!-- `, `// `) is skipped.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum RawMarker {
	#[token("repolish-start[")]
	AnchorStart,
	#[token("repolish-end[")]
	AnchorEnd,
	#[token("repolish-regex[")]
	Regex,
	#[token("repolish-multiregex-block[")]
	MultiregexBlock,
	#[token("repolish-multiregex[")]
	MultiregexItem,
}

/// The kind of directive marker found on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkerKind {
	AnchorStart,
	AnchorEnd,
	Regex,
	MultiregexBlock,
	MultiregexItem,
}

impl MarkerKind {
	/// Regex-style markers carry a `: <pattern>` argument after the name.
	fn takes_pattern(self) -> bool {
		matches!(
			self,
			Self::Regex | Self::MultiregexBlock | Self::MultiregexItem
		)
	}
}

impl From<RawMarker> for MarkerKind {
	fn from(raw: RawMarker) -> Self {
		match raw {
			RawMarker::AnchorStart => Self::AnchorStart,
			RawMarker::AnchorEnd => Self::AnchorEnd,
			RawMarker::Regex => Self::Regex,
			RawMarker::MultiregexBlock => Self::MultiregexBlock,
			RawMarker::MultiregexItem => Self::MultiregexItem,
		}
	}
}

/// A directive marker scanned from a single line of template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Marker<'a> {
	pub kind: MarkerKind,
	pub name: &'a str,
	/// The pattern following `]: ` for regex-style markers.
	pub pattern: Option<&'a str>,
}

/// Scan one line (without its terminating newline) for a directive marker.
///
/// Only the first well-formed marker on the line is returned. A marker token
/// without a closing `]`, with an empty name, or a regex-style marker without
/// the `:` separator is not a marker and the line is treated as plain text.
pub(crate) fn scan_line(line: &str) -> Option<Marker<'_>> {
	let mut lexer = RawMarker::lexer(line);

	while let Some(token) = lexer.next() {
		let Ok(raw) = token else {
			continue;
		};

		let kind = MarkerKind::from(raw);
		let rest = &line[lexer.span().end..];
		let Some(close) = rest.find(']') else {
			continue;
		};
		let name = &rest[..close];
		if name.is_empty() {
			continue;
		}

		if !kind.takes_pattern() {
			return Some(Marker {
				kind,
				name,
				pattern: None,
			});
		}

		let Some(argument) = rest[close + 1..].strip_prefix(':') else {
			continue;
		};
		let pattern = argument.strip_prefix(' ').unwrap_or(argument);
		let pattern = pattern.strip_suffix('\r').unwrap_or(pattern);

		return Some(Marker {
			kind,
			name,
			pattern: Some(pattern),
		});
	}

	None
}
