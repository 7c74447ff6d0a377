/// Remove everything that looks like a markup tag (`<` up to the next `>`).
/// A lone `<` with no closing `>` is kept, as is `<>`.
pub fn strip_html_tags(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut rest = text;

	while let Some(open) = rest.find('<') {
		out.push_str(&rest[..open]);
		let after = &rest[open + 1..];
		match after.find('>') {
			Some(close) if close > 0 => {
				rest = &after[close + 1..];
			}
			_ => {
				out.push('<');
				rest = after;
			}
		}
	}

	out.push_str(rest);
	return out;
}

/// Remove `<pre>` and `</pre>` (any number of slashes) from a value.
/// Browsers wrap plain-text documents in `pre`, values must never carry one.
pub fn strip_pre_tags(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut rest = text;

	while let Some(open) = rest.find('<') {
		out.push_str(&rest[..open]);
		let after = rest[open + 1..].trim_start_matches('/');
		if let Some(tail) = after.strip_prefix("pre>") {
			rest = tail;
		} else {
			out.push('<');
			rest = &rest[open + 1..];
		}
	}

	out.push_str(rest);
	return out;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_tags() {
		assert_eq!(
			strip_html_tags("<b>Server error</b>: <i>disk full</i>"),
			"Server error: disk full"
		);
		assert_eq!(strip_html_tags("a < b and c > d"), "a  d");
		assert_eq!(strip_html_tags("1 <> 2"), "1 <> 2");
		assert_eq!(strip_html_tags("dangling <"), "dangling <");
	}

	#[test]
	fn strips_pre() {
		assert_eq!(strip_pre_tags("<pre>hello</pre>"), "hello");
		assert_eq!(strip_pre_tags("a<//pre>b"), "ab");
		assert_eq!(strip_pre_tags("<prefix>"), "<prefix>");
		assert_eq!(strip_pre_tags("x < y"), "x < y");
	}
}
