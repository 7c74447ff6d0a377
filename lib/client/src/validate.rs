//! Local checks run when a file is selected

/// Strip everything up to the last path separator, `/` or `\`.
pub fn basename(path: &str) -> &str {
	match path.rfind(['/', '\\']) {
		Some(i) => &path[i + 1..],
		None => path,
	}
}

/// Normalize an allow-list entry to a lowercase `.ext`.
/// Returns `None` for mime types (`image/*`), which cannot be
/// checked against a file name.
pub fn normalize_extension(ext: &str) -> Option<String> {
	let ext = ext.trim();
	if ext.is_empty() || ext.contains('/') {
		return None;
	}

	let ext = ext.to_lowercase();
	if ext.starts_with('.') {
		return Some(ext);
	} else {
		return Some(format!(".{ext}"));
	}
}

/// Does `filename` match the allow-list?
///
/// Matching ignores case, and the leading dot of an entry is optional.
/// An empty allow-list accepts everything except an empty name.
/// A name that is only the extension, like `.jpg`, matches.
pub fn validate_extension<S: AsRef<str>>(allowed: &[S], filename: &str) -> bool {
	if filename.is_empty() {
		return false;
	}

	let allowed: Vec<String> = allowed
		.iter()
		.filter_map(|x| normalize_extension(x.as_ref()))
		.collect();

	if allowed.is_empty() {
		return true;
	}

	let name = filename.to_lowercase();
	return allowed
		.iter()
		.any(|ext| name.ends_with(ext.as_str()));
}

/// Human readable allow-list, like `.jpg,.png`
pub fn describe_extensions<S: AsRef<str>>(allowed: &[S]) -> String {
	allowed
		.iter()
		.filter_map(|x| normalize_extension(x.as_ref()))
		.collect::<Vec<_>>()
		.join(",")
}
