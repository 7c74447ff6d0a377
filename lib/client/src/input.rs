use bytes::Bytes;
use std::path::PathBuf;

/// The content of a selected file
#[derive(Debug, Clone)]
pub enum FileSource {
	/// Stream the file from disk
	Path(PathBuf),

	/// Send these bytes
	Bytes(Bytes),
}

/// A form field that holds one selected file.
pub trait FileInput: Send + 'static {
	/// The file name as selected, possibly with a path
	fn filename(&self) -> Option<String>;

	/// The form field name
	fn name(&self) -> &str;
	fn set_name(&mut self, name: &str);

	fn set_enabled(&mut self, enabled: bool);
	fn is_enabled(&self) -> bool;

	/// A fresh, empty input of the same kind
	fn new_instance(&self) -> Self
	where
		Self: Sized;

	/// What to send for the selected file
	fn source(&self) -> Option<FileSource>;
}

//
// MARK: PathInput
//

/// Selects files from the local filesystem
#[derive(Debug)]
pub struct PathInput {
	name: String,
	path: Option<PathBuf>,
	enabled: bool,
}

impl PathInput {
	pub fn new() -> Self {
		Self {
			name: String::new(),
			path: None,
			enabled: true,
		}
	}

	/// Select a file. Disabled inputs ignore this and return false.
	pub fn select(&mut self, path: impl Into<PathBuf>) -> bool {
		if !self.enabled {
			return false;
		}
		self.path = Some(path.into());
		return true;
	}
}

impl FileInput for PathInput {
	fn filename(&self) -> Option<String> {
		self.path.as_ref().map(|x| x.to_string_lossy().into_owned())
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn set_name(&mut self, name: &str) {
		self.name = name.to_owned();
	}

	fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
	}

	fn is_enabled(&self) -> bool {
		self.enabled
	}

	fn new_instance(&self) -> Self {
		Self::new()
	}

	fn source(&self) -> Option<FileSource> {
		self.path.clone().map(FileSource::Path)
	}
}

//
// MARK: MemoryInput
//

/// Holds a file in memory
#[derive(Debug)]
pub struct MemoryInput {
	name: String,
	file: Option<(String, Bytes)>,
	enabled: bool,
}

impl MemoryInput {
	pub fn new() -> Self {
		Self {
			name: String::new(),
			file: None,
			enabled: true,
		}
	}

	/// Select a file. Disabled inputs ignore this and return false.
	pub fn select(&mut self, file_name: impl Into<String>, data: impl Into<Bytes>) -> bool {
		if !self.enabled {
			return false;
		}
		self.file = Some((file_name.into(), data.into()));
		return true;
	}
}

impl FileInput for MemoryInput {
	fn filename(&self) -> Option<String> {
		self.file.as_ref().map(|(name, _)| name.clone())
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn set_name(&mut self, name: &str) {
		self.name = name.to_owned();
	}

	fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
	}

	fn is_enabled(&self) -> bool {
		self.enabled
	}

	fn new_instance(&self) -> Self {
		Self::new()
	}

	fn source(&self) -> Option<FileSource> {
		self.file
			.as_ref()
			.map(|(_, data)| FileSource::Bytes(data.clone()))
	}
}
