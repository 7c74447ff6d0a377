use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use upld_client::{Status, StatusPresenter};

const BAR_TEMPLATE: &str = "{prefix:24!} [{bar:30.cyan/blue}] {pos:>6}/{len:6} KiB {msg}";

/// Shows one upload as a progress bar.
/// The bar is created once a file is selected.
pub struct BarPresenter {
	multi: MultiProgress,
	bar: Option<ProgressBar>,

	file_name: String,
	error: Option<String>,
}

impl BarPresenter {
	pub fn new(multi: MultiProgress) -> Self {
		Self {
			multi,
			bar: None,
			file_name: String::new(),
			error: None,
		}
	}

	fn bar(&mut self) -> &ProgressBar {
		let multi = &self.multi;
		let name = &self.file_name;
		self.bar.get_or_insert_with(|| {
			let style = ProgressStyle::with_template(BAR_TEMPLATE)
				.unwrap_or_else(|_| ProgressStyle::default_bar())
				.progress_chars("=> ");

			multi.add(
				ProgressBar::new(0)
					.with_style(style)
					.with_prefix(name.clone()),
			)
		})
	}
}

impl StatusPresenter for BarPresenter {
	fn set_status(&mut self, status: Status) {
		if status == Status::Uninitialized {
			return;
		}

		let error = self.error.clone();
		let bar = self.bar();

		match status {
			Status::Success => bar.finish_with_message("done"),
			Status::Error => {
				bar.abandon_with_message(format!("failed: {}", error.unwrap_or_default()))
			}
			Status::Canceled => bar.abandon_with_message("canceled"),
			Status::Repeated => bar.abandon_with_message("already uploaded"),
			Status::Invalid => bar.abandon_with_message(format!(
				"invalid: {}",
				error.unwrap_or_default()
			)),
			Status::Deleted => bar.finish_with_message("deleted"),
			other => bar.set_message(other.as_str().to_lowercase()),
		}
	}

	fn set_progress(&mut self, done_kib: u64, total_kib: u64) {
		let bar = self.bar();
		bar.set_length(total_kib);
		bar.set_position(done_kib);
	}

	fn set_error(&mut self, message: &str) {
		self.error = Some(message.to_owned());
	}

	fn set_file_name(&mut self, name: &str) {
		self.file_name = name.to_owned();
		if let Some(bar) = &self.bar {
			bar.set_prefix(self.file_name.clone());
		}
	}

	fn new_instance(&self) -> Self {
		Self::new(self.multi.clone())
	}
}
