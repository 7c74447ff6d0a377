//! The progress protocol spoken between `uploadd` and its clients.
//!
//! Messages are a flat XML document with a `<response>` root.
//! Responses to a multipart POST are read back by clients that may
//! only see the rendered text of the page, so those are sent "escaped":
//! every `<` and `>` is replaced by a sentinel and the whole document
//! is wrapped in start/end markers. [`decode`] accepts both forms.

mod codec;
mod params;
mod tags;
mod text;

pub use codec::*;
pub use params::*;
pub use tags::*;
pub use text::*;
