//! Client side of the upload progress protocol.
//!
//! An [`Uploader`] takes one selected file through its whole lifecycle:
//! it waits for its turn in the shared [`UploadQueue`], negotiates a
//! session with the server, sends the file as a multipart form and
//! polls the server for progress until the upload finishes.
//!
//! What the user sees is up to a [`StatusPresenter`],
//! where files come from is up to a [`FileInput`].

mod config;
mod handlers;
mod input;
mod negotiator;
mod poller;
mod presenter;
mod queue;
mod session;
mod status;
mod transport;
mod uploader;
mod validate;

#[cfg(test)]
mod testing;

pub use config::*;
pub use handlers::*;
pub use input::*;
pub use negotiator::*;
pub use poller::*;
pub use presenter::*;
pub use queue::*;
pub use session::*;
pub use status::*;
pub use transport::*;
pub use uploader::*;
pub use validate::*;
