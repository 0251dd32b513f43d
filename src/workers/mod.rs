//! Periodic and continuous supervised tasks (C10, C11).

mod download_worker;
mod refresh_worker;

pub use download_worker::DownloadWorker;
pub use refresh_worker::RefreshWorker;
