//! A library that follows a file the way `tail -F` does.
//!
//! A [`Tail`] reads newline-delimited records from a file in a background
//! task and hands them out as a [`Lines`] stream. In follow mode it waits for
//! the file to grow, reopens it after rotation or truncation, and waits for
//! it to reappear after deletion. [`Tail::tell`] reports the byte offset of
//! the first undelivered byte, suitable for resuming later.
//!
//! Change detection is pluggable: [`Tail::with_watcher`] accepts any
//! [`FileWatcher`], which reports changes through a [`ChangeNotifier`]
//! obtained from [`change_channel`].
//!
//! # Example
//!
//! ```rust,no_run
//! use log_tail::{tail_file, Config};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tail, mut lines) = tail_file("app.log", Config::follow_name()).await?;
//!
//!     while let Some(line) = lines.next().await {
//!         match line.err {
//!             None => println!("{}", line.text),
//!             Some(e) => eprintln!("Error: {}", e),
//!         }
//!     }
//!
//!     tail.wait().await?;
//!     Ok(())
//! }
//! ```

mod changes;
mod config;
mod error;
mod lifecycle;
mod reader;
mod stream;
mod tail;
mod watcher;

#[cfg(test)]
mod test_helpers;

// Public API exports
pub use changes::{ChangeKind, ChangeNotifier, FileChanges, channel as change_channel};
pub use config::{Config, SeekInfo, Whence};
pub use error::{Error, Result};
pub use stream::{Line, Lines};
pub use tail::Tail;
pub use watcher::{FileWatcher, NotifyFileWatcher, POLL_INTERVAL};

use std::path::Path;

/// Starts tailing a file.
///
/// Shorthand for [`Tail::start`].
///
/// # Example
///
/// ```rust,no_run
/// use log_tail::{tail_file, Config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (tail, mut lines) = tail_file("app.log", Config::default()).await?;
///
///     while let Some(line) = lines.next_line().await {
///         println!("{} (offset now {})", line.text, tail.tell().await?);
///     }
///
///     Ok(())
/// }
/// ```
pub async fn tail_file<P: AsRef<Path>>(path: P, config: Config) -> Result<(Tail, Lines)> {
    Tail::start(path, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TempLogFile;

    #[tokio::test]
    async fn test_tail_file_reads_lines() {
        let log = TempLogFile::with_raw_content("hello\nworld\n").unwrap();
        let (tail, mut lines) = tail_file(log.path(), Config::default()).await.unwrap();

        assert_eq!(lines.next_line().await.unwrap().text, "hello");
        assert_eq!(lines.next_line().await.unwrap().text, "world");
        assert!(lines.next_line().await.is_none());
        tail.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_tail_file_must_exist() {
        let log = TempLogFile::missing().unwrap();
        let config = Config {
            must_exist: true,
            ..Config::default()
        };

        let result = tail_file(log.path(), config).await;
        assert!(matches!(result, Err(Error::Open { .. })));
    }
}
