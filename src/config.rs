//! Tail configuration.

use serde::{Deserialize, Serialize};
use std::io::{self, SeekFrom};

/// Reference point for a [`SeekInfo`] offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Whence {
    #[default]
    Start,
    Current,
    End,
}

/// A position to seek to, relative to [`Whence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekInfo {
    pub offset: i64,
    pub whence: Whence,
}

impl SeekInfo {
    pub fn start(offset: i64) -> Self {
        Self {
            offset,
            whence: Whence::Start,
        }
    }

    pub fn current(offset: i64) -> Self {
        Self {
            offset,
            whence: Whence::Current,
        }
    }

    pub fn end(offset: i64) -> Self {
        Self {
            offset,
            whence: Whence::End,
        }
    }

    /// Converts to a [`SeekFrom`]. A negative offset from the start is
    /// rejected as invalid input.
    pub fn to_seek_from(&self) -> io::Result<SeekFrom> {
        match self.whence {
            Whence::Start => u64::try_from(self.offset)
                .map(SeekFrom::Start)
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("negative offset {} from start", self.offset),
                    )
                }),
            Whence::Current => Ok(SeekFrom::Current(self.offset)),
            Whence::End => Ok(SeekFrom::End(self.offset)),
        }
    }
}

/// Options for one tail. The default reads the file once from the start and
/// stops at end-of-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where to start reading on the first open. Reopens always start at 0.
    pub location: Option<SeekInfo>,
    /// Reopen the path when the file is deleted or renamed away (`tail -F`).
    pub reopen: bool,
    /// Fail `Tail::start` when the file does not exist yet.
    pub must_exist: bool,
    /// Detect changes by polling instead of OS notifications.
    pub poll: bool,
    /// The file is a pipe: never query or rewind the file position.
    pub pipe: bool,
    /// Keep waiting for new lines at end-of-file (`tail -f`).
    pub follow: bool,
}

impl Config {
    /// `tail -f`: keep reading appended lines from the same file.
    pub fn follow() -> Self {
        Self {
            follow: true,
            ..Self::default()
        }
    }

    /// `tail -F`: follow the path across rotations.
    pub fn follow_name() -> Self {
        Self {
            follow: true,
            reopen: true,
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: SeekInfo) -> Self {
        self.location = Some(location);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_reads_once() {
        let config = Config::default();
        assert!(!config.follow);
        assert!(!config.reopen);
        assert!(!config.must_exist);
        assert!(config.location.is_none());
    }

    #[test]
    fn test_follow_presets() {
        let follow = Config::follow();
        assert!(follow.follow);
        assert!(!follow.reopen);

        let follow_name = Config::follow_name().with_location(SeekInfo::end(0));
        assert!(follow_name.follow);
        assert!(follow_name.reopen);
        assert_eq!(follow_name.location, Some(SeekInfo::end(0)));
    }

    #[test]
    fn test_seek_info_conversion() {
        assert_eq!(SeekInfo::start(10).to_seek_from().unwrap(), SeekFrom::Start(10));
        assert_eq!(SeekInfo::current(-3).to_seek_from().unwrap(), SeekFrom::Current(-3));
        assert_eq!(SeekInfo::end(-5).to_seek_from().unwrap(), SeekFrom::End(-5));
    }

    #[test]
    fn test_negative_start_offset_is_invalid() {
        let err = SeekInfo::start(-1).to_seek_from().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "follow": true, "reopen": true, "location": { "offset": -10, "whence": "end" } }"#,
        )
        .unwrap();

        assert!(config.follow);
        assert!(config.reopen);
        assert!(!config.poll);
        assert!(!config.pipe);
        assert_eq!(config.location, Some(SeekInfo::end(-10)));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = Config::follow_name().with_location(SeekInfo::start(42));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
