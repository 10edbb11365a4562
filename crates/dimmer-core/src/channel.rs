//! Opacity channel between the supervisor and one overlay worker
//!
//! The channel is a single overwritten slot holding an ASCII integer in
//! `[0, 255]`. There is no framing and no handshake: the writer replaces the
//! value whenever it likes and the reader polls for the latest one. A reader
//! that finds the slot missing or unparsable skips that poll.
//!
//! The slot is a small file in the user's runtime directory. Writes go to a
//! sibling staging file which is then renamed over the slot, so a reader only
//! ever observes a complete value.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::monitor::MonitorId;

/// Errors raised on the writing side of a channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to prepare channel directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write opacity channel {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove opacity channel {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Encode an opacity for the wire.
pub fn encode(value: u8) -> String {
    value.to_string()
}

/// Decode a channel value.
///
/// Accepts surrounding whitespace and decimal values (truncated), and clamps
/// out-of-range numbers. Returns `None` for anything that is not a finite
/// number.
pub fn decode(raw: &str) -> Option<u8> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value.clamp(0, 255) as u8);
    }
    let value: f64 = trimmed.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 255.0) as u8)
}

/// Path of the slot for `monitor` inside `dir`.
pub fn slot_path(dir: &Path, monitor: MonitorId) -> PathBuf {
    dir.join(format!("overlay-opacity-{}", monitor))
}

/// Writing end of an opacity channel, owned by the supervisor.
#[derive(Debug)]
pub struct OpacityChannel {
    path: PathBuf,
    staging: PathBuf,
    released: bool,
}

impl OpacityChannel {
    /// Allocate the slot for `monitor` and reset it to 0.
    ///
    /// A stale slot left behind by an earlier run is overwritten.
    pub fn create(dir: &Path, monitor: MonitorId) -> Result<Self, ChannelError> {
        fs::create_dir_all(dir).map_err(|source| ChannelError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = slot_path(dir, monitor);
        let staging = dir.join(format!(".overlay-opacity-{}.tmp", monitor));
        let channel = Self {
            path,
            staging,
            released: false,
        };
        channel.write(0)?;
        Ok(channel)
    }

    /// Location handed to the worker on its command line.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the slot's value.
    pub fn write(&self, value: u8) -> Result<(), ChannelError> {
        let write_err = |source: std::io::Error| ChannelError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = fs::File::create(&self.staging).map_err(write_err)?;
        file.write_all(encode(value).as_bytes()).map_err(write_err)?;
        drop(file);
        fs::rename(&self.staging, &self.path).map_err(write_err)
    }

    /// Remove the slot. Calling this more than once is a no-op.
    pub fn release(&mut self) -> Result<(), ChannelError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let _ = fs::remove_file(&self.staging);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ChannelError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Reading end of an opacity channel, owned by the worker.
#[derive(Debug, Clone)]
pub struct ChannelReader {
    path: PathBuf,
}

impl ChannelReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest value, or `None` if the slot is absent or malformed right now.
    pub fn read(&self) -> Option<u8> {
        let content = fs::read_to_string(&self.path).ok()?;
        decode(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn monitor(id: u32) -> MonitorId {
        MonitorId::new(id).unwrap()
    }

    #[test]
    fn test_decode_accepts_integers_and_whitespace() {
        assert_eq!(decode("0"), Some(0));
        assert_eq!(decode("  180\n"), Some(180));
        assert_eq!(decode("255"), Some(255));
    }

    #[test]
    fn test_decode_truncates_and_clamps() {
        assert_eq!(decode("89.9"), Some(89));
        assert_eq!(decode("300"), Some(255));
        assert_eq!(decode("-4"), Some(0));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("   "), None);
        assert_eq!(decode("abc"), None);
        assert_eq!(decode("NaN"), None);
        assert_eq!(decode("inf"), None);
    }

    #[test]
    fn test_create_resets_slot_to_zero() {
        let dir = TempDir::new().unwrap();
        let path = slot_path(dir.path(), monitor(1));
        std::fs::write(&path, "200").unwrap();

        let channel = OpacityChannel::create(dir.path(), monitor(1)).unwrap();
        assert_eq!(channel.path(), path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn test_create_makes_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("runtime").join("adaptive-dimmer");
        let channel = OpacityChannel::create(&nested, monitor(2)).unwrap();
        assert!(channel.path().starts_with(&nested));
        assert!(channel.path().exists());
    }

    #[test]
    fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let channel = OpacityChannel::create(dir.path(), monitor(1)).unwrap();
        let reader = ChannelReader::new(channel.path());

        channel.write(100).unwrap();
        channel.write(7).unwrap();
        assert_eq!(reader.read(), Some(7));
        assert_eq!(std::fs::read_to_string(channel.path()).unwrap(), "7");
    }

    #[test]
    fn test_reader_tolerates_missing_and_malformed_slot() {
        let dir = TempDir::new().unwrap();
        let path = slot_path(dir.path(), monitor(3));
        let reader = ChannelReader::new(&path);
        assert_eq!(reader.read(), None);

        std::fs::write(&path, "not a number").unwrap();
        assert_eq!(reader.read(), None);
    }

    #[test]
    fn test_release_removes_slot_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut channel = OpacityChannel::create(dir.path(), monitor(1)).unwrap();
        let path = channel.path().to_path_buf();

        channel.release().unwrap();
        assert!(!path.exists());
        assert!(channel.is_released());
        channel.release().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_channels_are_monitor_scoped() {
        let dir = TempDir::new().unwrap();
        let first = OpacityChannel::create(dir.path(), monitor(1)).unwrap();
        let second = OpacityChannel::create(dir.path(), monitor(2)).unwrap();
        first.write(50).unwrap();
        second.write(60).unwrap();
        assert_eq!(ChannelReader::new(first.path()).read(), Some(50));
        assert_eq!(ChannelReader::new(second.path()).read(), Some(60));
    }
}
