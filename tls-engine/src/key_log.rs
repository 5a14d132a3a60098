use std::env::var_os;
use std::ffi::OsString;
use std::fmt::{Debug, Formatter};
use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::sync::Mutex;

#[cfg(feature = "logging")]
use crate::log::warn;

/// Something that records connection secrets, typically so a packet
/// analyser can decrypt a capture.
///
/// Secrets passed over this interface break the confidentiality of the
/// connection they belong to.  Implementations need interior mutability to
/// do anything useful.
pub trait KeyLog: Debug + Send + Sync {
    /// Log `secret`.  `client_random` identifies the connection.  `label`
    /// says what `secret` is, using the NSS key log names:
    ///
    /// - `CLIENT_RANDOM`: the TLS1.2 master secret.
    /// - `CLIENT_HANDSHAKE_TRAFFIC_SECRET`, `SERVER_HANDSHAKE_TRAFFIC_SECRET`:
    ///   TLS1.3 handshake traffic secrets.
    /// - `CLIENT_TRAFFIC_SECRET_0`, `SERVER_TRAFFIC_SECRET_0`: the first
    ///   TLS1.3 application traffic secrets.
    /// - `EXPORTER_SECRET`: the TLS1.3 exporter secret.
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]);

    /// Whether `log` would do anything with a secret labelled `label`.
    fn will_log(&self, _label: &str) -> bool {
        true
    }
}

/// A `KeyLog` that discards everything.  This is the default.
#[derive(Debug)]
pub struct NoKeyLog;

impl KeyLog for NoKeyLog {
    fn log(&self, _: &str, _: &[u8], _: &[u8]) {}

    #[inline]
    fn will_log(&self, _label: &str) -> bool {
        false
    }
}

struct KeyLogFileInner {
    file: Option<File>,
    buf: Vec<u8>,
}

impl KeyLogFileInner {
    fn new(var: Option<OsString>) -> Self {
        let Some(path) = &var else {
            return Self {
                file: None,
                buf: Vec::new(),
            };
        };

        #[cfg_attr(not(feature = "logging"), allow(unused_variables))]
        let file = match OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
        {
            Ok(f) => Some(f),
            Err(e) => {
                warn!("unable to create key log file {:?}: {}", path, e);
                None
            }
        };

        Self {
            file,
            buf: Vec::new(),
        }
    }

    fn try_write(&mut self, label: &str, client_random: &[u8], secret: &[u8]) -> io::Result<()> {
        let Some(file) = &mut self.file else {
            return Ok(());
        };

        self.buf.clear();
        write!(self.buf, "{} ", label)?;
        for b in client_random {
            write!(self.buf, "{:02x}", b)?;
        }
        write!(self.buf, " ")?;
        for b in secret {
            write!(self.buf, "{:02x}", b)?;
        }
        writeln!(self.buf)?;
        file.write_all(&self.buf)
    }
}

impl Drop for KeyLogFileInner {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.buf);
    }
}

/// A [`KeyLog`] writing to the file named by `SSLKEYLOGFILE`.
///
/// Does nothing if the variable is unset.  Open and write failures are
/// logged at warning level and otherwise ignored.
pub struct KeyLogFile(Mutex<KeyLogFileInner>);

impl KeyLogFile {
    /// Inspects `SSLKEYLOGFILE` and opens the named file.
    pub fn new() -> Self {
        Self(Mutex::new(KeyLogFileInner::new(var_os("SSLKEYLOGFILE"))))
    }
}

impl Default for KeyLogFile {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLog for KeyLogFile {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let Ok(mut inner) = self.0.lock() else {
            return;
        };

        #[cfg_attr(not(feature = "logging"), allow(unused_variables))]
        if let Err(e) = inner.try_write(label, client_random, secret) {
            warn!("error writing to key log file: {}", e);
        }
    }
}

impl Debug for KeyLogFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.try_lock() {
            Ok(inner) => f
                .debug_struct("KeyLogFile")
                .field("file", &inner.file)
                .finish(),
            Err(_) => write!(f, "KeyLogFile {{ <locked> }}"),
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
    }

    #[test]
    fn unset_variable_writes_nothing() {
        init();
        let mut inner = KeyLogFileInner::new(None);
        assert!(inner
            .try_write("label", b"random", b"secret")
            .is_ok());
    }

    #[test]
    fn unopenable_file_is_ignored() {
        init();
        let mut inner = KeyLogFileInner::new(Some("/dev/does-not-exist/x".into()));
        assert!(inner.file.is_none());
        assert!(inner
            .try_write("label", b"random", b"secret")
            .is_ok());
    }

    #[test]
    fn full_device_reports_error() {
        init();
        let mut inner = KeyLogFileInner::new(Some("/dev/full".into()));
        assert!(inner
            .try_write("label", b"random", b"secret")
            .is_err());
    }

    #[test]
    fn line_format() {
        let dir = std::env::temp_dir().join(format!("keylog-{}", std::process::id()));
        let mut inner = KeyLogFileInner::new(Some(dir.clone().into()));
        inner
            .try_write("CLIENT_RANDOM", &[0xab, 0x01], &[0xff])
            .unwrap();
        drop(inner);
        let written = std::fs::read_to_string(&dir).unwrap();
        let _ = std::fs::remove_file(&dir);
        assert_eq!(written, "CLIENT_RANDOM ab01 ff\n");
    }

    #[test]
    fn no_key_log_declines() {
        assert!(!NoKeyLog.will_log("CLIENT_RANDOM"));
    }
}
