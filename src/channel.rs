use super::*;

/// File name prefix shared with the consumer; the process id follows `@`.
pub const CHANNEL_FILE_PREFIX: &str = "scalene-malloc-signal@";

/// Out-of-band file carrying one [`ReportRecord`] per sampled event.
///
/// Every append opens, writes and closes the file so no descriptor stays
/// open between events.
#[derive(Debug)]
pub struct ReportChannel {
  path: PathBuf,
}

impl ReportChannel {
  /// Append one record.
  ///
  /// The record is encoded on the stack and written with a single `write`
  /// on a descriptor opened `O_APPEND | O_SYNC`, so it is durable before
  /// this returns.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be opened or written.
  pub fn append(&self, record: &ReportRecord) -> io::Result<()> {
    let mut buf = [0u8; MAX_RECORD_LEN];
    let len = record.encode(&mut buf)?;

    let mut file = OpenOptions::new()
      .append(true)
      .create(true)
      .custom_flags(libc::O_SYNC)
      .mode(0o600)
      .open(&self.path)?;

    file.write_all(&buf[..len])
  }

  /// Create (or truncate) the channel file for the current process.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be created.
  pub fn create(dir: impl AsRef<Path>) -> io::Result<Self> {
    Self::create_at(Self::path_for(dir, std::process::id()))
  }

  /// Create (or truncate) a channel file at an explicit path.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be created.
  pub fn create_at(path: impl Into<PathBuf>) -> io::Result<Self> {
    let path = path.into();

    OpenOptions::new()
      .write(true)
      .create(true)
      .truncate(true)
      .mode(0o600)
      .open(&path)?;

    Ok(Self { path })
  }

  #[must_use]
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Channel path for process `pid` under `dir`.
  #[must_use]
  pub fn path_for(dir: impl AsRef<Path>, pid: u32) -> PathBuf {
    dir.as_ref().join(format!("{CHANNEL_FILE_PREFIX}{pid}"))
  }

  /// Delete the channel file. A file that is already gone is not an error.
  ///
  /// # Errors
  ///
  /// Returns an error if the file exists but cannot be removed.
  pub fn remove(&self) -> io::Result<()> {
    match fs::remove_file(&self.path) {
      Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
      _ => Ok(()),
    }
  }
}

/// Parse every record in a channel file. A missing file holds no records.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is malformed.
pub fn read_records(
  path: impl AsRef<Path>,
) -> Result<Vec<ReportRecord>, ProfilerError> {
  let contents = match fs::read_to_string(path) {
    Ok(contents) => contents,
    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(err) => return Err(err.into()),
  };

  contents
    .lines()
    .filter(|line| !line.is_empty())
    .map(|line| {
      line.parse::<ReportRecord>().map_err(|err| {
        ProfilerError::Io(io::Error::new(io::ErrorKind::InvalidData, err))
      })
    })
    .collect()
}

/// Wake-up primitive paired with the report channel.
pub trait Notifier {
  /// Make `kind` harmless until a consumer installs its own handler.
  fn ignore(&self, kind: SignalKind);

  /// Notify the consumer synchronously on the calling thread.
  fn raise(&self, kind: SignalKind);
}

/// Delivers notifications as POSIX signals raised in the calling thread.
#[derive(Debug, Clone, Copy)]
pub struct SignalNotifier {
  enabled: bool,
  free_signal: c_int,
  malloc_signal: c_int,
}

impl SignalNotifier {
  #[must_use]
  pub fn from_config(config: &ProfilerConfig) -> Self {
    Self::new(config.malloc_signal, config.free_signal)
      .raising(config.raise_signals)
  }

  #[must_use]
  pub fn new(malloc_signal: c_int, free_signal: c_int) -> Self {
    Self {
      enabled: true,
      free_signal,
      malloc_signal,
    }
  }

  /// Turn raising on or off. A silent notifier still installs the ignore
  /// disposition, which helps when debugging a host without a consumer.
  #[must_use]
  pub fn raising(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  #[must_use]
  pub fn signal(&self, kind: SignalKind) -> c_int {
    match kind {
      SignalKind::Free => self.free_signal,
      SignalKind::Malloc => self.malloc_signal,
    }
  }
}

impl Default for SignalNotifier {
  fn default() -> Self {
    Self::new(libc::SIGXCPU, libc::SIGXFSZ)
  }
}

impl Notifier for SignalNotifier {
  fn ignore(&self, kind: SignalKind) {
    // SAFETY: installing SIG_IGN has no handler code to run.
    unsafe {
      libc::signal(self.signal(kind), libc::SIG_IGN);
    }
  }

  fn raise(&self, kind: SignalKind) {
    if self.enabled {
      // SAFETY: `raise` is async-signal-safe and the disposition was set
      // at construction.
      unsafe {
        libc::raise(self.signal(kind));
      }
    }
  }
}
