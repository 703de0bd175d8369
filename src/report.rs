use super::*;

/// Longest encoded record: two 20-digit counters plus a fixed-point fraction.
pub const MAX_RECORD_LEN: usize = 64;

/// Which notification a record accompanies.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
  Free,
  Malloc,
}

impl SignalKind {
  #[must_use]
  pub fn as_char(self) -> char {
    match self {
      Self::Free => 'F',
      Self::Malloc => 'M',
    }
  }

  #[must_use]
  pub fn from_char(value: char) -> Option<Self> {
    match value {
      'F' => Some(Self::Free),
      'M' => Some(Self::Malloc),
      _ => None,
    }
  }
}

/// One line of the report channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReportRecord {
  pub byte_estimate: u64,
  pub interpreter_fraction: f64,
  pub kind: SignalKind,
  pub trigger_count: u64,
}

impl ReportRecord {
  /// Format as `<kind>,<count>,<estimate>,<fraction>\n` into `buf` without
  /// touching the heap, returning the encoded length.
  ///
  /// # Errors
  ///
  /// Returns an error if `buf` is too small for the record.
  pub fn encode(&self, buf: &mut [u8]) -> io::Result<usize> {
    let mut cursor = Cursor::new(buf);

    writeln!(cursor, "{self}")?;

    Ok(cursor.position() as usize)
  }
}

impl Display for ReportRecord {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{},{},{},{:.6}",
      self.kind.as_char(),
      self.trigger_count,
      self.byte_estimate,
      self.interpreter_fraction.clamp(0.0, 1.0),
    )
  }
}

impl FromStr for ReportRecord {
  type Err = ParseReportError;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split(',');

    let mut next = |name: &'static str| {
      fields.next().ok_or(ParseReportError::MissingField(name))
    };

    let kind = next("kind")?;
    let trigger_count = next("trigger_count")?;
    let byte_estimate = next("byte_estimate")?;
    let interpreter_fraction = next("interpreter_fraction")?;

    if fields.next().is_some() {
      return Err(ParseReportError::TrailingField);
    }

    let mut chars = kind.chars();
    let kind = match (chars.next(), chars.next()) {
      (Some(value), None) => SignalKind::from_char(value),
      _ => None,
    }
    .ok_or_else(|| ParseReportError::InvalidKind(kind.to_string()))?;

    let number = |name: &'static str, value: &str| {
      value
        .parse::<u64>()
        .map_err(|_| ParseReportError::InvalidNumber(name))
    };

    let interpreter_fraction = interpreter_fraction
      .parse::<f64>()
      .ok()
      .filter(|value| (0.0..=1.0).contains(value))
      .ok_or(ParseReportError::InvalidNumber("interpreter_fraction"))?;

    Ok(Self {
      byte_estimate: number("byte_estimate", byte_estimate)?,
      interpreter_fraction,
      kind,
      trigger_count: number("trigger_count", trigger_count)?,
    })
  }
}
