use super::*;

/// Errors raised while setting up a profiler or reading its output.
///
/// The allocation hot path never produces one of these.
#[derive(Debug)]
pub enum ProfilerError {
  InvalidConfig(&'static str),
  Io(io::Error),
  Json(serde_json::Error),
}

impl Display for ProfilerError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidConfig(reason) => {
        write!(f, "invalid profiler configuration: {reason}")
      }
      Self::Io(err) => write!(f, "report channel i/o error: {err}"),
      Self::Json(err) => write!(f, "json error: {err}"),
    }
  }
}

impl std::error::Error for ProfilerError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::InvalidConfig(_) => None,
      Self::Io(err) => Some(err),
      Self::Json(err) => Some(err),
    }
  }
}

impl From<io::Error> for ProfilerError {
  fn from(value: io::Error) -> Self {
    Self::Io(value)
  }
}

impl From<serde_json::Error> for ProfilerError {
  fn from(value: serde_json::Error) -> Self {
    Self::Json(value)
  }
}

/// Errors produced when parsing a report channel line.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ParseReportError {
  InvalidKind(String),
  InvalidNumber(&'static str),
  MissingField(&'static str),
  TrailingField,
}

impl Display for ParseReportError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidKind(kind) => write!(f, "unknown record kind {kind:?}"),
      Self::InvalidNumber(field) => write!(f, "field {field} is not valid"),
      Self::MissingField(field) => write!(f, "record is missing {field}"),
      Self::TrailingField => write!(f, "record has more than four fields"),
    }
  }
}

impl std::error::Error for ParseReportError {}
