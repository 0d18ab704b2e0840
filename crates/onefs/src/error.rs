pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("directory not found: {0}")]
  DirectoryNotFound(String),
  #[error("file not found: {0}")]
  FileNotFound(String),
  #[error("directory already exists: {0}")]
  DirectoryAlreadyExists(String),
  #[error("file already exists: {0}")]
  FileAlreadyExists(String),
  /// The container stream is malformed; not recoverable by the caller.
  #[error("container parse error: {0}")]
  Parse(String),
  /// A record mutation could not be carried out.
  #[error("container write error: {0}")]
  Write(String),
  #[error("read access unavailable")]
  ReadCapture,
  #[error("write access unavailable")]
  WriteCapture,
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("import failed: {0}")]
  Import(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// True for misses of either kind (`DirectoryNotFound`, `FileNotFound`).
  pub fn is_not_found(&self) -> bool {
    matches!(self, Error::DirectoryNotFound(_) | Error::FileNotFound(_))
  }

  /// True for name collisions of either kind.
  pub fn is_already_exists(&self) -> bool {
    matches!(
      self,
      Error::DirectoryAlreadyExists(_) | Error::FileAlreadyExists(_)
    )
  }
}
