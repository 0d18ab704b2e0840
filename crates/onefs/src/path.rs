use crate::error::{Error, Result};

/// Record names are at most 30 UTF-8 bytes; the on-disk field is fixed width.
pub const NAME_CAPACITY: usize = 30;

pub(crate) type NameString = arraystring::ArrayString<arraystring::typenum::U30>;

/// A location inside a container.
///
/// A leading `/` marks the path absolute, a trailing `/` marks it
/// folder-valued. Relative paths are resolved against the navigator's
/// current folder with [`FsPath::resolved_against`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsPath {
  absolute: bool,
  folder: bool,
  components: Vec<NameString>,
}

impl FsPath {
  /// The absolute root folder, `/`.
  pub fn root() -> Self {
    Self {
      absolute: true,
      folder: true,
      components: vec![],
    }
  }

  pub fn parse(input: impl AsRef<str>) -> Result<Self> {
    let input = input.as_ref();
    let absolute = input.starts_with('/');
    let folder = input.is_empty() || input.ends_with('/') || input == ".";

    let mut components = vec![];

    for part in input.split('/') {
      match part {
        "" | "." => continue,
        ".." => {
          return Err(Error::Write(format!("unsupported path segment in {input:?}")));
        }
        name => components.push(check_name(name)?),
      }
    }

    Ok(Self {
      absolute,
      folder,
      components,
    })
  }

  pub fn is_absolute(&self) -> bool {
    self.absolute
  }

  /// True when the path designates a folder (trailing `/` or empty).
  pub fn is_folder(&self) -> bool {
    self.folder
  }

  pub fn is_root(&self) -> bool {
    self.absolute && self.components.is_empty()
  }

  pub fn components(&self) -> impl Iterator<Item = &str> {
    self.components.iter().map(|c| c.as_str())
  }

  pub fn depth(&self) -> usize {
    self.components.len()
  }

  /// The last component, or `"."` for an empty path.
  pub fn name(&self) -> &str {
    self.components.last().map(|c| c.as_str()).unwrap_or(".")
  }

  /// Returns a new file-valued path with `name` appended.
  pub fn add_file(&self, name: &str) -> Result<Self> {
    let mut components = self.components.clone();
    components.push(check_name(name)?);

    Ok(Self {
      absolute: self.absolute,
      folder: false,
      components,
    })
  }

  /// Returns a new folder-valued path with `name` appended.
  pub fn add_folder(&self, name: &str) -> Result<Self> {
    let mut components = self.components.clone();
    components.push(check_name(name)?);

    Ok(Self {
      absolute: self.absolute,
      folder: true,
      components,
    })
  }

  /// Drops the last component. The result is folder-valued.
  pub fn remove_last(&self) -> Self {
    let mut components = self.components.clone();
    components.pop();

    Self {
      absolute: self.absolute,
      folder: true,
      components,
    }
  }

  pub fn parent(&self) -> Self {
    self.remove_last()
  }

  /// Reinterprets this path as folder-valued.
  pub fn as_folder(&self) -> Self {
    Self {
      folder: true,
      ..self.clone()
    }
  }

  /// Resolves this path against `base`; absolute paths are unchanged.
  pub fn resolved_against(&self, base: &FsPath) -> Self {
    if self.absolute {
      return self.clone();
    }

    let mut components = base.components.clone();
    components.extend(self.components.iter().cloned());

    Self {
      absolute: base.absolute,
      folder: if self.components.is_empty() {
        base.folder
      } else {
        self.folder
      },
      components,
    }
  }

  /// True when both paths name the same entry, folder flag aside.
  pub fn same_entry(&self, other: &FsPath) -> bool {
    self.absolute == other.absolute && self.components == other.components
  }

  /// True when `prefix` names this path or one of its ancestors.
  pub fn starts_with(&self, prefix: &FsPath) -> bool {
    self.absolute == prefix.absolute
      && self.components.len() >= prefix.components.len()
      && self
        .components
        .iter()
        .zip(prefix.components.iter())
        .all(|(a, b)| a == b)
  }
}

impl std::fmt::Display for FsPath {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.components.is_empty() {
      return f.write_str(if self.absolute { "/" } else { "." });
    }

    if self.absolute {
      f.write_str("/")?;
    }

    for (ix, component) in self.components.iter().enumerate() {
      if ix > 0 {
        f.write_str("/")?;
      }
      f.write_str(component.as_str())?;
    }

    if self.folder {
      f.write_str("/")?;
    }

    Ok(())
  }
}

impl std::str::FromStr for FsPath {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::parse(s)
  }
}

pub(crate) fn check_name(name: &str) -> Result<NameString> {
  if name.is_empty() {
    return Err(Error::Write("empty name".into()));
  }

  if name.contains('/') || name.bytes().any(|b| b == 0) {
    return Err(Error::Write(format!("invalid character in name {name:?}")));
  }

  NameString::try_from_str(name)
    .map_err(|_| Error::Write(format!("name exceeds {NAME_CAPACITY} bytes: {name:?}")))
}
