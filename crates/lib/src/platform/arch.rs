use std::fmt;
use std::str::FromStr;

/// Target architecture of a project's build environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChrootArch {
  X86_32,
  X86_64,
}

impl ChrootArch {
  /// Architecture of the running host, if it is one we can build for.
  pub fn host() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "x86" => Some(Self::X86_32),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_32 => "x86_32",
      Self::X86_64 => "x86_64",
    }
  }

  /// Whether commands for this target need a 32-bit personality on the host.
  pub fn needs_personality_switch(&self) -> bool {
    matches!((self, Self::host()), (Self::X86_32, Some(Self::X86_64)))
  }
}

impl FromStr for ChrootArch {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "x86_32" => Ok(Self::X86_32),
      "x86_64" => Ok(Self::X86_64),
      other => Err(format!("unsupported chroot architecture '{}'", other)),
    }
  }
}

impl fmt::Display for ChrootArch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_known_architectures() {
    assert_eq!("x86_32".parse::<ChrootArch>(), Ok(ChrootArch::X86_32));
    assert_eq!("x86_64".parse::<ChrootArch>(), Ok(ChrootArch::X86_64));
    assert!("sparc".parse::<ChrootArch>().is_err());
  }

  #[test]
  fn native_target_needs_no_switch() {
    if let Some(host) = ChrootArch::host() {
      assert!(!host.needs_personality_switch());
    }
  }
}
