use std::{fs, mem::size_of, path::Path};

use anyhow::{bail, Result};
use flagset::FlagSet;
use getset::CopyGetters;
use serde::{Deserialize, Serialize};

use crate::rights::PageRights;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    pub fn native() -> Self {
        if size_of::<usize>() == 8 {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// `base + offset` wrapped at the target's word size.
    pub fn wrapping_add(self, base: usize, offset: usize) -> usize {
        match self {
            Self::Bits32 => (base as u32).wrapping_add(offset as u32) as usize,
            Self::Bits64 => (base as u64).wrapping_add(offset as u64) as usize,
        }
    }
}

impl Default for PointerWidth {
    fn default() -> Self {
        Self::native()
    }
}

fn default_protection() -> FlagSet<PageRights> {
    PageRights::ExecuteReadWrite.into()
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize, CopyGetters)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Width of the pointers stored in the target process.
    #[getset(get_copy = "pub")]
    pointer_width: PointerWidth,
    /// Protection applied by `make_writable`.
    #[getset(get_copy = "pub")]
    default_protection: FlagSet<PageRights>,
    #[getset(get_copy = "pub")]
    inherit_handle: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pointer_width: PointerWidth::default(),
            default_protection: default_protection(),
            inherit_handle: false,
        }
    }
}

impl Config {
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml)?;
        if config.default_protection.is_empty() {
            bail!("default-protection must not be empty");
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn with_pointer_width(mut self, pointer_width: PointerWidth) -> Self {
        self.pointer_width = pointer_width;
        self
    }

    pub fn with_default_protection(mut self, protection: impl Into<FlagSet<PageRights>>) -> Self {
        self.default_protection = protection.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.pointer_width(), PointerWidth::native());
        assert_eq!(
            config.default_protection(),
            FlagSet::from(PageRights::ExecuteReadWrite)
        );
        assert!(!config.inherit_handle());
    }

    #[test]
    fn parses_all_keys() {
        let config = Config::from_toml_str(
            r#"
            pointer-width = "bits32"
            default-protection = 4
            inherit-handle = true
            "#,
        )
        .unwrap();
        assert_eq!(config.pointer_width(), PointerWidth::Bits32);
        assert_eq!(config.pointer_width().size(), 4);
        assert_eq!(
            config.default_protection(),
            FlagSet::from(PageRights::ReadWrite)
        );
        assert!(config.inherit_handle());
    }

    #[test]
    fn addition_wraps_at_pointer_width() {
        assert_eq!(PointerWidth::Bits32.wrapping_add(0xffff_fff0, 0x20), 0x10);
        assert_eq!(PointerWidth::Bits32.wrapping_add(0x1000, 0xffff_fffc), 0xffc);
        assert_eq!(PointerWidth::Bits32.wrapping_add(0x1000, 0x24), 0x1024);
        assert_eq!(PointerWidth::Bits64.wrapping_add(0x1000, 0x24), 0x1024);
    }

    #[test]
    fn rejects_bad_protection() {
        assert!(Config::from_toml_str("default-protection = 0").is_err());
        assert!(Config::from_toml_str(r#"pointer-width = "bits16""#).is_err());
    }
}
