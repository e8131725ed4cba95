//! Assembly identities.
//!
//! An [`AssemblyIdentity`] is the name, version, culture and strong-name information of an
//! assembly. Identities are parsed from and rendered to the .NET display-name format
//! (`Name, Version=1.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089`), which is
//! also the form compiled markup stores in its assembly table.

use std::fmt::{self, Write as _};

use sha1::{Digest, Sha1};

use crate::{file::io::read_le, Result};

/// Strong-name information of an assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Full public key
    PubKey(Vec<u8>),
    /// 8-byte public key token, stored so that `to_le_bytes` yields display order
    Token(u64),
}

impl Identity {
    /// Public key token of this identity.
    ///
    /// For a full key this is the last 8 bytes of its SHA-1 hash in reverse order,
    /// the derivation the runtime uses for display names.
    ///
    /// # Errors
    /// Returns an error if the hash output is shorter than 8 bytes.
    pub fn to_token(&self) -> Result<u64> {
        match self {
            Identity::PubKey(data) => {
                let mut hash = Sha1::digest(data).to_vec();
                let start = hash
                    .len()
                    .checked_sub(8)
                    .ok_or(out_of_bounds_error!())?;
                let tail = &mut hash[start..];
                tail.reverse();
                read_le::<u64>(tail)
            }
            Identity::Token(token) => Ok(*token),
        }
    }
}

/// Four-part assembly version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version from its components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse `major[.minor[.build[.revision]]]`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for more than four components or a
    /// component that is not a `u16`.
    pub fn parse(version_str: &str) -> Result<Self> {
        let parts: Vec<&str> = version_str.split('.').collect();
        if parts.len() > 4 {
            return Err(malformed_error!("Invalid version format: {}", version_str));
        }

        let mut components = [0u16; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part
                .parse::<u16>()
                .map_err(|_| malformed_error!("Invalid version component: {}", part))?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Complete identity of an assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyIdentity {
    /// Simple name, e.g. `SourceLib`
    pub name: String,
    /// Assembly version
    pub version: AssemblyVersion,
    /// Culture, `None` for culture-neutral assemblies
    pub culture: Option<String>,
    /// Strong-name information, `None` for unsigned assemblies
    pub strong_name: Option<Identity>,
}

impl AssemblyIdentity {
    /// Create a culture-neutral, unsigned identity.
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        Self {
            name: name.into(),
            version,
            culture: None,
            strong_name: None,
        }
    }

    /// Parse a display name. Unknown attributes such as `ProcessorArchitecture` are ignored.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty name, an invalid version or an
    /// invalid public key token.
    pub fn parse(display_name: &str) -> Result<Self> {
        let mut parts = display_name.split(',').map(str::trim);

        let name = parts.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(malformed_error!("Assembly name cannot be empty"));
        }

        let mut identity = Self::new(name, AssemblyVersion::default());
        for part in parts {
            if let Some(value) = part.strip_prefix("Version=") {
                identity.version = AssemblyVersion::parse(value)?;
            } else if let Some(value) = part.strip_prefix("Culture=") {
                if value != "neutral" {
                    identity.culture = Some(value.to_string());
                }
            } else if let Some(value) = part.strip_prefix("PublicKeyToken=") {
                if value != "null" && !value.is_empty() {
                    let token_bytes = hex::decode(value).map_err(|e| {
                        malformed_error!("Invalid hex in PublicKeyToken '{}': {}", value, e)
                    })?;
                    let token_array: [u8; 8] = token_bytes.as_slice().try_into().map_err(|_| {
                        malformed_error!("PublicKeyToken must be 8 bytes, got '{}'", value)
                    })?;
                    identity.strong_name = Some(Identity::Token(u64::from_le_bytes(token_array)));
                }
            }
        }

        Ok(identity)
    }

    /// Public key token, if the assembly is strong-named.
    #[must_use]
    pub fn public_key_token(&self) -> Option<u64> {
        self.strong_name
            .as_ref()
            .and_then(|identity| identity.to_token().ok())
    }

    /// Render the full display name.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut result = String::with_capacity(self.name.len() + 80);
        result.push_str(&self.name);

        let _ = write!(result, ", Version={}", self.version);
        let _ = write!(
            result,
            ", Culture={}",
            self.culture.as_deref().unwrap_or("neutral")
        );

        result.push_str(", PublicKeyToken=");
        match self.public_key_token() {
            Some(token) => result.push_str(&hex::encode(token.to_le_bytes())),
            None => result.push_str("null"),
        }

        result
    }

    /// Same assembly, ignoring strong-name representation differences.
    #[must_use]
    pub fn matches(&self, other: &AssemblyIdentity) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.culture == other.culture
            && self.public_key_token() == other.public_key_token()
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Simple name portion of a display name.
#[must_use]
pub fn short_name(display_name: &str) -> &str {
    display_name
        .split(',')
        .next()
        .map(str::trim)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_display_name() {
        let identity = AssemblyIdentity::parse(
            "System.Runtime, Version=8.0.0.0, Culture=neutral, PublicKeyToken=b03f5f7f11d50a3a",
        )
        .unwrap();

        assert_eq!(identity.name, "System.Runtime");
        assert_eq!(identity.version, AssemblyVersion::new(8, 0, 0, 0));
        assert!(identity.culture.is_none());
        assert_eq!(
            identity.display_name(),
            "System.Runtime, Version=8.0.0.0, Culture=neutral, PublicKeyToken=b03f5f7f11d50a3a"
        );
    }

    #[test]
    fn parse_simple_name() {
        let identity = AssemblyIdentity::parse("Merged").unwrap();
        assert_eq!(
            identity.display_name(),
            "Merged, Version=0.0.0.0, Culture=neutral, PublicKeyToken=null"
        );
    }

    #[test]
    fn parse_ignores_processor_architecture() {
        let identity =
            AssemblyIdentity::parse("Lib, Version=1.2, Culture=de-DE, ProcessorArchitecture=MSIL")
                .unwrap();
        assert_eq!(identity.version, AssemblyVersion::new(1, 2, 0, 0));
        assert_eq!(identity.culture.as_deref(), Some("de-DE"));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(AssemblyIdentity::parse("").is_err());
        assert!(AssemblyIdentity::parse("Lib, Version=1.2.3.4.5").is_err());
        assert!(AssemblyIdentity::parse("Lib, PublicKeyToken=abcd").is_err());
        assert!(AssemblyIdentity::parse("Lib, PublicKeyToken=zz3f5f7f11d50a3a").is_err());
    }

    #[test]
    fn token_from_public_key() {
        // ECMA standard public key, token b77a5c561934e089
        let ecma_key = vec![0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
        let token = Identity::PubKey(ecma_key)
            .to_token()
            .unwrap();
        assert_eq!(hex::encode(token.to_le_bytes()), "b77a5c561934e089");
    }

    #[test]
    fn matches_ignores_key_representation() {
        let ecma_key = vec![0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
        let mut with_key = AssemblyIdentity::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0));
        with_key.strong_name = Some(Identity::PubKey(ecma_key));

        let with_token = AssemblyIdentity::parse(
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089",
        )
        .unwrap();

        assert!(with_key.matches(&with_token));
        assert_ne!(with_key, with_token);
    }

    #[test]
    fn short_name_of_display_name() {
        assert_eq!(short_name("SourceLib, Version=1.0.0.0"), "SourceLib");
        assert_eq!(short_name("SourceLib"), "SourceLib");
    }
}
