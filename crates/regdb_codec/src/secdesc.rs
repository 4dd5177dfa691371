//! Security descriptors and their stored form.
//!
//! The registry stores descriptors opaquely; this module only provides a
//! structured in-memory form and a stable byte encoding (CBOR via
//! `ciborium`). Access checks are not performed anywhere in regdb.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The only descriptor revision in use.
pub const SECURITY_DESCRIPTOR_REVISION_1: u8 = 1;

/// A security identifier such as `S-1-5-32-544`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sid {
    /// SID revision, always 1 in practice.
    pub revision: u8,
    /// 48-bit identifier authority.
    pub authority: u64,
    /// Sub-authorities, at most 15.
    pub sub_authorities: Vec<u32>,
}

impl Sid {
    /// Maximum number of sub-authorities.
    pub const MAX_SUB_AUTHORITIES: usize = 15;

    /// Creates a revision-1 SID.
    #[must_use]
    pub fn new(authority: u64, sub_authorities: &[u32]) -> Self {
        Self {
            revision: 1,
            authority,
            sub_authorities: sub_authorities.to_vec(),
        }
    }

    /// `S-1-1-0`, everyone.
    #[must_use]
    pub fn world() -> Self {
        Self::new(1, &[0])
    }

    /// `S-1-5-18`, the local system account.
    #[must_use]
    pub fn local_system() -> Self {
        Self::new(5, &[18])
    }

    /// `S-1-5-32-544`, the builtin administrators group.
    #[must_use]
    pub fn builtin_administrators() -> Self {
        Self::new(5, &[32, 544])
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority >= 1 << 32 {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = CodecError;

    fn from_str(s: &str) -> CodecResult<Self> {
        let invalid = || CodecError::decoding_failed(format!("invalid SID string: {s:?}"));

        let mut parts = s.split('-');
        if !parts.next().is_some_and(|p| p.eq_ignore_ascii_case("S")) {
            return Err(invalid());
        }
        let revision = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(invalid)?;
        let authority_text = parts.next().ok_or_else(invalid)?;
        let authority = match authority_text
            .strip_prefix("0x")
            .or_else(|| authority_text.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
            None => authority_text.parse::<u64>().map_err(|_| invalid())?,
        };
        if authority >= 1 << 48 {
            return Err(invalid());
        }

        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<CodecResult<Vec<_>>>()?;
        if sub_authorities.len() > Self::MAX_SUB_AUTHORITIES {
            return Err(invalid());
        }

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }
}

/// The kind of an access control entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AceType {
    /// Grants the access mask.
    AccessAllowed,
    /// Denies the access mask.
    AccessDenied,
    /// Audits use of the access mask.
    SystemAudit,
}

/// An access control entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    /// Entry kind.
    pub ace_type: AceType,
    /// Inheritance and audit flags.
    pub flags: u8,
    /// Access mask.
    pub access_mask: u32,
    /// Trustee.
    pub trustee: Sid,
}

impl Ace {
    /// Creates an allow entry with no flags.
    #[must_use]
    pub fn allow(trustee: Sid, access_mask: u32) -> Self {
        Self {
            ace_type: AceType::AccessAllowed,
            flags: 0,
            access_mask,
            trustee,
        }
    }

    /// Creates a deny entry with no flags.
    #[must_use]
    pub fn deny(trustee: Sid, access_mask: u32) -> Self {
        Self {
            ace_type: AceType::AccessDenied,
            flags: 0,
            access_mask,
            trustee,
        }
    }
}

/// An ordered access control list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// ACL revision.
    pub revision: u8,
    /// Entries, evaluated in order.
    pub aces: Vec<Ace>,
}

impl Acl {
    /// Creates a revision-2 ACL from entries.
    #[must_use]
    pub fn new(aces: Vec<Ace>) -> Self {
        Self { revision: 2, aces }
    }
}

/// A security descriptor attached to a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    /// Descriptor revision.
    pub revision: u8,
    /// Control flags (`SE_*`).
    pub control: u16,
    /// Owner SID.
    pub owner: Option<Sid>,
    /// Primary group SID.
    pub group: Option<Sid>,
    /// System (audit) ACL.
    pub sacl: Option<Acl>,
    /// Discretionary ACL.
    pub dacl: Option<Acl>,
}

impl SecurityDescriptor {
    /// A DACL is present.
    pub const SE_DACL_PRESENT: u16 = 0x0004;
    /// A SACL is present.
    pub const SE_SACL_PRESENT: u16 = 0x0010;
    /// The descriptor is self-relative.
    pub const SE_SELF_RELATIVE: u16 = 0x8000;

    /// Creates an empty self-relative descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            revision: SECURITY_DESCRIPTOR_REVISION_1,
            control: Self::SE_SELF_RELATIVE,
            owner: None,
            group: None,
            sacl: None,
            dacl: None,
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: Sid) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the primary group.
    #[must_use]
    pub fn with_group(mut self, group: Sid) -> Self {
        self.group = Some(group);
        self
    }

    /// Sets the DACL and its control flag.
    #[must_use]
    pub fn with_dacl(mut self, dacl: Acl) -> Self {
        self.dacl = Some(dacl);
        self.control |= Self::SE_DACL_PRESENT;
        self
    }

    /// Sets the SACL and its control flag.
    #[must_use]
    pub fn with_sacl(mut self, sacl: Acl) -> Self {
        self.sacl = Some(sacl);
        self.control |= Self::SE_SACL_PRESENT;
        self
    }
}

impl Default for SecurityDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a descriptor for storage.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn marshal_sec_desc(sd: &SecurityDescriptor) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(sd, &mut buf).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a stored descriptor.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not a valid
/// descriptor or carry an unsupported revision.
pub fn unmarshal_sec_desc(bytes: &[u8]) -> CodecResult<SecurityDescriptor> {
    let sd: SecurityDescriptor =
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))?;

    if sd.revision != SECURITY_DESCRIPTOR_REVISION_1 {
        return Err(CodecError::decoding_failed(format!(
            "unsupported security descriptor revision {}",
            sd.revision
        )));
    }
    Ok(sd)
}
