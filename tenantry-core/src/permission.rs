//! Permission bitmask
//!
//! A [`Permission`] is six independent flags, one per (role, right) pair:
//!
//! ```text
//!   user    group   world
//!   r  w    r  w    r  w
//!   5  4    3  2    1  0     <- bit index in the storage column
//! ```
//!
//! WRITE for a role always implies READ for the same role. The invariant is
//! checked whenever a value is built from untrusted input, so every
//! `Permission` in circulation satisfies it.

use crate::error::{TenantryError, TenantryResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Raw permission flags as stored in the 6-bit permission column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PermissionBits: u8 {
        const USER_READ   = 0b10_0000;
        const USER_WRITE  = 0b01_0000;
        const GROUP_READ  = 0b00_1000;
        const GROUP_WRITE = 0b00_0100;
        const WORLD_READ  = 0b00_0010;
        const WORLD_WRITE = 0b00_0001;
    }
}

/// Who a permission flag applies to, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionRole {
    User,
    Group,
    World,
}

impl PermissionRole {
    pub const ALL: [PermissionRole; 3] = [Self::User, Self::Group, Self::World];
}

/// The two flag kinds a permission role can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionRight {
    Read,
    Write,
}

fn flag(role: PermissionRole, right: PermissionRight) -> PermissionBits {
    match (role, right) {
        (PermissionRole::User, PermissionRight::Read) => PermissionBits::USER_READ,
        (PermissionRole::User, PermissionRight::Write) => PermissionBits::USER_WRITE,
        (PermissionRole::Group, PermissionRight::Read) => PermissionBits::GROUP_READ,
        (PermissionRole::Group, PermissionRight::Write) => PermissionBits::GROUP_WRITE,
        (PermissionRole::World, PermissionRight::Read) => PermissionBits::WORLD_READ,
        (PermissionRole::World, PermissionRight::Write) => PermissionBits::WORLD_WRITE,
    }
}

/// Immutable permission value attached to every securable object and group.
///
/// # Example
///
/// ```
/// use tenantry_core::{Permission, PermissionRight, PermissionRole};
///
/// let perm: Permission = "rwrw--".parse().unwrap();
/// assert!(perm.identical(&Permission::COLLAB_READLINK));
/// assert!(perm.is_granted(PermissionRole::Group, PermissionRight::Write));
/// assert!(!perm.is_granted(PermissionRole::World, PermissionRight::Read));
/// assert_eq!(perm.to_string(), "rwrw--");
///
/// // WRITE without READ is not a permission
/// assert!("rw-w--".parse::<Permission>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    bits: PermissionBits,
}

impl Permission {
    /// Only the owner reads and writes.
    pub const PRIVATE: Permission = Permission::from_valid(0b11_0000);
    pub const USER_PRIVATE: Permission = Self::PRIVATE;
    /// Same bits as `PRIVATE`; group owners still reach the data through their role.
    pub const GROUP_PRIVATE: Permission = Self::PRIVATE;
    /// Members may read but neither link nor edit others' objects.
    pub const GROUP_READABLE: Permission = Permission::from_valid(0b11_1000);
    pub const COLLAB_READONLY: Permission = Self::GROUP_READABLE;
    /// Members may read and link, but not edit others' core data.
    pub const COLLAB_READLINK: Permission = Permission::from_valid(0b11_1100);
    /// Every bit set; non-members read and link through the world bits.
    pub const PUBLIC: Permission = Permission::from_valid(0b11_1111);
    pub const WORLD_WRITEABLE: Permission = Self::PUBLIC;

    const fn from_valid(bits: u8) -> Self {
        Self {
            bits: PermissionBits::from_bits_truncate(bits),
        }
    }

    /// Build a permission from an explicit flag set, enforcing WRITE => READ.
    pub fn new(bits: PermissionBits) -> TenantryResult<Self> {
        for role in PermissionRole::ALL {
            let read = flag(role, PermissionRight::Read);
            let write = flag(role, PermissionRight::Write);
            if bits.contains(write) && !bits.contains(read) {
                return Err(TenantryError::InvalidPermission {
                    message: format!("{:?} write granted without {:?} read", role, role),
                    input: format!("{:#08b}", bits.bits()),
                });
            }
        }
        Ok(Self { bits })
    }

    /// Decode the 6-bit storage column.
    pub fn from_bits(raw: u8) -> TenantryResult<Self> {
        let bits = PermissionBits::from_bits(raw).ok_or_else(|| TenantryError::InvalidPermission {
            message: "value does not fit in six bits".to_string(),
            input: raw.to_string(),
        })?;
        Self::new(bits)
    }

    /// The 6-bit storage column value.
    pub fn bits(&self) -> u8 {
        self.bits.bits()
    }

    pub fn flags(&self) -> PermissionBits {
        self.bits
    }

    pub fn is_granted(&self, role: PermissionRole, right: PermissionRight) -> bool {
        self.bits.contains(flag(role, right))
    }

    /// Structural equality
    pub fn identical(&self, other: &Permission) -> bool {
        self.bits == other.bits
    }

    /// True when every flag set here is also set in `ceiling`.
    pub fn is_within(&self, ceiling: &Permission) -> bool {
        ceiling.bits.contains(self.bits)
    }

    /// Members of the group may at least read.
    pub fn is_group_readable(&self) -> bool {
        self.is_granted(PermissionRole::Group, PermissionRight::Read)
    }

    /// Returns a new permission with one flag granted, READ following WRITE.
    pub fn grant(&self, role: PermissionRole, right: PermissionRight) -> Self {
        let mut bits = self.bits | flag(role, right);
        if right == PermissionRight::Write {
            bits |= flag(role, PermissionRight::Read);
        }
        Self { bits }
    }

    /// Returns a new permission with one flag revoked, WRITE following READ.
    pub fn revoke(&self, role: PermissionRole, right: PermissionRight) -> Self {
        let mut bits = self.bits - flag(role, right);
        if right == PermissionRight::Read {
            bits -= flag(role, PermissionRight::Write);
        }
        Self { bits }
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self::PRIVATE
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for role in PermissionRole::ALL {
            let r = if self.is_granted(role, PermissionRight::Read) { 'r' } else { '-' };
            let w = if self.is_granted(role, PermissionRight::Write) { 'w' } else { '-' };
            write!(f, "{}{}", r, w)?;
        }
        Ok(())
    }
}

impl FromStr for Permission {
    type Err = TenantryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 6 {
            return Err(TenantryError::InvalidPermission {
                message: "expected a 6-character code such as rwr---".to_string(),
                input: s.to_string(),
            });
        }

        let mut bits = PermissionBits::empty();
        for (index, role) in PermissionRole::ALL.into_iter().enumerate() {
            match chars[index * 2] {
                'r' => bits |= flag(role, PermissionRight::Read),
                '-' => {}
                other => {
                    return Err(TenantryError::InvalidPermission {
                        message: format!("unexpected '{}' in read position", other),
                        input: s.to_string(),
                    })
                }
            }
            match chars[index * 2 + 1] {
                'w' => bits |= flag(role, PermissionRight::Write),
                '-' => {}
                other => {
                    return Err(TenantryError::InvalidPermission {
                        message: format!("unexpected '{}' in write position", other),
                        input: s.to_string(),
                    })
                }
            }
        }

        Self::new(bits).map_err(|_| TenantryError::InvalidPermission {
            message: "write granted without read for the same role".to_string(),
            input: s.to_string(),
        })
    }
}

impl TryFrom<String> for Permission {
    type Error = TenantryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_constants_render_canonical_codes() {
        assert_eq!(Permission::PRIVATE.to_string(), "rw----");
        assert_eq!(Permission::COLLAB_READONLY.to_string(), "rwr---");
        assert_eq!(Permission::COLLAB_READLINK.to_string(), "rwrw--");
        assert_eq!(Permission::PUBLIC.to_string(), "rwrwrw");
        assert!(Permission::WORLD_WRITEABLE.identical(&Permission::PUBLIC));
        assert!(Permission::GROUP_PRIVATE.identical(&Permission::USER_PRIVATE));
    }

    #[test]
    fn write_always_implies_read() {
        for raw in 0u8..64 {
            let Ok(perm) = Permission::from_bits(raw) else {
                continue;
            };
            for role in PermissionRole::ALL {
                if perm.is_granted(role, PermissionRight::Write) {
                    assert!(
                        perm.is_granted(role, PermissionRight::Read),
                        "{} grants {:?} write without read",
                        perm,
                        role
                    );
                }
            }
        }
    }

    #[test]
    fn write_without_read_is_rejected() {
        let err = Permission::new(PermissionBits::USER_READ | PermissionBits::GROUP_WRITE)
            .expect_err("group write without group read");
        assert!(matches!(err, TenantryError::InvalidPermission { .. }));

        assert!("-w----".parse::<Permission>().is_err());
        assert!("rwrw-w".parse::<Permission>().is_err());
    }

    #[test]
    fn malformed_codes_are_rejected() {
        assert!("rwr--".parse::<Permission>().is_err());
        assert!("rwx---".parse::<Permission>().is_err());
        assert!(Permission::from_bits(0b100_0000).is_err());
    }

    #[test]
    fn storage_column_matches_string_form() {
        let perm: Permission = "rwr---".parse().unwrap();
        assert_eq!(perm.bits(), 0b11_1000);
        assert_eq!(Permission::from_bits(perm.bits()).unwrap(), perm);
    }

    #[test]
    fn ceiling_is_a_subset_check() {
        assert!(Permission::PRIVATE.is_within(&Permission::COLLAB_READONLY));
        assert!(Permission::COLLAB_READONLY.is_within(&Permission::COLLAB_READONLY));
        assert!(!Permission::COLLAB_READLINK.is_within(&Permission::COLLAB_READONLY));
    }

    #[test]
    fn grant_and_revoke_return_new_values() {
        let base = Permission::PRIVATE;
        let linked = base.grant(PermissionRole::Group, PermissionRight::Write);
        assert_eq!(linked, Permission::COLLAB_READLINK);
        assert_eq!(base, Permission::PRIVATE);

        let private = linked.revoke(PermissionRole::Group, PermissionRight::Read);
        assert_eq!(private, Permission::PRIVATE);
    }

    #[test]
    fn serde_uses_the_string_form() {
        let json = serde_json::to_string(&Permission::COLLAB_READLINK).unwrap();
        assert_eq!(json, "\"rwrw--\"");
        let back: Permission = serde_json::from_str("\"rwr---\"").unwrap();
        assert_eq!(back, Permission::COLLAB_READONLY);
        assert!(serde_json::from_str::<Permission>("\"--w---\"").is_err());
    }
}
