//! Unix-style permission checking: owner/group/other triplet from `mode`,
//! with a POSIX-1003.1e ACL algorithm used instead when a
//! `system.posix_acl_access` xattr is present.

use serde::{Deserialize, Serialize};
use vfscore_errno::{Result, VfsError};
use vfscore_store::{Inode, XATTR_ACL_ACCESS};

use crate::constants::{S_IXGRP, S_IXOTH, S_IXUSR, S_ISGID, S_ISUID, S_ISVTX};

pub const NGROUPS_MAX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
    ReadWrite,
    Exists,
}

impl AccessMode {
    fn required_bits(self) -> u32 {
        match self {
            AccessMode::Read => 0o4,
            AccessMode::Write => 0o2,
            AccessMode::Execute => 0o1,
            AccessMode::ReadWrite => 0o6,
            AccessMode::Exists => 0o0,
        }
    }
}

/// Active credential set for a permission check. Any zero-valued id in the
/// active set grants root-equivalent privileges for the affected check.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
    pub suid: u32,
    pub sgid: u32,
    pub groups: [u32; NGROUPS_MAX],
    pub ngroups: usize,
}

impl Credentials {
    pub const fn root() -> Self {
        Credentials {
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            suid: 0,
            sgid: 0,
            groups: [0; NGROUPS_MAX],
            ngroups: 0,
        }
    }

    pub const fn new(uid: u32, gid: u32) -> Self {
        Credentials {
            uid,
            gid,
            euid: uid,
            egid: gid,
            suid: uid,
            sgid: gid,
            groups: [0; NGROUPS_MAX],
            ngroups: 0,
        }
    }

    /// Any zero-valued id in the active set grants root-equivalent access.
    pub fn is_root(&self) -> bool {
        self.euid == 0 || self.uid == 0
    }

    pub fn in_group(&self, gid: u32) -> bool {
        if self.egid == gid {
            return true;
        }
        self.groups[..self.ngroups].contains(&gid)
    }

    pub fn add_group(&mut self, gid: u32) -> bool {
        if self.ngroups >= NGROUPS_MAX {
            return false;
        }
        if self.in_group(gid) {
            return true;
        }
        self.groups[self.ngroups] = gid;
        self.ngroups += 1;
        true
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::root()
    }
}

/// One entry of a POSIX-1003.1e access ACL, serialized into the
/// `system.posix_acl_access` xattr as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AclEntry {
    UserObj { perm: u32 },
    User { uid: u32, perm: u32 },
    GroupObj { perm: u32 },
    Group { gid: u32, perm: u32 },
    Mask { perm: u32 },
    Other { perm: u32 },
}

pub fn serialize_acl(entries: &[AclEntry]) -> Vec<u8> {
    serde_json::to_vec(entries).expect("serializing an ACL to JSON cannot fail")
}

pub fn parse_acl(bytes: &[u8]) -> Result<Vec<AclEntry>> {
    serde_json::from_slice(bytes)
        .map_err(|e| VfsError::invalid("acl", "<xattr>").with_message(e.to_string()))
}

fn effective_mask(entries: &[AclEntry]) -> u32 {
    entries
        .iter()
        .find_map(|e| match e {
            AclEntry::Mask { perm } => Some(*perm),
            _ => None,
        })
        .unwrap_or(0o7)
}

/// Evaluate a parsed ACL against `creds`, POSIX-1003.1e order: user-obj,
/// named users, group-obj ∪ named groups (masked), other. `owner_uid`/
/// `owner_gid` come from the inode, since `UserObj`/`GroupObj` entries
/// name a role rather than carrying the id themselves.
fn check_acl(entries: &[AclEntry], creds: &Credentials, access: AccessMode, owner_uid: u32, owner_gid: u32) -> bool {
    let required = access.required_bits();

    if creds.euid == owner_uid {
        if let Some(AclEntry::UserObj { perm }) = entries.iter().find(|e| matches!(e, AclEntry::UserObj { .. })) {
            return (*perm & required) == required;
        }
    }
    for entry in entries {
        if let AclEntry::User { uid, perm } = entry {
            if creds.euid == *uid {
                return (*perm & effective_mask(entries) & required) == required;
            }
        }
    }

    let mut group_hit = false;
    let mut group_perm = 0u32;
    if creds.in_group(owner_gid) {
        if let Some(AclEntry::GroupObj { perm }) = entries.iter().find(|e| matches!(e, AclEntry::GroupObj { .. })) {
            group_hit = true;
            group_perm |= perm;
        }
    }
    for entry in entries {
        if let AclEntry::Group { gid, perm } = entry {
            if creds.in_group(*gid) {
                group_hit = true;
                group_perm |= perm;
            }
        }
    }
    if group_hit {
        return (group_perm & effective_mask(entries) & required) == required;
    }

    if let Some(AclEntry::Other { perm }) = entries.iter().find(|e| matches!(e, AclEntry::Other { .. })) {
        return (*perm & required) == required;
    }
    false
}

/// Check whether `creds` may perform `access` against `inode`. If a
/// `system.posix_acl_access` xattr is present, evaluate it; otherwise fall
/// through to the owner/group/other triplet in `mode`.
pub fn check_permission(creds: &Credentials, inode: &Inode, access: AccessMode) -> Result<()> {
    if access == AccessMode::Exists {
        return Ok(());
    }
    if creds.is_root() {
        if access == AccessMode::Execute {
            let any_exec = inode.mode & (S_IXUSR | S_IXGRP | S_IXOTH);
            if any_exec == 0 {
                return Err(VfsError::access("access", "<inode>"));
            }
        }
        return Ok(());
    }

    if let Some(acl_bytes) = inode.acl() {
        let entries = parse_acl(acl_bytes)?;
        return if check_acl(&entries, creds, access, inode.uid, inode.gid) {
            Ok(())
        } else {
            Err(VfsError::access("access", "<inode>"))
        };
    }

    let perm_bits = if creds.euid == inode.uid {
        (inode.mode >> 6) & 0o7
    } else if creds.in_group(inode.gid) {
        (inode.mode >> 3) & 0o7
    } else {
        inode.mode & 0o7
    };
    let required = access.required_bits();
    if (perm_bits & required) == required {
        Ok(())
    } else {
        Err(VfsError::access("access", "<inode>"))
    }
}

pub fn can_chmod(creds: &Credentials, inode: &Inode) -> bool {
    creds.is_root() || creds.euid == inode.uid
}

pub fn can_chown(creds: &Credentials) -> bool {
    creds.is_root()
}

/// Requires write on the directory; if the sticky bit is set, only the
/// file owner, the directory owner, or root may delete.
pub fn can_delete(creds: &Credentials, dir: &Inode, file: &Inode) -> Result<()> {
    check_permission(creds, dir, AccessMode::Write)?;
    if dir.mode & S_ISVTX != 0 && !creds.is_root() && creds.euid != file.uid && creds.euid != dir.uid {
        return Err(VfsError::access("unlink", "<inode>"));
    }
    Ok(())
}

pub fn format_mode_octal(mode: u32) -> [u8; 4] {
    let perms = mode & 0o7777;
    [
        b'0' + ((perms >> 9) & 0o7) as u8,
        b'0' + ((perms >> 6) & 0o7) as u8,
        b'0' + ((perms >> 3) & 0o7) as u8,
        b'0' + (perms & 0o7) as u8,
    ]
}

pub fn format_mode_string(mode: u32) -> [u8; 9] {
    let mut s = [b'-'; 9];
    for (bit, ch, idx) in [
        (0o400, b'r', 0),
        (0o200, b'w', 1),
        (0o100, b'x', 2),
        (0o040, b'r', 3),
        (0o020, b'w', 4),
        (0o010, b'x', 5),
        (0o004, b'r', 6),
        (0o002, b'w', 7),
        (0o001, b'x', 8),
    ] {
        if mode & bit != 0 {
            s[idx] = ch;
        }
    }
    if mode & S_ISUID != 0 {
        s[2] = if mode & 0o100 != 0 { b's' } else { b'S' };
    }
    if mode & S_ISGID != 0 {
        s[5] = if mode & 0o010 != 0 { b's' } else { b'S' };
    }
    if mode & S_ISVTX != 0 {
        s[8] = if mode & 0o001 != 0 { b't' } else { b'T' };
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfscore_store::Inode;

    fn make_inode(mode: u32, uid: u32, gid: u32) -> Inode {
        Inode::new(1, 2, mode, uid, gid, 0)
    }

    #[test]
    fn root_bypasses_checks_except_bare_execute() {
        let creds = Credentials::root();
        let inode = make_inode(0o000, 1000, 1000);
        assert!(check_permission(&creds, &inode, AccessMode::Read).is_ok());
        assert!(check_permission(&creds, &inode, AccessMode::Execute).is_err());
        let exec_inode = make_inode(0o001, 1000, 1000);
        assert!(check_permission(&creds, &exec_inode, AccessMode::Execute).is_ok());
    }

    #[test]
    fn owner_group_other_triplet() {
        let owner = Credentials::new(1000, 1000);
        let inode = make_inode(0o740, 1000, 2000);
        assert!(check_permission(&owner, &inode, AccessMode::Read).is_ok());
        assert!(check_permission(&owner, &inode, AccessMode::Write).is_ok());
        assert!(check_permission(&owner, &inode, AccessMode::Execute).is_err());

        let other = Credentials::new(3000, 3000);
        assert!(check_permission(&other, &inode, AccessMode::Read).is_err());
    }

    #[test]
    fn acl_present_overrides_mode_bits() {
        let mut inode = make_inode(0o000, 1000, 1000);
        let acl = vec![
            AclEntry::UserObj { perm: 0o7 },
            AclEntry::GroupObj { perm: 0o0 },
            AclEntry::Other { perm: 0o0 },
            AclEntry::User { uid: 2000, perm: 0o4 },
            AclEntry::Mask { perm: 0o7 },
        ];
        inode
            .attributes
            .insert(XATTR_ACL_ACCESS.to_string(), serialize_acl(&acl));

        let named_user = Credentials::new(2000, 9000);
        assert!(check_permission(&named_user, &inode, AccessMode::Read).is_ok());
        assert!(check_permission(&named_user, &inode, AccessMode::Write).is_err());

        let stranger = Credentials::new(3000, 3000);
        assert!(check_permission(&stranger, &inode, AccessMode::Read).is_err());
    }

    #[test]
    fn sticky_bit_restricts_deletion_to_owner() {
        let dir = make_inode(0o1777, 0, 0);
        let file_owner = Credentials::new(1000, 1000);
        let file = make_inode(0o644, 1000, 1000);
        assert!(can_delete(&file_owner, &dir, &file).is_ok());

        let other = Credentials::new(2000, 2000);
        assert!(can_delete(&other, &dir, &file).is_err());
    }

    #[test]
    fn format_mode_matches_ls_style() {
        assert_eq!(format_mode_octal(0o755), [b'0', b'7', b'5', b'5']);
        assert_eq!(
            format_mode_string(0o755),
            [b'r', b'w', b'x', b'r', b'-', b'x', b'r', b'-', b'x']
        );
    }
}
