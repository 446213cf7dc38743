//! Identity lookups against the system user and group databases
//!
//! Used to turn the UID from a client socket's peer credentials into a
//! username, and to resolve `@group` references in ACL rules.

use std::ffi::{CStr, CString};

/// Resolve a UID to its username. Returns None for unknown UIDs.
pub fn username_for_uid(uid: u32) -> Option<String> {
    let mut buf = vec![0u8; 4096];
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    loop {
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        return Some(name.to_string_lossy().into_owned());
    }
}

/// Username of the effective user of this process
pub fn current_username() -> Option<String> {
    username_for_uid(unsafe { libc::geteuid() })
}

/// Members of a named group. Returns None for unknown groups.
///
/// Only supplementary members are listed, matching the group database;
/// primary-group membership is not reflected here.
pub fn group_members(group: &str) -> Option<Vec<String>> {
    let cname = CString::new(group).ok()?;
    let mut buf = vec![0u8; 4096];
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();

    loop {
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut grp,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }

        let mut members = Vec::new();
        let mut member = grp.gr_mem;
        unsafe {
            while !(*member).is_null() {
                members.push(CStr::from_ptr(*member).to_string_lossy().into_owned());
                member = member.add(1);
            }
        }
        return Some(members);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_for_root() {
        // UID 0 exists on any unix system
        assert_eq!(username_for_uid(0).as_deref(), Some("root"));
    }

    #[test]
    fn test_unknown_group_is_none() {
        assert!(group_members("no-such-group-xyzzy").is_none());
    }
}
