//! Request registry
//!
//! Every request the relay serves is described by one static descriptor:
//! its kind (user-targeted or host-targeted), the extra argument fields it
//! requires, whether its results are post-filtered against the caller's ACL,
//! and which agent operation it maps to. Lookups are by lower-cased name;
//! an unknown name is a lookup miss, answered as `invalid`.

/// Whether a request targets logged-in users or whole hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Args carry user identities (username/server/client/display)
    User,
    /// Args carry host identities (server)
    Server,
}

/// Agent operation a request maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Served from the registry cache, no agent round-trip
    ListUsers,
    /// Served from the registry cache, no agent round-trip
    ListServers,
    Processes,
    KillProcesses,
    Thumbnails,
    Vnc,
    SendMessage,
    Logout,
    LockScreen,
    OpenUrl,
    Login,
    Shutdown,
}

/// Placeholder value inserted on items that never reach an agent, keeping
/// the response shape uniform
#[derive(Debug, Clone, Copy)]
pub enum Placeholder {
    EmptyList,
    EmptyString,
}

/// Static description of one request
pub struct Descriptor {
    /// Lower-cased request name
    pub name: &'static str,
    pub kind: RequestKind,
    /// Extra fields each argument item must carry
    pub required: &'static [&'static str],
    /// Whether results are filtered against the caller's ACL before sending
    pub post_filter: bool,
    /// Output fields to default on items answered locally
    pub placeholders: &'static [(&'static str, Placeholder)],
    pub operation: Operation,
}

static REQUESTS: &[Descriptor] = &[
    Descriptor {
        name: "listusers",
        kind: RequestKind::User,
        required: &[],
        post_filter: true,
        placeholders: &[],
        operation: Operation::ListUsers,
    },
    Descriptor {
        name: "listservers",
        kind: RequestKind::Server,
        required: &[],
        post_filter: true,
        placeholders: &[],
        operation: Operation::ListServers,
    },
    Descriptor {
        name: "listprocesses",
        kind: RequestKind::User,
        required: &[],
        post_filter: false,
        placeholders: &[("processes", Placeholder::EmptyList)],
        operation: Operation::Processes,
    },
    Descriptor {
        name: "killprocesses",
        kind: RequestKind::User,
        required: &["pid"],
        post_filter: false,
        placeholders: &[],
        operation: Operation::KillProcesses,
    },
    Descriptor {
        name: "getthumbnails",
        kind: RequestKind::User,
        required: &[],
        post_filter: false,
        placeholders: &[("thumbnail", Placeholder::EmptyString)],
        operation: Operation::Thumbnails,
    },
    Descriptor {
        name: "vnc",
        kind: RequestKind::User,
        required: &[],
        post_filter: false,
        placeholders: &[("port", Placeholder::EmptyString)],
        operation: Operation::Vnc,
    },
    Descriptor {
        name: "sendmessage",
        kind: RequestKind::User,
        required: &["message"],
        post_filter: false,
        placeholders: &[],
        operation: Operation::SendMessage,
    },
    Descriptor {
        name: "logout",
        kind: RequestKind::User,
        required: &[],
        post_filter: false,
        placeholders: &[],
        operation: Operation::Logout,
    },
    Descriptor {
        name: "lockscreen",
        kind: RequestKind::User,
        required: &[],
        post_filter: false,
        placeholders: &[],
        operation: Operation::LockScreen,
    },
    Descriptor {
        name: "openurl",
        kind: RequestKind::User,
        required: &["url"],
        post_filter: false,
        placeholders: &[],
        operation: Operation::OpenUrl,
    },
    Descriptor {
        name: "login",
        kind: RequestKind::Server,
        required: &[],
        post_filter: false,
        placeholders: &[],
        operation: Operation::Login,
    },
    Descriptor {
        name: "shutdown",
        kind: RequestKind::Server,
        required: &["action"],
        post_filter: false,
        placeholders: &[],
        operation: Operation::Shutdown,
    },
];

/// Look up a request descriptor, case-insensitively
pub fn lookup(name: &str) -> Option<&'static Descriptor> {
    let lower = name.to_ascii_lowercase();
    REQUESTS.iter().find(|d| d.name == lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(lookup("listUsers").is_some());
        assert!(lookup("LISTUSERS").is_some());
        assert!(lookup("killProcesses").is_some());
    }

    #[test]
    fn test_unknown_is_miss() {
        assert!(lookup("rebootEverything").is_none());
    }

    #[test]
    fn test_kinds_and_flags() {
        assert_eq!(lookup("listUsers").unwrap().kind, RequestKind::User);
        assert!(lookup("listUsers").unwrap().post_filter);
        assert_eq!(lookup("shutdown").unwrap().kind, RequestKind::Server);
        assert_eq!(lookup("shutdown").unwrap().required, &["action"]);
        assert!(!lookup("vnc").unwrap().post_filter);
    }
}
