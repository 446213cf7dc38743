//! Authorization engine
//!
//! One rule per configuration line, `who = filter: requests`:
//!
//! - `who`: one or more of `@group` or a bare username (the user connecting
//!   to the relay)
//! - `filter`: the keyword `ALL`, or one or more of `@group` / `sameLocation`
//! - `requests`: the keyword `ALL`, or one or more request names
//!
//! `ALL` and `sameLocation` are matched case-insensitively and normalized on
//! parse; request names are folded to lower case. Mixing `ALL` with any
//! other token in the same section is a parse error, as is an empty section.
//!
//! Group membership for `appliesTo` is resolved through [`GroupLookup`] at
//! evaluation time, so membership changes take effect without a reparse.
//! The groups and location of a *subject* user come from the agent-reported
//! session record instead.

use crate::error::AclParseError;
use crate::types::SessionUser;
use std::collections::HashSet;

/// Source of relay-side group membership
pub trait GroupLookup: Send + Sync {
    /// Usernames that are members of `group`. Unknown groups are empty.
    fn members(&self, group: &str) -> Vec<String>;
}

/// Group lookups against the system group database
#[cfg(unix)]
pub struct SystemGroups;

#[cfg(unix)]
impl GroupLookup for SystemGroups {
    fn members(&self, group: &str) -> Vec<String> {
        crate::unix::group_members(group).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WhoToken {
    User(String),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterToken {
    Group(String),
    SameLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    All,
    Tokens(Vec<FilterToken>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requests {
    All,
    Named(HashSet<String>),
}

/// One parsed rule of the authorization DSL. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRule {
    who: Vec<WhoToken>,
    filter: Filter,
    requests: Requests,
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_all(s: &str) -> bool {
    s.eq_ignore_ascii_case("ALL")
}

fn is_same_location(s: &str) -> bool {
    s.eq_ignore_ascii_case("sameLocation")
}

/// Parse a `@group` reference, rejecting a bare or empty `@`
fn group_token(token: &str, section: &'static str) -> Result<String, AclParseError> {
    match token.strip_prefix('@') {
        Some(name) if is_identifier(name) => Ok(name.to_string()),
        _ => Err(AclParseError::BadToken {
            section,
            token: token.to_string(),
        }),
    }
}

impl AclRule {
    /// Parse a rule from the configuration key (`who`) and value
    /// (`filter: requests`).
    pub fn parse(who: &str, value: &str) -> Result<Self, AclParseError> {
        let who = Self::parse_who(who)?;
        let (filter_part, requests_part) =
            value.split_once(':').ok_or(AclParseError::MissingColon)?;
        let filter = Self::parse_filter(filter_part)?;
        let requests = Self::parse_requests(requests_part)?;
        Ok(Self {
            who,
            filter,
            requests,
        })
    }

    fn parse_who(input: &str) -> Result<Vec<WhoToken>, AclParseError> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(AclParseError::Empty("who"));
        }
        tokens
            .into_iter()
            .map(|t| {
                if t.starts_with('@') {
                    group_token(t, "who").map(WhoToken::Group)
                } else if is_identifier(t) && !is_all(t) && !is_same_location(t) {
                    Ok(WhoToken::User(t.to_string()))
                } else {
                    Err(AclParseError::BadToken {
                        section: "who",
                        token: t.to_string(),
                    })
                }
            })
            .collect()
    }

    fn parse_filter(input: &str) -> Result<Filter, AclParseError> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(AclParseError::Empty("filter"));
        }
        if tokens.iter().any(|t| is_all(t)) {
            if tokens.len() > 1 {
                return Err(AclParseError::MixedAll("filter"));
            }
            return Ok(Filter::All);
        }
        let tokens = tokens
            .into_iter()
            .map(|t| {
                if t.starts_with('@') {
                    group_token(t, "filter").map(FilterToken::Group)
                } else if is_same_location(t) {
                    Ok(FilterToken::SameLocation)
                } else {
                    Err(AclParseError::BadToken {
                        section: "filter",
                        token: t.to_string(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Filter::Tokens(tokens))
    }

    fn parse_requests(input: &str) -> Result<Requests, AclParseError> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(AclParseError::Empty("requests"));
        }
        if tokens.iter().any(|t| is_all(t)) {
            if tokens.len() > 1 {
                return Err(AclParseError::MixedAll("requests"));
            }
            return Ok(Requests::All);
        }
        let names = tokens
            .into_iter()
            .map(|t| {
                if is_identifier(t) && !is_same_location(t) {
                    Ok(t.to_ascii_lowercase())
                } else {
                    Err(AclParseError::BadToken {
                        section: "requests",
                        token: t.to_string(),
                    })
                }
            })
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Requests::Named(names))
    }

    /// True if this rule applies to `username`: literally listed, or a
    /// member of any group referenced in `who`. Membership is resolved now,
    /// not at parse time.
    pub fn applies_to(&self, username: &str, groups: &dyn GroupLookup) -> bool {
        self.who.iter().any(|token| match token {
            WhoToken::User(u) => u == username,
            WhoToken::Group(g) => groups.members(g).iter().any(|m| m == username),
        })
    }

    /// Identity-independent check: is the request name allowed at all?
    pub fn request_name_allowed(&self, request: &str) -> bool {
        match &self.requests {
            Requests::All => true,
            Requests::Named(names) => names.contains(&request.to_ascii_lowercase()),
        }
    }

    /// Full check against one subject user.
    ///
    /// The request name is checked first; then the filter. `ALL` allows
    /// everything. `sameLocation` denies unless one of the requester's
    /// locations equals the subject's (skipped when the requester's location
    /// list is empty). Finally the subject must belong to one of the
    /// referenced groups, unless the filter references none.
    pub fn request_allowed(
        &self,
        request: &str,
        requester_locations: &[String],
        subject: &SessionUser,
    ) -> bool {
        if !self.request_name_allowed(request) {
            return false;
        }

        let tokens = match &self.filter {
            Filter::All => return true,
            Filter::Tokens(tokens) => tokens,
        };

        let wants_same_location = tokens
            .iter()
            .any(|t| matches!(t, FilterToken::SameLocation));
        if wants_same_location
            && !requester_locations.is_empty()
            && !requester_locations.iter().any(|l| *l == subject.location)
        {
            return false;
        }

        let mut groups = tokens.iter().filter_map(|t| match t {
            FilterToken::Group(g) => Some(g),
            FilterToken::SameLocation => None,
        });
        let mut any_group = false;
        for g in groups.by_ref() {
            any_group = true;
            if subject.groups.iter().any(|sg| sg == g) {
                return true;
            }
        }
        !any_group
    }

    /// Host-level check: allowed iff `request_allowed` holds for any of the
    /// host's logged-in users. A host with no users falls back to the
    /// identity-independent request-name check.
    pub fn request_allowed_server(
        &self,
        request: &str,
        requester_locations: &[String],
        users: &[SessionUser],
    ) -> bool {
        if users.is_empty() {
            return self.request_name_allowed(request);
        }
        users
            .iter()
            .any(|u| self.request_allowed(request, requester_locations, u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-membership lookup for tests
    pub struct FakeGroups;

    impl GroupLookup for FakeGroups {
        fn members(&self, group: &str) -> Vec<String> {
            if group == "fakegroup" {
                vec!["fakeuser".to_string()]
            } else {
                vec![]
            }
        }
    }

    fn subject() -> SessionUser {
        SessionUser {
            username: "testuser".into(),
            server: "ws00".into(),
            client: "thin01".into(),
            display: ":0".into(),
            client_hw_addr: "00:11:22:33:44:55".into(),
            name: "Test User".into(),
            groups: vec!["testgroup".into()],
            time: 0,
            location: "room0".into(),
        }
    }

    #[test]
    fn test_parse_empty_who() {
        assert_eq!(
            AclRule::parse("", "ALL: ALL"),
            Err(AclParseError::Empty("who"))
        );
    }

    #[test]
    fn test_parse_empty_filter() {
        assert!(matches!(
            AclRule::parse("root", ""),
            Err(AclParseError::MissingColon)
        ));
        assert_eq!(
            AclRule::parse("root", ": ALL"),
            Err(AclParseError::Empty("filter"))
        );
    }

    #[test]
    fn test_parse_empty_requests() {
        assert_eq!(
            AclRule::parse("root", "ALL: "),
            Err(AclParseError::Empty("requests"))
        );
    }

    #[test]
    fn test_parse_username_in_filter() {
        assert!(matches!(
            AclRule::parse("user", "test: ALL"),
            Err(AclParseError::BadToken {
                section: "filter",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_incompatible_all() {
        assert_eq!(
            AclRule::parse("user", "@test ALL: ALL"),
            Err(AclParseError::MixedAll("filter"))
        );
        assert_eq!(
            AclRule::parse("user", "ALL: listUsers ALL"),
            Err(AclParseError::MixedAll("requests"))
        );
    }

    #[test]
    fn test_parse_only_same_location() {
        AclRule::parse("user", "sameLocation: ALL").unwrap();
    }

    #[test]
    fn test_parse_all_any_identifier_who() {
        for who in ["root", "alice", "x-1_2"] {
            AclRule::parse(who, "ALL: ALL").unwrap();
        }
    }

    #[test]
    fn test_parse_keyword_as_username_fails() {
        assert!(AclRule::parse("ALL", "ALL: ALL").is_err());
        assert!(AclRule::parse("samelocation", "ALL: ALL").is_err());
    }

    #[test]
    fn test_applies_to_user() {
        let acl = AclRule::parse("fakeuser", "ALL: ALL").unwrap();
        assert!(acl.applies_to("fakeuser", &FakeGroups));
        assert!(!acl.applies_to("anotherfakeuser", &FakeGroups));
    }

    #[test]
    fn test_applies_to_group() {
        let acl = AclRule::parse("@fakegroup", "ALL: ALL").unwrap();
        assert!(acl.applies_to("fakeuser", &FakeGroups));
        assert!(!acl.applies_to("anotherfakeuser", &FakeGroups));
    }

    #[test]
    fn test_request_name_allowed_only() {
        let acl = AclRule::parse("fakeuser", "ALL: listUsers").unwrap();
        assert!(acl.request_name_allowed("listusers"));
        assert!(acl.request_name_allowed("LISTUSERS"));
        assert!(!acl.request_name_allowed("listservers"));
    }

    #[test]
    fn test_request_allowed_filter_all() {
        let user = subject();
        let acl = AclRule::parse("fakeuser", "ALL: listUsers listProcesses").unwrap();
        assert!(acl.request_allowed("listProcesses", &["room0".into()], &user));
        assert!(!acl.request_allowed("listServers", &["room0".into()], &user));
    }

    #[test]
    fn test_request_allowed_same_location() {
        let user = subject();
        let acl = AclRule::parse("fakeuser", "sameLocation: listUsers listProcesses").unwrap();
        assert!(acl.request_allowed("listProcesses", &["room0".into()], &user));
        assert!(!acl.request_allowed("listProcesses", &["room1".into()], &user));
    }

    #[test]
    fn test_request_allowed_group_filter() {
        let mut user = subject();
        let acl = AclRule::parse("fakeuser", "@testgroup: listUsers listProcesses").unwrap();
        assert!(acl.request_allowed("listProcesses", &["room0".into()], &user));
        user.groups = vec!["anothergroup".into()];
        assert!(!acl.request_allowed("listProcesses", &["room0".into()], &user));
    }

    #[test]
    fn test_request_allowed_same_location_restricts_group() {
        // A matching group does not override a failed location gate
        let user = subject();
        let acl = AclRule::parse("fakeuser", "@testgroup sameLocation: ALL").unwrap();
        assert!(acl.request_allowed("logout", &["room0".into()], &user));
        assert!(!acl.request_allowed("logout", &["room1".into()], &user));
    }

    #[test]
    fn test_request_allowed_server() {
        let mut user = subject();
        let room0 = vec!["room0".to_string()];
        let room1 = vec!["room1".to_string()];

        let acl = AclRule::parse("fakeuser", "ALL: listUsers listServers").unwrap();
        assert!(acl.request_allowed_server("listServers", &room0, std::slice::from_ref(&user)));
        assert!(!acl.request_allowed_server("login", &room0, std::slice::from_ref(&user)));

        let acl = AclRule::parse("fakeuser", "sameLocation: ALL").unwrap();
        assert!(acl.request_allowed_server("listServers", &room0, std::slice::from_ref(&user)));
        assert!(!acl.request_allowed_server("listServers", &room1, std::slice::from_ref(&user)));

        let acl = AclRule::parse("fakeuser", "@testgroup: listUsers listServers").unwrap();
        assert!(acl.request_allowed_server("listServers", &room0, std::slice::from_ref(&user)));
        user.groups = vec!["testgroup2".into()];
        assert!(!acl.request_allowed_server("listServers", &room0, std::slice::from_ref(&user)));
    }

    #[test]
    fn test_request_allowed_server_empty_host_fallback() {
        // With no logged-in users only the request-name check applies
        let acl = AclRule::parse("fakeuser", "@testgroup: listUsers listServers").unwrap();
        assert!(acl.request_allowed_server("listServers", &["room0".into()], &[]));
        assert!(!acl.request_allowed_server("login", &["room0".into()], &[]));
    }
}
