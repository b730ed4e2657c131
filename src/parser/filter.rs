//! Stream filter applied between parsing and aggregation.

use chrono::{DateTime, Utc};

use super::entry::LogEntry;

/// Immutable predicate set applied to every parsed entry.
///
/// The time window is half-open: `begin <= timestamp < end`. A non-empty
/// allow-list requires membership; the user deny-list is checked before the
/// user allow-list. Entries lacking an attribute a non-empty allow-list
/// filters on are dropped.
#[derive(Debug, Clone, Default)]
pub struct LogFilters {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub databases: Vec<String>,
    pub users: Vec<String>,
    pub exclude_users: Vec<String>,
    pub applications: Vec<String>,
}

impl LogFilters {
    /// True when no predicate is set and every entry passes.
    pub fn is_empty(&self) -> bool {
        self.begin.is_none()
            && self.end.is_none()
            && self.databases.is_empty()
            && self.users.is_empty()
            && self.exclude_users.is_empty()
            && self.applications.is_empty()
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(begin) = self.begin
            && entry.timestamp < begin
        {
            return false;
        }
        if let Some(end) = self.end
            && entry.timestamp >= end
        {
            return false;
        }

        // Deny before allow
        if !self.exclude_users.is_empty()
            && let Some(user) = &entry.user
            && self.exclude_users.contains(user)
        {
            return false;
        }

        if !self.users.is_empty() && !list_matches(&self.users, entry.user.as_deref()) {
            return false;
        }
        if !self.databases.is_empty() && !list_matches(&self.databases, entry.database.as_deref())
        {
            return false;
        }
        if !self.applications.is_empty()
            && !list_matches(&self.applications, entry.application.as_deref())
        {
            return false;
        }

        true
    }
}

fn list_matches(list: &[String], value: Option<&str>) -> bool {
    match value {
        Some(v) => list.iter().any(|item| item == v),
        None => false,
    }
}
