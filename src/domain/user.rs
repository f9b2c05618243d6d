use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity handed to us by the upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl UserIdentity {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            email: None,
            name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub name: Option<String>,
    pub daily_reports_count: i32,
    pub last_report_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(identity: &UserIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: identity.external_id.clone(),
            email: identity
                .email
                .clone()
                .unwrap_or_else(|| fallback_email(&identity.external_id)),
            name: identity.name.clone(),
            daily_reports_count: 0,
            last_report_date: None,
            created_at: Utc::now(),
        }
    }
}

impl User {
    /// Identity as the quota tracker sees it.
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            external_id: self.external_id.clone(),
            email: Some(self.email.clone()),
            name: self.name.clone(),
        }
    }
}

pub fn fallback_email(external_id: &str) -> String {
    format!("user-{}@example.com", external_id)
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Whether a free-tier counter last touched at `last_report_date` is stale at `now`.
///
/// A counter is stale when it was never touched, when it was touched before the
/// start of the current calendar day, or (when a rolling window is configured)
/// when it was touched longer ago than the window.
pub fn daily_count_is_stale(
    last_report_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    rolling_window: Option<Duration>,
) -> bool {
    let Some(last) = last_report_date else {
        return true;
    };

    if last < start_of_day(now) {
        return true;
    }

    match rolling_window {
        Some(window) => last < now - window,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, h, m, 0).unwrap()
    }

    #[test]
    fn never_touched_counter_is_stale() {
        assert!(daily_count_is_stale(None, at(12, 0), None));
    }

    #[test]
    fn previous_calendar_day_is_stale() {
        let yesterday = Utc.with_ymd_and_hms(2024, 3, 13, 23, 59, 0).unwrap();
        assert!(daily_count_is_stale(Some(yesterday), at(0, 1), None));
    }

    #[test]
    fn same_day_without_window_is_fresh() {
        assert!(!daily_count_is_stale(Some(at(1, 0)), at(23, 0), None));
    }

    #[test]
    fn rolling_window_resets_mid_day() {
        let window = Some(Duration::hours(4));
        assert!(daily_count_is_stale(Some(at(7, 59)), at(12, 0), window));
        assert!(!daily_count_is_stale(Some(at(8, 30)), at(12, 0), window));
    }

    #[test]
    fn start_of_day_truncates_to_midnight() {
        assert_eq!(start_of_day(at(17, 45)), at(0, 0));
    }

    #[test]
    fn new_user_falls_back_to_placeholder_email() {
        let user = User::new(&UserIdentity::new("user_2abc"));
        assert_eq!(user.email, "user-user_2abc@example.com");
        assert_eq!(user.daily_reports_count, 0);
        assert!(user.last_report_date.is_none());

        let named = User::new(&UserIdentity::new("u1").with_email("a@b.co").with_name("Ada"));
        assert_eq!(named.email, "a@b.co");
        assert_eq!(named.name.as_deref(), Some("Ada"));
    }
}
