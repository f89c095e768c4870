use anyhow::Context;
use serde::{Deserialize, Serialize};
use sessionkit::RetryPolicy;
use std::time::Duration;
use url::Url;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Invite windows outside this range are rejected.
pub const INVITE_TTL_RANGE: std::ops::RangeInclusive<Duration> =
    Duration::from_secs(24 * 60 * 60)..=Duration::from_secs(31 * 24 * 60 * 60);

const MAX_LINK_REQUEST_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// friend_link configuration, read from `modules.friend_link`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FriendLinkConfig {
    /// Horizon after which a pending link request is treated as expired.
    #[serde(with = "humantime_serde")]
    pub link_request_ttl: Duration,

    /// Validity window of a generated invite token.
    #[serde(with = "humantime_serde")]
    pub invite_ttl: Duration,

    /// The token id is appended as the last path segment.
    pub invite_base_url: String,

    /// Minimum gap between two automatic reconciliation passes.
    #[serde(with = "humantime_serde")]
    pub reconcile_min_interval: Duration,

    /// Cumulative retry budget of one failure record.
    pub max_failure_attempts: u32,

    pub retry: RetryPolicy,
}

impl Default for FriendLinkConfig {
    fn default() -> Self {
        Self {
            link_request_ttl: DAY * 30,
            invite_ttl: DAY * 7,
            invite_base_url: "https://tabshare.app/invite/".to_string(),
            reconcile_min_interval: Duration::from_secs(5 * 60),
            max_failure_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl FriendLinkConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !INVITE_TTL_RANGE.contains(&self.invite_ttl) {
            anyhow::bail!(
                "invite_ttl must be between 1 and 31 days, got {}",
                humantime_serde::re::humantime::format_duration(self.invite_ttl)
            );
        }
        if self.link_request_ttl.is_zero() || self.link_request_ttl > MAX_LINK_REQUEST_TTL {
            anyhow::bail!(
                "link_request_ttl must be between 1s and 365 days, got {}",
                humantime_serde::re::humantime::format_duration(self.link_request_ttl)
            );
        }
        self.invite_base()?;
        if self.max_failure_attempts == 0 {
            anyhow::bail!("max_failure_attempts must be at least 1");
        }
        self.retry.validate()?;
        Ok(())
    }

    /// Parsed `invite_base_url`; it must be able to carry path segments.
    pub fn invite_base(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.invite_base_url)
            .with_context(|| format!("invalid invite_base_url '{}'", self.invite_base_url))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("invite_base_url '{}' cannot carry a path", self.invite_base_url);
        }
        Ok(url)
    }

    pub fn link_request_ttl_chrono(&self) -> chrono::Duration {
        to_chrono(self.link_request_ttl)
    }

    pub fn invite_ttl_chrono(&self) -> chrono::Duration {
        to_chrono(self.invite_ttl)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = FriendLinkConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.link_request_ttl, DAY * 30);
        assert_eq!(cfg.max_failure_attempts, 5);
    }

    #[test]
    fn reads_humantime_durations() {
        let cfg: FriendLinkConfig = serde_json::from_value(serde_json::json!({
            "invite_ttl": "14days",
            "reconcile_min_interval": "30s",
            "invite_base_url": "https://example.com/join/",
            "retry": { "max_attempts": 5 }
        }))
        .unwrap();
        assert_eq!(cfg.invite_ttl, DAY * 14);
        assert_eq!(cfg.reconcile_min_interval, Duration::from_secs(30));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.initial_backoff, Duration::from_millis(200));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invite_window_outside_range_is_rejected() {
        for ttl in [Duration::from_secs(3600), DAY * 32] {
            let cfg = FriendLinkConfig {
                invite_ttl: ttl,
                ..Default::default()
            };
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("invite_ttl"));
        }
        for days in [1, 31] {
            let cfg = FriendLinkConfig {
                invite_ttl: DAY * days,
                ..Default::default()
            };
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn link_request_ttl_is_bounded() {
        let cfg: FriendLinkConfig = serde_json::from_value(serde_json::json!({
            "link_request_ttl": "1000000years"
        }))
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("link_request_ttl"));

        let cfg = FriendLinkConfig {
            link_request_ttl: DAY * 365,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn retry_policy_is_validated() {
        let cfg: FriendLinkConfig = serde_json::from_value(serde_json::json!({
            "retry": { "max_attempts": 2000, "backoff_multiplier": 1e300 }
        }))
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn base_url_must_carry_a_path() {
        let cfg = FriendLinkConfig {
            invite_base_url: "mailto:someone@example.com".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = FriendLinkConfig {
            invite_base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res: Result<FriendLinkConfig, _> =
            serde_json::from_value(serde_json::json!({ "inviteTtl": "1day" }));
        assert!(res.is_err());
    }
}
