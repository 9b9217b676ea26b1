//! Which versions of a step are worth preloading into the cache.
//!
//! A version is retained when any of these hold:
//!
//! - it is the registry-declared latest version,
//! - it was published within `patches_since_months`,
//! - it is the newest patch of its minor line and that patch was published
//!   within `latest_minors_since_months`,
//! - it is the newest patch of one of the `num_minor` newest minors of one of
//!   the `num_major` newest majors.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Months, Utc};
use tracing::warn;

use crate::core::models::{StepDefinition, StepGroup};
use crate::core::semver::{Semver, cmp_latest_first, parse_semver};

/// Internal steps that are never preloaded.
pub const EXCLUDED_STEP_IDS: &[&str] = &["project-scanner"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub num_major: usize,
    pub num_minor: usize,
    pub latest_minors_since_months: u32,
    pub patches_since_months: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            num_major: 2,
            num_minor: 3,
            latest_minors_since_months: 12,
            patches_since_months: 2,
        }
    }
}

/// Retained versions of `group`, newest first.
pub fn retained_versions(
    step_id: &str,
    group: &StepGroup,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    if EXCLUDED_STEP_IDS.contains(&step_id) {
        return Vec::new();
    }

    let mut kept: BTreeSet<&str> = BTreeSet::new();
    if group.versions.contains_key(&group.latest_version_number) {
        kept.insert(group.latest_version_number.as_str());
    }

    // major -> minor -> newest patch (with its registry key)
    let mut lines: BTreeMap<u64, BTreeMap<u64, (Semver, &str)>> = BTreeMap::new();
    for (key, step) in &group.versions {
        let version = match parse_semver(key) {
            Ok(version) => version,
            Err(err) => {
                warn!(step = step_id, version = %key, err = %err, "skipping unparseable version");
                continue;
            }
        };
        if published_within(step, policy.patches_since_months, now) {
            kept.insert(key);
        }
        let newest = lines.entry(version.major).or_default();
        match newest.get(&version.minor) {
            Some((current, _)) if current.patch >= version.patch => {}
            _ => {
                newest.insert(version.minor, (version, key.as_str()));
            }
        }
    }

    let mut top_majors = Vec::with_capacity(policy.num_major);
    for (major, minors) in &lines {
        insert_latest_n(&mut top_majors, policy.num_major, *major);
        for (_, key) in minors.values() {
            if let Some(step) = group.versions.get(*key)
                && published_within(step, policy.latest_minors_since_months, now)
            {
                kept.insert(key);
            }
        }
    }

    for major in &top_majors {
        let Some(minors) = lines.get(major) else {
            continue;
        };
        let mut top_minors = Vec::with_capacity(policy.num_minor);
        for minor in minors.keys() {
            insert_latest_n(&mut top_minors, policy.num_minor, *minor);
        }
        for minor in &top_minors {
            if let Some((_, key)) = minors.get(minor) {
                kept.insert(key);
            }
        }
    }

    let mut versions: Vec<String> = kept.into_iter().map(str::to_string).collect();
    versions.sort_by(|a, b| cmp_latest_first(a, b).unwrap_or(std::cmp::Ordering::Equal));
    versions
}

fn published_within(step: &StepDefinition, months: u32, now: DateTime<Utc>) -> bool {
    step.published_at
        .and_then(|published| published.checked_add_months(Months::new(months)))
        .is_some_and(|horizon| horizon > now)
}

/// Insert `value` into the descending, bounded list `latests`.
///
/// The list never grows beyond `cap` entries and holds no duplicates.
pub fn insert_latest_n(latests: &mut Vec<u64>, cap: usize, value: u64) {
    if cap == 0 || latests.contains(&value) {
        return;
    }
    let pos = latests
        .iter()
        .position(|current| value > *current)
        .unwrap_or(latests.len());
    if pos >= cap {
        return;
    }
    latests.insert(pos, value);
    latests.truncate(cap);
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("date")
    }

    fn months_ago(months: u32) -> DateTime<Utc> {
        now().checked_sub_months(Months::new(months)).expect("date")
    }

    fn group(latest: &str, versions: &[(&str, u32)]) -> StepGroup {
        StepGroup {
            latest_version_number: latest.to_string(),
            versions: versions
                .iter()
                .map(|(v, age)| {
                    (
                        v.to_string(),
                        StepDefinition {
                            published_at: Some(months_ago(*age)),
                            ..StepDefinition::default()
                        },
                    )
                })
                .collect(),
            ..StepGroup::default()
        }
    }

    fn strict_policy() -> RetentionPolicy {
        RetentionPolicy {
            num_major: 1,
            num_minor: 1,
            latest_minors_since_months: 0,
            patches_since_months: 0,
        }
    }

    #[test]
    fn bounded_insert_keeps_descending_top_n() {
        let mut latests = Vec::new();
        for value in [3, 7, 1, 9, 7, 4] {
            insert_latest_n(&mut latests, 3, value);
        }
        assert_eq!(latests, vec![9, 7, 4]);
    }

    #[test]
    fn bounded_insert_with_zero_capacity_is_empty() {
        let mut latests = Vec::new();
        insert_latest_n(&mut latests, 0, 5);
        assert!(latests.is_empty());
    }

    #[test]
    fn excluded_step_keeps_nothing() {
        let g = group("1.0.0", &[("1.0.0", 0)]);
        let kept = retained_versions("project-scanner", &g, &RetentionPolicy::default(), now());
        assert!(kept.is_empty());
    }

    #[test]
    fn latest_is_always_kept() {
        let g = group("1.0.0", &[("1.0.0", 48), ("2.0.0", 40)]);
        let policy = RetentionPolicy {
            num_major: 0,
            num_minor: 0,
            ..strict_policy()
        };
        let kept = retained_versions("script", &g, &policy, now());
        assert_eq!(kept, vec!["1.0.0"]);
    }

    #[test]
    fn top_majors_and_minors_keep_newest_patch() {
        let g = group(
            "3.1.2",
            &[
                ("1.0.0", 50),
                ("2.0.0", 40),
                ("2.1.0", 38),
                ("2.1.4", 36),
                ("3.0.0", 30),
                ("3.1.0", 28),
                ("3.1.2", 26),
            ],
        );
        let policy = RetentionPolicy {
            num_major: 2,
            num_minor: 1,
            ..strict_policy()
        };
        let kept = retained_versions("script", &g, &policy, now());
        assert_eq!(kept, vec!["3.1.2", "2.1.4"]);
    }

    #[test]
    fn recent_patches_are_kept() {
        let g = group("1.2.3", &[("1.2.1", 1), ("1.2.2", 1), ("1.2.3", 1), ("1.1.0", 6)]);
        let policy = RetentionPolicy {
            patches_since_months: 2,
            num_major: 0,
            ..strict_policy()
        };
        let kept = retained_versions("script", &g, &policy, now());
        assert_eq!(kept, vec!["1.2.3", "1.2.2", "1.2.1"]);
    }

    #[test]
    fn recent_minor_lines_keep_their_newest_patch() {
        let g = group(
            "1.3.0",
            &[("1.1.0", 10), ("1.1.5", 5), ("1.2.0", 20), ("1.3.0", 2)],
        );
        let policy = RetentionPolicy {
            latest_minors_since_months: 6,
            num_major: 0,
            ..strict_policy()
        };
        let kept = retained_versions("script", &g, &policy, now());
        assert_eq!(kept, vec!["1.3.0", "1.1.5"]);
    }

    #[test]
    fn missing_publish_date_only_fails_age_rules() {
        let mut g = group("1.0.0", &[("1.0.0", 1)]);
        g.versions.insert("0.9.0".to_string(), StepDefinition::default());
        let policy = RetentionPolicy {
            patches_since_months: 12,
            num_major: 0,
            ..strict_policy()
        };
        let kept = retained_versions("script", &g, &policy, now());
        assert_eq!(kept, vec!["1.0.0"]);
    }

    #[test]
    fn patch_only_history_keeps_recent_patches_under_any_line_limits() {
        // 1.0.0 .. 1.0.19, one release every two months, the newest this month.
        let releases: Vec<(String, u32)> = (0..20u32)
            .map(|patch| (format!("1.0.{patch}"), (19 - patch) * 2))
            .collect();
        let borrowed: Vec<(&str, u32)> = releases
            .iter()
            .map(|(version, age)| (version.as_str(), *age))
            .collect();
        let g = group("1.0.19", &borrowed);

        for (num_major, num_minor, latest_minors_since_months) in
            [(0, 0, 0), (1, 1, 0), (2, 3, 12), (5, 5, 48)]
        {
            let policy = RetentionPolicy {
                num_major,
                num_minor,
                latest_minors_since_months,
                patches_since_months: 6,
            };
            let kept = retained_versions("script", &g, &policy, now());
            assert_eq!(
                kept,
                vec!["1.0.19", "1.0.18", "1.0.17"],
                "policy {policy:?}"
            );
        }
    }
}
