// tests/property/cache_invariants_test.rs

//! Property tests over `Cache`'s status-transition and archive/unarchive
//! invariants: in-flight accounting always matches live status, terminal
//! timing fields are internally consistent, `set_status` is idempotent on
//! timing, and archive/unarchive touch exactly one sync's repos.

use chrono::Utc;
use proptest::prelude::*;
use repo_sync_controller::core::model::{RepoRecord, RepoStatus, SyncId, Visibility};
use repo_sync_controller::core::state::cache::Cache;

use crate::helpers::sample_sync;

fn arb_status() -> impl Strategy<Value = RepoStatus> {
    prop_oneof![
        Just(RepoStatus::Unknown),
        Just(RepoStatus::Unsynced),
        Just(RepoStatus::Queued),
        Just(RepoStatus::Syncing),
        Just(RepoStatus::Synced),
        Just(RepoStatus::Failed),
    ]
}

proptest! {
    /// `count_in_flight` always agrees with a direct count of
    /// queued/syncing records, no matter what sequence of statuses a repo
    /// was pushed through.
    #[test]
    fn in_flight_count_matches_live_status(transitions in prop::collection::vec(arb_status(), 1..20)) {
        let mut cache = Cache::new();
        let sync = sample_sync("acme-mirror");
        cache.upsert_sync(sync.clone());
        let repo = RepoRecord::new(sync.id.clone(), "alpha".into(), Visibility::Public, Utc::now());
        cache.upsert_repo(repo.clone());

        for status in transitions {
            cache.set_status(&repo.id, status, None);
            let expected = usize::from(cache.get_repo(&repo.id).unwrap().status.is_in_flight());
            prop_assert_eq!(cache.count_in_flight(), expected);
        }
    }

    /// Whenever a repo lands on a terminal status, `ended_at` is set,
    /// `started_at` was already set (Queued/Syncing always precede a
    /// terminal status in practice, but even if they didn't `set_status`
    /// still requires it — see below), and `elapsed_seconds` is exactly
    /// the gap between them in whole seconds.
    #[test]
    fn terminal_status_has_consistent_timing(
        pre_syncing in any::<bool>(),
        terminal in prop_oneof![Just(RepoStatus::Synced), Just(RepoStatus::Failed)],
    ) {
        let mut cache = Cache::new();
        let sync = sample_sync("acme-mirror");
        cache.upsert_sync(sync.clone());
        let repo = RepoRecord::new(sync.id.clone(), "alpha".into(), Visibility::Public, Utc::now());
        cache.upsert_repo(repo.clone());

        if pre_syncing {
            cache.set_status(&repo.id, RepoStatus::Syncing, None);
        }
        let updated = cache.set_status(&repo.id, terminal, None).unwrap();

        prop_assert!(updated.ended_at.is_some());
        let elapsed = updated.elapsed_seconds.unwrap();
        match updated.started_at {
            Some(started) => {
                let expected = (updated.ended_at.unwrap() - started).num_seconds();
                prop_assert_eq!(elapsed, expected);
            }
            None => prop_assert_eq!(elapsed, 0),
        }
    }

    /// Calling `set_status` twice with the same terminal status leaves the
    /// timing fields recorded by the first call untouched.
    #[test]
    fn set_status_is_idempotent_on_timing(terminal in prop_oneof![Just(RepoStatus::Synced), Just(RepoStatus::Failed)]) {
        let mut cache = Cache::new();
        let sync = sample_sync("acme-mirror");
        cache.upsert_sync(sync.clone());
        let mut repo = RepoRecord::new(sync.id.clone(), "alpha".into(), Visibility::Public, Utc::now());
        repo.status = RepoStatus::Syncing;
        repo.started_at = Some(Utc::now());
        cache.upsert_repo(repo.clone());

        let first = cache.set_status(&repo.id, terminal, None).unwrap();
        let second = cache.set_status(&repo.id, terminal, None).unwrap();
        prop_assert_eq!(first.started_at, second.started_at);
        prop_assert_eq!(first.ended_at, second.ended_at);
        prop_assert_eq!(first.elapsed_seconds, second.elapsed_seconds);
    }

    /// Archiving a sync archives exactly the repos owned by it; unarchiving
    /// restores exactly that same set, leaving every other sync's repos
    /// untouched throughout.
    #[test]
    fn archive_unarchive_touches_exactly_one_syncs_repos(
        repo_count in 1usize..8,
        other_count in 1usize..8,
    ) {
        let mut cache = Cache::new();
        let target = sample_sync("target-sync");
        let other = sample_sync("other-sync");
        cache.upsert_sync(target.clone());
        cache.upsert_sync(other.clone());

        let target_ids: Vec<_> = (0..repo_count)
            .map(|i| {
                let repo = RepoRecord::new(target.id.clone(), format!("t{i}"), Visibility::Public, Utc::now());
                let id = repo.id.clone();
                cache.upsert_repo(repo);
                id
            })
            .collect();
        let other_ids: Vec<_> = (0..other_count)
            .map(|i| {
                let repo = RepoRecord::new(other.id.clone(), format!("o{i}"), Visibility::Public, Utc::now());
                let id = repo.id.clone();
                cache.upsert_repo(repo);
                id
            })
            .collect();

        prop_assert!(cache.archive_sync(&target.id));
        for id in &target_ids {
            prop_assert!(cache.get_repo(id).unwrap().archived);
        }
        for id in &other_ids {
            prop_assert!(!cache.get_repo(id).unwrap().archived);
        }

        prop_assert!(cache.unarchive_sync(&target.id));
        for id in &target_ids {
            prop_assert!(!cache.get_repo(id).unwrap().archived);
        }
        for id in &other_ids {
            prop_assert!(!cache.get_repo(id).unwrap().archived);
        }

        // Archiving an unknown sync id is a no-op reported as such.
        prop_assert!(!cache.archive_sync(&SyncId::new()));
    }
}
