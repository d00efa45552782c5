mod common;

use std::time::Duration;

use chrono::Utc;
use common::{day, draft, Fixture, LEGACY_KEY};
use reverie_journal::{
    CryptoContext, EntryDraft, JournalConfig, JournalError, JournalService, KdfParams, Session,
    UserKey,
};
use reverie_shared::types::KeyVersion;
use reverie_store::EncryptionProfile;

fn legacy_ctx() -> CryptoContext {
    CryptoContext::new(None, Some(UserKey::from_bytes(LEGACY_KEY)))
}

fn legacy_profile(fx: &Fixture, user: reverie_shared::UserId) {
    fx.db()
        .save_encryption_profile(&EncryptionProfile {
            user_id: user,
            salt: None,
            iterations: 0,
            version: KeyVersion::Legacy,
            recovery_key_hash: None,
            updated_at: Utc::now(),
        })
        .unwrap();
}

#[test]
fn test_rotation_reencrypts_entries() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let (mut session, ctx) = fx.login(alice, "old-pw");

    let first = fx.service.save_entry(&ctx, draft(alice, "first")).unwrap();
    let second = fx
        .service
        .save_entry(
            &ctx,
            EntryDraft {
                entry_date: day().succ_opt().unwrap(),
                ..draft(alice, "second")
            },
        )
        .unwrap();

    let report = fx
        .service
        .keys()
        .rotate_key(fx.db(), alice, "old-pw", "new-pw", &mut session)
        .unwrap();
    assert_eq!(report.reencrypted, 2);
    assert_eq!(report.skipped, 0);

    // The old key no longer opens anything.
    let stale = fx.service.load_entry(&ctx, first.entry.id).unwrap();
    assert!(stale.content.is_opaque());

    let (_fresh, new_ctx) = fx.login(alice, "new-pw");
    let opened = fx.service.load_entry(&new_ctx, second.entry.id).unwrap();
    assert_eq!(opened.content.into_string(), "second");
    assert_eq!(
        fx.service.load_entry(&new_ctx, first.entry.id).unwrap().title.into_string(),
        "Today"
    );
}

#[test]
fn test_rotation_with_wrong_password_changes_nothing() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let (mut session, ctx) = fx.login(alice, "right");
    let saved = fx.service.save_entry(&ctx, draft(alice, "kept")).unwrap();
    let salt_before = fx.db().get_encryption_profile(alice).unwrap().unwrap().salt;

    let result = fx
        .service
        .keys()
        .rotate_key(fx.db(), alice, "wrong", "next", &mut session);
    assert!(matches!(result, Err(JournalError::IncorrectPassword)));

    let salt_after = fx.db().get_encryption_profile(alice).unwrap().unwrap().salt;
    assert_eq!(salt_before, salt_after);
    let opened = fx.service.load_entry(&ctx, saved.entry.id).unwrap();
    assert_eq!(opened.content.into_string(), "kept");
}

#[test]
fn test_login_migrates_legacy_user() {
    let fx = Fixture::with_legacy_key();
    let bob = fx.user("bob");
    legacy_profile(&fx, bob);

    let first = fx.service.save_entry(&legacy_ctx(), draft(bob, "one")).unwrap();
    fx.service
        .save_entry(
            &legacy_ctx(),
            EntryDraft {
                entry_date: day().succ_opt().unwrap(),
                ..draft(bob, "two")
            },
        )
        .unwrap();

    let mut session = Session::new();
    let login = fx.service.login(bob, "bob-pw", &mut session).unwrap();
    let report = login.migration.unwrap();
    assert_eq!(report.migrated, 2);
    assert_eq!(report.skipped, 0);

    let profile = fx.db().get_encryption_profile(bob).unwrap().unwrap();
    assert_eq!(profile.version, KeyVersion::PerUser);
    assert!(profile.salt.is_some());

    // Readable with the per-user key alone.
    let user_only = CryptoContext::new(session.key(bob).cloned(), None);
    let opened = fx.service.load_entry(&user_only, first.entry.id).unwrap();
    assert_eq!(opened.content.into_string(), "one");

    // Second login derives instead of migrating again.
    let again = fx.service.login(bob, "bob-pw", &mut Session::new()).unwrap();
    assert!(again.migration.is_none());
}

#[test]
fn test_migration_is_a_noop_for_per_user_accounts() {
    let fx = Fixture::with_legacy_key();
    let alice = fx.user("alice");
    let (mut session, ctx) = fx.login(alice, "pw");
    fx.service.save_entry(&ctx, draft(alice, "mine")).unwrap();
    let salt = fx.db().get_encryption_profile(alice).unwrap().unwrap().salt;

    let report = fx
        .service
        .keys()
        .migrate_from_legacy_key(
            fx.db(),
            alice,
            "pw",
            &UserKey::from_bytes(LEGACY_KEY),
            &mut session,
        )
        .unwrap();
    assert_eq!(report.migrated, 0);
    assert_eq!(report.skipped, 0);
    assert_eq!(fx.db().get_encryption_profile(alice).unwrap().unwrap().salt, salt);
}

#[test]
fn test_migration_skips_entries_the_legacy_key_cannot_open() {
    let fx = Fixture::with_legacy_key();
    let bob = fx.user("bob");
    legacy_profile(&fx, bob);

    fx.service.save_entry(&legacy_ctx(), draft(bob, "legacy")).unwrap();
    let foreign = CryptoContext::new(Some(UserKey::from_bytes([7; 32])), None);
    fx.service
        .save_entry(
            &foreign,
            EntryDraft {
                entry_date: day().succ_opt().unwrap(),
                ..draft(bob, "foreign")
            },
        )
        .unwrap();

    let login = fx.service.login(bob, "bob-pw", &mut Session::new()).unwrap();
    let report = login.migration.unwrap();
    assert_eq!(report.migrated, 1);
    assert_eq!(report.skipped, 1);
}

#[test]
fn test_legacy_login_without_legacy_key_fails() {
    let fx = Fixture::new();
    let bob = fx.user("bob");
    legacy_profile(&fx, bob);

    let result = fx.service.login(bob, "bob-pw", &mut Session::new());
    assert!(matches!(result, Err(JournalError::EncryptionKeyUnavailable)));
}

#[test]
fn test_save_without_key_writes_nothing() {
    let fx = Fixture::new();
    let alice = fx.user("alice");

    let result = fx
        .service
        .save_entry(&CryptoContext::empty(), draft(alice, "plaintext"));
    assert!(matches!(result, Err(JournalError::EncryptionKeyUnavailable)));
    assert!(fx.db().list_entries_for_user(alice).unwrap().is_empty());
}

#[test]
fn test_entries_are_opaque_without_a_session() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let (_session, ctx) = fx.login(alice, "pw");
    let saved = fx
        .service
        .save_entry(&ctx, draft(alice, "Dear diary\n\n{pov} @nobody\nhi\n{/pov}"))
        .unwrap();

    let stored = fx.db().get_entry(saved.entry.id).unwrap();
    assert!(!stored.content.contains("Dear diary"));

    let opened = fx.service.load_entry(&CryptoContext::empty(), saved.entry.id).unwrap();
    assert_eq!(opened.content.clone().into_string(), stored.content);
    assert!(opened.content.is_opaque());
    assert_eq!(
        fx.service.preview(&CryptoContext::empty(), saved.entry.id).unwrap(),
        reverie_shared::constants::ENCRYPTED_PLACEHOLDER
    );
    assert_eq!(fx.service.preview(&ctx, saved.entry.id).unwrap(), "Dear diary");
}

#[test]
fn test_only_the_owner_may_overwrite_or_delete() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let mallory = fx.user("mallory");
    let (_session, ctx) = fx.login(alice, "pw");
    let (_m, mallory_ctx) = fx.login(mallory, "pw");
    let saved = fx.service.save_entry(&ctx, draft(alice, "mine")).unwrap();

    let hijack = fx.service.save_entry(
        &mallory_ctx,
        EntryDraft {
            id: Some(saved.entry.id),
            ..draft(mallory, "theirs")
        },
    );
    assert!(matches!(hijack, Err(JournalError::PermissionDenied(_))));
    assert!(matches!(
        fx.service.delete_entry(saved.entry.id, mallory),
        Err(JournalError::PermissionDenied(_))
    ));

    assert!(fx.service.delete_entry(saved.entry.id, alice).unwrap());
    assert!(!fx.service.delete_entry(saved.entry.id, alice).unwrap());
}

#[test]
fn test_recovery_key_round_trip() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    fx.login(alice, "pw");

    let keys = fx.service.keys();
    let recovery = keys.generate_recovery_key(fx.db(), alice).unwrap();
    assert!(keys.verify_recovery_key(fx.db(), alice, &recovery).unwrap());
    assert!(!keys.verify_recovery_key(fx.db(), alice, "guess").unwrap());
}

#[tokio::test]
async fn test_open_records_notification_receipts() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = JournalConfig {
        database_path: dir.path().join("nested").join("journal.db"),
        kdf: KdfParams::insecure_for_tests(1000),
        notify_timeout: Duration::from_secs(2),
        ..JournalConfig::default()
    };
    let service = JournalService::open(&config)?;

    let alice = reverie_shared::UserId::new();
    let bob = reverie_shared::UserId::new();
    for (id, name) in [(alice, "alice"), (bob, "bob")] {
        service
            .db()
            .create_user(&reverie_store::User {
                id,
                username: name.to_string(),
                email: format!("{name}@example.com"),
                created_at: Utc::now(),
            })?;
    }
    service.db().create_friendship(alice, bob)?;

    let mut session = Session::new();
    service.login(alice, "pw", &mut session)?;
    let ctx = service.keys().context_for(alice, &session);
    let saved = service.save_entry(&ctx, draft(alice, "{pov} @bob\nHi\n{/pov}"))?;
    let block = service.db().list_blocks_for_entry(saved.entry.id)?[0].id;

    let mut notified = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let recipients = service.db().list_block_recipients(block)?;
        if recipients.iter().all(|r| r.notification_sent) {
            notified = true;
            break;
        }
    }
    assert!(notified);
    Ok(())
}
