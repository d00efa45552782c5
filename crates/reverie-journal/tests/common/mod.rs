#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use reverie_journal::{
    CryptoContext, EntryDraft, JournalService, KdfParams, KeyCache, KeyService,
    NotificationDispatcher, Session, UserKey,
};
use reverie_shared::UserId;
use reverie_store::{Database, User};
use tempfile::TempDir;

pub const LEGACY_KEY: [u8; 32] = [0x42; 32];

pub struct Fixture {
    pub service: JournalService,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_legacy_key() -> Self {
        Self::build(Some(UserKey::from_bytes(LEGACY_KEY)))
    }

    fn build(legacy: Option<UserKey>) -> Self {
        reverie_journal::telemetry::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("journal.db")).unwrap();
        let keys = KeyService::new(
            KeyCache::default(),
            KdfParams::insecure_for_tests(1000),
            legacy,
        );
        Self {
            service: JournalService::new(db, keys, NotificationDispatcher::disabled()),
            _dir: dir,
        }
    }

    pub fn db(&self) -> &Database {
        self.service.db()
    }

    pub fn user(&self, name: &str) -> UserId {
        let user = User {
            id: UserId::new(),
            username: name.to_string(),
            email: format!("{name}@example.com"),
            created_at: Utc::now(),
        };
        self.db().create_user(&user).unwrap();
        user.id
    }

    pub fn befriend(&self, a: UserId, b: UserId) {
        self.db().create_friendship(a, b).unwrap();
    }

    /// Log in and return the session plus the context it yields.
    pub fn login(&self, user: UserId, password: &str) -> (Session, CryptoContext) {
        let mut session = Session::new();
        self.service.login(user, password, &mut session).unwrap();
        let ctx = self.service.keys().context_for(user, &session);
        (session, ctx)
    }

    /// Plaintext content of `user`'s entry for `date`, if any.
    pub fn content_for(&self, ctx: &CryptoContext, user: UserId, date: NaiveDate) -> Option<String> {
        self.service
            .entry_for_date(ctx, user, date)
            .unwrap()
            .map(|entry| entry.content.into_string())
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
}

pub fn draft(user: UserId, content: &str) -> EntryDraft {
    EntryDraft {
        id: None,
        user_id: user,
        entry_date: day(),
        title: "Today".to_string(),
        content: content.to_string(),
    }
}
