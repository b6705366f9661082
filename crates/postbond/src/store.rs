//! Durable storage for accounts and messages.
//!
//! The store is where races are settled. Every status change goes through
//! [`MessageStore::transition`], a single conditional write that succeeds
//! only if the row is still in one of the expected statuses. Whoever gets
//! `Ok(true)` won the transition; everyone else observes `Ok(false)` and
//! must re-read. No in-process lock is involved, so the guarantee holds
//! across processes sharing one database.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::message::{EscrowAccount, Message, MessageStatus};

/// Fields a transition may set alongside the status. `None` leaves the
/// column untouched; transitions never clear a field once set.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub hold_ref: Option<String>,
    pub capture_ref: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TransitionPatch {
    /// A status-only transition.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Storage backend contract.
///
/// Implementations must be thread-safe (`Send + Sync`) and must make
/// `transition` atomic: of any number of concurrent callers targeting the
/// same message, at most one may observe `Ok(true)`.
pub trait MessageStore: Send + Sync {
    fn insert_account(&self, account: &EscrowAccount) -> Result<(), StoreError>;

    fn account(&self, id: &str) -> Result<Option<EscrowAccount>, StoreError>;

    fn account_by_slug(&self, slug: &str) -> Result<Option<EscrowAccount>, StoreError>;

    fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    fn message(&self, public_id: &str) -> Result<Option<Message>, StoreError>;

    /// Move `public_id` to `to` if its current status is in `from`,
    /// applying `patch` in the same write. Returns whether this call won.
    /// A missing message is not an error, just `Ok(false)`.
    fn transition(
        &self,
        public_id: &str,
        from: &[MessageStatus],
        to: MessageStatus,
        patch: &TransitionPatch,
    ) -> Result<bool, StoreError>;

    /// AUTHORIZED messages whose deadline has passed, oldest deadline
    /// first, at most `limit` rows.
    fn due_for_sweep(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}

/// In-memory store backed by DashMap. Fast but lost on restart; used in
/// tests and single-process development.
#[derive(Default)]
pub struct InMemoryMessageStore {
    accounts: DashMap<String, EscrowAccount>,
    slug_index: DashMap<String, String>,
    messages: DashMap<String, Message>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn insert_account(&self, account: &EscrowAccount) -> Result<(), StoreError> {
        if self.slug_index.contains_key(&account.slug) {
            return Err(StoreError::Duplicate("account slug"));
        }
        use dashmap::mapref::entry::Entry;
        match self.accounts.entry(account.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("account id")),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
                self.slug_index
                    .insert(account.slug.clone(), account.id.clone());
                Ok(())
            }
        }
    }

    fn account(&self, id: &str) -> Result<Option<EscrowAccount>, StoreError> {
        Ok(self.accounts.get(id).map(|a| a.clone()))
    }

    fn account_by_slug(&self, slug: &str) -> Result<Option<EscrowAccount>, StoreError> {
        let Some(id) = self.slug_index.get(slug) else {
            return Ok(None);
        };
        Ok(self.accounts.get(id.value()).map(|a| a.clone()))
    }

    fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.messages.entry(message.public_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("message public id")),
            Entry::Vacant(slot) => {
                slot.insert(message.clone());
                Ok(())
            }
        }
    }

    fn message(&self, public_id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.get(public_id).map(|m| m.clone()))
    }

    fn transition(
        &self,
        public_id: &str,
        from: &[MessageStatus],
        to: MessageStatus,
        patch: &TransitionPatch,
    ) -> Result<bool, StoreError> {
        // get_mut holds the shard write lock, making check-and-set atomic
        // within this process.
        let Some(mut msg) = self.messages.get_mut(public_id) else {
            return Ok(false);
        };
        if !from.contains(&msg.status) {
            return Ok(false);
        }
        msg.status = to;
        if let Some(hold_ref) = &patch.hold_ref {
            msg.hold_ref = Some(hold_ref.clone());
        }
        if let Some(capture_ref) = &patch.capture_ref {
            msg.capture_ref = Some(capture_ref.clone());
        }
        if let Some(at) = patch.authorized_at {
            msg.authorized_at = Some(at);
        }
        if let Some(at) = patch.expires_at {
            msg.expires_at = Some(at);
        }
        Ok(true)
    }

    fn due_for_sweep(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut due: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| {
                m.status == MessageStatus::Authorized
                    && m.expires_at.map(|t| t <= now).unwrap_or(false)
            })
            .map(|m| m.clone())
            .collect();
        due.sort_by_key(|m| m.expires_at);
        due.truncate(limit);
        Ok(due)
    }
}

const MESSAGE_COLUMNS: &str = "public_id, account_id, sender_email, sender_name, subject, body, \
     bond_cents, fee_cents, currency, status, hold_ref, capture_ref, \
     created_at, authorized_at, expires_at";

/// Persistent store backed by SQLite. Survives restarts, and the guarded
/// UPDATE in `transition` is atomic at the database level, so exclusivity
/// holds across processes sharing the file.
pub struct SqliteMessageStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteMessageStore {
    /// Open (or create) the message database at `path`.
    ///
    /// On Unix the file is restricted to 0600 so other system users cannot
    /// read message bodies or sender addresses.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                owner_email TEXT NOT NULL,
                display_name TEXT,
                min_bond_cents INTEGER NOT NULL,
                max_bond_cents INTEGER NOT NULL,
                allow_boost INTEGER NOT NULL,
                timeout_hours INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                public_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                sender_email TEXT NOT NULL,
                sender_name TEXT,
                subject TEXT,
                body TEXT NOT NULL,
                bond_cents INTEGER NOT NULL,
                fee_cents INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                hold_ref TEXT,
                capture_ref TEXT,
                created_at INTEGER NOT NULL,
                authorized_at INTEGER,
                expires_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_messages_sweep ON messages(status, expires_at);
            PRAGMA journal_mode=WAL;",
        )
        .map_err(StoreError::Sqlite)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set message database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("message store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Raw message row as stored; converted after the rusqlite closure so
/// malformed rows surface as [`StoreError::Corrupt`] instead of panics.
struct MessageRow {
    public_id: String,
    account_id: String,
    sender_email: String,
    sender_name: Option<String>,
    subject: Option<String>,
    body: String,
    bond_cents: i64,
    fee_cents: i64,
    currency: String,
    status: String,
    hold_ref: Option<String>,
    capture_ref: Option<String>,
    created_at: i64,
    authorized_at: Option<i64>,
    expires_at: Option<i64>,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            public_id: row.get(0)?,
            account_id: row.get(1)?,
            sender_email: row.get(2)?,
            sender_name: row.get(3)?,
            subject: row.get(4)?,
            body: row.get(5)?,
            bond_cents: row.get(6)?,
            fee_cents: row.get(7)?,
            currency: row.get(8)?,
            status: row.get(9)?,
            hold_ref: row.get(10)?,
            capture_ref: row.get(11)?,
            created_at: row.get(12)?,
            authorized_at: row.get(13)?,
            expires_at: row.get(14)?,
        })
    }

    fn into_message(self) -> Result<Message, StoreError> {
        let status = MessageStatus::from_str(&self.status)
            .map_err(|e| StoreError::Corrupt(format!("message {}: {e}", self.public_id)))?;
        Ok(Message {
            status,
            created_at: timestamp(self.created_at, &self.public_id)?,
            authorized_at: self
                .authorized_at
                .map(|t| timestamp(t, &self.public_id))
                .transpose()?,
            expires_at: self
                .expires_at
                .map(|t| timestamp(t, &self.public_id))
                .transpose()?,
            public_id: self.public_id,
            account_id: self.account_id,
            sender_email: self.sender_email,
            sender_name: self.sender_name,
            subject: self.subject,
            body: self.body,
            bond_cents: self.bond_cents,
            fee_cents: self.fee_cents,
            currency: self.currency,
            hold_ref: self.hold_ref,
            capture_ref: self.capture_ref,
        })
    }
}

fn timestamp(secs: i64, id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("row {id}: bad timestamp {secs}")))
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(EscrowAccount, i64)> {
    let created_raw: i64 = row.get(8)?;
    Ok((
        EscrowAccount {
            id: row.get(0)?,
            slug: row.get(1)?,
            owner_email: row.get(2)?,
            display_name: row.get(3)?,
            min_bond_cents: row.get(4)?,
            max_bond_cents: row.get(5)?,
            allow_boost: row.get::<_, i64>(6)? != 0,
            timeout_hours: row.get(7)?,
            created_at: DateTime::UNIX_EPOCH,
        },
        created_raw,
    ))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

impl MessageStore for SqliteMessageStore {
    fn insert_account(&self, account: &EscrowAccount) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO accounts (id, slug, owner_email, display_name, min_bond_cents, \
             max_bond_cents, allow_boost, timeout_hours, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                account.id,
                account.slug,
                account.owner_email,
                account.display_name,
                account.min_bond_cents,
                account.max_bond_cents,
                account.allow_boost as i64,
                account.timeout_hours,
                account.created_at.timestamp(),
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Duplicate("account id or slug")
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        Ok(())
    }

    fn account(&self, id: &str) -> Result<Option<EscrowAccount>, StoreError> {
        let conn = self.conn();
        let found = conn
            .query_row(
                "SELECT id, slug, owner_email, display_name, min_bond_cents, max_bond_cents, \
                 allow_boost, timeout_hours, created_at FROM accounts WHERE id = ?1",
                [id],
                account_from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;
        found
            .map(|(mut a, created_raw)| {
                a.created_at = timestamp(created_raw, &a.id)?;
                Ok(a)
            })
            .transpose()
    }

    fn account_by_slug(&self, slug: &str) -> Result<Option<EscrowAccount>, StoreError> {
        let conn = self.conn();
        let found = conn
            .query_row(
                "SELECT id, slug, owner_email, display_name, min_bond_cents, max_bond_cents, \
                 allow_boost, timeout_hours, created_at FROM accounts WHERE slug = ?1",
                [slug],
                account_from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;
        found
            .map(|(mut a, created_raw)| {
                a.created_at = timestamp(created_raw, &a.id)?;
                Ok(a)
            })
            .transpose()
    }

    fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
            rusqlite::params![
                message.public_id,
                message.account_id,
                message.sender_email,
                message.sender_name,
                message.subject,
                message.body,
                message.bond_cents,
                message.fee_cents,
                message.currency,
                message.status.as_str(),
                message.hold_ref,
                message.capture_ref,
                message.created_at.timestamp(),
                message.authorized_at.map(|t| t.timestamp()),
                message.expires_at.map(|t| t.timestamp()),
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Duplicate("message public id")
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        Ok(())
    }

    fn message(&self, public_id: &str) -> Result<Option<Message>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE public_id = ?1"),
                [public_id],
                MessageRow::from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;
        row.map(MessageRow::into_message).transpose()
    }

    fn transition(
        &self,
        public_id: &str,
        from: &[MessageStatus],
        to: MessageStatus,
        patch: &TransitionPatch,
    ) -> Result<bool, StoreError> {
        if from.is_empty() {
            return Ok(false);
        }
        let conn = self.conn();

        // Single guarded UPDATE: atomic at the database level, so the
        // rows-affected count is the race verdict even across processes.
        let placeholders: Vec<String> =
            (0..from.len()).map(|i| format!("?{}", i + 7)).collect();
        let sql = format!(
            "UPDATE messages SET \
                 status = ?1, \
                 hold_ref = COALESCE(?2, hold_ref), \
                 capture_ref = COALESCE(?3, capture_ref), \
                 authorized_at = COALESCE(?4, authorized_at), \
                 expires_at = COALESCE(?5, expires_at) \
             WHERE public_id = ?6 AND status IN ({})",
            placeholders.join(", ")
        );

        let authorized_at = patch.authorized_at.map(|t| t.timestamp());
        let expires_at = patch.expires_at.map(|t| t.timestamp());
        let to_str = to.as_str();
        let from_strs: Vec<&str> = from.iter().map(|s| s.as_str()).collect();

        let mut params: Vec<&dyn rusqlite::ToSql> = vec![
            &to_str,
            &patch.hold_ref,
            &patch.capture_ref,
            &authorized_at,
            &expires_at,
            &public_id,
        ];
        for s in &from_strs {
            params.push(s);
        }

        let changed = conn.execute(&sql, params.as_slice())?;
        Ok(changed == 1)
    }

    fn due_for_sweep(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE status = 'AUTHORIZED' AND expires_at IS NOT NULL AND expires_at <= ?1 \
             ORDER BY expires_at ASC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![now.timestamp(), limit as i64],
            MessageRow::from_row,
        )?;

        let mut due = Vec::new();
        for row in rows {
            due.push(row.map_err(StoreError::Sqlite)?.into_message()?);
        }
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageDraft, DEFAULT_CURRENCY, DELIVERY_FEE_CENTS};
    use chrono::Duration;

    fn account() -> EscrowAccount {
        EscrowAccount {
            id: "acct-1".into(),
            slug: "demo".into(),
            owner_email: "demo@local.test".into(),
            display_name: Some("Demo".into()),
            min_bond_cents: 500,
            max_bond_cents: 5_000,
            allow_boost: true,
            timeout_hours: 72,
            created_at: Utc::now(),
        }
    }

    fn message(public_id: &str, status: MessageStatus) -> Message {
        Message {
            public_id: public_id.into(),
            account_id: "acct-1".into(),
            sender_email: "sender@example.com".into(),
            sender_name: None,
            subject: Some("hi".into()),
            body: "please read".into(),
            bond_cents: 500,
            fee_cents: DELIVERY_FEE_CENTS,
            currency: DEFAULT_CURRENCY.into(),
            status,
            hold_ref: None,
            capture_ref: None,
            created_at: Utc::now(),
            authorized_at: None,
            expires_at: None,
        }
    }

    fn sqlite_store(dir: &tempfile::TempDir) -> SqliteMessageStore {
        let path = dir.path().join("messages.db");
        SqliteMessageStore::open(path.to_str().unwrap()).unwrap()
    }

    fn exercise_accounts(store: &dyn MessageStore) {
        store.insert_account(&account()).unwrap();
        let by_id = store.account("acct-1").unwrap().unwrap();
        assert_eq!(by_id.slug, "demo");
        let by_slug = store.account_by_slug("demo").unwrap().unwrap();
        assert_eq!(by_slug.id, "acct-1");
        assert!(store.account("missing").unwrap().is_none());
        assert!(store.account_by_slug("missing").unwrap().is_none());
        assert!(matches!(
            store.insert_account(&account()),
            Err(StoreError::Duplicate(_))
        ));
    }

    fn exercise_transition_race(store: &dyn MessageStore) {
        store.insert_account(&account()).unwrap();
        let mut msg = message("m-1", MessageStatus::Authorized);
        msg.hold_ref = Some("hold_1".into());
        msg.expires_at = Some(Utc::now() + Duration::hours(72));
        store.insert_message(&msg).unwrap();

        let won_first = store
            .transition(
                "m-1",
                &[MessageStatus::Authorized],
                MessageStatus::Accepted,
                &TransitionPatch {
                    capture_ref: Some("cap_1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let won_second = store
            .transition(
                "m-1",
                &[MessageStatus::Authorized],
                MessageStatus::Released,
                &TransitionPatch::none(),
            )
            .unwrap();
        assert!(won_first);
        assert!(!won_second);

        let after = store.message("m-1").unwrap().unwrap();
        assert_eq!(after.status, MessageStatus::Accepted);
        assert_eq!(after.capture_ref.as_deref(), Some("cap_1"));
        // Patch from the losing call must not have leaked in.
        assert_eq!(after.hold_ref.as_deref(), Some("hold_1"));
    }

    fn exercise_sweep_query(store: &dyn MessageStore) {
        store.insert_account(&account()).unwrap();
        let now = Utc::now();

        let mut overdue_late = message("m-late", MessageStatus::Authorized);
        overdue_late.expires_at = Some(now - Duration::hours(1));
        let mut overdue_early = message("m-early", MessageStatus::Authorized);
        overdue_early.expires_at = Some(now - Duration::hours(5));
        let mut future = message("m-future", MessageStatus::Authorized);
        future.expires_at = Some(now + Duration::hours(1));
        let mut resolved = message("m-done", MessageStatus::Released);
        resolved.expires_at = Some(now - Duration::hours(9));
        let pending = message("m-draft", MessageStatus::Draft);

        for m in [&overdue_late, &overdue_early, &future, &resolved, &pending] {
            store.insert_message(m).unwrap();
        }

        let due = store.due_for_sweep(now, 50).unwrap();
        let ids: Vec<&str> = due.iter().map(|m| m.public_id.as_str()).collect();
        assert_eq!(ids, vec!["m-early", "m-late"]);

        let limited = store.due_for_sweep(now, 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].public_id, "m-early");
    }

    #[test]
    fn in_memory_accounts() {
        exercise_accounts(&InMemoryMessageStore::new());
    }

    #[test]
    fn sqlite_accounts() {
        let dir = tempfile::tempdir().unwrap();
        exercise_accounts(&sqlite_store(&dir));
    }

    #[test]
    fn in_memory_transition_race() {
        exercise_transition_race(&InMemoryMessageStore::new());
    }

    #[test]
    fn sqlite_transition_race() {
        let dir = tempfile::tempdir().unwrap();
        exercise_transition_race(&sqlite_store(&dir));
    }

    #[test]
    fn in_memory_sweep_query() {
        exercise_sweep_query(&InMemoryMessageStore::new());
    }

    #[test]
    fn sqlite_sweep_query() {
        let dir = tempfile::tempdir().unwrap();
        exercise_sweep_query(&sqlite_store(&dir));
    }

    #[test]
    fn duplicate_message_rejected() {
        let store = InMemoryMessageStore::new();
        store.insert_account(&account()).unwrap();
        let msg = message("m-1", MessageStatus::Draft);
        store.insert_message(&msg).unwrap();
        assert!(matches!(
            store.insert_message(&msg),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn transition_on_missing_message_is_not_a_win() {
        let store = InMemoryMessageStore::new();
        let won = store
            .transition(
                "ghost",
                &[MessageStatus::Authorized],
                MessageStatus::Accepted,
                &TransitionPatch::none(),
            )
            .unwrap();
        assert!(!won);
    }

    #[test]
    fn patch_sets_times_exactly_once() {
        let store = InMemoryMessageStore::new();
        store.insert_account(&account()).unwrap();
        store
            .insert_message(&message("m-1", MessageStatus::Authorizing))
            .unwrap();

        let at = Utc::now();
        let deadline = at + Duration::hours(72);
        assert!(store
            .transition(
                "m-1",
                &[MessageStatus::Authorizing],
                MessageStatus::Authorized,
                &TransitionPatch {
                    authorized_at: Some(at),
                    expires_at: Some(deadline),
                    ..Default::default()
                },
            )
            .unwrap());

        // A later status-only transition leaves both timestamps alone.
        assert!(store
            .transition(
                "m-1",
                &[MessageStatus::Authorized],
                MessageStatus::Released,
                &TransitionPatch::none(),
            )
            .unwrap());
        let after = store.message("m-1").unwrap().unwrap();
        assert!(after.authorized_at.is_some());
        assert_eq!(after.expires_at.map(|t| t.timestamp()), Some(deadline.timestamp()));
    }

    #[test]
    fn sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");

        {
            let store = SqliteMessageStore::open(path.to_str().unwrap()).unwrap();
            store.insert_account(&account()).unwrap();
            let mut msg = message("m-1", MessageStatus::Authorized);
            msg.hold_ref = Some("hold_1".into());
            msg.authorized_at = Some(Utc::now());
            msg.expires_at = Some(Utc::now() + Duration::hours(72));
            store.insert_message(&msg).unwrap();
        }

        let store = SqliteMessageStore::open(path.to_str().unwrap()).unwrap();
        let msg = store.message("m-1").unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Authorized);
        assert_eq!(msg.hold_ref.as_deref(), Some("hold_1"));
        assert!(msg.expires_at.is_some());
        let acct = store.account_by_slug("demo").unwrap().unwrap();
        assert_eq!(acct.owner_email, "demo@local.test");
    }

    #[test]
    fn sqlite_reports_corrupt_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir);
        store.insert_account(&account()).unwrap();
        store
            .insert_message(&message("m-1", MessageStatus::Draft))
            .unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE messages SET status = 'BOGUS' WHERE public_id = 'm-1'",
                [],
            )
            .unwrap();
        }

        assert!(matches!(
            store.message("m-1"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn draft_roundtrips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir);
        let acct = account();
        store.insert_account(&acct).unwrap();

        let draft = MessageDraft {
            sender_email: "sender@example.com".into(),
            sender_name: Some("Sender".into()),
            subject: None,
            body: "body".into(),
            requested_bond_cents: Some(700),
        };
        let msg = draft.into_message(&acct, Utc::now());
        store.insert_message(&msg).unwrap();

        let back = store.message(&msg.public_id).unwrap().unwrap();
        assert_eq!(back.bond_cents, 700);
        assert_eq!(back.sender_name.as_deref(), Some("Sender"));
        assert!(back.subject.is_none());
        assert_eq!(back.created_at.timestamp(), msg.created_at.timestamp());
    }
}
