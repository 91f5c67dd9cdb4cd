//! SQLite store.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use thornvale_domain::avatar::AvatarRecord;
use thornvale_domain::ids::AccountId;
use thornvale_domain::refs::Ref;

use super::{password, valid_password, valid_username, Store, StoreError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://thornvale.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// A private in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                salt BLOB NOT NULL,
                password_key BLOB NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS avatars (
                account_id INTEGER PRIMARY KEY REFERENCES accounts(id),
                payload TEXT NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tutorials_seen (
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                tutorial TEXT NOT NULL,
                PRIMARY KEY (account_id, tutorial)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS finished_quests (
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                quest TEXT NOT NULL,
                completed_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, quest)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_account(
        &self,
        username: &str,
        password: &str,
        avatar: &AvatarRecord,
    ) -> Result<Option<AccountId>, StoreError> {
        if !valid_username(username) {
            return Err(StoreError::InvalidUsername);
        }
        if !valid_password(password) {
            return Err(StoreError::InvalidPassword);
        }
        let (salt, key) = password::hash_password(password);
        let payload = serde_json::to_string(avatar)?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO accounts (username, salt, password_key) VALUES (?, ?, ?)",
        )
        .bind(username)
        .bind(&salt)
        .bind(&key)
        .execute(&mut *tx)
        .await;
        let account_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) => {
                let taken = e
                    .as_database_error()
                    .is_some_and(|d| d.is_unique_violation());
                if taken {
                    return Ok(None);
                }
                return Err(e.into());
            }
        };
        sqlx::query("INSERT INTO avatars (account_id, payload) VALUES (?, ?)")
            .bind(account_id)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(username, account = account_id, "account created");
        Ok(Some(AccountId(account_id)))
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AccountId>, StoreError> {
        let row = sqlx::query("SELECT id, salt, password_key FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = row.get("id");
        let salt: Vec<u8> = row.get("salt");
        let key: Vec<u8> = row.get("password_key");
        if password::verify(password, &salt, &key) {
            Ok(Some(AccountId(id)))
        } else {
            Ok(None)
        }
    }

    async fn load_avatar(&self, account: AccountId) -> Result<Option<AvatarRecord>, StoreError> {
        let row = sqlx::query("SELECT payload FROM avatars WHERE account_id = ?")
            .bind(account.0)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.get("payload");
        let mut record: AvatarRecord = serde_json::from_str(&payload)?;

        // The journaled tables are joined in rather than stored in the
        // payload.
        let tutorials = sqlx::query("SELECT tutorial FROM tutorials_seen WHERE account_id = ?")
            .bind(account.0)
            .fetch_all(&self.pool)
            .await?;
        for row in tutorials {
            record.tutorials_seen.insert(row.get("tutorial"));
        }
        let quests =
            sqlx::query("SELECT quest, completed_at FROM finished_quests WHERE account_id = ?")
                .bind(account.0)
                .fetch_all(&self.pool)
                .await?;
        for row in quests {
            let quest: String = row.get("quest");
            match quest.parse::<Ref>() {
                Ok(r) => {
                    record.completed_quests.insert(r, row.get("completed_at"));
                }
                Err(_) => tracing::warn!(quest, "unparseable quest ref in journal"),
            }
        }
        Ok(Some(record))
    }

    async fn save_avatar(
        &self,
        account: AccountId,
        record: &AvatarRecord,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO avatars (account_id, payload, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT (account_id) DO UPDATE
             SET payload = excluded.payload, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(account.0)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;
        for tutorial in &record.tutorials_seen {
            sqlx::query(
                "INSERT OR IGNORE INTO tutorials_seen (account_id, tutorial) VALUES (?, ?)",
            )
            .bind(account.0)
            .bind(tutorial)
            .execute(&mut *tx)
            .await?;
        }
        for (quest, completed_at) in &record.completed_quests {
            sqlx::query(
                "INSERT OR IGNORE INTO finished_quests (account_id, quest, completed_at)
                 VALUES (?, ?, ?)",
            )
            .bind(account.0)
            .bind(quest.to_string())
            .bind(completed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn reset_tutorials(&self, account: AccountId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tutorials_seen WHERE account_id = ?")
            .bind(account.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thornvale_domain::avatar::ItemRecord;
    use thornvale_domain::quest::QuestState;

    fn sample_record() -> AvatarRecord {
        let mut record = AvatarRecord {
            level: 3,
            location: Some(Ref::absolute("village", "plaza")),
            tutorials_on: true,
            ..AvatarRecord::default()
        };
        record.inventory.push(ItemRecord {
            proto: Ref::absolute("items", "torch"),
            count: 2,
        });
        record.equipped.insert(
            "main_hand".into(),
            ItemRecord {
                proto: Ref::absolute("items", "sword"),
                count: 1,
            },
        );
        record.active_quests.insert(
            Ref::absolute("village", "well_quest"),
            QuestState::at_phase("fetch"),
        );
        record.skills.insert(Ref::absolute("skills", "mining"), 4);
        record
    }

    #[tokio::test]
    async fn create_authenticate_and_duplicates() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = AvatarRecord::default();
        let id = store
            .create_account("kara", "hunter2 hunter2", &record)
            .await
            .unwrap()
            .expect("fresh username");
        assert!(matches!(
            store.create_account("kara", "hunter2 hunter2", &record).await,
            Ok(None)
        ));
        assert_eq!(
            store.authenticate("kara", "hunter2 hunter2").await.unwrap(),
            Some(id)
        );
        assert_eq!(
            store.authenticate("kara", "wrong password").await.unwrap(),
            None
        );
        assert_eq!(
            store.authenticate("nobody", "hunter2 hunter2").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn credential_rules_are_enforced() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = AvatarRecord::default();
        assert!(matches!(
            store.create_account("k!", "hunter2 hunter2", &record).await,
            Err(StoreError::InvalidUsername)
        ));
        assert!(matches!(
            store.create_account("kara", "short", &record).await,
            Err(StoreError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn avatar_round_trips_with_journaled_tables() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .create_account("kara", "hunter2 hunter2", &AvatarRecord::default())
            .await
            .unwrap()
            .unwrap();

        let mut record = sample_record();
        record.tutorials_seen.insert("village.plaza".into());
        record
            .completed_quests
            .insert(Ref::absolute("village", "intro"), 1700000000);
        store.save_avatar(id, &record).await.unwrap();

        let loaded = store.load_avatar(id).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        // Saving again with more journal entries accumulates them.
        let mut record2 = loaded.clone();
        record2.tutorials_seen.insert("village.well_yard".into());
        store.save_avatar(id, &record2).await.unwrap();
        let loaded2 = store.load_avatar(id).await.unwrap().unwrap();
        assert_eq!(loaded2.tutorials_seen.len(), 2);
    }

    #[tokio::test]
    async fn reset_tutorials_purges_the_journal() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .create_account("kara", "hunter2 hunter2", &AvatarRecord::default())
            .await
            .unwrap()
            .unwrap();
        let mut record = AvatarRecord::default();
        record.tutorials_seen.insert("village.plaza".into());
        store.save_avatar(id, &record).await.unwrap();

        store.reset_tutorials(id).await.unwrap();
        let loaded = store.load_avatar(id).await.unwrap().unwrap();
        assert!(loaded.tutorials_seen.is_empty());
    }
}
