//! Encryption profile persistence.

use chrono::{DateTime, Utc};
use reverie_shared::constants::SALT_SIZE;
use reverie_shared::types::{KeyVersion, UserId};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

use crate::convert::{timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::Result;
use crate::models::EncryptionProfile;

impl Database {
    pub fn get_encryption_profile(&self, user_id: UserId) -> Result<Option<EncryptionProfile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT user_id, salt, iterations, version, recovery_key_hash, updated_at
                 FROM encryption_profiles WHERE user_id = ?1",
                params![user_id.to_string()],
                row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// Insert or replace the profile for `profile.user_id`.
    pub fn save_encryption_profile(&self, profile: &EncryptionProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO encryption_profiles
                 (user_id, salt, iterations, version, recovery_key_hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 salt = excluded.salt,
                 iterations = excluded.iterations,
                 version = excluded.version,
                 recovery_key_hash = excluded.recovery_key_hash,
                 updated_at = excluded.updated_at",
            params![
                profile.user_id.to_string(),
                profile.salt.map(|s| s.to_vec()),
                profile.iterations,
                profile.version as u8,
                profile.recovery_key_hash,
                profile.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<EncryptionProfile> {
    let user_str: String = row.get(0)?;
    let salt_bytes: Option<Vec<u8>> = row.get(1)?;
    let iterations: u32 = row.get(2)?;
    let version_byte: u8 = row.get(3)?;
    let recovery_key_hash: Option<String> = row.get(4)?;
    let updated_str: String = row.get(5)?;

    let salt = match salt_bytes {
        Some(bytes) if bytes.len() == SALT_SIZE => {
            let mut salt = [0u8; SALT_SIZE];
            salt.copy_from_slice(&bytes);
            Some(salt)
        }
        Some(bytes) => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Blob,
                format!("salt must be {SALT_SIZE} bytes, got {}", bytes.len()).into(),
            ))
        }
        None => None,
    };

    let version = KeyVersion::from_byte(version_byte).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Integer,
            format!("unknown key version {version_byte}").into(),
        )
    })?;

    let updated_at: DateTime<Utc> = timestamp_col(5, &updated_str)?;

    Ok(EncryptionProfile {
        user_id: UserId(uuid_col(0, &user_str)?),
        salt,
        iterations,
        version,
        recovery_key_hash,
        updated_at,
    })
}
