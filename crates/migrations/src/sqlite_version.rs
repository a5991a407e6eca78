use sqlx::{query_scalar, SqlitePool};

use crate::MigrateError;

/// `UPDATE ... RETURNING` first shipped in SQLite 3.35.0.
const MIN_SQLITE_VERSION: (u32, u32, u32) = (3, 35, 0);

/// Fetches the SQLite library version and checks it supports the claim query
pub async fn fetch_and_check_sqlite_version(pool: &SqlitePool) -> Result<String, MigrateError> {
    let version: String = query_scalar("select sqlite_version()")
        .fetch_one(pool)
        .await?;

    check_sqlite_version(&version)?;
    Ok(version)
}

/// Checks if the given SQLite version string (e.g. `3.45.1`) is recent enough
pub fn check_sqlite_version(version_string: &str) -> Result<(u32, u32, u32), MigrateError> {
    let mut parts = version_string.trim().split('.').map(str::parse::<u32>);
    let mut next = || -> Result<u32, MigrateError> {
        match parts.next() {
            Some(Ok(n)) => Ok(n),
            Some(Err(_)) => Err(MigrateError::ParseVersionError(version_string.to_string())),
            None => Ok(0),
        }
    };
    let version = (next()?, next()?, next()?);

    if version.0 == 0 || version < MIN_SQLITE_VERSION {
        return Err(MigrateError::IncompatibleVersion(version_string.to_string()));
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_recent_versions() {
        assert_eq!(check_sqlite_version("3.35.0").unwrap(), (3, 35, 0));
        assert_eq!(check_sqlite_version("3.46.1").unwrap(), (3, 46, 1));
        assert_eq!(check_sqlite_version("3.40").unwrap(), (3, 40, 0));
    }

    #[test]
    fn rejects_old_or_garbage_versions() {
        assert!(matches!(
            check_sqlite_version("3.34.1"),
            Err(MigrateError::IncompatibleVersion(_))
        ));
        assert!(matches!(
            check_sqlite_version("three"),
            Err(MigrateError::ParseVersionError(_))
        ));
        assert!(matches!(
            check_sqlite_version(""),
            Err(MigrateError::ParseVersionError(_))
        ));
    }
}
