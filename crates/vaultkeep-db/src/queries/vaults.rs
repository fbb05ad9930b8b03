//! Vault registry queries.

use rusqlite::{params, Connection, OptionalExtension, Row};
use vaultkeep_types::{Timestamp, Vault, VaultAddress, VaultStatus};

use crate::{map_constraint, to_sql_int, DbError, Result};

/// Partial update applied by [`update_vault`]. `None` leaves a column as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultUpdate {
    pub interval_secs: Option<u64>,
    pub last_compounded_at: Option<Timestamp>,
    pub last_attempt_at: Option<Timestamp>,
    pub status: Option<VaultStatus>,
}

const VAULT_COLUMNS: &str = "id, address, interval_secs, last_compounded_at, last_attempt_at, \
                             status, created_at, updated_at";

/// Register a vault.
pub fn create_vault(
    conn: &Connection,
    address: &VaultAddress,
    interval_secs: u64,
    now: Timestamp,
) -> Result<Vault> {
    conn.execute(
        "INSERT INTO vaults (address, interval_secs, status, created_at, updated_at)
         VALUES (?1, ?2, 'idle', ?3, ?3)",
        params![
            address.as_str(),
            to_sql_int(interval_secs, "interval_secs")?,
            to_sql_int(now, "created_at")?,
        ],
    )
    .map_err(|e| map_constraint(e, "create vault"))?;

    get_vault_by_id(conn, conn.last_insert_rowid())
}

/// Get a vault by on-chain address.
pub fn get_vault(conn: &Connection, address: &VaultAddress) -> Result<Vault> {
    conn.query_row(
        &format!("SELECT {VAULT_COLUMNS} FROM vaults WHERE address = ?1"),
        params![address.as_str()],
        vault_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("vault {address}")),
        other => DbError::Sqlite(other),
    })
}

/// Get a vault by row id.
pub fn get_vault_by_id(conn: &Connection, id: i64) -> Result<Vault> {
    conn.query_row(
        &format!("SELECT {VAULT_COLUMNS} FROM vaults WHERE id = ?1"),
        params![id],
        vault_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("vault id {id}")),
        other => DbError::Sqlite(other),
    })
}

/// Look a vault up without treating absence as an error.
pub fn find_vault(conn: &Connection, address: &VaultAddress) -> Result<Option<Vault>> {
    conn.query_row(
        &format!("SELECT {VAULT_COLUMNS} FROM vaults WHERE address = ?1"),
        params![address.as_str()],
        vault_from_row,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

/// List all vaults ordered by address.
pub fn list_vaults(conn: &Connection) -> Result<Vec<Vault>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VAULT_COLUMNS} FROM vaults ORDER BY address"
    ))?;
    let rows = stmt.query_map([], vault_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(DbError::Sqlite)
}

/// Apply a partial update and return the updated row.
///
/// `last_compounded_at` never moves backwards: an update that would decrease
/// it is rejected with [`DbError::Constraint`] and nothing is written.
pub fn update_vault(
    conn: &Connection,
    id: i64,
    update: &VaultUpdate,
    now: Timestamp,
) -> Result<Vault> {
    let interval = update
        .interval_secs
        .map(|v| to_sql_int(v, "interval_secs"))
        .transpose()?;
    let compounded = update
        .last_compounded_at
        .map(|v| to_sql_int(v, "last_compounded_at"))
        .transpose()?;
    let attempted = update
        .last_attempt_at
        .map(|v| to_sql_int(v, "last_attempt_at"))
        .transpose()?;

    let changed = conn
        .execute(
            "UPDATE vaults SET
                 interval_secs = COALESCE(?1, interval_secs),
                 last_compounded_at = COALESCE(?2, last_compounded_at),
                 last_attempt_at = COALESCE(?3, last_attempt_at),
                 status = COALESCE(?4, status),
                 updated_at = ?5
             WHERE id = ?6
               AND (?2 IS NULL OR last_compounded_at IS NULL OR ?2 >= last_compounded_at)",
            params![
                interval,
                compounded,
                attempted,
                update.status.map(|s| s.as_str()),
                to_sql_int(now, "updated_at")?,
                id,
            ],
        )
        .map_err(|e| map_constraint(e, "update vault"))?;

    if changed == 0 {
        // Either the row is missing or the monotonic guard refused the write.
        let existing = get_vault_by_id(conn, id)?;
        return Err(DbError::Constraint(format!(
            "last_compounded_at of {} would move backwards ({:?} -> {:?})",
            existing.address, existing.last_compounded_at, update.last_compounded_at
        )));
    }

    get_vault_by_id(conn, id)
}

fn vault_from_row(row: &Row<'_>) -> rusqlite::Result<Vault> {
    let address: String = row.get(1)?;
    let status: String = row.get(5)?;
    Ok(Vault {
        id: row.get(0)?,
        address: VaultAddress::parse(&address).map_err(|e| conversion_error(1, e))?,
        interval_secs: row.get::<_, i64>(2)? as u64,
        last_compounded_at: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        last_attempt_at: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        status: status
            .parse::<VaultStatus>()
            .map_err(|e| conversion_error(5, e))?,
        created_at: row.get::<_, i64>(6)? as u64,
        updated_at: row.get::<_, i64>(7)? as u64,
    })
}

pub(crate) fn conversion_error(
    column: usize,
    err: vaultkeep_types::TypeError,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_memory;

    fn addr(n: u8) -> VaultAddress {
        VaultAddress::parse(&format!("0x{n:02x}")).expect("address")
    }

    #[test]
    fn test_create_and_get_vault() {
        let conn = open_memory().expect("open");
        let created = create_vault(&conn, &addr(1), 14_400, 1000).expect("create");

        assert_eq!(created.status, VaultStatus::Idle);
        assert_eq!(created.last_compounded_at, None);
        assert_eq!(created.interval_secs, 14_400);

        let fetched = get_vault(&conn, &addr(1)).expect("get");
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_get_vault_not_found() {
        let conn = open_memory().expect("open");
        assert!(matches!(
            get_vault(&conn, &addr(9)),
            Err(DbError::NotFound(_))
        ));
        assert!(find_vault(&conn, &addr(9)).expect("find").is_none());
    }

    #[test]
    fn test_duplicate_address_is_constraint() {
        let conn = open_memory().expect("open");
        create_vault(&conn, &addr(1), 60, 1).expect("first");
        assert!(matches!(
            create_vault(&conn, &addr(1), 60, 2),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_update_partial_fields() {
        let conn = open_memory().expect("open");
        let v = create_vault(&conn, &addr(1), 60, 1).expect("create");

        let updated = update_vault(
            &conn,
            v.id,
            &VaultUpdate {
                status: Some(VaultStatus::InProgress),
                last_attempt_at: Some(100),
                ..Default::default()
            },
            100,
        )
        .expect("update");

        assert_eq!(updated.status, VaultStatus::InProgress);
        assert_eq!(updated.last_attempt_at, Some(100));
        assert_eq!(updated.last_compounded_at, None);
        assert_eq!(updated.interval_secs, 60);
        assert_eq!(updated.updated_at, 100);
    }

    #[test]
    fn test_last_compounded_never_decreases() {
        let conn = open_memory().expect("open");
        let v = create_vault(&conn, &addr(1), 60, 1).expect("create");

        update_vault(
            &conn,
            v.id,
            &VaultUpdate {
                last_compounded_at: Some(500),
                ..Default::default()
            },
            500,
        )
        .expect("advance");

        let err = update_vault(
            &conn,
            v.id,
            &VaultUpdate {
                last_compounded_at: Some(400),
                status: Some(VaultStatus::Idle),
                ..Default::default()
            },
            600,
        );
        assert!(matches!(err, Err(DbError::Constraint(_))));

        let unchanged = get_vault_by_id(&conn, v.id).expect("get");
        assert_eq!(unchanged.last_compounded_at, Some(500));
        assert_eq!(unchanged.updated_at, 500);
    }

    #[test]
    fn test_update_missing_vault() {
        let conn = open_memory().expect("open");
        assert!(matches!(
            update_vault(&conn, 42, &VaultUpdate::default(), 1),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_vaults_ordered() {
        let conn = open_memory().expect("open");
        create_vault(&conn, &addr(2), 60, 1).expect("create");
        create_vault(&conn, &addr(1), 60, 1).expect("create");

        let all = list_vaults(&conn).expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].address, addr(1));
        assert_eq!(all[1].address, addr(2));
    }
}
