//! Durable request storage and the scope/rules/match-replace tables that
//! ride along in the same database.
//!
//! All writes go through a single `parking_lot::Mutex<Connection>`; reads
//! open their own short-lived connection against the same file so they
//! never queue behind a writer. A write that hits `SQLITE_BUSY` is retried
//! exactly once after a short backoff before surfacing `StoreError::Locked`.

pub mod models;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::StoreError;
use models::{
    FuzzTab, InterceptRule, ListRequestsQuery, MatchReplaceRule, MatchType, Relationship,
    ReplayTab, RequestRecord, RuleOperator, ScopeList,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    domain TEXT NOT NULL,
    port INTEGER NOT NULL,
    path TEXT NOT NULL,
    query TEXT NOT NULL,
    protocol_version TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    request_body TEXT NOT NULL,
    response_headers TEXT,
    response_body TEXT,
    status INTEGER,
    length INTEGER,
    mime_type TEXT,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp);
CREATE INDEX IF NOT EXISTS idx_requests_domain ON requests(domain);

CREATE TABLE IF NOT EXISTS scope (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    in_scope TEXT NOT NULL DEFAULT '[]',
    out_scope TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    operator TEXT NOT NULL,
    match_type TEXT NOT NULL,
    relationship TEXT NOT NULL,
    pattern TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS match_replace_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    match_type TEXT NOT NULL,
    match_content TEXT NOT NULL,
    replace_content TEXT NOT NULL,
    target TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS replay_tabs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    request_ids TEXT NOT NULL DEFAULT '[]',
    current_index INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS fuzz_tabs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    target_url TEXT NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    protocol_version TEXT NOT NULL,
    headers TEXT NOT NULL DEFAULT '{}',
    body TEXT NOT NULL DEFAULT '',
    payload_sets TEXT NOT NULL DEFAULT '[]'
);
"#;

/// Shared handle to the request/scope/rules database.
#[derive(Clone)]
pub struct Store {
    path: Arc<String>,
    writer: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 1000)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO scope (id, in_scope, out_scope) VALUES (1, '[]', '[]')",
            [],
        )?;

        Ok(Self {
            path: Arc::new(path.to_string_lossy().into_owned()),
            writer: Arc::new(Mutex::new(conn)),
        })
    }

    fn read_conn(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(self.path.as_str())?;
        conn.pragma_update(None, "busy_timeout", 1000)?;
        Ok(conn)
    }

    /// Run `f` against the writer connection, retrying exactly once on
    /// `SQLITE_BUSY` after a short backoff.
    fn with_writer<T>(&self, f: impl Fn(&Connection) -> rusqlite::Result<T>) -> Result<T, StoreError> {
        let conn = self.writer.lock();
        match f(&conn) {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::DatabaseBusy => {
                drop(conn);
                std::thread::sleep(Duration::from_millis(100));
                let conn = self.writer.lock();
                f(&conn).map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(code, _)
                        if code.code == rusqlite::ErrorCode::DatabaseBusy =>
                    {
                        StoreError::Locked
                    }
                    other => StoreError::Sqlite(other),
                })
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn insert_request(&self, rec: &RequestRecord) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO requests (
                    external_id, url, method, domain, port, path, query, protocol_version,
                    request_headers, request_body, response_headers, response_body,
                    status, length, mime_type, timestamp
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                rusqlite::params![
                    rec.external_id,
                    rec.url,
                    rec.method,
                    rec.domain,
                    rec.port,
                    rec.path,
                    rec.query,
                    rec.protocol_version,
                    rec.request_headers,
                    rec.request_body,
                    rec.response_headers,
                    rec.response_body,
                    rec.status,
                    rec.length,
                    rec.mime_type,
                    rec.timestamp,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Fill in the response side of an already-inserted request, used once
    /// the upstream answer is known.
    #[allow(clippy::too_many_arguments)]
    pub fn update_response(
        &self,
        id: i64,
        response_headers: &str,
        response_body: &str,
        status: u16,
        length: i64,
        mime_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let changed = self.with_writer(|conn| {
            conn.execute(
                "UPDATE requests SET response_headers=?2, response_body=?3, status=?4, length=?5, mime_type=?6
                 WHERE id=?1",
                rusqlite::params![id, response_headers, response_body, status, length, mime_type],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub fn get_request(&self, id: i64) -> Result<RequestRecord, StoreError> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT id, external_id, url, method, domain, port, path, query, protocol_version,
                    request_headers, request_body, response_headers, response_body,
                    status, length, mime_type, timestamp
             FROM requests WHERE id = ?1",
            [id],
            Self::row_to_request,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id),
            other => StoreError::Sqlite(other),
        })
    }

    /// Case-insensitive LIKE search across `method`, `domain`, `path`,
    /// `url`, `mime_type`, `query` and `status`; an exact `method` or
    /// `status` value is also recognized by equality, and a domain-shaped
    /// term (contains `.`, non-empty on both sides) additionally matches
    /// by exact equality or subdomain suffix.
    pub fn list_requests(&self, q: &ListRequestsQuery) -> Result<(Vec<RequestRecord>, u64), StoreError> {
        let conn = self.read_conn()?;
        let sort_key = match q.sort_key.as_str() {
            "method" | "domain" | "path" | "status" | "length" | "timestamp" => q.sort_key.as_str(),
            _ => "timestamp",
        };
        let limit = q.limit.max(1);
        let offset = q.page.saturating_mul(limit);

        let where_clause = "
             (?1 IS NULL
                OR method LIKE '%' || ?1 || '%' ESCAPE '\\'
                OR domain LIKE '%' || ?1 || '%' ESCAPE '\\'
                OR path LIKE '%' || ?1 || '%' ESCAPE '\\'
                OR url LIKE '%' || ?1 || '%' ESCAPE '\\'
                OR mime_type LIKE '%' || ?1 || '%' ESCAPE '\\'
                OR query LIKE '%' || ?1 || '%' ESCAPE '\\'
                OR CAST(status AS TEXT) LIKE '%' || ?1 || '%'
                OR lower(method) = lower(?1)
                OR CAST(status AS TEXT) = ?1
                OR (instr(?1, '.') > 1 AND (lower(domain) = lower(?1) OR lower(domain) LIKE '%.' || lower(?1)))
             )";

        let count_sql = format!("SELECT COUNT(*) FROM requests WHERE {where_clause}");
        let total: i64 = conn.query_row(&count_sql, rusqlite::params![q.search], |r| r.get(0))?;

        let sql = format!(
            "SELECT id, external_id, url, method, domain, port, path, query, protocol_version,
                    request_headers, request_body, response_headers, response_body,
                    status, length, mime_type, timestamp
             FROM requests
             WHERE {where_clause}
             ORDER BY {sort_key} {dir}
             LIMIT ?2 OFFSET ?3",
            dir = q.sort_dir.as_sql()
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![q.search, limit, offset],
            Self::row_to_request,
        )?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok((records, total.max(0) as u64))
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<RequestRecord> {
        Ok(RequestRecord {
            id: row.get(0)?,
            external_id: row.get(1)?,
            url: row.get(2)?,
            method: row.get(3)?,
            domain: row.get(4)?,
            port: row.get(5)?,
            path: row.get(6)?,
            query: row.get(7)?,
            protocol_version: row.get(8)?,
            request_headers: row.get(9)?,
            request_body: row.get(10)?,
            response_headers: row.get(11)?,
            response_body: row.get(12)?,
            status: row.get(13)?,
            length: row.get(14)?,
            mime_type: row.get(15)?,
            timestamp: row.get(16)?,
        })
    }

    pub fn get_scope(&self) -> Result<ScopeList, StoreError> {
        let conn = self.read_conn()?;
        let (in_json, out_json): (String, String) = conn.query_row(
            "SELECT in_scope, out_scope FROM scope WHERE id = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(ScopeList {
            in_scope: serde_json::from_str(&in_json).unwrap_or_default(),
            out_scope: serde_json::from_str(&out_json).unwrap_or_default(),
        })
    }

    pub fn set_scope(&self, scope: &ScopeList) -> Result<(), StoreError> {
        let in_json = serde_json::to_string(&scope.in_scope).unwrap_or_else(|_| "[]".into());
        let out_json = serde_json::to_string(&scope.out_scope).unwrap_or_else(|_| "[]".into());
        self.with_writer(|conn| {
            conn.execute(
                "UPDATE scope SET in_scope = ?1, out_scope = ?2 WHERE id = 1",
                rusqlite::params![in_json, out_json],
            )
        })?;
        Ok(())
    }

    pub fn list_rules(&self) -> Result<Vec<InterceptRule>, StoreError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, operator, match_type, relationship, pattern, enabled FROM rules ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::row_to_rule)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn insert_rule(&self, rule: &InterceptRule) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO rules (name, operator, match_type, relationship, pattern, enabled)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                rusqlite::params![
                    rule.name,
                    operator_str(rule.operator),
                    match_type_str(rule.match_type),
                    relationship_str(rule.relationship),
                    rule.pattern,
                    rule.enabled,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_rule(&self, rule: &InterceptRule) -> Result<(), StoreError> {
        let changed = self.with_writer(|conn| {
            conn.execute(
                "UPDATE rules SET name=?2, operator=?3, match_type=?4, relationship=?5, pattern=?6, enabled=?7
                 WHERE id=?1",
                rusqlite::params![
                    rule.id,
                    rule.name,
                    operator_str(rule.operator),
                    match_type_str(rule.match_type),
                    relationship_str(rule.relationship),
                    rule.pattern,
                    rule.enabled,
                ],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(rule.id));
        }
        Ok(())
    }

    pub fn delete_rule(&self, id: i64) -> Result<(), StoreError> {
        let changed = self.with_writer(|conn| conn.execute("DELETE FROM rules WHERE id=?1", [id]))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<InterceptRule> {
        let operator: String = row.get(2)?;
        let match_type: String = row.get(3)?;
        let relationship: String = row.get(4)?;
        Ok(InterceptRule {
            id: row.get(0)?,
            name: row.get(1)?,
            operator: parse_operator(&operator),
            match_type: parse_match_type(&match_type),
            relationship: parse_relationship(&relationship),
            pattern: row.get(5)?,
            enabled: row.get(6)?,
        })
    }

    pub fn list_match_replace(&self) -> Result<Vec<MatchReplaceRule>, StoreError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, match_type, match_content, replace_content, target, enabled
             FROM match_replace_rules ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::row_to_match_replace)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn insert_match_replace(&self, rule: &MatchReplaceRule) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO match_replace_rules (name, match_type, match_content, replace_content, target, enabled)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                rusqlite::params![
                    rule.name,
                    match_replace_match_type_str(rule.match_type),
                    rule.match_content,
                    rule.replace_content,
                    match_replace_target_str(rule.target),
                    rule.enabled,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_match_replace(&self, rule: &MatchReplaceRule) -> Result<(), StoreError> {
        let changed = self.with_writer(|conn| {
            conn.execute(
                "UPDATE match_replace_rules SET name=?2, match_type=?3, match_content=?4,
                 replace_content=?5, target=?6, enabled=?7 WHERE id=?1",
                rusqlite::params![
                    rule.id,
                    rule.name,
                    match_replace_match_type_str(rule.match_type),
                    rule.match_content,
                    rule.replace_content,
                    match_replace_target_str(rule.target),
                    rule.enabled,
                ],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(rule.id));
        }
        Ok(())
    }

    pub fn delete_match_replace(&self, id: i64) -> Result<(), StoreError> {
        let changed =
            self.with_writer(|conn| conn.execute("DELETE FROM match_replace_rules WHERE id=?1", [id]))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn row_to_match_replace(row: &rusqlite::Row) -> rusqlite::Result<MatchReplaceRule> {
        let match_type: String = row.get(2)?;
        let target: String = row.get(5)?;
        Ok(MatchReplaceRule {
            id: row.get(0)?,
            name: row.get(1)?,
            match_type: parse_match_replace_match_type(&match_type),
            match_content: row.get(3)?,
            replace_content: row.get(4)?,
            target: parse_match_replace_target(&target),
            enabled: row.get(6)?,
        })
    }

    pub fn list_replay_tabs(&self) -> Result<Vec<ReplayTab>, StoreError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT id, name, request_ids, current_index FROM replay_tabs ORDER BY id")?;
        let rows = stmt.query_map([], Self::row_to_replay_tab)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn get_replay_tab(&self, id: i64) -> Result<ReplayTab, StoreError> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT id, name, request_ids, current_index FROM replay_tabs WHERE id = ?1",
            [id],
            Self::row_to_replay_tab,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id),
            other => StoreError::Sqlite(other),
        })
    }

    pub fn insert_replay_tab(&self, name: &str) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO replay_tabs (name, request_ids, current_index) VALUES (?1, '[]', 0)",
                [name],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert `rec` and append the new row id to `tab_id`'s chain within a
    /// single transaction, so a crash can never leave the request stored
    /// without being reachable from its tab.
    pub fn insert_request_into_replay_tab(&self, tab_id: i64, rec: &RequestRecord) -> Result<i64, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO requests (
                    external_id, url, method, domain, port, path, query, protocol_version,
                    request_headers, request_body, response_headers, response_body,
                    status, length, mime_type, timestamp
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                rusqlite::params![
                    rec.external_id,
                    rec.url,
                    rec.method,
                    rec.domain,
                    rec.port,
                    rec.path,
                    rec.query,
                    rec.protocol_version,
                    rec.request_headers,
                    rec.request_body,
                    rec.response_headers,
                    rec.response_body,
                    rec.status,
                    rec.length,
                    rec.mime_type,
                    rec.timestamp,
                ],
            )?;
            let new_id = conn.last_insert_rowid();

            let existing: String = conn.query_row(
                "SELECT request_ids FROM replay_tabs WHERE id = ?1",
                [tab_id],
                |r| r.get(0),
            )?;
            let mut ids: Vec<i64> = serde_json::from_str(&existing).unwrap_or_default();
            ids.push(new_id);
            let updated = serde_json::to_string(&ids).unwrap_or_else(|_| "[]".into());
            conn.execute(
                "UPDATE replay_tabs SET request_ids = ?2, current_index = ?3 WHERE id = ?1",
                rusqlite::params![tab_id, updated, ids.len().saturating_sub(1)],
            )?;
            Ok(new_id)
        })
    }

    pub fn rename_replay_tab(&self, id: i64, name: &str) -> Result<(), StoreError> {
        let changed = self.with_writer(|conn| {
            conn.execute("UPDATE replay_tabs SET name = ?2 WHERE id = ?1", rusqlite::params![id, name])
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub fn delete_replay_tab(&self, id: i64) -> Result<(), StoreError> {
        let changed = self.with_writer(|conn| conn.execute("DELETE FROM replay_tabs WHERE id=?1", [id]))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn row_to_replay_tab(row: &rusqlite::Row) -> rusqlite::Result<ReplayTab> {
        let request_ids: String = row.get(2)?;
        Ok(ReplayTab {
            id: row.get(0)?,
            name: row.get(1)?,
            request_ids: serde_json::from_str(&request_ids).unwrap_or_default(),
            current_index: row.get::<_, i64>(3)? as usize,
        })
    }

    pub fn list_fuzz_tabs(&self) -> Result<Vec<FuzzTab>, StoreError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, target_url, method, path, protocol_version, headers, body, payload_sets
             FROM fuzz_tabs ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::row_to_fuzz_tab)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn get_fuzz_tab(&self, id: i64) -> Result<FuzzTab, StoreError> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT id, name, target_url, method, path, protocol_version, headers, body, payload_sets
             FROM fuzz_tabs WHERE id = ?1",
            [id],
            Self::row_to_fuzz_tab,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id),
            other => StoreError::Sqlite(other),
        })
    }

    pub fn insert_fuzz_tab(&self, tab: &FuzzTab) -> Result<i64, StoreError> {
        let headers = serde_json::to_string(&tab.headers).unwrap_or_else(|_| "{}".into());
        let payload_sets = serde_json::to_string(&tab.payload_sets).unwrap_or_else(|_| "[]".into());
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO fuzz_tabs (name, target_url, method, path, protocol_version, headers, body, payload_sets)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                rusqlite::params![
                    tab.name,
                    tab.target_url,
                    tab.method,
                    tab.path,
                    tab.protocol_version,
                    headers,
                    tab.body,
                    payload_sets,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_fuzz_tab(&self, tab: &FuzzTab) -> Result<(), StoreError> {
        let headers = serde_json::to_string(&tab.headers).unwrap_or_else(|_| "{}".into());
        let payload_sets = serde_json::to_string(&tab.payload_sets).unwrap_or_else(|_| "[]".into());
        let changed = self.with_writer(|conn| {
            conn.execute(
                "UPDATE fuzz_tabs SET name=?2, target_url=?3, method=?4, path=?5, protocol_version=?6,
                 headers=?7, body=?8, payload_sets=?9 WHERE id=?1",
                rusqlite::params![
                    tab.id,
                    tab.name,
                    tab.target_url,
                    tab.method,
                    tab.path,
                    tab.protocol_version,
                    headers,
                    tab.body,
                    payload_sets,
                ],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(tab.id));
        }
        Ok(())
    }

    pub fn delete_fuzz_tab(&self, id: i64) -> Result<(), StoreError> {
        let changed = self.with_writer(|conn| conn.execute("DELETE FROM fuzz_tabs WHERE id=?1", [id]))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn row_to_fuzz_tab(row: &rusqlite::Row) -> rusqlite::Result<FuzzTab> {
        let headers: String = row.get(6)?;
        let payload_sets: String = row.get(8)?;
        Ok(FuzzTab {
            id: row.get(0)?,
            name: row.get(1)?,
            target_url: row.get(2)?,
            method: row.get(3)?,
            path: row.get(4)?,
            protocol_version: row.get(5)?,
            headers: serde_json::from_str(&headers).unwrap_or_default(),
            body: row.get(7)?,
            payload_sets: serde_json::from_str(&payload_sets).unwrap_or_default(),
        })
    }
}

fn operator_str(op: RuleOperator) -> &'static str {
    match op {
        RuleOperator::And => "and",
        RuleOperator::Or => "or",
    }
}

fn parse_operator(s: &str) -> RuleOperator {
    if s.eq_ignore_ascii_case("or") {
        RuleOperator::Or
    } else {
        RuleOperator::And
    }
}

fn match_type_str(m: MatchType) -> &'static str {
    match m {
        MatchType::Domain => "domain",
        MatchType::Protocol => "protocol",
        MatchType::Method => "method",
        MatchType::Url => "url",
        MatchType::Path => "path",
        MatchType::FileExtension => "file_extension",
        MatchType::Header => "header",
    }
}

fn parse_match_type(s: &str) -> MatchType {
    match s {
        "protocol" => MatchType::Protocol,
        "method" => MatchType::Method,
        "url" => MatchType::Url,
        "path" => MatchType::Path,
        "file_extension" => MatchType::FileExtension,
        "header" => MatchType::Header,
        _ => MatchType::Domain,
    }
}

fn relationship_str(r: Relationship) -> &'static str {
    match r {
        Relationship::Matches => "matches",
        Relationship::DoesntMatch => "doesn't match",
    }
}

fn parse_relationship(s: &str) -> Relationship {
    if s == "doesn't match" {
        Relationship::DoesntMatch
    } else {
        Relationship::Matches
    }
}

fn match_replace_match_type_str(m: models::MatchReplaceMatchType) -> &'static str {
    match m {
        models::MatchReplaceMatchType::Header => "header",
        models::MatchReplaceMatchType::Body => "body",
    }
}

fn parse_match_replace_match_type(s: &str) -> models::MatchReplaceMatchType {
    if s == "header" {
        models::MatchReplaceMatchType::Header
    } else {
        models::MatchReplaceMatchType::Body
    }
}

fn match_replace_target_str(t: models::MatchReplaceTarget) -> &'static str {
    match t {
        models::MatchReplaceTarget::Request => "request",
        models::MatchReplaceTarget::Response => "response",
    }
}

fn parse_match_replace_target(s: &str) -> models::MatchReplaceTarget {
    if s == "response" {
        models::MatchReplaceTarget::Response
    } else {
        models::MatchReplaceTarget::Request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(external_id: &str) -> RequestRecord {
        RequestRecord {
            id: 0,
            external_id: external_id.to_string(),
            url: "https://example.com/foo".into(),
            method: "GET".into(),
            domain: "example.com".into(),
            port: 443,
            path: "/foo".into(),
            query: "".into(),
            protocol_version: "HTTP/1.1".into(),
            request_headers: "{}".into(),
            request_body: "".into(),
            response_headers: Some("{}".into()),
            response_body: Some("ok".into()),
            status: Some(200),
            length: Some(2),
            mime_type: Some("text/plain".into()),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn inserts_and_reads_back_a_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        let id = store.insert_request(&sample_request("req-1")).unwrap();
        let fetched = store.get_request(id).unwrap();
        assert_eq!(fetched.domain, "example.com");
        assert_eq!(fetched.status, Some(200));
    }

    #[test]
    fn missing_request_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        let err = store.get_request(42).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn scope_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        let scope = ScopeList {
            in_scope: vec!["example\\.com".into()],
            out_scope: vec!["static\\.example\\.com".into()],
        };
        store.set_scope(&scope).unwrap();
        assert_eq!(store.get_scope().unwrap(), scope);
    }

    #[test]
    fn list_requests_paginates_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        for i in 0..5 {
            let mut rec = sample_request(&format!("req-{i}"));
            rec.timestamp = 1_700_000_000 + i;
            store.insert_request(&rec).unwrap();
        }
        let q = ListRequestsQuery {
            page: 0,
            limit: 2,
            sort_key: "timestamp".into(),
            sort_dir: models::SortDir::Desc,
            search: None,
        };
        let (page, total) = store.list_requests(&q).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);
        assert_eq!(page[0].external_id, "req-4");
    }

    #[test]
    fn list_requests_search_matches_domain_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        let mut rec = sample_request("req-api");
        rec.domain = "api.example.com".into();
        store.insert_request(&rec).unwrap();

        let q = ListRequestsQuery {
            page: 0,
            limit: 10,
            sort_key: "timestamp".into(),
            sort_dir: models::SortDir::Asc,
            search: Some("example.com".into()),
        };
        let (page, total) = store.list_requests(&q).unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].domain, "api.example.com");
    }

    #[test]
    fn rule_crud_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        let rule = InterceptRule {
            id: 0,
            name: "skip static".into(),
            operator: RuleOperator::And,
            match_type: MatchType::FileExtension,
            relationship: Relationship::Matches,
            pattern: "\\.(png|jpg)$".into(),
            enabled: true,
        };
        let id = store.insert_rule(&rule).unwrap();
        let mut updated = rule.clone();
        updated.id = id;
        updated.enabled = false;
        store.update_rule(&updated).unwrap();

        let rules = store.list_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].enabled);

        store.delete_rule(id).unwrap();
        assert!(store.list_rules().unwrap().is_empty());
    }
}
