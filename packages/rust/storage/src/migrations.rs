//! SQL migration definitions for the docforge database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: document_sets, assets, chunks, variables, placeholders, runs, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Document sets (one generation job's templates/references/outputs)
CREATE TABLE IF NOT EXISTS document_sets (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    package_code    TEXT NOT NULL,
    package_version TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

-- Assets: templates, references, customer uploads, generated outputs
CREATE TABLE IF NOT EXISTS assets (
    id              TEXT PRIMARY KEY,
    set_id          TEXT NOT NULL REFERENCES document_sets(id) ON DELETE CASCADE,
    rel_path        TEXT NOT NULL,
    role            TEXT NOT NULL,
    origin          TEXT NOT NULL,
    local_path      TEXT NOT NULL,
    mime            TEXT NOT NULL,
    file_ext        TEXT NOT NULL,
    sha256          TEXT NOT NULL,
    source_asset_id TEXT,
    UNIQUE(set_id, rel_path, sha256)
);

CREATE INDEX IF NOT EXISTS idx_assets_set ON assets(set_id);
CREATE INDEX IF NOT EXISTS idx_assets_set_role ON assets(set_id, role);

-- Content-addressed text chunks; embeddings stored as JSON arrays
CREATE TABLE IF NOT EXISTS chunks (
    id             TEXT PRIMARY KEY,
    asset_id       TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    chunk_index    INTEGER NOT NULL,
    text           TEXT NOT NULL,
    token_estimate INTEGER NOT NULL,
    metadata_json  TEXT NOT NULL,
    embedding_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_chunks_asset ON chunks(asset_id);

-- Declared variables per package/version
CREATE TABLE IF NOT EXISTS variable_keys (
    package_code      TEXT NOT NULL,
    package_version   TEXT NOT NULL,
    token             TEXT NOT NULL,
    value_type        TEXT NOT NULL,
    required          INTEGER NOT NULL,
    description       TEXT NOT NULL,
    default_value     TEXT,
    generation_policy TEXT NOT NULL,
    PRIMARY KEY(package_code, package_version, token)
);

-- Resolved values, one per (set, token)
CREATE TABLE IF NOT EXISTS variable_values (
    set_id          TEXT NOT NULL REFERENCES document_sets(id) ON DELETE CASCADE,
    token           TEXT NOT NULL,
    value           TEXT NOT NULL,
    source          TEXT NOT NULL,
    confidence      REAL,
    provenance_json TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY(set_id, token)
);

-- Placeholder snapshot per template asset (fully replaced on re-index)
CREATE TABLE IF NOT EXISTS template_placeholders (
    id          TEXT PRIMARY KEY,
    asset_id    TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    token       TEXT NOT NULL,
    occurrences INTEGER NOT NULL,
    status      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_placeholders_asset ON template_placeholders(asset_id);

-- Pipeline run history
CREATE TABLE IF NOT EXISTS runs (
    id             TEXT PRIMARY KEY,
    set_id         TEXT NOT NULL REFERENCES document_sets(id) ON DELETE CASCADE,
    kind           TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    started_at     TEXT,
    finished_at    TEXT,
    metrics_json   TEXT,
    prompt_version TEXT,
    model          TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_set ON runs(set_id);

-- Structured progress events per run
CREATE TABLE IF NOT EXISTS run_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id       TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    level        TEXT NOT NULL,
    message      TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_run_events_run ON run_events(run_id);

-- Full-text search over chunk text
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    content=chunks,
    content_rowid=rowid
);

-- Triggers to keep FTS in sync with the chunks table
CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, text)
    VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text)
    VALUES ('delete', old.rowid, old.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE OF text ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text)
    VALUES ('delete', old.rowid, old.text);
    INSERT INTO chunks_fts(rowid, text)
    VALUES (new.rowid, new.text);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
