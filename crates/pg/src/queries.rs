//! SQL templates for the outbox store.
//!
//! The store owns no SQL of its own: every statement comes from an
//! [`OutboxQueries`] value, a dialect object holding templates with two
//! slots — `{0}` for the table name and `{1}` for a generated clause (an
//! `IN (…)` list or a multi-row `VALUES` tuple). Binds are positional `$n`.

/// Columns of the outbox table, in bind order. `DispatchedAt` is omitted on
/// insert; new rows are outstanding by definition.
pub const INSERT_COLUMNS: usize = 10;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {0} (
    "MessageId"     UUID PRIMARY KEY,
    "MessageType"   VARCHAR(32) NOT NULL,
    "Topic"         VARCHAR(255) NOT NULL,
    "Timestamp"     TIMESTAMPTZ NOT NULL,
    "CorrelationId" UUID,
    "ReplyTo"       VARCHAR(255),
    "ContentType"   VARCHAR(128) NOT NULL,
    "PartitionKey"  VARCHAR(255),
    "HeaderBag"     JSONB NOT NULL,
    "Body"          TEXT NOT NULL,
    "DispatchedAt"  TIMESTAMPTZ
)
"#;

const CREATE_SWEEP_INDEX: &str =
    r#"CREATE INDEX IF NOT EXISTS idx_{0}_sweep ON {0} ("DispatchedAt", "Timestamp")"#;

const INSERT: &str = r#"INSERT INTO {0} ("MessageId", "MessageType", "Topic", "Timestamp", "CorrelationId", "ReplyTo", "ContentType", "PartitionKey", "HeaderBag", "Body") VALUES {1} ON CONFLICT ("MessageId") DO NOTHING"#;

const SELECT_ONE: &str = r#"SELECT "MessageId", "MessageType", "Topic", "Timestamp", "CorrelationId", "ReplyTo", "ContentType", "PartitionKey", "HeaderBag", "Body", "DispatchedAt" FROM {0} WHERE "MessageId" = $1"#;

const SELECT_MANY: &str = r#"SELECT "MessageId", "MessageType", "Topic", "Timestamp", "CorrelationId", "ReplyTo", "ContentType", "PartitionKey", "HeaderBag", "Body", "DispatchedAt" FROM {0} WHERE "MessageId" IN ({1})"#;

const SELECT_PAGE: &str = r#"SELECT "MessageId", "MessageType", "Topic", "Timestamp", "CorrelationId", "ReplyTo", "ContentType", "PartitionKey", "HeaderBag", "Body", "DispatchedAt" FROM {0} ORDER BY "Timestamp" ASC, "MessageId" ASC LIMIT $1 OFFSET $2"#;

const SELECT_OUTSTANDING: &str = r#"SELECT "MessageId", "MessageType", "Topic", "Timestamp", "CorrelationId", "ReplyTo", "ContentType", "PartitionKey", "HeaderBag", "Body", "DispatchedAt" FROM {0} WHERE "DispatchedAt" IS NULL AND "Timestamp" <= $1 ORDER BY "Timestamp" ASC, "MessageId" ASC LIMIT $2 OFFSET $3 FOR UPDATE SKIP LOCKED"#;

const SELECT_DISPATCHED: &str = r#"SELECT "MessageId", "MessageType", "Topic", "Timestamp", "CorrelationId", "ReplyTo", "ContentType", "PartitionKey", "HeaderBag", "Body", "DispatchedAt" FROM {0} WHERE "DispatchedAt" IS NOT NULL AND "DispatchedAt" >= $1 ORDER BY "Timestamp" ASC, "MessageId" ASC LIMIT $2 OFFSET $3"#;

const MARK_DISPATCHED: &str = r#"UPDATE {0} SET "DispatchedAt" = $1 WHERE "MessageId" IN ({1})"#;

const DELETE: &str = r#"DELETE FROM {0} WHERE "MessageId" IN ({1})"#;

const COUNT_OUTSTANDING: &str = r#"SELECT COUNT(*) FROM {0} WHERE "DispatchedAt" IS NULL"#;

const DELETE_DISPATCHED: &str =
    r#"DELETE FROM {0} WHERE "DispatchedAt" IS NOT NULL AND "DispatchedAt" < $1"#;

/// Postgres dialect for the outbox table.
#[derive(Debug, Clone)]
pub struct OutboxQueries {
    table: String,
}

impl OutboxQueries {
    pub fn postgres(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn fill(&self, template: &str, clause: &str) -> String {
        template
            .replace("{0}", &self.table)
            .replace("{1}", clause)
    }

    /// `$start+1, …, $start+len` for an `IN (…)` clause.
    fn in_list(start: usize, len: usize) -> String {
        (1..=len)
            .map(|i| format!("${}", start + i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `($1, …, $c), ($c+1, …)` for a multi-row insert.
    fn values_rows(rows: usize, columns: usize) -> String {
        (0..rows)
            .map(|row| format!("({})", Self::in_list(row * columns, columns)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_table(&self) -> String {
        self.fill(CREATE_TABLE, "")
    }

    pub fn create_sweep_index(&self) -> String {
        self.fill(CREATE_SWEEP_INDEX, "")
    }

    pub fn insert(&self, rows: usize) -> String {
        self.fill(INSERT, &Self::values_rows(rows, INSERT_COLUMNS))
    }

    pub fn select_one(&self) -> String {
        self.fill(SELECT_ONE, "")
    }

    pub fn select_many(&self, ids: usize) -> String {
        self.fill(SELECT_MANY, &Self::in_list(0, ids))
    }

    pub fn select_page(&self) -> String {
        self.fill(SELECT_PAGE, "")
    }

    pub fn select_outstanding(&self) -> String {
        self.fill(SELECT_OUTSTANDING, "")
    }

    pub fn select_dispatched(&self) -> String {
        self.fill(SELECT_DISPATCHED, "")
    }

    /// `$1` is the dispatch timestamp; ids start at `$2`.
    pub fn mark_dispatched(&self, ids: usize) -> String {
        self.fill(MARK_DISPATCHED, &Self::in_list(1, ids))
    }

    pub fn delete(&self, ids: usize) -> String {
        self.fill(DELETE, &Self::in_list(0, ids))
    }

    pub fn count_outstanding(&self) -> String {
        self.fill(COUNT_OUTSTANDING, "")
    }

    pub fn delete_dispatched(&self) -> String {
        self.fill(DELETE_DISPATCHED, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queries() -> OutboxQueries {
        OutboxQueries::postgres("outbox_messages")
    }

    #[test]
    fn in_lists_are_positional_from_the_start_offset() {
        assert_eq!(OutboxQueries::in_list(0, 3), "$1, $2, $3");
        assert_eq!(OutboxQueries::in_list(1, 2), "$2, $3");
    }

    #[test]
    fn insert_generates_one_tuple_per_row() {
        let sql = queries().insert(2);
        assert!(sql.starts_with(r#"INSERT INTO outbox_messages ("MessageId""#));
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9, $10), ($11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"));
        assert!(sql.ends_with(r#"ON CONFLICT ("MessageId") DO NOTHING"#));
    }

    #[test]
    fn mark_dispatched_reserves_the_first_bind_for_the_timestamp() {
        let sql = queries().mark_dispatched(3);
        assert_eq!(
            sql,
            r#"UPDATE outbox_messages SET "DispatchedAt" = $1 WHERE "MessageId" IN ($2, $3, $4)"#
        );
    }

    #[test]
    fn outstanding_select_skips_locked_rows() {
        let sql = queries().select_outstanding();
        assert!(sql.contains(r#""DispatchedAt" IS NULL"#));
        assert!(sql.contains(r#""Timestamp" <= $1"#));
        assert!(sql.ends_with("FOR UPDATE SKIP LOCKED"));
    }

    #[test]
    fn page_order_is_timestamp_then_id() {
        let sql = queries().select_page();
        assert!(sql.contains(r#"ORDER BY "Timestamp" ASC, "MessageId" ASC"#));
    }

    #[test]
    fn table_name_fills_every_slot() {
        let sql = OutboxQueries::postgres("custom_outbox").create_sweep_index();
        assert_eq!(
            sql,
            r#"CREATE INDEX IF NOT EXISTS idx_custom_outbox_sweep ON custom_outbox ("DispatchedAt", "Timestamp")"#
        );
    }
}
