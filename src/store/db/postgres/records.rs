use std::{collections::HashSet, sync::Arc};

use indexmap::IndexMap;
use sea_query::{ColumnDef, Expr as SeaExpr, Iden, OnConflict, Order as SeaOrder, PostgresQueryBuilder, Query as SeaQuery, Table};
use sea_query_binder::SqlxBinder;
use sqlx::{Row, postgres::PgRow};
use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::{
    Result,
    model::{Record, qualified_key},
    store::{CacheHeaders, NormalizedCache, map_db_err},
};

use super::synclient::SynClient;

/// Records persisted in a PostgreSQL table, one JSON document per record key.
///
/// Storage failures are logged and reported as misses so a call can still fall back to the
/// network.
pub struct SqlCache {
    conn: Arc<SynClient>,
}

#[derive(Iden)]
#[iden = "records"]
enum RecordIden {
    Table,

    Key,
    Record,
}

impl SqlCache {
    /// Connects and creates the `records` table when missing.
    pub fn connect(
        db_url: &str,
        handle: Handle,
    ) -> Result<Self> {
        let conn = SynClient::connect(db_url, handle).map_err(map_db_err)?;
        let cache = Self {
            conn: Arc::new(conn),
        };
        cache.init()?;
        Ok(cache)
    }

    fn init(&self) -> Result<()> {
        let sql = [Table::create()
            .table(RecordIden::Table)
            .if_not_exists()
            .col(ColumnDef::new(RecordIden::Key).string().not_null().primary_key())
            .col(ColumnDef::new(RecordIden::Record).text().not_null())
            .build(PostgresQueryBuilder)];

        self.conn.batch_execute(&sql).map_err(map_db_err)
    }

    fn find(
        &self,
        key: &str,
    ) -> Result<Option<Record>> {
        let (sql, values) = SeaQuery::select()
            .from(RecordIden::Table)
            .column(RecordIden::Record)
            .and_where(SeaExpr::col(RecordIden::Key).eq(key))
            .build_sqlx(PostgresQueryBuilder);

        let rows = self.conn.query(&sql, values).map_err(map_db_err)?;
        rows.first().map(decode).transpose()
    }

    fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        let (sql, values) =
            SeaQuery::delete().from_table(RecordIden::Table).and_where(SeaExpr::col(RecordIden::Key).eq(key)).build_sqlx(PostgresQueryBuilder);

        let result = self.conn.execute(sql.as_str(), values).map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    fn upsert(
        &self,
        record: Record,
    ) -> Result<HashSet<String>> {
        let (merged, changed) = match self.find(record.key())? {
            Some(mut existing) => {
                let changed: HashSet<String> = existing.merge_with(&record).iter().map(|field| qualified_key(record.key(), field)).collect();
                if changed.is_empty() && existing.mutation_id() == record.mutation_id() {
                    return Ok(changed);
                }
                (existing, changed)
            }
            None => {
                let changed = record.keys();
                (record, changed)
            }
        };

        let text = serde_json::to_string(&merged)?;
        let (sql, values) = SeaQuery::insert()
            .into_table(RecordIden::Table)
            .columns([RecordIden::Key, RecordIden::Record])
            .values([merged.key().into(), text.into()])
            .map_err(map_db_err)?
            .on_conflict(OnConflict::column(RecordIden::Key).update_column(RecordIden::Record).to_owned())
            .build_sqlx(PostgresQueryBuilder);

        self.conn.execute(sql.as_str(), values).map_err(map_db_err)?;
        Ok(changed)
    }

    fn remove_cascading(
        &self,
        key: &str,
        cascade: bool,
    ) -> Result<bool> {
        let mut references: Vec<String> = Vec::new();
        if cascade {
            if let Some(record) = self.find(key)? {
                references.extend(record.references().iter().map(|r| r.key().to_string()));
            }
        }
        let removed = self.delete(key)?;
        if removed {
            for reference in references {
                self.delete(&reference)?;
            }
        }
        Ok(removed)
    }

    fn all(&self) -> Result<IndexMap<String, Record>> {
        let (sql, values) =
            SeaQuery::select().from(RecordIden::Table).column(RecordIden::Record).order_by(RecordIden::Key, SeaOrder::Asc).build_sqlx(PostgresQueryBuilder);

        let rows = self.conn.query(&sql, values).map_err(map_db_err)?;
        rows.iter().map(decode).map(|record| record.map(|r| (r.key().to_string(), r))).collect()
    }
}

fn decode(row: &PgRow) -> Result<Record> {
    let text: String = row.try_get("record").map_err(map_db_err)?;
    Ok(serde_json::from_str(&text)?)
}

impl NormalizedCache for SqlCache {
    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Option<Record> {
        trace!("sql::load_record({})", key);
        let record = match self.find(key) {
            Ok(record) => record,
            Err(err) => {
                warn!("sql::load_record({}) treated as miss: {}", key, err);
                return None;
            }
        };
        if record.is_some() && headers.has_header(CacheHeaders::EVICT_AFTER_READ) {
            if let Err(err) = self.delete(key) {
                warn!("sql::load_record({}) evict after read failed: {}", key, err);
            }
        }
        record
    }

    fn merge(
        &self,
        record: Record,
        _headers: &CacheHeaders,
    ) -> HashSet<String> {
        let key = record.key().to_string();
        self.upsert(record).unwrap_or_else(|err| {
            warn!("sql::merge({}) dropped: {}", key, err);
            HashSet::new()
        })
    }

    fn remove(
        &self,
        key: &str,
        cascade: bool,
    ) -> bool {
        self.remove_cascading(key, cascade).unwrap_or_else(|err| {
            warn!("sql::remove({}) failed: {}", key, err);
            false
        })
    }

    fn clear_all(&self) {
        let (sql, values) = SeaQuery::delete().from_table(RecordIden::Table).build_sqlx(PostgresQueryBuilder);
        if let Err(err) = self.conn.execute(sql.as_str(), values) {
            warn!("sql::clear_all failed: {}", err);
        }
    }

    fn dump(&self) -> IndexMap<String, Record> {
        self.all().unwrap_or_else(|err| {
            warn!("sql::dump failed: {}", err);
            IndexMap::new()
        })
    }
}
