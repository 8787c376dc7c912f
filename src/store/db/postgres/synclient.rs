use std::{future::Future, time::Duration};

use sqlx::{
    Database, Error, IntoArguments, PgPool, Postgres,
    postgres::{PgPoolOptions, PgRow},
};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    task::block_in_place,
};

/// Blocking facade over an async sqlx pool.
///
/// `NormalizedCache` is a synchronous interface, so every statement is driven to completion
/// on the runtime `handle`. When the caller is itself a runtime worker the wait happens
/// inside `block_in_place`, which needs the multi-thread scheduler; from a current-thread
/// runtime every statement fails with a configuration error instead.
#[derive(Debug, Clone)]
pub struct SynClient {
    pool: PgPool,

    handle: Handle,
}

impl SynClient {
    pub fn connect(
        db_url: &str,
        handle: Handle,
    ) -> Result<Self, Error> {
        let pool = block_on(&handle, async move {
            PgPoolOptions::new().acquire_timeout(Duration::from_secs(5)).max_connections(32).connect(db_url).await
        })?;

        Ok(Self {
            pool,
            handle,
        })
    }

    pub fn query<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<Vec<PgRow>, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.handle, async move {
            let mut conn = self.pool.acquire().await?;

            sqlx::query_with(sql, params).fetch_all(&mut *conn).await
        })
    }

    pub fn execute<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<<Postgres as Database>::QueryResult, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.handle, async move {
            let mut conn = self.pool.acquire().await?;

            sqlx::query_with(sql, params).execute(&mut *conn).await
        })
    }

    pub fn batch_execute(
        &self,
        sqls: &[String],
    ) -> Result<(), Error> {
        block_on(&self.handle, async move {
            let mut tx = self.pool.begin().await?;

            for sql in sqls {
                sqlx::query(sql).execute(&mut *tx).await?;
            }
            tx.commit().await
        })
    }
}

fn block_on<T, F: Future<Output = Result<T, Error>>>(
    handle: &Handle,
    future: F,
) -> Result<T, Error> {
    match Handle::try_current() {
        Ok(current) if current.runtime_flavor() != RuntimeFlavor::MultiThread => {
            Err(Error::Configuration("postgres store cannot block inside a current-thread runtime".into()))
        }
        Ok(_) => block_in_place(|| handle.block_on(future)),
        Err(_) => handle.block_on(future),
    }
}
