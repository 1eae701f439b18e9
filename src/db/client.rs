use std::error::Error;

use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::Client;

use super::error::SessionError;
use super::session::{CatalogParam, CatalogQuery, CatalogRow};

impl ToSql for CatalogParam {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            CatalogParam::OidArray(items) if <Vec<u32> as ToSql>::accepts(ty) => {
                items.to_sql(ty, out)
            }
            CatalogParam::Int4Array(items) if <Vec<i32> as ToSql>::accepts(ty) => {
                items.to_sql(ty, out)
            }
            other => Err(format!("cannot bind {:?} as {}", other, ty).into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <Vec<u32> as ToSql>::accepts(ty) || <Vec<i32> as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// Collects `len` text columns, keeping SQL NULLs as `None`.
fn text_row<E>(
    len: usize,
    get: impl FnMut(usize) -> Result<Option<String>, E>,
) -> Result<CatalogRow, E> {
    (0..len).map(get).collect()
}

/// Catalog queries through an existing `tokio_postgres` connection.
///
/// Nothing inside the crate routes through this impl; it serves library
/// callers that already hold a client. Describe probes still need a
/// [`super::WireSession`].
impl CatalogQuery for Client {
    async fn query(
        &mut self,
        sql: &str,
        params: &[CatalogParam],
    ) -> Result<Vec<CatalogRow>, SessionError> {
        let values: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = Client::query(self, sql, &values).await?;

        rows.iter()
            .map(|row| {
                text_row(row.len(), |i| row.try_get::<_, Option<String>>(i))
                    .map_err(SessionError::from)
            })
            .collect()
    }
}
