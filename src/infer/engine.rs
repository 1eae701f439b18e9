use std::collections::HashMap;

use tracing::{debug, info};

use super::catalog::{resolve_attributes, resolve_comments, resolve_types};
use super::error::InferError;
use super::probe::probe;
use super::types::{MappableType, ParamMetadata, QueryTypes, ReturnType};
use crate::db::Session;

/// Infers parameter and result types of one query.
///
/// `mapping` is opaque to inference and comes back unchanged in the report.
/// The probe and the catalog queries run one after another on `session`.
pub async fn infer<S, M>(query: &str, mapping: M, session: &mut S) -> Result<QueryTypes<M>, InferError>
where
    S: Session + ?Sized,
{
    let describe = probe(query, session).await?;

    let types = resolve_types(&describe.used_oids(), session).await?;
    let comments = resolve_comments(&describe.fields, session).await?;
    let attributes = resolve_attributes(&describe.fields, session).await?;

    let return_types = describe
        .fields
        .iter()
        .map(|field| {
            let id = field.attribute_id();
            let attribute = attributes.get(&id);
            Ok(ReturnType {
                return_name: field.name.clone(),
                column_name: attribute.map(|a| a.column_name.clone()),
                ty: lookup(&types, field.type_oid)?,
                nullable: attribute.map(|a| a.nullable),
                comment: comments.get(&id).map(|c| c.comment.clone()),
            })
        })
        .collect::<Result<Vec<_>, InferError>>()?;

    let params = describe
        .params
        .iter()
        .map(|param| lookup(&types, param.oid))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        params = params.len(),
        columns = return_types.len(),
        "query inferred"
    );
    Ok(QueryTypes {
        param_metadata: ParamMetadata { params, mapping },
        return_types,
    })
}

fn lookup(types: &HashMap<u32, MappableType>, oid: u32) -> Result<MappableType, InferError> {
    types
        .get(&oid)
        .cloned()
        .ok_or(InferError::MissingType { oid })
}

/// Infers a batch of queries sequentially on one session.
///
/// Each query gets its own result; a rejected statement or a missing type only
/// fails that query. A session or wire failure ends the batch and is returned
/// as the outer error.
pub async fn infer_all<S, M>(
    queries: Vec<(String, M)>,
    session: &mut S,
) -> Result<Vec<Result<QueryTypes<M>, InferError>>, InferError>
where
    S: Session + ?Sized,
{
    let mut results = Vec::with_capacity(queries.len());
    for (query, mapping) in queries {
        match infer(&query, mapping, session).await {
            Err(err) if err.is_fatal() => return Err(err),
            result => {
                if let Err(err) = &result {
                    info!("could not infer {:?}: {}", query, err);
                }
                results.push(result);
            }
        }
    }
    Ok(results)
}
