//! Folding system catalog rows into semantic types and column metadata.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::error::InferError;
use super::types::{AttributeId, ColumnAttribute, ColumnComment, MappableType, TypeField, TypeRow};
use crate::db::{CatalogParam, CatalogQuery, CatalogRow};

/// Types by OID, plus the element types of any arrays among them. One row per
/// enum label, in declaration order.
const TYPES_SQL: &str = r#"
SELECT
    pt.oid::text,
    pt.typname::text,
    pt.typtype::text,
    pe.enumlabel::text,
    pt.typelem::text,
    pt.typcategory::text
FROM pg_type pt
LEFT JOIN pg_enum pe ON pt.oid = pe.enumtypid
WHERE pt.oid = ANY($1::oid[])
   OR pt.oid IN (SELECT typelem FROM pg_type WHERE oid = ANY($1::oid[]))
ORDER BY pt.oid, pe.enumsortorder
"#;

const COMMENTS_SQL: &str = r#"
SELECT
    d.objoid::text,
    d.objsubid::text,
    d.description::text
FROM pg_description d
JOIN unnest($1::oid[], $2::int4[]) AS c(table_oid, attnum)
  ON d.objoid = c.table_oid AND d.objsubid = c.attnum
WHERE d.classoid = 'pg_class'::regclass
"#;

const ATTRIBUTES_SQL: &str = r#"
SELECT
    a.attrelid::text,
    a.attnum::text,
    a.attname::text,
    CASE WHEN a.attnotnull THEN 't' ELSE 'f' END
FROM pg_attribute a
JOIN unnest($1::oid[], $2::int4[]) AS c(table_oid, attnum)
  ON a.attrelid = c.table_oid AND a.attnum = c.attnum
"#;

/// Resolves every OID in `oids` (duplicates allowed) in a single query.
pub async fn resolve_types<Q>(
    oids: &[u32],
    session: &mut Q,
) -> Result<HashMap<u32, MappableType>, InferError>
where
    Q: CatalogQuery + ?Sized,
{
    if oids.is_empty() {
        return Ok(HashMap::new());
    }
    let unique: BTreeSet<u32> = oids.iter().copied().collect();
    let params = [CatalogParam::OidArray(unique.into_iter().collect())];
    let rows = session.query(TYPES_SQL, &params).await?;
    debug!(?rows, "type catalog rows");

    let rows = rows
        .iter()
        .map(type_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(reduce_type_rows(&rows))
}

/// Two passes: collect enum labels per OID, then classify every row.
///
/// An array-category row whose element is one of the enums becomes an
/// [`MappableType::Array`] even if it carries the enum kind itself.
pub fn reduce_type_rows(rows: &[TypeRow]) -> HashMap<u32, MappableType> {
    let mut enums: HashMap<u32, MappableType> = HashMap::new();
    for row in rows.iter().filter(|row| row.type_kind == 'e') {
        let entry = enums.entry(row.oid).or_insert_with(|| MappableType::Enum {
            name: row.type_name.clone(),
            enum_values: Vec::new(),
        });
        if let (MappableType::Enum { enum_values, .. }, Some(label)) = (entry, &row.enum_label) {
            enum_values.push(label.clone());
        }
    }

    let mut types = HashMap::new();
    for row in rows {
        if types.contains_key(&row.oid) {
            continue;
        }
        let element = row
            .element_type_oid
            .filter(|_| row.type_category == Some('A'))
            .and_then(|oid| enums.get(&oid));
        let ty = match (element, enums.get(&row.oid)) {
            (Some(element), _) => MappableType::Array {
                name: row.type_name.clone(),
                element_type: Box::new(element.clone()),
            },
            (None, Some(enum_type)) => enum_type.clone(),
            (None, None) => MappableType::Scalar {
                name: row.type_name.clone(),
            },
        };
        types.insert(row.oid, ty);
    }
    types
}

/// Comments on the user columns behind `fields`. Expression and system
/// columns have none.
pub async fn resolve_comments<Q>(
    fields: &[TypeField],
    session: &mut Q,
) -> Result<HashMap<AttributeId, ColumnComment>, InferError>
where
    Q: CatalogQuery + ?Sized,
{
    let Some(params) = attribute_params(fields, TypeField::is_user_column) else {
        return Ok(HashMap::new());
    };
    let rows = session.query(COMMENTS_SQL, &params).await?;
    debug!(?rows, "column comments");

    rows.iter()
        .map(|row| -> Result<_, InferError> {
            let comment = ColumnComment {
                table_oid: parse_column(row, 0, "objoid")?,
                column_attr_number: parse_column(row, 1, "objsubid")?,
                comment: text_column(row, 2, "description")?.to_string(),
            };
            let id = AttributeId {
                table_oid: comment.table_oid,
                column_attr_number: comment.column_attr_number,
            };
            Ok((id, comment))
        })
        .collect()
}

/// Names and nullability of the table columns behind `fields`, system
/// columns included.
pub async fn resolve_attributes<Q>(
    fields: &[TypeField],
    session: &mut Q,
) -> Result<HashMap<AttributeId, ColumnAttribute>, InferError>
where
    Q: CatalogQuery + ?Sized,
{
    let Some(params) = attribute_params(fields, TypeField::is_table_column) else {
        return Ok(HashMap::new());
    };
    let rows = session.query(ATTRIBUTES_SQL, &params).await?;
    debug!(?rows, "column attributes");

    rows.iter()
        .map(|row| -> Result<_, InferError> {
            let id = AttributeId {
                table_oid: parse_column(row, 0, "attrelid")?,
                column_attr_number: parse_column(row, 1, "attnum")?,
            };
            let attribute = ColumnAttribute {
                column_name: text_column(row, 2, "attname")?.to_string(),
                nullable: text_column(row, 3, "attnotnull")? != "t",
            };
            Ok((id, attribute))
        })
        .collect()
}

/// `(table oids, attribute numbers)` of the distinct columns selected by
/// `include`, or `None` when there are none to look up.
fn attribute_params(
    fields: &[TypeField],
    include: fn(&TypeField) -> bool,
) -> Option<[CatalogParam; 2]> {
    let ids: BTreeSet<AttributeId> = fields
        .iter()
        .filter(|field| include(field))
        .map(TypeField::attribute_id)
        .collect();
    if ids.is_empty() {
        return None;
    }
    Some([
        CatalogParam::OidArray(ids.iter().map(|id| id.table_oid).collect()),
        CatalogParam::Int4Array(ids.iter().map(|id| i32::from(id.column_attr_number)).collect()),
    ])
}

fn type_row(row: &CatalogRow) -> Result<TypeRow, InferError> {
    Ok(TypeRow {
        oid: parse_column(row, 0, "oid")?,
        type_name: text_column(row, 1, "typname")?.to_string(),
        type_kind: char_column(row, 2, "typtype")?,
        enum_label: row.get(3).cloned().flatten(),
        element_type_oid: match row.get(4).and_then(Option::as_deref) {
            None | Some("0") => None,
            Some(_) => Some(parse_column(row, 4, "typelem")?),
        },
        type_category: row
            .get(5)
            .and_then(Option::as_deref)
            .and_then(|s| s.chars().next()),
    })
}

fn text_column<'r>(row: &'r CatalogRow, index: usize, name: &str) -> Result<&'r str, InferError> {
    row.get(index)
        .and_then(Option::as_deref)
        .ok_or_else(|| InferError::Catalog(format!("{} is missing or NULL", name)))
}

fn char_column(row: &CatalogRow, index: usize, name: &str) -> Result<char, InferError> {
    text_column(row, index, name)?
        .chars()
        .next()
        .ok_or_else(|| InferError::Catalog(format!("{} is empty", name)))
}

fn parse_column<T: std::str::FromStr>(
    row: &CatalogRow,
    index: usize,
    name: &str,
) -> Result<T, InferError> {
    let text = text_column(row, index, name)?;
    text.parse()
        .map_err(|_| InferError::Catalog(format!("{} is not a number: {:?}", name, text)))
}
