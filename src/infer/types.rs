use std::fmt;

use serde::{Deserialize, Serialize};

/// One result column as reported by RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeField {
    pub name: String,
    pub table_oid: u32,
    /// Zero (or negative for system columns) when the column is not a plain table column.
    pub column_attr_number: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format_code: i16,
}

impl TypeField {
    pub fn attribute_id(&self) -> AttributeId {
        AttributeId {
            table_oid: self.table_oid,
            column_attr_number: self.column_attr_number,
        }
    }

    /// Whether the column maps back to a table attribute, system columns
    /// (`ctid`, `xmin`, negative attribute numbers) included.
    pub fn is_table_column(&self) -> bool {
        self.table_oid != 0 && self.column_attr_number != 0
    }

    /// Whether the column maps back to a user-declared table attribute.
    pub fn is_user_column(&self) -> bool {
        self.table_oid != 0 && self.column_attr_number > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub oid: u32,
}

/// Raw result of a Describe probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Describe {
    pub params: Vec<ParamDescriptor>,
    pub fields: Vec<TypeField>,
}

impl Describe {
    /// Parameter OIDs followed by column type OIDs, in order, duplicates kept.
    pub fn used_oids(&self) -> Vec<u32> {
        self.params
            .iter()
            .map(|p| p.oid)
            .chain(self.fields.iter().map(|f| f.type_oid))
            .collect()
    }
}

/// One row of the type catalog query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRow {
    pub oid: u32,
    pub type_name: String,
    /// `typtype`: `b`ase, `c`omposite, `d`omain, `e`num, `p`seudo, `r`ange, `m`ultirange.
    pub type_kind: char,
    pub enum_label: Option<String>,
    pub type_category: Option<char>,
    pub element_type_oid: Option<u32>,
}

/// Semantic type of a parameter or column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MappableType {
    Scalar {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    Enum {
        name: String,
        enum_values: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Array {
        name: String,
        element_type: Box<MappableType>,
    },
}

impl MappableType {
    pub fn name(&self) -> &str {
        match self {
            MappableType::Scalar { name }
            | MappableType::Enum { name, .. }
            | MappableType::Array { name, .. } => name,
        }
    }
}

/// Catalog key of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId {
    pub table_oid: u32,
    pub column_attr_number: i16,
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_oid, self.column_attr_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnComment {
    pub table_oid: u32,
    pub column_attr_number: i16,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAttribute {
    pub column_name: String,
    pub nullable: bool,
}

/// The server rejected the statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseError {
    /// SQLSTATE, e.g. `42601`.
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub message: String,
    /// 1-based character offset into the query text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.error_code)?;
        if let Some(position) = &self.position {
            write!(f, " at position {}", position)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "; hint: {}", hint)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamMetadata<M> {
    pub params: Vec<MappableType>,
    /// Passed through untouched from the caller.
    pub mapping: M,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnType {
    pub return_name: String,
    /// `None` for expression columns with no table attribute behind them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(rename = "type")]
    pub ty: MappableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Inferred parameter and result types of one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTypes<M> {
    pub param_metadata: ParamMetadata<M>,
    pub return_types: Vec<ReturnType>,
}
