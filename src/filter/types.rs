use serde_json::Value;

/// How a list filter compares a query-string value with a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `"col" = $n`
    Eq,
    /// `lower("col") = lower($n)`
    IEq,
    /// `"col"` references `table.id`; matches rows whose referenced `name` equals `$n`
    NameOf { table: &'static str },
    /// `"col"` (usually `id`) is listed in an owners join table for the user with email `$n`
    OwnedBy(OwnerTable),
}

/// Join table linking a resource to the users that own it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerTable {
    pub table: &'static str,
    /// Column in `table` holding the owned resource's id
    pub column: &'static str,
}

/// A query-string parameter accepted by a list endpoint
#[derive(Debug, Clone, Copy)]
pub struct ListFilter {
    pub param: &'static str,
    pub column: &'static str,
    pub op: FilterOp,
}

impl ListFilter {
    pub const fn exact(param: &'static str, column: &'static str) -> Self {
        Self { param, column, op: FilterOp::Eq }
    }

    pub const fn iexact(param: &'static str, column: &'static str) -> Self {
        Self { param, column, op: FilterOp::IEq }
    }

    pub const fn name_of(param: &'static str, column: &'static str, table: &'static str) -> Self {
        Self { param, column, op: FilterOp::NameOf { table } }
    }
}

#[derive(Debug, Clone)]
pub struct FilterWhereInfo {
    pub column: String,
    pub operator: FilterOp,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}
