use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{FilterOp, FilterOrderInfo, ListFilter, OwnerTable, SortDirection, SqlResult};
use super::validate_identifier;

/// SELECT builder for list endpoints
pub struct Filter {
    table_name: String,
    where_data: FilterWhere,
    order_data: Vec<FilterOrderInfo>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        validate_identifier(&table_name).map_err(FilterError::InvalidTableName)?;
        Ok(Self {
            table_name,
            where_data: FilterWhere::new(0),
            order_data: vec![],
        })
    }

    /// Apply every filter whose parameter appears in `params`; other parameters are ignored
    pub fn list_filters(
        &mut self,
        filters: &[ListFilter],
        params: &HashMap<String, String>,
    ) -> Result<&mut Self, FilterError> {
        for filter in filters {
            if let Some(value) = params.get(filter.param) {
                self.where_data.push(filter.column, filter.op, Value::String(value.clone()))?;
            }
        }
        Ok(self)
    }

    /// Restrict rows to those owned by the user with `email`
    pub fn owned_by(&mut self, owners: OwnerTable, email: &str) -> Result<&mut Self, FilterError> {
        self.where_data.push("id", FilterOp::OwnedBy(owners), Value::String(email.to_string()))?;
        Ok(self)
    }

    pub fn where_eq(&mut self, column: &str, value: Value) -> Result<&mut Self, FilterError> {
        self.where_data.push(column, FilterOp::Eq, value)?;
        Ok(self)
    }

    pub fn order(&mut self, column: &str, sort: SortDirection) -> &mut Self {
        self.order_data.push(FilterOrderInfo { column: column.to_string(), sort });
        self
    }

    pub fn to_sql(&mut self) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = self.where_data.generate()?;
        let order_clause = FilterOrder::generate(&self.order_data)?;

        let query = [
            "SELECT *".to_string(),
            format!("FROM \"{}\"", self.table_name),
            format!("WHERE {}", where_clause),
            order_clause,
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        Ok(SqlResult { query, params })
    }

    pub fn to_count_sql(&mut self) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = self.where_data.generate()?;
        Ok(SqlResult {
            query: format!("SELECT COUNT(*) AS count FROM \"{}\" WHERE {}", self.table_name, where_clause),
            params,
        })
    }

    /// Fail with the offending names when `params` contains keys outside `allowed`
    pub fn reject_unrecognised(params: &HashMap<String, String>, allowed: &[&str]) -> Result<(), FilterError> {
        let unrecognised: BTreeSet<&str> = params
            .keys()
            .map(String::as_str)
            .filter(|k| !allowed.contains(k))
            .collect();
        if unrecognised.is_empty() {
            return Ok(());
        }
        let names = unrecognised.iter().map(|k| format!("'{}'", k)).collect::<Vec<_>>().join(", ");
        Err(FilterError::UnrecognisedParameters(names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn builds_filtered_ordered_select() {
        let filters = [
            ListFilter::name_of("data-group", "data_group_id", "data_groups"),
            ListFilter::name_of("data-type", "data_type_id", "data_types"),
        ];
        let mut f = Filter::new("data_sets").unwrap();
        f.list_filters(&filters, &params(&[("data-type", "visitors")])).unwrap();
        f.order("id", SortDirection::Asc);
        let sql = f.to_sql().unwrap();
        assert_eq!(
            sql.query,
            "SELECT * FROM \"data_sets\" WHERE \"data_type_id\" IN (SELECT \"id\" FROM \"data_types\" WHERE \"name\" = $1) ORDER BY \"id\" ASC"
        );
        assert_eq!(sql.params.len(), 1);
    }

    #[test]
    fn unfiltered_select_matches_everything() {
        let mut f = Filter::new("node_types").unwrap();
        assert_eq!(f.to_sql().unwrap().query, "SELECT * FROM \"node_types\" WHERE 1=1");
    }

    #[test]
    fn rejects_unknown_parameters_by_name() {
        let allowed = ["data-group", "data_group"];
        assert!(Filter::reject_unrecognised(&params(&[("data_group", "x")]), &allowed).is_ok());
        let err = Filter::reject_unrecognised(&params(&[("foo", "1"), ("bar", "2")]), &allowed).unwrap_err();
        assert_eq!(err.to_string(), "Unrecognised parameter(s) ('bar', 'foo') were provided");
    }

    #[test]
    fn rejects_bad_table_name() {
        assert!(Filter::new("data sets").is_err());
    }
}
