use serde_json::Value;

use super::error::FilterError;
use super::types::{FilterOp, FilterWhereInfo};
use super::validate_identifier;

pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
    conditions: Vec<FilterWhereInfo>,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
            conditions: vec![],
        }
    }

    pub fn push(&mut self, column: &str, operator: FilterOp, data: Value) -> Result<(), FilterError> {
        validate_identifier(column).map_err(FilterError::InvalidColumn)?;
        self.conditions.push(FilterWhereInfo { column: column.to_string(), operator, data });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Render the conditions joined by AND, numbering parameters from the starting index
    pub fn generate(&mut self) -> Result<(String, Vec<Value>), FilterError> {
        self.param_values.clear();
        let start = self.param_index;

        let conditions = self.conditions.clone();
        let mut sql_conditions = Vec::with_capacity(conditions.len());
        for condition in &conditions {
            sql_conditions.push(self.build_sql_condition(condition)?);
        }

        self.param_index = start;
        let where_clause = if sql_conditions.is_empty() { "1=1".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, self.param_values.clone()))
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let quoted_column = format!("\"{}\"", condition.column);
        match condition.operator {
            FilterOp::Eq => {
                if condition.data.is_null() {
                    Ok(format!("{} IS NULL", quoted_column))
                } else {
                    Ok(format!("{} = {}", quoted_column, self.param(condition.data.clone())))
                }
            }
            FilterOp::IEq => Ok(format!("lower({}) = lower({})", quoted_column, self.param(condition.data.clone()))),
            FilterOp::NameOf { table } => {
                validate_identifier(table).map_err(FilterError::InvalidTableName)?;
                Ok(format!(
                    "{} IN (SELECT \"id\" FROM \"{}\" WHERE \"name\" = {})",
                    quoted_column,
                    table,
                    self.param(condition.data.clone())
                ))
            }
            FilterOp::OwnedBy(owners) => {
                validate_identifier(owners.table).map_err(FilterError::InvalidTableName)?;
                validate_identifier(owners.column).map_err(FilterError::InvalidColumn)?;
                Ok(format!(
                    "{} IN (SELECT o.\"{}\" FROM \"{}\" o JOIN \"users\" u ON u.\"id\" = o.\"user_id\" WHERE lower(u.\"email\") = lower({}))",
                    quoted_column,
                    owners.column,
                    owners.table,
                    self.param(condition.data.clone())
                ))
            }
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::OwnerTable;
    use serde_json::json;

    #[test]
    fn numbers_params_in_order() {
        let mut w = FilterWhere::new(0);
        w.push("name", FilterOp::IEq, json!("Cabinet Office")).unwrap();
        w.push("abbreviation", FilterOp::Eq, json!("CO")).unwrap();
        let (sql, params) = w.generate().unwrap();
        assert_eq!(sql, "lower(\"name\") = lower($1) AND \"abbreviation\" = $2");
        assert_eq!(params, vec![json!("Cabinet Office"), json!("CO")]);
    }

    #[test]
    fn owner_condition_joins_users() {
        let mut w = FilterWhere::new(2);
        let owners = OwnerTable { table: "data_set_owners", column: "data_set_id" };
        w.push("id", FilterOp::OwnedBy(owners), json!("a@b.com")).unwrap();
        let (sql, _) = w.generate().unwrap();
        assert!(sql.starts_with("\"id\" IN (SELECT o.\"data_set_id\" FROM \"data_set_owners\" o"));
        assert!(sql.ends_with("lower($3))"));
    }

    #[test]
    fn rejects_unsafe_columns() {
        let mut w = FilterWhere::new(0);
        assert!(w.push("name; DROP TABLE users", FilterOp::Eq, json!("x")).is_err());
    }

    #[test]
    fn empty_where_is_true() {
        let mut w = FilterWhere::new(0);
        assert_eq!(w.generate().unwrap().0, "1=1");
    }
}
