use super::error::FilterError;
use super::types::FilterOrderInfo;
use super::validate_identifier;

pub struct FilterOrder;

impl FilterOrder {
    pub fn generate(infos: &[FilterOrderInfo]) -> Result<String, FilterError> {
        if infos.is_empty() { return Ok(String::new()); }
        let mut parts = Vec::with_capacity(infos.len());
        for info in infos {
            validate_identifier(&info.column).map_err(FilterError::InvalidColumn)?;
            parts.push(format!("\"{}\" {}", info.column, info.sort.to_sql()));
        }
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::SortDirection;

    #[test]
    fn renders_order_by() {
        let infos = vec![
            FilterOrderInfo { column: "title".to_string(), sort: SortDirection::Asc },
            FilterOrderInfo { column: "id".to_string(), sort: SortDirection::Desc },
        ];
        assert_eq!(FilterOrder::generate(&infos).unwrap(), "ORDER BY \"title\" ASC, \"id\" DESC");
        assert_eq!(FilterOrder::generate(&[]).unwrap(), "");
    }
}
