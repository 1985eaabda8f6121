use std::fmt;
use url::form_urlencoded;

/// Query string in the REST dialect: `col=eq.<v>`, `order=<col>.<dir>`, `select=<cols>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality filter
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.pairs.push((column.to_string(), format!("eq.{value}")));
        self
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.pairs.push(("order".to_string(), format!("{column}.asc")));
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.pairs.push(("order".to_string(), format!("{column}.desc")));
        self
    }

    /// Field projection
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.pairs.push(("select".to_string(), columns.join(",")));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        f.write_str(&serializer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_in_order() {
        let query = Query::new()
            .eq("user_id", "u1")
            .select(&["preset_name"])
            .order_asc("created_at");
        assert_eq!(
            query.to_string(),
            "user_id=eq.u1&select=preset_name&order=created_at.asc"
        );
    }

    #[test]
    fn test_values_are_encoded() {
        let query = Query::new().eq("preset_name", "my scene&co");
        assert_eq!(query.to_string(), "preset_name=eq.my+scene%26co");
    }

    #[test]
    fn test_multi_column_select() {
        let query = Query::new().select(&["id", "preset_name"]).order_desc("id");
        assert_eq!(query.to_string(), "select=id%2Cpreset_name&order=id.desc");
    }
}
