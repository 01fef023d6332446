// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::Serialize;

use crate::constants::ORDER_BY_FILTER_PLACEHOLDER;

/// Represents a Cosmos DB Query, with optional parameters.
///
/// # Examples
///
/// ```rust
/// use azure_data_cosmos_query::Query;
///
/// let query = Query::from("SELECT * FROM c WHERE c.id = @customer_id")
///     .with_parameter("@customer_id", 42)
///     .unwrap();
/// assert_eq!(query.text(), "SELECT * FROM c WHERE c.id = @customer_id");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Query {
    #[serde(rename = "query")]
    text: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<QueryParameter>,
}

impl Query {
    /// Consumes this [`Query`] instance, adds a new parameter to it, and returns it.
    ///
    /// Returns an error if the value cannot be serialized to JSON.
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> crate::Result<Self> {
        let value = serde_json::to_value(value)?;
        self.parameters.push(QueryParameter {
            name: name.into(),
            value,
        });
        Ok(self)
    }

    /// Gets the query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Gets the parameters of the query.
    pub fn parameters(&self) -> &[QueryParameter] {
        &self.parameters
    }

    /// Returns a copy of this query with different text and the same parameters.
    ///
    /// The gateway's `ORDER BY` resume-filter placeholder, if present, is replaced with `true`.
    pub(crate) fn rewrite(&self, text: &str) -> Query {
        Query {
            text: text.replace(ORDER_BY_FILTER_PLACEHOLDER, "true"),
            parameters: self.parameters.clone(),
        }
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self {
            text,
            parameters: vec![],
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        text.to_string().into()
    }
}

impl From<&String> for Query {
    fn from(text: &String) -> Self {
        text.clone().into()
    }
}

/// A named parameter of a [`Query`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: serde_json::Value,
}
