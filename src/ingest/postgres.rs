/// PostgreSQL-backed `Repository`.
///
/// Builds `SELECT "c1", "c2" FROM "table" WHERE "f"::bigint = ANY($1) ...`
/// from a `TableQuery`. Identifiers cannot be bound as parameters, so they
/// are validated and quoted before being interpolated; filter values are
/// always bound.

use chrono::{DateTime, NaiveDateTime, Utc};
use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row};

use super::repository::{Cell, FilterValue, Repository, RepositoryError, Table, TableQuery};

pub struct PostgresRepository {
    client: Client,
}

impl PostgresRepository {
    pub fn connect(url: &str) -> Result<Self, RepositoryError> {
        let client =
            Client::connect(url, NoTls).map_err(|e| RepositoryError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Quotes a (possibly schema-qualified) identifier after checking it only
/// contains letters, digits and underscores.
pub fn quote_identifier(name: &str) -> Result<String, RepositoryError> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid = parts.iter().all(|p| {
        !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    if !valid || parts.len() > 2 {
        return Err(RepositoryError::InvalidIdentifier(name.to_string()));
    }
    Ok(parts
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect::<Vec<_>>()
        .join("."))
}

/// A filter's bound parameter: integer sets compare as `bigint`, anything
/// else as `text`.
#[derive(Debug, PartialEq)]
enum FilterParam {
    Ints(Vec<i64>),
    Texts(Vec<String>),
}

fn filter_param(values: &[FilterValue]) -> FilterParam {
    if values.iter().all(|v| matches!(v, FilterValue::Int(_))) {
        FilterParam::Ints(
            values
                .iter()
                .filter_map(|v| match v {
                    FilterValue::Int(i) => Some(*i),
                    FilterValue::Text(_) => None,
                })
                .collect(),
        )
    } else {
        FilterParam::Texts(
            values
                .iter()
                .map(|v| match v {
                    FilterValue::Int(i) => i.to_string(),
                    FilterValue::Text(s) => s.clone(),
                })
                .collect(),
        )
    }
}

/// Renders the SQL text and the parameters to bind to it.
fn build_select(query: &TableQuery) -> Result<(String, Vec<FilterParam>), RepositoryError> {
    if query.columns.is_empty() {
        return Err(RepositoryError::Query {
            table: query.table.clone(),
            message: "no columns requested".to_string(),
        });
    }
    let columns = query
        .columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Result<Vec<_>, _>>()?;
    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), quote_identifier(&query.table)?);

    let mut params = Vec::with_capacity(query.filters.len());
    for (i, (column, values)) in query.filters.iter().enumerate() {
        let param = filter_param(values);
        let cast = match param {
            FilterParam::Ints(_) => "bigint",
            FilterParam::Texts(_) => "text",
        };
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("{}::{} = ANY(${})", quote_identifier(column)?, cast, i + 1));
        params.push(param);
    }
    Ok((sql, params))
}

fn read_cell(row: &Row, idx: usize) -> Result<Cell, postgres::Error> {
    let ty = row.columns()[idx].type_().clone();
    let cell = if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(|v| Cell::Int(v as i64))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(|v| Cell::Int(v as i64))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(Cell::Int)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|v| Cell::Float(v as f64))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(Cell::Float)
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?.map(Cell::Timestamp)
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| Cell::Timestamp(v.naive_utc()))
    } else {
        row.try_get::<_, Option<String>>(idx)?.map(Cell::Text)
    };
    Ok(cell.unwrap_or(Cell::Null))
}

impl Repository for PostgresRepository {
    fn read_table(&mut self, query: &TableQuery) -> Result<Table, RepositoryError> {
        let (sql, params) = build_select(query)?;
        let bound: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| match p {
                FilterParam::Ints(v) => v as &(dyn ToSql + Sync),
                FilterParam::Texts(v) => v as &(dyn ToSql + Sync),
            })
            .collect();

        let query_error = |e: postgres::Error| RepositoryError::Query {
            table: query.table.clone(),
            message: e.to_string(),
        };

        let rows = self.client.query(sql.as_str(), &bound).map_err(query_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(query.columns.len());
            for idx in 0..query.columns.len() {
                let cell = read_cell(row, idx).map_err(|e| {
                    let column = query.columns[idx].clone();
                    if e.to_string().contains("cannot convert") {
                        RepositoryError::UnsupportedType {
                            column,
                            type_name: row.columns()[idx].type_().name().to_string(),
                        }
                    } else {
                        query_error(e)
                    }
                })?;
                cells.push(cell);
            }
            out.push(cells);
        }

        Ok(Table {
            columns: query.columns.clone(),
            rows: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("ExtSiteID").unwrap(), "\"ExtSiteID\"");
        assert_eq!(quote_identifier("hydro.ExternalSite").unwrap(), "\"hydro\".\"ExternalSite\"");
        assert!(quote_identifier("x; DROP TABLE y").is_err());
        assert!(quote_identifier("a..b").is_err());
        assert!(quote_identifier("").is_err());
    }

    #[test]
    fn test_build_select_binds_every_filter() {
        let q = TableQuery::new("TSDataNumericHourly", &["ExtSiteID", "DateTime", "Value"])
            .where_in("DatasetTypeID", [38, 15])
            .where_in("ExtSiteID", ["A".to_string(), "B".to_string()]);
        let (sql, params) = build_select(&q).unwrap();
        assert_eq!(
            sql,
            "SELECT \"ExtSiteID\", \"DateTime\", \"Value\" FROM \"TSDataNumericHourly\" \
             WHERE \"DatasetTypeID\"::bigint = ANY($1) AND \"ExtSiteID\"::text = ANY($2)"
        );
        assert_eq!(params[0], FilterParam::Ints(vec![38, 15]));
        assert_eq!(params[1], FilterParam::Texts(vec!["A".into(), "B".into()]));
    }

    #[test]
    fn test_mixed_filter_values_compare_as_text() {
        let values = vec![FilterValue::Int(5), FilterValue::Text("x".into())];
        assert_eq!(filter_param(&values), FilterParam::Texts(vec!["5".into(), "x".into()]));
    }
}
