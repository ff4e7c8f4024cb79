use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CanopyError;
use crate::otf::QueryExecutor;

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
});

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Bool(bool),
}

impl Literal {
    pub fn text(value: &str) -> Self {
        Literal::Text(value.to_string())
    }

    pub fn to_sql(&self) -> String {
        match self {
            Literal::Text(value) => format!("'{}'", value.replace('\'', "''")),
            Literal::Int(value) => value.to_string(),
            Literal::Float(value) if value.is_finite() => value.to_string(),
            Literal::Float(_) => "NULL".to_string(),
            Literal::Date(value) => format!("'{}'", value.format("%Y-%m-%d")),
            Literal::Bool(value) => (if *value { "TRUE" } else { "FALSE" }).to_string(),
        }
    }
}

impl From<NaiveDate> for Literal {
    fn from(value: NaiveDate) -> Self {
        Literal::Date(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        };
        write!(f, "{symbol}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
    pub value: Literal,
}

impl Predicate {
    pub fn new(field: &str, op: Operator, value: impl Into<Literal>) -> Self {
        Self {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Literal>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    pub fn gte(field: &str, value: impl Into<Literal>) -> Self {
        Self::new(field, Operator::Gte, value)
    }

    pub fn lte(field: &str, value: impl Into<Literal>) -> Self {
        Self::new(field, Operator::Lte, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "fn", content = "column", rename_all = "lowercase")]
pub enum Expr {
    Column(String),
    Count,
    Sum(String),
    Min(String),
    Max(String),
}

impl Expr {
    pub fn is_aggregate(&self) -> bool {
        !matches!(self, Expr::Column(_))
    }

    fn column(&self) -> Option<&str> {
        match self {
            Expr::Column(name) | Expr::Sum(name) | Expr::Min(name) | Expr::Max(name) => {
                Some(name)
            }
            Expr::Count => None,
        }
    }

    fn echoed_names(&self) -> Vec<String> {
        let sql = self.to_sql();
        let function = match self {
            Expr::Column(_) => return vec![sql],
            Expr::Count => "count",
            Expr::Sum(_) => "sum",
            Expr::Min(_) => "min",
            Expr::Max(_) => "max",
        };
        vec![sql.to_lowercase(), sql, function.to_string()]
    }

    fn to_sql(&self) -> String {
        match self {
            Expr::Column(name) => name.clone(),
            Expr::Count => "COUNT(*)".to_string(),
            Expr::Sum(name) => format!("SUM({name})"),
            Expr::Min(name) => format!("MIN({name})"),
            Expr::Max(name) => format!("MAX({name})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub expr: Expr,
    pub alias: String,
}

impl Projection {
    pub fn column(name: &str) -> Self {
        Self {
            expr: Expr::Column(name.to_string()),
            alias: name.to_string(),
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        Self {
            expr: Expr::Column(name.to_string()),
            alias: alias.to_string(),
        }
    }

    pub fn count(alias: &str) -> Self {
        Self {
            expr: Expr::Count,
            alias: alias.to_string(),
        }
    }

    pub fn sum(column: &str, alias: &str) -> Self {
        Self {
            expr: Expr::Sum(column.to_string()),
            alias: alias.to_string(),
        }
    }

    pub fn min(column: &str, alias: &str) -> Self {
        Self {
            expr: Expr::Min(column.to_string()),
            alias: alias.to_string(),
        }
    }

    pub fn max(column: &str, alias: &str) -> Self {
        Self {
            expr: Expr::Max(column.to_string()),
            alias: alias.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryOrigin {
    Rw,
    Gadm,
}

impl fmt::Display for GeometryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryOrigin::Rw => write!(f, "rw"),
            GeometryOrigin::Gadm => write!(f, "gadm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeometryBinding {
    pub id: String,
    pub origin: GeometryOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Immutable analytical query. Every builder call consumes the spec and
/// returns the next one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpec {
    pub table: String,
    pub projection: Vec<Projection>,
    pub predicates: Vec<Predicate>,
    pub group_by: Vec<String>,
    pub order_by: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub geometry: Option<GeometryBinding>,
    pub requires_geometry: bool,
}

impl QuerySpec {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            projection: Vec::new(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            geometry: None,
            requires_geometry: false,
        }
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection.push(projection);
        self
    }

    pub fn select_all(mut self, projection: impl IntoIterator<Item = Projection>) -> Self {
        self.projection.extend(projection);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filter_all(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn group_by<S: AsRef<str>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.group_by
            .extend(fields.into_iter().map(|field| field.as_ref().to_string()));
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by.push((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn bind_geometry(mut self, binding: GeometryBinding) -> Self {
        self.geometry = Some(binding);
        self
    }

    pub fn require_geometry(mut self, required: bool) -> Self {
        self.requires_geometry = required;
        self
    }

    pub fn unpaginated(mut self) -> Self {
        self.limit = None;
        self
    }

    pub fn aggregates(&self) -> bool {
        self.projection
            .iter()
            .any(|projection| projection.expr.is_aggregate())
    }

    pub fn validate(self) -> Result<ValidQuery, CanopyError> {
        check_identifier(&self.table)?;
        if self.projection.is_empty() {
            return Err(CanopyError::EmptyProjection(self.table));
        }
        for projection in &self.projection {
            check_identifier(&projection.alias)?;
            if let Some(column) = projection.expr.column() {
                check_identifier(column)?;
            }
        }
        for predicate in &self.predicates {
            check_identifier(&predicate.field)?;
        }
        for field in self.group_by.iter().chain(self.order_by.iter().map(|(f, _)| f)) {
            check_identifier(field)?;
        }

        if self.aggregates() {
            // Bare columns beside aggregates must be grouping keys.
            let bare = self.projection.iter().find_map(|projection| match &projection.expr {
                Expr::Column(name) if !self.group_by.contains(name) => Some(name.clone()),
                _ => None,
            });
            if let Some(column) = bare {
                return Err(CanopyError::MissingGrouping {
                    table: self.table,
                    column,
                });
            }
        }

        if self.requires_geometry && self.geometry.is_none() {
            return Err(CanopyError::MissingGeometry(self.table));
        }
        if let Some(binding) = &self.geometry {
            check_identifier_like(&binding.id)?;
        }

        Ok(ValidQuery(self))
    }

    pub fn execute<E: QueryExecutor + ?Sized>(self, executor: &E) -> Result<Vec<Row>, CanopyError> {
        let query = self.validate()?;
        let rows = executor.execute(&query)?;
        Ok(rows.into_iter().map(|row| query.project_row(row)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidQuery(QuerySpec);

impl ValidQuery {
    pub fn spec(&self) -> &QuerySpec {
        &self.0
    }

    pub fn into_spec(self) -> QuerySpec {
        self.0
    }

    pub fn table(&self) -> &str {
        &self.0.table
    }

    pub fn geometry(&self) -> Option<&GeometryBinding> {
        self.0.geometry.as_ref()
    }

    pub fn to_sql(&self) -> String {
        let spec = &self.0;
        let columns = spec
            .projection
            .iter()
            .map(|projection| match &projection.expr {
                Expr::Column(name) if *name == projection.alias => name.clone(),
                expr => format!("{} AS {}", expr.to_sql(), projection.alias),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {columns} FROM {}", spec.table);
        if !spec.predicates.is_empty() {
            let clauses = spec
                .predicates
                .iter()
                .map(|predicate| {
                    format!(
                        "{} {} {}",
                        predicate.field,
                        predicate.op,
                        predicate.value.to_sql()
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {clauses}"));
        }
        if !spec.group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", spec.group_by.join(", ")));
        }
        if !spec.order_by.is_empty() {
            let order = spec
                .order_by
                .iter()
                .map(|(field, order)| match order {
                    SortOrder::Asc => format!("{field} ASC"),
                    SortOrder::Desc => format!("{field} DESC"),
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        if let Some(limit) = spec.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    /// Keeps only the requested aliases. Services that echo expressions
    /// (`count`, `sum(area__ha)`) instead of aliases are matched by name,
    /// then by position among the keys left over.
    fn project_row(&self, row: Row) -> Row {
        let projection = &self.0.projection;
        let mut matched: Vec<String> = Vec::new();
        let mut projected = Row::new();
        let mut unmatched = Vec::new();
        for p in projection {
            let echoed = std::iter::once(p.alias.clone())
                .chain(p.expr.echoed_names())
                .find(|name| row.contains_key(name) && !matched.contains(name));
            match echoed {
                Some(name) => {
                    projected.insert(p.alias.clone(), row[&name].clone());
                    matched.push(name);
                }
                None => unmatched.push(p.alias.clone()),
            }
        }
        let mut leftovers = row
            .into_iter()
            .filter(|(key, _)| !matched.contains(key))
            .map(|(_, value)| value);
        for alias in unmatched {
            projected.insert(alias, leftovers.next().unwrap_or(Value::Null));
        }
        projected
    }
}

fn check_identifier(value: &str) -> Result<(), CanopyError> {
    if IDENT_RE.is_match(value) {
        Ok(())
    } else {
        Err(CanopyError::InvalidIdentifier(value.to_string()))
    }
}

fn check_identifier_like(value: &str) -> Result<(), CanopyError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if ok {
        Ok(())
    } else {
        Err(CanopyError::InvalidIdentifier(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfidenceMode {
    All,
    ConfirmedOnly,
}

/// Alert counts per confidence tag. Missing buckets count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfidenceBuckets {
    pub nominal: i64,
    pub high: i64,
    pub highest: i64,
}

impl ConfidenceBuckets {
    pub fn from_rows(rows: &[Row], tag_field: &str, count_field: &str) -> Self {
        Self::from_pairs(rows.iter().map(|row| {
            (
                row.get(tag_field).and_then(Value::as_str),
                row.get(count_field).map(value_as_i64).unwrap_or(0),
            )
        }))
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (Option<&'a str>, i64)>) -> Self {
        let mut buckets = Self::default();
        for (tag, count) in pairs {
            match tag {
                Some("nominal") => buckets.nominal += count,
                Some("high") => buckets.high += count,
                Some("highest") => buckets.highest += count,
                _ => {}
            }
        }
        buckets
    }

    pub fn total(&self, mode: ConfidenceMode) -> i64 {
        match mode {
            ConfidenceMode::All => self.high + self.highest + self.nominal,
            ConfidenceMode::ConfirmedOnly => self.high + self.highest,
        }
    }
}

fn value_as_i64(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|number| number.round() as i64))
        .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn two_date_predicates_are_and_combined() {
        let query = QuerySpec::table("gfw_integrated_alerts")
            .select(Projection::count("count"))
            .filter(Predicate::gte("gfw_integrated_alerts__date", date(2020, 1, 1)))
            .filter(Predicate::lte("gfw_integrated_alerts__date", date(2020, 12, 31)))
            .validate()
            .unwrap();
        assert_eq!(query.spec().predicates.len(), 2);
        assert_eq!(query.spec().predicates[0].value, Literal::Date(date(2020, 1, 1)));
        assert_eq!(
            query.to_sql(),
            "SELECT COUNT(*) AS count FROM gfw_integrated_alerts WHERE \
             gfw_integrated_alerts__date >= '2020-01-01' AND \
             gfw_integrated_alerts__date <= '2020-12-31'"
        );
    }

    #[test]
    fn text_literals_are_escaped() {
        let query = QuerySpec::table("t")
            .select(Projection::column("iso"))
            .filter(Predicate::eq("iso", "BRA' OR '1'='1"))
            .validate()
            .unwrap();
        assert_eq!(
            query.to_sql(),
            "SELECT iso FROM t WHERE iso = 'BRA'' OR ''1''=''1'"
        );
    }

    #[test]
    fn empty_projection_is_rejected() {
        let err = QuerySpec::table("t").validate().unwrap_err();
        assert_matches!(err, CanopyError::EmptyProjection(_));
    }

    #[test]
    fn bare_column_needs_grouping() {
        let err = QuerySpec::table("t")
            .select(Projection::column("confidence"))
            .select(Projection::count("count"))
            .validate()
            .unwrap_err();
        assert_matches!(err, CanopyError::MissingGrouping { .. });
    }

    #[test]
    fn geometry_required() {
        let err = QuerySpec::table("t")
            .select(Projection::sum("area__ha", "area__ha"))
            .require_geometry(true)
            .validate()
            .unwrap_err();
        assert_matches!(err, CanopyError::MissingGeometry(_));
    }

    #[test]
    fn identifiers_are_checked() {
        let err = QuerySpec::table("t; DROP TABLE x")
            .select(Projection::count("count"))
            .validate()
            .unwrap_err();
        assert_matches!(err, CanopyError::InvalidIdentifier(_));
    }

    #[test]
    fn confidence_totals() {
        let rows = vec![
            json!({"confidence": "high", "count": 10}),
            json!({"confidence": "highest", "count": 5}),
            json!({"confidence": "nominal", "count": 3}),
        ]
        .into_iter()
        .filter_map(|value| value.as_object().cloned())
        .collect::<Vec<_>>();
        let buckets = ConfidenceBuckets::from_rows(&rows, "confidence", "count");
        assert_eq!(buckets.total(ConfidenceMode::All), 18);
        assert_eq!(buckets.total(ConfidenceMode::ConfirmedOnly), 15);

        let partial = ConfidenceBuckets::from_rows(&rows[..1], "confidence", "count");
        assert_eq!(partial.total(ConfidenceMode::All), 10);
        assert_eq!(partial.highest, 0);
    }

    #[test]
    fn positional_rows_are_rekeyed() {
        let query = QuerySpec::table("t")
            .select(Projection::count("count"))
            .select(Projection::sum("area__ha", "area__ha"))
            .validate()
            .unwrap();
        let row = json!({"count(*)": 4, "sum": 2.5}).as_object().cloned().unwrap();
        let projected = query.project_row(row);
        assert_eq!(projected.get("count"), Some(&json!(4)));
        assert_eq!(projected.get("area__ha"), Some(&json!(2.5)));
    }

    #[test]
    fn echoed_expressions_keep_their_values() {
        let query = QuerySpec::table("t")
            .select(Projection::sum("area__ha", "area__ha"))
            .select(Projection::count("alert__count"))
            .validate()
            .unwrap();
        let row = json!({"sum": 2.5, "count": 4}).as_object().cloned().unwrap();
        let projected = query.project_row(row);
        assert_eq!(projected.get("area__ha"), Some(&json!(2.5)));
        assert_eq!(projected.get("alert__count"), Some(&json!(4)));

        let row = json!({"count": 7, "value": 1.5}).as_object().cloned().unwrap();
        let projected = query.project_row(row);
        assert_eq!(projected.get("alert__count"), Some(&json!(7)));
        assert_eq!(projected.get("area__ha"), Some(&json!(1.5)));
    }
}
