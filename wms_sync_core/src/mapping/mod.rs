//! Field mappings: ordered rules that turn a raw cache row into the fields of
//! one application entity.
//!
//! Every entity is resolved either to an externally published mapping or to
//! the built-in legacy rules. Both are plain [`Mapping`] values, so the
//! transform never branches on which one it got.

pub mod contract;
pub mod resolver;

use crate::models::{FieldValue, Record, lookup};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use contract::{DataContract, FieldContract, FieldType};
pub use resolver::{
    LocalMappingStore, MappingDocument, MappingResolver, MappingStore, NoMappingStore,
    PostgresMappingStore,
};

/// Target entity a mapping document is published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dataset {
    Orders,
    Products,
    OrderItems,
    WorkUnits,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Products => "products",
            Self::OrderItems => "order_items",
            Self::WorkUnits => "work_units",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    String,
    Number,
    Divide100,
    Divide1000,
    /// `T` (any case) is true, everything else false.
    BooleanTF,
}

impl Cast {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "divide_100" => Some(Self::Divide100),
            "divide_1000" => Some(Self::Divide1000),
            "boolean_T_F" => Some(Self::BooleanTF),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Divide100 => "divide_100",
            Self::Divide1000 => "divide_1000",
            Self::BooleanTF => "boolean_T_F",
        }
    }

    fn apply(&self, value: &FieldValue) -> Result<FieldValue, String> {
        match self {
            Self::String => Ok(FieldValue::Text(value.to_string())),
            Self::Number => number(value).map(FieldValue::Real),
            Self::Divide100 => number(value).map(|n| FieldValue::Real(n / 100.0)),
            Self::Divide1000 => number(value).map(|n| FieldValue::Real(n / 1000.0)),
            Self::BooleanTF => Ok(FieldValue::Bool(
                value.to_string().trim().eq_ignore_ascii_case("T"),
            )),
        }
    }
}

fn number(value: &FieldValue) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("'{value}' is not a number"))
}

/// One rule as published by the mapping editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    pub app_field: String,
    pub db_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

impl FieldRule {
    pub fn new(app_field: &str, db_expression: &str) -> Self {
        Self {
            app_field: app_field.to_string(),
            db_expression: db_expression.to_string(),
            cast: None,
            default_value: None,
        }
    }

    pub fn with_cast(mut self, cast: Cast) -> Self {
        self.cast = Some(cast.as_str().to_string());
        self
    }

    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CompiledRule {
    app_field: String,
    expression: String,
    cast: Option<Cast>,
    default: FieldValue,
}

/// A recoverable cast failure. The raw value was kept.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionError {
    pub field: String,
    pub cast: Cast,
    pub value: FieldValue,
    pub reason: String,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.field,
            self.cast.as_str(),
            self.reason
        )
    }
}

/// Output of applying a mapping to one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapped {
    pub fields: Record,
    pub errors: Vec<CoercionError>,
}

impl Mapped {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field)
            .and_then(|v| v.as_text().map(|t| t.into_owned()))
    }
}

/// An ordered list of field rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    rules: Vec<CompiledRule>,
}

impl Mapping {
    /// Compile published rules. Unknown casts are dropped with a warning and
    /// the rule then copies the raw value.
    pub fn from_rules(dataset: Dataset, rules: &[FieldRule]) -> Self {
        let rules = rules
            .iter()
            .filter(|r| !r.app_field.trim().is_empty())
            .map(|r| {
                let cast = match r.cast.as_deref().map(str::trim) {
                    None | Some("") => None,
                    Some(raw) => {
                        let parsed = Cast::parse(raw);
                        if parsed.is_none() {
                            tracing::warn!(
                                %dataset,
                                field = %r.app_field,
                                cast = raw,
                                "unknown cast in mapping rule; value copied as-is"
                            );
                        }
                        parsed
                    }
                };
                CompiledRule {
                    app_field: r.app_field.trim().to_string(),
                    expression: r.db_expression.trim().to_string(),
                    cast,
                    default: r
                        .default_value
                        .as_ref()
                        .map(FieldValue::from_json)
                        .unwrap_or(FieldValue::Null),
                }
            })
            .collect();
        Self { rules }
    }

    /// Built-in rules reproducing the historical fixed column layout.
    pub fn legacy(dataset: Dataset) -> Self {
        Self::from_rules(dataset, &legacy_rules(dataset))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.app_field.as_str())
    }

    /// Each mapped field with the cast its rule applies, if any.
    pub fn casts(&self) -> impl Iterator<Item = (&str, Option<Cast>)> {
        self.rules.iter().map(|r| (r.app_field.as_str(), r.cast))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule to `row`. Never fails: a cast that cannot be applied
    /// leaves the raw value in place and records a [`CoercionError`].
    pub fn apply(&self, row: &Record) -> Mapped {
        let mut out = Mapped::default();
        for rule in &self.rules {
            let raw = lookup(row, &rule.expression)
                .filter(|v| !v.is_blank())
                .cloned()
                .unwrap_or_else(|| rule.default.clone());

            let value = match (rule.cast, raw.is_null()) {
                (Some(cast), false) => match cast.apply(&raw) {
                    Ok(v) => v,
                    Err(reason) => {
                        out.errors.push(CoercionError {
                            field: rule.app_field.clone(),
                            cast,
                            value: raw.clone(),
                            reason,
                        });
                        raw
                    }
                },
                _ => raw,
            };
            out.fields.insert(rule.app_field.clone(), value);
        }
        out
    }
}

fn legacy_rules(dataset: Dataset) -> Vec<FieldRule> {
    match dataset {
        Dataset::Orders => vec![
            FieldRule::new("erp_order_id", "IDORCAMENTO"),
            FieldRule::new("customer_name", "DESCLIENTE"),
            FieldRule::new("customer_code", "IDCLIFOR"),
            FieldRule::new("total_value", "VALTOTLIQUIDO").with_cast(Cast::Divide100),
            FieldRule::new("created_at", "DTMOVIMENTO"),
            FieldRule::new("pickup_point", "IDLOCALRETIRADA"),
            FieldRule::new("section", "IDSECAO"),
        ],
        Dataset::Products => vec![
            FieldRule::new("erp_code", "IDPRODUTO"),
            FieldRule::new("barcode", "CODBARRAS"),
            FieldRule::new("box_barcode", "CODBARRAS_CAIXA"),
            FieldRule::new("name", "DESCRRESPRODUTO"),
            FieldRule::new("section", "IDSECAO"),
            FieldRule::new("pickup_point", "IDLOCALRETIRADA"),
            FieldRule::new("unit", "UNIDADE"),
            FieldRule::new("manufacturer", "FABRICANTE"),
            FieldRule::new("price", "VALUNITBRUTO"),
        ],
        Dataset::OrderItems => vec![
            FieldRule::new("erp_order_id", "IDORCAMENTO"),
            FieldRule::new("erp_product_code", "IDPRODUTO"),
            FieldRule::new("quantity", "QTDPRODUTO").with_cast(Cast::Divide1000),
            FieldRule::new("pickup_point", "IDLOCALRETIRADA"),
            FieldRule::new("section", "IDSECAO"),
        ],
        Dataset::WorkUnits => vec![
            FieldRule::new("erp_order_id", "IDORCAMENTO"),
            FieldRule::new("pickup_point", "IDLOCALRETIRADA"),
            FieldRule::new("section", "IDSECAO"),
            FieldRule::new("type", "TIPO").with_default("separacao"),
        ],
    }
}

/// Resolved mapping for one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityMapping {
    External { version: i64, mapping: Mapping },
    Builtin(Mapping),
}

impl EntityMapping {
    pub fn builtin(dataset: Dataset) -> Self {
        Self::Builtin(Mapping::legacy(dataset))
    }

    pub fn mapping(&self) -> &Mapping {
        match self {
            Self::External { mapping, .. } => mapping,
            Self::Builtin(mapping) => mapping,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }

    pub fn apply(&self, row: &Record) -> Mapped {
        self.mapping().apply(row)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::External { version, .. } => format!("external v{version}"),
            Self::Builtin(_) => "builtin".to_string(),
        }
    }
}

/// Mappings for every entity the transform emits.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingSet {
    pub orders: EntityMapping,
    pub products: EntityMapping,
    pub order_items: EntityMapping,
}

impl MappingSet {
    pub fn builtin() -> Self {
        Self {
            orders: EntityMapping::builtin(Dataset::Orders),
            products: EntityMapping::builtin(Dataset::Products),
            order_items: EntityMapping::builtin(Dataset::OrderItems),
        }
    }

    pub fn any_external(&self) -> bool {
        self.orders.is_external() || self.products.is_external() || self.order_items.is_external()
    }
}

impl Default for MappingSet {
    fn default() -> Self {
        Self::builtin()
    }
}
