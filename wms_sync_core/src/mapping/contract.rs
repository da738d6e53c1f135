use super::{Cast, Dataset, Mapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Date,
}

impl FieldType {
    /// Whether `cast` yields values the app can read as this type. Dates
    /// travel as text.
    pub fn accepts(self, cast: Cast) -> bool {
        match self {
            Self::Number => matches!(cast, Cast::Number | Cast::Divide100 | Cast::Divide1000),
            Self::String | Self::Date => cast == Cast::String,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldContract {
    pub app_field: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

const fn field(app_field: &'static str, field_type: FieldType, required: bool) -> FieldContract {
    FieldContract {
        app_field,
        field_type,
        required,
    }
}

/// Application fields the downstream app reads for one dataset.
#[derive(Debug, Clone, Copy)]
pub struct DataContract {
    pub dataset: Dataset,
    pub fields: &'static [FieldContract],
}

const ORDERS: &[FieldContract] = &[
    field("erp_order_id", FieldType::String, true),
    field("customer_name", FieldType::String, true),
    field("customer_code", FieldType::String, false),
    field("total_value", FieldType::Number, true),
    field("financial_status", FieldType::String, false),
    field("created_at", FieldType::Date, false),
    field("pickup_point", FieldType::Number, false),
    field("section", FieldType::String, false),
];

const PRODUCTS: &[FieldContract] = &[
    field("erp_code", FieldType::String, true),
    field("name", FieldType::String, true),
    field("barcode", FieldType::String, false),
    field("box_barcode", FieldType::String, false),
    field("section", FieldType::String, true),
    field("pickup_point", FieldType::Number, true),
    field("unit", FieldType::String, false),
    field("manufacturer", FieldType::String, false),
    field("price", FieldType::Number, false),
];

const ORDER_ITEMS: &[FieldContract] = &[
    field("erp_order_id", FieldType::String, true),
    field("erp_product_code", FieldType::String, true),
    field("quantity", FieldType::Number, true),
    field("pickup_point", FieldType::Number, false),
    field("section", FieldType::String, false),
];

const WORK_UNITS: &[FieldContract] = &[
    field("erp_order_id", FieldType::String, true),
    field("pickup_point", FieldType::Number, false),
    field("section", FieldType::String, false),
    field("type", FieldType::String, true),
];

impl DataContract {
    pub fn for_dataset(dataset: Dataset) -> Self {
        let fields = match dataset {
            Dataset::Orders => ORDERS,
            Dataset::Products => PRODUCTS,
            Dataset::OrderItems => ORDER_ITEMS,
            Dataset::WorkUnits => WORK_UNITS,
        };
        Self { dataset, fields }
    }

    /// Required fields the mapping has no rule for.
    pub fn missing_required(&self, mapping: &Mapping) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| !mapping.fields().any(|m| m == f.app_field))
            .map(|f| f.app_field)
            .collect()
    }

    /// Mapped fields the downstream app does not know about.
    pub fn unknown_fields<'m>(&self, mapping: &'m Mapping) -> Vec<&'m str> {
        mapping
            .fields()
            .filter(|m| !self.fields.iter().any(|f| f.app_field == *m))
            .collect()
    }

    /// Mapped fields whose cast contradicts the type the app expects.
    pub fn cast_conflicts<'m>(&self, mapping: &'m Mapping) -> Vec<(&'m str, Cast, FieldType)> {
        mapping
            .casts()
            .filter_map(|(name, cast)| {
                let cast = cast?;
                let expected = self.fields.iter().find(|f| f.app_field == name)?.field_type;
                (!expected.accepts(cast)).then_some((name, cast, expected))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FieldRule;

    #[test]
    fn builtin_mappings_satisfy_contracts() {
        for dataset in [
            Dataset::Orders,
            Dataset::Products,
            Dataset::OrderItems,
            Dataset::WorkUnits,
        ] {
            let contract = DataContract::for_dataset(dataset);
            let mapping = Mapping::legacy(dataset);
            assert!(
                contract.missing_required(&mapping).is_empty(),
                "{dataset} builtin mapping misses required fields"
            );
            assert!(contract.unknown_fields(&mapping).is_empty());
            assert!(contract.cast_conflicts(&mapping).is_empty());
        }
    }

    #[test]
    fn reports_missing_and_unknown_fields() {
        let mapping = Mapping::from_rules(
            Dataset::Products,
            &[
                FieldRule::new("erp_code", "IDPRODUTO"),
                FieldRule::new("color", "COR"),
            ],
        );
        let contract = DataContract::for_dataset(Dataset::Products);
        assert_eq!(
            contract.missing_required(&mapping),
            vec!["name", "section", "pickup_point"]
        );
        assert_eq!(contract.unknown_fields(&mapping), vec!["color"]);
    }

    #[test]
    fn flags_casts_that_contradict_field_types() {
        let mapping = Mapping::from_rules(
            Dataset::Orders,
            &[
                FieldRule::new("erp_order_id", "IDORCAMENTO").with_cast(Cast::Number),
                FieldRule::new("total_value", "VALTOTLIQUIDO").with_cast(Cast::Divide100),
                FieldRule::new("financial_status", "FLAGCANCELADO").with_cast(Cast::BooleanTF),
                FieldRule::new("created_at", "DTMOVIMENTO").with_cast(Cast::String),
                FieldRule::new("color", "COR").with_cast(Cast::Number),
            ],
        );
        let contract = DataContract::for_dataset(Dataset::Orders);
        assert_eq!(
            contract.cast_conflicts(&mapping),
            vec![
                ("erp_order_id", Cast::Number, FieldType::String),
                ("financial_status", Cast::BooleanTF, FieldType::String),
            ]
        );
    }
}
