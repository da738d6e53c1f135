use crate::models::{CacheKey, FieldValue, Record, lookup, normalize_timestamp};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    /// Stored as `YYYY-MM-DDTHH:MM:SS`.
    Timestamp,
}

pub const MOVEMENT_DATE: &str = "DTMOVIMENTO";
const MOVEMENT_DATE_IDX: usize = 22;

/// Cached columns in table order, with the type each remote value is
/// coerced to before insert.
pub const CACHE_COLUMNS: [(&str, ColumnKind); 28] = [
    ("IDEMPRESA", ColumnKind::Integer),
    ("IDORCAMENTO", ColumnKind::Integer),
    ("IDPRODUTO", ColumnKind::Text),
    ("IDSUBPRODUTO", ColumnKind::Text),
    ("NUMSEQUENCIA", ColumnKind::Integer),
    ("QTDPRODUTO", ColumnKind::Real),
    ("UNIDADE", ColumnKind::Text),
    ("FABRICANTE", ColumnKind::Text),
    ("VALUNITBRUTO", ColumnKind::Real),
    ("VALTOTLIQUIDO", ColumnKind::Real),
    ("DESCRRESPRODUTO", ColumnKind::Text),
    ("IDVENDEDOR", ColumnKind::Text),
    ("IDLOCALRETIRADA", ColumnKind::Integer),
    ("IDSECAO", ColumnKind::Integer),
    ("DESCRSECAO", ColumnKind::Text),
    ("TIPOENTREGA", ColumnKind::Text),
    ("NOMEVENDEDOR", ColumnKind::Text),
    ("TIPOENTREGA_DESCR", ColumnKind::Text),
    ("LOCALRETESTOQUE", ColumnKind::Text),
    ("FLAGCANCELADO", ColumnKind::Text),
    ("IDCLIFOR", ColumnKind::Text),
    ("DESCLIENTE", ColumnKind::Text),
    (MOVEMENT_DATE, ColumnKind::Timestamp),
    ("IDRECEBIMENTO", ColumnKind::Text),
    ("DESCRRECEBIMENTO", ColumnKind::Text),
    ("FLAGPRENOTAPAGA", ColumnKind::Text),
    ("CODBARRAS", ColumnKind::Text),
    ("CODBARRAS_CAIXA", ColumnKind::Text),
];

/// One remote line, typed and keyed, ready for the cache table.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub key: CacheKey,
    /// Aligned with [`CACHE_COLUMNS`].
    pub values: Vec<FieldValue>,
}

impl CacheRow {
    /// Coerce a remote record. Fails when any numeric or date column holds
    /// an unparseable value, or when the movement date is missing; the
    /// caller skips and tallies such rows.
    pub fn from_record(record: &Record) -> Result<Self> {
        let mut values = Vec::with_capacity(CACHE_COLUMNS.len());
        for (name, kind) in CACHE_COLUMNS {
            let raw = lookup(record, name).unwrap_or(&FieldValue::Null);
            values.push(coerce(name, kind, raw)?);
        }
        // An undated row would never fall inside a later window delete.
        if !matches!(values[MOVEMENT_DATE_IDX], FieldValue::Text(_)) {
            return Err(Error::Coercion(format!("{MOVEMENT_DATE}: missing")));
        }

        let int_at = |idx: usize| match &values[idx] {
            FieldValue::Integer(i) => *i,
            _ => 0,
        };
        let text_at = |idx: usize| match &values[idx] {
            FieldValue::Text(s) => s.clone(),
            _ => String::new(),
        };
        let key = CacheKey {
            tenant: int_at(0),
            order: int_at(1),
            product: text_at(2),
            subproduct: text_at(3),
            sequence: int_at(4),
        };
        Ok(Self { key, values })
    }

    /// `YYYY-MM-DDTHH:MM:SS`; always present on a coerced row.
    pub fn movement_date(&self) -> &str {
        match &self.values[MOVEMENT_DATE_IDX] {
            FieldValue::Text(s) => s.as_str(),
            _ => "",
        }
    }
}

fn coerce(name: &str, kind: ColumnKind, raw: &FieldValue) -> Result<FieldValue> {
    if raw.is_blank() {
        return Ok(FieldValue::Null);
    }
    let coerced = match kind {
        ColumnKind::Integer => raw.as_i64().map(FieldValue::Integer),
        ColumnKind::Real => raw.as_f64().map(FieldValue::Real),
        ColumnKind::Text => raw.as_text().map(|t| FieldValue::Text(t.into_owned())),
        ColumnKind::Timestamp => raw
            .as_text()
            .and_then(|t| normalize_timestamp(&t))
            .map(FieldValue::Text),
    };
    coerced.ok_or_else(|| {
        Error::Coercion(format!("{name}: '{raw}' is not a valid {kind:?} value"))
    })
}

/// `INSERT` for one cache row; the key goes first, then [`CACHE_COLUMNS`].
pub fn insert_sql() -> String {
    let columns: Vec<&str> = CACHE_COLUMNS.iter().map(|(name, _)| *name).collect();
    let placeholders = vec!["?"; CACHE_COLUMNS.len() + 1].join(", ");
    format!(
        "INSERT INTO cache_orcamentos (CHAVE, {}) VALUES ({placeholders})",
        columns.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value<'r>(row: &'r CacheRow, column: &str) -> Option<&'r FieldValue> {
        CACHE_COLUMNS
            .iter()
            .position(|(name, _)| *name == column)
            .and_then(|idx| row.values.get(idx))
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
            .collect()
    }

    #[test]
    fn coerces_and_keys_a_remote_line() {
        let row = CacheRow::from_record(&record(&[
            ("IDEMPRESA", "1"),
            ("IDORCAMENTO", "500"),
            ("IDPRODUTO", "A"),
            ("IDSUBPRODUTO", "0"),
            ("NUMSEQUENCIA", "2"),
            ("QTDPRODUTO", "1000.000"),
            ("DTMOVIMENTO", "2025-03-04 10:11:12.000000"),
            ("UNIDADE", "  "),
        ]))
        .unwrap();
        assert_eq!(row.key.to_string(), "1-500-A-0-2");
        assert_eq!(value(&row, "QTDPRODUTO"), Some(&FieldValue::Real(1000.0)));
        assert_eq!(value(&row, "UNIDADE"), Some(&FieldValue::Null));
        assert_eq!(row.movement_date(), "2025-03-04T10:11:12");
    }

    #[test]
    fn unparseable_numbers_fail_the_row() {
        let err = CacheRow::from_record(&record(&[("IDORCAMENTO", "5X0")])).unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));
        let err = CacheRow::from_record(&record(&[("DTMOVIMENTO", "yesterday")])).unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));
    }

    #[test]
    fn undated_rows_are_rejected() {
        let base = [("IDEMPRESA", "1"), ("IDORCAMENTO", "500"), ("IDPRODUTO", "A")];
        let err = CacheRow::from_record(&record(&base)).unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));

        let mut blank = record(&base);
        blank.insert("DTMOVIMENTO".into(), FieldValue::from("   "));
        assert!(matches!(
            CacheRow::from_record(&blank),
            Err(Error::Coercion(_))
        ));
    }

    #[test]
    fn movement_date_index_matches_column_table() {
        assert_eq!(CACHE_COLUMNS[MOVEMENT_DATE_IDX].0, MOVEMENT_DATE);
    }

    #[test]
    fn insert_has_one_placeholder_per_column() {
        let sql = insert_sql();
        assert_eq!(sql.matches('?').count(), CACHE_COLUMNS.len() + 1);
        assert!(sql.starts_with("INSERT INTO cache_orcamentos (CHAVE, IDEMPRESA"));
    }
}
