//! Data loading utilities

use crate::columns::{ColumnDescriptor, ColumnType};
use crate::encoders::{parse_datetime, parse_latlong};
use crate::error::{Result, TabError};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Rows inspected when guessing a string column's type
const TYPE_SAMPLE_ROWS: usize = 200;

/// Load a CSV or TSV file; the separator follows the extension
pub fn load_csv(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let start = Instant::now();
    let file = File::open(path)
        .map_err(|e| TabError::DataError(format!("{}: {}", path.display(), e)))?;

    let is_tsv = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("tsv"));
    let parse_opts = CsvParseOptions::default().with_separator(if is_tsv { b'\t' } else { b',' });

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .with_parse_options(parse_opts)
        .into_reader_with_file_handle(file)
        .finish()
        .map_err(|e| TabError::DataError(e.to_string()))?;

    debug!(
        path = %path.display(),
        rows = df.height(),
        columns = df.width(),
        ms = start.elapsed().as_millis() as u64,
        "Loaded CSV"
    );
    Ok(df)
}

/// Split the label column off a frame
pub fn split_target(df: &DataFrame, target: &str) -> Result<(DataFrame, Series)> {
    let labels = df
        .column(target)
        .map_err(|_| TabError::FeatureNotFound(target.to_string()))?
        .as_materialized_series()
        .clone();
    let features = df.drop(target)?;
    Ok((features, labels))
}

/// Map arbitrary labels to dense class ids `0..n`, ordered by label text.
///
/// Returns the id series and the label of each id.
pub fn encode_class_labels(labels: &Series) -> Result<(Series, Vec<String>)> {
    let as_str = labels.cast(&DataType::String)?;
    let values: Vec<Option<&str>> = as_str.str()?.into_iter().collect();
    let mut classes: Vec<String> = values.iter().flatten().map(|s| s.to_string()).collect();
    classes.sort_unstable();
    classes.dedup();

    let ids: Vec<Option<i64>> = values
        .iter()
        .map(|v| {
            v.and_then(|s| classes.binary_search_by(|c| c.as_str().cmp(s)).ok())
                .map(|i| i as i64)
        })
        .collect();
    Ok((Series::new(labels.name().clone(), ids), classes))
}

/// Shuffle rows and split off the last `val_fraction` as a validation set
pub fn train_val_split(
    df: &DataFrame,
    labels: &Series,
    val_fraction: f64,
    seed: Option<u64>,
) -> Result<((DataFrame, Series), (DataFrame, Series))> {
    if !(0.0..1.0).contains(&val_fraction) {
        return Err(TabError::invalid_parameter(
            "val_fraction",
            val_fraction,
            "must be within [0, 1)",
        ));
    }
    let n = df.height();
    let mut order: Vec<u32> = (0..n as u32).collect();
    let mut rng = match seed {
        Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
        None => Xoshiro256PlusPlus::from_entropy(),
    };
    order.shuffle(&mut rng);

    let n_val = (n as f64 * val_fraction).round() as usize;
    let (train_idx, val_idx) = order.split_at(n - n_val);
    let take = |idx: &[u32]| -> Result<(DataFrame, Series)> {
        let idx = IdxCa::from_vec("idx".into(), idx.to_vec());
        Ok((df.take(&idx)?, labels.take(&idx)?))
    };
    Ok((take(train_idx)?, take(val_idx)?))
}

/// Read column descriptors from a JSON array of `{"name", "type"}` objects
pub fn load_column_types(path: impl AsRef<Path>) -> Result<Vec<ColumnDescriptor>> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| TabError::ConfigError(format!("invalid column types: {}", e)))
}

/// Guess a column type from its values.
///
/// Numeric columns are SCALAR. String columns are DATETIME or LATLONG when
/// most sampled values parse as such, TEXT when values average more than
/// three words, CATEGORICAL otherwise.
pub fn suggest_column_type(column: &Series) -> Result<ColumnType> {
    if column.dtype().is_primitive_numeric() {
        return Ok(ColumnType::Scalar);
    }
    if matches!(column.dtype(), DataType::Date | DataType::Datetime(_, _)) {
        return Ok(ColumnType::Datetime);
    }

    let as_str = column.cast(&DataType::String)?;
    let sample: Vec<&str> = as_str.str()?.into_iter().flatten().take(TYPE_SAMPLE_ROWS).collect();
    if sample.is_empty() {
        return Ok(ColumnType::Categorical);
    }
    let share = |hits: usize| hits as f64 / sample.len() as f64;

    if share(sample.iter().filter(|s| parse_datetime(s).is_some()).count()) > 0.9 {
        return Ok(ColumnType::Datetime);
    }
    if share(sample.iter().filter(|s| parse_latlong(s).is_some()).count()) > 0.9 {
        return Ok(ColumnType::Latlong);
    }
    let mean_words =
        sample.iter().map(|s| s.split_whitespace().count()).sum::<usize>() as f64 / sample.len() as f64;
    if mean_words > 3.0 {
        return Ok(ColumnType::Text);
    }
    Ok(ColumnType::Categorical)
}

/// [`suggest_column_type`] for every column, in frame order
pub fn suggest_column_types(df: &DataFrame) -> Result<Vec<ColumnDescriptor>> {
    df.get_columns()
        .iter()
        .map(|c| {
            let series = c.as_materialized_series();
            Ok(ColumnDescriptor::new(series.name().to_string(), suggest_column_type(series)?))
        })
        .collect()
}

/// Summary of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub dtype: String,
    pub null_count: usize,
    pub n_unique: usize,
    pub suggested_type: ColumnType,
}

/// Summary of a loaded table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub n_rows: usize,
    pub columns: Vec<ColumnSummary>,
}

impl DatasetInfo {
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let columns = df
            .get_columns()
            .iter()
            .map(|c| {
                let series = c.as_materialized_series();
                Ok(ColumnSummary {
                    name: series.name().to_string(),
                    dtype: series.dtype().to_string(),
                    null_count: series.null_count(),
                    n_unique: series.drop_nulls().n_unique()?,
                    suggested_type: suggest_column_type(series)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            n_rows: df.height(),
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_csv_and_split_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "color,size,label").unwrap();
        writeln!(f, "red,1.5,yes").unwrap();
        writeln!(f, "blue,2.5,no").unwrap();
        drop(f);

        let df = load_csv(&path).unwrap();
        assert_eq!(df.shape(), (2, 3));
        let (features, labels) = split_target(&df, "label").unwrap();
        assert_eq!(features.width(), 2);
        assert_eq!(labels.len(), 2);
        assert!(split_target(&df, "missing").is_err());
    }

    #[test]
    fn test_encode_class_labels() {
        let labels = Series::new("y".into(), &["b", "a", "b", "c"]);
        let (ids, classes) = encode_class_labels(&labels).unwrap();
        assert_eq!(classes, vec!["a", "b", "c"]);
        let ids: Vec<Option<i64>> = ids.i64().unwrap().into_iter().collect();
        assert_eq!(ids, vec![Some(1), Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_train_val_split_sizes() {
        let df = df!("a" => &(0..10).collect::<Vec<i64>>()).unwrap();
        let labels = Series::new("y".into(), &(0..10).collect::<Vec<i64>>());
        let ((tr, tr_y), (va, va_y)) = train_val_split(&df, &labels, 0.2, Some(1)).unwrap();
        assert_eq!(tr.height(), 8);
        assert_eq!(tr_y.len(), 8);
        assert_eq!(va.height(), 2);
        assert_eq!(va_y.len(), 2);
        // rows and labels stay aligned
        assert!(va.column("a").unwrap().as_materialized_series().equals(&va_y.with_name("a".into())));
        assert!(train_val_split(&df, &labels, 1.0, None).is_err());
    }

    #[test]
    fn test_suggest_column_types() {
        let df = df!(
            "n" => &[1.0, 2.0],
            "when" => &["2020-01-01", "2021-06-30"],
            "where" => &["47.6,-122.3", "40.7,-74.0"],
            "notes" => &["this is a long note", "another fairly long note here"],
            "kind" => &["a", "b"]
        )
        .unwrap();
        let types: Vec<ColumnType> = suggest_column_types(&df)
            .unwrap()
            .into_iter()
            .map(|d| d.column_type)
            .collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Scalar,
                ColumnType::Datetime,
                ColumnType::Latlong,
                ColumnType::Text,
                ColumnType::Categorical
            ]
        );
    }

    #[test]
    fn test_column_types_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.json");
        std::fs::write(&path, r#"[{"name": "a", "type": "TEXT"}]"#).unwrap();
        assert_eq!(load_column_types(&path).unwrap(), vec![ColumnDescriptor::text("a")]);
        std::fs::write(&path, r#"[{"name": "a", "type": "IMAGE"}]"#).unwrap();
        assert!(load_column_types(&path).is_err());
    }
}
