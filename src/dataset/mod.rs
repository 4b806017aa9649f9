//! Dataset construction
//!
//! A [`TabDataset`] wraps a raw frame and its column descriptors and moves
//! through three stages: fit encoders, encode, batch. Encoders fitted on a
//! training dataset can be handed to [`TabDataset::encode`] of a validation or
//! prediction dataset so every split shares one encoding.

mod loader;
mod targets;

pub use loader::{Batch, BatchIter, LoaderConfig, TabDataLoader};
pub use targets::{TargetValue, Targets};

use crate::columns::{untyped_columns, ColumnDescriptor, ColumnSource, ColumnType};
use crate::config::{EncoderMap, HyperParameters, ProblemType, MIN_SCALAR_UNIQUE};
use crate::encoders::{
    n_distinct, EncoderKind, FeatureEncoder, FeatureEncoders, FittedColumn, NullEnc,
};
use crate::error::{Result, TabError};
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encoded categorical and continuous blocks, rows aligned with the source frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedFeatures {
    pub cat: Option<Array2<i64>>,
    pub cont: Option<Array2<f32>>,
}

/// Provenance of one categorical sub-column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatFeatureOrigin {
    pub column: String,
    /// Position among the sub-columns produced by the column's encoder
    pub index: usize,
    /// Type the column was declared with
    pub column_type: ColumnType,
    /// Type the column was actually encoded as, after the SCALAR redirect
    pub encoded_as: ColumnType,
    pub cardinality: usize,
}

impl CatFeatureOrigin {
    /// `"{column}_{index}_{TYPE}"` with the declared type
    pub fn name(&self) -> String {
        format!("{}_{}_{}", self.column, self.index, self.column_type)
    }
}

/// One encoded row
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub cat: Option<Array1<i64>>,
    pub cont: Option<Array1<f32>>,
    pub target: Option<TargetValue>,
}

/// Encoder outputs for a single column before concatenation
struct ColumnBlocks {
    origins: Vec<CatFeatureOrigin>,
    cat: Option<Array2<i64>>,
    cont: Option<Array2<f32>>,
    cont_dim: usize,
}

/// Tabular dataset with per-column encoders
#[derive(Debug)]
pub struct TabDataset {
    raw_data: DataFrame,
    columns: Vec<ColumnDescriptor>,
    column_source: ColumnSource,
    targets: Option<Arc<Targets>>,
    encoders: EncoderMap,
    batch_size: usize,
    num_workers: usize,
    seed: Option<u64>,
    feature_encoders: Option<FeatureEncoders>,
    cat_feat_origin: Vec<CatFeatureOrigin>,
    cont_feat_origin: Vec<String>,
    encoded: Option<Arc<EncodedFeatures>>,
}

impl TabDataset {
    /// Wrap a frame.
    ///
    /// `columns` must hold exactly one descriptor per frame column. When it is
    /// `None` every column is marked [`ColumnType::Unknown`]. Labels require
    /// `params.problem_type` and must match the frame length.
    pub fn new(
        df: DataFrame,
        labels: Option<&Series>,
        columns: Option<Vec<ColumnDescriptor>>,
        params: &HyperParameters,
    ) -> Result<Self> {
        let (columns, column_source) = match columns {
            Some(columns) => {
                check_descriptors(&df, &columns)?;
                (columns, ColumnSource::Declared)
            }
            None => {
                warn!(
                    n_columns = df.width(),
                    "No column types supplied, encoding every column as categorical"
                );
                (untyped_columns(&df), ColumnSource::Untyped)
            }
        };

        let targets = match labels {
            None => None,
            Some(labels) => {
                let problem_type = params.problem_type.ok_or_else(|| {
                    TabError::ConfigError("labels given without a problem type".to_string())
                })?;
                if labels.len() != df.height() {
                    return Err(TabError::ShapeError {
                        expected: format!("{} labels", df.height()),
                        actual: format!("{} labels", labels.len()),
                    });
                }
                Some(Arc::new(Targets::from_series(labels, problem_type)?))
            }
        };

        Ok(Self {
            raw_data: df,
            columns,
            column_source,
            targets,
            encoders: params.encoders,
            batch_size: params.batch_size,
            num_workers: params.num_workers,
            seed: params.seed,
            feature_encoders: None,
            cat_feat_origin: Vec::new(),
            cont_feat_origin: Vec::new(),
            encoded: None,
        })
    }

    /// Number of source rows
    pub fn len(&self) -> usize {
        self.raw_data.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw frame this dataset was built from
    pub fn data(&self) -> &DataFrame {
        &self.raw_data
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column_source(&self) -> ColumnSource {
        self.column_source
    }

    /// `false` when every column was marked [`ColumnType::Unknown`]
    pub fn has_declared_types(&self) -> bool {
        self.column_source == ColumnSource::Declared
    }

    pub fn targets(&self) -> Option<&Targets> {
        self.targets.as_deref()
    }

    /// Encoders used by the last [`encode`](Self::encode) call
    pub fn feature_encoders(&self) -> Option<&FeatureEncoders> {
        self.feature_encoders.as_ref()
    }

    pub fn encoded(&self) -> Option<&EncodedFeatures> {
        self.encoded.as_deref()
    }

    fn raw_column(&self, name: &str) -> Result<&Series> {
        let column = self
            .raw_data
            .column(name)
            .map_err(|_| TabError::FeatureNotFound(name.to_string()))?;
        Ok(column.as_materialized_series())
    }

    /// Fit one encoder per column.
    ///
    /// SCALAR columns with fewer than [`MIN_SCALAR_UNIQUE`] distinct values use
    /// the categorical encoder. A column its encoder refuses gets a [`NullEnc`]
    /// and is left out of the encoded output.
    pub fn fit_feat_encoders(&self) -> Result<FeatureEncoders> {
        let fitted: Vec<(String, FittedColumn)> = self
            .columns
            .par_iter()
            .map(|desc| {
                let column = self.raw_column(&desc.name)?;
                let fitted = fit_column(desc, column, &self.encoders)?;
                Ok((desc.name.clone(), fitted))
            })
            .collect::<Result<_>>()?;

        let encoders = FeatureEncoders::new(fitted.into_iter().collect::<HashMap<_, _>>());
        info!(
            n_columns = encoders.len(),
            n_null = encoders.null_encoded().len(),
            "Fitted feature encoders"
        );
        Ok(encoders)
    }

    /// Encode every column with `feature_encoders` and concatenate the results.
    ///
    /// The encoders are kept on the dataset. Categorical sub-columns are
    /// recorded as [`CatFeatureOrigin`]s, continuous ones by origin column name.
    pub fn encode(&mut self, feature_encoders: &FeatureEncoders) -> Result<()> {
        let n_rows = self.len();
        let blocks: Vec<ColumnBlocks> = self
            .columns
            .par_iter()
            .map(|desc| {
                let fitted = feature_encoders
                    .get(&desc.name)
                    .ok_or_else(|| TabError::FeatureNotFound(desc.name.clone()))?;
                let column = self.raw_column(&desc.name)?;
                encode_column(desc, fitted, column, n_rows)
            })
            .collect::<Result<_>>()?;

        let mut cat_feat_origin = Vec::new();
        let mut cont_feat_origin = Vec::new();
        let mut cat_views: Vec<ArrayView2<i64>> = Vec::new();
        let mut cont_views: Vec<ArrayView2<f32>> = Vec::new();
        for (desc, block) in self.columns.iter().zip(&blocks) {
            cat_feat_origin.extend(block.origins.iter().cloned());
            if let Some(cat) = &block.cat {
                cat_views.push(cat.view());
            }
            if let Some(cont) = &block.cont {
                cont_feat_origin.extend(std::iter::repeat(desc.name.clone()).take(block.cont_dim));
                cont_views.push(cont.view());
            }
        }

        let cat = if cat_views.is_empty() {
            None
        } else {
            Some(concatenate(Axis(1), &cat_views)?)
        };
        let cont = if cont_views.is_empty() {
            None
        } else {
            Some(concatenate(Axis(1), &cont_views)?)
        };

        debug!(
            n_rows,
            n_cat = cat_feat_origin.len(),
            n_cont = cont_feat_origin.len(),
            "Encoded dataset"
        );
        self.cat_feat_origin = cat_feat_origin;
        self.cont_feat_origin = cont_feat_origin;
        self.encoded = Some(Arc::new(EncodedFeatures { cat, cont }));
        self.feature_encoders = Some(feature_encoders.clone());
        Ok(())
    }

    /// Fit encoders on this dataset and encode it with them
    pub fn fit_and_encode(&mut self) -> Result<FeatureEncoders> {
        let encoders = self.fit_feat_encoders()?;
        self.encode(&encoders)?;
        Ok(encoders)
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded.is_some()
    }

    fn encoded_features(&self) -> Result<&Arc<EncodedFeatures>> {
        self.encoded
            .as_ref()
            .ok_or_else(|| TabError::NotFitted("dataset has not been encoded".to_string()))
    }

    /// Categorical sub-column provenance, empty before encoding
    pub fn cat_feat_origin(&self) -> &[CatFeatureOrigin] {
        &self.cat_feat_origin
    }

    /// `(origin name, cardinality)` per categorical sub-column; `None` before encoding
    pub fn cat_feat_origin_cards(&self) -> Option<Vec<(String, usize)>> {
        self.encoded.as_ref()?;
        Some(
            self.cat_feat_origin
                .iter()
                .map(|o| (o.name(), o.cardinality))
                .collect(),
        )
    }

    /// Origin column of every continuous value
    pub fn cont_feat_origin(&self) -> &[String] {
        &self.cont_feat_origin
    }

    /// Width of the continuous block; `None` before encoding
    pub fn n_cont_features(&self) -> Option<usize> {
        self.encoded.as_ref().map(|_| self.cont_feat_origin.len())
    }

    /// Row `idx` of the encoded blocks and its target
    pub fn get(&self, idx: usize) -> Result<Sample> {
        let encoded = self.encoded_features()?;
        if idx >= self.len() {
            return Err(TabError::DataError(format!(
                "row {} out of range for dataset of {} rows",
                idx,
                self.len()
            )));
        }
        Ok(Sample {
            cat: encoded.cat.as_ref().map(|c| c.row(idx).to_owned()),
            cont: encoded.cont.as_ref().map(|c| c.row(idx).to_owned()),
            target: self.targets.as_ref().and_then(|t| t.get(idx)),
        })
    }

    /// Loader configuration derived from the dataset's hyperparameters
    pub fn loader_config(&self, shuffle: bool) -> LoaderConfig {
        LoaderConfig::new(self.batch_size)
            .with_shuffle(shuffle)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
    }

    /// Batch loader using the dataset's batch size and worker count
    pub fn build_loader(&self, shuffle: bool) -> Result<TabDataLoader> {
        self.build_loader_with(self.loader_config(shuffle))
    }

    pub fn build_loader_with(&self, config: LoaderConfig) -> Result<TabDataLoader> {
        if config.batch_size == 0 {
            return Err(TabError::invalid_parameter("batch_size", 0, "must be positive"));
        }
        let encoded = Arc::clone(self.encoded_features()?);
        Ok(TabDataLoader::new(
            encoded,
            self.targets.clone(),
            self.len(),
            config,
            self.cat_feat_origin_cards().unwrap_or_default(),
            self.cont_feat_origin.len(),
        ))
    }
}

fn check_descriptors(df: &DataFrame, columns: &[ColumnDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();
    for desc in columns {
        if !seen.insert(desc.name.as_str()) {
            return Err(TabError::ConfigError(format!(
                "column '{}' is described more than once",
                desc.name
            )));
        }
    }
    for name in df.get_column_names() {
        if !seen.remove(name.as_str()) {
            return Err(TabError::ConfigError(format!("column '{}' has no descriptor", name)));
        }
    }
    if let Some(extra) = seen.into_iter().next() {
        return Err(TabError::FeatureNotFound(extra.to_string()));
    }
    Ok(())
}

/// Choose, fit and if necessary replace the encoder for one column
fn fit_column(desc: &ColumnDescriptor, column: &Series, encoders: &EncoderMap) -> Result<FittedColumn> {
    let mut encoded_as = desc.column_type;
    let mut kind = encoders.for_type(desc.column_type);

    if desc.column_type == ColumnType::Scalar {
        let n_unique = n_distinct(column)?;
        if n_unique < MIN_SCALAR_UNIQUE {
            info!(
                column = %desc.name,
                n_unique,
                "Column shouldn't be encoded as SCALAR, switching to CATEGORICAL"
            );
            kind = encoders.categorical;
            encoded_as = ColumnType::Categorical;
        }
    }

    let mut encoder = kind.build();
    let encoder: Box<dyn FeatureEncoder> = match encoder.fit(column) {
        Ok(()) => encoder,
        Err(e) if e.is_wont_encode() => {
            warn!(column = %desc.name, encoder = %kind, error = %e, "Not encoding column");
            Box::new(NullEnc)
        }
        Err(e) => return Err(e),
    };
    if encoder.kind() == EncoderKind::Null {
        debug!(column = %desc.name, "Column contributes no features");
    }
    Ok(FittedColumn { encoder, encoded_as })
}

fn encode_column(
    desc: &ColumnDescriptor,
    fitted: &FittedColumn,
    column: &Series,
    n_rows: usize,
) -> Result<ColumnBlocks> {
    let name = desc.name.as_str();
    let encoder = fitted.encoder.as_ref();
    let cat = encoder.enc_cat(column)?;
    let cont = encoder.enc_cont(column)?;

    if let Some(block) = &cat {
        check_rows(name, block.nrows(), n_rows)?;
        check_width(name, "categorical", block.ncols(), encoder.cat_cards().len())?;
    }
    if let Some(block) = &cont {
        check_rows(name, block.nrows(), n_rows)?;
        check_width(name, "continuous", block.ncols(), encoder.cont_dim())?;
    }

    let origins = match &cat {
        Some(_) => encoder
            .cat_cards()
            .iter()
            .enumerate()
            .map(|(index, &cardinality)| CatFeatureOrigin {
                column: name.to_string(),
                index,
                column_type: desc.column_type,
                encoded_as: fitted.encoded_as,
                cardinality,
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(ColumnBlocks {
        origins,
        cat,
        cont,
        cont_dim: encoder.cont_dim(),
    })
}

fn check_rows(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(TabError::ShapeError {
            expected: format!("{} rows for column '{}'", expected, name),
            actual: format!("{} rows", actual),
        });
    }
    Ok(())
}

fn check_width(name: &str, block: &str, actual: usize, declared: usize) -> Result<()> {
    if actual != declared {
        return Err(TabError::EncodingError(format!(
            "encoder for column '{}' produced {} {} sub-columns but declares {}",
            name, actual, block, declared
        )));
    }
    Ok(())
}

/// Problem type implied by a label series: float labels regress, two distinct
/// values are binary, anything else multiclass
pub fn infer_problem_type(labels: &Series) -> Result<ProblemType> {
    if labels.dtype().is_float() {
        return Ok(ProblemType::Regression);
    }
    match labels.drop_nulls().n_unique()? {
        0 | 1 => Err(TabError::DataError(format!(
            "label column '{}' has fewer than two distinct values",
            labels.name()
        ))),
        2 => Ok(ProblemType::Binary),
        _ => Ok(ProblemType::Multiclass),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HyperParameters {
        HyperParameters::default_for(ProblemType::Binary, None)
            .unwrap()
            .with_num_workers(0)
            .with_batch_size(4)
    }

    fn frame() -> DataFrame {
        df!(
            "color" => &["red", "blue", "red", "green", "red", "blue"],
            "size" => &[1.0, 2.0, 1.0, 3.0, 2.0, 1.0],
            "empty" => &[None::<&str>, None, None, None, None, None]
        )
        .unwrap()
    }

    fn descriptors() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::categorical("color"),
            ColumnDescriptor::scalar("size"),
            ColumnDescriptor::categorical("empty"),
        ]
    }

    #[test]
    fn test_descriptor_checks() {
        let p = params();
        let mut missing = descriptors();
        missing.pop();
        assert!(TabDataset::new(frame(), None, Some(missing), &p).is_err());

        let mut dup = descriptors();
        dup.push(ColumnDescriptor::scalar("size"));
        assert!(TabDataset::new(frame(), None, Some(dup), &p).is_err());

        let mut extra = descriptors();
        extra.push(ColumnDescriptor::scalar("weight"));
        assert!(matches!(
            TabDataset::new(frame(), None, Some(extra), &p),
            Err(TabError::FeatureNotFound(_))
        ));
    }

    #[test]
    fn test_untyped_columns_are_observable() {
        let ds = TabDataset::new(frame(), None, None, &params()).unwrap();
        assert_eq!(ds.column_source(), ColumnSource::Untyped);
        assert!(!ds.has_declared_types());
        assert!(ds.columns().iter().all(|c| c.column_type == ColumnType::Unknown));
    }

    #[test]
    fn test_labels_require_problem_type() {
        let labels = Series::new("y".into(), &[0i64, 1, 0, 1, 0, 1]);
        let p = HyperParameters::fixed();
        assert!(matches!(
            TabDataset::new(frame(), Some(&labels), Some(descriptors()), &p),
            Err(TabError::ConfigError(_))
        ));

        let short = Series::new("y".into(), &[0i64, 1]);
        assert!(matches!(
            TabDataset::new(frame(), Some(&short), Some(descriptors()), &params()),
            Err(TabError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_fit_and_encode() {
        let labels = Series::new("y".into(), &[0i64, 1, 0, 1, 0, 1]);
        let mut ds = TabDataset::new(frame(), Some(&labels), Some(descriptors()), &params()).unwrap();
        let encoders = ds.fit_and_encode().unwrap();

        assert_eq!(encoders.null_encoded(), vec!["empty"]);
        assert_eq!(
            encoders.get("size").unwrap().encoded_as,
            ColumnType::Categorical
        );

        let cards = ds.cat_feat_origin_cards().unwrap();
        assert_eq!(
            cards,
            vec![
                ("color_0_CATEGORICAL".to_string(), 5),
                ("size_0_SCALAR".to_string(), 5),
            ]
        );
        assert_eq!(ds.cat_feat_origin()[1].encoded_as, ColumnType::Categorical);
        assert_eq!(ds.n_cont_features(), Some(0));

        let sample = ds.get(0).unwrap();
        assert_eq!(sample.cat.unwrap().to_vec(), vec![2, 2]);
        assert_eq!(sample.target, Some(TargetValue::Class(0)));
        assert!(ds.get(6).is_err());
    }

    #[test]
    fn test_encoder_width_mismatch() {
        assert!(check_width("color", "categorical", 1, 1).is_ok());
        assert!(matches!(
            check_width("color", "continuous", 3, 4),
            Err(TabError::EncodingError(_))
        ));
    }

    #[test]
    fn test_get_before_encode_fails() {
        let ds = TabDataset::new(frame(), None, Some(descriptors()), &params()).unwrap();
        assert!(matches!(ds.get(0), Err(TabError::NotFitted(_))));
        assert!(ds.cat_feat_origin_cards().is_none());
        assert!(ds.build_loader(false).is_err());
    }

    #[test]
    fn test_shared_encoders_map_unseen_to_missing() {
        let mut train = TabDataset::new(frame(), None, Some(descriptors()), &params()).unwrap();
        let encoders = train.fit_and_encode().unwrap();

        let val_df = df!(
            "color" => &["purple", "red"],
            "size" => &[9.0, 1.0],
            "empty" => &[Some("x"), None]
        )
        .unwrap();
        let mut val = TabDataset::new(val_df, None, Some(descriptors()), &params()).unwrap();
        val.encode(&encoders).unwrap();

        assert_eq!(val.cat_feat_origin_cards(), train.cat_feat_origin_cards());
        let cat = val.encoded().unwrap().cat.as_ref().unwrap();
        assert_eq!(cat[[0, 0]], 1);
        assert_eq!(cat[[1, 0]], 2);
    }

    #[test]
    fn test_continuous_origins() {
        let text: Vec<String> = (0..10).map(|i| "word ".repeat(i + 1)).collect();
        let df = df!("notes" => &text).unwrap();
        let mut ds = TabDataset::new(
            df,
            None,
            Some(vec![ColumnDescriptor::text("notes")]),
            &params(),
        )
        .unwrap();
        ds.fit_and_encode().unwrap();
        assert_eq!(ds.n_cont_features(), Some(4));
        assert!(ds.cont_feat_origin().iter().all(|o| o == "notes"));
        assert!(ds.encoded().unwrap().cat.is_none());
        assert_eq!(ds.cat_feat_origin_cards(), Some(vec![]));
    }

    #[test]
    fn test_infer_problem_type() {
        let reg = Series::new("y".into(), &[0.5, 1.5]);
        assert_eq!(infer_problem_type(&reg).unwrap(), ProblemType::Regression);
        let bin = Series::new("y".into(), &[0i64, 1, 1]);
        assert_eq!(infer_problem_type(&bin).unwrap(), ProblemType::Binary);
        let multi = Series::new("y".into(), &["a", "b", "c"]);
        assert_eq!(infer_problem_type(&multi).unwrap(), ProblemType::Multiclass);
        let constant = Series::new("y".into(), &[1i64, 1]);
        assert!(infer_problem_type(&constant).is_err());
    }
}
