//! Integration test: dataset construction and encoding

use polars::prelude::*;
use tabtransformer::columns::{ColumnDescriptor, ColumnType};
use tabtransformer::config::{HyperParameters, ProblemType};
use tabtransformer::dataset::{LoaderConfig, TabDataset, Targets};
use tabtransformer::encoders::{EncoderKind, FeatureEncoder};

fn params() -> HyperParameters {
    HyperParameters::default_for(ProblemType::Binary, None)
        .unwrap()
        .with_batch_size(16)
        .with_num_workers(0)
        .with_seed(7)
}

fn mixed_df(n: usize) -> DataFrame {
    let cat: Vec<&str> = (0..n).map(|i| ["x", "y", "z"][i % 3]).collect();
    let scalar: Vec<f64> = (0..n).map(|i| i as f64 * 0.37).collect();
    let when: Vec<String> = (0..n)
        .map(|i| format!("2021-{:02}-{:02} {:02}:00:00", i % 12 + 1, i % 28 + 1, i % 24))
        .collect();
    let place: Vec<String> = (0..n)
        .map(|i| format!("{:.2},{:.2}", 40.0 + i as f64 * 0.1, -70.0 - i as f64 * 0.2))
        .collect();
    let notes: Vec<String> = (0..n).map(|i| "note ".repeat(i % 7 + 1)).collect();
    df!(
        "cat" => &cat,
        "scalar" => &scalar,
        "when" => &when,
        "place" => &place,
        "notes" => &notes
    )
    .unwrap()
}

fn mixed_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::categorical("cat"),
        ColumnDescriptor::scalar("scalar"),
        ColumnDescriptor::datetime("when"),
        ColumnDescriptor::latlong("place"),
        ColumnDescriptor::text("notes"),
    ]
}

#[test]
fn test_fitted_encoders_keep_row_count() {
    let df = mixed_df(60);
    for desc in mixed_columns() {
        let column = df.column(&desc.name).unwrap().as_materialized_series();
        let mut enc = params().encoders.for_type(desc.column_type).build();
        enc.fit(column).unwrap();

        if let Some(block) = enc.enc_cat(column).unwrap() {
            assert_eq!(block.nrows(), 60, "{}", desc.name);
            assert_eq!(block.ncols(), enc.cat_cards().len());
        }
        if let Some(block) = enc.enc_cont(column).unwrap() {
            assert_eq!(block.nrows(), 60, "{}", desc.name);
            assert_eq!(block.ncols(), enc.cont_dim());
        }
    }
}

#[test]
fn test_mixed_frame_encodes_every_type() {
    let mut ds = TabDataset::new(mixed_df(60), None, Some(mixed_columns()), &params()).unwrap();
    let encoders = ds.fit_and_encode().unwrap();
    assert!(encoders.null_encoded().is_empty());

    let names: Vec<String> = ds
        .cat_feat_origin_cards()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names[0], "cat_0_CATEGORICAL");
    assert!(names.contains(&"scalar_0_SCALAR".to_string()));
    assert!(names.contains(&"place_1_LATLONG".to_string()));
    assert!(names.iter().any(|n| n.starts_with("when_") && n.ends_with("_DATETIME")));

    assert_eq!(ds.n_cont_features(), Some(4));
    let encoded = ds.encoded().unwrap();
    assert_eq!(encoded.cat.as_ref().unwrap().nrows(), 60);
    assert_eq!(encoded.cont.as_ref().unwrap().shape(), &[60, 4]);
}

#[test]
fn test_failing_encoder_replaced_by_null() {
    let df = df!(
        "constant" => &["same"; 10],
        "ok" => &["a", "b", "a", "b", "c", "a", "b", "c", "a", "a"]
    )
    .unwrap();
    let columns = vec![
        ColumnDescriptor::categorical("constant"),
        ColumnDescriptor::categorical("ok"),
    ];
    let mut ds = TabDataset::new(df, None, Some(columns), &params()).unwrap();
    let encoders = ds.fit_and_encode().unwrap();

    assert_eq!(encoders.null_encoded(), vec!["constant"]);
    let null_enc = encoders.encoder("constant").unwrap();
    assert_eq!(null_enc.kind(), EncoderKind::Null);
    assert!(null_enc.cat_cards().is_empty());
    assert_eq!(null_enc.cont_dim(), 0);

    let cards = ds.cat_feat_origin_cards().unwrap();
    assert_eq!(cards, vec![("ok_0_CATEGORICAL".to_string(), 5)]);

    // encoding again with the same encoders never raises
    ds.encode(&encoders).unwrap();
    assert_eq!(ds.encoded().unwrap().cat.as_ref().unwrap().ncols(), 1);
}

#[test]
fn test_low_cardinality_scalar_becomes_categorical() {
    let a: Vec<&str> = (0..100).map(|i| ["p", "q", "r"][i % 3]).collect();
    let b: Vec<f64> = (0..100).map(|i| (i % 5) as f64).collect();
    let df = df!("a" => &a, "b" => &b).unwrap();
    let columns = vec![ColumnDescriptor::categorical("a"), ColumnDescriptor::scalar("b")];

    let mut ds = TabDataset::new(df, None, Some(columns), &params()).unwrap();
    let encoders = ds.fit_and_encode().unwrap();

    let b_enc = encoders.get("b").unwrap();
    assert_eq!(b_enc.encoder.kind(), EncoderKind::CategoricalOrdinal);
    assert_eq!(b_enc.encoded_as, ColumnType::Categorical);

    // names keep the declared type
    let cards = ds.cat_feat_origin_cards().unwrap();
    assert_eq!(
        cards,
        vec![
            ("a_0_CATEGORICAL".to_string(), 5),
            ("b_0_SCALAR".to_string(), 7),
        ]
    );
    let b_origin = &ds.cat_feat_origin()[1];
    assert_eq!(b_origin.column_type, ColumnType::Scalar);
    assert_eq!(b_origin.encoded_as, ColumnType::Categorical);
}

#[test]
fn test_nan_not_counted_as_distinct_scalar_value() {
    let mut b: Vec<f64> = (0..31).map(|i| i as f64).collect();
    b.push(f64::NAN);
    let df = df!("b" => &b).unwrap();

    let mut ds = TabDataset::new(df, None, Some(vec![ColumnDescriptor::scalar("b")]), &params())
        .unwrap();
    let encoders = ds.fit_and_encode().unwrap();
    assert_eq!(encoders.get("b").unwrap().encoded_as, ColumnType::Categorical);

    // 31 values plus the two reserved codes, NaN maps to missing
    let cards = ds.cat_feat_origin_cards().unwrap();
    assert_eq!(cards, vec![("b_0_SCALAR".to_string(), 33)]);
    let cat = ds.encoded().unwrap().cat.as_ref().unwrap();
    assert_eq!(cat[[31, 0]], 1);
}

#[test]
fn test_length_matches_row_count() {
    let empty = df!("a" => Vec::<&str>::new()).unwrap();
    let mut ds = TabDataset::new(empty, None, Some(vec![ColumnDescriptor::categorical("a")]), &params())
        .unwrap();
    assert_eq!(ds.len(), 0);
    assert!(ds.is_empty());
    ds.fit_and_encode().unwrap();
    assert_eq!(ds.build_loader(true).unwrap().iter().count(), 0);

    let one = df!("a" => &["only"]).unwrap();
    let mut ds = TabDataset::new(one, None, Some(vec![ColumnDescriptor::categorical("a")]), &params())
        .unwrap();
    ds.fit_and_encode().unwrap();
    assert_eq!(ds.len(), 1);
    assert!(ds.get(0).unwrap().cat.is_none());

    let ds = TabDataset::new(mixed_df(37), None, Some(mixed_columns()), &params()).unwrap();
    assert_eq!(ds.len(), 37);
}

#[test]
fn test_untyped_columns_encode_as_categorical() {
    let df = df!("a" => &["u", "v", "u", "w"], "b" => &[1i64, 2, 3, 1]).unwrap();
    let mut ds = TabDataset::new(df, None, None, &params()).unwrap();
    assert!(!ds.has_declared_types());
    let encoders = ds.fit_and_encode().unwrap();
    assert_eq!(encoders.encoder("b").unwrap().kind(), EncoderKind::CategoricalOrdinal);

    let cards = ds.cat_feat_origin_cards().unwrap();
    assert_eq!(cards[0].0, "a_0_UNKNOWN");
    assert_eq!(cards[1], ("b_0_UNKNOWN".to_string(), 5));
}

#[test]
fn test_loader_yields_all_rows_with_targets() {
    let labels = Series::new("y".into(), (0..45).map(|i| (i % 2) as i64).collect::<Vec<_>>());
    let mut ds = TabDataset::new(mixed_df(45), Some(&labels), Some(mixed_columns()), &params())
        .unwrap();
    ds.fit_and_encode().unwrap();

    let loader = ds
        .build_loader_with(LoaderConfig::new(10).with_num_workers(3).with_seed(Some(1)))
        .unwrap();
    assert_eq!(loader.len(), 5);
    assert_eq!(loader.cat_feat_origin_cards(), ds.cat_feat_origin_cards().unwrap().as_slice());

    let mut seen = Vec::new();
    for batch in loader.iter() {
        let target = batch.target.as_ref().unwrap();
        for (pos, &row) in batch.indices.iter().enumerate() {
            let expected = (row % 2) as i64;
            match target {
                Targets::Classes(t) => assert_eq!(t[pos], expected),
                Targets::Regression(_) => panic!("expected class targets"),
            }
        }
        assert_eq!(batch.cont.as_ref().unwrap().nrows(), batch.len());
        seen.extend(batch.indices);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..45).collect::<Vec<_>>());
}
