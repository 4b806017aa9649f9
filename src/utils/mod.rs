//! Utility functions and types

pub mod data_loader;

pub use data_loader::{
    encode_class_labels, load_column_types, load_csv, split_target,
    suggest_column_type, suggest_column_types, train_val_split, ColumnSummary, DatasetInfo,
};
