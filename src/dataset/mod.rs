pub mod scanner;
pub mod split;
pub mod table;

pub use scanner::{class_counts, scan_directory, scan_directory_with_extensions, Sample};
pub use split::{missing_classes, train_test_split, TrainTestSplit, DEFAULT_TEST_FRACTION};
pub use table::{
    Column, ColumnInfo, ColumnKind, DataTable, IMAGE_COLUMN, IMAGE_PATH_COLUMN, LABEL_COLUMN,
    LABEL_KEY_COLUMN, PREDICTED_KEY_COLUMN, PREDICTED_LABEL_COLUMN, SCORE_COLUMN,
};
