pub mod errors;
pub mod model;
pub mod read;
pub mod resolve;
pub mod timestamp;
pub mod write;

pub use errors::TableError;
pub use model::{
    cleaned_output_path, detect_origin, flagged_output_path, list_raw_files, Origin,
    CLEANED_PREFIX, DIARY_FILENAME, FLAGGED_PREFIX, RAW_PREFIX,
};
pub use read::{column_names, read_delimited, read_delimited_with_separator, sniff_delimiter};
pub use resolve::{match_raw_column, normalize_name};
pub use timestamp::{format_timestamp, parse_epoch_seconds, parse_timestamp};
pub use write::{write_csv, write_csv_atomic};
